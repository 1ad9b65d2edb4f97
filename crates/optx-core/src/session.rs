//! Per-query session: identity, default catalog, and string-valued system properties.
//!
//! Properties are stored as strings and parsed when read, so a malformed value only
//! fails the query that set it.

use crate::error::{OptimizerError, OptimizerResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

pub const ITERATIVE_OPTIMIZER_TIMEOUT: &str = "iterative_optimizer_timeout_ms";
pub const ITERATIVE_OPTIMIZER_MAX_ITERATIONS: &str = "iterative_optimizer_max_iterations";
/// Comma-separated rule names.
pub const DISABLED_RULES: &str = "disabled_rules";
pub const JOIN_REORDERING_ENABLED: &str = "join_reordering_enabled";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub query_id: String,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// Set while the session runs inside a transaction scope.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Catalogs registered with the current transaction.
    #[serde(default)]
    pub registered_catalogs: BTreeSet<String>,
    #[serde(default)]
    system_properties: BTreeMap<String, String>,
}

impl Session {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            ..Self::default()
        }
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>, schema: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self.schema = Some(schema.into());
        self
    }

    pub fn with_system_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_system_property(name, value);
        self
    }

    pub fn set_system_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.system_properties.insert(name.into(), value.into());
    }

    pub fn system_property(&self, name: &str) -> Option<&str> {
        self.system_properties.get(name).map(String::as_str)
    }

    pub fn system_properties(&self) -> &BTreeMap<String, String> {
        &self.system_properties
    }

    /// Parse a property. `Ok(None)` when it is unset.
    pub fn parse_property<T>(&self, name: &str) -> OptimizerResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.system_property(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                OptimizerError::InvalidSessionProperty {
                    name: name.to_string(),
                    message: format!("'{raw}': {e}"),
                }
            }),
        }
    }

    pub fn is_rule_enabled(&self, rule_name: &str) -> bool {
        self.system_property(DISABLED_RULES)
            .map(|disabled| {
                !disabled
                    .split(',')
                    .map(str::trim)
                    .any(|name| name.eq_ignore_ascii_case(rule_name))
            })
            .unwrap_or(true)
    }

    pub fn join_reordering_enabled(&self) -> OptimizerResult<bool> {
        Ok(self.parse_property(JOIN_REORDERING_ENABLED)?.unwrap_or(true))
    }
}
