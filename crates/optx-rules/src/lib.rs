//! # Built-in Rewrite Rules
//!
//! This crate provides the default rule set for the iterative optimizer. Every rule is
//! a local rewrite: it matches a small plan shape and returns an equivalent plan with
//! the same output variables.
//!
//! ## Filters
//!
//! - **`RemoveTrivialFiltersRule`**: Drops `Filter(true)` and turns `Filter(false)` into
//!   an empty `Values`.
//! - **`MergeFiltersRule`**: Collapses stacked filters into one conjunction.
//! - **`PredicatePushdownRule`**: Sends filter conjuncts into the inputs and the
//!   condition of inner and cross joins.
//!
//! ## Projections
//!
//! - **`ProjectionPushdownRule`**: Narrows table scans to the columns a projection reads.
//! - **`RemoveRedundantIdentityProjectionsRule`**: Removes projections that forward every
//!   input column unchanged.
//!
//! ## Limits
//!
//! - **`PushLimitThroughProjectRule`**: Moves limits below projections.
//! - **`MergeLimitsRule`**: Folds stacked limits into one window.
//! - **`EvaluateZeroLimitRule`**: Replaces `Limit(0)` with an empty `Values`.
//! - **`RemoveRedundantLimitRule`**: Drops limits whose input is already small enough.
//!
//! ## Aggregation and Joins
//!
//! - **`RemoveRedundantDistinctRule`**: Drops DISTINCT over inputs that are already
//!   distinct on the grouping keys.
//! - **`JoinCommutativityRule`**: Puts the smaller input of an inner or cross join on
//!   the build (right) side.

pub mod cardinality;
pub mod evaluate_zero_limit;
pub mod join_commutativity;
pub mod merge_filters;
pub mod merge_limits;
pub mod predicate_pushdown;
pub mod projection_pushdown;
pub mod push_limit_through_project;
pub mod remove_identity_projections;
pub mod remove_redundant_distinct;
pub mod remove_redundant_limit;
pub mod remove_trivial_filters;

pub use evaluate_zero_limit::EvaluateZeroLimitRule;
pub use join_commutativity::JoinCommutativityRule;
pub use merge_filters::MergeFiltersRule;
pub use merge_limits::MergeLimitsRule;
pub use predicate_pushdown::PredicatePushdownRule;
pub use projection_pushdown::ProjectionPushdownRule;
pub use push_limit_through_project::PushLimitThroughProjectRule;
pub use remove_identity_projections::RemoveRedundantIdentityProjectionsRule;
pub use remove_redundant_distinct::RemoveRedundantDistinctRule;
pub use remove_redundant_limit::RemoveRedundantLimitRule;
pub use remove_trivial_filters::RemoveTrivialFiltersRule;

use optx_core::rule::RuleSet;
use std::sync::Arc;

/// The standard rule set, in the order rules are tried on each node.
///
/// Simplifications come first so that later rules see the smallest plan. Join
/// commutativity goes last because it needs statistics of settled inputs.
pub fn default_rule_set() -> RuleSet {
    RuleSet::new("default")
        .with_rule(Arc::new(RemoveTrivialFiltersRule))
        .with_rule(Arc::new(MergeFiltersRule))
        .with_rule(Arc::new(PredicatePushdownRule))
        .with_rule(Arc::new(ProjectionPushdownRule))
        .with_rule(Arc::new(RemoveRedundantIdentityProjectionsRule))
        .with_rule(Arc::new(PushLimitThroughProjectRule))
        .with_rule(Arc::new(MergeLimitsRule))
        .with_rule(Arc::new(EvaluateZeroLimitRule))
        .with_rule(Arc::new(RemoveRedundantLimitRule))
        .with_rule(Arc::new(RemoveRedundantDistinctRule))
        .with_rule(Arc::new(JoinCommutativityRule))
}
