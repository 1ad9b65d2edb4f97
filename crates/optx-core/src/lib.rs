//! # optx-core: Iterative Plan Rewriting Core
//!
//! This crate implements the rule-driven rewriting core of the query optimizer: given a
//! logical plan, it applies pattern-matching rules until none of them changes the plan,
//! while keeping statistics, costs and logical properties of every subtree at hand.
//!
//! ## Module Overview
//!
//! - **`plan`**: Immutable plan nodes, operator payloads and group references.
//! - **`expr`**: Scalar expressions, variables and data types.
//! - **`memo`**: Groups of interchangeable subtrees with in-place replacement, reference
//!   counting and per-group caches.
//! - **`lookup`**: Resolution of group references to their current node.
//! - **`pattern`**: Declarative patterns with named captures and their matcher.
//! - **`stats`** / **`cost`**: Estimators and the identity-keyed caching providers rules
//!   read them through.
//! - **`properties`**: Logical properties (keys, cardinality bounds, equivalences).
//! - **`rule`**: The rule contract, the per-application context and rule sets.
//! - **`optimizer`**: The fixpoint driver with its time and iteration budget.
//! - **`session`** / **`config`**: Per-query properties and optimizer defaults.
//! - **`catalog`**: Table metadata, statistics and unique keys.
//! - **`transaction`**: Transaction-scoped execution of planning work.
//! - **`builder`** / **`printer`**: Plan construction and text rendering.
//! - **`testing`**: The single-rule harness (`cfg(test)` or the `testing` feature).

pub mod allocator;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod error;
pub mod expr;
pub mod lookup;
pub mod memo;
pub mod optimizer;
pub mod pattern;
pub mod plan;
pub mod printer;
pub mod properties;
pub mod rule;
pub mod session;
pub mod stats;
pub mod transaction;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{OptimizerError, OptimizerResult};
