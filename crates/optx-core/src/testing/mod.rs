//! # Single-Rule Test Harness
//!
//! Tools for testing one rule in isolation, without the fixpoint driver.
//!
//! ```ignore
//! let tester = RuleTester::default();
//! tester
//!     .assert_that(RemoveTrivialFiltersRule)
//!     .on(|b| {
//!         let a = b.variable("a", DataType::Bigint);
//!         let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);
//!         b.filter(Expr::literal_true(), scan)
//!     })
//!     .matches(&Pattern::table_scan());
//! ```
//!
//! The harness builds the plan, wraps it in a one-shot memo, matches the rule against
//! the root exactly once and checks the rule's contract: a fired rule must return a new
//! node and preserve the set of output variables. Contract violations and assertion
//! failures panic with the input plan printed alongside its estimates.
//!
//! Available under `cfg(test)` and with the `testing` feature.

mod rule_tester;
mod stats;

pub use rule_tester::{RuleApplication, RuleAssert, RuleTester};
pub use stats::TestingStatsCalculator;
