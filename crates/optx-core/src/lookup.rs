//! Group reference resolution.
//!
//! A `Lookup` sees through one level of memo indirection: concrete nodes come back
//! unchanged, group references come back as the group's current representative.
//! It carries no state of its own, so tests can build one from a memo, from a closure,
//! or with no resolution at all for plans that never contain references.

use crate::error::{OptimizerError, OptimizerResult};
use crate::memo::Memo;
use crate::plan::{GroupReference, PlanNodeRef, PlanRef};

type Resolver<'a> = Box<dyn Fn(&GroupReference) -> OptimizerResult<PlanNodeRef> + 'a>;

pub struct Lookup<'a> {
    resolver: Resolver<'a>,
}

impl<'a> Lookup<'a> {
    pub fn from_memo(memo: &'a Memo) -> Self {
        Self {
            resolver: Box::new(move |reference| memo.resolve(reference)),
        }
    }

    pub fn from_fn<F>(resolver: F) -> Self
    where
        F: Fn(&GroupReference) -> OptimizerResult<PlanNodeRef> + 'a,
    {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// A lookup for plans without group references. Resolving one is an error.
    pub fn no_lookup() -> Self {
        Self::from_fn(|reference| {
            Err(OptimizerError::invalid_plan(format!(
                "unexpected reference to group {} outside of a memo",
                reference.group
            )))
        })
    }

    pub fn resolve(&self, node: &PlanRef) -> OptimizerResult<PlanNodeRef> {
        match node {
            PlanRef::Node(node) => Ok(node.clone()),
            PlanRef::Group(reference) => (self.resolver)(reference),
        }
    }

    pub fn resolve_group(&self, reference: &GroupReference) -> OptimizerResult<PlanNodeRef> {
        (self.resolver)(reference)
    }
}
