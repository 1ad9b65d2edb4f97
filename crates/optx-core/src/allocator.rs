//! Fresh plan node ids and variable names.
//!
//! Both allocators are shared by reference with every rule invocation of a pass, so
//! they hand out values through `&self`.

use crate::expr::{DataType, Variable};
use crate::plan::PlanNodeId;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mints numeric plan node ids. Safe to share across threads.
#[derive(Debug, Default)]
pub struct PlanNodeIdAllocator {
    next_id: AtomicU64,
}

impl PlanNodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering after `first - 1`. Useful when ids below `first` are taken.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first),
        }
    }

    pub fn get_next_id(&self) -> PlanNodeId {
        PlanNodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed).to_string())
    }
}

/// Mints variables whose names collide with no live variable.
///
/// Seeded with every variable of the input plan; each allocation is recorded so that
/// later allocations in the same pass avoid it too.
#[derive(Debug, Default)]
pub struct VariableAllocator {
    used: RefCell<BTreeSet<String>>,
    next_id: Cell<u64>,
}

impl VariableAllocator {
    pub fn new<I>(live: I) -> Self
    where
        I: IntoIterator<Item = Variable>,
    {
        Self {
            used: RefCell::new(live.into_iter().map(|v| v.name).collect()),
            next_id: Cell::new(0),
        }
    }

    /// A fresh variable named `hint_N`. A trailing `_N` already on the hint is dropped
    /// so repeated derivations do not grow the name.
    pub fn new_variable(&self, hint: &str, data_type: DataType) -> Variable {
        let base = match hint.rsplit_once('_') {
            Some((prefix, suffix))
                if !prefix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) =>
            {
                prefix
            }
            _ => hint,
        };
        let base = if base.is_empty() { "expr" } else { base };
        let mut used = self.used.borrow_mut();
        loop {
            let n = self.next_id.get();
            self.next_id.set(n + 1);
            let candidate = format!("{base}_{n}");
            if used.insert(candidate.clone()) {
                return Variable::new(candidate, data_type);
            }
        }
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.borrow().contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let alloc = PlanNodeIdAllocator::new();
        let a = alloc.get_next_id();
        let b = alloc.get_next_id();
        assert_ne!(a, b);
        assert_eq!(PlanNodeIdAllocator::starting_at(10).get_next_id().as_str(), "10");
    }

    #[test]
    fn test_variables_avoid_live_names() {
        let alloc = VariableAllocator::new(vec![
            Variable::new("expr_0", DataType::Bigint),
            Variable::new("expr_1", DataType::Bigint),
        ]);
        let v = alloc.new_variable("expr", DataType::Double);
        assert_eq!(v.name, "expr_2");
        assert_eq!(v.data_type, DataType::Double);
        assert!(alloc.is_used("expr_2"));
    }

    #[test]
    fn test_numeric_suffix_is_stripped() {
        let alloc = VariableAllocator::new(Vec::new());
        assert_eq!(alloc.new_variable("total_7", DataType::Bigint).name, "total_0");
        assert_eq!(alloc.new_variable("total_0", DataType::Bigint).name, "total_1");
    }
}
