//! # Memo
//!
//! The memo stores the plan being optimized as a set of *groups*. Each group holds
//! exactly one representative node whose sources are `GroupReference`s to other
//! groups. Replacing a group's representative rewrites that subtree position in O(1):
//! every ancestor keeps pointing at the same group id and sees the new node on its
//! next resolve.
//!
//! ```text
//!   plan                        memo
//!   Filter                      G1: Filter  -> [G2]
//!     Join                      G2: Join    -> [G3, G4]
//!       Scan(a)                 G3: Scan(a)
//!       Scan(b)                 G4: Scan(b)
//! ```
//!
//! ## Reference Counting
//!
//! Every group records which groups reference it (a multiset of parent group ids).
//! `replace` first adds the references of the new representative and only then drops
//! the references of the old one, so subtrees shared by both survive. A group whose
//! last incoming reference disappears is deleted together with everything only it
//! referenced; resolving it afterwards fails with `UnknownGroup`.
//!
//! ## No Structural Deduplication
//!
//! Every insertion allocates fresh groups, even for a subtree structurally equal to
//! one already in the memo. Fixpoint detection relies on node identity, and sharing
//! groups between equal subtrees would let a rewrite in one position silently affect
//! another.
//!
//! ## Per-Group Caches
//!
//! Statistics, cost and logical properties are cached on the group. Any `replace`
//! evicts the caches of the replaced group and of all its ancestors, since their
//! values were derived from the old subtree.

use crate::cost::CostEstimate;
use crate::error::{OptimizerError, OptimizerResult};
use crate::plan::{GroupReference, PlanNode, PlanNodeRef, PlanRef};
use crate::properties::{LogicalProperties, LogicalPropertiesProvider};
use crate::stats::StatsEstimate;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Index of a group in the memo. Never reused within one memo.
pub type GroupId = u32;

/// An equivalence class with a single current representative.
#[derive(Debug)]
pub struct Group {
    membership: PlanNodeRef,
    /// Parent group -> number of references from that parent's representative.
    incoming_references: HashMap<GroupId, usize>,
    stats: RefCell<Option<StatsEstimate>>,
    cost: RefCell<Option<CostEstimate>>,
    logical_properties: RefCell<Option<LogicalProperties>>,
}

impl Group {
    fn with_member(membership: PlanNodeRef) -> Self {
        Self {
            membership,
            incoming_references: HashMap::new(),
            stats: RefCell::new(None),
            cost: RefCell::new(None),
            logical_properties: RefCell::new(None),
        }
    }

    pub fn membership(&self) -> &PlanNodeRef {
        &self.membership
    }

    fn add_reference(&mut self, from: GroupId) {
        *self.incoming_references.entry(from).or_insert(0) += 1;
    }

    fn remove_reference(&mut self, from: GroupId) {
        if let Some(count) = self.incoming_references.get_mut(&from) {
            *count -= 1;
            if *count == 0 {
                self.incoming_references.remove(&from);
            }
        }
    }

    fn evict(&self) {
        self.stats.replace(None);
        self.cost.replace(None);
        self.logical_properties.replace(None);
    }
}

/// The memo of one optimization pass.
pub struct Memo {
    groups: HashMap<GroupId, Group>,
    root_group: GroupId,
    next_group_id: GroupId,
    logical_properties_provider: Option<Arc<dyn LogicalPropertiesProvider>>,
}

impl std::fmt::Debug for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("root_group", &self.root_group)
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Memo {
    /// Build a memo from a plan. Every node of the plan gets its own group.
    pub fn new(
        plan: PlanRef,
        logical_properties_provider: Option<Arc<dyn LogicalPropertiesProvider>>,
    ) -> OptimizerResult<Self> {
        let mut memo = Self {
            groups: HashMap::new(),
            root_group: 0,
            next_group_id: 1,
            logical_properties_provider,
        };
        memo.root_group = memo.insert(plan)?;
        debug!(
            "Initialized memo: root_group={}, groups={}",
            memo.root_group,
            memo.groups.len()
        );
        Ok(memo)
    }

    pub fn root_group(&self) -> GroupId {
        self.root_group
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.contains_key(&group)
    }

    pub fn has_logical_properties_provider(&self) -> bool {
        self.logical_properties_provider.is_some()
    }

    fn group(&self, group: GroupId) -> OptimizerResult<&Group> {
        self.groups
            .get(&group)
            .ok_or(OptimizerError::UnknownGroup(group))
    }

    fn group_mut(&mut self, group: GroupId) -> OptimizerResult<&mut Group> {
        self.groups
            .get_mut(&group)
            .ok_or(OptimizerError::UnknownGroup(group))
    }

    /// Current representative of `group`. Its sources are group references.
    pub fn node(&self, group: GroupId) -> OptimizerResult<PlanNodeRef> {
        Ok(self.group(group)?.membership.clone())
    }

    pub fn resolve(&self, reference: &GroupReference) -> OptimizerResult<PlanNodeRef> {
        self.node(reference.group)
    }

    /// Total number of incoming references of `group`.
    pub fn reference_count(&self, group: GroupId) -> OptimizerResult<usize> {
        Ok(self.group(group)?.incoming_references.values().sum())
    }

    /// A group reference to `group` carrying its current outputs.
    pub fn reference_to(&self, group: GroupId) -> OptimizerResult<GroupReference> {
        Ok(GroupReference {
            group,
            outputs: self.node(group)?.output_variables(),
        })
    }

    /// Insert a plan, allocating a fresh group for every concrete node.
    ///
    /// A group reference is not re-inserted; its group must exist.
    pub fn insert(&mut self, plan: PlanRef) -> OptimizerResult<GroupId> {
        match plan {
            PlanRef::Group(reference) => {
                self.group(reference.group)?;
                Ok(reference.group)
            }
            PlanRef::Node(node) => {
                node.validate()?;
                let rewritten = self.insert_children_and_rewrite(&node)?;
                let group = self.next_group_id;
                self.next_group_id += 1;
                self.groups.insert(group, Group::with_member(rewritten.clone()));
                self.increment_reference_counts(&rewritten, group)?;
                trace!("Inserted {} node {} into group {}", node.kind(), node.id, group);
                Ok(group)
            }
        }
    }

    fn insert_children_and_rewrite(&mut self, node: &PlanNode) -> OptimizerResult<PlanNodeRef> {
        let mut sources = Vec::with_capacity(node.sources.len());
        for source in &node.sources {
            let outputs = source.output_variables();
            let group = self.insert(source.clone())?;
            sources.push(PlanRef::Group(GroupReference { group, outputs }));
        }
        Ok(Arc::new(node.replace_sources(sources)))
    }

    /// Install `node` as the representative of `group`.
    ///
    /// The new node must produce the same set of output variables. A group reference
    /// installs that group's current representative. Returns the node now stored.
    pub fn replace(
        &mut self,
        group: GroupId,
        node: PlanRef,
        reason: &str,
    ) -> OptimizerResult<PlanNodeRef> {
        let old = self.node(group)?;

        let old_outputs = old.output_set();
        let new_outputs: HashSet<_> = node.output_variables().into_iter().collect();
        if old_outputs != new_outputs {
            return Err(OptimizerError::SchemaMismatch {
                reason: reason.to_string(),
                expected: old.output_variables(),
                actual: node.output_variables(),
            });
        }

        let node = match node {
            PlanRef::Group(reference) => self.node(reference.group)?,
            PlanRef::Node(node) => {
                node.validate()?;
                self.insert_children_and_rewrite(&node)?
            }
        };

        self.increment_reference_counts(&node, group)?;
        self.group_mut(group)?.membership = node.clone();
        self.decrement_reference_counts(&old, group)?;
        self.evict_caches(group)?;

        debug!(
            "Replaced group {} ({} -> {}) by {}",
            group,
            old.kind(),
            node.kind(),
            reason
        );
        Ok(node)
    }

    fn increment_reference_counts(
        &mut self,
        from_node: &PlanNode,
        from_group: GroupId,
    ) -> OptimizerResult<()> {
        for source in &from_node.sources {
            if let PlanRef::Group(reference) = source {
                self.group_mut(reference.group)?.add_reference(from_group);
            }
        }
        Ok(())
    }

    fn decrement_reference_counts(
        &mut self,
        from_node: &PlanNode,
        from_group: GroupId,
    ) -> OptimizerResult<()> {
        let root = self.root_group;
        for source in &from_node.sources {
            if let PlanRef::Group(reference) = source {
                let child = self.group_mut(reference.group)?;
                child.remove_reference(from_group);
                let orphaned = child.incoming_references.is_empty();
                if orphaned && reference.group != root {
                    self.delete_group(reference.group)?;
                }
            }
        }
        Ok(())
    }

    fn delete_group(&mut self, group: GroupId) -> OptimizerResult<()> {
        let removed = self
            .groups
            .remove(&group)
            .ok_or(OptimizerError::UnknownGroup(group))?;
        trace!("Deleted unreferenced group {}", group);
        self.decrement_reference_counts(&removed.membership, group)
    }

    /// Clear the caches of `group` and every ancestor.
    fn evict_caches(&self, group: GroupId) -> OptimizerResult<()> {
        let mut pending = vec![group];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            let g = self.group(current)?;
            g.evict();
            pending.extend(g.incoming_references.keys().copied());
        }
        Ok(())
    }

    /// Rebuild the plan rooted at the root group without group references.
    pub fn extract(&self) -> OptimizerResult<PlanNodeRef> {
        self.extract_group(self.root_group)
    }

    pub fn extract_group(&self, group: GroupId) -> OptimizerResult<PlanNodeRef> {
        let node = self.node(group)?;
        let mut sources = Vec::with_capacity(node.sources.len());
        for source in &node.sources {
            let extracted = match source {
                PlanRef::Group(reference) => self.extract_group(reference.group)?,
                PlanRef::Node(child) => child.clone(),
            };
            sources.push(PlanRef::Node(extracted));
        }
        Ok(Arc::new(node.replace_sources(sources)))
    }

    pub fn stats(&self, group: GroupId) -> OptimizerResult<Option<StatsEstimate>> {
        Ok(self.group(group)?.stats.borrow().clone())
    }

    pub fn store_stats(&self, group: GroupId, stats: StatsEstimate) -> OptimizerResult<()> {
        self.group(group)?.stats.replace(Some(stats));
        Ok(())
    }

    pub fn cost(&self, group: GroupId) -> OptimizerResult<Option<CostEstimate>> {
        Ok(self.group(group)?.cost.borrow().clone())
    }

    pub fn store_cost(&self, group: GroupId, cost: CostEstimate) -> OptimizerResult<()> {
        self.group(group)?.cost.replace(Some(cost));
        Ok(())
    }

    /// Logical properties of `group`, derived bottom-up on first request and cached
    /// until the group or one of its descendants is replaced. `None` when the memo was
    /// built without a provider.
    pub fn logical_properties(
        &self,
        group: GroupId,
    ) -> OptimizerResult<Option<LogicalProperties>> {
        let Some(provider) = &self.logical_properties_provider else {
            return Ok(None);
        };
        let g = self.group(group)?;
        if let Some(cached) = g.logical_properties.borrow().as_ref() {
            return Ok(Some(cached.clone()));
        }

        let mut source_properties = Vec::with_capacity(g.membership.sources.len());
        for source in &g.membership.sources {
            let properties = match source {
                PlanRef::Group(reference) => self.logical_properties(reference.group)?,
                PlanRef::Node(_) => None,
            };
            let properties = properties.ok_or_else(|| {
                OptimizerError::invalid_plan(format!(
                    "group {group} has a source without logical properties"
                ))
            })?;
            source_properties.push(properties);
        }

        let derived = provider.derive(&g.membership, &source_properties)?;
        g.logical_properties.replace(Some(derived.clone()));
        Ok(Some(derived))
    }
}
