//! Flat records to directory trees.
//!
//! Records are kept in an arena keyed by inode together with a parent to
//! children index; trees are only materialised at the end.

use prov_core::{FileOp, FileState, InodeId, ProvResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A record that knows its place in the directory tree.
pub trait TreeRecord: Clone {
    fn inode_id(&self) -> InodeId;
    fn parent_inode_id(&self) -> InodeId;
    fn project_inode_id(&self) -> InodeId;
    fn name(&self) -> &str;

    /// The project root directory describes itself as its own project.
    fn is_project(&self) -> bool {
        self.inode_id() == self.project_inode_id()
    }
}

impl TreeRecord for FileState {
    fn inode_id(&self) -> InodeId {
        self.inode_id
    }

    fn parent_inode_id(&self) -> InodeId {
        self.parent_inode_id
    }

    fn project_inode_id(&self) -> InodeId {
        self.project_inode_id
    }

    fn name(&self) -> &str {
        &self.inode_name
    }
}

impl TreeRecord for FileOp {
    fn inode_id(&self) -> InodeId {
        self.inode_id
    }

    fn parent_inode_id(&self) -> InodeId {
        self.parent_inode_id
    }

    fn project_inode_id(&self) -> InodeId {
        self.project_inode_id
    }

    fn name(&self) -> &str {
        &self.inode_name
    }
}

/// Batch lookup of records by inode, used to climb towards the project root.
pub trait AncestorSource<R> {
    /// Records for as many of `inode_ids` as exist. Missing ids are omitted.
    fn fetch(&self, inode_ids: &BTreeSet<InodeId>) -> ProvResult<Vec<R>>;
}

/// One directory tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode<R> {
    pub inode_id: InodeId,
    pub name: Option<String>,
    pub payload: Option<R>,
    pub is_project: bool,
    pub children: BTreeMap<InodeId, TreeNode<R>>,
}

impl<R: TreeRecord> TreeNode<R> {
    pub fn leaf(record: R) -> Self {
        Self {
            inode_id: record.inode_id(),
            name: Some(record.name().to_string()),
            is_project: record.is_project(),
            payload: Some(record),
            children: BTreeMap::new(),
        }
    }

    /// Merge a node with the same id into this one.
    ///
    /// Payload and name keep the first value written; children are unioned
    /// and colliding children merged recursively.
    pub fn merge(&mut self, other: TreeNode<R>) {
        if self.payload.is_none() {
            self.payload = other.payload;
        }
        if self.name.is_none() {
            self.name = other.name;
        }
        self.is_project |= other.is_project;
        for (id, child) in other.children {
            match self.children.get_mut(&id) {
                Some(existing) => existing.merge(child),
                None => {
                    self.children.insert(id, child);
                }
            }
        }
    }

    /// Number of nodes in this subtree, itself included.
    pub fn size(&self) -> usize {
        1 + self.children.values().map(TreeNode::size).sum::<usize>()
    }
}

/// Rooted trees (`complete`) and trees whose ancestry could not be resolved
/// (`incomplete`), keyed by their top node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeResult<R> {
    pub complete: BTreeMap<InodeId, TreeNode<R>>,
    pub incomplete: BTreeMap<InodeId, TreeNode<R>>,
}

impl<R> Default for TreeResult<R> {
    fn default() -> Self {
        Self {
            complete: BTreeMap::new(),
            incomplete: BTreeMap::new(),
        }
    }
}

impl<R> TreeResult<R> {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

// ============================================================================
// ARENA
// ============================================================================

struct Arena<R> {
    records: BTreeMap<InodeId, R>,
    children: BTreeMap<InodeId, BTreeSet<InodeId>>,
}

impl<R: TreeRecord> Arena<R> {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// First record per inode wins.
    fn insert(&mut self, record: R) {
        let id = record.inode_id();
        if self.records.contains_key(&id) {
            return;
        }
        if !record.is_project() {
            self.children
                .entry(record.parent_inode_id())
                .or_default()
                .insert(id);
        }
        self.records.insert(id, record);
    }

    /// Parents referenced but not resolved yet.
    fn missing_parents(&self) -> BTreeSet<InodeId> {
        self.records
            .values()
            .filter(|r| !r.is_project() && !self.records.contains_key(&r.parent_inode_id()))
            .map(TreeRecord::parent_inode_id)
            .collect()
    }

    fn build(&self, id: InodeId, visited: &mut BTreeSet<InodeId>) -> Option<TreeNode<R>> {
        if !visited.insert(id) {
            return None;
        }
        let mut node = TreeNode::leaf(self.records.get(&id)?.clone());
        if let Some(children) = self.children.get(&id) {
            for child in children {
                if let Some(child_node) = self.build(*child, visited) {
                    node.children.insert(*child, child_node);
                }
            }
        }
        Some(node)
    }

    fn into_result(self) -> TreeResult<R> {
        let mut result = TreeResult::default();
        let mut visited = BTreeSet::new();
        let tops: Vec<(InodeId, bool)> = self
            .records
            .values()
            .filter(|r| r.is_project() || !self.records.contains_key(&r.parent_inode_id()))
            .map(|r| (r.inode_id(), r.is_project()))
            .collect();
        for (id, rooted) in tops {
            if let Some(node) = self.build(id, &mut visited) {
                let target = if rooted {
                    &mut result.complete
                } else {
                    &mut result.incomplete
                };
                insert_merged(target, node);
            }
        }
        // parent cycles have no top node
        let unreached: Vec<InodeId> = self
            .records
            .keys()
            .filter(|id| !visited.contains(*id))
            .copied()
            .collect();
        for id in unreached {
            if let Some(node) = self.build(id, &mut visited) {
                insert_merged(&mut result.incomplete, node);
            }
        }
        result
    }
}

fn insert_merged<R: TreeRecord>(target: &mut BTreeMap<InodeId, TreeNode<R>>, node: TreeNode<R>) {
    match target.get_mut(&node.inode_id) {
        Some(existing) => existing.merge(node),
        None => {
            target.insert(node.inode_id, node);
        }
    }
}

// ============================================================================
// RECONSTRUCTION
// ============================================================================

/// Trees from the given records only; nothing is fetched.
pub fn min_tree<R: TreeRecord>(records: impl IntoIterator<Item = R>) -> TreeResult<R> {
    let mut arena = Arena::new();
    for record in records {
        arena.insert(record);
    }
    arena.into_result()
}

/// Trees rooted at the project, fetching missing ancestors in batches.
///
/// Each round fetches every missing parent at once. Parents the source does
/// not know are not asked for again; once `max_rounds` is spent the chains
/// still open are returned as incomplete.
pub fn full_tree<R: TreeRecord>(
    records: impl IntoIterator<Item = R>,
    source: &dyn AncestorSource<R>,
    max_rounds: usize,
) -> ProvResult<TreeResult<R>> {
    let mut arena = Arena::new();
    for record in records {
        arena.insert(record);
    }
    let mut requested = BTreeSet::new();
    let mut rounds = 0;
    loop {
        let missing: BTreeSet<InodeId> = arena
            .missing_parents()
            .into_iter()
            .filter(|id| !requested.contains(id))
            .collect();
        if missing.is_empty() {
            break;
        }
        if rounds == max_rounds {
            tracing::warn!(
                rounds,
                missing = missing.len(),
                "Tree reconstruction stopped at round limit"
            );
            break;
        }
        rounds += 1;
        for record in source.fetch(&missing)? {
            arena.insert(record);
        }
        requested.extend(missing);
    }
    tracing::debug!(rounds, nodes = arena.records.len(), "Tree reconstruction finished");
    Ok(arena.into_result())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        id: InodeId,
        parent: InodeId,
        project: InodeId,
        name: String,
    }

    impl TreeRecord for Rec {
        fn inode_id(&self) -> InodeId {
            self.id
        }
        fn parent_inode_id(&self) -> InodeId {
            self.parent
        }
        fn project_inode_id(&self) -> InodeId {
            self.project
        }
        fn name(&self) -> &str {
            &self.name
        }
    }

    fn rec(id: InodeId, parent: InodeId) -> Rec {
        Rec {
            id,
            parent,
            project: 1,
            name: format!("n{}", id),
        }
    }

    struct Store(BTreeMap<InodeId, Rec>);

    impl AncestorSource<Rec> for Store {
        fn fetch(&self, inode_ids: &BTreeSet<InodeId>) -> ProvResult<Vec<Rec>> {
            Ok(inode_ids.iter().filter_map(|id| self.0.get(id).cloned()).collect())
        }
    }

    fn chain(depth: i64) -> Store {
        // 1 is the project, 2..=depth hang below each other
        let mut map = BTreeMap::new();
        map.insert(1, rec(1, 0));
        for id in 2..=depth {
            map.insert(id, rec(id, id - 1));
        }
        Store(map)
    }

    #[test]
    fn test_min_tree_single_project_node() {
        let result = min_tree(vec![rec(1, 0)]);
        assert_eq!(result.complete.len(), 1);
        let root = &result.complete[&1];
        assert!(root.is_project);
        assert!(root.children.is_empty());
        assert!(result.incomplete.is_empty());
    }

    #[test]
    fn test_min_tree_keeps_dangling_nodes_as_is() {
        let result = min_tree(vec![rec(5, 4), rec(6, 5), rec(9, 8)]);
        assert!(result.complete.is_empty());
        assert_eq!(result.incomplete.keys().copied().collect::<Vec<_>>(), vec![5, 9]);
        assert!(result.incomplete[&5].children.contains_key(&6));
    }

    #[test]
    fn test_full_tree_resolves_chain() {
        let store = chain(6);
        let result = full_tree(vec![rec(6, 5)], &store, 100).unwrap();
        assert!(result.is_complete());
        let root = &result.complete[&1];
        assert_eq!(root.size(), 6);
    }

    #[test]
    fn test_full_tree_dangling_parent_is_incomplete() {
        let store = chain(3);
        let result = full_tree(vec![rec(3, 2), rec(42, 41)], &store, 100).unwrap();
        assert_eq!(result.complete.len(), 1);
        assert_eq!(result.incomplete.keys().copied().collect::<Vec<_>>(), vec![42]);
    }

    #[test]
    fn test_full_tree_respects_round_cap() {
        let store = chain(10);
        let result = full_tree(vec![rec(10, 9)], &store, 3).unwrap();
        assert!(result.complete.is_empty());
        // 10 plus three fetched ancestors: 9, 8, 7
        assert_eq!(result.incomplete[&7].size(), 4);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let result = min_tree(vec![rec(2, 3), rec(3, 2)]);
        assert!(result.complete.is_empty());
        assert_eq!(result.incomplete.len(), 1);
        assert_eq!(result.incomplete.values().next().map(TreeNode::size), Some(2));
    }

    #[test]
    fn test_first_record_wins() {
        let mut renamed = rec(2, 1);
        renamed.name = "other".to_string();
        let result = min_tree(vec![rec(1, 0), rec(2, 1), renamed]);
        let child = &result.complete[&1].children[&2];
        assert_eq!(child.name.as_deref(), Some("n2"));
    }

    fn arb_node(depth: u32) -> BoxedStrategy<TreeNode<Rec>> {
        let leaf = (1i64..6).prop_map(|id| TreeNode::leaf(rec(id, 0)));
        leaf.prop_recursive(depth, 16, 4, |inner| {
            ((1i64..6), proptest::collection::vec(inner, 0..4)).prop_map(|(id, kids)| {
                let mut node = TreeNode::leaf(rec(id, 0));
                for kid in kids {
                    insert_merged(&mut node.children, kid);
                }
                node
            })
        })
        .boxed()
    }

    fn child_ids<R>(node: &TreeNode<R>) -> BTreeSet<Vec<InodeId>> {
        fn walk<R>(node: &TreeNode<R>, path: &mut Vec<InodeId>, out: &mut BTreeSet<Vec<InodeId>>) {
            for (id, child) in &node.children {
                path.push(*id);
                out.insert(path.clone());
                walk(child, path, out);
                path.pop();
            }
        }
        let mut out = BTreeSet::new();
        walk(node, &mut Vec::new(), &mut out);
        out
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_merge_is_idempotent_and_commutative(a in arb_node(3), b in arb_node(3)) {
            let mut a = a;
            let mut b = b;
            a.inode_id = 0;
            b.inode_id = 0;

            let mut ab = a.clone();
            ab.merge(b.clone());
            let mut ba = b.clone();
            ba.merge(a.clone());
            prop_assert_eq!(child_ids(&ab), child_ids(&ba));

            let mut twice = ab.clone();
            twice.merge(b.clone());
            prop_assert_eq!(child_ids(&twice), child_ids(&ab));
        }

        #[test]
        fn prop_full_tree_terminates_within_depth(depth in 1i64..30) {
            let store = chain(depth);
            let leaf = store.0[&depth].clone();
            let result = full_tree(vec![leaf], &store, depth as usize).unwrap();
            prop_assert!(result.is_complete());
            prop_assert_eq!(result.complete[&1].size(), depth as usize);
        }
    }
}
