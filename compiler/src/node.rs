// node.rs — AST nodes and the owning arena
//
// All nodes of a compile job live in one `AstContext` arena and are
// addressed by `NodeId`. Identities are assigned monotonically and never
// reused; a replaced subtree is retired (its ids become invalid for
// lookups) but its memory stays until the context is dropped so that
// diagnostic references remain stable.
//
// Tree discipline: parent-to-child is owning, child-to-parent is a weak
// back-pointer, and sibling references are `DeclIndex` handles into the
// context. Attaching a node that already has a parent deep-copies it
// first, so the child graph is always a tree.
//
// Preconditions: callers pass ids of this context; foreign ids are a logic
//   error caught by index panics in debug builds.
// Postconditions: for every non-null child c of node n, parent(c) == n.
// Failure modes: none beyond internal assertions.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{DeclData, NodeKind};
use crate::grammar::Grammar;
use crate::meta::Meta;
use crate::scope::Scope;

// ── Identities ───────────────────────────────────────────────────────────

/// Stable identity of a node within its context. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Weak sibling handle: an opaque key resolving to a declaration node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclIndex(pub u32);

// ── Node ─────────────────────────────────────────────────────────────────

/// An error attached to a node during a pass; collected by the driver at
/// stage boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeError {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub(crate) children: Vec<Option<NodeId>>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) scope: Option<Scope>,
    /// When false, scope lookup skips from here to the enclosing module.
    pub(crate) inherit_scope: bool,
    pub meta: Meta,
    pub(crate) errors: Vec<NodeError>,
    pub(crate) retired: bool,
}

// ── Context ──────────────────────────────────────────────────────────────

/// The arena owning every node of one compile job.
#[derive(Default)]
pub struct AstContext {
    nodes: Vec<Node>,
    decls: Vec<NodeId>,
    decl_index_of: HashMap<NodeId, DeclIndex>,
    module_cache: HashMap<(String, String), NodeId>,
    unifications: HashMap<NodeId, String>,
    name_resolutions: HashMap<NodeId, DeclIndex>,
    /// Grammars built per unit during the Spicy transform, consumed by the
    /// code generator. Keyed on the unit's canonical ID.
    pub grammars: HashMap<String, Grammar>,
}

impl AstContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Allocation ───────────────────────────────────────────────────

    /// Allocate a node with the given children. Children that already have
    /// a parent are deep-copied first (tree invariant).
    pub fn make(&mut self, kind: NodeKind, children: Vec<Option<NodeId>>, meta: Meta) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            children: Vec::new(),
            parent: None,
            scope: None,
            inherit_scope: true,
            meta,
            errors: Vec::new(),
            retired: false,
        });
        for child in children {
            self.append_child(id, child);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All live (non-retired) node ids.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|id| !self.nodes[id.index()].retired)
            .collect()
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.index()].kind
    }

    pub fn meta(&self, id: NodeId) -> &Meta {
        &self.nodes[id.index()].meta
    }

    pub fn set_meta(&mut self, id: NodeId, meta: Meta) {
        self.nodes[id.index()].meta = meta;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> Vec<Option<NodeId>> {
        self.nodes[id.index()].children.clone()
    }

    pub fn child(&self, id: NodeId, slot: usize) -> Option<NodeId> {
        self.nodes[id.index()].children.get(slot).copied().flatten()
    }

    pub fn num_children(&self, id: NodeId) -> usize {
        self.nodes[id.index()].children.len()
    }

    pub fn is_retired(&self, id: NodeId) -> bool {
        self.nodes[id.index()].retired
    }

    /// Convenience: declaration payload of a `Decl` node.
    pub fn decl(&self, id: NodeId) -> Option<&DeclData> {
        match self.kind(id) {
            NodeKind::Decl(data) => Some(data),
            _ => None,
        }
    }

    pub fn decl_mut(&mut self, id: NodeId) -> Option<&mut DeclData> {
        match self.kind_mut(id) {
            NodeKind::Decl(data) => Some(data),
            _ => None,
        }
    }

    // ── Tree editing ─────────────────────────────────────────────────

    /// Append a child slot (possibly null). Returns the slot index.
    pub fn append_child(&mut self, parent: NodeId, child: Option<NodeId>) -> usize {
        let child = child.map(|c| self.adopt(c, parent));
        let node = &mut self.nodes[parent.index()];
        node.children.push(child);
        node.children.len() - 1
    }

    /// Replace a child slot. The old subtree, if any, is released.
    pub fn set_child(&mut self, parent: NodeId, slot: usize, child: Option<NodeId>) {
        if let Some(old) = self.nodes[parent.index()].children.get(slot).copied().flatten() {
            self.release(old);
        }
        let child = child.map(|c| self.adopt(c, parent));
        let node = &mut self.nodes[parent.index()];
        if slot >= node.children.len() {
            node.children.resize(slot + 1, None);
        }
        node.children[slot] = child;
    }

    fn adopt(&mut self, child: NodeId, parent: NodeId) -> NodeId {
        let child = if self.nodes[child.index()].parent.is_some() {
            self.deepcopy(child)
        } else {
            child
        };
        self.nodes[child.index()].parent = Some(parent);
        child
    }

    /// Detach and retire a subtree. The parent pointer is cleared and all
    /// ids in the subtree become invalid for future lookups.
    pub fn release(&mut self, id: NodeId) {
        self.nodes[id.index()].parent = None;
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            self.nodes[n.index()].retired = true;
            for child in self.nodes[n.index()].children.clone().into_iter().flatten() {
                stack.push(child);
            }
        }
    }

    /// Replace `dst` in place with the content of the unparented node
    /// `src`: kind and children move over, `dst`'s old children are
    /// released, and `src` itself is retired. Used by the resolver to
    /// rewrite expressions without touching their slot in the parent.
    pub fn graft(&mut self, dst: NodeId, src: NodeId) {
        for c in self.nodes[dst.index()].children.clone().into_iter().flatten() {
            self.release(c);
        }
        self.nodes[dst.index()].children.clear();
        self.nodes[dst.index()].kind = self.nodes[src.index()].kind.clone();
        let src_children = std::mem::take(&mut self.nodes[src.index()].children);
        for c in src_children {
            if let Some(cid) = c {
                self.nodes[cid.index()].parent = Some(dst);
            }
            self.nodes[dst.index()].children.push(c);
        }
        self.nodes[src.index()].retired = true;
    }

    /// Insert a child at the front of the child list.
    pub fn prepend_child(&mut self, parent: NodeId, child: Option<NodeId>) {
        let child = child.map(|c| self.adopt(c, parent));
        self.nodes[parent.index()].children.insert(0, child);
    }

    /// Clone a subtree into fresh identities. Scopes and errors are not
    /// copied; the copy is unparented.
    pub fn deepcopy(&mut self, id: NodeId) -> NodeId {
        let kind = self.nodes[id.index()].kind.clone();
        let meta = self.nodes[id.index()].meta.clone();
        let children = self.nodes[id.index()].children.clone();
        let copy = self.make(kind, Vec::new(), meta);
        self.nodes[copy.index()].inherit_scope = self.nodes[id.index()].inherit_scope;
        if let Some(u) = self.unifications.get(&id).cloned() {
            self.unifications.insert(copy, u);
        }
        for child in children {
            let child_copy = child.map(|c| self.deepcopy(c));
            self.append_child(copy, child_copy);
        }
        copy
    }

    // ── Scopes ───────────────────────────────────────────────────────

    pub fn scope(&self, id: NodeId) -> Option<&Scope> {
        self.nodes[id.index()].scope.as_ref()
    }

    /// The node's scope, created on first use.
    pub fn scope_mut(&mut self, id: NodeId) -> &mut Scope {
        self.nodes[id.index()].scope.get_or_insert_with(Scope::new)
    }

    pub fn clear_scope(&mut self, id: NodeId) {
        self.nodes[id.index()].scope = None;
    }

    pub fn inherit_scope(&self, id: NodeId) -> bool {
        self.nodes[id.index()].inherit_scope
    }

    pub fn set_inherit_scope(&mut self, id: NodeId, inherit: bool) {
        self.nodes[id.index()].inherit_scope = inherit;
    }

    // ── Declaration indices ──────────────────────────────────────────

    /// Assign (once) the declaration index for a declaration node.
    pub fn register_decl(&mut self, id: NodeId) -> DeclIndex {
        if let Some(&index) = self.decl_index_of.get(&id) {
            return index;
        }
        let index = DeclIndex(self.decls.len() as u32);
        self.decls.push(id);
        self.decl_index_of.insert(id, index);
        index
    }

    /// Resolve a declaration index back to its node.
    pub fn lookup(&self, index: DeclIndex) -> NodeId {
        self.decls[index.0 as usize]
    }

    pub fn decl_index(&self, id: NodeId) -> Option<DeclIndex> {
        self.decl_index_of.get(&id).copied()
    }

    // ── Node errors ──────────────────────────────────────────────────

    pub fn add_error(&mut self, id: NodeId, message: impl Into<String>) {
        self.nodes[id.index()].errors.push(NodeError {
            message: message.into(),
        });
    }

    pub fn errors(&self, id: NodeId) -> &[NodeError] {
        &self.nodes[id.index()].errors
    }

    /// Collect and clear all errors attached anywhere under `root`.
    pub fn drain_errors(&mut self, root: NodeId) -> Vec<(NodeId, NodeError)> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            for e in std::mem::take(&mut self.nodes[n.index()].errors) {
                out.push((n, e));
            }
            for child in self.nodes[n.index()].children.clone().into_iter().flatten() {
                stack.push(child);
            }
        }
        out
    }

    // ── Module cache ─────────────────────────────────────────────────

    /// Cache a parsed module under (canonical id, source extension).
    pub fn cache_module(&mut self, id: &str, extension: &str, module: NodeId) {
        self.module_cache
            .insert((id.to_string(), extension.to_string()), module);
    }

    pub fn cached_module(&self, id: &str, extension: &str) -> Option<NodeId> {
        self.module_cache
            .get(&(id.to_string(), extension.to_string()))
            .copied()
    }

    // ── Unification strings ──────────────────────────────────────────

    pub fn set_unification(&mut self, id: NodeId, unification: String) {
        self.unifications.insert(id, unification);
    }

    pub fn unification(&self, id: NodeId) -> Option<&str> {
        self.unifications.get(&id).map(String::as_str)
    }

    // ── Name-type resolutions ────────────────────────────────────────

    /// Bind an unresolved `Name` type node to its declaration. Kept as a
    /// side table so the node itself stays plain data.
    pub fn set_name_resolution(&mut self, name_node: NodeId, decl: DeclIndex) {
        self.name_resolutions.insert(name_node, decl);
    }

    pub fn name_resolution(&self, name_node: NodeId) -> Option<DeclIndex> {
        self.name_resolutions.get(&name_node).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CtorKind, TypeKind};

    fn ctx_with_leaf() -> (AstContext, NodeId) {
        let mut ctx = AstContext::new();
        let leaf = ctx.make(NodeKind::Type(TypeKind::Bool), vec![], Meta::none());
        (ctx, leaf)
    }

    #[test]
    fn children_get_parent_pointers() {
        let (mut ctx, leaf) = ctx_with_leaf();
        let parent = ctx.make(NodeKind::Root, vec![Some(leaf), None], Meta::none());
        assert_eq!(ctx.parent(leaf), Some(parent));
        assert_eq!(ctx.child(parent, 0), Some(leaf));
        assert_eq!(ctx.child(parent, 1), None);
    }

    #[test]
    fn reparenting_deep_copies() {
        let (mut ctx, leaf) = ctx_with_leaf();
        let first = ctx.make(NodeKind::Root, vec![Some(leaf)], Meta::none());
        let second = ctx.make(NodeKind::Root, vec![Some(leaf)], Meta::none());

        // The original stays under `first`; `second` got a fresh copy.
        assert_eq!(ctx.parent(leaf), Some(first));
        let copy = ctx.child(second, 0).unwrap();
        assert_ne!(copy, leaf);
        assert_eq!(ctx.parent(copy), Some(second));
        assert_eq!(ctx.kind(copy), ctx.kind(leaf));
    }

    #[test]
    fn release_retires_subtree_and_clears_parent() {
        let (mut ctx, leaf) = ctx_with_leaf();
        let mid = ctx.make(NodeKind::Ctor(CtorKind::Null), vec![Some(leaf)], Meta::none());
        let top = ctx.make(NodeKind::Root, vec![Some(mid)], Meta::none());

        ctx.set_child(top, 0, None);
        assert!(ctx.is_retired(mid));
        assert!(ctx.is_retired(leaf));
        assert_eq!(ctx.parent(mid), None);
        // Memory still addressable for diagnostics.
        assert_eq!(ctx.kind(mid), &NodeKind::Ctor(CtorKind::Null));
    }

    #[test]
    fn identities_are_monotonic_and_unique() {
        let mut ctx = AstContext::new();
        let a = ctx.make(NodeKind::Root, vec![], Meta::none());
        let b = ctx.make(NodeKind::Root, vec![], Meta::none());
        ctx.release(a);
        let c = ctx.make(NodeKind::Root, vec![], Meta::none());
        assert!(a < b && b < c);
    }

    #[test]
    fn decl_index_round_trip_and_idempotence() {
        let mut ctx = AstContext::new();
        let d = ctx.make(
            NodeKind::Decl(DeclData::new(
                "M::x",
                crate::ast::Linkage::Private,
                crate::ast::DeclKind::Constant,
            )),
            vec![],
            Meta::none(),
        );
        let i1 = ctx.register_decl(d);
        let i2 = ctx.register_decl(d);
        assert_eq!(i1, i2);
        assert_eq!(ctx.lookup(i1), d);
    }

    #[test]
    fn module_cache_round_trip() {
        let (mut ctx, leaf) = ctx_with_leaf();
        ctx.cache_module("HTTP", ".spicy", leaf);
        assert_eq!(ctx.cached_module("HTTP", ".spicy"), Some(leaf));
        assert_eq!(ctx.cached_module("HTTP", ".hlt"), None);
    }

    #[test]
    fn drain_errors_collects_recursively() {
        let (mut ctx, leaf) = ctx_with_leaf();
        let top = ctx.make(NodeKind::Root, vec![Some(leaf)], Meta::none());
        ctx.add_error(leaf, "bad leaf");
        ctx.add_error(top, "bad root");
        let errors = ctx.drain_errors(top);
        assert_eq!(errors.len(), 2);
        assert!(ctx.errors(leaf).is_empty());
    }
}
