// visitor.rs — Structural AST walks
//
// Visitors are plain closures dispatching on a node's kind with `match`;
// this module supplies the traversal orders. Pre-order visits a node before
// its children, post-order after; scope building and ID resolution run
// post-order so children bind before their containers.
//
// Mutating walks report whether anything changed; the pipeline driver runs
// passes to a fixed point on that signal. A mutating visitor may edit the
// children of the node it is visiting; each node's child list is
// snapshotted at visit time, and nodes retired mid-walk are skipped.

use crate::node::{AstContext, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Pre,
    Post,
}

/// Read-only walk over the subtree at `root`.
pub fn walk<F>(ctx: &AstContext, root: NodeId, order: Order, f: &mut F)
where
    F: FnMut(&AstContext, NodeId),
{
    if ctx.is_retired(root) {
        return;
    }
    if order == Order::Pre {
        f(ctx, root);
    }
    for child in ctx.children(root).into_iter().flatten() {
        walk(ctx, child, order, f);
    }
    if order == Order::Post {
        f(ctx, root);
    }
}

/// Mutating walk. The callback returns whether it changed anything at the
/// visited node; the walk returns whether any callback did.
pub fn walk_mut<F>(ctx: &mut AstContext, root: NodeId, order: Order, f: &mut F) -> bool
where
    F: FnMut(&mut AstContext, NodeId) -> bool,
{
    if ctx.is_retired(root) {
        return false;
    }
    let mut changed = false;
    if order == Order::Pre {
        changed |= f(ctx, root);
    }
    for child in ctx.children(root).into_iter().flatten() {
        if !ctx.is_retired(child) {
            changed |= walk_mut(ctx, child, order, f);
        }
    }
    if order == Order::Post && !ctx.is_retired(root) {
        changed |= f(ctx, root);
    }
    changed
}

/// Collect every live node id under `root`, pre-order.
pub fn collect(ctx: &AstContext, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    walk(ctx, root, Order::Pre, &mut |_, id| out.push(id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CtorKind, NodeKind, StmtKind, TypeKind};
    use crate::meta::Meta;

    fn sample_tree(ctx: &mut AstContext) -> (NodeId, NodeId, NodeId) {
        let leaf_a = ctx.make(NodeKind::Type(TypeKind::Bool), vec![], Meta::none());
        let leaf_b = ctx.make(NodeKind::Type(TypeKind::Bytes), vec![], Meta::none());
        let root = ctx.make(
            NodeKind::Stmt(StmtKind::Block),
            vec![Some(leaf_a), Some(leaf_b)],
            Meta::none(),
        );
        (root, leaf_a, leaf_b)
    }

    #[test]
    fn pre_order_visits_parent_first() {
        let mut ctx = AstContext::new();
        let (root, leaf_a, leaf_b) = sample_tree(&mut ctx);
        let mut seen = Vec::new();
        walk(&ctx, root, Order::Pre, &mut |_, id| seen.push(id));
        assert_eq!(seen, vec![root, leaf_a, leaf_b]);
    }

    #[test]
    fn post_order_visits_children_first() {
        let mut ctx = AstContext::new();
        let (root, leaf_a, leaf_b) = sample_tree(&mut ctx);
        let mut seen = Vec::new();
        walk(&ctx, root, Order::Post, &mut |_, id| seen.push(id));
        assert_eq!(seen, vec![leaf_a, leaf_b, root]);
    }

    #[test]
    fn mutating_walk_reports_changes() {
        let mut ctx = AstContext::new();
        let (root, _, _) = sample_tree(&mut ctx);

        // First sweep rewrites Bool leaves; second finds nothing to do.
        let mut rewrite = |ctx: &mut AstContext, id: NodeId| -> bool {
            if matches!(ctx.kind(id), NodeKind::Type(TypeKind::Bool)) {
                *ctx.kind_mut(id) = NodeKind::Ctor(CtorKind::Bool(true));
                true
            } else {
                false
            }
        };
        assert!(walk_mut(&mut ctx, root, Order::Post, &mut rewrite));
        assert!(!walk_mut(&mut ctx, root, Order::Post, &mut rewrite));
    }

    #[test]
    fn retired_nodes_are_skipped() {
        let mut ctx = AstContext::new();
        let (root, leaf_a, _) = sample_tree(&mut ctx);
        ctx.set_child(root, 0, None);
        let mut seen = Vec::new();
        walk(&ctx, root, Order::Pre, &mut |_, id| seen.push(id));
        assert!(!seen.contains(&leaf_a));
    }
}
