// scope.rs — Name→declaration tables and chained lookup
//
// A `Scope` hangs off any node that introduces a lexical boundary: modules,
// blocks, function bodies, struct/unit bodies, hooks, and statements with
// init clauses. Lookup walks from a node upward through its parents,
// consulting each scope on the way; a node with `inherit_scope == false`
// skips straight to its enclosing module. The first scope with a match
// wins; multiple matches within one scope are an ambiguity.
//
// Module declarations are reachable only as the head of a qualified path,
// never through a naked identifier. Crossing into another module requires
// `Public`/`Export` linkage, except for types and enum-valued constants.

use std::collections::HashMap;

use crate::ast::{DeclKind, Id, Linkage, NodeKind, TypeKind};
use crate::node::{AstContext, DeclIndex, NodeId};

// ── Scope ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: HashMap<String, Vec<DeclIndex>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a declaration under a local name. Idempotent per declaration
    /// identity: re-inserting the same index under the same name is a
    /// no-op. Returns whether the entry was new (drives the fixed-point
    /// loop's change tracking).
    pub fn insert(&mut self, name: &str, decl: DeclIndex) -> bool {
        let slot = self.entries.entry(name.to_string()).or_default();
        if slot.contains(&decl) {
            false
        } else {
            slot.push(decl);
            true
        }
    }

    /// All declarations registered under `name` in this scope.
    pub fn lookup_all(&self, name: &str) -> &[DeclIndex] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ── Chained lookup ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(DeclIndex),
    NotFound,
    Ambiguous(Vec<DeclIndex>),
    /// Found, but the declaration is not visible from the requesting
    /// module.
    NotVisible(DeclIndex),
}

/// Look up `id` starting at `from` and walking outward.
pub fn lookup(ctx: &AstContext, from: NodeId, id: &Id) -> LookupResult {
    let mut components = id.as_str().split("::");
    let head = match components.next() {
        Some(h) if !h.is_empty() => h,
        _ => return LookupResult::NotFound,
    };
    let rest: Vec<&str> = components.collect();

    match lookup_head(ctx, from, head, !rest.is_empty()) {
        LookupResult::Found(mut index) => {
            // Resolve remaining components through the scopes of the
            // declarations found so far.
            let mut crossed_module = false;
            for component in rest {
                let holder = ctx.lookup(index);
                if matches!(
                    ctx.decl(holder).map(|d| &d.kind),
                    Some(DeclKind::Module | DeclKind::ImportedModule { .. })
                ) {
                    crossed_module = true;
                }
                let target = scope_holder(ctx, holder);
                let matches = target
                    .and_then(|t| ctx.scope(t))
                    .map(|s| s.lookup_all(component).to_vec())
                    .unwrap_or_default();
                match matches.len() {
                    0 => return LookupResult::NotFound,
                    1 => index = matches[0],
                    _ => return LookupResult::Ambiguous(matches),
                }
            }
            if crossed_module && !visible_across_modules(ctx, index) {
                return LookupResult::NotVisible(index);
            }
            LookupResult::Found(index)
        }
        other => other,
    }
}

/// Walk the parent chain resolving the first path component.
fn lookup_head(ctx: &AstContext, from: NodeId, name: &str, allow_module: bool) -> LookupResult {
    let mut current = Some(from);
    while let Some(node) = current {
        if let Some(scope) = ctx.scope(node) {
            let matches: Vec<DeclIndex> = scope
                .lookup_all(name)
                .iter()
                .copied()
                .filter(|&d| allow_module || !is_module_decl(ctx, d))
                .collect();
            match matches.len() {
                0 => {}
                1 => return LookupResult::Found(matches[0]),
                _ => return LookupResult::Ambiguous(matches),
            }
        }
        current = if ctx.inherit_scope(node) {
            ctx.parent(node)
        } else {
            enclosing_module(ctx, node)
        };
    }
    LookupResult::NotFound
}

fn is_module_decl(ctx: &AstContext, index: DeclIndex) -> bool {
    let node = ctx.lookup(index);
    matches!(
        ctx.decl(node).map(|d| &d.kind),
        Some(DeclKind::Module | DeclKind::ImportedModule { .. })
    )
}

/// The node whose scope holds a declaration's members: the declaration
/// itself for modules, the struct/unit/enum type node for type decls.
fn scope_holder(ctx: &AstContext, decl: NodeId) -> Option<NodeId> {
    match ctx.decl(decl).map(|d| &d.kind) {
        Some(DeclKind::Module) => Some(decl),
        // An import is a stand-in; its binding points at the real module.
        Some(DeclKind::ImportedModule { .. }) => {
            ctx.name_resolution(decl).map(|i| ctx.lookup(i))
        }
        Some(DeclKind::Type { .. }) => {
            // Type decl -> qualified type -> unqualified type.
            let qtype = ctx.child(decl, 0)?;
            let utype = ctx.child(qtype, 0)?;
            match ctx.kind(utype) {
                NodeKind::Type(
                    TypeKind::Struct | TypeKind::Union | TypeKind::Unit | TypeKind::Enum { .. },
                ) => Some(utype),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Visibility when a lookup crosses a module boundary: public/exported
/// declarations always; types and enum-valued constants as well.
fn visible_across_modules(ctx: &AstContext, index: DeclIndex) -> bool {
    let node = ctx.lookup(index);
    let Some(decl) = ctx.decl(node) else {
        return true;
    };
    match decl.linkage {
        Linkage::Public | Linkage::Export => true,
        _ => match decl.kind {
            DeclKind::Type { .. } => true,
            DeclKind::Constant => is_enum_valued(ctx, node),
            _ => false,
        },
    }
}

/// A constant counts as enum-valued when its declared type is an enum, or
/// is still an unresolved name (settled by a later resolver sweep).
fn is_enum_valued(ctx: &AstContext, constant: NodeId) -> bool {
    let Some(qtype) = ctx.child(constant, 0) else {
        return false;
    };
    let Some(utype) = ctx.child(qtype, 0) else {
        return false;
    };
    matches!(
        ctx.kind(utype),
        NodeKind::Type(TypeKind::Enum { .. } | TypeKind::Name { .. })
    )
}

/// Nearest ancestor that is a module declaration (exclusive of `node`).
fn enclosing_module(ctx: &AstContext, node: NodeId) -> Option<NodeId> {
    let mut current = ctx.parent(node);
    while let Some(n) = current {
        if matches!(ctx.decl(n).map(|d| &d.kind), Some(DeclKind::Module)) {
            return Some(n);
        }
        current = ctx.parent(n);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DeclData, StmtKind};
    use crate::meta::Meta;

    fn decl(ctx: &mut AstContext, id: &str, linkage: Linkage, kind: DeclKind) -> (NodeId, DeclIndex) {
        let node = ctx.make(
            NodeKind::Decl(DeclData::new(id, linkage, kind)),
            vec![],
            Meta::none(),
        );
        let index = ctx.register_decl(node);
        (node, index)
    }

    #[test]
    fn insert_is_idempotent() {
        let mut ctx = AstContext::new();
        let (_, index) = decl(&mut ctx, "x", Linkage::Private, DeclKind::Constant);
        let mut scope = Scope::new();
        scope.insert("x", index);
        scope.insert("x", index);
        assert_eq!(scope.lookup_all("x"), &[index]);
    }

    #[test]
    fn lookup_walks_outward() {
        let mut ctx = AstContext::new();
        let (module, _) = decl(&mut ctx, "M", Linkage::Private, DeclKind::Module);
        let block = ctx.make(NodeKind::Stmt(StmtKind::Block), vec![], Meta::none());
        ctx.append_child(module, Some(block));

        let (_, outer) = decl(&mut ctx, "x", Linkage::Private, DeclKind::GlobalVariable);
        ctx.scope_mut(module).insert("x", outer);

        assert_eq!(
            lookup(&ctx, block, &Id::new("x")),
            LookupResult::Found(outer)
        );
        assert_eq!(lookup(&ctx, block, &Id::new("y")), LookupResult::NotFound);
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut ctx = AstContext::new();
        let (module, _) = decl(&mut ctx, "M", Linkage::Private, DeclKind::Module);
        let block = ctx.make(NodeKind::Stmt(StmtKind::Block), vec![], Meta::none());
        ctx.append_child(module, Some(block));

        let (_, outer) = decl(&mut ctx, "x", Linkage::Private, DeclKind::GlobalVariable);
        let (_, inner) = decl(&mut ctx, "x", Linkage::Private, DeclKind::LocalVariable);
        ctx.scope_mut(module).insert("x", outer);
        ctx.scope_mut(block).insert("x", inner);

        assert_eq!(
            lookup(&ctx, block, &Id::new("x")),
            LookupResult::Found(inner)
        );
    }

    #[test]
    fn two_matches_in_one_scope_are_ambiguous() {
        let mut ctx = AstContext::new();
        let (module, _) = decl(&mut ctx, "M", Linkage::Private, DeclKind::Module);
        let (_, a) = decl(&mut ctx, "x", Linkage::Private, DeclKind::GlobalVariable);
        let (_, b) = decl(&mut ctx, "x", Linkage::Private, DeclKind::Constant);
        ctx.scope_mut(module).insert("x", a);
        ctx.scope_mut(module).insert("x", b);

        assert!(matches!(
            lookup(&ctx, module, &Id::new("x")),
            LookupResult::Ambiguous(v) if v.len() == 2
        ));
    }

    #[test]
    fn module_not_reachable_by_naked_identifier() {
        let mut ctx = AstContext::new();
        let root = ctx.make(NodeKind::Root, vec![], Meta::none());
        let (module, module_index) = decl(&mut ctx, "Other", Linkage::Public, DeclKind::Module);
        ctx.append_child(root, Some(module));
        ctx.scope_mut(root).insert("Other", module_index);

        let (_, member) = decl(&mut ctx, "f", Linkage::Public, DeclKind::Function);
        ctx.scope_mut(module).insert("f", member);

        // Naked "Other" does not resolve, but "Other::f" does.
        assert_eq!(
            lookup(&ctx, root, &Id::new("Other")),
            LookupResult::NotFound
        );
        assert_eq!(
            lookup(&ctx, root, &Id::new("Other::f")),
            LookupResult::Found(member)
        );
    }

    #[test]
    fn private_member_not_visible_across_modules() {
        let mut ctx = AstContext::new();
        let root = ctx.make(NodeKind::Root, vec![], Meta::none());
        let (module, module_index) = decl(&mut ctx, "Other", Linkage::Public, DeclKind::Module);
        ctx.append_child(root, Some(module));
        ctx.scope_mut(root).insert("Other", module_index);

        let (_, hidden) = decl(&mut ctx, "g", Linkage::Private, DeclKind::Function);
        ctx.scope_mut(module).insert("g", hidden);

        assert_eq!(
            lookup(&ctx, root, &Id::new("Other::g")),
            LookupResult::NotVisible(hidden)
        );

        // Private enum-valued constants are the documented exception.
        let enum_type = ctx.make(
            NodeKind::Type(TypeKind::Enum {
                labels: vec![("A".into(), 0)],
            }),
            vec![],
            Meta::none(),
        );
        let qtype = ctx.make(
            NodeKind::QualifiedType {
                constness: crate::ast::Constness::Const,
                side: crate::ast::Side::Rhs,
            },
            vec![Some(enum_type)],
            Meta::none(),
        );
        let konst_node = ctx.make(
            NodeKind::Decl(DeclData::new("c", Linkage::Private, DeclKind::Constant)),
            vec![Some(qtype)],
            Meta::none(),
        );
        let konst = ctx.register_decl(konst_node);
        ctx.scope_mut(module).insert("c", konst);
        assert_eq!(
            lookup(&ctx, root, &Id::new("Other::c")),
            LookupResult::Found(konst)
        );
    }

    #[test]
    fn inherit_scope_false_skips_to_module() {
        let mut ctx = AstContext::new();
        let (module, _) = decl(&mut ctx, "M", Linkage::Private, DeclKind::Module);
        let mid = ctx.make(NodeKind::Stmt(StmtKind::Block), vec![], Meta::none());
        let inner = ctx.make(NodeKind::Stmt(StmtKind::Block), vec![], Meta::none());
        ctx.append_child(module, Some(mid));
        ctx.append_child(mid, Some(inner));

        let (_, mid_var) = decl(&mut ctx, "x", Linkage::Private, DeclKind::LocalVariable);
        let (_, mod_var) = decl(&mut ctx, "x", Linkage::Private, DeclKind::GlobalVariable);
        ctx.scope_mut(mid).insert("x", mid_var);
        ctx.scope_mut(module).insert("x", mod_var);

        ctx.set_inherit_scope(inner, false);
        assert_eq!(
            lookup(&ctx, inner, &Id::new("x")),
            LookupResult::Found(mod_var)
        );
    }
}
