// spicy.rs — The Spicy plugin
//
// The surface-language plugin layered above HILTI: parses `.spicy` files,
// unifies the unit type kind, validates attribute placement, and owns the
// unit-to-grammar transform. Scope building and resolution reuse the
// shared passes; units, fields, and hooks are handled there alongside
// the HILTI shapes.

use crate::ast::{NodeKind, TypeKind};
use crate::node::NodeId;
use crate::plugin::Plugin;
use crate::unify::Unifier;
use crate::{resolve, transform, validate};

pub fn plugin() -> Plugin {
    Plugin {
        component: "spicy",
        order: 5,
        extension: ".spicy",
        cxx_includes: &["spicy/rt/libspicy.h"],
        library_paths: None,
        parse: Some(|ctx, source, path| crate::parser::parse_spicy(ctx, source, path)),
        unify_type: Some(unify_type),
        coerce_ctor: None,
        coerce_type: None,
        ast_init: None,
        ast_build_scopes: Some(resolve::build_scopes),
        ast_resolve: Some(resolve::resolve),
        ast_validate_pre: Some(validate::validate_pre),
        ast_validate_post: None,
        ast_print: None,
        ast_print_id: None,
        ast_transform: Some(transform::transform),
    }
}

/// Units unify by their canonical ID, like any named aggregate.
fn unify_type(unifier: &mut Unifier, utype: NodeId) -> bool {
    if !matches!(unifier.ctx.kind(utype), NodeKind::Type(TypeKind::Unit)) {
        return false;
    }
    match unifier.aggregate_id(utype) {
        Some(id) => unifier.add(&format!("unit({id})")),
        None => unifier.abort(),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Constness, Linkage};
    use crate::builder::Builder;
    use crate::node::AstContext;
    use crate::unify::{unify, UnifyOutcome};

    #[test]
    fn plugin_descriptor() {
        let p = plugin();
        assert_eq!(p.component, "spicy");
        assert_eq!(p.extension, ".spicy");
        assert!(p.ast_transform.is_some());
    }

    #[test]
    fn named_unit_unifies_by_id() {
        let mut ctx = AstContext::new();
        let unit = {
            let mut b = Builder::new(&mut ctx);
            let unit = b.type_unit(vec![], vec![], None);
            let q = b.qtype(unit, Constness::Mutable);
            let _decl = b.decl_type("HTTP::Request", q, Linkage::Public, true);
            unit
        };
        assert_eq!(
            unify(&mut ctx, unit),
            UnifyOutcome::Done("unit(HTTP::Request)".into())
        );
    }

    #[test]
    fn anonymous_unit_is_not_ready() {
        let mut ctx = AstContext::new();
        let unit = {
            let mut b = Builder::new(&mut ctx);
            b.type_unit(vec![], vec![], None)
        };
        assert_eq!(unify(&mut ctx, unit), UnifyOutcome::NotReady);
    }
}
