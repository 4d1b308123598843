// hilti.rs — The HILTI plugin
//
// The base plugin that is always present: it owns the standard type
// system, the shared scope/resolve/validate passes, coercions, and the
// HILTI printer. Higher-level plugins (Spicy) lower into its AST.

use crate::builder::Builder;
use crate::coerce::{self, CoercionStyle};
use crate::node::NodeId;
use crate::operators::TypeView;
use crate::plugin::Plugin;
use crate::unify::Unifier;
use crate::{printer, resolve, validate};

pub fn plugin() -> Plugin {
    Plugin {
        component: "hilti",
        order: 10,
        extension: ".hlt",
        cxx_includes: &["hilti/rt/libhilti.h"],
        library_paths: None,
        parse: Some(|ctx, source, path| crate::parser::parse_hilti(ctx, source, path)),
        unify_type: Some(unify_type),
        coerce_ctor: Some(coerce_ctor),
        coerce_type: Some(coerce_type),
        ast_init: None,
        ast_build_scopes: Some(resolve::build_scopes),
        ast_resolve: Some(resolve::resolve),
        ast_validate_pre: None,
        ast_validate_post: Some(validate::validate_post),
        ast_print: Some(printer::print_node),
        ast_print_id: Some(printer::print_id),
        ast_transform: None,
    }
}

fn unify_type(unifier: &mut Unifier, utype: NodeId) -> bool {
    unifier.serialize_standard(utype)
}

fn coerce_ctor(
    builder: &mut Builder,
    ctor: NodeId,
    target: &TypeView,
    style: CoercionStyle,
) -> Option<NodeId> {
    coerce::coerce_ctor(builder, ctor, target, style)
}

fn coerce_type(
    builder: &mut Builder,
    from: &TypeView,
    to: &TypeView,
    style: CoercionStyle,
) -> Option<NodeId> {
    coerce::coerce_type(builder, from, to, style)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_descriptor() {
        let p = plugin();
        assert_eq!(p.component, "hilti");
        assert_eq!(p.extension, ".hlt");
        assert!(p.parse.is_some());
        assert!(p.ast_transform.is_none());
    }
}
