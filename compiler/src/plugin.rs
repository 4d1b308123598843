// plugin.rs — Language plugins and their hook table
//
// A plugin packages one surface language's passes: parsing, type
// unification, coercion, scope building, resolution, validation, printing,
// and (for languages layered above HILTI) the AST-to-AST transform. The
// driver calls hooks in plugin order (lower order first); any hook may be
// absent.
//
// The registry is built once at startup and read-only afterwards.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::ast::Id;
use crate::builder::Builder;
use crate::coerce::CoercionStyle;
use crate::node::{AstContext, NodeId};
use crate::operators::TypeView;
use crate::parser::ParseOutcome;
use crate::unify::Unifier;

pub struct Plugin {
    /// Name of the plugin (also its diagnostic prefix).
    pub component: &'static str,
    /// Plugins execute in ascending order.
    pub order: i32,
    /// Source extension handled, with leading dot.
    pub extension: &'static str,
    /// C++ includes emitted code needs.
    pub cxx_includes: &'static [&'static str],

    pub library_paths: Option<fn() -> Vec<PathBuf>>,
    pub parse: Option<fn(&mut AstContext, &str, &Path) -> ParseOutcome>,
    pub unify_type: Option<fn(&mut Unifier, NodeId) -> bool>,
    pub coerce_ctor: Option<fn(&mut Builder, NodeId, &TypeView, CoercionStyle) -> Option<NodeId>>,
    pub coerce_type: Option<fn(&mut Builder, &TypeView, &TypeView, CoercionStyle) -> Option<NodeId>>,
    pub ast_init: Option<fn(&mut AstContext, NodeId)>,
    pub ast_build_scopes: Option<fn(&mut AstContext, NodeId) -> bool>,
    pub ast_resolve: Option<fn(&mut AstContext, NodeId) -> bool>,
    pub ast_validate_pre: Option<fn(&mut AstContext, NodeId)>,
    pub ast_validate_post: Option<fn(&mut AstContext, NodeId)>,
    pub ast_print: Option<fn(&AstContext, NodeId, &mut String) -> bool>,
    pub ast_print_id: Option<fn(&Id, &mut String) -> bool>,
    pub ast_transform: Option<fn(&mut AstContext, NodeId) -> bool>,
}

static PLUGINS: Lazy<Vec<Plugin>> = Lazy::new(|| {
    let mut plugins = vec![crate::spicy::plugin(), crate::hilti::plugin()];
    plugins.sort_by_key(|p| p.order);
    plugins
});

/// All registered plugins, in execution order.
pub fn plugins() -> &'static [Plugin] {
    &PLUGINS
}

/// The first plugin handling a file extension (with leading dot).
pub fn plugin_for_extension(extension: &str) -> Option<&'static Plugin> {
    plugins().iter().find(|p| p.extension == extension)
}
