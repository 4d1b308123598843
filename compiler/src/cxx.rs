// cxx.rs — Structured C++ output documents
//
// A `CxxUnit` is the code generator's target: includes, forward
// declarations, type definitions, function definitions, and the module's
// linker metadata. Formatting is deterministic: includes are kept sorted
// and everything else renders in insertion order, so identical ASTs
// yield byte-identical C++.
//
// The linker metadata side table (init hooks, globals, join points) is
// serialized as a JSON trailer comment in each emitted unit; the linker
// pass aggregates the tables of all units and emits one small wiring unit
// that calls every module's init functions in order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ── Identifier sanitization ──────────────────────────────────────────────

/// Map an AST identifier to a legal C++ identifier: `::` becomes `_`,
/// any other non-alphanumeric becomes a fixed `_0xNN_` escape, and a
/// leading digit gains a `_` prefix.
pub fn cxx_id(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.push('_');
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push_str(&format!("_0x{:02x}_", c as u32));
        }
    }
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        out.insert(0, '_');
    }
    out
}

// ── Linker metadata ──────────────────────────────────────────────────────

/// Per-module side table consumed by the linker pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkerMeta {
    pub module: String,
    pub preinit_functions: Vec<String>,
    pub init_functions: Vec<String>,
    pub globals: Vec<String>,
    pub joins: Vec<String>,
}

const LINKER_META_MARKER: &str = "// %linker-meta: ";

/// Recover a unit's linker metadata from its emitted source.
pub fn parse_linker_meta(cpp_source: &str) -> Option<LinkerMeta> {
    let line = cpp_source
        .lines()
        .rev()
        .find(|l| l.starts_with(LINKER_META_MARKER))?;
    serde_json::from_str(&line[LINKER_META_MARKER.len()..]).ok()
}

// ── CxxUnit ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CxxFunction {
    /// Full signature, e.g. `void f(const hilti::rt::Bytes& data)`.
    pub declaration: String,
    /// Body lines, without the surrounding braces.
    pub body: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CxxUnit {
    pub module_id: String,
    /// Namespace for externally visible symbols.
    pub public_namespace: String,
    /// Nested namespace for internal symbols.
    pub internal_namespace: String,
    includes: BTreeSet<String>,
    forward_decls: Vec<String>,
    type_defs: Vec<String>,
    functions: Vec<CxxFunction>,
    pub linker_meta: LinkerMeta,
}

impl CxxUnit {
    pub fn new(module_id: &str, public_namespace: &str, internal_namespace: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            public_namespace: public_namespace.to_string(),
            internal_namespace: internal_namespace.to_string(),
            includes: BTreeSet::new(),
            forward_decls: Vec::new(),
            type_defs: Vec::new(),
            functions: Vec::new(),
            linker_meta: LinkerMeta {
                module: module_id.to_string(),
                ..LinkerMeta::default()
            },
        }
    }

    pub fn add_include(&mut self, path: &str) {
        self.includes.insert(path.to_string());
    }

    pub fn add_forward_decl(&mut self, decl: &str) {
        self.forward_decls.push(decl.to_string());
    }

    pub fn add_type_def(&mut self, def: &str) {
        self.type_defs.push(def.to_string());
    }

    pub fn add_function(&mut self, declaration: &str, body: Vec<String>) {
        self.functions.push(CxxFunction {
            declaration: declaration.to_string(),
            body,
        });
    }

    /// Render the unit as compilable C++ source.
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "// Generated by spicyc for module '{}'. Do not edit.\n\n",
            self.module_id
        ));
        for inc in &self.includes {
            out.push_str(&format!("#include <{inc}>\n"));
        }
        out.push('\n');
        out.push_str(&format!("namespace {} {{\n\n", self.public_namespace));

        if !self.forward_decls.is_empty() {
            for fwd in &self.forward_decls {
                out.push_str(fwd);
                out.push('\n');
            }
            out.push('\n');
        }

        for def in &self.type_defs {
            out.push_str(def);
            out.push_str("\n\n");
        }

        for f in &self.functions {
            out.push_str(&f.declaration);
            out.push_str(" {\n");
            for line in &f.body {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }

        out.push_str(&format!("}} // namespace {}\n\n", self.public_namespace));
        out.push_str(LINKER_META_MARKER);
        out.push_str(&serde_json::to_string(&self.linker_meta).unwrap_or_default());
        out.push('\n');
        out
    }
}

// ── Linker pass ──────────────────────────────────────────────────────────

/// Aggregate the metadata of all compiled units into one wiring unit whose
/// entry points run every module's pre-init and init hooks in order.
pub fn link_units(metas: &[LinkerMeta]) -> CxxUnit {
    let mut unit = CxxUnit::new("__linker__", "spicy_hlto", "spicy_hlto::detail");
    unit.add_include("hilti/rt/libhilti.h");

    let mut preinit_body = Vec::new();
    let mut init_body = Vec::new();
    for meta in metas {
        for f in &meta.preinit_functions {
            unit.add_forward_decl(&format!("extern \"C\" void {f}();"));
            preinit_body.push(format!("{f}();"));
        }
        for f in &meta.init_functions {
            unit.add_forward_decl(&format!("extern \"C\" void {f}();"));
            init_body.push(format!("{f}();"));
        }
    }
    unit.add_function("extern \"C\" void hlto_preinit()", preinit_body);
    unit.add_function("extern \"C\" void hlto_init()", init_body);

    for meta in metas {
        unit.linker_meta
            .joins
            .extend(meta.joins.iter().cloned());
    }
    unit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_identifiers() {
        assert_eq!(cxx_id("HTTP::Request"), "HTTP_Request");
        assert_eq!(cxx_id("with-dash"), "with_0x2d_dash");
        assert_eq!(cxx_id("1leading"), "_1leading");
        assert_eq!(cxx_id("plain_name"), "plain_name");
    }

    #[test]
    fn format_is_deterministic() {
        let build = || {
            let mut u = CxxUnit::new("M", "hlt_M", "hlt_M::detail");
            u.add_include("zlib.h");
            u.add_include("hilti/rt/libhilti.h");
            u.add_type_def("struct Point { int x; int y; };");
            u.add_function("int f()", vec!["return 1;".into()]);
            u.format()
        };
        assert_eq!(build(), build());
        // Includes render sorted regardless of insertion order.
        let text = build();
        let hilti_pos = text.find("hilti/rt").unwrap();
        let zlib_pos = text.find("zlib.h").unwrap();
        assert!(hilti_pos < zlib_pos);
    }

    #[test]
    fn linker_meta_round_trips_through_source() {
        let mut u = CxxUnit::new("M", "hlt_M", "hlt_M::detail");
        u.linker_meta.init_functions.push("hlt_M_init".into());
        u.linker_meta.globals.push("hlt_M::counter".into());
        let text = u.format();
        let meta = parse_linker_meta(&text).unwrap();
        assert_eq!(meta, u.linker_meta);
    }

    #[test]
    fn linker_pass_wires_init_functions_in_order() {
        let m1 = LinkerMeta {
            module: "A".into(),
            init_functions: vec!["hlt_A_init".into()],
            ..LinkerMeta::default()
        };
        let m2 = LinkerMeta {
            module: "B".into(),
            preinit_functions: vec!["hlt_B_preinit".into()],
            init_functions: vec!["hlt_B_init".into()],
            ..LinkerMeta::default()
        };
        let wiring = link_units(&[m1, m2]).format();
        let a = wiring.find("hlt_A_init();").unwrap();
        let b = wiring.find("hlt_B_init();").unwrap();
        assert!(a < b);
        assert!(wiring.contains("hlto_preinit()"));
        assert!(wiring.contains("hlt_B_preinit();"));
    }
}
