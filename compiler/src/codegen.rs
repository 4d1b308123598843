// codegen.rs — C++ code generation for HILTI modules
//
// Lowers a fully resolved, transformed module to a `cxx::Unit`: type
// definitions, constants, globals with their init function, ordinary
// functions, hook functions, and the grammar-driven parse functions that
// call into the runtime's stream primitives. Look-ahead productions peek
// at the input and dispatch on their FIRST sets; loop productions expand
// to the loop style their driving attribute implies.
//
// Emitter invariants: no source-language construct appears in the output;
// every emitted name is a legal C++ identifier (via `cxx::cxx_id`); output
// is deterministic for a given AST and options.
//
// Preconditions: resolution converged, Spicy transform ran, validation
//   passed.
// Postconditions: returns a formatted `cxx::Unit` plus diagnostics.
// Failure modes: leftover unresolved constructs produce diagnostics.
// Side effects: none beyond type-view caching in the context.

use std::path::PathBuf;

use crate::ast::*;
use crate::cxx::{cxx_id, CxxUnit};
use crate::diag::Diagnostic;
use crate::grammar::{Grammar, ProdId, ProdKind, Terminal};
use crate::node::{AstContext, NodeId};
use crate::operators::resolve_alias;
use crate::transform::find_attr;

// ── Public types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Prefix of the externally visible namespace (`<prefix>_<module>`).
    pub public_ns_prefix: String,
    /// Name of the nested internal namespace.
    pub internal_ns: String,
    pub release: bool,
    pub include_paths: Vec<PathBuf>,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            public_ns_prefix: "hlt".into(),
            internal_ns: "detail".into(),
            release: false,
            include_paths: Vec::new(),
        }
    }
}

pub struct CodegenResult {
    pub unit: CxxUnit,
    pub diagnostics: Vec<Diagnostic>,
}

/// Generate C++ for one module.
pub fn codegen_module(
    ctx: &mut AstContext,
    module: NodeId,
    options: &CodegenOptions,
) -> CodegenResult {
    let module_id = ctx
        .decl(module)
        .map(|d| d.id.as_str().to_string())
        .unwrap_or_else(|| "anonymous".into());
    let public_ns = format!("{}_{}", options.public_ns_prefix, cxx_id(&module_id));
    let internal_ns = format!("{}::{}", public_ns, options.internal_ns);

    let mut cg = CodegenCtx {
        ctx,
        options,
        module,
        module_id: module_id.clone(),
        unit: CxxUnit::new(&module_id, &public_ns, &internal_ns),
        diagnostics: Vec::new(),
        self_name: "self".into(),
        init_lines: Vec::new(),
    };
    cg.emit_all();
    cg.build_result()
}

// ── Internal context ─────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    ctx: &'a mut AstContext,
    options: &'a CodegenOptions,
    module: NodeId,
    module_id: String,
    unit: CxxUnit,
    diagnostics: Vec<Diagnostic>,
    /// How `self` spells in the current function body.
    self_name: String,
    /// Statements accumulated for the module init function.
    init_lines: Vec<String>,
}

impl CodegenCtx<'_> {
    fn build_result(mut self) -> CodegenResult {
        // Module init function: global initialization plus parser
        // registration, recorded in the linker metadata.
        let init_name = format!("{}_hlto_init", cxx_id(&self.module_id));
        let lines = std::mem::take(&mut self.init_lines);
        self.unit
            .add_function(&format!("extern \"C\" void {init_name}()"), lines);
        self.unit.linker_meta.init_functions.push(init_name);

        CodegenResult {
            unit: self.unit,
            diagnostics: self.diagnostics,
        }
    }

    fn emit_all(&mut self) {
        self.unit.add_include("hilti/rt/libhilti.h");
        self.unit.add_include("spicy/rt/libspicy.h");
        for p in crate::plugin::plugins() {
            for inc in p.cxx_includes {
                self.unit.add_include(inc);
            }
        }

        for child in self.ctx.children(self.module).into_iter().flatten() {
            let Some(data) = self.ctx.decl(child).cloned() else {
                continue;
            };
            match data.kind {
                DeclKind::Type { .. } => self.emit_type_decl(child, &data),
                DeclKind::Constant => self.emit_constant(child, &data),
                DeclKind::GlobalVariable => self.emit_global(child, &data),
                DeclKind::Function => self.emit_function(child, &data),
                _ => {}
            }
        }
    }

    // ── Types ────────────────────────────────────────────────────────

    fn emit_type_decl(&mut self, decl: NodeId, data: &DeclData) {
        let Some(qtype) = self.ctx.child(decl, 0) else {
            return;
        };
        let Some(utype) = self.ctx.child(qtype, 0) else {
            return;
        };
        let name = cxx_id(data.id.local());

        match self.ctx.kind(utype).clone() {
            NodeKind::Type(TypeKind::Struct) => {
                let mut def = format!("struct {name} {{\n");
                for field in self.struct_fields(utype) {
                    let fdata = self.ctx.decl(field).cloned().unwrap();
                    let fq = self.ctx.child(field, 0);
                    let fty = fq
                        .map(|q| self.cxx_type(q))
                        .unwrap_or_else(|| "void".into());
                    def.push_str(&format!("    {} {}{{}};\n", fty, cxx_id(fdata.id.local())));
                }
                def.push_str("};");
                self.unit.add_type_def(&def);
                self.emit_hooks_for(utype, &name);
                self.emit_parse_registration(decl, data, &name);
            }
            NodeKind::Type(TypeKind::Enum { labels }) => {
                let mut def = format!("enum class {name} : int64_t {{\n");
                for (label, ordinal) in &labels {
                    def.push_str(&format!("    {} = {},\n", cxx_id(label), ordinal));
                }
                def.push_str("};");
                self.unit.add_type_def(&def);
            }
            NodeKind::Type(TypeKind::Union) => {
                // Tagged variant with a discriminator index.
                let fields = self.struct_fields(utype);
                let alts: Vec<String> = fields
                    .iter()
                    .filter_map(|&f| self.ctx.child(f, 0))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|q| self.cxx_type(q))
                    .collect();
                let def = format!(
                    "using {name} = std::variant<std::monostate, {}>;",
                    alts.join(", ")
                );
                self.unit.add_include("variant");
                self.unit.add_type_def(&def);
            }
            _ => {
                let target = self.cxx_type(qtype);
                self.unit.add_type_def(&format!("using {name} = {target};"));
            }
        }
    }

    fn struct_fields(&self, utype: NodeId) -> Vec<NodeId> {
        self.ctx
            .children(utype)
            .into_iter()
            .flatten()
            .filter(|&c| {
                matches!(
                    self.ctx.decl(c).map(|d| &d.kind),
                    Some(DeclKind::Field)
                )
            })
            .collect()
    }

    /// The C++ spelling of a (qualified or unqualified) type.
    fn cxx_type(&mut self, node: NodeId) -> String {
        let utype = match self.ctx.kind(node) {
            NodeKind::QualifiedType { .. } => match self.ctx.child(node, 0) {
                Some(u) => u,
                None => return "void".into(),
            },
            _ => node,
        };
        let kind = match self.ctx.kind(utype) {
            NodeKind::Type(k) => k.clone(),
            _ => return "void".into(),
        };
        match kind {
            TypeKind::UInt(w) => format!("hilti::rt::integer::safe<std::uint{w}_t>"),
            TypeKind::SInt(w) => format!("hilti::rt::integer::safe<std::int{w}_t>"),
            TypeKind::Real => "double".into(),
            TypeKind::Bool => "hilti::rt::Bool".into(),
            TypeKind::Bytes => "hilti::rt::Bytes".into(),
            TypeKind::Stream => "hilti::rt::stream::View".into(),
            TypeKind::RegExp => "hilti::rt::RegExp".into(),
            TypeKind::Address => "hilti::rt::Address".into(),
            TypeKind::Port => "hilti::rt::Port".into(),
            TypeKind::Interval => "hilti::rt::Interval".into(),
            TypeKind::Time => "hilti::rt::Time".into(),
            TypeKind::String => "std::string".into(),
            TypeKind::Void => "void".into(),
            TypeKind::Auto => "auto".into(),
            TypeKind::Optional => {
                let inner = self.child_type(utype, 0);
                format!("std::optional<{inner}>")
            }
            TypeKind::Result => {
                let inner = self.child_type(utype, 0);
                format!("hilti::rt::Result<{inner}>")
            }
            TypeKind::StrongRef => {
                let inner = self.child_type(utype, 0);
                format!("hilti::rt::StrongReference<{inner}>")
            }
            TypeKind::WeakRef => {
                let inner = self.child_type(utype, 0);
                format!("hilti::rt::WeakReference<{inner}>")
            }
            TypeKind::ValueRef => {
                let inner = self.child_type(utype, 0);
                format!("hilti::rt::ValueReference<{inner}>")
            }
            TypeKind::Vector | TypeKind::List => {
                let inner = self.child_type(utype, 0);
                format!("hilti::rt::Vector<{inner}>")
            }
            TypeKind::Set => {
                let inner = self.child_type(utype, 0);
                format!("hilti::rt::Set<{inner}>")
            }
            TypeKind::Map => {
                let k = self.child_type(utype, 0);
                let v = self.child_type(utype, 1);
                format!("hilti::rt::Map<{k}, {v}>")
            }
            TypeKind::Tuple { labels } => {
                let elems: Vec<String> =
                    (0..labels.len()).map(|i| self.child_type(utype, i)).collect();
                format!("std::tuple<{}>", elems.join(", "))
            }
            TypeKind::Bitfield { width, .. } => {
                format!("hilti::rt::integer::safe<std::uint{}_t>", width.max(8))
            }
            TypeKind::Name { id } => cxx_id(id.local()),
            TypeKind::Struct | TypeKind::Union | TypeKind::Enum { .. } | TypeKind::Unit => {
                // Nested aggregates are always reached through their decl.
                self.ctx
                    .parent(utype)
                    .and_then(|q| self.ctx.parent(q))
                    .and_then(|d| self.ctx.decl(d))
                    .map(|d| cxx_id(d.id.local()))
                    .unwrap_or_else(|| "void".into())
            }
            TypeKind::Function { .. } | TypeKind::OperandList | TypeKind::Wildcard { .. } => {
                "void".into()
            }
        }
    }

    fn child_type(&mut self, utype: NodeId, slot: usize) -> String {
        match self.ctx.child(utype, slot) {
            Some(c) => self.cxx_type(c),
            None => "void".into(),
        }
    }

    // ── Constants and globals ────────────────────────────────────────

    fn emit_constant(&mut self, decl: NodeId, data: &DeclData) {
        let Some(value) = self.ctx.child(decl, 1) else {
            return;
        };
        let value = self.emit_expr(value);
        self.unit.add_type_def(&format!(
            "static const auto {} = {};",
            cxx_id(data.id.local()),
            value
        ));
    }

    fn emit_global(&mut self, decl: NodeId, data: &DeclData) {
        let name = cxx_id(data.id.local());
        let ty = match self.ctx.child(decl, 0) {
            Some(q) => self.cxx_type(q),
            None => "void".into(),
        };
        self.unit.add_type_def(&format!("{ty} {name}{{}};"));
        self.unit
            .linker_meta
            .globals
            .push(format!("{}::{}", self.unit.public_namespace, name));
        if let Some(init) = self.ctx.child(decl, 1) {
            let init = self.emit_expr(init);
            self.init_lines.push(format!("{name} = {init};"));
        }
    }

    // ── Functions ────────────────────────────────────────────────────

    /// Parameter-kind to C++ usage: Copy by value, In by const reference,
    /// InOut by mutable reference.
    fn param_usage(&mut self, param: NodeId) -> String {
        let kind = match self.ctx.decl(param).map(|d| d.kind.clone()) {
            Some(DeclKind::Parameter { kind }) => kind,
            _ => ParamKind::In,
        };
        let name = self
            .ctx
            .decl(param)
            .map(|d| cxx_id(d.id.local()))
            .unwrap_or_default();
        let ty = match self.ctx.child(param, 0) {
            Some(q) => self.cxx_type(q),
            None => "void".into(),
        };
        match kind {
            ParamKind::Copy => format!("{ty} {name}"),
            ParamKind::In => format!("const {ty}& {name}"),
            ParamKind::InOut => format!("{ty}& {name}"),
        }
    }

    fn emit_function(&mut self, decl: NodeId, data: &DeclData) {
        let Some(ftype) = self.ctx.child(decl, 0) else {
            return;
        };
        let result = match self.ctx.child(ftype, 0) {
            Some(r) => self.cxx_type(r),
            None => "void".into(),
        };
        let param_children: Vec<_> = (1..self.ctx.num_children(ftype))
            .filter_map(|i| self.ctx.child(ftype, i))
            .collect();
        let params: Vec<String> = param_children
            .into_iter()
            .map(|p| self.param_usage(p))
            .collect();
        let name = cxx_id(data.id.local());

        match self.ctx.child(decl, 1) {
            Some(body) => {
                let mut lines = vec!["::hilti::rt::detail::check_stack();".to_string()];
                self.emit_block_into(body, &mut lines, 0);
                self.unit.add_function(
                    &format!("{result} {name}({})", params.join(", ")),
                    lines,
                );
            }
            None => {
                // A bodiless parse function gets its grammar-driven body.
                if let Some(local) = name.strip_prefix("parse_") {
                    self.emit_parse_function(&name, local, &result);
                }
            }
        }
    }

    // ── Hooks ────────────────────────────────────────────────────────

    /// Emit hook functions for a unit struct: per-field hooks take the
    /// parsed value, unit hooks only the unit.
    fn emit_hooks_for(&mut self, utype: NodeId, struct_name: &str) {
        for field in self.struct_fields(utype) {
            let fname = self
                .ctx
                .decl(field)
                .map(|d| cxx_id(d.id.local()))
                .unwrap_or_default();
            for hook in self.hooks_of(field) {
                let (kind, body) = hook;
                let suffix = match kind {
                    HookKind::ForEach => "foreach",
                    _ => "value",
                };
                let dd_ty = self.dd_cxx_type(field, kind == HookKind::ForEach);
                let mut lines = Vec::new();
                self.self_name = "__self".into();
                self.emit_block_into(body, &mut lines, 0);
                self.self_name = "self".into();
                self.unit.add_function(
                    &format!(
                        "void on_{struct_name}_{fname}_{suffix}({struct_name}& __self, const {dd_ty}& __dd)"
                    ),
                    lines,
                );
            }
        }

        for child in self.ctx.children(utype).into_iter().flatten() {
            if let Some(DeclKind::Hook { kind }) = self.ctx.decl(child).map(|d| d.kind.clone()) {
                let suffix = match kind {
                    HookKind::UnitInit => "init",
                    HookKind::UnitError => "error",
                    _ => "done",
                };
                if let Some(body) = self.ctx.child(child, 0) {
                    let mut lines = Vec::new();
                    self.self_name = "__self".into();
                    self.emit_block_into(body, &mut lines, 0);
                    self.self_name = "self".into();
                    self.unit.add_function(
                        &format!("void on_{struct_name}_{suffix}({struct_name}& __self)"),
                        lines,
                    );
                }
            }
        }
    }

    fn hooks_of(&self, field: NodeId) -> Vec<(HookKind, NodeId)> {
        self.ctx
            .children(field)
            .into_iter()
            .flatten()
            .filter_map(|c| match self.ctx.decl(c).map(|d| d.kind.clone()) {
                Some(DeclKind::Hook { kind }) => self.ctx.child(c, 0).map(|b| (kind, b)),
                _ => None,
            })
            .collect()
    }

    fn dd_cxx_type(&mut self, field: NodeId, element: bool) -> String {
        let Some(qtype) = self.ctx.child(field, 0) else {
            return "void".into();
        };
        if element {
            if let Some(utype) = self.ctx.child(qtype, 0) {
                if matches!(
                    self.ctx.kind(utype),
                    NodeKind::Type(TypeKind::Vector | TypeKind::List | TypeKind::Set)
                ) {
                    if let Some(elem) = self.ctx.child(utype, 0) {
                        return self.cxx_type(elem);
                    }
                }
            }
        }
        self.cxx_type(qtype)
    }

    // ── Parser registration ──────────────────────────────────────────

    fn emit_parse_registration(&mut self, _decl: NodeId, data: &DeclData, struct_name: &str) {
        let unit_key = format!("{}::{}", self.module_id, data.id.local());
        if !self.ctx.grammars.contains_key(&unit_key) {
            return;
        }
        let public = matches!(data.linkage, Linkage::Public | Linkage::Export);
        self.init_lines.push(format!(
            "::spicy::rt::register_parser(\"{unit_key}\", /*public=*/{}, &parse_{struct_name});",
            if public { "true" } else { "false" }
        ));
        self.unit
            .linker_meta
            .joins
            .push(format!("parser:{unit_key}"));
    }

    // ── Parse functions ──────────────────────────────────────────────

    fn emit_parse_function(&mut self, fn_name: &str, local: &str, result: &str) {
        let unit_key = format!("{}::{}", self.module_id, local);
        let Some(grammar) = self.ctx.grammars.get(&unit_key).cloned() else {
            return;
        };
        if !grammar.is_finalized() {
            return;
        }
        let Some(root) = grammar.root() else {
            return;
        };

        // Locate the unit's struct type node for field/hook information.
        let struct_node = self.find_struct_decl(local);

        let mut lines = vec![
            "::hilti::rt::detail::check_stack();".to_string(),
            format!("{result} __unit{{}};"),
        ];
        if let Some(s) = struct_node {
            if self.has_unit_hook(s, HookKind::UnitInit) {
                lines.push(format!("on_{}_init(__unit);", cxx_id(local)));
            }
        }
        self.self_name = "__unit".into();
        self.emit_production(&grammar, root, &unit_key, struct_node, &mut lines, 0);
        self.self_name = "self".into();
        if let Some(s) = struct_node {
            if self.has_unit_hook(s, HookKind::UnitDone) {
                lines.push(format!("on_{}_done(__unit);", cxx_id(local)));
            }
        }
        lines.push("return __unit;".to_string());

        self.unit.add_function(
            &format!("{result} {fn_name}(hilti::rt::stream::View& data)"),
            lines,
        );
    }

    fn find_struct_decl(&self, local: &str) -> Option<NodeId> {
        for child in self.ctx.children(self.module).into_iter().flatten() {
            if let Some(d) = self.ctx.decl(child) {
                if matches!(d.kind, DeclKind::Type { .. }) && d.id.local() == local {
                    let q = self.ctx.child(child, 0)?;
                    return self.ctx.child(q, 0);
                }
            }
        }
        None
    }

    fn has_unit_hook(&self, utype: NodeId, kind: HookKind) -> bool {
        self.ctx.children(utype).into_iter().flatten().any(|c| {
            matches!(
                self.ctx.decl(c).map(|d| d.kind.clone()),
                Some(DeclKind::Hook { kind: k }) if k == kind
            )
        })
    }

    /// Field name of a production symbol, e.g. `P::Msg::len` -> `len`.
    fn field_of_symbol<'s>(&self, unit_key: &str, symbol: &'s str) -> Option<&'s str> {
        let rest = symbol.strip_prefix(unit_key)?.strip_prefix("::")?;
        let name = rest.split("::").next()?;
        Some(name)
    }

    fn field_node(&self, struct_node: Option<NodeId>, name: &str) -> Option<NodeId> {
        let s = struct_node?;
        self.struct_fields(s)
            .into_iter()
            .find(|&f| self.ctx.decl(f).map(|d| d.id.local() == name).unwrap_or(false))
    }

    fn emit_production(
        &mut self,
        g: &Grammar,
        p: ProdId,
        unit_key: &str,
        struct_node: Option<NodeId>,
        out: &mut Vec<String>,
        depth: usize,
    ) {
        if depth > 64 {
            return;
        }
        let prod = g.get(p).clone();
        let field_name = self
            .field_of_symbol(unit_key, &prod.symbol)
            .map(str::to_string);
        let field = field_name
            .as_deref()
            .and_then(|n| self.field_node(struct_node, n));

        match prod.kind {
            ProdKind::Epsilon => {}
            ProdKind::Reference { .. } | ProdKind::Deferred { .. } => {
                // Back-edges are realized by the enclosing loop structure.
            }
            ProdKind::Sequence { elements } => {
                for e in elements {
                    self.emit_production(g, e, unit_key, struct_node, out, depth + 1);
                }
            }
            ProdKind::Ctor { literal } => {
                out.push(format!(
                    "::spicy::rt::expect_literal(data, {});",
                    bytes_literal(&literal)
                ));
            }
            ProdKind::Variable { .. } | ProdKind::TypeLiteral { .. } => {
                let Some(expr) = self.parse_value_expr(&prod.kind, field) else {
                    return;
                };
                match (&field_name, field) {
                    (Some(name), Some(f)) if !name.starts_with("_anon") => {
                        let cname = cxx_id(name);
                        out.push(format!("__unit.{cname} = {expr};"));
                        self.emit_field_hook_call(f, &format!("__unit.{cname}"), local_of(unit_key), out);
                    }
                    _ => out.push(format!("(void)({expr});")),
                }
            }
            ProdKind::LookAhead {
                alt_a,
                alt_b,
                condition,
                ..
            } => {
                if let Some(attr) = condition {
                    self.emit_conditional_loop(g, p, attr, unit_key, struct_node, out, depth);
                } else {
                    self.emit_first_dispatch(g, alt_a, alt_b, unit_key, struct_node, out, depth);
                }
            }
        }
    }

    /// The expression reading one value of a production from `data`.
    fn parse_value_expr(&mut self, kind: &ProdKind, field: Option<NodeId>) -> Option<String> {
        match kind {
            ProdKind::Variable { token, type_node } => {
                if let Some(rest) = token.strip_prefix("regexp(") {
                    let pattern = rest.trim_end_matches(')');
                    return Some(format!(
                        "::spicy::rt::match_token(data, \"{}\")",
                        escape_cxx(pattern)
                    ));
                }
                if token.starts_with("uint(") || token.starts_with("int(") {
                    let width: u32 = token
                        .trim_end_matches(')')
                        .split('(')
                        .nth(1)
                        .and_then(|w| w.parse().ok())
                        .unwrap_or(8);
                    let order = self.byte_order_of(field);
                    let fam = if token.starts_with("uint") { "uint" } else { "int" };
                    return Some(format!(
                        "::spicy::rt::unpack_{fam}{width}(data, {order})"
                    ));
                }
                if token == "address" {
                    let order = self.byte_order_of(field);
                    return Some(format!(
                        "::spicy::rt::unpack_address(data, ::hilti::rt::AddressFamily::IPv4, {order})"
                    ));
                }
                if token == "real" {
                    let order = self.byte_order_of(field);
                    return Some(format!("::spicy::rt::unpack_real(data, {order})"));
                }
                if token.starts_with("bitfield(") {
                    let order = self.byte_order_of(field);
                    return Some(format!("::spicy::rt::unpack_uint64(data, {order})"));
                }
                // Unconstrained bytes: length driven by &size or &eod.
                if let Some(f) = field {
                    if let Some(size) = find_attr(self.ctx, f, "size") {
                        if let Some(v) = self.ctx.child(size, 0) {
                            let v = self.emit_expr(v);
                            return Some(format!(
                                "::spicy::rt::extract_bytes(data, static_cast<std::uint64_t>({v}))"
                            ));
                        }
                    }
                    if find_attr(self.ctx, f, "eod").is_some() {
                        return Some("::spicy::rt::extract_all(data)".into());
                    }
                }
                let _ = type_node;
                Some("::spicy::rt::extract_all(data)".into())
            }
            ProdKind::TypeLiteral { token, .. } => {
                if let Some(rest) = token.strip_prefix("unit(") {
                    let id = rest.trim_end_matches(')');
                    let local = id.rsplit("::").next().unwrap_or(id);
                    return Some(format!("parse_{}(data)", cxx_id(local)));
                }
                Some("::spicy::rt::extract_all(data)".into())
            }
            _ => None,
        }
    }

    fn byte_order_of(&mut self, field: Option<NodeId>) -> String {
        let tag = field
            .and_then(|f| find_attr(self.ctx, f, "byte-order"))
            .and_then(|a| self.ctx.child(a, 0))
            .map(|v| self.emit_expr(v));
        match tag.as_deref() {
            Some(t) if t.contains("Little") => "::hilti::rt::ByteOrder::Little".into(),
            Some(t) if t.contains("Host") => "::hilti::rt::ByteOrder::Host".into(),
            _ => "::hilti::rt::ByteOrder::Big".into(),
        }
    }

    fn emit_field_hook_call(
        &mut self,
        field: NodeId,
        value_expr: &str,
        unit_local: &str,
        out: &mut Vec<String>,
    ) {
        let has_value_hook = self
            .hooks_of(field)
            .iter()
            .any(|(k, _)| *k == HookKind::Field);
        if has_value_hook {
            let fname = self
                .ctx
                .decl(field)
                .map(|d| cxx_id(d.id.local()))
                .unwrap_or_default();
            out.push(format!(
                "on_{}_{fname}_value(__unit, {value_expr});",
                cxx_id(unit_local)
            ));
        }
    }

    /// Loops selected by a field attribute: `&count` counts iterations,
    /// `&until`/`&until-including`/`&while` test `$$`, `&eod` runs to the
    /// end of the input.
    #[allow(clippy::too_many_arguments)]
    fn emit_conditional_loop(
        &mut self,
        g: &Grammar,
        la: ProdId,
        attr: NodeId,
        unit_key: &str,
        struct_node: Option<NodeId>,
        out: &mut Vec<String>,
        depth: usize,
    ) {
        let (tag, value) = match self.ctx.kind(attr).clone() {
            NodeKind::Attribute { tag } => (tag, self.ctx.child(attr, 0)),
            _ => return,
        };
        let prod = g.get(la).clone();
        let field_name = self
            .field_of_symbol(unit_key, &prod.symbol)
            .map(str::to_string)
            .unwrap_or_default();
        let field = self.field_node(struct_node, &field_name);
        let cname = cxx_id(&field_name);

        // The loop body parses one element into `__dd`.
        let elem_expr = self.loop_elem_expr(g, la, field);
        let Some(elem_expr) = elem_expr else { return };
        let foreach = field
            .map(|f| {
                self.hooks_of(f)
                    .iter()
                    .any(|(k, _)| *k == HookKind::ForEach)
            })
            .unwrap_or(false);
        let parse_line = format!("auto __dd = {elem_expr};");
        let foreach_line = foreach.then(|| {
            format!(
                "on_{}_{cname}_foreach(__unit, __dd);",
                cxx_id(local_of(unit_key))
            )
        });
        let push_line = format!("__unit.{cname}.push_back(__dd);");

        // An accepted element runs the foreach hook, then is appended.
        let accept = |out: &mut Vec<String>| {
            if let Some(l) = &foreach_line {
                out.push(format!("    {l}"));
            }
            out.push(format!("    {push_line}"));
        };

        match tag.as_str() {
            "count" => {
                let count = value.map(|v| self.emit_expr(v)).unwrap_or_else(|| "0".into());
                out.push(format!(
                    "for (std::uint64_t __i = 0; __i < static_cast<std::uint64_t>({count}); ++__i) {{"
                ));
                out.push(format!("    {parse_line}"));
                accept(out);
                out.push("}".into());
            }
            "eod" => {
                out.push("while (! ::spicy::rt::at_eod(data)) {".into());
                out.push(format!("    {parse_line}"));
                accept(out);
                out.push("}".into());
            }
            // `&while` keeps elements only while the condition holds; the
            // first element that fails is discarded.
            "while" => {
                let cond = value.map(|v| self.emit_expr(v)).unwrap_or_else(|| "true".into());
                out.push("while (true) {".into());
                out.push(format!("    {parse_line}"));
                out.push(format!("    if (! ({cond})) break;"));
                accept(out);
                out.push("}".into());
            }
            // `&until` stops on the matching element and excludes it.
            "until" => {
                let cond = value.map(|v| self.emit_expr(v)).unwrap_or_else(|| "true".into());
                out.push("while (true) {".into());
                out.push(format!("    {parse_line}"));
                out.push(format!("    if ({cond}) break;"));
                accept(out);
                out.push("}".into());
            }
            // `&until-including` stops on the matching element but keeps it.
            _ => {
                let cond = value.map(|v| self.emit_expr(v)).unwrap_or_else(|| "true".into());
                out.push("while (true) {".into());
                out.push(format!("    {parse_line}"));
                accept(out);
                out.push(format!("    if ({cond}) break;"));
                out.push("}".into());
            }
        }
        let _ = depth;
    }

    /// The parse expression of a loop's element production.
    fn loop_elem_expr(&mut self, g: &Grammar, la: ProdId, field: Option<NodeId>) -> Option<String> {
        let ProdKind::LookAhead { alt_a, .. } = g.get(la).kind.clone() else {
            return None;
        };
        let ProdKind::Sequence { elements } = g.get(alt_a).kind.clone() else {
            return None;
        };
        let elem = *elements.first()?;
        self.parse_value_expr(&g.get(elem).kind.clone(), field)
    }

    /// FIRST-set dispatch for a genuine look-ahead choice: peek at the
    /// input, compare against each alternative's literal FIRST set.
    #[allow(clippy::too_many_arguments)]
    fn emit_first_dispatch(
        &mut self,
        g: &Grammar,
        alt_a: ProdId,
        alt_b: ProdId,
        unit_key: &str,
        struct_node: Option<NodeId>,
        out: &mut Vec<String>,
        depth: usize,
    ) {
        let lits_a = literal_first(g, alt_a);
        out.push(format!(
            "if (::spicy::rt::lookahead_matches(data, {{{}}})) {{",
            lits_a
                .iter()
                .map(|l| bytes_literal(l))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        let mut inner_a = Vec::new();
        self.emit_production(g, alt_a, unit_key, struct_node, &mut inner_a, depth + 1);
        for l in inner_a {
            out.push(format!("    {l}"));
        }
        out.push("} else {".into());
        let mut inner_b = Vec::new();
        self.emit_production(g, alt_b, unit_key, struct_node, &mut inner_b, depth + 1);
        for l in inner_b {
            out.push(format!("    {l}"));
        }
        out.push("}".into());
    }

    // ── Statements ───────────────────────────────────────────────────

    fn emit_block_into(&mut self, block: NodeId, out: &mut Vec<String>, depth: usize) {
        if depth > 64 {
            return;
        }
        for stmt in self.ctx.children(block).into_iter().flatten() {
            self.emit_stmt(stmt, out, depth);
        }
    }

    fn emit_stmt(&mut self, stmt: NodeId, out: &mut Vec<String>, depth: usize) {
        let kind = match self.ctx.kind(stmt) {
            NodeKind::Stmt(k) => k.clone(),
            _ => return,
        };
        match kind {
            StmtKind::Block => {
                out.push("{".into());
                let mut inner = Vec::new();
                self.emit_block_into(stmt, &mut inner, depth + 1);
                for l in inner {
                    out.push(format!("    {l}"));
                }
                out.push("}".into());
            }
            StmtKind::Expression => {
                if let Some(e) = self.ctx.child(stmt, 0) {
                    let e = self.emit_expr(e);
                    out.push(format!("{e};"));
                }
            }
            StmtKind::Declaration => {
                if let Some(decl) = self.ctx.child(stmt, 0) {
                    let name = self
                        .ctx
                        .decl(decl)
                        .map(|d| cxx_id(d.id.local()))
                        .unwrap_or_default();
                    let ty = match self.ctx.child(decl, 0) {
                        Some(q) => self.cxx_type(q),
                        None => "auto".into(),
                    };
                    match self.ctx.child(decl, 1) {
                        Some(init) => {
                            let init = self.emit_expr(init);
                            if ty == "auto" {
                                out.push(format!("auto {name} = {init};"));
                            } else {
                                out.push(format!("{ty} {name} = {init};"));
                            }
                        }
                        None => out.push(format!("{ty} {name}{{}};")),
                    }
                }
            }
            StmtKind::Return => match self.ctx.child(stmt, 0) {
                Some(e) => {
                    let e = self.emit_expr(e);
                    out.push(format!("return {e};"));
                }
                None => out.push("return;".into()),
            },
            StmtKind::If => {
                let cond = self
                    .ctx
                    .child(stmt, 1)
                    .map(|c| self.emit_expr(c))
                    .unwrap_or_else(|| "false".into());
                out.push(format!("if ({cond}) {{"));
                if let Some(then_block) = self.ctx.child(stmt, 2) {
                    let mut inner = Vec::new();
                    self.emit_block_into(then_block, &mut inner, depth + 1);
                    for l in inner {
                        out.push(format!("    {l}"));
                    }
                }
                if let Some(else_block) = self.ctx.child(stmt, 3) {
                    out.push("} else {".into());
                    let mut inner = Vec::new();
                    self.emit_block_into(else_block, &mut inner, depth + 1);
                    for l in inner {
                        out.push(format!("    {l}"));
                    }
                }
                out.push("}".into());
            }
            StmtKind::While => {
                let cond = self
                    .ctx
                    .child(stmt, 1)
                    .map(|c| self.emit_expr(c))
                    .unwrap_or_else(|| "false".into());
                out.push(format!("while ({cond}) {{"));
                if let Some(body) = self.ctx.child(stmt, 2) {
                    let mut inner = Vec::new();
                    self.emit_block_into(body, &mut inner, depth + 1);
                    for l in inner {
                        out.push(format!("    {l}"));
                    }
                }
                out.push("}".into());
            }
            StmtKind::Switch => {
                // Lowered as an if/else-if chain over the condition value,
                // which also covers non-integral conditions.
                out.push("{".into());
                let mut inner: Vec<String> = Vec::new();
                if let Some(init) = self.ctx.child(stmt, 0) {
                    let name = self
                        .ctx
                        .decl(init)
                        .map(|d| cxx_id(d.id.local()))
                        .unwrap_or_default();
                    if let Some(value) = self.ctx.child(init, 1) {
                        let value = self.emit_expr(value);
                        inner.push(format!("auto {name} = {value};"));
                    }
                }
                let cond = self
                    .ctx
                    .child(stmt, 1)
                    .map(|c| self.emit_expr(c))
                    .unwrap_or_else(|| "false".into());
                inner.push(format!("const auto& __switch = {cond};"));

                let cases: Vec<NodeId> =
                    self.ctx.children(stmt).into_iter().skip(2).flatten().collect();
                let mut guarded: Vec<(String, NodeId)> = Vec::new();
                let mut default_body: Option<NodeId> = None;
                for case in cases {
                    match self.ctx.child(case, 0) {
                        Some(guard) => {
                            let g = self.emit_expr(guard);
                            if let Some(body) = self.ctx.child(case, 1) {
                                guarded.push((g, body));
                            }
                        }
                        None => default_body = self.ctx.child(case, 1),
                    }
                }

                for (i, (guard, body)) in guarded.iter().enumerate() {
                    let opener = if i == 0 {
                        format!("if (__switch == ({guard})) {{")
                    } else {
                        format!("}} else if (__switch == ({guard})) {{")
                    };
                    inner.push(opener);
                    let mut lines = Vec::new();
                    self.emit_block_into(*body, &mut lines, depth + 1);
                    for l in lines {
                        inner.push(format!("    {l}"));
                    }
                }
                if let Some(body) = default_body {
                    inner.push(if guarded.is_empty() {
                        "{".into()
                    } else {
                        "} else {".into()
                    });
                    let mut lines = Vec::new();
                    self.emit_block_into(body, &mut lines, depth + 1);
                    for l in lines {
                        inner.push(format!("    {l}"));
                    }
                }
                if !guarded.is_empty() || default_body.is_some() {
                    inner.push("}".into());
                }

                for l in inner {
                    out.push(format!("    {l}"));
                }
                out.push("}".into());
            }
            // Emitted by the enclosing switch.
            StmtKind::SwitchCase => {}
            StmtKind::Print => {
                if let Some(e) = self.ctx.child(stmt, 0) {
                    let e = self.emit_expr(e);
                    out.push(format!("::hilti::rt::print({e});"));
                }
            }
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn emit_expr(&mut self, expr: NodeId) -> String {
        let kind = match self.ctx.kind(expr) {
            NodeKind::Expr(k) => k.clone(),
            NodeKind::Ctor(k) => return self.emit_ctor(expr, &k.clone()),
            _ => return "/*?*/".into(),
        };
        match kind {
            ExprKind::Ctor => match self.ctx.child(expr, 0) {
                Some(c) => self.emit_expr(c),
                None => "/*?*/".into(),
            },
            ExprKind::Name { id } => cxx_id(id.local()),
            ExprKind::SelfRef => self.self_name.clone(),
            ExprKind::DollarDollar => "__dd".into(),
            ExprKind::TypeValue => match self.ctx.child(expr, 0) {
                Some(q) => self.cxx_type(q),
                None => "void".into(),
            },
            ExprKind::Member { id } => {
                let recv = match self.ctx.child(expr, 0) {
                    Some(r) => self.emit_expr(r),
                    None => self.self_name.clone(),
                };
                format!("{recv}.{}", cxx_id(&id))
            }
            ExprKind::TryMember { id } => {
                let recv = match self.ctx.child(expr, 0) {
                    Some(r) => self.emit_expr(r),
                    None => self.self_name.clone(),
                };
                // `.?` turns an unset attribute into an empty optional.
                format!(
                    "::spicy::rt::try_member({recv}, [](auto&& __o) {{ return __o.{}; }})",
                    cxx_id(&id)
                )
            }
            ExprKind::Assign => {
                let lhs = self
                    .ctx
                    .child(expr, 0)
                    .map(|n| self.emit_expr(n))
                    .unwrap_or_default();
                let rhs = self
                    .ctx
                    .child(expr, 1)
                    .map(|n| self.emit_expr(n))
                    .unwrap_or_default();
                format!("{lhs} = {rhs}")
            }
            ExprKind::ResolvedOperator { op, .. } => self.emit_operator(expr, op, 1),
            ExprKind::UnresolvedOperator { op } => {
                self.diagnostics.push(Diagnostic::error(
                    self.ctx.meta(expr).span,
                    format!("internal: unresolved operator '{op}' reached the emitter"),
                ));
                "/*unresolved*/".into()
            }
        }
    }

    fn emit_operator(&mut self, expr: NodeId, op: OperatorKind, first: usize) -> String {
        let operand_children: Vec<_> = (first..self.ctx.num_children(expr))
            .filter_map(|i| self.ctx.child(expr, i))
            .collect();
        let operands: Vec<String> = operand_children
            .into_iter()
            .map(|o| self.emit_expr(o))
            .collect();
        let infix = |sym: &str| -> String {
            if operands.len() == 2 {
                format!("({} {} {})", operands[0], sym, operands[1])
            } else {
                "/*?*/".into()
            }
        };
        match op {
            OperatorKind::Add => infix("+"),
            OperatorKind::Difference => infix("-"),
            OperatorKind::Multiple => infix("*"),
            OperatorKind::Division => infix("/"),
            OperatorKind::Modulo => infix("%"),
            OperatorKind::Equal => infix("=="),
            OperatorKind::Unequal => infix("!="),
            OperatorKind::Lower => infix("<"),
            OperatorKind::LowerEqual => infix("<="),
            OperatorKind::Greater => infix(">"),
            OperatorKind::GreaterEqual => infix(">="),
            OperatorKind::LogicalAnd => infix("&&"),
            OperatorKind::LogicalOr => infix("||"),
            OperatorKind::Negate => match operands.first() {
                Some(o) => format!("(! {o})"),
                None => "/*?*/".into(),
            },
            OperatorKind::Deref => match operands.first() {
                Some(o) => format!("(*{o})"),
                None => "/*?*/".into(),
            },
            OperatorKind::Index => {
                if operands.len() == 2 {
                    format!("{}[{}]", operands[0], operands[1])
                } else {
                    "/*?*/".into()
                }
            }
            OperatorKind::Size => match operands.first() {
                Some(o) => format!("{o}.size()"),
                None => "/*?*/".into(),
            },
            OperatorKind::Call | OperatorKind::MemberCall => {
                match operands.split_first() {
                    Some((callee, args)) => format!("{callee}({})", args.join(", ")),
                    None => "/*?*/".into(),
                }
            }
            OperatorKind::Member | OperatorKind::TryMember | OperatorKind::HasMember => {
                "/*?*/".into()
            }
        }
    }

    fn emit_ctor(&mut self, ctor: NodeId, kind: &CtorKind) -> String {
        match kind {
            CtorKind::Bool(v) => if *v { "true" } else { "false" }.into(),
            CtorKind::UInt { value, .. } => format!("{value}U"),
            CtorKind::SInt { value, .. } => format!("{value}"),
            CtorKind::Real(v) => format!("{v:?}"),
            CtorKind::String(s) => format!("std::string(\"{}\")", escape_cxx(s)),
            CtorKind::Bytes(b) => bytes_literal(b),
            CtorKind::RegExp(patterns) => format!(
                "::hilti::rt::RegExp(\"{}\")",
                escape_cxx(&patterns.join("|"))
            ),
            CtorKind::Port { port } => format!("::hilti::rt::Port({port})"),
            CtorKind::Null => "std::nullopt".into(),
            _ => {
                let _ = ctor;
                "/*ctor*/".into()
            }
        }
    }
}

fn local_of(unit_key: &str) -> &str {
    unit_key.rsplit("::").next().unwrap_or(unit_key)
}

fn literal_first(g: &Grammar, p: ProdId) -> Vec<Vec<u8>> {
    g.get(p)
        .first
        .iter()
        .filter_map(|t| match t {
            Terminal::Literal(b) => Some(b.clone()),
            _ => None,
        })
        .collect()
}

fn escape_cxx(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '"' => vec!['\\', '"'],
            '\\' => vec!['\\', '\\'],
            '\n' => vec!['\\', 'n'],
            c => vec![c],
        })
        .collect()
}

fn bytes_literal(b: &[u8]) -> String {
    let mut s = String::from("::hilti::rt::Bytes(\"");
    for &byte in b {
        if byte.is_ascii_alphanumeric() || byte == b' ' {
            s.push(byte as char);
        } else {
            s.push_str(&format!("\\x{byte:02x}"));
        }
    }
    s.push_str("\")");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve;
    use std::path::PathBuf;

    fn compile(source: &str) -> (AstContext, NodeId) {
        let mut ctx = AstContext::new();
        let outcome = crate::parser::parse_spicy(&mut ctx, source, &PathBuf::from("t.spicy"));
        assert!(outcome.errors.is_empty(), "{:#?}", outcome.errors);
        let module = outcome.module.unwrap();
        for _ in 0..8 {
            let mut changed = resolve::build_scopes(&mut ctx, module);
            changed |= resolve::resolve(&mut ctx, module);
            if !changed {
                break;
            }
        }
        crate::transform::transform(&mut ctx, module);
        for _ in 0..8 {
            let mut changed = resolve::build_scopes(&mut ctx, module);
            changed |= resolve::resolve(&mut ctx, module);
            if !changed {
                break;
            }
        }
        (ctx, module)
    }

    fn generate(source: &str) -> String {
        let (mut ctx, module) = compile(source);
        let result = codegen_module(&mut ctx, module, &CodegenOptions::default());
        assert!(
            result.diagnostics.is_empty(),
            "{:#?}",
            result.diagnostics
        );
        result.unit.format()
    }

    #[test]
    fn emits_struct_and_parse_function() {
        let cpp = generate(
            r#"
            module P;
            public type Msg = unit {
                : b"HI";
                len: uint8;
                body: bytes &size=3;
            };
            "#,
        );
        assert!(cpp.contains("struct Msg {"));
        assert!(cpp.contains("hilti::rt::integer::safe<std::uint8_t> len{};"));
        assert!(cpp.contains("Msg parse_Msg(hilti::rt::stream::View& data)"));
        assert!(cpp.contains("::spicy::rt::expect_literal(data, ::hilti::rt::Bytes(\"HI\"));"));
        assert!(cpp.contains("__unit.len = ::spicy::rt::unpack_uint8(data, ::hilti::rt::ByteOrder::Big);"));
        assert!(cpp.contains("extract_bytes(data"));
        assert!(cpp.contains("register_parser(\"P::Msg\""));
    }

    #[test]
    fn emitted_names_are_cxx_legal() {
        let cpp = generate(
            r#"
            module P;
            type Msg = unit {
                len: uint8;
            };
            "#,
        );
        // No scoped IDs may survive into emitted identifiers outside
        // comments and strings.
        for line in cpp.lines() {
            if line.trim_start().starts_with("//") || line.contains('"') {
                continue;
            }
            assert!(
                !line.contains("P::Msg"),
                "source-language ID leaked: {line}"
            );
        }
    }

    #[test]
    fn output_is_deterministic() {
        let src = r#"
            module P;
            type Msg = unit {
                a: uint16;
                b: uint32 &byte-order=Little;
            };
        "#;
        assert_eq!(generate(src), generate(src));
    }

    #[test]
    fn loop_with_count_attribute() {
        let cpp = generate(
            r#"
            module P;
            type Seq = unit {
                n: uint8;
                items: uint8[] &count=self.n;
            };
            "#,
        );
        assert!(cpp.contains("for (std::uint64_t __i = 0;"), "{cpp}");
        assert!(cpp.contains("__unit.items.push_back(__dd);"));
    }

    #[test]
    fn until_excludes_the_terminating_element() {
        let cpp = generate(
            r#"
            module P;
            type Seq = unit {
                items: uint8[] &until=($$ == 0);
            };
            "#,
        );
        // The matching element breaks the loop before being appended.
        let brk = cpp.find("if ((__dd == 0U)) break;").expect("break line");
        let push = cpp
            .find("__unit.items.push_back(__dd);")
            .expect("push line");
        assert!(brk < push, "{cpp}");
    }

    #[test]
    fn until_including_keeps_the_terminating_element() {
        let cpp = generate(
            r#"
            module P;
            type Seq = unit {
                items: uint8[] &until-including=($$ == 0);
            };
            "#,
        );
        // The matching element is appended, then the loop breaks.
        let brk = cpp.find("if ((__dd == 0U)) break;").expect("break line");
        let push = cpp
            .find("__unit.items.push_back(__dd);")
            .expect("push line");
        assert!(push < brk, "{cpp}");
    }

    #[test]
    fn while_attribute_discards_failing_element() {
        let cpp = generate(
            r#"
            module P;
            type Seq = unit {
                items: uint8[] &while=($$ < 10);
            };
            "#,
        );
        let brk = cpp.find("if (! ((__dd < 10U))) break;").expect("break line");
        let push = cpp
            .find("__unit.items.push_back(__dd);")
            .expect("push line");
        assert!(brk < push, "{cpp}");
    }

    #[test]
    fn switch_statement_emits_if_chain() {
        let cpp = generate(
            r#"
            module M;
            function pick(x: uint64) : uint64 {
                switch (local v = x) {
                    case 1 { return 10; }
                    case 2 { return 20; }
                    default { return 0; }
                }
                return 0;
            }
            "#,
        );
        assert!(cpp.contains("auto v = x;"), "{cpp}");
        assert!(cpp.contains("const auto& __switch = v;"), "{cpp}");
        let c1 = cpp.find("if (__switch == (1U)) {").expect("first case");
        let c2 = cpp
            .find("} else if (__switch == (2U)) {")
            .expect("second case");
        let dfl = cpp.find("} else {").expect("default case");
        assert!(c1 < c2 && c2 < dfl, "{cpp}");
        assert!(cpp.contains("return 20U;"), "{cpp}");
    }

    #[test]
    fn hooks_emit_and_get_called() {
        let cpp = generate(
            r#"
            module P;
            type Msg = unit {
                len: uint8;
                on len { print $$; }
                on %done { print self; }
            };
            "#,
        );
        assert!(cpp.contains("void on_Msg_len_value(Msg& __self"));
        assert!(cpp.contains("on_Msg_len_value(__unit, __unit.len);"));
        assert!(cpp.contains("void on_Msg_done(Msg& __self)"));
        assert!(cpp.contains("on_Msg_done(__unit);"));
        assert!(cpp.contains("::hilti::rt::print(__dd);"));
    }

    #[test]
    fn global_lands_in_linker_metadata() {
        let (mut ctx, module) = compile(
            r#"
            module P;
            global count: uint64 = 0;
            "#,
        );
        let result = codegen_module(&mut ctx, module, &CodegenOptions::default());
        assert!(result
            .unit
            .linker_meta
            .globals
            .iter()
            .any(|g| g.contains("count")));
        let cpp = result.unit.format();
        assert!(cpp.contains("hlt_P_hlto_init()"));
        assert!(cpp.contains("count = 0U;"));
    }
}
