// printer.rs — HILTI AST printing
//
// Renders a (resolved) HILTI AST back to surface syntax that the parser
// accepts, such that re-parsing yields a unification-identical AST.
// Expressions print fully parenthesized; the printer never relies on
// precedence. Spicy-level sugar is gone by the time this runs (the
// transform already lowered it), so the printer only knows HILTI shapes.

use std::fmt::Write as _;

use crate::ast::*;
use crate::node::{AstContext, NodeId};

/// Plugin hook: print one node. Returns false for kinds this printer does
/// not own (Spicy units).
pub fn print_node(ctx: &AstContext, node: NodeId, out: &mut String) -> bool {
    let mut p = Printer {
        ctx,
        out,
        indent: 0,
    };
    p.node(node)
}

/// Plugin hook: print an ID.
pub fn print_id(id: &Id, out: &mut String) -> bool {
    out.push_str(id.as_str());
    true
}

/// Convenience: print a whole module to a string.
pub fn print_module(ctx: &AstContext, module: NodeId) -> String {
    let mut out = String::new();
    print_node(ctx, module, &mut out);
    out
}

struct Printer<'a> {
    ctx: &'a AstContext,
    out: &'a mut String,
    indent: usize,
}

impl Printer<'_> {
    fn pad(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn node(&mut self, id: NodeId) -> bool {
        match self.ctx.kind(id).clone() {
            NodeKind::Decl(data) => self.decl(id, &data),
            NodeKind::QualifiedType { .. } => match self.ctx.child(id, 0) {
                Some(inner) => self.node(inner),
                None => false,
            },
            NodeKind::Type(kind) => self.type_(id, &kind),
            NodeKind::Expr(kind) => self.expr(id, &kind),
            NodeKind::Stmt(kind) => self.stmt(id, &kind),
            NodeKind::Ctor(kind) => self.ctor(id, &kind),
            _ => false,
        }
    }

    // ── Declarations ─────────────────────────────────────────────────

    fn decl(&mut self, id: NodeId, data: &DeclData) -> bool {
        match &data.kind {
            DeclKind::Module => {
                let _ = writeln!(self.out, "module {} {{", data.id.local());
                self.indent += 1;
                for child in self.ctx.children(id).into_iter().flatten() {
                    self.pad();
                    if !self.node(child) {
                        self.out.push_str("# <unprintable>");
                    }
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.out.push('}');
                self.out.push('\n');
                true
            }
            DeclKind::ImportedModule { .. } => {
                let _ = write!(self.out, "import {};", data.id);
                true
            }
            DeclKind::Constant => {
                let _ = write!(self.out, "const {}", data.id.local());
                if let Some(qtype) = self.ctx.child(id, 0) {
                    self.out.push_str(": ");
                    self.node(qtype);
                }
                self.out.push_str(" = ");
                if let Some(value) = self.ctx.child(id, 1) {
                    self.node(value);
                }
                self.out.push(';');
                true
            }
            DeclKind::GlobalVariable => {
                let _ = write!(self.out, "global {}: ", data.id.local());
                if let Some(qtype) = self.ctx.child(id, 0) {
                    self.node(qtype);
                }
                if let Some(init) = self.ctx.child(id, 1) {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                self.out.push(';');
                true
            }
            DeclKind::LocalVariable => {
                let _ = write!(self.out, "local {}: ", data.id.local());
                if let Some(qtype) = self.ctx.child(id, 0) {
                    self.node(qtype);
                }
                if let Some(init) = self.ctx.child(id, 1) {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                self.out.push(';');
                true
            }
            DeclKind::Type { .. } => {
                if matches!(data.linkage, Linkage::Public | Linkage::Export) {
                    self.out.push_str("public ");
                }
                let _ = write!(self.out, "type {} = ", data.id.local());
                if let Some(qtype) = self.ctx.child(id, 0) {
                    if !self.node(qtype) {
                        return false;
                    }
                }
                self.out.push(';');
                true
            }
            DeclKind::Function => {
                if matches!(data.linkage, Linkage::Public | Linkage::Export) {
                    self.out.push_str("public ");
                }
                let _ = write!(self.out, "function {}(", data.id.local());
                let ftype = match self.ctx.child(id, 0) {
                    Some(f) => f,
                    None => return false,
                };
                let params: Vec<NodeId> = (1..self.ctx.num_children(ftype))
                    .filter_map(|i| self.ctx.child(ftype, i))
                    .collect();
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    if let Some(pd) = self.ctx.decl(*p) {
                        if let DeclKind::Parameter { kind } = pd.kind {
                            match kind {
                                ParamKind::InOut => self.out.push_str("inout "),
                                ParamKind::Copy => self.out.push_str("copy "),
                                ParamKind::In => {}
                            }
                        }
                        let _ = write!(self.out, "{}: ", pd.id.local());
                    }
                    if let Some(pq) = self.ctx.child(*p, 0) {
                        self.node(pq);
                    }
                }
                self.out.push_str(") : ");
                if let Some(result) = self.ctx.child(ftype, 0) {
                    self.node(result);
                }
                self.out.push(' ');
                match self.ctx.child(id, 1) {
                    Some(body) => self.node(body),
                    None => {
                        self.out.push_str("{ }");
                        true
                    }
                };
                true
            }
            DeclKind::Parameter { .. } | DeclKind::Field | DeclKind::Hook { .. }
            | DeclKind::Expression => false,
        }
    }

    // ── Types ────────────────────────────────────────────────────────

    fn type_(&mut self, id: NodeId, kind: &TypeKind) -> bool {
        match kind {
            TypeKind::UInt(w) => {
                let _ = write!(self.out, "uint{w}");
            }
            TypeKind::SInt(w) => {
                let _ = write!(self.out, "int{w}");
            }
            TypeKind::Real => self.out.push_str("real"),
            TypeKind::Bool => self.out.push_str("bool"),
            TypeKind::Bytes => self.out.push_str("bytes"),
            TypeKind::Stream => self.out.push_str("stream"),
            TypeKind::RegExp => self.out.push_str("regexp"),
            TypeKind::Address => self.out.push_str("addr"),
            TypeKind::Port => self.out.push_str("port"),
            TypeKind::Interval => self.out.push_str("interval"),
            TypeKind::Time => self.out.push_str("time"),
            TypeKind::String => self.out.push_str("string"),
            TypeKind::Void => self.out.push_str("void"),
            TypeKind::Auto => self.out.push_str("auto"),
            TypeKind::Optional => return self.wrap("optional", id),
            TypeKind::Vector => return self.wrap("vector", id),
            TypeKind::List => return self.wrap("list", id),
            TypeKind::Set => return self.wrap("set", id),
            TypeKind::Map => {
                self.out.push_str("map<");
                if let Some(k) = self.ctx.child(id, 0) {
                    self.node(k);
                }
                self.out.push_str(", ");
                if let Some(v) = self.ctx.child(id, 1) {
                    self.node(v);
                }
                self.out.push('>');
            }
            TypeKind::Tuple { labels } => {
                self.out.push_str("tuple<");
                for i in 0..labels.len() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    if let Some(e) = self.ctx.child(id, i) {
                        self.node(e);
                    }
                }
                self.out.push('>');
            }
            TypeKind::Struct | TypeKind::Union => {
                self.out
                    .push_str(if matches!(kind, TypeKind::Struct) { "struct {" } else { "union {" });
                self.out.push(' ');
                for child in self.ctx.children(id).into_iter().flatten() {
                    let Some(data) = self.ctx.decl(child) else {
                        continue;
                    };
                    if !matches!(data.kind, DeclKind::Field) {
                        continue;
                    }
                    let _ = write!(self.out, "{}: ", data.id.local());
                    if let Some(q) = self.ctx.child(child, 0) {
                        self.node(q);
                    }
                    self.out.push_str("; ");
                }
                self.out.push('}');
            }
            TypeKind::Enum { labels } => {
                self.out.push_str("enum { ");
                for (i, (name, ordinal)) in labels.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    let _ = write!(self.out, "{name} = {ordinal}");
                }
                self.out.push_str(" }");
            }
            TypeKind::Bitfield { width, bits } => {
                let _ = write!(self.out, "bitfield({width}) {{ ");
                for b in bits {
                    let _ = write!(self.out, "{}: {}..{}; ", b.id, b.lower, b.upper);
                }
                self.out.push('}');
            }
            TypeKind::Name { id: name } => self.out.push_str(name.as_str()),
            TypeKind::Function { .. }
            | TypeKind::StrongRef
            | TypeKind::WeakRef
            | TypeKind::ValueRef
            | TypeKind::Result
            | TypeKind::OperandList
            | TypeKind::Wildcard { .. } => return false,
            TypeKind::Unit => return false,
        }
        true
    }

    fn wrap(&mut self, tag: &str, id: NodeId) -> bool {
        let _ = write!(self.out, "{tag}<");
        if let Some(inner) = self.ctx.child(id, 0) {
            self.node(inner);
        }
        self.out.push('>');
        true
    }

    // ── Statements ───────────────────────────────────────────────────

    fn stmt(&mut self, id: NodeId, kind: &StmtKind) -> bool {
        match kind {
            StmtKind::Block => {
                self.out.push_str("{\n");
                self.indent += 1;
                for child in self.ctx.children(id).into_iter().flatten() {
                    self.pad();
                    self.node(child);
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.pad();
                self.out.push('}');
            }
            StmtKind::Expression => {
                if let Some(e) = self.ctx.child(id, 0) {
                    self.node(e);
                }
                self.out.push(';');
            }
            StmtKind::Declaration => {
                if let Some(d) = self.ctx.child(id, 0) {
                    self.node(d);
                }
            }
            StmtKind::Return => {
                self.out.push_str("return");
                if let Some(e) = self.ctx.child(id, 0) {
                    self.out.push(' ');
                    self.node(e);
                }
                self.out.push(';');
            }
            StmtKind::If => {
                self.out.push_str("if (");
                if let Some(cond) = self.ctx.child(id, 1) {
                    self.node(cond);
                }
                self.out.push_str(") ");
                if let Some(then_block) = self.ctx.child(id, 2) {
                    self.node(then_block);
                }
                if let Some(else_block) = self.ctx.child(id, 3) {
                    self.out.push_str(" else ");
                    self.node(else_block);
                }
            }
            StmtKind::While => {
                self.out.push_str("while (");
                if let Some(cond) = self.ctx.child(id, 1) {
                    self.node(cond);
                }
                self.out.push_str(") ");
                if let Some(body) = self.ctx.child(id, 2) {
                    self.node(body);
                }
            }
            StmtKind::Switch => {
                self.out.push_str("switch (");
                if let Some(init) = self.ctx.child(id, 0) {
                    let name = self
                        .ctx
                        .decl(init)
                        .map(|d| d.id.local().to_string())
                        .unwrap_or_default();
                    let _ = write!(self.out, "local {name} = ");
                    if let Some(value) = self.ctx.child(init, 1) {
                        self.node(value);
                    }
                } else if let Some(cond) = self.ctx.child(id, 1) {
                    self.node(cond);
                }
                self.out.push_str(") {\n");
                self.indent += 1;
                for case in self.ctx.children(id).into_iter().skip(2).flatten() {
                    self.pad();
                    match self.ctx.child(case, 0) {
                        Some(guard) => {
                            self.out.push_str("case ");
                            self.node(guard);
                            self.out.push(' ');
                        }
                        None => self.out.push_str("default "),
                    }
                    if let Some(body) = self.ctx.child(case, 1) {
                        self.node(body);
                    }
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.pad();
                self.out.push('}');
            }
            // Printed by the enclosing switch.
            StmtKind::SwitchCase => return false,
            StmtKind::Print => {
                self.out.push_str("print ");
                if let Some(e) = self.ctx.child(id, 0) {
                    self.node(e);
                }
                self.out.push(';');
            }
        }
        true
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn expr(&mut self, id: NodeId, kind: &ExprKind) -> bool {
        match kind {
            ExprKind::Name { id: name } => self.out.push_str(name.as_str()),
            ExprKind::SelfRef => self.out.push_str("self"),
            ExprKind::DollarDollar => self.out.push_str("$$"),
            ExprKind::Ctor => {
                if let Some(c) = self.ctx.child(id, 0) {
                    return self.node(c);
                }
                return false;
            }
            ExprKind::TypeValue => {
                if let Some(q) = self.ctx.child(id, 0) {
                    return self.node(q);
                }
                return false;
            }
            ExprKind::Member { id: member } => {
                if let Some(recv) = self.ctx.child(id, 0) {
                    self.node(recv);
                }
                let _ = write!(self.out, ".{member}");
            }
            ExprKind::TryMember { id: member } => {
                if let Some(recv) = self.ctx.child(id, 0) {
                    self.node(recv);
                }
                let _ = write!(self.out, ".?{member}");
            }
            ExprKind::Assign => {
                if let Some(target) = self.ctx.child(id, 0) {
                    self.node(target);
                }
                self.out.push_str(" = ");
                if let Some(value) = self.ctx.child(id, 1) {
                    self.node(value);
                }
            }
            ExprKind::UnresolvedOperator { op } => {
                return self.operator(id, *op, 0);
            }
            ExprKind::ResolvedOperator { op, .. } => {
                // Child 0 is the result type; operands follow.
                return self.operator(id, *op, 1);
            }
        }
        true
    }

    fn operator(&mut self, id: NodeId, op: OperatorKind, first_operand: usize) -> bool {
        let operands: Vec<NodeId> = (first_operand..self.ctx.num_children(id))
            .filter_map(|i| self.ctx.child(id, i))
            .collect();
        match op {
            OperatorKind::Negate => {
                self.out.push('!');
                if let Some(&o) = operands.first() {
                    self.node(o);
                }
            }
            OperatorKind::Index => {
                if operands.len() == 2 {
                    self.node(operands[0]);
                    self.out.push('[');
                    self.node(operands[1]);
                    self.out.push(']');
                } else {
                    return false;
                }
            }
            OperatorKind::Call | OperatorKind::MemberCall => {
                if let Some((&callee, args)) = operands.split_first() {
                    self.node(callee);
                    self.out.push('(');
                    for (i, &a) in args.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.node(a);
                    }
                    self.out.push(')');
                } else {
                    return false;
                }
            }
            _ => {
                if operands.len() == 2 {
                    self.out.push('(');
                    self.node(operands[0]);
                    let _ = write!(self.out, " {op} ");
                    self.node(operands[1]);
                    self.out.push(')');
                } else {
                    return false;
                }
            }
        }
        true
    }

    // ── Ctors ────────────────────────────────────────────────────────

    fn ctor(&mut self, _id: NodeId, kind: &CtorKind) -> bool {
        match kind {
            CtorKind::Bool(v) => self.out.push_str(if *v { "true" } else { "false" }),
            CtorKind::UInt { value, .. } => {
                let _ = write!(self.out, "{value}");
            }
            CtorKind::SInt { value, .. } => {
                let _ = write!(self.out, "{value}");
            }
            CtorKind::Real(v) => {
                // Keep a decimal point so re-lexing yields a real again.
                if v.fract() == 0.0 {
                    let _ = write!(self.out, "{v:.1}");
                } else {
                    let _ = write!(self.out, "{v}");
                }
            }
            CtorKind::String(s) => {
                let _ = write!(self.out, "\"{}\"", escape(s));
            }
            CtorKind::Bytes(b) => {
                let _ = write!(self.out, "b\"{}\"", escape(&String::from_utf8_lossy(b)));
            }
            CtorKind::RegExp(patterns) => {
                let _ = write!(self.out, "/{}/", patterns.join("|"));
            }
            CtorKind::Port { port } => {
                let _ = write!(self.out, "{port}");
            }
            _ => return false,
        }
        true
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
