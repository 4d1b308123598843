// unify.rs — Canonical type serialization
//
// Computes the unification string of a type: a tagged, recursive
// serialization such that two types are structurally equal iff their
// strings are equal. Named aggregates (struct, union, enum, unit) are
// referenced by their canonical ID only; aliases are transparent, with a
// visited-set occurs check that turns genuine recursion into a "cycle
// detected" outcome instead of looping.
//
// Plugins participate through their `unify_type` hook: each is tried in
// order until one reports that it handled the type. The HILTI plugin
// handles every standard kind through `serialize_standard`; the Spicy
// plugin handles units.

use crate::ast::{DeclKind, NodeKind, ParamKind, TypeKind};
use crate::node::{AstContext, NodeId};
use crate::plugin;

// ── Outcome ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnifyOutcome {
    /// The canonical serialization.
    Done(String),
    /// The type depends on something not yet resolved (`auto`, an unbound
    /// name); try again after the next resolver sweep.
    NotReady,
    /// Recursive type definition with no name to cut the recursion.
    Cycle(NodeId),
    /// Invariant violation, e.g. an un-preset wildcard.
    Internal(String),
}

/// Unify a type node, caching the result in the context on success.
pub fn unify(ctx: &mut AstContext, type_node: NodeId) -> UnifyOutcome {
    if let Some(cached) = ctx.unification(type_node) {
        return UnifyOutcome::Done(cached.to_string());
    }
    let outcome = {
        let mut unifier = Unifier::new(ctx);
        unifier.add_type(type_node);
        unifier.finish()
    };
    if let UnifyOutcome::Done(s) = &outcome {
        ctx.set_unification(type_node, s.clone());
    }
    outcome
}

/// Run unification across every live type node under `root`. Returns the
/// ids of nodes whose unification detected a definition cycle.
pub fn unify_all(ctx: &mut AstContext, root: NodeId) -> Vec<NodeId> {
    let mut cycles = Vec::new();
    let nodes = crate::visitor::collect(ctx, root);
    for id in nodes {
        if matches!(ctx.kind(id), NodeKind::Type(_)) {
            if let UnifyOutcome::Cycle(n) = unify(ctx, id) {
                cycles.push(n);
            }
        }
    }
    cycles
}

// ── Unifier ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum UState {
    Ok,
    NotReady,
    Cycle(NodeId),
    Internal(String),
}

pub struct Unifier<'c> {
    pub ctx: &'c AstContext,
    out: String,
    visited: Vec<NodeId>,
    state: UState,
}

impl<'c> Unifier<'c> {
    pub fn new(ctx: &'c AstContext) -> Self {
        Self {
            ctx,
            out: String::new(),
            visited: Vec::new(),
            state: UState::Ok,
        }
    }

    fn finish(self) -> UnifyOutcome {
        match self.state {
            UState::Ok => UnifyOutcome::Done(self.out),
            UState::NotReady => UnifyOutcome::NotReady,
            UState::Cycle(n) => UnifyOutcome::Cycle(n),
            UState::Internal(msg) => UnifyOutcome::Internal(msg),
        }
    }

    /// Append literal text to the serialization.
    pub fn add(&mut self, s: &str) {
        if self.state == UState::Ok {
            self.out.push_str(s);
        }
    }

    /// Mark the type as not unifiable yet.
    pub fn abort(&mut self) {
        if self.state == UState::Ok {
            self.state = UState::NotReady;
        }
    }

    /// Recurse into a type node. Accepts both qualified and unqualified
    /// types; qualification is transparent to unification.
    pub fn add_type(&mut self, node: NodeId) {
        if self.state != UState::Ok {
            return;
        }
        let utype = match self.ctx.kind(node) {
            NodeKind::QualifiedType { .. } => match self.ctx.child(node, 0) {
                Some(inner) => inner,
                None => {
                    self.state = UState::Internal("qualified type without inner type".into());
                    return;
                }
            },
            _ => node,
        };

        if self.visited.contains(&utype) {
            self.state = UState::Cycle(utype);
            return;
        }
        self.visited.push(utype);

        let mut handled = false;
        for p in plugin::plugins() {
            if let Some(hook) = p.unify_type {
                if hook(self, utype) {
                    handled = true;
                    break;
                }
            }
        }
        if !handled && self.state == UState::Ok {
            self.state = UState::Internal(format!(
                "no plugin unifies node {:?}",
                self.ctx.kind(utype)
            ));
        }
        self.visited.pop();
    }

    /// Serialization of every standard (HILTI-level) type kind. Returns
    /// false when the kind is not one this routine covers.
    pub fn serialize_standard(&mut self, utype: NodeId) -> bool {
        let NodeKind::Type(kind) = self.ctx.kind(utype).clone() else {
            return false;
        };
        match kind {
            TypeKind::UInt(w) => self.add(&format!("uint({w})")),
            TypeKind::SInt(w) => self.add(&format!("int({w})")),
            TypeKind::Real => self.add("real"),
            TypeKind::Bool => self.add("bool"),
            TypeKind::Bytes => self.add("bytes"),
            TypeKind::Stream => self.add("stream"),
            TypeKind::RegExp => self.add("regexp"),
            TypeKind::Address => self.add("address"),
            TypeKind::Port => self.add("port"),
            TypeKind::Interval => self.add("interval"),
            TypeKind::Time => self.add("time"),
            TypeKind::String => self.add("string"),
            TypeKind::Void => self.add("void"),
            TypeKind::Auto => self.abort(),

            TypeKind::Tuple { labels } => {
                self.add("tuple(");
                for (i, _) in labels.iter().enumerate() {
                    if i > 0 {
                        self.add(",");
                    }
                    if let Some(elem) = self.ctx.child(utype, i) {
                        self.add_type(elem);
                    }
                }
                self.add(")");
            }

            TypeKind::Struct => self.serialize_aggregate(utype, "struct"),
            TypeKind::Union => self.serialize_aggregate(utype, "union"),

            TypeKind::Enum { labels } => {
                if let Some(id) = self.aggregate_id(utype) {
                    self.add(&format!("enum({id})"));
                } else {
                    self.add("enum(");
                    for (i, (name, ordinal)) in labels.iter().enumerate() {
                        if i > 0 {
                            self.add(",");
                        }
                        self.add(&format!("{name}:{ordinal}"));
                    }
                    self.add(")");
                }
            }

            TypeKind::Optional => self.serialize_wrap(utype, "optional"),
            TypeKind::Result => self.serialize_wrap(utype, "result"),
            TypeKind::StrongRef => self.serialize_wrap(utype, "strong_ref"),
            TypeKind::WeakRef => self.serialize_wrap(utype, "weak_ref"),
            TypeKind::ValueRef => self.serialize_wrap(utype, "value_ref"),
            TypeKind::Set => self.serialize_wrap(utype, "set"),
            TypeKind::Vector => self.serialize_wrap(utype, "vector"),
            TypeKind::List => self.serialize_wrap(utype, "list"),

            TypeKind::Map => {
                self.add("map(");
                if let Some(k) = self.ctx.child(utype, 0) {
                    self.add_type(k);
                }
                self.add("->");
                if let Some(v) = self.ctx.child(utype, 1) {
                    self.add_type(v);
                }
                self.add(")");
            }

            TypeKind::Function { .. } => {
                self.add("function(result:");
                if let Some(result) = self.ctx.child(utype, 0) {
                    self.add_type(result);
                }
                for i in 1..self.ctx.num_children(utype) {
                    self.add(", ");
                    if let Some(param) = self.ctx.child(utype, i) {
                        // Parameter decl -> its qualified type.
                        if let Some(ptype) = self.ctx.child(param, 0) {
                            self.add_type(ptype);
                        }
                    }
                }
                self.add(")");
            }

            TypeKind::Bitfield { width, bits } => {
                self.add(&format!("bitfield({width},"));
                for b in &bits {
                    self.add(&format!("{}:{}:{},", b.id, b.lower, b.upper));
                }
                self.add(")");
            }

            TypeKind::OperandList => {
                self.add("operand-list(");
                for (i, child) in self.ctx.children(utype).into_iter().enumerate() {
                    if i > 0 {
                        self.add(",");
                    }
                    if let Some(op) = child {
                        if let NodeKind::Decl(data) = self.ctx.kind(op) {
                            if let DeclKind::Parameter { kind } = data.kind {
                                self.add(match kind {
                                    ParamKind::In => "in ",
                                    ParamKind::InOut => "inout ",
                                    ParamKind::Copy => "copy ",
                                });
                            }
                        }
                        if let Some(ptype) = self.ctx.child(op, 0) {
                            self.add_type(ptype);
                        }
                    }
                }
                self.add(")");
            }

            TypeKind::Name { .. } => self.serialize_name(utype),

            TypeKind::Wildcard { tag } => {
                if tag.is_empty() {
                    self.state =
                        UState::Internal("wildcard type without preset unification".into());
                } else {
                    self.add(&tag);
                }
            }

            // Spicy-level; another plugin's business.
            TypeKind::Unit => return false,
        }
        true
    }

    fn serialize_wrap(&mut self, utype: NodeId, tag: &str) {
        self.add(tag);
        self.add("(");
        if let Some(inner) = self.ctx.child(utype, 0) {
            self.add_type(inner);
        }
        self.add(")");
    }

    /// Struct/union: by canonical ID when declared, by shape otherwise.
    fn serialize_aggregate(&mut self, utype: NodeId, tag: &str) {
        if let Some(id) = self.aggregate_id(utype) {
            self.add(&format!("{tag}({id})"));
            return;
        }
        self.add(tag);
        self.add("(");
        for (i, child) in self.ctx.children(utype).into_iter().enumerate() {
            if i > 0 {
                self.add(",");
            }
            let Some(field) = child else { continue };
            if let Some(data) = self.ctx.decl(field) {
                self.add(&format!("{}:", data.id.local()));
            }
            if let Some(ftype) = self.ctx.child(field, 0) {
                self.add_type(ftype);
            }
        }
        self.add(")");
    }

    /// The canonical ID of the type declaration owning this aggregate, if
    /// it is declared.
    pub fn aggregate_id(&self, utype: NodeId) -> Option<String> {
        // utype -> qualified type -> type decl
        let qtype = self.ctx.parent(utype)?;
        let decl = self.ctx.parent(qtype)?;
        let data = self.ctx.decl(decl)?;
        if !matches!(data.kind, DeclKind::Type { .. }) {
            return None;
        }
        Some(
            data.canonical_id
                .clone()
                .or_else(|| data.fq_id.clone())
                .unwrap_or_else(|| data.id.clone())
                .as_str()
                .to_string(),
        )
    }

    /// Resolved names: named aggregates cut the recursion by ID, aliases
    /// are transparent (with the occurs check catching true cycles).
    fn serialize_name(&mut self, utype: NodeId) {
        let Some(index) = self.ctx.name_resolution(utype) else {
            self.abort();
            return;
        };
        let decl = self.ctx.lookup(index);
        let Some(qtype) = self.ctx.child(decl, 0) else {
            self.abort();
            return;
        };
        let Some(target) = self.ctx.child(qtype, 0) else {
            self.abort();
            return;
        };
        match self.ctx.kind(target) {
            NodeKind::Type(
                TypeKind::Struct | TypeKind::Union | TypeKind::Enum { .. } | TypeKind::Unit,
            ) => {
                let id = self
                    .ctx
                    .decl(decl)
                    .map(|d| {
                        d.canonical_id
                            .clone()
                            .or_else(|| d.fq_id.clone())
                            .unwrap_or_else(|| d.id.clone())
                    })
                    .map(|i| i.as_str().to_string())
                    .unwrap_or_default();
                let tag = match self.ctx.kind(target) {
                    NodeKind::Type(TypeKind::Struct) => "struct",
                    NodeKind::Type(TypeKind::Union) => "union",
                    NodeKind::Type(TypeKind::Enum { .. }) => "enum",
                    _ => "unit",
                };
                self.add(&format!("{tag}({id})"));
            }
            _ => self.add_type(target),
        }
    }
}
