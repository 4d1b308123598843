// resolve.rs — Scope building and ID/operator resolution
//
// Two mutating passes the driver runs to a fixed point. `build_scopes`
// attaches scopes to boundary nodes and fills them with declarations;
// `resolve` rewrites unresolved names, `$$`, and operator placeholders
// into their resolved forms. Both run post-order so children bind before
// their containers, and both report whether they changed anything.
//
// Unresolvable references are left in place without an error: forward
// references resolve on a later sweep, and whatever remains after the
// fixed point is the validator's to report.
//
// Preconditions: a parsed AST registered with the context.
// Postconditions: after convergence, a further run makes zero changes.
// Failure modes: none directly; leftovers are diagnosed in validation.
// Side effects: rewrites the AST in place.

use crate::ast::*;
use crate::builder::Builder;
use crate::node::{AstContext, NodeId};
use crate::operators::{self, registry, Resolution, ResultSpec, TypeClass, TypeView};
use crate::scope::{lookup, LookupResult};
use crate::visitor::{walk, Order};

/// Synthetic name binding the just-parsed value inside hooks and field
/// attribute expressions.
pub const DOLLAR_DOLLAR: &str = "__dd";

fn collect_post(ctx: &AstContext, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    walk(ctx, root, Order::Post, &mut |_, id| out.push(id));
    out
}

// ── Scope building ───────────────────────────────────────────────────────

/// Attach and fill scopes under `root`. Returns whether anything changed.
pub fn build_scopes(ctx: &mut AstContext, root: NodeId) -> bool {
    let mut changed = false;
    for id in collect_post(ctx, root) {
        if ctx.is_retired(id) {
            continue;
        }
        changed |= build_scope_for(ctx, id);
    }
    changed
}

fn build_scope_for(ctx: &mut AstContext, id: NodeId) -> bool {
    let mut changed = false;
    match ctx.kind(id).clone() {
        NodeKind::Root => {
            for child in ctx.children(id).into_iter().flatten() {
                if let Some(data) = ctx.decl(child) {
                    let name = data.id.local().to_string();
                    let index = ctx.register_decl(child);
                    changed |= ctx.scope_mut(id).insert(&name, index);
                }
            }
        }

        NodeKind::Decl(data) => match data.kind {
            DeclKind::Module => {
                let module_id = data.id.clone();
                for child in ctx.children(id).into_iter().flatten() {
                    let Some(child_data) = ctx.decl(child).cloned() else {
                        continue;
                    };
                    let name = child_data.id.local().to_string();
                    let index = ctx.register_decl(child);
                    changed |= ctx.scope_mut(id).insert(&name, index);
                    if child_data.fq_id.is_none() {
                        let fq = module_id.join(&name);
                        let d = ctx.decl_mut(child).unwrap();
                        d.fq_id = Some(fq.clone());
                        d.canonical_id = Some(fq);
                        changed = true;
                    }
                }
            }
            DeclKind::Function => {
                // Parameters live on the function declaration so the body
                // finds them on its walk outward.
                if let Some(ftype) = ctx.child(id, 0) {
                    for slot in 1..ctx.num_children(ftype) {
                        if let Some(param) = ctx.child(ftype, slot) {
                            if ctx.decl(param).is_some() {
                                let name = ctx.decl(param).unwrap().id.local().to_string();
                                let index = ctx.register_decl(param);
                                changed |= ctx.scope_mut(id).insert(&name, index);
                            }
                        }
                    }
                }
            }
            DeclKind::Hook { .. } => {
                changed |= bind_dollar_dollar(ctx, id);
            }
            DeclKind::Field => {
                changed |= field_scopes(ctx, id);
            }
            DeclKind::Type { .. } => {
                changed |= type_decl_scopes(ctx, id);
            }
            _ => {}
        },

        NodeKind::Type(TypeKind::Struct | TypeKind::Union | TypeKind::Unit) => {
            for child in ctx.children(id).into_iter().flatten() {
                if let Some(data) = ctx.decl(child).cloned() {
                    if matches!(data.kind, DeclKind::Field | DeclKind::Parameter { .. }) {
                        let name = data.id.local().to_string();
                        let index = ctx.register_decl(child);
                        changed |= ctx.scope_mut(id).insert(&name, index);
                    }
                }
            }
        }

        NodeKind::Stmt(StmtKind::Block) => {
            for child in ctx.children(id).into_iter().flatten() {
                if matches!(ctx.kind(child), NodeKind::Stmt(StmtKind::Declaration)) {
                    if let Some(decl) = ctx.child(child, 0) {
                        if let Some(data) = ctx.decl(decl).cloned() {
                            let index = ctx.register_decl(decl);
                            changed |= ctx.scope_mut(id).insert(data.id.local(), index);
                        }
                    }
                }
            }
        }

        NodeKind::Stmt(StmtKind::If | StmtKind::While) => {
            // An init clause's binding is visible in the statement's own
            // scope and re-inserted into each directly-owned block so a
            // shadowing redefinition is diagnosable.
            if let Some(init) = ctx.child(id, 0) {
                if let Some(data) = ctx.decl(init).cloned() {
                    let index = ctx.register_decl(init);
                    let name = data.id.local().to_string();
                    changed |= ctx.scope_mut(id).insert(&name, index);
                    for child in ctx.children(id).into_iter().flatten() {
                        if matches!(ctx.kind(child), NodeKind::Stmt(StmtKind::Block)) {
                            changed |= ctx.scope_mut(child).insert(&name, index);
                        }
                    }
                }
            }
        }

        NodeKind::Stmt(StmtKind::Switch) => {
            // The condition binding spans the condition and every case
            // body; re-inserting it into the bodies makes a redefinition
            // diagnosable, same as the if/while init clauses.
            if let Some(init) = ctx.child(id, 0) {
                if let Some(data) = ctx.decl(init).cloned() {
                    let index = ctx.register_decl(init);
                    let name = data.id.local().to_string();
                    changed |= ctx.scope_mut(id).insert(&name, index);
                    for case in ctx.children(id).into_iter().skip(2).flatten() {
                        if let Some(body) = ctx.child(case, 1) {
                            if matches!(ctx.kind(body), NodeKind::Stmt(StmtKind::Block)) {
                                changed |= ctx.scope_mut(body).insert(&name, index);
                            }
                        }
                    }
                }
            }
        }

        _ => {}
    }
    changed
}

/// Synthesize the `$$` binding for a hook attached to a field: a parameter
/// named `__dd`, typed by the field's parse type (element type for
/// `foreach` hooks on containers).
fn bind_dollar_dollar(ctx: &mut AstContext, hook: NodeId) -> bool {
    if ctx
        .scope(hook)
        .map(|s| !s.lookup_all(DOLLAR_DOLLAR).is_empty())
        .unwrap_or(false)
    {
        return false;
    }
    let Some(field) = ctx.parent(hook) else {
        return false;
    };
    if !matches!(ctx.decl(field).map(|d| &d.kind), Some(DeclKind::Field)) {
        return false;
    }
    let foreach = matches!(
        ctx.decl(hook).map(|d| &d.kind),
        Some(DeclKind::Hook {
            kind: HookKind::ForEach
        })
    );
    let dd_type = dd_value_type(ctx, field, foreach);
    let mut b = Builder::new(ctx);
    let param = b.decl_param(DOLLAR_DOLLAR, dd_type, ParamKind::In);
    ctx.append_child(hook, Some(param));
    let index = ctx.register_decl(param);
    ctx.scope_mut(hook).insert(DOLLAR_DOLLAR, index)
}

/// Field-level scopes: container fields with `&until`/`&until-including`/
/// `&while` bind `$$` to the current element inside the attribute
/// expressions; any other field attribute binds it to the parsed value.
fn field_scopes(ctx: &mut AstContext, field: NodeId) -> bool {
    if ctx
        .scope(field)
        .map(|s| !s.lookup_all(DOLLAR_DOLLAR).is_empty())
        .unwrap_or(false)
    {
        return false;
    }
    let has_attributes = ctx
        .child(field, 1)
        .map(|a| ctx.num_children(a) > 0)
        .unwrap_or(false);
    if !has_attributes {
        return false;
    }
    let dd_type = dd_value_type(ctx, field, true);
    let mut b = Builder::new(ctx);
    let param = b.decl_param(DOLLAR_DOLLAR, dd_type, ParamKind::In);
    ctx.append_child(field, Some(param));
    let index = ctx.register_decl(param);
    ctx.scope_mut(field).insert(DOLLAR_DOLLAR, index)
}

/// The type `$$` carries for a field: the element type when
/// `element_of_container` and the field is a container, the field's own
/// parse type otherwise. Falls back to `auto` until types resolve.
fn dd_value_type(ctx: &mut AstContext, field: NodeId, element_of_container: bool) -> NodeId {
    let qtype = ctx.child(field, 0);
    let elem = qtype.and_then(|q| ctx.child(q, 0)).and_then(|u| {
        if element_of_container
            && matches!(
                ctx.kind(u),
                NodeKind::Type(TypeKind::Vector | TypeKind::List | TypeKind::Set)
            )
        {
            ctx.child(u, 0)
        } else {
            None
        }
    });
    let source = elem.or(qtype);
    match source {
        Some(q) => ctx.deepcopy(q),
        None => {
            let mut b = Builder::new(ctx);
            let auto = b.type_auto();
            b.qtype(auto, Constness::Const)
        }
    }
}

fn type_decl_scopes(ctx: &mut AstContext, decl: NodeId) -> bool {
    let mut changed = false;
    let Some(qtype) = ctx.child(decl, 0) else {
        return false;
    };
    let Some(utype) = ctx.child(qtype, 0) else {
        return false;
    };
    if let NodeKind::Type(TypeKind::Enum { labels }) = ctx.kind(utype).clone() {
        // Synthesize one constant per label so `Color::Green` resolves.
        if ctx.scope(utype).map(|s| s.is_empty()).unwrap_or(true) {
            for (name, ordinal) in labels {
                let konst = {
                    let mut b = Builder::new(ctx);
                    let name_t = b.type_name(ctx_decl_id(b.ctx, decl));
                    let q = b.qtype(name_t, Constness::Const);
                    let value = b.ctor_sint(ordinal, 64);
                    let value = b.expr_ctor(value);
                    b.decl_constant(name.as_str(), Some(q), value)
                };
                ctx.append_child(utype, Some(konst));
                let index = ctx.register_decl(konst);
                changed |= ctx.scope_mut(utype).insert(&name, index);
            }
        }
    }
    changed
}

fn ctx_decl_id(ctx: &AstContext, decl: NodeId) -> Id {
    ctx.decl(decl)
        .map(|d| {
            d.fq_id
                .clone()
                .unwrap_or_else(|| d.id.clone())
        })
        .unwrap_or_else(|| Id::new(""))
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve names, `$$`, and operators under `root`. Returns whether the
/// AST changed.
pub fn resolve(ctx: &mut AstContext, root: NodeId) -> bool {
    let mut changed = false;
    for id in collect_post(ctx, root) {
        if ctx.is_retired(id) {
            continue;
        }
        match ctx.kind(id).clone() {
            NodeKind::Expr(ExprKind::Name { id: name }) => {
                changed |= resolve_name_expr(ctx, id, &name);
            }
            NodeKind::Type(TypeKind::Name { id: name }) => {
                if ctx.name_resolution(id).is_none() {
                    if let LookupResult::Found(index) = lookup(ctx, id, &name) {
                        let target = ctx.lookup(index);
                        if matches!(
                            ctx.decl(target).map(|d| &d.kind),
                            Some(DeclKind::Type { .. })
                        ) {
                            ctx.set_name_resolution(id, index);
                            changed = true;
                        }
                    }
                }
            }
            NodeKind::Expr(ExprKind::DollarDollar) => {
                if let LookupResult::Found(index) = lookup(ctx, id, &Id::new(DOLLAR_DOLLAR)) {
                    *ctx.kind_mut(id) = NodeKind::Expr(ExprKind::Name {
                        id: Id::new(DOLLAR_DOLLAR),
                    });
                    ctx.set_name_resolution(id, index);
                    changed = true;
                }
            }
            NodeKind::Expr(ExprKind::UnresolvedOperator { op }) => {
                changed |= resolve_operator(ctx, id, op);
            }
            NodeKind::Decl(data)
                if matches!(
                    data.kind,
                    DeclKind::Constant | DeclKind::GlobalVariable | DeclKind::LocalVariable
                ) =>
            {
                changed |= coerce_initializer(ctx, id);
            }
            _ => {}
        }
    }
    changed
}

/// Coerce a literal initializer to its declaration's type through the
/// plugins' `coerce_ctor` hooks (e.g. an integer literal refits a
/// narrower declared width).
fn coerce_initializer(ctx: &mut AstContext, decl: NodeId) -> bool {
    let Some(qtype) = ctx.child(decl, 0) else {
        return false;
    };
    let Some(value) = ctx.child(decl, 1) else {
        return false;
    };
    if !matches!(ctx.kind(value), NodeKind::Expr(ExprKind::Ctor)) {
        return false;
    }
    let Some(ctor) = ctx.child(value, 0) else {
        return false;
    };

    let Some(target) = operators::type_view(ctx, qtype) else {
        return false;
    };
    let Some(current) = expr_type(ctx, value).and_then(|q| operators::type_view(ctx, q)) else {
        return false;
    };
    if current.unification == target.unification {
        return false;
    }

    for p in crate::plugin::plugins() {
        if let Some(hook) = p.coerce_ctor {
            let coerced = {
                let mut b = Builder::new(ctx);
                hook(&mut b, ctor, &target, crate::coerce::CoercionStyle::assignment())
            };
            if let Some(new_ctor) = coerced {
                ctx.set_child(value, 0, Some(new_ctor));
                return true;
            }
        }
    }
    false
}

fn resolve_name_expr(ctx: &mut AstContext, expr: NodeId, name: &Id) -> bool {
    if ctx.name_resolution(expr).is_some() {
        return false;
    }
    let LookupResult::Found(index) = lookup(ctx, expr, name) else {
        return false;
    };
    let decl = ctx.lookup(index);
    let Some(data) = ctx.decl(decl).cloned() else {
        return false;
    };
    match data.kind {
        DeclKind::Type { on_heap } => {
            // A type used as a value becomes a type-value expression; types
            // living on the heap read as value references.
            let replacement = {
                let mut b = Builder::new(ctx);
                let name_t = b.type_name(name.clone());
                let q = b.qtype(name_t, Constness::Const);
                let q = if on_heap {
                    let vr = b.type_value_ref(q);
                    b.qtype(vr, Constness::Const)
                } else {
                    q
                };
                b.expr_type_value(q)
            };
            // Bind the fresh name type before grafting.
            let name_t = ctx
                .child(replacement, 0)
                .and_then(|q| find_name_type(ctx, q));
            if let Some(nt) = name_t {
                ctx.set_name_resolution(nt, index);
            }
            ctx.graft(expr, replacement);
            true
        }
        DeclKind::Constant => {
            if let Some(value) = ctx.child(decl, 1) {
                let copy = ctx.deepcopy(value);
                ctx.graft(expr, copy);
                true
            } else {
                false
            }
        }
        DeclKind::Parameter { .. } if is_unit_or_struct_param(ctx, decl) => {
            // Unit/struct parameters read as members of `self`.
            let self_expr = {
                let mut b = Builder::new(ctx);
                b.expr_self()
            };
            *ctx.kind_mut(expr) = NodeKind::Expr(ExprKind::Member {
                id: data.id.local().to_string(),
            });
            ctx.append_child(expr, Some(self_expr));
            true
        }
        _ => {
            ctx.set_name_resolution(expr, index);
            true
        }
    }
}

fn find_name_type(ctx: &AstContext, qtype: NodeId) -> Option<NodeId> {
    let utype = ctx.child(qtype, 0)?;
    match ctx.kind(utype) {
        NodeKind::Type(TypeKind::Name { .. }) => Some(utype),
        NodeKind::Type(TypeKind::ValueRef) => {
            let inner_q = ctx.child(utype, 0)?;
            find_name_type(ctx, inner_q)
        }
        _ => None,
    }
}

fn is_unit_or_struct_param(ctx: &AstContext, param: NodeId) -> bool {
    let mut current = ctx.parent(param);
    while let Some(n) = current {
        match ctx.kind(n) {
            NodeKind::Type(TypeKind::Unit | TypeKind::Struct) => return true,
            NodeKind::Decl(_) | NodeKind::Root => return false,
            _ => {}
        }
        current = ctx.parent(n);
    }
    false
}

// ── Operator resolution ──────────────────────────────────────────────────

fn resolve_operator(ctx: &mut AstContext, expr: NodeId, op: OperatorKind) -> bool {
    let operand_nodes: Vec<NodeId> = match ctx.children(expr).into_iter().collect::<Option<Vec<_>>>() {
        Some(v) => v,
        None => return false,
    };

    // Calls resolve against the callee, not the signature table.
    if matches!(op, OperatorKind::Call | OperatorKind::MemberCall) {
        return resolve_call(ctx, expr, &operand_nodes);
    }

    let mut views: Vec<TypeView> = Vec::with_capacity(operand_nodes.len());
    let mut qtypes: Vec<NodeId> = Vec::with_capacity(operand_nodes.len());
    for &operand in &operand_nodes {
        let Some(qtype) = expr_type(ctx, operand) else {
            return false;
        };
        let Some(view) = operators::type_view(ctx, qtype) else {
            return false;
        };
        qtypes.push(qtype);
        views.push(view);
    }

    match registry().resolve(op, &views) {
        Resolution::Match { operator, .. } => {
            let spec = registry().get(operator).result;
            let result = build_result_type(ctx, spec, &qtypes, &views);
            ctx.prepend_child(expr, Some(result));
            *ctx.kind_mut(expr) = NodeKind::Expr(ExprKind::ResolvedOperator { op, operator });
            true
        }
        Resolution::NoMatch | Resolution::Ambiguous(_) => false,
    }
}

/// Resolve a call expression. Two shapes: `f(args)` against `f`'s function
/// type, and `recv.method(args)` against the built-in method table.
fn resolve_call(ctx: &mut AstContext, expr: NodeId, operands: &[NodeId]) -> bool {
    let Some(&callee) = operands.first() else {
        return false;
    };

    if let NodeKind::Expr(ExprKind::Member { id }) = ctx.kind(callee).clone() {
        // Built-in method on a runtime value type.
        let Some(receiver) = ctx.child(callee, 0) else {
            return false;
        };
        let Some(rq) = expr_type(ctx, receiver) else {
            return false;
        };
        let Some(view) = operators::type_view(ctx, rq) else {
            return false;
        };
        let Some(method) = operators::lookup_method(view.class, &id) else {
            return false;
        };
        let result = build_result_type(ctx, method.result, &[rq], std::slice::from_ref(&view));
        ctx.prepend_child(expr, Some(result));
        *ctx.kind_mut(expr) = NodeKind::Expr(ExprKind::ResolvedOperator {
            op: OperatorKind::MemberCall,
            operator: operators::OP_METHOD_CALL,
        });
        return true;
    }

    // Direct call: the callee must have a function type.
    let Some(cq) = expr_type(ctx, callee) else {
        return false;
    };
    let Some(ftype) = ctx.child(cq, 0) else {
        return false;
    };
    if !matches!(ctx.kind(ftype), NodeKind::Type(TypeKind::Function { .. })) {
        return false;
    }
    let result = match ctx.child(ftype, 0) {
        Some(r) => ctx.deepcopy(r),
        None => {
            let mut b = Builder::new(ctx);
            let t = b.type_void();
            b.qtype(t, Constness::Const)
        }
    };
    ctx.prepend_child(expr, Some(result));
    *ctx.kind_mut(expr) = NodeKind::Expr(ExprKind::ResolvedOperator {
        op: OperatorKind::Call,
        operator: operators::OP_DIRECT_CALL,
    });
    true
}

fn build_result_type(
    ctx: &mut AstContext,
    spec: ResultSpec,
    qtypes: &[NodeId],
    views: &[TypeView],
) -> NodeId {
    match spec {
        ResultSpec::Bool => {
            let mut b = Builder::new(ctx);
            let t = b.type_bool();
            b.qtype(t, Constness::Const)
        }
        ResultSpec::UInt64 => {
            let mut b = Builder::new(ctx);
            let t = b.type_uint(64);
            b.qtype(t, Constness::Const)
        }
        ResultSpec::Void => {
            let mut b = Builder::new(ctx);
            let t = b.type_void();
            b.qtype(t, Constness::Const)
        }
        ResultSpec::Str => {
            let mut b = Builder::new(ctx);
            let t = b.type_string();
            b.qtype(t, Constness::Const)
        }
        ResultSpec::Operand(i) => ctx.deepcopy(qtypes[i]),
        ResultSpec::WiderOf(i, j) => {
            let pick = match (views[i].class, views[j].class) {
                (TypeClass::Real, _) => i,
                (_, TypeClass::Real) => j,
                _ => {
                    if views[j].width.unwrap_or(0) > views[i].width.unwrap_or(0) {
                        j
                    } else {
                        i
                    }
                }
            };
            ctx.deepcopy(qtypes[pick])
        }
        ResultSpec::ElementOf(i) | ResultSpec::MapValueOf(i) => {
            let slot = if matches!(spec, ResultSpec::MapValueOf(_)) {
                1
            } else {
                0
            };
            let elem = ctx
                .child(qtypes[i], 0)
                .and_then(|u| operators::resolve_alias(ctx, u))
                .and_then(|u| ctx.child(u, slot));
            match elem {
                Some(e) => ctx.deepcopy(e),
                None => {
                    let mut b = Builder::new(ctx);
                    let t = b.type_auto();
                    b.qtype(t, Constness::Const)
                }
            }
        }
    }
}

// ── Expression typing ────────────────────────────────────────────────────

/// The qualified type of an expression, if derivable at this point of
/// resolution. May synthesize fresh (unparented) type nodes.
pub fn expr_type(ctx: &mut AstContext, expr: NodeId) -> Option<NodeId> {
    match ctx.kind(expr).clone() {
        NodeKind::Expr(ExprKind::Ctor) => {
            let ctor = ctx.child(expr, 0)?;
            ctor_type(ctx, ctor)
        }
        NodeKind::Expr(ExprKind::TypeValue) => ctx.child(expr, 0),
        NodeKind::Expr(ExprKind::ResolvedOperator { .. }) => ctx.child(expr, 0),
        NodeKind::Expr(ExprKind::Assign) => {
            let target = ctx.child(expr, 0)?;
            expr_type(ctx, target)
        }
        NodeKind::Expr(ExprKind::Name { .. }) => {
            let index = ctx.name_resolution(expr)?;
            let decl = ctx.lookup(index);
            match ctx.decl(decl).map(|d| d.kind.clone())? {
                DeclKind::LocalVariable
                | DeclKind::GlobalVariable
                | DeclKind::Parameter { .. }
                | DeclKind::Field => ctx.child(decl, 0),
                DeclKind::Constant => {
                    if let Some(q) = ctx.child(decl, 0) {
                        Some(q)
                    } else {
                        let value = ctx.child(decl, 1)?;
                        expr_type(ctx, value)
                    }
                }
                DeclKind::Expression => {
                    let value = ctx.child(decl, 0)?;
                    expr_type(ctx, value)
                }
                DeclKind::Function => {
                    let ftype = ctx.child(decl, 0)?;
                    let mut b = Builder::new(ctx);
                    Some(b.qtype(ftype, Constness::Const))
                }
                _ => None,
            }
        }
        NodeKind::Expr(ExprKind::SelfRef) => enclosing_self_type(ctx, expr),
        NodeKind::Expr(ExprKind::Member { id }) => {
            let receiver = ctx.child(expr, 0)?;
            member_type(ctx, receiver, &id)
        }
        NodeKind::Expr(ExprKind::TryMember { id }) => {
            let receiver = ctx.child(expr, 0)?;
            let inner = member_type(ctx, receiver, &id)?;
            let copy = ctx.deepcopy(inner);
            let mut b = Builder::new(ctx);
            let opt = b.type_optional(copy);
            Some(b.qtype(opt, Constness::Const))
        }
        _ => None,
    }
}

fn ctor_type(ctx: &mut AstContext, ctor: NodeId) -> Option<NodeId> {
    let kind = match ctx.kind(ctor) {
        NodeKind::Ctor(k) => k.clone(),
        _ => return None,
    };
    let mut b = Builder::new(ctx);
    let t = match kind {
        CtorKind::Bool(_) => b.type_bool(),
        CtorKind::UInt { width, .. } => b.type_uint(width),
        CtorKind::SInt { width, .. } => b.type_sint(width),
        CtorKind::Real(_) => b.type_real(),
        CtorKind::Bytes(_) => b.type_bytes(),
        CtorKind::String(_) => b.type_string(),
        CtorKind::RegExp(_) => b.type_regexp(),
        CtorKind::Port { .. } => b.type_port(),
        _ => return None,
    };
    let mut b = Builder::new(ctx);
    Some(b.qtype(t, Constness::Const))
}

fn enclosing_self_type(ctx: &mut AstContext, expr: NodeId) -> Option<NodeId> {
    let mut current = ctx.parent(expr);
    while let Some(n) = current {
        if matches!(
            ctx.kind(n),
            NodeKind::Type(TypeKind::Unit | TypeKind::Struct)
        ) {
            return ctx.parent(n);
        }
        current = ctx.parent(n);
    }
    None
}

fn member_type(ctx: &mut AstContext, receiver: NodeId, member: &str) -> Option<NodeId> {
    let rq = expr_type(ctx, receiver)?;
    let utype = ctx.child(rq, 0)?;
    let utype = operators::resolve_alias(ctx, utype)?;
    if !matches!(
        ctx.kind(utype),
        NodeKind::Type(TypeKind::Struct | TypeKind::Union | TypeKind::Unit)
    ) {
        return None;
    }
    for child in ctx.children(utype).into_iter().flatten() {
        if let Some(data) = ctx.decl(child) {
            if data.id.local() == member
                && matches!(data.kind, DeclKind::Field | DeclKind::Parameter { .. })
            {
                return ctx.child(child, 0);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// module M { const SIZE = 512; global x: uint32; ... }
    fn resolve_to_fixpoint(ctx: &mut AstContext, root: NodeId) -> usize {
        let mut rounds = 0;
        loop {
            let mut changed = build_scopes(ctx, root);
            changed |= resolve(ctx, root);
            rounds += 1;
            if !changed || rounds > 16 {
                return rounds;
            }
        }
    }

    #[test]
    fn constant_reference_is_substituted() {
        let mut ctx = AstContext::new();
        let (module, use_site) = {
            let mut b = Builder::new(&mut ctx);
            let lit = b.ctor_uint(512, 64);
            let value = b.expr_ctor(lit);
            let konst = b.decl_constant("SIZE", None, value);
            let use_site = b.expr_name("SIZE");
            let stmt = b.stmt_expr(use_site);
            let block = b.stmt_block(vec![stmt]);
            let ft_result = b.type_void();
            let ft_result = b.qtype(ft_result, Constness::Const);
            let ftype = b.type_function(ft_result, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            let module = b.decl_module("M", vec![konst, f]);
            (module, use_site)
        };
        resolve_to_fixpoint(&mut ctx, module);
        assert!(matches!(
            ctx.kind(use_site),
            NodeKind::Expr(ExprKind::Ctor)
        ));
    }

    #[test]
    fn operator_resolves_with_result_type() {
        let mut ctx = AstContext::new();
        let (module, op_expr) = {
            let mut b = Builder::new(&mut ctx);
            let l1 = b.ctor_uint(1, 32);
            let e1 = b.expr_ctor(l1);
            let l2 = b.ctor_uint(2, 32);
            let e2 = b.expr_ctor(l2);
            let op = b.expr_op(OperatorKind::Add, vec![e1, e2]);
            let stmt = b.stmt_expr(op);
            let block = b.stmt_block(vec![stmt]);
            let vt = b.type_void();
            let vq = b.qtype(vt, Constness::Const);
            let ftype = b.type_function(vq, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            let module = b.decl_module("M", vec![f]);
            (module, op)
        };
        resolve_to_fixpoint(&mut ctx, module);

        let NodeKind::Expr(ExprKind::ResolvedOperator { op, .. }) = ctx.kind(op_expr) else {
            panic!("operator not resolved: {:?}", ctx.kind(op_expr));
        };
        assert_eq!(*op, OperatorKind::Add);
        // Child 0 is the result type: uint(32).
        let result_q = ctx.child(op_expr, 0).unwrap();
        let view = operators::type_view(&mut ctx, result_q).unwrap();
        assert_eq!(view.unification, "uint(32)");
    }

    #[test]
    fn resolution_is_stable_after_convergence() {
        let mut ctx = AstContext::new();
        let module = {
            let mut b = Builder::new(&mut ctx);
            let lit = b.ctor_uint(1, 8);
            let value = b.expr_ctor(lit);
            let konst = b.decl_constant("ONE", None, value);
            let use1 = b.expr_name("ONE");
            let use2 = b.expr_name("ONE");
            let op = b.expr_op(OperatorKind::Add, vec![use1, use2]);
            let stmt = b.stmt_expr(op);
            let block = b.stmt_block(vec![stmt]);
            let vt = b.type_void();
            let vq = b.qtype(vt, Constness::Const);
            let ftype = b.type_function(vq, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            b.decl_module("M", vec![konst, f])
        };
        resolve_to_fixpoint(&mut ctx, module);

        // One more full sweep must be a no-op.
        let changed = build_scopes(&mut ctx, module) || resolve(&mut ctx, module);
        assert!(!changed);
    }

    #[test]
    fn unknown_name_left_in_place() {
        let mut ctx = AstContext::new();
        let (module, use_site) = {
            let mut b = Builder::new(&mut ctx);
            let use_site = b.expr_name("missing");
            let stmt = b.stmt_expr(use_site);
            let block = b.stmt_block(vec![stmt]);
            let vt = b.type_void();
            let vq = b.qtype(vt, Constness::Const);
            let ftype = b.type_function(vq, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            let module = b.decl_module("M", vec![f]);
            (module, use_site)
        };
        resolve_to_fixpoint(&mut ctx, module);
        assert!(matches!(
            ctx.kind(use_site),
            NodeKind::Expr(ExprKind::Name { .. })
        ));
        assert!(ctx.name_resolution(use_site).is_none());
    }

    #[test]
    fn switch_binding_visible_in_case_bodies() {
        let mut ctx = AstContext::new();
        let (module, cond, use_site) = {
            let mut b = Builder::new(&mut ctx);
            let auto = b.type_auto();
            let q = b.qtype(auto, Constness::Mutable);
            let one = b.ctor_uint(1, 64);
            let one = b.expr_ctor(one);
            let binding = b.decl_local("v", q, Some(one));
            let cond = b.expr_name("v");
            let use_site = b.expr_name("v");
            let stmt = b.stmt_expr(use_site);
            let body = b.stmt_block(vec![stmt]);
            let case = b.stmt_switch_case(None, body);
            let sw = b.stmt_switch(Some(binding), cond, vec![case]);
            let block = b.stmt_block(vec![sw]);
            let vt = b.type_void();
            let vq = b.qtype(vt, Constness::Const);
            let ftype = b.type_function(vq, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            let module = b.decl_module("M", vec![f]);
            (module, cond, use_site)
        };
        resolve_to_fixpoint(&mut ctx, module);

        // Both the condition and the case body see the binding.
        assert!(ctx.name_resolution(cond).is_some());
        assert!(ctx.name_resolution(use_site).is_some());
    }

    #[test]
    fn typed_initializer_coerces_to_declared_width() {
        let mut ctx = AstContext::new();
        let (module, konst) = {
            let mut b = Builder::new(&mut ctx);
            let t = b.type_uint(16);
            let q = b.qtype(t, Constness::Const);
            let lit = b.ctor_uint(512, 64);
            let value = b.expr_ctor(lit);
            let konst = b.decl_constant("SIZE", Some(q), value);
            let module = b.decl_module("M", vec![konst]);
            (module, konst)
        };
        resolve_to_fixpoint(&mut ctx, module);

        let value = ctx.child(konst, 1).unwrap();
        let ctor = ctx.child(value, 0).unwrap();
        assert!(matches!(
            ctx.kind(ctor),
            NodeKind::Ctor(CtorKind::UInt { value: 512, width: 16 })
        ));
    }

    #[test]
    fn enum_labels_resolve_via_qualified_ids() {
        let mut ctx = AstContext::new();
        let (module, use_site) = {
            let mut b = Builder::new(&mut ctx);
            let et = b.type_enum(vec![("Red".into(), 0), ("Green".into(), 1)]);
            let eq = b.qtype(et, Constness::Const);
            let tdecl = b.decl_type("Color", eq, Linkage::Public, false);
            let use_site = b.expr_name("Color::Green");
            let stmt = b.stmt_expr(use_site);
            let block = b.stmt_block(vec![stmt]);
            let vt = b.type_void();
            let vq = b.qtype(vt, Constness::Const);
            let ftype = b.type_function(vq, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            let module = b.decl_module("M", vec![tdecl, f]);
            (module, use_site)
        };
        resolve_to_fixpoint(&mut ctx, module);
        // The label constant substituted its value expression.
        assert!(matches!(
            ctx.kind(use_site),
            NodeKind::Expr(ExprKind::Ctor)
        ));
    }
}
