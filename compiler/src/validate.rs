// validate.rs — Pre- and post-resolution validation
//
// The pre pass checks structural rules that hold regardless of resolution
// (attribute placement, unit properties). The post pass reports whatever
// the resolver could not settle after the fixed point: unknown or
// ambiguous IDs, visibility violations, `$$` outside a valid context, and
// operators with no (or several) matching signatures.
//
// Diagnostics are attached to the offending nodes; the driver collects
// them at the stage boundary.

use crate::ast::*;
use crate::node::{AstContext, NodeId};
use crate::operators::{self, registry, Resolution};
use crate::resolve::{self, DOLLAR_DOLLAR};
use crate::scope::{lookup, LookupResult};
use crate::visitor::{walk, Order};

/// Attributes a unit field may carry. `case`, `var`, and `sink` are
/// internal markers the parser lowers unit items into.
const FIELD_ATTRIBUTES: &[&str] = &[
    "size",
    "count",
    "until",
    "until-including",
    "while",
    "eod",
    "byte-order",
    "convert",
    "requires",
    "default",
    "optional",
    "originator",
    "responder",
    "case",
    "var",
    "sink",
];

/// Attributes (properties) a unit itself may carry.
const UNIT_ATTRIBUTES: &[&str] = &["byte-order", "random-access", "convert", "requires", "size"];

/// Attributes whose value binds `$$` to the current container element.
const ELEMENT_ATTRIBUTES: &[&str] = &["until", "until-including", "while"];

/// Attributes that require a value expression.
const VALUED_ATTRIBUTES: &[&str] = &[
    "size",
    "count",
    "until",
    "until-including",
    "while",
    "byte-order",
    "convert",
    "requires",
    "default",
];

// ── Pre-resolution validation ────────────────────────────────────────────

pub fn validate_pre(ctx: &mut AstContext, root: NodeId) {
    let nodes = crate::visitor::collect(ctx, root);
    for id in nodes {
        if let NodeKind::Attribute { tag } = ctx.kind(id).clone() {
            validate_attribute(ctx, id, &tag);
        }
    }
}

fn validate_attribute(ctx: &mut AstContext, attr: NodeId, tag: &str) {
    let holder = attribute_holder(ctx, attr);
    match holder {
        Some(AttributeHolder::Field(field)) => {
            if !FIELD_ATTRIBUTES.contains(&tag) {
                ctx.add_error(attr, format!("unknown field attribute '&{tag}'"));
                return;
            }
            if ELEMENT_ATTRIBUTES.contains(&tag) && !field_is_container(ctx, field) {
                ctx.add_error(
                    attr,
                    format!("'&{tag}' requires a container-typed field"),
                );
            }
            check_attribute_value(ctx, attr, tag);
        }
        Some(AttributeHolder::Unit) => {
            if !UNIT_ATTRIBUTES.contains(&tag) {
                ctx.add_error(attr, format!("attribute '&{tag}' not valid on a unit"));
                return;
            }
            check_attribute_value(ctx, attr, tag);
        }
        None => {
            // Attributes elsewhere (e.g. on type decls) pass through; the
            // transform ignores what it does not know.
        }
    }
}

fn check_attribute_value(ctx: &mut AstContext, attr: NodeId, tag: &str) {
    let has_value = ctx.child(attr, 0).is_some();
    if VALUED_ATTRIBUTES.contains(&tag) && !has_value {
        ctx.add_error(attr, format!("'&{tag}' requires a value expression"));
    }
    if tag == "eod" && has_value {
        ctx.add_error(attr, "'&eod' takes no value".to_string());
    }
}

enum AttributeHolder {
    Field(NodeId),
    Unit,
}

fn attribute_holder(ctx: &AstContext, attr: NodeId) -> Option<AttributeHolder> {
    let set = ctx.parent(attr)?;
    if !matches!(ctx.kind(set), NodeKind::AttributeSet) {
        return None;
    }
    let holder = ctx.parent(set)?;
    match ctx.kind(holder) {
        NodeKind::Decl(data) if matches!(data.kind, DeclKind::Field) => {
            Some(AttributeHolder::Field(holder))
        }
        NodeKind::Type(TypeKind::Unit) => Some(AttributeHolder::Unit),
        _ => None,
    }
}

fn field_is_container(ctx: &AstContext, field: NodeId) -> bool {
    let Some(qtype) = ctx.child(field, 0) else {
        return false;
    };
    let Some(utype) = ctx.child(qtype, 0) else {
        return false;
    };
    matches!(
        ctx.kind(utype),
        NodeKind::Type(TypeKind::Vector | TypeKind::List | TypeKind::Set | TypeKind::Bytes)
    )
}

// ── Post-resolution validation ───────────────────────────────────────────

pub fn validate_post(ctx: &mut AstContext, root: NodeId) {
    let nodes = crate::visitor::collect(ctx, root);
    for id in nodes {
        match ctx.kind(id).clone() {
            NodeKind::Expr(ExprKind::Name { id: name }) => {
                if name.as_str() != DOLLAR_DOLLAR && ctx.name_resolution(id).is_none() {
                    report_unresolved(ctx, id, &name);
                }
            }
            NodeKind::Type(TypeKind::Name { id: name }) => {
                if ctx.name_resolution(id).is_none() {
                    report_unresolved(ctx, id, &name);
                }
            }
            NodeKind::Expr(ExprKind::DollarDollar) => {
                ctx.add_error(
                    id,
                    "'$$' is only valid inside hooks and field attribute expressions",
                );
            }
            NodeKind::Expr(ExprKind::UnresolvedOperator { op }) => {
                report_unresolved_operator(ctx, id, op);
            }
            _ => {}
        }
    }
}

fn report_unresolved(ctx: &mut AstContext, node: NodeId, name: &Id) {
    match lookup(ctx, node, name) {
        LookupResult::NotFound => {
            ctx.add_error(node, format!("unknown ID '{name}'"));
        }
        LookupResult::Ambiguous(_) => {
            ctx.add_error(node, format!("ID '{name}' is ambiguous"));
        }
        LookupResult::NotVisible(_) => {
            ctx.add_error(
                node,
                format!("'{name}' is not exported by its module"),
            );
        }
        LookupResult::Found(_) => {
            // Lookup succeeds but the resolver declined the rewrite, e.g. a
            // type expected where a value was found.
            ctx.add_error(node, format!("ID '{name}' does not name a value here"));
        }
    }
}

fn report_unresolved_operator(ctx: &mut AstContext, expr: NodeId, op: OperatorKind) {
    let operands: Option<Vec<NodeId>> = ctx.children(expr).into_iter().collect();
    let views: Option<Vec<_>> = operands.and_then(|ops| {
        ops.iter()
            .map(|&o| {
                resolve::expr_type(ctx, o).and_then(|q| operators::type_view(ctx, q))
            })
            .collect()
    });
    match views {
        None => {
            ctx.add_error(
                expr,
                format!("cannot determine operand types for operator '{op}'"),
            );
        }
        Some(views) => match registry().resolve(op, &views) {
            Resolution::NoMatch => {
                let types: Vec<&str> = views.iter().map(|v| v.unification.as_str()).collect();
                ctx.add_error(
                    expr,
                    format!("no matching operator '{op}' for ({})", types.join(", ")),
                );
            }
            Resolution::Ambiguous(candidates) => {
                let names: Vec<&str> = candidates
                    .iter()
                    .map(|&c| registry().get(c).name)
                    .collect();
                ctx.add_error(
                    expr,
                    format!("operator '{op}' is ambiguous: {}", names.join(" vs ")),
                );
            }
            Resolution::Match { .. } => {
                // Resolvable now but the resolver never got here: the
                // driver's fixed point was cut short.
                ctx.add_error(expr, format!("operator '{op}' left unresolved"));
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::meta::Meta;

    #[test]
    fn unknown_field_attribute_is_reported() {
        let mut ctx = AstContext::new();
        let (field, attr) = {
            let mut b = Builder::new(&mut ctx);
            let t = b.type_bytes();
            let q = b.qtype(t, Constness::Const);
            let attr = b.attribute("no-such-attr", None);
            let attrs = b.attribute_set(vec![attr]);
            let field = b.decl_field("data", q, Some(attrs), None);
            (field, attr)
        };
        validate_pre(&mut ctx, field);
        assert!(!ctx.errors(attr).is_empty());
    }

    #[test]
    fn until_on_scalar_field_is_reported() {
        let mut ctx = AstContext::new();
        let (field, attr) = {
            let mut b = Builder::new(&mut ctx);
            let t = b.type_uint(8);
            let q = b.qtype(t, Constness::Const);
            let tru = b.ctor_bool(true);
            let cond = b.expr_ctor(tru);
            let attr = b.attribute("until", Some(cond));
            let attrs = b.attribute_set(vec![attr]);
            let field = b.decl_field("n", q, Some(attrs), None);
            (field, attr)
        };
        validate_pre(&mut ctx, field);
        assert!(ctx.errors(attr)[0].message.contains("container"));
    }

    #[test]
    fn valued_attribute_without_value_is_reported() {
        let mut ctx = AstContext::new();
        let (field, attr) = {
            let mut b = Builder::new(&mut ctx);
            let t = b.type_bytes();
            let q = b.qtype(t, Constness::Const);
            let attr = b.attribute("size", None);
            let attrs = b.attribute_set(vec![attr]);
            let field = b.decl_field("data", q, Some(attrs), None);
            (field, attr)
        };
        validate_pre(&mut ctx, field);
        assert!(ctx.errors(attr)[0].message.contains("value"));
    }

    #[test]
    fn leftover_unknown_id_reported_post() {
        let mut ctx = AstContext::new();
        let (module, use_site) = {
            let mut b = Builder::new(&mut ctx);
            let use_site = b.expr_name("nowhere");
            let stmt = b.stmt_expr(use_site);
            let block = b.stmt_block(vec![stmt]);
            let vt = b.type_void();
            let vq = b.qtype(vt, Constness::Const);
            let ftype = b.type_function(vq, vec![], FunctionFlavor::Function);
            let f = b.decl_function("f", ftype, Some(block), Linkage::Private);
            let module = b.decl_module("M", vec![f]);
            (module, use_site)
        };
        validate_post(&mut ctx, module);
        assert!(ctx.errors(use_site)[0].message.contains("unknown ID 'nowhere'"));
    }

    #[test]
    fn stray_dollar_dollar_reported_post() {
        let mut ctx = AstContext::new();
        let dd = ctx.make(
            NodeKind::Expr(ExprKind::DollarDollar),
            vec![],
            Meta::none(),
        );
        validate_post(&mut ctx, dd);
        assert!(ctx.errors(dd)[0].message.contains("$$"));
    }

    #[test]
    fn mismatched_operator_reported_post() {
        let mut ctx = AstContext::new();
        let op = {
            let mut b = Builder::new(&mut ctx);
            let l = b.ctor_bytes(b"x".to_vec());
            let le = b.expr_ctor(l);
            let r = b.ctor_uint(1, 8);
            let re = b.expr_ctor(r);
            b.expr_op(OperatorKind::Add, vec![le, re])
        };
        validate_post(&mut ctx, op);
        assert!(ctx.errors(op)[0].message.contains("no matching operator"));
    }
}
