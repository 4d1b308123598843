// transform.rs — Spicy-to-HILTI lowering
//
// For every unit type declaration: build the unit's LL(1) grammar and
// finalize it, register it with the context for the code generator,
// rewrite the unit type into a plain struct, and add the public parse
// function the host calls. After this pass the AST is HILTI-only; the
// driver runs one more resolver fixed point over the additions.
//
// Preconditions: resolution has converged; unit fields carry their final
//   types and attributes.
// Postconditions: no `Unit` type kinds remain under `root`; every
//   transformed unit has a grammar in the context (finalized unless it
//   had LL(1) errors, which are attached to the unit node).
// Failure modes: grammar finalization errors become node errors.
// Side effects: rewrites the AST; fills `ctx.grammars`.

use crate::ast::*;
use crate::builder::Builder;
use crate::grammar::{Grammar, LookAheadDefault, ProdId, ProdKind};
use crate::node::{AstContext, NodeId};
use crate::operators::resolve_alias;
use crate::unify::{unify, UnifyOutcome};
use crate::visitor::collect;

/// Transform every Spicy unit under `root`. Returns whether the AST
/// changed.
pub fn transform(ctx: &mut AstContext, root: NodeId) -> bool {
    let mut changed = false;
    for id in collect(ctx, root) {
        if ctx.is_retired(id) {
            continue;
        }
        let Some(data) = ctx.decl(id) else { continue };
        if !matches!(data.kind, DeclKind::Type { .. }) {
            continue;
        }
        let Some(qtype) = ctx.child(id, 0) else {
            continue;
        };
        let Some(utype) = ctx.child(qtype, 0) else {
            continue;
        };
        if matches!(ctx.kind(utype), NodeKind::Type(TypeKind::Unit)) {
            transform_unit(ctx, id, utype);
            changed = true;
        }
    }
    changed
}

fn unit_canonical_id(ctx: &AstContext, decl: NodeId) -> Id {
    ctx.decl(decl)
        .map(|d| {
            d.canonical_id
                .clone()
                .or_else(|| d.fq_id.clone())
                .unwrap_or_else(|| d.id.clone())
        })
        .unwrap_or_else(|| Id::new("<unit>"))
}

fn transform_unit(ctx: &mut AstContext, decl: NodeId, unit: NodeId) {
    let unit_id = unit_canonical_id(ctx, decl);

    // Grammar first, while the node still reads as a unit.
    let mut grammar = build_unit_grammar(ctx, unit, &unit_id);
    match grammar.finalize() {
        Ok(()) => {
            tracing::debug!(target: "grammar", "finalized grammar for {unit_id} ({} productions)", grammar.len());
        }
        Err(e) => ctx.add_error(unit, e.to_string()),
    }
    ctx.grammars.insert(unit_id.as_str().to_string(), grammar);

    // The unit's runtime representation is a struct; items, hooks, and the
    // property set stay as children, which is what the emitter walks. The
    // cached unification moves along so later lookups stay consistent.
    *ctx.kind_mut(unit) = NodeKind::Type(TypeKind::Struct);
    ctx.set_unification(unit, format!("struct({unit_id})"));

    add_parse_function(ctx, decl, &unit_id);
}

/// Add `parse_<Unit>` to the unit's module, once. The function has no
/// HILTI body: the code generator emits its grammar-driven body directly.
fn add_parse_function(ctx: &mut AstContext, decl: NodeId, unit_id: &Id) {
    let Some(module) = ctx.parent(decl) else {
        return;
    };
    let local = ctx
        .decl(decl)
        .map(|d| d.id.local().to_string())
        .unwrap_or_default();
    let fname = format!("parse_{local}");

    let exists = ctx.children(module).into_iter().flatten().any(|c| {
        ctx.decl(c)
            .map(|d| d.id.local() == fname)
            .unwrap_or(false)
    });
    if exists {
        return;
    }

    let func = {
        let mut b = Builder::new(ctx);
        let stream_t = b.type_stream();
        let sq = b.qtype(stream_t, Constness::Mutable);
        let data = b.decl_param("data", sq, ParamKind::InOut);
        let result_t = b.type_name(unit_id.clone());
        let rq = b.qtype(result_t, Constness::Mutable);
        let ftype = b.type_function(rq, vec![data], FunctionFlavor::Function);
        b.decl_function(fname.as_str(), ftype, None, Linkage::Public)
    };
    ctx.append_child(module, Some(func));
}

// ── Grammar construction ─────────────────────────────────────────────────

/// Attributes that drive a container loop at runtime; their expression (or
/// presence, for `&eod`) decides continuation, so the loop's look-ahead is
/// condition-selected.
const LOOP_ATTRIBUTES: &[&str] = &["count", "until", "until-including", "while", "eod"];

pub fn build_unit_grammar(ctx: &mut AstContext, unit: NodeId, unit_id: &Id) -> Grammar {
    let mut g = Grammar::new(unit_id.as_str());
    let mut elements = Vec::new();

    for child in ctx.children(unit).into_iter().flatten() {
        let Some(data) = ctx.decl(child).cloned() else {
            continue;
        };
        if !matches!(data.kind, DeclKind::Field) {
            continue;
        }
        if has_attr(ctx, child, "var") || has_attr(ctx, child, "sink") {
            continue;
        }
        let symbol = format!("{}::{}", unit_id, data.id.local());
        if let Some(p) = field_production(ctx, &mut g, child, &symbol) {
            elements.push(p);
        }
    }

    let root = g.add(unit_id.as_str(), ProdKind::Sequence { elements });
    g.set_root(root);
    g
}

fn field_production(
    ctx: &mut AstContext,
    g: &mut Grammar,
    field: NodeId,
    symbol: &str,
) -> Option<ProdId> {
    // Literal fields match their ctor exactly.
    if let Some(p) = literal_production(ctx, g, field, symbol) {
        return Some(p);
    }

    let qtype = ctx.child(field, 0)?;
    let utype = resolve_alias(ctx, ctx.child(qtype, 0)?)?;

    match ctx.kind(utype).clone() {
        NodeKind::Type(TypeKind::Vector | TypeKind::List | TypeKind::Set) => {
            let elem_q = ctx.child(utype, 0)?;
            let elem_p = type_production(ctx, g, elem_q, &format!("{symbol}::elem"))?;
            Some(loop_production(ctx, g, field, symbol, elem_p))
        }
        NodeKind::Type(TypeKind::Union) => union_production(ctx, g, utype, symbol),
        _ => {
            let p = type_production(ctx, g, qtype, symbol);
            // `&size`/`&eod` bytes fields consume unconstrained input.
            p
        }
    }
}

fn literal_production(
    ctx: &mut AstContext,
    g: &mut Grammar,
    field: NodeId,
    symbol: &str,
) -> Option<ProdId> {
    let default = ctx.child(field, 2)?;
    if !matches!(ctx.kind(default), NodeKind::Expr(ExprKind::Ctor)) {
        return None;
    }
    let ctor = ctx.child(default, 0)?;
    match ctx.kind(ctor).clone() {
        NodeKind::Ctor(CtorKind::Bytes(literal)) => {
            Some(g.add(symbol, ProdKind::Ctor { literal }))
        }
        NodeKind::Ctor(CtorKind::RegExp(patterns)) => Some(g.add(
            symbol,
            ProdKind::Variable {
                token: format!("regexp({})", patterns.join("|")),
                type_node: ctx.child(field, 0),
            },
        )),
        _ => None,
    }
}

/// Production parsing one value of a (qualified) type.
fn type_production(
    ctx: &mut AstContext,
    g: &mut Grammar,
    qtype: NodeId,
    symbol: &str,
) -> Option<ProdId> {
    let utype = resolve_alias(ctx, ctx.child(qtype, 0)?)?;
    let kind = match ctx.kind(utype) {
        NodeKind::Type(k) => k.clone(),
        _ => return None,
    };

    if kind.is_parse_primitive() {
        let token = match unify(ctx, utype) {
            UnifyOutcome::Done(s) => s,
            _ => "any".to_string(),
        };
        return Some(g.add(
            symbol,
            ProdKind::Variable {
                token,
                type_node: Some(qtype),
            },
        ));
    }

    match kind {
        // Unconstrained byte runs; length is attribute-driven.
        TypeKind::Bytes | TypeKind::Stream => Some(g.add(
            symbol,
            ProdKind::Variable {
                token: "any".into(),
                type_node: Some(qtype),
            },
        )),
        // Sub-units (structs after their own transform) parse through
        // their own grammar.
        TypeKind::Struct | TypeKind::Unit => {
            let token = format!("unit({})", type_decl_id(ctx, utype));
            Some(g.add(
                symbol,
                ProdKind::TypeLiteral {
                    token,
                    type_node: Some(qtype),
                },
            ))
        }
        _ => {
            let token = match unify(ctx, utype) {
                UnifyOutcome::Done(s) => s,
                _ => "any".to_string(),
            };
            Some(g.add(
                symbol,
                ProdKind::TypeLiteral {
                    token,
                    type_node: Some(qtype),
                },
            ))
        }
    }
}

fn type_decl_id(ctx: &AstContext, utype: NodeId) -> String {
    ctx.parent(utype)
        .and_then(|q| ctx.parent(q))
        .and_then(|d| ctx.decl(d))
        .map(|d| {
            d.canonical_id
                .clone()
                .or_else(|| d.fq_id.clone())
                .unwrap_or_else(|| d.id.clone())
                .as_str()
                .to_string()
        })
        .unwrap_or_else(|| "<anonymous>".to_string())
}

/// Container fields become the classic look-ahead loop
/// `L -> elem L | epsilon`, selected by the field's loop attribute
/// (`&count`, `&until`, `&while`, `&eod`).
fn loop_production(
    ctx: &mut AstContext,
    g: &mut Grammar,
    field: NodeId,
    symbol: &str,
    elem: ProdId,
) -> ProdId {
    // A container field without any loop attribute runs to end-of-data.
    let condition = LOOP_ATTRIBUTES
        .iter()
        .find_map(|tag| find_attr(ctx, field, tag))
        .or_else(|| {
            let mut b = Builder::new(ctx);
            Some(b.attribute("eod", None))
        });

    let slot = g.add(format!("{symbol}::loop"), ProdKind::Deferred { target: None });
    let back = g.add(
        format!("{symbol}::again"),
        ProdKind::Reference { target: slot },
    );
    let body = g.add(
        format!("{symbol}::body"),
        ProdKind::Sequence {
            elements: vec![elem, back],
        },
    );
    let eps = g.add(format!("{symbol}::end"), ProdKind::Epsilon);
    let choice = g.add(
        symbol,
        ProdKind::LookAhead {
            alt_a: body,
            alt_b: eps,
            default: LookAheadDefault::Alternative2,
            condition,
        },
    );
    g.resolve(slot, choice);
    choice
}

/// A unit `switch` (lowered to a union field) becomes a right-leaning
/// look-ahead tree. Each case with a guard literal parses the guard first.
fn union_production(
    ctx: &mut AstContext,
    g: &mut Grammar,
    union: NodeId,
    symbol: &str,
) -> Option<ProdId> {
    let mut cases = Vec::new();
    for child in ctx.children(union).into_iter().flatten() {
        let Some(data) = ctx.decl(child).cloned() else {
            continue;
        };
        if !matches!(data.kind, DeclKind::Field) {
            continue;
        }
        let case_symbol = format!("{}::{}", symbol, data.id.local());
        let value_p = field_production(ctx, g, child, &case_symbol)?;
        let guarded = match case_guard_literal(ctx, child) {
            Some(literal) => {
                let guard = g.add(
                    format!("{case_symbol}::guard"),
                    ProdKind::Ctor { literal },
                );
                g.add(
                    format!("{case_symbol}::case"),
                    ProdKind::Sequence {
                        elements: vec![guard, value_p],
                    },
                )
            }
            None => value_p,
        };
        cases.push(guarded);
    }

    let mut iter = cases.into_iter().rev();
    let mut acc = iter.next()?;
    for (i, case) in iter.enumerate() {
        acc = g.add(
            format!("{symbol}::alt{i}"),
            ProdKind::LookAhead {
                alt_a: case,
                alt_b: acc,
                default: LookAheadDefault::None,
                condition: None,
            },
        );
    }
    Some(acc)
}

fn case_guard_literal(ctx: &AstContext, field: NodeId) -> Option<Vec<u8>> {
    let attr = find_attr(ctx, field, "case")?;
    let value = ctx.child(attr, 0)?;
    if !matches!(ctx.kind(value), NodeKind::Expr(ExprKind::Ctor)) {
        return None;
    }
    let ctor = ctx.child(value, 0)?;
    match ctx.kind(ctor) {
        NodeKind::Ctor(CtorKind::Bytes(b)) => Some(b.clone()),
        _ => None,
    }
}

// ── Attribute helpers ────────────────────────────────────────────────────

pub fn find_attr(ctx: &AstContext, field: NodeId, tag: &str) -> Option<NodeId> {
    let set = ctx.child(field, 1)?;
    if !matches!(ctx.kind(set), NodeKind::AttributeSet) {
        return None;
    }
    ctx.children(set).into_iter().flatten().find(|&a| {
        matches!(ctx.kind(a), NodeKind::Attribute { tag: t } if t == tag)
    })
}

pub fn has_attr(ctx: &AstContext, field: NodeId, tag: &str) -> bool {
    find_attr(ctx, field, tag).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve;
    use std::path::PathBuf;

    fn compile_spicy(ctx: &mut AstContext, source: &str) -> NodeId {
        let outcome = crate::parser::parse_spicy(ctx, source, &PathBuf::from("t.spicy"));
        assert!(outcome.errors.is_empty(), "{:#?}", outcome.errors);
        let module = outcome.module.unwrap();
        for _ in 0..8 {
            let mut changed = resolve::build_scopes(ctx, module);
            changed |= resolve::resolve(ctx, module);
            if !changed {
                break;
            }
        }
        module
    }

    #[test]
    fn unit_becomes_struct_with_grammar() {
        let mut ctx = AstContext::new();
        let module = compile_spicy(
            &mut ctx,
            r#"
            module P;
            public type Msg = unit {
                : b"HI";
                len: uint8;
                body: bytes &size=3;
            };
            "#,
        );
        assert!(transform(&mut ctx, module));

        let g = ctx.grammars.get("P::Msg").expect("grammar registered");
        assert!(g.is_finalized());
        let root = g.root().unwrap();
        assert!(!g.get(root).nullable);
        // FIRST of the unit is the leading literal.
        assert_eq!(
            g.get(root).first.iter().next().unwrap(),
            &crate::grammar::Terminal::Literal(b"HI".to_vec())
        );

        // The unit type is now a struct, and a parse function was added.
        let tdecl = ctx.child(module, 0).unwrap();
        let utype = ctx.child(ctx.child(tdecl, 0).unwrap(), 0).unwrap();
        assert!(matches!(ctx.kind(utype), NodeKind::Type(TypeKind::Struct)));
        let has_parse_fn = ctx.children(module).into_iter().flatten().any(|c| {
            ctx.decl(c)
                .map(|d| d.id.local() == "parse_Msg")
                .unwrap_or(false)
        });
        assert!(has_parse_fn);
    }

    #[test]
    fn container_field_builds_conditional_loop() {
        let mut ctx = AstContext::new();
        let module = compile_spicy(
            &mut ctx,
            r#"
            module P;
            type Seq = unit {
                items: uint8[] &until=($$ == 0);
            };
            "#,
        );
        transform(&mut ctx, module);
        let g = ctx.grammars.get("P::Seq").unwrap();
        assert!(g.is_finalized());
        // The loop choice is nullable (the empty sequence is valid).
        let root = g.root().unwrap();
        assert!(g.get(root).nullable);
    }

    #[test]
    fn switch_with_distinct_guards_finalizes() {
        let mut ctx = AstContext::new();
        let module = compile_spicy(
            &mut ctx,
            r#"
            module P;
            type Msg = unit {
                switch {
                    b"A" -> a: uint8;
                    b"B" -> b: uint16;
                };
            };
            "#,
        );
        transform(&mut ctx, module);
        let g = ctx.grammars.get("P::Msg").unwrap();
        assert!(g.is_finalized());
    }

    #[test]
    fn ambiguous_switch_reports_ll1_conflict() {
        let mut ctx = AstContext::new();
        let module = compile_spicy(
            &mut ctx,
            r#"
            module P;
            type Msg = unit {
                switch {
                    b"A" -> a: uint8;
                    b"A" -> b: uint16;
                };
            };
            "#,
        );
        transform(&mut ctx, module);
        let g = ctx.grammars.get("P::Msg").unwrap();
        assert!(!g.is_finalized());

        // The error names the offending production and the symbol.
        let tdecl = ctx.child(module, 0).unwrap();
        let utype = ctx.child(ctx.child(tdecl, 0).unwrap(), 0).unwrap();
        let errors = ctx.errors(utype);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("\"A\""), "{}", errors[0].message);
        assert!(errors[0].message.contains("_switch_1"));
    }

    #[test]
    fn sub_unit_field_references_child_grammar() {
        let mut ctx = AstContext::new();
        let module = compile_spicy(
            &mut ctx,
            r#"
            module P;
            type Inner = unit {
                tag: uint8;
            };
            type Outer = unit {
                head: Inner;
            };
            "#,
        );
        transform(&mut ctx, module);
        assert!(ctx.grammars.contains_key("P::Inner"));
        let outer = ctx.grammars.get("P::Outer").unwrap();
        assert!(outer.is_finalized());
        let root = outer.root().unwrap();
        let first = &outer.get(root).first;
        assert!(first
            .iter()
            .any(|t| matches!(t, crate::grammar::Terminal::Typed(s) if s.contains("P::Inner"))));
    }
}
