// Property-based tests for compiler invariants.
//
// Three categories:
// 1. Arena invariants: parent pointers, identity uniqueness, tree shape
//    after deep-copy-on-reparent.
// 2. Unification: idempotence and structural-equality-by-string over
//    generated type shapes.
// 3. Resolution: generated modules resolve to a fixed point, and one more
//    sweep changes nothing.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;
use std::path::PathBuf;

use spicyc::ast::{Constness, NodeKind};
use spicyc::builder::Builder;
use spicyc::node::{AstContext, NodeId};
use spicyc::pipeline::{Driver, DriverOptions};
use spicyc::unify::{unify, UnifyOutcome};
use spicyc::visitor;

// ── Type generator ───────────────────────────────────────────────────────

/// A recipe for building a type in a fresh context; comparing recipes lets
/// us build the same shape twice.
#[derive(Debug, Clone, PartialEq)]
enum TypeShape {
    UInt(u32),
    SInt(u32),
    Bytes,
    Bool,
    Str,
    Optional(Box<TypeShape>),
    Vector(Box<TypeShape>),
    Set(Box<TypeShape>),
    Map(Box<TypeShape>, Box<TypeShape>),
    Tuple(Vec<TypeShape>),
}

fn arb_type_shape() -> impl Strategy<Value = TypeShape> {
    let leaf = prop_oneof![
        prop_oneof![Just(8u32), Just(16), Just(32), Just(64)].prop_map(TypeShape::UInt),
        prop_oneof![Just(8u32), Just(16), Just(32), Just(64)].prop_map(TypeShape::SInt),
        Just(TypeShape::Bytes),
        Just(TypeShape::Bool),
        Just(TypeShape::Str),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| TypeShape::Optional(Box::new(t))),
            inner.clone().prop_map(|t| TypeShape::Vector(Box::new(t))),
            inner.clone().prop_map(|t| TypeShape::Set(Box::new(t))),
            (inner.clone(), inner.clone())
                .prop_map(|(k, v)| TypeShape::Map(Box::new(k), Box::new(v))),
            prop::collection::vec(inner, 1..4).prop_map(TypeShape::Tuple),
        ]
    })
}

fn build_type(b: &mut Builder, shape: &TypeShape) -> NodeId {
    match shape {
        TypeShape::UInt(w) => b.type_uint(*w),
        TypeShape::SInt(w) => b.type_sint(*w),
        TypeShape::Bytes => b.type_bytes(),
        TypeShape::Bool => b.type_bool(),
        TypeShape::Str => b.type_string(),
        TypeShape::Optional(inner) => {
            let t = build_type(b, inner);
            let q = b.qtype(t, Constness::Const);
            b.type_optional(q)
        }
        TypeShape::Vector(inner) => {
            let t = build_type(b, inner);
            let q = b.qtype(t, Constness::Const);
            b.type_vector(q)
        }
        TypeShape::Set(inner) => {
            let t = build_type(b, inner);
            let q = b.qtype(t, Constness::Const);
            b.type_set(q)
        }
        TypeShape::Map(k, v) => {
            let kt = build_type(b, k);
            let kq = b.qtype(kt, Constness::Const);
            let vt = build_type(b, v);
            let vq = b.qtype(vt, Constness::Const);
            b.type_map(kq, vq)
        }
        TypeShape::Tuple(elems) => {
            let mut built = Vec::new();
            for e in elems {
                let t = build_type(b, e);
                let q = b.qtype(t, Constness::Const);
                built.push((None, q));
            }
            b.type_tuple(built)
        }
    }
}

// ── Module generator ─────────────────────────────────────────────────────

/// A small valid module: constants plus functions that reference them.
fn arb_module_source() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(1u64..1000, 1..4),
        prop::collection::vec(0usize..3, 1..4),
    )
        .prop_map(|(consts, func_refs)| {
            let mut src = String::from("module Gen;\n");
            for (i, v) in consts.iter().enumerate() {
                src.push_str(&format!("const C{i} = {v};\n"));
            }
            for (i, r) in func_refs.iter().enumerate() {
                let cref = format!("C{}", (*r).min(consts.len() - 1));
                src.push_str(&format!(
                    "function f{i}(x: uint64) : uint64 {{ return x + {cref}; }}\n"
                ));
            }
            src
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    // Unification is idempotent and identifies structurally equal types.
    #[test]
    fn unify_idempotent_and_structural(shape in arb_type_shape()) {
        let mut ctx = AstContext::new();
        let t1 = {
            let mut b = Builder::new(&mut ctx);
            build_type(&mut b, &shape)
        };
        let t2 = {
            let mut b = Builder::new(&mut ctx);
            build_type(&mut b, &shape)
        };

        let u1 = unify(&mut ctx, t1);
        let u1_again = unify(&mut ctx, t1);
        let u2 = unify(&mut ctx, t2);

        prop_assert_eq!(&u1, &u1_again);
        prop_assert_eq!(&u1, &u2);
        prop_assert!(matches!(u1, UnifyOutcome::Done(_)));
    }

    // Every non-null child's parent pointer equals its holder, across a
    // generated module, after the full pipeline.
    #[test]
    fn parent_pointers_hold(source in arb_module_source()) {
        let mut d = Driver::new(DriverOptions::default());
        prop_assert!(d.load_string(&source, &PathBuf::from("gen.hlt")));
        d.compile().unwrap();

        let root = d.root();
        for node in visitor::collect(&d.ctx, root) {
            for child in d.ctx.children(node).into_iter().flatten() {
                prop_assert_eq!(d.ctx.parent(child), Some(node));
            }
        }
    }

    // After the driver's fixed point, another sweep is a no-op.
    #[test]
    fn resolution_is_stable(source in arb_module_source()) {
        let mut d = Driver::new(DriverOptions::default());
        prop_assert!(d.load_string(&source, &PathBuf::from("gen.hlt")));
        d.compile().unwrap();

        let root = d.root();
        let changed = spicyc::resolve::build_scopes(&mut d.ctx, root)
            || spicyc::resolve::resolve(&mut d.ctx, root);
        prop_assert!(!changed);
    }

    // Identities are unique and never reused, even as resolution retires
    // and replaces subtrees.
    #[test]
    fn identities_never_reused(source in arb_module_source()) {
        let mut d = Driver::new(DriverOptions::default());
        prop_assert!(d.load_string(&source, &PathBuf::from("gen.hlt")));
        let before = d.ctx.len();
        d.compile().unwrap();

        // New nodes only ever append; old ids keep addressing their node.
        prop_assert!(d.ctx.len() >= before);
        let live = d.ctx.live_nodes();
        let mut sorted = live.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(live.len(), sorted.len());
    }
}

// ── Non-proptest invariants ──────────────────────────────────────────────

#[test]
fn reparenting_preserves_tree_shape() {
    let mut ctx = AstContext::new();
    let leaf = {
        let mut b = Builder::new(&mut ctx);
        b.type_bytes()
    };
    let holder1 = ctx.make(NodeKind::Root, vec![Some(leaf)], spicyc::meta::Meta::none());
    let holder2 = ctx.make(NodeKind::Root, vec![Some(leaf)], spicyc::meta::Meta::none());

    // Each node has exactly one parent; the second holder got a copy.
    assert_eq!(ctx.parent(leaf), Some(holder1));
    let copy = ctx.child(holder2, 0).unwrap();
    assert_ne!(copy, leaf);
    assert_eq!(ctx.parent(copy), Some(holder2));
}
