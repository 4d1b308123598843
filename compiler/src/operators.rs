// operators.rs — Overloaded operator signatures and resolution
//
// The registry holds every operator signature, indexed by kind. Resolution
// takes the operand types of an unresolved operator expression and picks
// the signature with the lowest total coercion cost, breaking ties by
// priority; remaining ties are an ambiguity the resolver reports.
//
// The registry is built once at first use and read-only afterwards.
// Built-in method calls (e.g. `bytes.decode()`) live in a companion table
// resolved the same way.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::ast::{NodeKind, OperatorKind, ParamKind, TypeKind};
use crate::coerce;
use crate::node::{AstContext, NodeId};
use crate::unify::{unify, UnifyOutcome};

// ── Type views ───────────────────────────────────────────────────────────

/// Coarse type classification used by operand constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    UInt,
    SInt,
    Real,
    Bool,
    Bytes,
    Stream,
    RegExp,
    Address,
    Port,
    Interval,
    Time,
    String,
    Tuple,
    Struct,
    Union,
    Enum,
    Optional,
    Result,
    Reference,
    Vector,
    List,
    Set,
    Map,
    Function,
    Bitfield,
    Unit,
    Void,
}

/// A resolved snapshot of an operand's type, sufficient for signature
/// matching without touching the arena again.
#[derive(Debug, Clone)]
pub struct TypeView {
    pub class: TypeClass,
    pub width: Option<u32>,
    pub unification: String,
    /// Unification of the element/deref type, for containers and wrappers.
    pub elem: Option<String>,
    /// Map key/value unifications.
    pub key: Option<String>,
    pub value: Option<String>,
    /// The qualified type node this view was taken from.
    pub node: NodeId,
}

/// Build a `TypeView` for a qualified type node. `None` when the type is
/// not unifiable yet (next resolver sweep will retry).
pub fn type_view(ctx: &mut AstContext, qtype: NodeId) -> Option<TypeView> {
    let utype = resolve_alias(ctx, ctx.child(qtype, 0)?)?;
    let unification = match unify(ctx, utype) {
        UnifyOutcome::Done(s) => s,
        _ => return None,
    };
    let (class, width) = classify(ctx, utype)?;

    let child_unif = |ctx: &mut AstContext, slot: usize| -> Option<String> {
        let child = ctx.child(utype, slot)?;
        let inner = ctx.child(child, 0)?;
        match unify(ctx, inner) {
            UnifyOutcome::Done(s) => Some(s),
            _ => None,
        }
    };

    let (elem, key, value) = match class {
        TypeClass::Vector | TypeClass::List | TypeClass::Set | TypeClass::Optional
        | TypeClass::Result | TypeClass::Reference => (child_unif(ctx, 0), None, None),
        TypeClass::Map => (None, child_unif(ctx, 0), child_unif(ctx, 1)),
        _ => (None, None, None),
    };

    Some(TypeView {
        class,
        width,
        unification,
        elem,
        key,
        value,
        node: qtype,
    })
}

/// Follow resolved `Name` aliases to the underlying type node.
pub fn resolve_alias(ctx: &AstContext, utype: NodeId) -> Option<NodeId> {
    let mut current = utype;
    for _ in 0..64 {
        match ctx.kind(current) {
            NodeKind::Type(TypeKind::Name { .. }) => {
                let index = ctx.name_resolution(current)?;
                let decl = ctx.lookup(index);
                let qtype = ctx.child(decl, 0)?;
                current = ctx.child(qtype, 0)?;
            }
            _ => return Some(current),
        }
    }
    None
}

fn classify(ctx: &AstContext, utype: NodeId) -> Option<(TypeClass, Option<u32>)> {
    let NodeKind::Type(kind) = ctx.kind(utype) else {
        return None;
    };
    Some(match kind {
        TypeKind::UInt(w) => (TypeClass::UInt, Some(*w)),
        TypeKind::SInt(w) => (TypeClass::SInt, Some(*w)),
        TypeKind::Real => (TypeClass::Real, None),
        TypeKind::Bool => (TypeClass::Bool, None),
        TypeKind::Bytes => (TypeClass::Bytes, None),
        TypeKind::Stream => (TypeClass::Stream, None),
        TypeKind::RegExp => (TypeClass::RegExp, None),
        TypeKind::Address => (TypeClass::Address, None),
        TypeKind::Port => (TypeClass::Port, None),
        TypeKind::Interval => (TypeClass::Interval, None),
        TypeKind::Time => (TypeClass::Time, None),
        TypeKind::String => (TypeClass::String, None),
        TypeKind::Void => (TypeClass::Void, None),
        TypeKind::Tuple { .. } => (TypeClass::Tuple, None),
        TypeKind::Struct => (TypeClass::Struct, None),
        TypeKind::Union => (TypeClass::Union, None),
        TypeKind::Enum { .. } => (TypeClass::Enum, None),
        TypeKind::Optional => (TypeClass::Optional, None),
        TypeKind::Result => (TypeClass::Result, None),
        TypeKind::StrongRef | TypeKind::WeakRef | TypeKind::ValueRef => {
            (TypeClass::Reference, None)
        }
        TypeKind::Vector => (TypeClass::Vector, None),
        TypeKind::List => (TypeClass::List, None),
        TypeKind::Set => (TypeClass::Set, None),
        TypeKind::Map => (TypeClass::Map, None),
        TypeKind::Function { .. } => (TypeClass::Function, None),
        TypeKind::Bitfield { width, .. } => (TypeClass::Bitfield, Some(*width)),
        TypeKind::Unit => (TypeClass::Unit, None),
        TypeKind::Name { .. } | TypeKind::Auto | TypeKind::OperandList
        | TypeKind::Wildcard { .. } => return None,
    })
}

// ── Signatures ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Operand must belong to the class (or coerce into it).
    Class(TypeClass),
    /// Operand must unify with operand `i` (or coerce to/from it).
    SameAs(usize),
    /// Any type; matches at a small cost so specific overloads win.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandSpec {
    pub kind: ParamKind,
    pub constraint: Constraint,
}

const fn in_(constraint: Constraint) -> OperandSpec {
    OperandSpec {
        kind: ParamKind::In,
        constraint,
    }
}

/// How a signature's result type derives from its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSpec {
    Bool,
    UInt64,
    Void,
    Str,
    /// Same type as operand `i`.
    Operand(usize),
    /// The wider of two integer/real operands.
    WiderOf(usize, usize),
    /// Element (or deref) type of operand `i`.
    ElementOf(usize),
    /// Value type of a map operand.
    MapValueOf(usize),
}

/// Operator slot for a direct function call; calls are resolved against
/// the callee's function type rather than the signature table.
pub const OP_DIRECT_CALL: OperatorId = usize::MAX;
/// Operator slot for a built-in method call (see `lookup_method`).
pub const OP_METHOD_CALL: OperatorId = usize::MAX - 1;

#[derive(Debug, Clone)]
pub struct Signature {
    pub kind: OperatorKind,
    pub name: &'static str,
    pub operands: Vec<OperandSpec>,
    pub result: ResultSpec,
    pub priority: i32,
}

pub type OperatorId = usize;

// ── Registry ─────────────────────────────────────────────────────────────

pub struct OperatorRegistry {
    signatures: Vec<Signature>,
    by_kind: HashMap<OperatorKind, Vec<OperatorId>>,
}

impl OperatorRegistry {
    fn build() -> Self {
        let mut reg = OperatorRegistry {
            signatures: Vec::new(),
            by_kind: HashMap::new(),
        };
        for sig in standard_signatures() {
            reg.add(sig);
        }
        reg
    }

    fn add(&mut self, sig: Signature) {
        let id = self.signatures.len();
        self.by_kind.entry(sig.kind).or_default().push(id);
        self.signatures.push(sig);
    }

    pub fn get(&self, id: OperatorId) -> &Signature {
        &self.signatures[id]
    }

    pub fn candidates(&self, kind: OperatorKind) -> &[OperatorId] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the best signature for the operand types.
    pub fn resolve(&self, kind: OperatorKind, operands: &[TypeView]) -> Resolution {
        let mut best: Vec<(OperatorId, u32, i32)> = Vec::new();
        for &id in self.candidates(kind) {
            let sig = &self.signatures[id];
            if sig.operands.len() != operands.len() {
                continue;
            }
            let mut total = 0u32;
            let mut ok = true;
            for (i, spec) in sig.operands.iter().enumerate() {
                match operand_cost(spec.constraint, operands, i) {
                    Some(cost) => total += cost,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                best.push((id, total, sig.priority));
            }
        }
        if best.is_empty() {
            return Resolution::NoMatch;
        }
        let min_cost = best.iter().map(|(_, c, _)| *c).min().unwrap();
        let cheapest: Vec<_> = best.into_iter().filter(|(_, c, _)| *c == min_cost).collect();
        let max_prio = cheapest.iter().map(|(_, _, p)| *p).max().unwrap();
        let winners: Vec<_> = cheapest
            .into_iter()
            .filter(|(_, _, p)| *p == max_prio)
            .collect();
        match winners.len() {
            1 => Resolution::Match {
                operator: winners[0].0,
                cost: min_cost,
            },
            _ => Resolution::Ambiguous(winners.into_iter().map(|(id, _, _)| id).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Match { operator: OperatorId, cost: u32 },
    NoMatch,
    Ambiguous(Vec<OperatorId>),
}

fn operand_cost(constraint: Constraint, views: &[TypeView], i: usize) -> Option<u32> {
    match constraint {
        Constraint::Any => Some(1),
        Constraint::Class(class) => coerce::class_cost(&views[i], class),
        Constraint::SameAs(j) => {
            if views[i].unification == views[j].unification {
                Some(0)
            } else {
                coerce::pair_cost(&views[i], &views[j])
            }
        }
    }
}

static REGISTRY: Lazy<OperatorRegistry> = Lazy::new(OperatorRegistry::build);

pub fn registry() -> &'static OperatorRegistry {
    &REGISTRY
}

// ── Standard signatures ──────────────────────────────────────────────────

fn arithmetic(kind: OperatorKind, name_uint: &'static str, name_sint: &'static str, name_real: &'static str) -> Vec<Signature> {
    [
        (TypeClass::UInt, name_uint),
        (TypeClass::SInt, name_sint),
        (TypeClass::Real, name_real),
    ]
    .into_iter()
    .map(|(class, name)| Signature {
        kind,
        name,
        operands: vec![in_(Constraint::Class(class)), in_(Constraint::SameAs(0))],
        result: ResultSpec::WiderOf(0, 1),
        priority: 0,
    })
    .collect()
}

fn comparison(kind: OperatorKind, name: &'static str, classes: &[TypeClass]) -> Vec<Signature> {
    classes
        .iter()
        .map(|&class| Signature {
            kind,
            name,
            operands: vec![in_(Constraint::Class(class)), in_(Constraint::SameAs(0))],
            result: ResultSpec::Bool,
            priority: 0,
        })
        .collect()
}

fn standard_signatures() -> Vec<Signature> {
    use OperatorKind::*;
    let ordered = &[
        TypeClass::UInt,
        TypeClass::SInt,
        TypeClass::Real,
        TypeClass::Bytes,
        TypeClass::String,
        TypeClass::Time,
        TypeClass::Interval,
        TypeClass::Port,
        TypeClass::Address,
    ];

    let mut sigs = Vec::new();
    sigs.extend(arithmetic(Add, "uint::Sum", "int::Sum", "real::Sum"));
    sigs.extend(arithmetic(Difference, "uint::Difference", "int::Difference", "real::Difference"));
    sigs.extend(arithmetic(Multiple, "uint::Multiple", "int::Multiple", "real::Multiple"));
    sigs.extend(arithmetic(Division, "uint::Division", "int::Division", "real::Division"));
    sigs.extend(arithmetic(Modulo, "uint::Modulo", "int::Modulo", "real::Modulo"));

    // Bytes concatenation.
    sigs.push(Signature {
        kind: Add,
        name: "bytes::Sum",
        operands: vec![
            in_(Constraint::Class(TypeClass::Bytes)),
            in_(Constraint::SameAs(0)),
        ],
        result: ResultSpec::Operand(0),
        priority: 0,
    });

    // Time arithmetic.
    sigs.push(Signature {
        kind: Add,
        name: "time::SumInterval",
        operands: vec![
            in_(Constraint::Class(TypeClass::Time)),
            in_(Constraint::Class(TypeClass::Interval)),
        ],
        result: ResultSpec::Operand(0),
        priority: 0,
    });
    sigs.push(Signature {
        kind: Add,
        name: "interval::Sum",
        operands: vec![
            in_(Constraint::Class(TypeClass::Interval)),
            in_(Constraint::SameAs(0)),
        ],
        result: ResultSpec::Operand(0),
        priority: 0,
    });

    // Equality over everything with identical types; specific overloads
    // win through the cost model.
    sigs.push(Signature {
        kind: Equal,
        name: "generic::Equal",
        operands: vec![in_(Constraint::Any), in_(Constraint::SameAs(0))],
        result: ResultSpec::Bool,
        priority: -1,
    });
    sigs.push(Signature {
        kind: Unequal,
        name: "generic::Unequal",
        operands: vec![in_(Constraint::Any), in_(Constraint::SameAs(0))],
        result: ResultSpec::Bool,
        priority: -1,
    });

    sigs.extend(comparison(Lower, "generic::Lower", ordered));
    sigs.extend(comparison(LowerEqual, "generic::LowerEqual", ordered));
    sigs.extend(comparison(Greater, "generic::Greater", ordered));
    sigs.extend(comparison(GreaterEqual, "generic::GreaterEqual", ordered));

    // Boolean connectives.
    sigs.push(Signature {
        kind: LogicalAnd,
        name: "bool::And",
        operands: vec![
            in_(Constraint::Class(TypeClass::Bool)),
            in_(Constraint::Class(TypeClass::Bool)),
        ],
        result: ResultSpec::Bool,
        priority: 0,
    });
    sigs.push(Signature {
        kind: LogicalOr,
        name: "bool::Or",
        operands: vec![
            in_(Constraint::Class(TypeClass::Bool)),
            in_(Constraint::Class(TypeClass::Bool)),
        ],
        result: ResultSpec::Bool,
        priority: 0,
    });
    sigs.push(Signature {
        kind: Negate,
        name: "bool::Negate",
        operands: vec![in_(Constraint::Class(TypeClass::Bool))],
        result: ResultSpec::Bool,
        priority: 0,
    });

    // Size.
    for (class, name) in [
        (TypeClass::Bytes, "bytes::Size"),
        (TypeClass::String, "string::Size"),
        (TypeClass::Vector, "vector::Size"),
        (TypeClass::List, "list::Size"),
        (TypeClass::Set, "set::Size"),
        (TypeClass::Map, "map::Size"),
        (TypeClass::Stream, "stream::Size"),
    ] {
        sigs.push(Signature {
            kind: Size,
            name,
            operands: vec![in_(Constraint::Class(class))],
            result: ResultSpec::UInt64,
            priority: 0,
        });
    }

    // Indexing.
    sigs.push(Signature {
        kind: Index,
        name: "vector::Index",
        operands: vec![
            in_(Constraint::Class(TypeClass::Vector)),
            in_(Constraint::Class(TypeClass::UInt)),
        ],
        result: ResultSpec::ElementOf(0),
        priority: 0,
    });
    sigs.push(Signature {
        kind: Index,
        name: "bytes::Index",
        operands: vec![
            in_(Constraint::Class(TypeClass::Bytes)),
            in_(Constraint::Class(TypeClass::UInt)),
        ],
        result: ResultSpec::UInt64,
        priority: 0,
    });
    sigs.push(Signature {
        kind: Index,
        name: "map::Index",
        operands: vec![
            in_(Constraint::Class(TypeClass::Map)),
            in_(Constraint::Any),
        ],
        result: ResultSpec::MapValueOf(0),
        priority: 0,
    });

    // Deref of optionals, results, and references.
    for (class, name) in [
        (TypeClass::Optional, "optional::Deref"),
        (TypeClass::Result, "result::Deref"),
        (TypeClass::Reference, "reference::Deref"),
    ] {
        sigs.push(Signature {
            kind: Deref,
            name,
            operands: vec![in_(Constraint::Class(class))],
            result: ResultSpec::ElementOf(0),
            priority: 0,
        });
    }

    sigs
}

// ── Built-in methods ─────────────────────────────────────────────────────

/// A built-in method on a runtime value type, resolved like an operator.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub receiver: TypeClass,
    pub name: &'static str,
    pub params: Vec<OperandSpec>,
    pub result: ResultSpec,
}

static METHODS: Lazy<Vec<MethodSig>> = Lazy::new(|| {
    vec![
        MethodSig {
            receiver: TypeClass::Bytes,
            name: "decode",
            params: vec![],
            result: ResultSpec::Str,
        },
        MethodSig {
            receiver: TypeClass::Vector,
            name: "push_back",
            params: vec![in_(Constraint::Any)],
            result: ResultSpec::Void,
        },
        MethodSig {
            receiver: TypeClass::Vector,
            name: "back",
            params: vec![],
            result: ResultSpec::ElementOf(0),
        },
        MethodSig {
            receiver: TypeClass::Map,
            name: "get",
            params: vec![in_(Constraint::Any)],
            result: ResultSpec::MapValueOf(0),
        },
    ]
});

pub fn lookup_method(receiver: TypeClass, name: &str) -> Option<&'static MethodSig> {
    METHODS
        .iter()
        .find(|m| m.receiver == receiver && m.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Constness;
    use crate::builder::Builder;

    fn view(ctx: &mut AstContext, f: impl FnOnce(&mut Builder) -> NodeId) -> TypeView {
        let (qt, _) = {
            let mut b = Builder::new(ctx);
            let t = f(&mut b);
            let qt = b.qtype(t, Constness::Const);
            (qt, t)
        };
        type_view(ctx, qt).expect("view")
    }

    #[test]
    fn uint_addition_resolves() {
        let mut ctx = AstContext::new();
        let a = view(&mut ctx, |b| b.type_uint(32));
        let b_ = view(&mut ctx, |b| b.type_uint(32));
        match registry().resolve(OperatorKind::Add, &[a, b_]) {
            Resolution::Match { operator, cost } => {
                assert_eq!(registry().get(operator).name, "uint::Sum");
                assert_eq!(cost, 0);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn widening_costs_more_but_matches() {
        let mut ctx = AstContext::new();
        let a = view(&mut ctx, |b| b.type_uint(8));
        let b_ = view(&mut ctx, |b| b.type_uint(32));
        match registry().resolve(OperatorKind::Add, &[a, b_]) {
            Resolution::Match { operator, cost } => {
                assert_eq!(registry().get(operator).name, "uint::Sum");
                assert!(cost > 0);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn bytes_plus_uint_has_no_match() {
        let mut ctx = AstContext::new();
        let a = view(&mut ctx, |b| b.type_bytes());
        let b_ = view(&mut ctx, |b| b.type_uint(8));
        assert_eq!(registry().resolve(OperatorKind::Add, &[a, b_]), Resolution::NoMatch);
    }

    #[test]
    fn equality_applies_to_identical_types() {
        let mut ctx = AstContext::new();
        let a = view(&mut ctx, |b| b.type_bytes());
        let b_ = view(&mut ctx, |b| b.type_bytes());
        match registry().resolve(OperatorKind::Equal, &[a, b_]) {
            Resolution::Match { operator, .. } => {
                assert_eq!(registry().get(operator).name, "generic::Equal");
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn vector_index_yields_element() {
        let mut ctx = AstContext::new();
        let vec_view = {
            let mut b = Builder::new(&mut ctx);
            let elem = b.type_bytes();
            let eq = b.qtype(elem, Constness::Const);
            let v = b.type_vector(eq);
            let qv = b.qtype(v, Constness::Const);
            drop(b);
            type_view(&mut ctx, qv).unwrap()
        };
        let idx = view(&mut ctx, |b| b.type_uint(64));
        match registry().resolve(OperatorKind::Index, &[vec_view.clone(), idx]) {
            Resolution::Match { operator, .. } => {
                assert_eq!(registry().get(operator).result, ResultSpec::ElementOf(0));
                assert_eq!(vec_view.elem.as_deref(), Some("bytes"));
                let _ = operator;
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn builtin_method_lookup() {
        assert!(lookup_method(TypeClass::Bytes, "decode").is_some());
        assert!(lookup_method(TypeClass::Bytes, "no_such_method").is_none());
    }
}
