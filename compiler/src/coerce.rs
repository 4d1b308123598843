// coerce.rs — Coercion rules and their cost metric
//
// Two layers: type-level coercion costs consumed by operator resolution
// (lower cost wins), and ctor rewriting used when a literal must take on a
// target type (e.g. an integer literal against a wider field type).
// A `None` cost means no coercion exists.

use crate::ast::{Constness, CtorKind, NodeKind};
use crate::builder::Builder;
use crate::node::NodeId;
use crate::operators::{TypeClass, TypeView};

// ── Style ────────────────────────────────────────────────────────────────

/// Context a coercion happens in; assignment contexts accept a little more
/// than operand matching does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionStyle {
    pub assignment: bool,
    pub operands: bool,
}

impl CoercionStyle {
    pub fn assignment() -> Self {
        Self {
            assignment: true,
            operands: false,
        }
    }

    pub fn operands() -> Self {
        Self {
            assignment: false,
            operands: true,
        }
    }
}

// ── Cost metric ──────────────────────────────────────────────────────────

/// Cost of coercing `view` into the given class. Zero means a direct
/// member of the class.
pub fn class_cost(view: &TypeView, class: TypeClass) -> Option<u32> {
    if view.class == class {
        return Some(0);
    }
    match (view.class, class) {
        // Integers widen into reals.
        (TypeClass::UInt | TypeClass::SInt, TypeClass::Real) => Some(3),
        // A bitfield reads as its underlying unsigned integer.
        (TypeClass::Bitfield, TypeClass::UInt) => Some(1),
        _ => None,
    }
}

/// Cost of making two operand types agree (either side may widen).
pub fn pair_cost(a: &TypeView, b: &TypeView) -> Option<u32> {
    if a.unification == b.unification {
        return Some(0);
    }
    match (a.class, b.class) {
        (TypeClass::UInt, TypeClass::UInt) | (TypeClass::SInt, TypeClass::SInt) => Some(1),
        (TypeClass::UInt, TypeClass::SInt) | (TypeClass::SInt, TypeClass::UInt) => Some(2),
        (TypeClass::Real, TypeClass::UInt | TypeClass::SInt)
        | (TypeClass::UInt | TypeClass::SInt, TypeClass::Real) => Some(3),
        _ => None,
    }
}

// ── Ctor coercion ────────────────────────────────────────────────────────

/// Coerce a ctor node to a target type view, returning a fresh ctor on
/// success. Used by the plugins' `coerce_ctor` hooks.
pub fn coerce_ctor(
    builder: &mut Builder,
    ctor: NodeId,
    target: &TypeView,
    _style: CoercionStyle,
) -> Option<NodeId> {
    let kind = match builder.ctx.kind(ctor) {
        NodeKind::Ctor(k) => k.clone(),
        _ => return None,
    };
    match (&kind, target.class) {
        // Integer literal refits any width that can hold its value.
        (CtorKind::UInt { value, .. }, TypeClass::UInt) => {
            let width = target.width?;
            if width >= 64 || *value < (1u64 << width) {
                Some(builder.ctor_uint(*value, width))
            } else {
                None
            }
        }
        (CtorKind::UInt { value, .. }, TypeClass::SInt) => {
            let width = target.width?;
            let limit = 1i128 << (width - 1);
            if (*value as i128) < limit {
                Some(builder.ctor_sint(*value as i64, width))
            } else {
                None
            }
        }
        (CtorKind::SInt { value, .. }, TypeClass::SInt) => {
            let width = target.width?;
            let limit = 1i128 << (width - 1);
            let v = *value as i128;
            if v >= -limit && v < limit {
                Some(builder.ctor_sint(*value, width))
            } else {
                None
            }
        }
        (CtorKind::UInt { value, .. }, TypeClass::Real) => Some(builder.ctor_real(*value as f64)),
        (CtorKind::SInt { value, .. }, TypeClass::Real) => Some(builder.ctor_real(*value as f64)),
        // String literals read as bytes where bytes are expected.
        (CtorKind::String(s), TypeClass::Bytes) => Some(builder.ctor_bytes(s.as_bytes().to_vec())),
        _ => None,
    }
}

/// Type-to-type coercion at assignment; returns the coerced target type
/// node when the coercion is legal.
pub fn coerce_type(
    builder: &mut Builder,
    from: &TypeView,
    to: &TypeView,
    style: CoercionStyle,
) -> Option<NodeId> {
    let cost = pair_cost(from, to)?;
    if cost == 0 || style.assignment || style.operands {
        // The target type wins; hand back a fresh copy of it.
        let inner = builder.ctx.child(to.node, 0)?;
        let copy = builder.ctx.deepcopy(inner);
        Some(builder.qtype(copy, Constness::Const))
    } else {
        None
    }
}
