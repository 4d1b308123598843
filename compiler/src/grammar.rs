// grammar.rs — LL(1) grammars for unit parsing
//
// Each Spicy unit lowers to one grammar of productions. Finalization
// resolves deferred placeholders, computes nullability and FIRST/FOLLOW
// sets by fixed-point iteration, and validates the LL(1) property: at
// every look-ahead choice the alternatives must be distinguishable by one
// token, unless an explicit condition selects between them.
//
// Preconditions: a root has been set before finalize().
// Postconditions: on success every production carries its nullable flag
//   and FIRST/FOLLOW sets for the code generator.
// Failure modes: unresolved deferred productions; LL(1) violations. Both
//   name the offending production.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use crate::node::NodeId;

// ── Terminals ────────────────────────────────────────────────────────────

/// A look-ahead token as seen by FIRST/FOLLOW computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Terminal {
    /// Exact byte literal.
    Literal(Vec<u8>),
    /// A value of some type, identified by a token-class string (usually
    /// the type's unification).
    Typed(String),
    /// Unconstrained input; overlaps with every other terminal.
    Any,
    /// End of input (root FOLLOW).
    Eod,
}

impl Terminal {
    /// Two terminals overlap if an input byte sequence could satisfy both.
    fn overlaps(&self, other: &Terminal) -> bool {
        match (self, other) {
            (Terminal::Any, _) | (_, Terminal::Any) => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Literal(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            Terminal::Typed(token) => write!(f, "<{token}>"),
            Terminal::Any => write!(f, "<any>"),
            Terminal::Eod => write!(f, "<eod>"),
        }
    }
}

// ── Productions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProdId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookAheadDefault {
    None,
    Alternative1,
    Alternative2,
}

#[derive(Debug, Clone)]
pub enum ProdKind {
    /// Match exact bytes.
    Ctor { literal: Vec<u8> },
    /// Parse a value of a primitive type.
    Variable {
        token: String,
        type_node: Option<NodeId>,
    },
    /// Parse a value of a complex type (e.g. a sub-unit).
    TypeLiteral {
        token: String,
        type_node: Option<NodeId>,
    },
    /// Parse elements left to right.
    Sequence { elements: Vec<ProdId> },
    /// Choose between two alternatives on the next input token.
    LookAhead {
        alt_a: ProdId,
        alt_b: ProdId,
        default: LookAheadDefault,
        /// An explicit selection condition exempts the choice from the
        /// FIRST-disjointness requirement.
        condition: Option<NodeId>,
    },
    /// Non-owning back-edge, used to express recursion.
    Reference { target: ProdId },
    /// Placeholder that must be resolved before finalization.
    Deferred { target: Option<ProdId> },
    /// Matches empty input.
    Epsilon,
}

#[derive(Debug, Clone)]
pub struct Production {
    pub symbol: String,
    pub kind: ProdKind,
    pub nullable: bool,
    pub first: BTreeSet<Terminal>,
    pub follow: BTreeSet<Terminal>,
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    pub production: String,
    pub message: String,
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grammar error in production '{}': {}", self.production, self.message)
    }
}

// ── Grammar ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Grammar {
    pub name: String,
    prods: Vec<Production>,
    root: Option<ProdId>,
    finalized: bool,
}

impl Grammar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prods: Vec::new(),
            root: None,
            finalized: false,
        }
    }

    pub fn add(&mut self, symbol: impl Into<String>, kind: ProdKind) -> ProdId {
        let id = ProdId(self.prods.len());
        self.prods.push(Production {
            symbol: symbol.into(),
            kind,
            nullable: false,
            first: BTreeSet::new(),
            follow: BTreeSet::new(),
        });
        id
    }

    /// Point a deferred placeholder at its real production.
    pub fn resolve(&mut self, deferred: ProdId, target: ProdId) {
        if let ProdKind::Deferred { target: slot } = &mut self.prods[deferred.0].kind {
            *slot = Some(target);
        }
    }

    pub fn set_root(&mut self, root: ProdId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<ProdId> {
        self.root
    }

    pub fn get(&self, id: ProdId) -> &Production {
        &self.prods[id.0]
    }

    pub fn len(&self) -> usize {
        self.prods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prods.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn productions(&self) -> impl Iterator<Item = (ProdId, &Production)> {
        self.prods.iter().enumerate().map(|(i, p)| (ProdId(i), p))
    }

    // ── Finalization ─────────────────────────────────────────────────

    pub fn finalize(&mut self) -> Result<(), GrammarError> {
        let root = self.root.ok_or_else(|| GrammarError {
            production: self.name.clone(),
            message: "grammar has no root production".into(),
        })?;

        // Phase 1: every deferred production must be resolved.
        for p in &self.prods {
            if let ProdKind::Deferred { target: None } = p.kind {
                return Err(GrammarError {
                    production: p.symbol.clone(),
                    message: "deferred production was never resolved".into(),
                });
            }
        }

        self.compute_nullable();
        self.compute_first();
        self.compute_follow(root);
        self.check_ll1()?;

        self.finalized = true;
        Ok(())
    }

    fn target_of(&self, id: ProdId) -> ProdId {
        match self.prods[id.0].kind {
            ProdKind::Reference { target } => target,
            ProdKind::Deferred { target: Some(t) } => t,
            _ => id,
        }
    }

    fn compute_nullable(&mut self) {
        loop {
            let mut changed = false;
            for i in 0..self.prods.len() {
                if self.prods[i].nullable {
                    continue;
                }
                let nullable = match &self.prods[i].kind {
                    ProdKind::Epsilon => true,
                    ProdKind::Ctor { .. }
                    | ProdKind::Variable { .. }
                    | ProdKind::TypeLiteral { .. } => false,
                    ProdKind::Sequence { elements } => elements
                        .iter()
                        .all(|&e| self.prods[self.target_of(e).0].nullable),
                    ProdKind::LookAhead { alt_a, alt_b, .. } => {
                        self.prods[self.target_of(*alt_a).0].nullable
                            || self.prods[self.target_of(*alt_b).0].nullable
                    }
                    ProdKind::Reference { target } => self.prods[target.0].nullable,
                    ProdKind::Deferred { target } => {
                        target.map(|t| self.prods[t.0].nullable).unwrap_or(false)
                    }
                };
                if nullable {
                    self.prods[i].nullable = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn compute_first(&mut self) {
        loop {
            let mut changed = false;
            for i in 0..self.prods.len() {
                let computed: BTreeSet<Terminal> = match &self.prods[i].kind {
                    ProdKind::Epsilon => BTreeSet::new(),
                    ProdKind::Ctor { literal } => {
                        [Terminal::Literal(literal.clone())].into_iter().collect()
                    }
                    ProdKind::Variable { token, .. } | ProdKind::TypeLiteral { token, .. } => {
                        let t = if token == "any" {
                            Terminal::Any
                        } else {
                            Terminal::Typed(token.clone())
                        };
                        [t].into_iter().collect()
                    }
                    ProdKind::Sequence { elements } => {
                        let mut set = BTreeSet::new();
                        for &e in elements {
                            let t = self.target_of(e);
                            set.extend(self.prods[t.0].first.iter().cloned());
                            if !self.prods[t.0].nullable {
                                break;
                            }
                        }
                        set
                    }
                    ProdKind::LookAhead { alt_a, alt_b, .. } => {
                        let a = self.target_of(*alt_a);
                        let b = self.target_of(*alt_b);
                        self.prods[a.0]
                            .first
                            .iter()
                            .chain(self.prods[b.0].first.iter())
                            .cloned()
                            .collect()
                    }
                    ProdKind::Reference { target } => self.prods[target.0].first.clone(),
                    ProdKind::Deferred { target } => target
                        .map(|t| self.prods[t.0].first.clone())
                        .unwrap_or_default(),
                };
                if computed != self.prods[i].first {
                    self.prods[i].first = computed;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn compute_follow(&mut self, root: ProdId) {
        let entry = self.target_of(root);
        self.prods[entry.0].follow.insert(Terminal::Eod);
        loop {
            let mut changed = false;
            for i in 0..self.prods.len() {
                let holder_follow = self.prods[i].follow.clone();
                match self.prods[i].kind.clone() {
                    ProdKind::Sequence { elements } => {
                        for (pos, &e) in elements.iter().enumerate() {
                            let elem = self.target_of(e);
                            // FIRST of everything after this element, up to
                            // the first non-nullable sibling.
                            let mut addition = BTreeSet::new();
                            let mut all_nullable = true;
                            for &sib in &elements[pos + 1..] {
                                let s = self.target_of(sib);
                                addition.extend(self.prods[s.0].first.iter().cloned());
                                if !self.prods[s.0].nullable {
                                    all_nullable = false;
                                    break;
                                }
                            }
                            if all_nullable {
                                addition.extend(holder_follow.iter().cloned());
                            }
                            changed |= extend(&mut self.prods[elem.0].follow, addition);
                        }
                    }
                    ProdKind::LookAhead { alt_a, alt_b, .. } => {
                        for alt in [alt_a, alt_b] {
                            let t = self.target_of(alt);
                            changed |= extend(
                                &mut self.prods[t.0].follow,
                                holder_follow.iter().cloned().collect(),
                            );
                        }
                    }
                    ProdKind::Reference { target } => {
                        changed |= extend(
                            &mut self.prods[target.0].follow,
                            holder_follow.iter().cloned().collect(),
                        );
                    }
                    ProdKind::Deferred { target: Some(t) } => {
                        changed |= extend(
                            &mut self.prods[t.0].follow,
                            holder_follow.iter().cloned().collect(),
                        );
                    }
                    _ => {}
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn check_ll1(&self) -> Result<(), GrammarError> {
        for p in &self.prods {
            let ProdKind::LookAhead {
                alt_a,
                alt_b,
                condition,
                ..
            } = &p.kind
            else {
                continue;
            };
            if condition.is_some() {
                continue;
            }
            let a = &self.prods[self.target_of(*alt_a).0];
            let b = &self.prods[self.target_of(*alt_b).0];

            if a.nullable && b.nullable {
                return Err(GrammarError {
                    production: p.symbol.clone(),
                    message: "both look-ahead alternatives can derive empty input".into(),
                });
            }

            let conflicts: Vec<String> = a
                .first
                .iter()
                .flat_map(|ta| {
                    b.first
                        .iter()
                        .filter(move |tb| ta.overlaps(tb))
                        .map(move |tb| {
                            if ta == tb {
                                format!("{ta}")
                            } else {
                                format!("{ta}/{tb}")
                            }
                        })
                })
                .collect();
            if !conflicts.is_empty() {
                return Err(GrammarError {
                    production: p.symbol.clone(),
                    message: format!(
                        "look-ahead alternatives are ambiguous on {}",
                        conflicts.join(", ")
                    ),
                });
            }
        }
        Ok(())
    }
}

fn extend(set: &mut BTreeSet<Terminal>, addition: BTreeSet<Terminal>) -> bool {
    let before = set.len();
    set.extend(addition);
    set.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(g: &mut Grammar, symbol: &str, value: &[u8]) -> ProdId {
        g.add(
            symbol,
            ProdKind::Ctor {
                literal: value.to_vec(),
            },
        )
    }

    fn epsilon(g: &mut Grammar) -> ProdId {
        g.add("epsilon", ProdKind::Epsilon)
    }

    #[test]
    fn basic_sequence_finalizes() {
        let mut g = Grammar::new("basic");
        let l1 = literal(&mut g, "l1", b"l1-val");
        let l2 = literal(&mut g, "l2", b"l2-val");
        let l3 = literal(&mut g, "l3", b"l3-val");
        let root = g.add(
            "S",
            ProdKind::Sequence {
                elements: vec![l1, l2, l3],
            },
        );
        g.set_root(root);
        g.finalize().unwrap();

        assert!(!g.get(root).nullable);
        assert_eq!(
            g.get(root).first,
            [Terminal::Literal(b"l1-val".to_vec())].into_iter().collect()
        );
        assert!(g.get(root).follow.contains(&Terminal::Eod));
    }

    #[test]
    fn follow_set_of_leading_element() {
        let mut g = Grammar::new("follow");
        let a = literal(&mut g, "a", b"a");
        let b = literal(&mut g, "b", b"b");
        let root = g.add(
            "S",
            ProdKind::Sequence {
                elements: vec![a, b],
            },
        );
        g.set_root(root);
        g.finalize().unwrap();
        assert_eq!(
            g.get(a).follow,
            [Terminal::Literal(b"b".to_vec())].into_iter().collect()
        );
        assert!(g.get(b).follow.contains(&Terminal::Eod));
    }

    #[test]
    fn lookahead_with_disjoint_first_sets() {
        let mut g = Grammar::new("choice");
        let a = literal(&mut g, "a", b"a");
        let b = literal(&mut g, "b", b"b");
        let choice = g.add(
            "C",
            ProdKind::LookAhead {
                alt_a: a,
                alt_b: b,
                default: LookAheadDefault::None,
                condition: None,
            },
        );
        g.set_root(choice);
        g.finalize().unwrap();
        assert_eq!(g.get(choice).first.len(), 2);
    }

    #[test]
    fn overlapping_first_sets_are_rejected() {
        // Two alternatives whose FIRST sets both contain `a`.
        let mut g = Grammar::new("ambiguous");
        let a1 = literal(&mut g, "a1", b"a");
        let a2 = literal(&mut g, "a2", b"a");
        let choice = g.add(
            "C",
            ProdKind::LookAhead {
                alt_a: a1,
                alt_b: a2,
                default: LookAheadDefault::None,
                condition: None,
            },
        );
        g.set_root(choice);
        let err = g.finalize().unwrap_err();
        assert_eq!(err.production, "C");
        assert!(err.message.contains("\"a\""), "message: {}", err.message);
    }

    #[test]
    fn doubly_nullable_lookahead_is_rejected() {
        let mut g = Grammar::new("nullable");
        let e1 = epsilon(&mut g);
        let e2 = epsilon(&mut g);
        let choice = g.add(
            "C",
            ProdKind::LookAhead {
                alt_a: e1,
                alt_b: e2,
                default: LookAheadDefault::None,
                condition: None,
            },
        );
        g.set_root(choice);
        let err = g.finalize().unwrap_err();
        assert!(err.message.contains("empty input"));
    }

    #[test]
    fn explicit_condition_exempts_overlap() {
        let mut g = Grammar::new("conditional");
        let a1 = literal(&mut g, "a1", b"a");
        let a2 = literal(&mut g, "a2", b"a");
        let choice = g.add(
            "C",
            ProdKind::LookAhead {
                alt_a: a1,
                alt_b: a2,
                default: LookAheadDefault::Alternative1,
                condition: Some(NodeId(0)),
            },
        );
        g.set_root(choice);
        g.finalize().unwrap();
    }

    #[test]
    fn unresolved_deferred_is_rejected() {
        let mut g = Grammar::new("deferred");
        let d = g.add("pending", ProdKind::Deferred { target: None });
        g.set_root(d);
        let err = g.finalize().unwrap_err();
        assert_eq!(err.production, "pending");
        assert!(err.message.contains("never resolved"));
    }

    #[test]
    fn recursion_through_reference_terminates() {
        // list := ( item list | epsilon ), the classic look-ahead loop.
        let mut g = Grammar::new("loop");
        let item = literal(&mut g, "item", b"x");
        let list_slot = g.add("list", ProdKind::Deferred { target: None });
        let list_ref = g.add("list-ref", ProdKind::Reference { target: list_slot });
        let body = g.add(
            "body",
            ProdKind::Sequence {
                elements: vec![item, list_ref],
            },
        );
        let eps = epsilon(&mut g);
        let list = g.add(
            "list-choice",
            ProdKind::LookAhead {
                alt_a: body,
                alt_b: eps,
                default: LookAheadDefault::Alternative2,
                condition: None,
            },
        );
        g.resolve(list_slot, list);
        let root = g.add(
            "S",
            ProdKind::Sequence {
                elements: vec![list],
            },
        );
        g.set_root(root);
        g.finalize().unwrap();

        assert!(g.get(list).nullable);
        assert_eq!(
            g.get(list).first,
            [Terminal::Literal(b"x".to_vec())].into_iter().collect()
        );
        // The loop body's item can be followed by another item.
        assert!(g
            .get(item)
            .follow
            .contains(&Terminal::Literal(b"x".to_vec())));
    }

    #[test]
    fn typed_and_any_terminals_overlap_rules() {
        let mut g = Grammar::new("typed");
        let v1 = g.add(
            "v1",
            ProdKind::Variable {
                token: "uint(8)".into(),
                type_node: None,
            },
        );
        let v2 = g.add(
            "v2",
            ProdKind::Variable {
                token: "any".into(),
                type_node: None,
            },
        );
        let choice = g.add(
            "C",
            ProdKind::LookAhead {
                alt_a: v1,
                alt_b: v2,
                default: LookAheadDefault::None,
                condition: None,
            },
        );
        g.set_root(choice);
        let err = g.finalize().unwrap_err();
        assert!(err.message.contains("ambiguous"));
    }
}
