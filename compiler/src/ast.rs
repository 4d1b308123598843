// ast.rs — Tagged AST node kinds
//
// Every AST entity is a `Node` in the arena (see `node.rs`) whose concrete
// variant is one of the tagged sums below: declarations, types,
// expressions, statements, ctors (literal values), and attributes. The
// kinds hold only plain data; child nodes live in the node's ordered child
// list, with each variant documenting its child slots.
//
// Preconditions: none (data-only module).
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Scoped identifiers ───────────────────────────────────────────────────

/// A possibly-scoped identifier such as `HTTP::Request::uri`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component.
    pub fn local(&self) -> &str {
        self.0.rsplit("::").next().unwrap_or(&self.0)
    }

    /// Everything before the final component, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.0.rsplit_once("::").map(|(ns, _)| ns)
    }

    pub fn is_scoped(&self) -> bool {
        self.0.contains("::")
    }

    /// `self` joined with a sub-path: `Id("A").join("b") == A::b`.
    pub fn join(&self, sub: &str) -> Id {
        if self.0.is_empty() {
            Id::new(sub)
        } else {
            Id::new(format!("{}::{}", self.0, sub))
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::new(s)
    }
}

// ── Common enums ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constness {
    Const,
    Mutable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Lhs,
    Rhs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    Private,
    Public,
    Export,
    Init,
    PreInit,
    Struct,
}

/// How a parameter is passed; codegen maps these to C++ usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    In,
    InOut,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionFlavor {
    Function,
    Method,
    Hook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    Standard,
    Extern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Big,
    Little,
    Network,
    Host,
}

// ── Node kinds ───────────────────────────────────────────────────────────

/// The concrete variant of an AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Root of a compile job. Children: module declarations.
    Root,

    /// A declaration; payload in `DeclData` + `DeclKind`.
    Decl(DeclData),

    /// Constness/side wrapper. Child 0: the unqualified type.
    QualifiedType { constness: Constness, side: Side },

    /// An unqualified type.
    Type(TypeKind),

    /// An expression.
    Expr(ExprKind),

    /// A statement.
    Stmt(StmtKind),

    /// A literal value (constructor).
    Ctor(CtorKind),

    /// A field/unit attribute such as `&size` or `&until`.
    /// Child 0: optional value expression.
    Attribute { tag: String },

    /// An ordered set of attributes. Children: `Attribute` nodes.
    AttributeSet,
}

// ── Declarations ─────────────────────────────────────────────────────────

/// Payload shared by all declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclData {
    pub id: Id,
    pub linkage: Linkage,
    pub kind: DeclKind,
    /// Fully qualified ID, filled in by late resolver passes.
    pub fq_id: Option<Id>,
    /// Canonical (globally unique) ID, filled in by late resolver passes.
    pub canonical_id: Option<Id>,
}

impl DeclData {
    pub fn new(id: impl Into<Id>, linkage: Linkage, kind: DeclKind) -> Self {
        Self {
            id: id.into(),
            linkage,
            kind,
            fq_id: None,
            canonical_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    /// Children: the module's declarations and statements.
    Module,

    /// An `import` of another module. The importing module's scope gains the
    /// imported module's declaration.
    ImportedModule { extension: String },

    /// A type declaration. Child 0: qualified type.
    /// `on_heap` types resolve to value references when used as values.
    Type { on_heap: bool },

    /// Child 0: optional qualified type, child 1: value expression.
    Constant,

    /// Child 0: qualified type, child 1: optional init expression.
    GlobalVariable,

    /// Child 0: qualified type, child 1: optional init expression.
    LocalVariable,

    /// Child 0: function type, child 1: optional body block.
    Function,

    /// Child 0: qualified type, child 1: optional default expression.
    Parameter { kind: ParamKind },

    /// A struct/unit member. Child 0: qualified type, child 1: optional
    /// attribute set, child 2: optional default expression, further
    /// children: attached hooks.
    Field,

    /// Alias for a computed expression. Child 0: the expression.
    Expression,

    /// Event callback on a unit field or the unit itself.
    /// Child 0: body block.
    Hook { kind: HookKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Runs once the named field has parsed; `$$` is the field value.
    Field,
    /// Runs per container element; `$$` is the current element.
    ForEach,
    /// `%init`: unit parse begins.
    UnitInit,
    /// `%done`: unit parse completed.
    UnitDone,
    /// `%error`: unit parse failed.
    UnitError,
}

// ── Types ────────────────────────────────────────────────────────────────

/// A named bit range within a bitfield.
#[derive(Debug, Clone, PartialEq)]
pub struct BitRange {
    pub id: String,
    pub lower: u32,
    pub upper: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Unsigned integer of the given bit width.
    UInt(u32),
    /// Signed integer of the given bit width.
    SInt(u32),
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
    Void,

    /// Children: element qualified types, one per label slot.
    Tuple { labels: Vec<Option<String>> },

    /// Children: field declarations.
    Struct,

    /// Children: variant field declarations.
    Union,

    Enum { labels: Vec<(String, i64)> },

    /// Child 0: inner qualified type.
    Optional,

    /// Child 0: inner qualified type.
    Result,

    /// Child 0: referenced qualified type.
    StrongRef,
    /// Child 0: referenced qualified type.
    WeakRef,
    /// Child 0: referenced qualified type.
    ValueRef,

    /// Child 0: result qualified type, further children: parameter decls.
    Function {
        flavor: FunctionFlavor,
        cc: CallingConvention,
    },

    Bitfield { width: u32, bits: Vec<BitRange> },

    /// Child 0: element qualified type.
    Set,
    /// Child 0: element qualified type.
    Vector,
    /// Child 0: element qualified type.
    List,
    /// Child 0: key qualified type, child 1: value qualified type.
    Map,

    /// A Spicy unit. Children: parameter decls, then item (field) decls,
    /// then an optional attribute set.
    Unit,

    /// An unresolved type name; the resolver replaces references to it.
    Name { id: Id },

    /// Type to be inferred; never unifies.
    Auto,

    /// Operand list of an operator signature.
    OperandList,

    /// Placeholder in operator signatures. `tag` is the preset unification
    /// such as `bitfield(*)`; an empty tag at unification time is an
    /// internal error.
    Wildcard { tag: String },
}

impl TypeKind {
    /// True for types whose parse is a fixed-size primitive read.
    pub fn is_parse_primitive(&self) -> bool {
        matches!(
            self,
            TypeKind::UInt(_)
                | TypeKind::SInt(_)
                | TypeKind::Real
                | TypeKind::Address
                | TypeKind::Bitfield { .. }
        )
    }
}

// ── Expressions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Unresolved identifier reference.
    Name { id: Id },

    /// Member access. Child 0: receiver.
    Member { id: String },

    /// `.?`: member access returning an empty optional when unset.
    /// Child 0: receiver.
    TryMember { id: String },

    /// Unresolved operator application. Children: operands.
    UnresolvedOperator { op: OperatorKind },

    /// Resolved operator application. Child 0: result qualified type,
    /// children 1..: operands. `operator` indexes the operator registry.
    ResolvedOperator { op: OperatorKind, operator: usize },

    /// Child 0: ctor node.
    Ctor,

    /// A type used as a value. Child 0: qualified type.
    TypeValue,

    /// The enclosing struct/unit instance.
    SelfRef,

    /// `$$`, context-sensitive; the resolver rewrites or rejects it.
    DollarDollar,

    /// Child 0: target, child 1: value.
    Assign,
}

/// The kind of an overloadable operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Add,
    Difference,
    Multiple,
    Division,
    Modulo,
    Equal,
    Unequal,
    Lower,
    LowerEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    Negate,
    Deref,
    Member,
    TryMember,
    HasMember,
    Call,
    MemberCall,
    Index,
    Size,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorKind::Add => "+",
            OperatorKind::Difference => "-",
            OperatorKind::Multiple => "*",
            OperatorKind::Division => "/",
            OperatorKind::Modulo => "%",
            OperatorKind::Equal => "==",
            OperatorKind::Unequal => "!=",
            OperatorKind::Lower => "<",
            OperatorKind::LowerEqual => "<=",
            OperatorKind::Greater => ">",
            OperatorKind::GreaterEqual => ">=",
            OperatorKind::LogicalAnd => "&&",
            OperatorKind::LogicalOr => "||",
            OperatorKind::Negate => "!",
            OperatorKind::Deref => "*",
            OperatorKind::Member => ".",
            OperatorKind::TryMember => ".?",
            OperatorKind::HasMember => "?.",
            OperatorKind::Call => "call",
            OperatorKind::MemberCall => "method call",
            OperatorKind::Index => "index",
            OperatorKind::Size => "|..|",
        };
        write!(f, "{s}")
    }
}

// ── Statements ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Children: statements. Introduces a scope.
    Block,

    /// Child 0: expression.
    Expression,

    /// Child 0: a local-variable declaration.
    Declaration,

    /// Child 0: optional expression.
    Return,

    /// Child 0: optional init declaration, child 1: condition,
    /// child 2: then block, child 3: optional else block.
    /// The init declaration's scope spans condition and both branches.
    If,

    /// Child 0: optional init declaration, child 1: condition,
    /// child 2: body block.
    While,

    /// Child 0: optional condition binding (a local-variable declaration),
    /// child 1: condition expression, children 2..: `SwitchCase` nodes.
    /// The binding's scope spans the condition and every case body.
    Switch,

    /// One arm of a `switch`. Child 0: optional guard expression (absent
    /// for `default`), child 1: body block.
    SwitchCase,

    /// Child 0: expression to print. HILTI-level debugging aid.
    Print,
}

// ── Ctors ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CtorKind {
    Bool(bool),
    UInt { value: u64, width: u32 },
    SInt { value: i64, width: u32 },
    Real(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Alternative regular expression patterns.
    RegExp(Vec<String>),
    Port { port: u16 },
    Null,
    /// Children: element expressions.
    Tuple,
    /// Children: element expressions.
    Vector,
    /// Children: element expressions.
    List,
    /// Children: element expressions.
    Set,
    /// Children: alternating key/value expressions.
    Map,
    /// Child 0: optional inner expression.
    Optional,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_components() {
        let id = Id::new("HTTP::Request::uri");
        assert_eq!(id.local(), "uri");
        assert_eq!(id.namespace(), Some("HTTP::Request"));
        assert!(id.is_scoped());

        let plain = Id::new("uri");
        assert_eq!(plain.local(), "uri");
        assert_eq!(plain.namespace(), None);
        assert!(!plain.is_scoped());
    }

    #[test]
    fn id_join() {
        assert_eq!(Id::new("HTTP").join("Request").as_str(), "HTTP::Request");
        assert_eq!(Id::new("").join("x").as_str(), "x");
    }

    #[test]
    fn parse_primitive_classification() {
        assert!(TypeKind::UInt(32).is_parse_primitive());
        assert!(TypeKind::Address.is_parse_primitive());
        assert!(!TypeKind::Bytes.is_parse_primitive());
        assert!(!TypeKind::Unit.is_parse_primitive());
    }
}
