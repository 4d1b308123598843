// builder.rs — Convenience constructors over the arena
//
// The `Builder` is what plugin hooks receive: a thin wrapper around the
// context with constructors for the common node shapes. Nodes come out
// with synthesized metadata; the surface parser overwrites metadata on the
// nodes it creates.

use std::sync::Arc;

use crate::ast::*;
use crate::meta::{Meta, Span};
use crate::node::{AstContext, NodeId};

pub struct Builder<'a> {
    pub ctx: &'a mut AstContext,
    /// File attributed to nodes built through `spanned`.
    pub file: Option<Arc<str>>,
}

impl<'a> Builder<'a> {
    pub fn new(ctx: &'a mut AstContext) -> Self {
        Self { ctx, file: None }
    }

    pub fn for_file(ctx: &'a mut AstContext, file: &str) -> Self {
        Self {
            ctx,
            file: Some(Arc::from(file)),
        }
    }

    fn mk(&mut self, kind: NodeKind, children: Vec<Option<NodeId>>) -> NodeId {
        self.ctx.make(kind, children, Meta::none())
    }

    /// Pin a node built by any constructor to a source span.
    pub fn spanned(&mut self, id: NodeId, span: Span) -> NodeId {
        let meta = Meta::new(span, self.file.clone());
        self.ctx.set_meta(id, meta);
        id
    }

    // ── Types ────────────────────────────────────────────────────────

    pub fn qtype(&mut self, utype: NodeId, constness: Constness) -> NodeId {
        self.mk(
            NodeKind::QualifiedType {
                constness,
                side: Side::Rhs,
            },
            vec![Some(utype)],
        )
    }

    /// A fresh qualified type with the opposite side/constness is always a
    /// new node; the original is never mutated.
    pub fn recast(&mut self, qtype: NodeId, constness: Constness, side: Side) -> NodeId {
        let inner = self.ctx.child(qtype, 0);
        let copied = inner.map(|i| self.ctx.deepcopy(i));
        self.mk(NodeKind::QualifiedType { constness, side }, vec![copied])
    }

    pub fn type_uint(&mut self, width: u32) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::UInt(width)), vec![])
    }

    pub fn type_sint(&mut self, width: u32) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::SInt(width)), vec![])
    }

    pub fn type_bool(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Bool), vec![])
    }

    pub fn type_bytes(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Bytes), vec![])
    }

    pub fn type_stream(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Stream), vec![])
    }

    pub fn type_real(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Real), vec![])
    }

    pub fn type_string(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::String), vec![])
    }

    pub fn type_void(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Void), vec![])
    }

    pub fn type_auto(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Auto), vec![])
    }

    pub fn type_regexp(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::RegExp), vec![])
    }

    pub fn type_address(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Address), vec![])
    }

    pub fn type_port(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Port), vec![])
    }

    pub fn type_interval(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Interval), vec![])
    }

    pub fn type_time(&mut self) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Time), vec![])
    }

    pub fn type_name(&mut self, id: impl Into<Id>) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Name { id: id.into() }), vec![])
    }

    pub fn type_optional(&mut self, inner: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Optional), vec![Some(inner)])
    }

    pub fn type_result(&mut self, inner: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Result), vec![Some(inner)])
    }

    pub fn type_value_ref(&mut self, inner: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::ValueRef), vec![Some(inner)])
    }

    pub fn type_vector(&mut self, elem: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Vector), vec![Some(elem)])
    }

    pub fn type_list(&mut self, elem: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::List), vec![Some(elem)])
    }

    pub fn type_set(&mut self, elem: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Set), vec![Some(elem)])
    }

    pub fn type_map(&mut self, key: NodeId, value: NodeId) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Map), vec![Some(key), Some(value)])
    }

    pub fn type_tuple(&mut self, elems: Vec<(Option<String>, NodeId)>) -> NodeId {
        let labels = elems.iter().map(|(l, _)| l.clone()).collect();
        let children = elems.into_iter().map(|(_, t)| Some(t)).collect();
        self.ctx
            .make(NodeKind::Type(TypeKind::Tuple { labels }), children, Meta::none())
    }

    pub fn type_struct(&mut self, fields: Vec<NodeId>) -> NodeId {
        let children = fields.into_iter().map(Some).collect();
        self.ctx
            .make(NodeKind::Type(TypeKind::Struct), children, Meta::none())
    }

    pub fn type_union(&mut self, fields: Vec<NodeId>) -> NodeId {
        let children = fields.into_iter().map(Some).collect();
        self.ctx
            .make(NodeKind::Type(TypeKind::Union), children, Meta::none())
    }

    pub fn type_enum(&mut self, labels: Vec<(String, i64)>) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Enum { labels }), vec![])
    }

    pub fn type_bitfield(&mut self, width: u32, bits: Vec<BitRange>) -> NodeId {
        self.mk(NodeKind::Type(TypeKind::Bitfield { width, bits }), vec![])
    }

    pub fn type_function(
        &mut self,
        result: NodeId,
        params: Vec<NodeId>,
        flavor: FunctionFlavor,
    ) -> NodeId {
        let mut children = vec![Some(result)];
        children.extend(params.into_iter().map(Some));
        self.ctx.make(
            NodeKind::Type(TypeKind::Function {
                flavor,
                cc: CallingConvention::Standard,
            }),
            children,
            Meta::none(),
        )
    }

    /// A unit type: parameters, then items, then an optional attribute set.
    pub fn type_unit(
        &mut self,
        params: Vec<NodeId>,
        items: Vec<NodeId>,
        attributes: Option<NodeId>,
    ) -> NodeId {
        let mut children: Vec<Option<NodeId>> = params.into_iter().map(Some).collect();
        children.extend(items.into_iter().map(Some));
        children.push(attributes);
        self.ctx
            .make(NodeKind::Type(TypeKind::Unit), children, Meta::none())
    }

    // ── Declarations ─────────────────────────────────────────────────

    pub fn decl_module(&mut self, id: impl Into<Id>, children: Vec<NodeId>) -> NodeId {
        let children = children.into_iter().map(Some).collect();
        self.ctx.make(
            NodeKind::Decl(DeclData::new(id, Linkage::Public, DeclKind::Module)),
            children,
            Meta::none(),
        )
    }

    pub fn decl_import(&mut self, id: impl Into<Id>, extension: &str) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(
                id,
                Linkage::Private,
                DeclKind::ImportedModule {
                    extension: extension.to_string(),
                },
            )),
            vec![],
        )
    }

    pub fn decl_type(
        &mut self,
        id: impl Into<Id>,
        qtype: NodeId,
        linkage: Linkage,
        on_heap: bool,
    ) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, linkage, DeclKind::Type { on_heap })),
            vec![Some(qtype)],
        )
    }

    pub fn decl_constant(
        &mut self,
        id: impl Into<Id>,
        qtype: Option<NodeId>,
        value: NodeId,
    ) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Private, DeclKind::Constant)),
            vec![qtype, Some(value)],
        )
    }

    pub fn decl_global(&mut self, id: impl Into<Id>, qtype: NodeId, init: Option<NodeId>) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Private, DeclKind::GlobalVariable)),
            vec![Some(qtype), init],
        )
    }

    pub fn decl_local(&mut self, id: impl Into<Id>, qtype: NodeId, init: Option<NodeId>) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Private, DeclKind::LocalVariable)),
            vec![Some(qtype), init],
        )
    }

    pub fn decl_function(
        &mut self,
        id: impl Into<Id>,
        ftype: NodeId,
        body: Option<NodeId>,
        linkage: Linkage,
    ) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, linkage, DeclKind::Function)),
            vec![Some(ftype), body],
        )
    }

    pub fn decl_param(&mut self, id: impl Into<Id>, qtype: NodeId, kind: ParamKind) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Private, DeclKind::Parameter { kind })),
            vec![Some(qtype), None],
        )
    }

    /// A struct/unit field; hooks append after the fixed child slots.
    pub fn decl_field(
        &mut self,
        id: impl Into<Id>,
        qtype: NodeId,
        attributes: Option<NodeId>,
        default: Option<NodeId>,
    ) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Struct, DeclKind::Field)),
            vec![Some(qtype), attributes, default],
        )
    }

    pub fn decl_hook(&mut self, id: impl Into<Id>, kind: HookKind, body: NodeId) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Private, DeclKind::Hook { kind })),
            vec![Some(body)],
        )
    }

    pub fn decl_expression(&mut self, id: impl Into<Id>, expr: NodeId) -> NodeId {
        self.mk(
            NodeKind::Decl(DeclData::new(id, Linkage::Private, DeclKind::Expression)),
            vec![Some(expr)],
        )
    }

    // ── Expressions ──────────────────────────────────────────────────

    pub fn expr_name(&mut self, id: impl Into<Id>) -> NodeId {
        self.mk(NodeKind::Expr(ExprKind::Name { id: id.into() }), vec![])
    }

    pub fn expr_member(&mut self, receiver: NodeId, id: &str) -> NodeId {
        self.mk(
            NodeKind::Expr(ExprKind::Member { id: id.to_string() }),
            vec![Some(receiver)],
        )
    }

    pub fn expr_try_member(&mut self, receiver: NodeId, id: &str) -> NodeId {
        self.mk(
            NodeKind::Expr(ExprKind::TryMember { id: id.to_string() }),
            vec![Some(receiver)],
        )
    }

    pub fn expr_op(&mut self, op: OperatorKind, operands: Vec<NodeId>) -> NodeId {
        let children = operands.into_iter().map(Some).collect();
        self.ctx.make(
            NodeKind::Expr(ExprKind::UnresolvedOperator { op }),
            children,
            Meta::none(),
        )
    }

    pub fn expr_ctor(&mut self, ctor: NodeId) -> NodeId {
        self.mk(NodeKind::Expr(ExprKind::Ctor), vec![Some(ctor)])
    }

    pub fn expr_type_value(&mut self, qtype: NodeId) -> NodeId {
        self.mk(NodeKind::Expr(ExprKind::TypeValue), vec![Some(qtype)])
    }

    pub fn expr_self(&mut self) -> NodeId {
        self.mk(NodeKind::Expr(ExprKind::SelfRef), vec![])
    }

    pub fn expr_dollar_dollar(&mut self) -> NodeId {
        self.mk(NodeKind::Expr(ExprKind::DollarDollar), vec![])
    }

    pub fn expr_assign(&mut self, target: NodeId, value: NodeId) -> NodeId {
        self.mk(NodeKind::Expr(ExprKind::Assign), vec![Some(target), Some(value)])
    }

    // ── Ctors ────────────────────────────────────────────────────────

    pub fn ctor_bool(&mut self, value: bool) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::Bool(value)), vec![])
    }

    pub fn ctor_uint(&mut self, value: u64, width: u32) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::UInt { value, width }), vec![])
    }

    pub fn ctor_sint(&mut self, value: i64, width: u32) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::SInt { value, width }), vec![])
    }

    pub fn ctor_real(&mut self, value: f64) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::Real(value)), vec![])
    }

    pub fn ctor_bytes(&mut self, value: impl Into<Vec<u8>>) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::Bytes(value.into())), vec![])
    }

    pub fn ctor_string(&mut self, value: impl Into<String>) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::String(value.into())), vec![])
    }

    pub fn ctor_regexp(&mut self, patterns: Vec<String>) -> NodeId {
        self.mk(NodeKind::Ctor(CtorKind::RegExp(patterns)), vec![])
    }

    // ── Statements ───────────────────────────────────────────────────

    pub fn stmt_block(&mut self, stmts: Vec<NodeId>) -> NodeId {
        let children = stmts.into_iter().map(Some).collect();
        self.ctx
            .make(NodeKind::Stmt(StmtKind::Block), children, Meta::none())
    }

    pub fn stmt_expr(&mut self, expr: NodeId) -> NodeId {
        self.mk(NodeKind::Stmt(StmtKind::Expression), vec![Some(expr)])
    }

    pub fn stmt_decl(&mut self, decl: NodeId) -> NodeId {
        self.mk(NodeKind::Stmt(StmtKind::Declaration), vec![Some(decl)])
    }

    pub fn stmt_return(&mut self, expr: Option<NodeId>) -> NodeId {
        self.mk(NodeKind::Stmt(StmtKind::Return), vec![expr])
    }

    pub fn stmt_if(
        &mut self,
        init: Option<NodeId>,
        cond: NodeId,
        then_block: NodeId,
        else_block: Option<NodeId>,
    ) -> NodeId {
        self.mk(
            NodeKind::Stmt(StmtKind::If),
            vec![init, Some(cond), Some(then_block), else_block],
        )
    }

    pub fn stmt_while(&mut self, init: Option<NodeId>, cond: NodeId, body: NodeId) -> NodeId {
        self.mk(
            NodeKind::Stmt(StmtKind::While),
            vec![init, Some(cond), Some(body)],
        )
    }

    pub fn stmt_switch(
        &mut self,
        binding: Option<NodeId>,
        cond: NodeId,
        cases: Vec<NodeId>,
    ) -> NodeId {
        let mut children = vec![binding, Some(cond)];
        children.extend(cases.into_iter().map(Some));
        self.ctx
            .make(NodeKind::Stmt(StmtKind::Switch), children, Meta::none())
    }

    /// A switch arm; `guard` absent makes it the default case.
    pub fn stmt_switch_case(&mut self, guard: Option<NodeId>, body: NodeId) -> NodeId {
        self.mk(NodeKind::Stmt(StmtKind::SwitchCase), vec![guard, Some(body)])
    }

    pub fn stmt_print(&mut self, expr: NodeId) -> NodeId {
        self.mk(NodeKind::Stmt(StmtKind::Print), vec![Some(expr)])
    }

    // ── Attributes ───────────────────────────────────────────────────

    pub fn attribute(&mut self, tag: &str, value: Option<NodeId>) -> NodeId {
        self.mk(
            NodeKind::Attribute {
                tag: tag.to_string(),
            },
            vec![value],
        )
    }

    pub fn attribute_set(&mut self, attributes: Vec<NodeId>) -> NodeId {
        let children = attributes.into_iter().map(Some).collect();
        self.ctx
            .make(NodeKind::AttributeSet, children, Meta::none())
    }
}
