// parser.rs — Surface parser for .spicy and .hlt sources
//
// Parses a token stream (from the lexer) into a small concrete syntax
// tree, then lowers that tree into arena nodes. Uses chumsky combinators;
// syntax errors are `Rich` diagnostics and parsing continues where it can.
//
// The two surface languages share one grammar; the plugin layer selects
// the entry point by file extension. Spicy-only constructs (units, hooks,
// sinks) simply never occur in `.hlt` input.
//
// Preconditions: input is a token stream from `lexer::lex()`.
// Postconditions: on success, a module declaration rooted in the context.
// Failure modes: syntax errors are returned as diagnostics.
// Side effects: allocates nodes in the context.

use std::path::Path;

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::{self, HookKind, Linkage, OperatorKind, ParamKind};
use crate::builder::Builder;
use crate::diag::{codes, Diagnostic};
use crate::lexer::Token;
use crate::node::{AstContext, NodeId};

// ── Concrete syntax tree ─────────────────────────────────────────────────
//
// Plain data produced by the combinators; one lowering pass turns it into
// arena nodes. Spans are byte offsets into the source.

type PSpan = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
struct PIdent {
    name: String,
    span: PSpan,
}

#[derive(Debug, Clone, PartialEq)]
enum PType {
    UInt(u32),
    SInt(u32),
    Real,
    Bool,
    Bytes,
    Stream,
    Str,
    Addr,
    Port,
    Interval,
    Time,
    Void,
    Auto,
    Optional(Box<PType>),
    Vector(Box<PType>),
    List(Box<PType>),
    Set(Box<PType>),
    Map(Box<PType>, Box<PType>),
    Tuple(Vec<PType>),
    Name(String),
    Unit(Vec<PUnitItem>),
    Struct(Vec<PField>),
    Union(Vec<PField>),
    Enum(Vec<(PIdent, Option<u64>)>),
    Bitfield(u32, Vec<(PIdent, u32, u32)>),
}

#[derive(Debug, Clone, PartialEq)]
struct PField {
    name: PIdent,
    ty: PType,
}

#[derive(Debug, Clone, PartialEq)]
struct PAttr {
    tag: String,
    value: Option<PExpr>,
    span: PSpan,
}

#[derive(Debug, Clone, PartialEq)]
enum PUnitItem {
    Field {
        name: Option<PIdent>,
        /// `None` for literal fields (`: b"GET"`).
        ty: Option<PType>,
        literal: Option<PExpr>,
        repeat: Option<Option<PExpr>>,
        attrs: Vec<PAttr>,
        span: PSpan,
    },
    Var {
        name: PIdent,
        ty: PType,
    },
    Sink {
        name: PIdent,
    },
    Hook {
        target: PHookTarget,
        foreach: bool,
        body: Vec<PStmt>,
        span: PSpan,
    },
    Switch {
        cases: Vec<(PExpr, PIdent, PType)>,
        span: PSpan,
    },
    Property(PAttr),
}

#[derive(Debug, Clone, PartialEq)]
enum PHookTarget {
    Field(String),
    Unit(String),
}

#[derive(Debug, Clone, PartialEq)]
struct PExpr {
    kind: PExprKind,
    span: PSpan,
}

#[derive(Debug, Clone, PartialEq)]
enum PExprKind {
    Integer(u64),
    Negative(i64),
    Real(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Regex(String),
    Name(String),
    DollarDollar,
    SelfE,
    Member(Box<PExpr>, String),
    TryMember(Box<PExpr>, String),
    Index(Box<PExpr>, Box<PExpr>),
    Call(Box<PExpr>, Vec<PExpr>),
    Binary(OperatorKind, Box<PExpr>, Box<PExpr>),
    Not(Box<PExpr>),
    Assign(Box<PExpr>, Box<PExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum PStmt {
    Local {
        name: PIdent,
        ty: Option<PType>,
        init: Option<PExpr>,
    },
    Expr(PExpr),
    Return(Option<PExpr>),
    If {
        cond: PExpr,
        then_body: Vec<PStmt>,
        else_body: Option<Vec<PStmt>>,
    },
    While {
        cond: PExpr,
        body: Vec<PStmt>,
    },
    Switch {
        /// `switch (local x = e)` binds the condition to `x`.
        binding: Option<(PIdent, PExpr)>,
        /// Plain `switch (e)` form.
        cond: Option<PExpr>,
        /// Case guard (None for `default`) and body.
        cases: Vec<(Option<PExpr>, Vec<PStmt>)>,
    },
    Print(PExpr),
}

#[derive(Debug, Clone, PartialEq)]
enum PDecl {
    Import(PIdent),
    Const {
        name: PIdent,
        ty: Option<PType>,
        value: PExpr,
        public: bool,
    },
    Global {
        name: PIdent,
        ty: PType,
        init: Option<PExpr>,
    },
    Type {
        name: PIdent,
        ty: PType,
        public: bool,
    },
    Function {
        name: PIdent,
        params: Vec<(PIdent, PType, ParamKind)>,
        result: PType,
        body: Vec<PStmt>,
        public: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct PModule {
    name: PIdent,
    decls: Vec<PDecl>,
}

// ── Public API ───────────────────────────────────────────────────────────

/// Result of parsing one source file.
pub struct ParseOutcome {
    pub module: Option<NodeId>,
    pub errors: Vec<Diagnostic>,
}

/// Parse a `.spicy` source file into a module declaration.
pub fn parse_spicy(ctx: &mut AstContext, source: &str, path: &Path) -> ParseOutcome {
    parse_source(ctx, source, path)
}

/// Parse a `.hlt` source file into a module declaration.
pub fn parse_hilti(ctx: &mut AstContext, source: &str, path: &Path) -> ParseOutcome {
    parse_source(ctx, source, path)
}

fn parse_source(ctx: &mut AstContext, source: &str, path: &Path) -> ParseOutcome {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser(source);
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    let mut errors: Vec<Diagnostic> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            Diagnostic::error((e.span.start..e.span.end).into(), e.message)
                .with_code(codes::E0001)
        })
        .collect();
    errors.extend(parse_errors.into_iter().map(|e| {
        Diagnostic::error(*e.span(), format!("syntax error: {e}")).with_code(codes::E0001)
    }));

    let module = module.map(|m| {
        let mut b = Builder::for_file(ctx, &path.display().to_string());
        lower_module(&mut b, &m)
    });

    ParseOutcome { module, errors }
}

// ── Grammar ──────────────────────────────────────────────────────────────
//
// Built inside one function so the `source` reference is captured once and
// shared by all combinators.

fn module_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, PModule, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        PIdent {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // Scoped identifier: `HTTP::Request`.
    let scoped = ident
        .clone()
        .separated_by(just(Token::ColonColon))
        .at_least(1)
        .collect::<Vec<_>>()
        .map_with(|parts, e| PIdent {
            name: parts
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join("::"),
            span: e.span(),
        });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let literal = select! {
            Token::Integer(v) = e => PExpr { kind: PExprKind::Integer(v), span: e.span() },
            Token::Real(v) = e => PExpr { kind: PExprKind::Real(v), span: e.span() },
            Token::True = e => PExpr { kind: PExprKind::Bool(true), span: e.span() },
            Token::False = e => PExpr { kind: PExprKind::Bool(false), span: e.span() },
            Token::StringLit(s) = e => PExpr { kind: PExprKind::Str(s), span: e.span() },
            Token::BytesLit(b) = e => PExpr { kind: PExprKind::Bytes(b), span: e.span() },
            Token::RegexLit(p) = e => PExpr { kind: PExprKind::Regex(p), span: e.span() },
        };

        let negative = just(Token::Minus)
            .ignore_then(select! { Token::Integer(v) = e => (v, e.span()) })
            .map(|(v, span)| PExpr {
                kind: PExprKind::Negative(-(v as i64)),
                span,
            });

        let self_expr = just(Token::SelfKw).map_with(|_, e| PExpr {
            kind: PExprKind::SelfE,
            span: e.span(),
        });

        let dollar = just(Token::DollarDollar).map_with(|_, e| PExpr {
            kind: PExprKind::DollarDollar,
            span: e.span(),
        });

        let name = scoped.clone().map(|id| PExpr {
            span: id.span,
            kind: PExprKind::Name(id.name),
        });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let primary = choice((literal, negative, self_expr, dollar, name, parens));

        // Postfix: member access, `.?`, indexing, calls.
        enum Postfix {
            Member(String),
            TryMember(String),
            Index(PExpr),
            Call(Vec<PExpr>),
        }
        let postfix_op = choice((
            just(Token::Dot)
                .ignore_then(ident.clone())
                .map(|id| Postfix::Member(id.name)),
            just(Token::DotQuestion)
                .ignore_then(ident.clone())
                .map(|id| Postfix::TryMember(id.name)),
            expr.clone()
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map(Postfix::Index),
            expr.clone()
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(Postfix::Call),
        ));
        let postfix = primary.foldl(postfix_op.repeated(), |lhs, op| {
            let span = lhs.span;
            let kind = match op {
                Postfix::Member(id) => PExprKind::Member(Box::new(lhs), id),
                Postfix::TryMember(id) => PExprKind::TryMember(Box::new(lhs), id),
                Postfix::Index(i) => PExprKind::Index(Box::new(lhs), Box::new(i)),
                Postfix::Call(args) => PExprKind::Call(Box::new(lhs), args),
            };
            PExpr { kind, span }
        });

        let unary = just(Token::Bang)
            .repeated()
            .foldr(postfix, |_, operand| {
                let span = operand.span;
                PExpr {
                    kind: PExprKind::Not(Box::new(operand)),
                    span,
                }
            });

        fn fold_binary(lhs: PExpr, (op, rhs): (OperatorKind, PExpr)) -> PExpr {
            let span = lhs.span;
            PExpr {
                kind: PExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                span,
            }
        }

        let product_op = choice((
            just(Token::Star).to(OperatorKind::Multiple),
            just(Token::Slash).to(OperatorKind::Division),
            just(Token::PercentSign).to(OperatorKind::Modulo),
        ));
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), fold_binary)
            .boxed();

        let sum_op = choice((
            just(Token::Plus).to(OperatorKind::Add),
            just(Token::Minus).to(OperatorKind::Difference),
        ));
        let sum = product
            .clone()
            .foldl(sum_op.then(product).repeated(), fold_binary)
            .boxed();

        let rel_op = choice((
            just(Token::LtEq).to(OperatorKind::LowerEqual),
            just(Token::GtEq).to(OperatorKind::GreaterEqual),
            just(Token::Lt).to(OperatorKind::Lower),
            just(Token::Gt).to(OperatorKind::Greater),
        ));
        let relational = sum
            .clone()
            .foldl(rel_op.then(sum).repeated(), fold_binary)
            .boxed();

        let eq_op = choice((
            just(Token::EqEq).to(OperatorKind::Equal),
            just(Token::NotEq).to(OperatorKind::Unequal),
        ));
        let equality = relational
            .clone()
            .foldl(eq_op.then(relational).repeated(), fold_binary)
            .boxed();

        let conjunction = equality
            .clone()
            .foldl(
                just(Token::AndAnd)
                    .to(OperatorKind::LogicalAnd)
                    .then(equality)
                    .repeated(),
                fold_binary,
            )
            .boxed();
        let disjunction = conjunction
            .clone()
            .foldl(
                just(Token::OrOr)
                    .to(OperatorKind::LogicalOr)
                    .then(conjunction)
                    .repeated(),
                fold_binary,
            )
            .boxed();

        // Assignment, right-associative, lowest precedence.
        disjunction
            .clone()
            .then(just(Token::Equals).ignore_then(expr.clone()).or_not())
            .map(|(lhs, rhs)| match rhs {
                None => lhs,
                Some(rhs) => {
                    let span = lhs.span;
                    PExpr {
                        kind: PExprKind::Assign(Box::new(lhs), Box::new(rhs)),
                        span,
                    }
                }
            })
    });

    // ── Types ──

    let ty = recursive(|ty| {
        let simple = select! {
            Token::UIntTy(w) => PType::UInt(w),
            Token::SIntTy(w) => PType::SInt(w),
            Token::RealTy => PType::Real,
            Token::BoolTy => PType::Bool,
            Token::BytesTy => PType::Bytes,
            Token::StreamTy => PType::Stream,
            Token::StringTy => PType::Str,
            Token::AddrTy => PType::Addr,
            Token::PortTy => PType::Port,
            Token::IntervalTy => PType::Interval,
            Token::TimeTy => PType::Time,
            Token::VoidTy => PType::Void,
            Token::AutoTy => PType::Auto,
        };

        let angle = |inner: BoxedParser<'tokens, I, PType>| {
            inner.delimited_by(just(Token::Lt), just(Token::Gt)).boxed()
        };

        let optional_ty = just(Token::OptionalTy)
            .ignore_then(angle(ty.clone().boxed()))
            .map(|t| PType::Optional(Box::new(t)));
        let vector_ty = just(Token::VectorTy)
            .ignore_then(angle(ty.clone().boxed()))
            .map(|t| PType::Vector(Box::new(t)));
        let list_ty = just(Token::ListTy)
            .ignore_then(angle(ty.clone().boxed()))
            .map(|t| PType::List(Box::new(t)));
        let set_ty = just(Token::SetTy)
            .ignore_then(angle(ty.clone().boxed()))
            .map(|t| PType::Set(Box::new(t)));
        let map_ty = just(Token::MapTy)
            .ignore_then(
                ty.clone()
                    .then_ignore(just(Token::Comma))
                    .then(ty.clone())
                    .delimited_by(just(Token::Lt), just(Token::Gt)),
            )
            .map(|(k, v)| PType::Map(Box::new(k), Box::new(v)));
        let tuple_ty = just(Token::TupleTy)
            .ignore_then(
                ty.clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::Lt), just(Token::Gt)),
            )
            .map(PType::Tuple);

        let field = ident
            .clone()
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .then_ignore(just(Token::Semicolon))
            .map(|(name, ty)| PField { name, ty });

        let struct_ty = just(Token::Struct)
            .ignore_then(
                field
                    .clone()
                    .repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(PType::Struct);
        let union_ty = just(Token::Union)
            .ignore_then(
                field
                    .repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(PType::Union);

        let enum_label = ident
            .clone()
            .then(
                just(Token::Equals)
                    .ignore_then(select! { Token::Integer(v) => v })
                    .or_not(),
            );
        let enum_ty = just(Token::Enum)
            .ignore_then(
                enum_label
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(PType::Enum);

        let bit_range = ident
            .clone()
            .then_ignore(just(Token::Colon))
            .then(select! { Token::Integer(v) => v as u32 })
            .then(
                just(Token::Dot)
                    .ignore_then(just(Token::Dot))
                    .ignore_then(select! { Token::Integer(v) => v as u32 })
                    .or_not(),
            )
            .then_ignore(just(Token::Semicolon))
            .map(|((name, lo), hi)| (name, lo, hi.unwrap_or(lo)));
        let bitfield_ty = just(Token::Bitfield)
            .ignore_then(
                select! { Token::Integer(v) => v as u32 }
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(
                bit_range
                    .repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(|(width, bits)| PType::Bitfield(width, bits));

        let name_ty = scoped.clone().map(|id| PType::Name(id.name));

        // Unit body (items defined below as a separate recursive parser is
        // awkward; units nest here).
        let attr = select! { Token::Attribute(tag) = e => (tag, e.span()) }
            .then(just(Token::Equals).ignore_then(expr.clone()).or_not())
            .map(|((tag, span), value)| PAttr { tag, value, span });

        let repeat = expr
            .clone()
            .or_not()
            .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let field_literal = select! {
            Token::BytesLit(b) = e => PExpr { kind: PExprKind::Bytes(b), span: e.span() },
            Token::RegexLit(p) = e => PExpr { kind: PExprKind::Regex(p), span: e.span() },
        };

        let unit_field = ident
            .clone()
            .or_not()
            .then_ignore(just(Token::Colon))
            .then(choice((
                field_literal.map(|l| (None, Some(l))),
                ty.clone().map(|t| (Some(t), None)),
            )))
            .then(repeat.or_not())
            .then(attr.clone().repeated().collect::<Vec<_>>())
            .then_ignore(just(Token::Semicolon))
            .map_with(|(((name, (ty, literal)), repeat), attrs), e| PUnitItem::Field {
                name,
                ty,
                literal,
                repeat,
                attrs,
                span: e.span(),
            });

        let var_item = just(Token::Var)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .then_ignore(just(Token::Semicolon))
            .map(|(name, ty)| PUnitItem::Var { name, ty });

        let sink_item = just(Token::Sink)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Semicolon))
            .map(|name| PUnitItem::Sink { name });

        let stmt = stmt_parser(source, expr.clone(), ty.clone());
        let block = stmt
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let hook_target = choice((
            select! { Token::Property(p) => PHookTarget::Unit(p) },
            ident.clone().map(|id| PHookTarget::Field(id.name)),
        ));
        let hook_item = just(Token::On)
            .ignore_then(hook_target)
            .then(just(Token::Foreach).or_not())
            .then(block.clone())
            .map_with(|((target, foreach), body), e| PUnitItem::Hook {
                target,
                foreach: foreach.is_some(),
                body,
                span: e.span(),
            });

        let switch_case = expr
            .clone()
            .then_ignore(just(Token::Arrow))
            .then(ident.clone())
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .then_ignore(just(Token::Semicolon))
            .map(|((guard, name), ty)| (guard, name, ty));
        let switch_item = just(Token::Switch)
            .ignore_then(
                switch_case
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .then_ignore(just(Token::Semicolon))
            .map_with(|cases, e| PUnitItem::Switch {
                cases,
                span: e.span(),
            });

        let property_item = select! { Token::Property(tag) = e => (tag, e.span()) }
            .then(just(Token::Equals).ignore_then(expr.clone()).or_not())
            .then_ignore(just(Token::Semicolon))
            .map(|((tag, span), value)| PUnitItem::Property(PAttr { tag, value, span }));

        let unit_item = choice((
            var_item,
            sink_item,
            hook_item,
            switch_item,
            property_item,
            unit_field,
        ));

        let unit_ty = just(Token::Unit)
            .ignore_then(
                unit_item
                    .repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(PType::Unit);

        choice((
            simple,
            optional_ty,
            vector_ty,
            list_ty,
            set_ty,
            map_ty,
            tuple_ty,
            struct_ty,
            union_ty,
            enum_ty,
            bitfield_ty,
            unit_ty,
            name_ty,
        ))
    });

    // ── Declarations ──

    let public = just(Token::Public)
        .to(true)
        .or(just(Token::Export).to(true))
        .or_not()
        .map(|p| p.unwrap_or(false));

    let import_decl = just(Token::Import)
        .ignore_then(scoped.clone())
        .then_ignore(just(Token::Semicolon))
        .map(PDecl::Import);

    let const_decl = public
        .clone()
        .then_ignore(just(Token::Const))
        .then(ident.clone())
        .then(just(Token::Colon).ignore_then(ty.clone()).or_not())
        .then_ignore(just(Token::Equals))
        .then(expr.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|(((public, name), ty), value)| PDecl::Const {
            name,
            ty,
            value,
            public,
        });

    let global_decl = just(Token::Global)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(ty.clone())
        .then(just(Token::Equals).ignore_then(expr.clone()).or_not())
        .then_ignore(just(Token::Semicolon))
        .map(|((name, ty), init)| PDecl::Global { name, ty, init });

    let type_decl = public
        .clone()
        .then_ignore(just(Token::Type))
        .then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(ty.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|((public, name), ty)| PDecl::Type { name, ty, public });

    let param = choice((
        just(Token::Inout).to(ParamKind::InOut),
        just(Token::Copy).to(ParamKind::Copy),
    ))
    .or_not()
    .then(ident.clone())
    .then_ignore(just(Token::Colon))
    .then(ty.clone())
    .map(|((kind, name), ty)| (name, ty, kind.unwrap_or(ParamKind::In)));

    let stmt = stmt_parser(source, expr.clone(), ty.clone());
    let body = stmt
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let function_decl = public
        .then_ignore(just(Token::Function))
        .then(ident.clone())
        .then(
            param
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(just(Token::Colon).ignore_then(ty.clone()).or_not())
        .then(body)
        .map(|((((public, name), params), result), body)| PDecl::Function {
            name,
            params,
            result: result.unwrap_or(PType::Void),
            body,
            public,
        });

    let decl = choice((import_decl, const_decl, global_decl, type_decl, function_decl));

    // `module M;` followed by declarations, or `module M { ... }`.
    let flat = just(Token::Module)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Semicolon))
        .then(decl.clone().repeated().collect::<Vec<_>>())
        .map(|(name, decls)| PModule { name, decls });
    let braced = just(Token::Module)
        .ignore_then(ident.clone())
        .then(
            decl.repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map(|(name, decls)| PModule { name, decls });

    braced.or(flat)
}

type BoxedParser<'tokens, I, T> =
    Boxed<'tokens, 'tokens, I, T, extra::Err<Rich<'tokens, Token, SimpleSpan>>>;

fn stmt_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
    expr: impl Parser<'tokens, I, PExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>>
        + Clone
        + 'tokens,
    ty: impl Parser<'tokens, I, PType, extra::Err<Rich<'tokens, Token, SimpleSpan>>>
        + Clone
        + 'tokens,
) -> BoxedParser<'tokens, I, PStmt>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|stmt| {
        let block = stmt
            .repeated()
            .collect::<Vec<PStmt>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let ident = just(Token::Ident).map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            PIdent {
                name: source[span.start()..span.end()].to_string(),
                span,
            }
        });

        let local = just(Token::Local)
            .ignore_then(ident.clone())
            .then(just(Token::Colon).ignore_then(ty.clone()).or_not())
            .then(just(Token::Equals).ignore_then(expr.clone()).or_not())
            .then_ignore(just(Token::Semicolon))
            .map(|((name, ty), init)| PStmt::Local { name, ty, init });

        let ret = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Semicolon))
            .map(PStmt::Return);

        let print = just(Token::Print)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Semicolon))
            .map(PStmt::Print);

        let if_stmt = just(Token::If)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .map(|((cond, then_body), else_body)| PStmt::If {
                cond,
                then_body,
                else_body,
            });

        let while_stmt = just(Token::While)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .map(|(cond, body)| PStmt::While { cond, body });

        // `switch (local x = e)` or `switch (e)`, with `case g { ... }`
        // arms and an optional `default { ... }`.
        let switch_head = just(Token::Local)
            .ignore_then(ident)
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .map(|(name, e)| (Some((name, e)), None))
            .or(expr.clone().map(|e| (None, Some(e))));
        let case_arm = just(Token::Case)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(guard, body)| (Some(guard), body));
        let default_arm = just(Token::Default)
            .ignore_then(block)
            .map(|body| (None, body));
        let switch_stmt = just(Token::Switch)
            .ignore_then(
                switch_head.delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(
                case_arm
                    .or(default_arm)
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(|((binding, cond), cases)| PStmt::Switch {
                binding,
                cond,
                cases,
            });

        let expr_stmt = expr
            .then_ignore(just(Token::Semicolon))
            .map(PStmt::Expr);

        choice((local, ret, print, if_stmt, while_stmt, switch_stmt, expr_stmt))
    })
    .boxed()
}

// ── Lowering ─────────────────────────────────────────────────────────────

fn lower_module(b: &mut Builder, m: &PModule) -> NodeId {
    let mut decls = Vec::new();
    for d in &m.decls {
        decls.push(lower_decl(b, d));
    }
    let module = b.decl_module(m.name.name.as_str(), decls);
    b.spanned(module, m.name.span)
}

fn lower_decl(b: &mut Builder, d: &PDecl) -> NodeId {
    match d {
        PDecl::Import(id) => {
            let node = b.decl_import(id.name.as_str(), ".spicy");
            b.spanned(node, id.span)
        }
        PDecl::Const {
            name,
            ty,
            value,
            public,
        } => {
            let qtype = ty.as_ref().map(|t| lower_qtype(b, t));
            let value = lower_expr(b, value);
            let node = b.decl_constant(name.name.as_str(), qtype, value);
            if *public {
                if let Some(data) = b.ctx.decl_mut(node) {
                    data.linkage = Linkage::Public;
                }
            }
            b.spanned(node, name.span)
        }
        PDecl::Global { name, ty, init } => {
            let qtype = lower_qtype(b, ty);
            let init = init.as_ref().map(|e| lower_expr(b, e));
            let node = b.decl_global(name.name.as_str(), qtype, init);
            b.spanned(node, name.span)
        }
        PDecl::Type { name, ty, public } => {
            let qtype = lower_qtype(b, ty);
            let linkage = if *public {
                Linkage::Public
            } else {
                Linkage::Private
            };
            let on_heap = matches!(ty, PType::Unit(_) | PType::Struct(_));
            let node = b.decl_type(name.name.as_str(), qtype, linkage, on_heap);
            b.spanned(node, name.span)
        }
        PDecl::Function {
            name,
            params,
            result,
            body,
            public,
        } => {
            let result_t = lower_qtype(b, result);
            let mut param_nodes = Vec::new();
            for (pname, pty, pkind) in params {
                let q = lower_qtype(b, pty);
                let p = b.decl_param(pname.name.as_str(), q, *pkind);
                param_nodes.push(b.spanned(p, pname.span));
            }
            let ftype = b.type_function(result_t, param_nodes, ast::FunctionFlavor::Function);
            let body = lower_block(b, body);
            let linkage = if *public {
                Linkage::Public
            } else {
                Linkage::Private
            };
            let node = b.decl_function(name.name.as_str(), ftype, Some(body), linkage);
            b.spanned(node, name.span)
        }
    }
}

fn lower_qtype(b: &mut Builder, t: &PType) -> NodeId {
    let utype = lower_type(b, t);
    b.qtype(utype, ast::Constness::Mutable)
}

fn lower_type(b: &mut Builder, t: &PType) -> NodeId {
    match t {
        PType::UInt(w) => b.type_uint(*w),
        PType::SInt(w) => b.type_sint(*w),
        PType::Real => b.type_real(),
        PType::Bool => b.type_bool(),
        PType::Bytes => b.type_bytes(),
        PType::Stream => b.type_stream(),
        PType::Str => b.type_string(),
        PType::Addr => b.type_address(),
        PType::Port => b.type_port(),
        PType::Interval => b.type_interval(),
        PType::Time => b.type_time(),
        PType::Void => b.type_void(),
        PType::Auto => b.type_auto(),
        PType::Optional(inner) => {
            let q = lower_qtype(b, inner);
            b.type_optional(q)
        }
        PType::Vector(inner) => {
            let q = lower_qtype(b, inner);
            b.type_vector(q)
        }
        PType::List(inner) => {
            let q = lower_qtype(b, inner);
            b.type_list(q)
        }
        PType::Set(inner) => {
            let q = lower_qtype(b, inner);
            b.type_set(q)
        }
        PType::Map(k, v) => {
            let kq = lower_qtype(b, k);
            let vq = lower_qtype(b, v);
            b.type_map(kq, vq)
        }
        PType::Tuple(elems) => {
            let elems = elems
                .iter()
                .map(|t| (None, lower_qtype(b, t)))
                .collect::<Vec<_>>();
            b.type_tuple(elems)
        }
        PType::Name(name) => b.type_name(name.as_str()),
        PType::Struct(fields) | PType::Union(fields) => {
            let mut nodes = Vec::new();
            for f in fields {
                let q = lower_qtype(b, &f.ty);
                let node = b.decl_field(f.name.name.as_str(), q, None, None);
                nodes.push(b.spanned(node, f.name.span));
            }
            if matches!(t, PType::Struct(_)) {
                b.type_struct(nodes)
            } else {
                b.type_union(nodes)
            }
        }
        PType::Enum(labels) => {
            let mut next = 0i64;
            let labels = labels
                .iter()
                .map(|(id, ordinal)| {
                    let value = ordinal.map(|v| v as i64).unwrap_or(next);
                    next = value + 1;
                    (id.name.clone(), value)
                })
                .collect();
            b.type_enum(labels)
        }
        PType::Bitfield(width, ranges) => {
            let bits = ranges
                .iter()
                .map(|(id, lo, hi)| ast::BitRange {
                    id: id.name.clone(),
                    lower: *lo,
                    upper: *hi,
                })
                .collect();
            b.type_bitfield(*width, bits)
        }
        PType::Unit(items) => lower_unit(b, items),
    }
}

fn lower_unit(b: &mut Builder, items: &[PUnitItem]) -> NodeId {
    let mut fields: Vec<NodeId> = Vec::new();
    let mut unit_hooks: Vec<NodeId> = Vec::new();
    let mut properties: Vec<NodeId> = Vec::new();
    let mut anon = 0usize;
    let mut switches = 0usize;

    for item in items {
        match item {
            PUnitItem::Field {
                name,
                ty,
                literal,
                repeat,
                attrs,
                span,
            } => {
                let field_name = name
                    .as_ref()
                    .map(|n| n.name.clone())
                    .unwrap_or_else(|| {
                        anon += 1;
                        format!("_anon_{anon}")
                    });

                let mut attr_nodes: Vec<NodeId> =
                    attrs.iter().map(|a| lower_attr(b, a)).collect();

                // A repeat suffix turns the parse type into a vector; the
                // count expression (if any) rides along as an attribute.
                let base = match (ty, literal) {
                    (Some(t), _) => lower_type(b, t),
                    (None, Some(_)) => b.type_bytes(),
                    (None, None) => b.type_auto(),
                };
                let utype = if repeat.is_some() {
                    let q = b.qtype(base, ast::Constness::Mutable);
                    b.type_vector(q)
                } else {
                    base
                };
                if let Some(count) = repeat.as_ref().and_then(|r| r.as_ref()) {
                    let count = lower_expr(b, count);
                    let attr = b.attribute("count", Some(count));
                    attr_nodes.push(attr);
                } else if matches!(repeat, Some(None))
                    && !attrs.iter().any(|a| {
                        matches!(
                            a.tag.as_str(),
                            "count" | "until" | "until-including" | "while" | "eod"
                        )
                    })
                {
                    let attr = b.attribute("eod", None);
                    attr_nodes.push(attr);
                }

                let qtype = b.qtype(utype, ast::Constness::Mutable);
                let attr_set = if attr_nodes.is_empty() {
                    None
                } else {
                    Some(b.attribute_set(attr_nodes))
                };
                let default = literal.as_ref().map(|l| lower_expr(b, l));
                let field = b.decl_field(field_name.as_str(), qtype, attr_set, default);
                fields.push(b.spanned(field, *span));
            }

            PUnitItem::Var { name, ty } => {
                let q = lower_qtype(b, ty);
                let marker = b.attribute("var", None);
                let attrs = b.attribute_set(vec![marker]);
                let field = b.decl_field(name.name.as_str(), q, Some(attrs), None);
                fields.push(b.spanned(field, name.span));
            }

            PUnitItem::Sink { name } => {
                let t = b.type_bytes();
                let q = b.qtype(t, ast::Constness::Mutable);
                let marker = b.attribute("sink", None);
                let attrs = b.attribute_set(vec![marker]);
                let field = b.decl_field(name.name.as_str(), q, Some(attrs), None);
                fields.push(b.spanned(field, name.span));
            }

            PUnitItem::Hook {
                target,
                foreach,
                body,
                span,
            } => {
                let block = lower_block(b, body);
                match target {
                    PHookTarget::Unit(prop) => {
                        let kind = match prop.as_str() {
                            "init" => HookKind::UnitInit,
                            "error" => HookKind::UnitError,
                            _ => HookKind::UnitDone,
                        };
                        let hook = b.decl_hook(format!("%{prop}").as_str(), kind, block);
                        unit_hooks.push(b.spanned(hook, *span));
                    }
                    PHookTarget::Field(field_name) => {
                        let kind = if *foreach {
                            HookKind::ForEach
                        } else {
                            HookKind::Field
                        };
                        let hook = b.decl_hook(field_name.as_str(), kind, block);
                        let hook = b.spanned(hook, *span);
                        // Attach to the named field; stray hooks become
                        // unit children and are diagnosed later.
                        let target_field = fields.iter().copied().find(|&f| {
                            b.ctx
                                .decl(f)
                                .map(|d| d.id.local() == field_name)
                                .unwrap_or(false)
                        });
                        match target_field {
                            Some(f) => {
                                b.ctx.append_child(f, Some(hook));
                            }
                            None => unit_hooks.push(hook),
                        }
                    }
                }
            }

            PUnitItem::Switch { cases, span } => {
                switches += 1;
                let mut case_fields = Vec::new();
                for (guard, name, ty) in cases {
                    let q = lower_qtype(b, ty);
                    let guard = lower_expr(b, guard);
                    let case_attr = b.attribute("case", Some(guard));
                    let attrs = b.attribute_set(vec![case_attr]);
                    let f = b.decl_field(name.name.as_str(), q, Some(attrs), None);
                    case_fields.push(b.spanned(f, name.span));
                }
                let union_t = b.type_union(case_fields);
                let q = b.qtype(union_t, ast::Constness::Mutable);
                let field = b.decl_field(format!("_switch_{switches}").as_str(), q, None, None);
                fields.push(b.spanned(field, *span));
            }

            PUnitItem::Property(attr) => {
                let node = lower_attr(b, attr);
                properties.push(node);
            }
        }
    }

    let attr_set = if properties.is_empty() {
        None
    } else {
        Some(b.attribute_set(properties))
    };
    let unit = b.type_unit(Vec::new(), fields, attr_set);
    for hook in unit_hooks {
        b.ctx.append_child(unit, Some(hook));
    }
    unit
}

fn lower_attr(b: &mut Builder, a: &PAttr) -> NodeId {
    let value = a.value.as_ref().map(|v| lower_expr(b, v));
    let node = b.attribute(&a.tag, value);
    b.spanned(node, a.span)
}

fn lower_block(b: &mut Builder, stmts: &[PStmt]) -> NodeId {
    let mut nodes = Vec::new();
    for s in stmts {
        nodes.push(lower_stmt(b, s));
    }
    b.stmt_block(nodes)
}

fn lower_stmt(b: &mut Builder, s: &PStmt) -> NodeId {
    match s {
        PStmt::Local { name, ty, init } => {
            let qtype = match ty {
                Some(t) => lower_qtype(b, t),
                None => {
                    let auto = b.type_auto();
                    b.qtype(auto, ast::Constness::Mutable)
                }
            };
            let init = init.as_ref().map(|e| lower_expr(b, e));
            let decl = b.decl_local(name.name.as_str(), qtype, init);
            let decl = b.spanned(decl, name.span);
            b.stmt_decl(decl)
        }
        PStmt::Expr(e) => {
            let e = lower_expr(b, e);
            b.stmt_expr(e)
        }
        PStmt::Return(e) => {
            let e = e.as_ref().map(|e| lower_expr(b, e));
            b.stmt_return(e)
        }
        PStmt::If {
            cond,
            then_body,
            else_body,
        } => {
            let cond = lower_expr(b, cond);
            let then_block = lower_block(b, then_body);
            let else_block = else_body.as_ref().map(|e| lower_block(b, e));
            b.stmt_if(None, cond, then_block, else_block)
        }
        PStmt::While { cond, body } => {
            let cond = lower_expr(b, cond);
            let body = lower_block(b, body);
            b.stmt_while(None, cond, body)
        }
        PStmt::Switch {
            binding,
            cond,
            cases,
        } => {
            // A binding form declares the condition value; the condition
            // expression then reads that binding.
            let (init, cond_expr) = match (binding, cond) {
                (Some((name, value)), _) => {
                    let auto = b.type_auto();
                    let q = b.qtype(auto, ast::Constness::Mutable);
                    let value = lower_expr(b, value);
                    let decl = b.decl_local(name.name.as_str(), q, Some(value));
                    let decl = b.spanned(decl, name.span);
                    let cond = b.expr_name(name.name.as_str());
                    (Some(decl), cond)
                }
                (None, Some(e)) => (None, lower_expr(b, e)),
                (None, None) => {
                    let tru = b.ctor_bool(true);
                    (None, b.expr_ctor(tru))
                }
            };
            let mut case_nodes = Vec::new();
            for (guard, body) in cases {
                let guard = guard.as_ref().map(|g| lower_expr(b, g));
                let block = lower_block(b, body);
                case_nodes.push(b.stmt_switch_case(guard, block));
            }
            b.stmt_switch(init, cond_expr, case_nodes)
        }
        PStmt::Print(e) => {
            let e = lower_expr(b, e);
            b.stmt_print(e)
        }
    }
}

fn lower_expr(b: &mut Builder, e: &PExpr) -> NodeId {
    let node = match &e.kind {
        PExprKind::Integer(v) => {
            let c = b.ctor_uint(*v, 64);
            b.expr_ctor(c)
        }
        PExprKind::Negative(v) => {
            let c = b.ctor_sint(*v, 64);
            b.expr_ctor(c)
        }
        PExprKind::Real(v) => {
            let c = b.ctor_real(*v);
            b.expr_ctor(c)
        }
        PExprKind::Bool(v) => {
            let c = b.ctor_bool(*v);
            b.expr_ctor(c)
        }
        PExprKind::Str(s) => {
            let c = b.ctor_string(s.clone());
            b.expr_ctor(c)
        }
        PExprKind::Bytes(bytes) => {
            let c = b.ctor_bytes(bytes.clone());
            b.expr_ctor(c)
        }
        PExprKind::Regex(p) => {
            let c = b.ctor_regexp(vec![p.clone()]);
            b.expr_ctor(c)
        }
        PExprKind::Name(name) => b.expr_name(name.as_str()),
        PExprKind::DollarDollar => b.expr_dollar_dollar(),
        PExprKind::SelfE => b.expr_self(),
        PExprKind::Member(recv, id) => {
            let r = lower_expr(b, recv);
            b.expr_member(r, id)
        }
        PExprKind::TryMember(recv, id) => {
            let r = lower_expr(b, recv);
            b.expr_try_member(r, id)
        }
        PExprKind::Index(base, index) => {
            let base = lower_expr(b, base);
            let index = lower_expr(b, index);
            b.expr_op(OperatorKind::Index, vec![base, index])
        }
        PExprKind::Call(callee, args) => {
            let callee = lower_expr(b, callee);
            let mut operands = vec![callee];
            for a in args {
                operands.push(lower_expr(b, a));
            }
            b.expr_op(OperatorKind::Call, operands)
        }
        PExprKind::Binary(op, lhs, rhs) => {
            let l = lower_expr(b, lhs);
            let r = lower_expr(b, rhs);
            b.expr_op(*op, vec![l, r])
        }
        PExprKind::Not(inner) => {
            let i = lower_expr(b, inner);
            b.expr_op(OperatorKind::Negate, vec![i])
        }
        PExprKind::Assign(target, value) => {
            let t = lower_expr(b, target);
            let v = lower_expr(b, value);
            b.expr_assign(t, v)
        }
    };
    b.spanned(node, e.span)
}

// ── Tests ────────────────────────────────────────────────────────────────
