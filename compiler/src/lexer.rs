// lexer.rs — Lexer for .spicy and .hlt source files
//
// One shared token set serves both surface languages; the parser selects
// the grammar by file extension. Uses the `logos` crate for DFA-based
// lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex
//   errors.
// Failure modes: unrecognized characters produce `LexError`; lexing
//   continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Token types shared by the Spicy and HILTI surface grammars.
///
/// Keywords and symbols are fixed strings; literals carry parsed values.
/// Identifiers carry no value; the parser retrieves the text through the
/// span.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("module")]
    Module,
    #[token("import")]
    Import,
    #[token("public")]
    Public,
    #[token("export")]
    Export,
    #[token("type")]
    Type,
    #[token("unit")]
    Unit,
    #[token("struct")]
    Struct,
    #[token("union")]
    Union,
    #[token("enum")]
    Enum,
    #[token("bitfield")]
    Bitfield,
    #[token("const")]
    Const,
    #[token("global")]
    Global,
    #[token("local")]
    Local,
    #[token("function")]
    Function,
    #[token("on")]
    On,
    #[token("var")]
    Var,
    #[token("sink")]
    Sink,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("print")]
    Print,
    #[token("self")]
    SelfKw,
    #[token("foreach")]
    Foreach,
    #[token("inout")]
    Inout,
    #[token("copy")]
    Copy,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ── Type keywords ──
    #[token("bytes")]
    BytesTy,
    #[token("stream")]
    StreamTy,
    #[token("string")]
    StringTy,
    #[token("real")]
    RealTy,
    #[token("bool")]
    BoolTy,
    #[token("addr")]
    AddrTy,
    #[token("port")]
    PortTy,
    #[token("interval")]
    IntervalTy,
    #[token("time")]
    TimeTy,
    #[token("void")]
    VoidTy,
    #[token("auto")]
    AutoTy,
    #[token("optional")]
    OptionalTy,
    #[token("tuple")]
    TupleTy,
    #[token("vector")]
    VectorTy,
    #[token("list")]
    ListTy,
    #[token("set")]
    SetTy,
    #[token("map")]
    MapTy,

    /// `uint8` .. `uint64`; carries the bit width.
    #[regex(r"uint(8|16|32|64)", parse_uint_width)]
    UIntTy(u32),

    /// `int8` .. `int64`; carries the bit width.
    #[regex(r"int(8|16|32|64)", parse_int_width)]
    SIntTy(u32),

    // ── Symbols ──
    #[token("::")]
    ColonColon,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".?")]
    DotQuestion,
    #[token(".")]
    Dot,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Equals,
    #[token("->")]
    Arrow,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    PercentSign,
    #[token("!")]
    Bang,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("$$")]
    DollarDollar,

    // ── Attributes and properties ──
    /// `&size`, `&until-including`, ...; carries the tag without `&`.
    #[regex(r"&[a-z][a-z-]*", parse_tag)]
    Attribute(String),

    /// `%done`, `%random-access`, ...; carries the tag without `%`.
    #[regex(r"%[a-z][a-z-]*", parse_tag)]
    Property(String),

    // ── Literals ──
    /// Real literal; must precede `Integer` so `1.5` wins over `1`.
    #[regex(r"[0-9]+\.[0-9]+", parse_real)]
    Real(f64),

    /// Integer literal, decimal or `0x` hex.
    #[regex(r"0x[0-9a-fA-F]+|[0-9]+", parse_integer)]
    Integer(u64),

    /// Bytes literal `b"..."` with `\"` and `\\` escapes.
    #[regex(r#"b"([^"\\]|\\.)*""#, parse_bytes_lit)]
    BytesLit(Vec<u8>),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string_lit)]
    StringLit(String),

    /// Regular-expression literal `/pattern/`. Patterns cannot contain
    /// whitespace, which keeps division expressions unambiguous.
    #[regex(r"/[^/ \t\n]+/", parse_regex_lit)]
    RegexLit(String),

    // ── Identifier ──
    /// `[a-zA-Z_][a-zA-Z0-9_]*`; placed after keywords, which logos
    /// prioritizes for equal-length matches.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Module => write!(f, "module"),
            Token::Import => write!(f, "import"),
            Token::Public => write!(f, "public"),
            Token::Export => write!(f, "export"),
            Token::Type => write!(f, "type"),
            Token::Unit => write!(f, "unit"),
            Token::Struct => write!(f, "struct"),
            Token::Union => write!(f, "union"),
            Token::Enum => write!(f, "enum"),
            Token::Bitfield => write!(f, "bitfield"),
            Token::Const => write!(f, "const"),
            Token::Global => write!(f, "global"),
            Token::Local => write!(f, "local"),
            Token::Function => write!(f, "function"),
            Token::On => write!(f, "on"),
            Token::Var => write!(f, "var"),
            Token::Sink => write!(f, "sink"),
            Token::Switch => write!(f, "switch"),
            Token::Case => write!(f, "case"),
            Token::Default => write!(f, "default"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::Return => write!(f, "return"),
            Token::Print => write!(f, "print"),
            Token::SelfKw => write!(f, "self"),
            Token::Foreach => write!(f, "foreach"),
            Token::Inout => write!(f, "inout"),
            Token::Copy => write!(f, "copy"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::BytesTy => write!(f, "bytes"),
            Token::StreamTy => write!(f, "stream"),
            Token::StringTy => write!(f, "string"),
            Token::RealTy => write!(f, "real"),
            Token::BoolTy => write!(f, "bool"),
            Token::AddrTy => write!(f, "addr"),
            Token::PortTy => write!(f, "port"),
            Token::IntervalTy => write!(f, "interval"),
            Token::TimeTy => write!(f, "time"),
            Token::VoidTy => write!(f, "void"),
            Token::AutoTy => write!(f, "auto"),
            Token::OptionalTy => write!(f, "optional"),
            Token::TupleTy => write!(f, "tuple"),
            Token::VectorTy => write!(f, "vector"),
            Token::ListTy => write!(f, "list"),
            Token::SetTy => write!(f, "set"),
            Token::MapTy => write!(f, "map"),
            Token::UIntTy(w) => write!(f, "uint{w}"),
            Token::SIntTy(w) => write!(f, "int{w}"),
            Token::ColonColon => write!(f, "::"),
            Token::Semicolon => write!(f, ";"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::DotQuestion => write!(f, ".?"),
            Token::Dot => write!(f, "."),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::LtEq => write!(f, "<="),
            Token::GtEq => write!(f, ">="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Equals => write!(f, "="),
            Token::Arrow => write!(f, "->"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::PercentSign => write!(f, "%"),
            Token::Bang => write!(f, "!"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::DollarDollar => write!(f, "$$"),
            Token::Attribute(tag) => write!(f, "&{tag}"),
            Token::Property(tag) => write!(f, "%{tag}"),
            Token::Real(v) => write!(f, "{v}"),
            Token::Integer(v) => write!(f, "{v}"),
            Token::BytesLit(_) => write!(f, "<bytes>"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::RegexLit(p) => write!(f, "/{p}/"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_uint_width(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()[4..].parse().ok()
}

fn parse_int_width(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()[3..].parse().ok()
}

fn parse_tag(lex: &mut logos::Lexer<'_, Token>) -> String {
    lex.slice()[1..].to_string()
}

fn parse_real(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_integer(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    let slice = lex.slice();
    if let Some(hex) = slice.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        slice.parse().ok()
    }
}

fn unescape(inner: &str) -> Option<String> {
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

fn parse_string_lit(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

fn parse_bytes_lit(lex: &mut logos::Lexer<'_, Token>) -> Option<Vec<u8>> {
    let slice = lex.slice();
    unescape(&slice[2..slice.len() - 1]).map(String::into_bytes)
}

fn parse_regex_lit(lex: &mut logos::Lexer<'_, Token>) -> String {
    let slice = lex.slice();
    slice[1..slice.len() - 1].to_string()
}

// ── Public API ──

/// Lex a source string into tokens.
///
/// Lexing is non-fatal: errors are collected for unrecognized characters
/// and the lexer continues.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_idents() {
        let tokens = lex_ok("module unit units");
        assert_eq!(tokens, vec![Token::Module, Token::Unit, Token::Ident]);
    }

    #[test]
    fn integer_type_widths() {
        let tokens = lex_ok("uint8 uint64 int16");
        assert_eq!(
            tokens,
            vec![Token::UIntTy(8), Token::UIntTy(64), Token::SIntTy(16)]
        );
        // `uint7` is not a type keyword.
        assert_eq!(lex_ok("uint7"), vec![Token::Ident]);
    }

    #[test]
    fn attributes_and_properties() {
        let tokens = lex_ok("&size &until-including %done %random-access");
        assert_eq!(
            tokens,
            vec![
                Token::Attribute("size".into()),
                Token::Attribute("until-including".into()),
                Token::Property("done".into()),
                Token::Property("random-access".into()),
            ]
        );
    }

    #[test]
    fn ampersand_attribute_vs_logical_and() {
        let tokens = lex_ok("a && b &eod");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::AndAnd,
                Token::Ident,
                Token::Attribute("eod".into()),
            ]
        );
    }

    #[test]
    fn literals() {
        let tokens = lex_ok(r#"42 0xff 3.25 "hi" b"GET" /[A-Z]+/ true"#);
        assert_eq!(
            tokens,
            vec![
                Token::Integer(42),
                Token::Integer(255),
                Token::Real(3.25),
                Token::StringLit("hi".into()),
                Token::BytesLit(b"GET".to_vec()),
                Token::RegexLit("[A-Z]+".into()),
                Token::True,
            ]
        );
    }

    #[test]
    fn division_is_not_a_regex() {
        let tokens = lex_ok("a / b / c");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Slash,
                Token::Ident,
                Token::Slash,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn scoped_id_tokens() {
        let tokens = lex_ok("HTTP::Request");
        assert_eq!(tokens, vec![Token::Ident, Token::ColonColon, Token::Ident]);
    }

    #[test]
    fn dollar_dollar_and_try_member() {
        let tokens = lex_ok("$$ x.?field");
        assert_eq!(
            tokens,
            vec![
                Token::DollarDollar,
                Token::Ident,
                Token::DotQuestion,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = lex_ok("module # trailing words\nx");
        assert_eq!(tokens, vec![Token::Module, Token::Ident]);
    }

    #[test]
    fn bad_character_is_collected() {
        let result = lex("module ^ x");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains('^'));
    }
}
