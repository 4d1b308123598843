// registry.rs — Global parser and analyzer registration
//
// Compiled parser modules register themselves here at load time; hosts look
// parsers up by name, MIME type, or well-known port. All registration
// functions are idempotent per name. The registry is populated during
// module initialization and effectively read-only afterwards.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::Error;
use crate::fiber::Value;
use crate::stream::View;

// ── Parser descriptors ───────────────────────────────────────────────────

pub type ParserEntry = fn(View) -> Result<Value, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Originator,
    Responder,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub port: u16,
    pub direction: Direction,
}

/// A registered parser: identity, documentation, and up to three entry
/// points (one-shot, streaming, sink-attached).
#[derive(Clone)]
pub struct Parser {
    pub name: String,
    pub is_public: bool,
    pub description: String,
    pub mime_types: Vec<String>,
    pub ports: Vec<Port>,
    pub parse_once: Option<ParserEntry>,
    pub parse_stream: Option<ParserEntry>,
    pub parse_sink: Option<ParserEntry>,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("name", &self.name)
            .field("is_public", &self.is_public)
            .field("mime_types", &self.mime_types)
            .field("ports", &self.ports)
            .finish()
    }
}

// ── Analyzer descriptors ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

#[derive(Debug, Clone)]
pub struct ProtocolAnalyzer {
    pub name: String,
    pub protocol: Protocol,
    pub ports: Vec<Port>,
    pub parser_orig: String,
    pub parser_resp: String,
    pub replaces: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileAnalyzer {
    pub name: String,
    pub mime_types: Vec<String>,
    pub parser: String,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub namespace: String,
    pub id: String,
    pub labels: Vec<(String, i64)>,
}

// ── Registry state ───────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    parsers: Vec<Parser>,
    protocol_analyzers: Vec<ProtocolAnalyzer>,
    file_analyzers: Vec<FileAnalyzer>,
    enum_types: Vec<EnumType>,
    pre_init_hooks: Vec<fn()>,
    init_hooks: Vec<fn()>,
    initialized: bool,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

// ── Registration API ─────────────────────────────────────────────────────

/// Register a parser. A second registration under the same name is ignored.
pub fn register_parser(parser: Parser) {
    let mut reg = REGISTRY.lock().unwrap();
    if reg.parsers.iter().any(|p| p.name == parser.name) {
        return;
    }
    reg.parsers.push(parser);
}

pub fn register_protocol_analyzer(
    name: &str,
    protocol: Protocol,
    ports: &[Port],
    parser_orig: &str,
    parser_resp: &str,
    replaces: Option<&str>,
) {
    let mut reg = REGISTRY.lock().unwrap();
    if reg.protocol_analyzers.iter().any(|a| a.name == name) {
        return;
    }
    reg.protocol_analyzers.push(ProtocolAnalyzer {
        name: name.to_string(),
        protocol,
        ports: ports.to_vec(),
        parser_orig: parser_orig.to_string(),
        parser_resp: parser_resp.to_string(),
        replaces: replaces.map(str::to_string),
    });
}

pub fn register_file_analyzer(name: &str, mime_types: &[&str], parser: &str) {
    let mut reg = REGISTRY.lock().unwrap();
    if reg.file_analyzers.iter().any(|a| a.name == name) {
        return;
    }
    reg.file_analyzers.push(FileAnalyzer {
        name: name.to_string(),
        mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
        parser: parser.to_string(),
    });
}

pub fn register_enum_type(namespace: &str, id: &str, labels: &[(&str, i64)]) {
    let mut reg = REGISTRY.lock().unwrap();
    if reg
        .enum_types
        .iter()
        .any(|e| e.namespace == namespace && e.id == id)
    {
        return;
    }
    reg.enum_types.push(EnumType {
        namespace: namespace.to_string(),
        id: id.to_string(),
        labels: labels.iter().map(|(n, o)| (n.to_string(), *o)).collect(),
    });
}

/// Hooks run by `run_init` before any parser is used: pre-init hooks first,
/// in registration order, then init hooks.
pub fn register_pre_init_hook(hook: fn()) {
    REGISTRY.lock().unwrap().pre_init_hooks.push(hook);
}

pub fn register_init_hook(hook: fn()) {
    REGISTRY.lock().unwrap().init_hooks.push(hook);
}

/// Run all registered pre-init and init hooks, once. Later calls are no-ops.
pub fn run_init() {
    let (pre, init) = {
        let mut reg = REGISTRY.lock().unwrap();
        if reg.initialized {
            return;
        }
        reg.initialized = true;
        (reg.pre_init_hooks.clone(), reg.init_hooks.clone())
    };
    for hook in pre {
        hook();
    }
    for hook in init {
        hook();
    }
}

// ── Lookup API ───────────────────────────────────────────────────────────

pub fn lookup_parser(name: &str) -> Option<Parser> {
    REGISTRY
        .lock()
        .unwrap()
        .parsers
        .iter()
        .find(|p| p.name == name)
        .cloned()
}

pub fn parsers() -> Vec<Parser> {
    REGISTRY.lock().unwrap().parsers.clone()
}

pub fn parsers_for_mime_type(mime: &str) -> Vec<Parser> {
    REGISTRY
        .lock()
        .unwrap()
        .parsers
        .iter()
        .filter(|p| p.mime_types.iter().any(|m| m == mime))
        .cloned()
        .collect()
}

pub fn parsers_for_port(port: u16) -> Vec<Parser> {
    REGISTRY
        .lock()
        .unwrap()
        .parsers
        .iter()
        .filter(|p| p.ports.iter().any(|q| q.port == port))
        .cloned()
        .collect()
}

pub fn enum_types() -> HashMap<(String, String), Vec<(String, i64)>> {
    REGISTRY
        .lock()
        .unwrap()
        .enum_types
        .iter()
        .map(|e| ((e.namespace.clone(), e.id.clone()), e.labels.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_parser(name: &str) -> Parser {
        Parser {
            name: name.to_string(),
            is_public: true,
            description: "test parser".into(),
            mime_types: vec!["application/test".into()],
            ports: vec![Port {
                port: 4040,
                direction: Direction::Both,
            }],
            parse_once: None,
            parse_stream: None,
            parse_sink: None,
        }
    }

    #[test]
    fn registration_is_idempotent_per_name() {
        register_parser(dummy_parser("Test::A"));
        register_parser(dummy_parser("Test::A"));
        let found: Vec<_> = parsers().into_iter().filter(|p| p.name == "Test::A").collect();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn lookup_by_mime_and_port() {
        register_parser(dummy_parser("Test::B"));
        assert!(parsers_for_mime_type("application/test")
            .iter()
            .any(|p| p.name == "Test::B"));
        assert!(parsers_for_port(4040).iter().any(|p| p.name == "Test::B"));
        assert!(parsers_for_port(9).iter().all(|p| p.name != "Test::B"));
    }

    #[test]
    fn protocol_analyzer_idempotent() {
        let ports = [Port {
            port: 80,
            direction: Direction::Both,
        }];
        register_protocol_analyzer("zeek_HTTP", Protocol::Tcp, &ports, "HTTP::Request", "HTTP::Reply", None);
        register_protocol_analyzer("zeek_HTTP", Protocol::Udp, &ports, "X", "Y", None);
        let reg = REGISTRY.lock().unwrap();
        let found: Vec<_> = reg
            .protocol_analyzers
            .iter()
            .filter(|a| a.name == "zeek_HTTP")
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].protocol, Protocol::Tcp);
    }

    #[test]
    fn enum_registration() {
        register_enum_type("Test", "Color", &[("Red", 0), ("Green", 1)]);
        register_enum_type("Test", "Color", &[("Blue", 2)]);
        let enums = enum_types();
        let labels = &enums[&("Test".to_string(), "Color".to_string())];
        assert_eq!(labels.len(), 2);
    }
}
