// unit.rs — Compilation units and build provenance
//
// One `Unit` per input source: its identity, AST root, dependency set, and
// (once codegen ran) its emitted C++. Provenance hashes the source text
// and the compiler options so a cached `.hlto` can be validated against
// the exact inputs that produced it.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::ast::Id;
use crate::cxx::CxxUnit;
use crate::node::NodeId;

// ── Unit ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Unit {
    /// Module ID of the unit's root module.
    pub id: Id,
    pub path: PathBuf,
    /// Source extension, with leading dot.
    pub extension: String,
    /// The module declaration node.
    pub root: NodeId,
    /// Modules this unit imports.
    pub dependencies: Vec<Id>,
    /// Emitted C++, present after code generation.
    pub cxx: Option<CxxUnit>,
    /// Whether the unit contains code that must emit its own C++ module.
    pub requires_compilation: bool,
    pub provenance: Provenance,
}

impl Unit {
    pub fn new(id: Id, path: PathBuf, extension: &str, root: NodeId, source: &str) -> Self {
        Self {
            id,
            path,
            extension: extension.to_string(),
            root,
            dependencies: Vec::new(),
            cxx: None,
            requires_compilation: true,
            provenance: Provenance::of(source),
        }
    }
}

// ── Provenance ───────────────────────────────────────────────────────────

/// Hash-based identity of a build input, used as cache key for compiled
/// artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn of(source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let digest = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        Self {
            source_hash: hash,
            compiler_version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Cache key combining source and options fingerprints.
    pub fn cache_key(&self, options_fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_hash);
        hasher.update(options_fingerprint.as_bytes());
        hasher.update(self.compiler_version.as_bytes());
        let digest = hasher.finalize();
        let mut s = String::with_capacity(64);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Serialize as JSON for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.compiler_version,
        )
    }
}
