// pipeline.rs — The compilation driver
//
// Orchestrates the plugin-ordered pipeline: parse inputs, run the
// scope/resolve fixed point (with type unification after each productive
// sweep), validate, apply the AST transforms, run one more fixed point
// over their additions, validate again, then generate C++ per unit plus
// the linker wiring unit.
//
// Error aggregation: node-attached errors are collected at every stage
// boundary; any error present halts the pipeline and names the failing
// stage. Warnings never stop it.
//
// Preconditions: at least one input loaded before `compile`.
// Postconditions: on success every unit has its `cxx` document.
// Failure modes: parse errors, non-convergence (hard iteration cap),
//   validation errors, emitter diagnostics.
// Side effects: may load imported modules from the search path.

use std::path::{Path, PathBuf};

use crate::ast::{DeclKind, Id, NodeKind};
use crate::codegen::{self, CodegenOptions};
use crate::cxx::{self, CxxUnit};
use crate::diag::{codes, has_errors, DiagLevel, Diagnostic};
use crate::meta::Meta;
use crate::node::{AstContext, NodeId};
use crate::plugin::{plugin_for_extension, plugins};
use crate::unify::unify_all;
use crate::unit::Unit;
use crate::visitor::collect;

// ── Options ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Module search paths for imports (CLI `-L` plus `SPICY_PATH`).
    pub library_paths: Vec<PathBuf>,
    /// Hard cap on resolver sweeps before declaring non-convergence.
    pub iteration_cap: usize,
    pub codegen: CodegenOptions,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            library_paths: Vec::new(),
            iteration_cap: 32,
            codegen: CodegenOptions::default(),
        }
    }
}

// ── Stages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Resolve,
    ValidatePre,
    Transform,
    ValidatePost,
    Codegen,
}

/// Pipeline execution stopped at a stage with error diagnostics; the
/// diagnostics themselves are in `Driver::diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_stage: Stage,
}

// ── Driver ───────────────────────────────────────────────────────────────

pub struct Driver {
    pub ctx: AstContext,
    root: NodeId,
    pub units: Vec<Unit>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    /// The aggregated wiring unit, present after codegen.
    pub linker_unit: Option<CxxUnit>,
    options: DriverOptions,
}

impl Driver {
    pub fn new(options: DriverOptions) -> Self {
        let mut ctx = AstContext::new();
        let root = ctx.make(NodeKind::Root, vec![], Meta::none());
        Self {
            ctx,
            root,
            units: Vec::new(),
            diagnostics: Vec::new(),
            has_error: false,
            linker_unit: None,
            options,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    // ── Input loading ────────────────────────────────────────────────

    pub fn load_file(&mut self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(source) => self.load_string(&source, path),
            Err(e) => {
                self.push_diag(
                    Diagnostic::error(
                        crate::meta::synthesized_span(),
                        format!("{}: {e}", path.display()),
                    )
                    .with_code(codes::E0002),
                );
                false
            }
        }
    }

    /// Parse one source and register its module. Returns success.
    pub fn load_string(&mut self, source: &str, path: &Path) -> bool {
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let Some(plugin) = plugin_for_extension(&extension) else {
            self.push_diag(
                Diagnostic::error(
                    crate::meta::synthesized_span(),
                    format!("no plugin handles '{extension}' files"),
                )
                .with_code(codes::E0002),
            );
            return false;
        };
        let Some(parse) = plugin.parse else {
            return false;
        };

        let outcome = parse(&mut self.ctx, source, path);
        for d in outcome.errors {
            self.push_diag(d);
        }
        let Some(module) = outcome.module else {
            return false;
        };

        let id = self
            .ctx
            .decl(module)
            .map(|d| d.id.clone())
            .unwrap_or_else(|| Id::new("anonymous"));
        self.ctx.append_child(self.root, Some(module));
        self.ctx.cache_module(id.as_str(), &extension, module);
        self.units.push(Unit::new(
            id,
            path.to_path_buf(),
            &extension,
            module,
            source,
        ));
        true
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Run the full pipeline over all loaded inputs.
    pub fn compile(&mut self) -> Result<(), PipelineError> {
        if self.has_error {
            return Err(PipelineError {
                failing_stage: Stage::Parse,
            });
        }

        // ast_init, per plugin in order.
        for p in plugins() {
            if let Some(init) = p.ast_init {
                init(&mut self.ctx, self.root);
            }
        }

        self.fixpoint()?;
        self.boundary(Stage::Resolve)?;

        for p in plugins() {
            if let Some(validate) = p.ast_validate_pre {
                validate(&mut self.ctx, self.root);
            }
        }
        self.boundary(Stage::ValidatePre)?;

        // Transforms lower Spicy to HILTI; one more fixed point settles
        // whatever they introduced.
        let mut transformed = false;
        for p in plugins() {
            if let Some(transform) = p.ast_transform {
                transformed |= transform(&mut self.ctx, self.root);
            }
        }
        if transformed {
            self.fixpoint()?;
        }
        self.boundary(Stage::Transform)?;

        for p in plugins() {
            if let Some(validate) = p.ast_validate_post {
                validate(&mut self.ctx, self.root);
            }
        }
        self.boundary(Stage::ValidatePost)?;

        self.generate()?;
        Ok(())
    }

    /// The scope/resolve fixed point. After each productive sweep, type
    /// unification reruns over the whole AST.
    fn fixpoint(&mut self) -> Result<(), PipelineError> {
        for sweep in 0..self.options.iteration_cap {
            let mut changed = self.resolve_imports();
            for p in plugins() {
                if let Some(build_scopes) = p.ast_build_scopes {
                    changed |= build_scopes(&mut self.ctx, self.root);
                }
                if let Some(resolve) = p.ast_resolve {
                    changed |= resolve(&mut self.ctx, self.root);
                }
            }
            tracing::debug!(target: "resolver", "sweep {sweep}: changed={changed}");
            if !changed {
                // Converged. A final unification pass surfaces definition
                // cycles.
                for node in unify_all(&mut self.ctx, self.root) {
                    self.ctx
                        .add_error(node, "cycle detected in definition of type");
                }
                return Ok(());
            }
            let _ = unify_all(&mut self.ctx, self.root);
        }
        self.push_diag(
            Diagnostic::error(
                crate::meta::synthesized_span(),
                "resolver did not converge",
            )
            .with_code(codes::E0501),
        );
        Err(PipelineError {
            failing_stage: Stage::Resolve,
        })
    }

    /// Bind import declarations to their modules, loading them from the
    /// search path on first sight.
    fn resolve_imports(&mut self) -> bool {
        let mut changed = false;
        for node in collect(&self.ctx, self.root) {
            let Some(data) = self.ctx.decl(node).cloned() else {
                continue;
            };
            let DeclKind::ImportedModule { extension } = &data.kind else {
                continue;
            };
            if self.ctx.name_resolution(node).is_some() {
                continue;
            }
            if let Some(module) = self.find_module(&data.id) {
                let index = self.ctx.register_decl(module);
                self.ctx.set_name_resolution(node, index);
                changed = true;
                continue;
            }
            if self.load_import(&data.id, extension) {
                changed = true;
            }
        }
        changed
    }

    fn find_module(&self, id: &Id) -> Option<NodeId> {
        self.ctx.children(self.root).into_iter().flatten().find(|&m| {
            self.ctx
                .decl(m)
                .map(|d| matches!(d.kind, DeclKind::Module) && d.id == *id)
                .unwrap_or(false)
        })
    }

    fn load_import(&mut self, id: &Id, extension: &str) -> bool {
        if self.ctx.cached_module(id.as_str(), extension).is_some() {
            return false;
        }
        let file = format!("{}{extension}", id.local());
        for dir in self.options.library_paths.clone() {
            let candidate = dir.join(&file);
            if candidate.exists() {
                return self.load_file(&candidate);
            }
        }
        false
    }

    /// Collect node errors at a stage boundary; stop on any error.
    fn boundary(&mut self, stage: Stage) -> Result<(), PipelineError> {
        for (node, error) in self.ctx.drain_errors(self.root) {
            let span = self.ctx.meta(node).span;
            self.push_diag(Diagnostic::error(span, error.message));
        }
        // Imports that never bound are reported here, once.
        if stage == Stage::Resolve {
            for node in collect(&self.ctx, self.root) {
                if let Some(data) = self.ctx.decl(node) {
                    if matches!(data.kind, DeclKind::ImportedModule { .. })
                        && self.ctx.name_resolution(node).is_none()
                    {
                        let span = self.ctx.meta(node).span;
                        let msg = format!("cannot find module '{}' to import", data.id);
                        self.push_diag(Diagnostic::error(span, msg).with_code(codes::E0003));
                    }
                }
            }
        }
        if self.has_error {
            Err(PipelineError {
                failing_stage: stage,
            })
        } else {
            Ok(())
        }
    }

    fn generate(&mut self) -> Result<(), PipelineError> {
        let mut metas = Vec::new();
        for i in 0..self.units.len() {
            if !self.units[i].requires_compilation {
                continue;
            }
            let module = self.units[i].root;
            let result = codegen::codegen_module(&mut self.ctx, module, &self.options.codegen);
            for d in result.diagnostics {
                self.push_diag(d);
            }
            metas.push(result.unit.linker_meta.clone());
            self.units[i].cxx = Some(result.unit);
        }
        self.linker_unit = Some(cxx::link_units(&metas));
        if self.has_error {
            Err(PipelineError {
                failing_stage: Stage::Codegen,
            })
        } else {
            Ok(())
        }
    }

    // ── Outputs ──────────────────────────────────────────────────────

    /// All emitted C++ sources: one per unit plus the linker wiring unit.
    pub fn cpp_sources(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .units
            .iter()
            .filter_map(|u| {
                u.cxx
                    .as_ref()
                    .map(|c| (u.id.as_str().to_string(), c.format()))
            })
            .collect();
        if let Some(linker) = &self.linker_unit {
            out.push(("__linker__".to_string(), linker.format()));
        }
        out
    }

    /// Render all finalized grammars for `--emit grammar`.
    pub fn dump_grammars(&self) -> String {
        let mut keys: Vec<&String> = self.ctx.grammars.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            let g = &self.ctx.grammars[key];
            out.push_str(&format!("grammar {key} (finalized: {})\n", g.is_finalized()));
            for (id, p) in g.productions() {
                out.push_str(&format!(
                    "  {} {} nullable={} first={{{}}}\n",
                    id.0,
                    p.symbol,
                    p.nullable,
                    p.first
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }
        out
    }

    fn push_diag(&mut self, d: Diagnostic) {
        if d.level == DiagLevel::Error {
            self.has_error = true;
        }
        self.diagnostics.push(d);
    }

    pub fn has_errors(&self) -> bool {
        self.has_error || has_errors(&self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with(source: &str, name: &str) -> Driver {
        let mut d = Driver::new(DriverOptions::default());
        assert!(d.load_string(source, &PathBuf::from(name)));
        d
    }

    #[test]
    fn full_pipeline_on_simple_unit() {
        let mut d = driver_with(
            r#"
            module P;
            public type Msg = unit {
                : b"HI";
                len: uint8;
            };
            "#,
            "p.spicy",
        );
        d.compile().unwrap();
        assert!(!d.has_errors());
        let sources = d.cpp_sources();
        // Module unit plus linker wiring unit.
        assert_eq!(sources.len(), 2);
        assert!(sources[0].1.contains("parse_Msg"));
        assert!(sources[1].1.contains("hlto_init"));
    }

    #[test]
    fn unknown_id_stops_at_validate() {
        let mut d = driver_with(
            r#"
            module M;
            function f() : uint64 {
                return nowhere;
            }
            "#,
            "m.hlt",
        );
        let err = d.compile().unwrap_err();
        assert_eq!(err.failing_stage, Stage::ValidatePost);
        assert!(d
            .diagnostics
            .iter()
            .any(|x| x.message.contains("unknown ID 'nowhere'")));
    }

    #[test]
    fn ll1_conflict_stops_with_diagnostic() {
        let mut d = driver_with(
            r#"
            module P;
            type Msg = unit {
                switch {
                    b"a" -> x: uint8;
                    b"a" -> y: uint8;
                };
            };
            "#,
            "p.spicy",
        );
        let err = d.compile().unwrap_err();
        assert_eq!(err.failing_stage, Stage::Transform);
        let msg = d
            .diagnostics
            .iter()
            .map(|x| x.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(msg.contains("ambiguous"), "{msg}");
        assert!(msg.contains("\"a\""), "{msg}");
    }

    #[test]
    fn missing_import_is_reported() {
        let mut d = driver_with(
            r#"
            module A;
            import NoSuchModule;
            "#,
            "a.spicy",
        );
        let err = d.compile().unwrap_err();
        assert_eq!(err.failing_stage, Stage::Resolve);
        assert!(d
            .diagnostics
            .iter()
            .any(|x| x.message.contains("NoSuchModule")));
    }

    #[test]
    fn import_between_loaded_modules_resolves() {
        let mut d = Driver::new(DriverOptions::default());
        d.load_string(
            r#"
            module Lib;
            public type Color = enum { Red = 1 };
            "#,
            &PathBuf::from("lib.spicy"),
        );
        d.load_string(
            r#"
            module App;
            import Lib;
            const C = Lib::Color::Red;
            "#,
            &PathBuf::from("app.spicy"),
        );
        d.compile().unwrap();
        assert!(!d.has_errors());
    }

    #[test]
    fn resolver_converges_and_is_stable() {
        let mut d = driver_with(
            r#"
            module M;
            const ONE = 1;
            function f() : uint64 {
                return ONE + 1;
            }
            "#,
            "m.hlt",
        );
        d.compile().unwrap();

        // After convergence another resolver sweep changes nothing.
        let root = d.root();
        let mut changed = false;
        for p in plugins() {
            if let Some(build_scopes) = p.ast_build_scopes {
                changed |= build_scopes(&mut d.ctx, root);
            }
            if let Some(resolve) = p.ast_resolve {
                changed |= resolve(&mut d.ctx, root);
            }
        }
        assert!(!changed);
    }
}
