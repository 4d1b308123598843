// jit.rs — External C++ compile job queue
//
// Hands emitted C++ source to a system C++ compiler: one compile job per
// unit, all spawned in parallel with captured stdout/stderr, then a link
// step combining the objects into a shared library. The compiler binary is
// an opaque external tool; nothing here prints, and results come back as
// structured `JobResult`s for the driver to report.
//
// Preconditions: the configured compiler exists on PATH (or is an
//   absolute path).
// Postconditions: temp files are removed on success and failure alike.
// Failure modes: spawn errors and non-zero exits are captured per job.
// Side effects: temp files under the system temp directory; child
//   processes.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

// ── Configuration ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CxxCompiler {
    /// Compiler command, e.g. `c++`.
    pub cc: String,
    /// Extra flags; defaults chosen by `for_build`.
    pub cflags: Vec<String>,
    pub include_paths: Vec<PathBuf>,
}

impl CxxCompiler {
    pub fn new(cc: impl Into<String>) -> Self {
        Self {
            cc: cc.into(),
            cflags: Vec::new(),
            include_paths: Vec::new(),
        }
    }

    pub fn for_build(cc: impl Into<String>, release: bool) -> Self {
        let mut c = Self::new(cc);
        c.cflags.push("-std=c++17".into());
        if release {
            c.cflags.push("-O2".into());
            c.cflags.push("-DNDEBUG".into());
        } else {
            c.cflags.push("-O0".into());
            c.cflags.push("-g".into());
        }
        c.cflags.push("-fPIC".into());
        c
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct JobResult {
    pub name: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Object file produced, present on success.
    pub object: Option<PathBuf>,
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("spicyc_{}_{}_{}.{ext}", prefix, std::process::id(), n))
}

struct RunningJob {
    name: String,
    child: std::io::Result<Child>,
    source: PathBuf,
    object: PathBuf,
}

/// Compile every (name, C++ source) pair in parallel. One job per unit;
/// all jobs are awaited and reported, even if some fail.
pub fn compile_parallel(compiler: &CxxCompiler, units: &[(String, String)]) -> Vec<JobResult> {
    let mut running = Vec::with_capacity(units.len());
    for (name, source) in units {
        let source_path = temp_path(name, "cc");
        let object_path = temp_path(name, "o");
        if let Err(e) = std::fs::write(&source_path, source) {
            running.push(RunningJob {
                name: name.clone(),
                child: Err(e),
                source: source_path,
                object: object_path,
            });
            continue;
        }

        let mut cmd = Command::new(&compiler.cc);
        cmd.args(&compiler.cflags);
        for inc in &compiler.include_paths {
            cmd.arg("-I").arg(inc);
        }
        cmd.arg("-c").arg(&source_path);
        cmd.arg("-o").arg(&object_path);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        tracing::debug!(target: "jit", "spawning {:?}", cmd);
        running.push(RunningJob {
            name: name.clone(),
            child: cmd.spawn(),
            source: source_path,
            object: object_path,
        });
    }

    running.into_iter().map(finish_job).collect()
}

fn finish_job(job: RunningJob) -> JobResult {
    let result = match job.child {
        Err(e) => JobResult {
            name: job.name,
            success: false,
            stdout: String::new(),
            stderr: format!("failed to spawn compiler: {e}"),
            object: None,
        },
        Ok(child) => match child.wait_with_output() {
            Ok(out) => {
                let success = out.status.success();
                JobResult {
                    name: job.name,
                    success,
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    object: success.then(|| job.object.clone()),
                }
            }
            Err(e) => JobResult {
                name: job.name,
                success: false,
                stdout: String::new(),
                stderr: format!("failed to await compiler: {e}"),
                object: None,
            },
        },
    };
    let _ = std::fs::remove_file(&job.source);
    if !result.success {
        let _ = std::fs::remove_file(&job.object);
    }
    result
}

/// Link object files into a shared library at `output`.
pub fn link_shared(compiler: &CxxCompiler, objects: &[PathBuf], output: &Path) -> JobResult {
    let mut cmd = Command::new(&compiler.cc);
    cmd.arg("-shared");
    for obj in objects {
        cmd.arg(obj);
    }
    cmd.arg("-o").arg(output);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    tracing::debug!(target: "jit", "linking {:?}", cmd);

    let result = match cmd.output() {
        Ok(out) => JobResult {
            name: "link".into(),
            success: out.status.success(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            object: out.status.success().then(|| output.to_path_buf()),
        },
        Err(e) => JobResult {
            name: "link".into(),
            success: false,
            stdout: String::new(),
            stderr: format!("failed to spawn linker: {e}"),
            object: None,
        },
    };
    for obj in objects {
        let _ = std::fs::remove_file(obj);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A fake compiler script so tests never depend on a real toolchain.
    fn fake_compiler(behavior: &str) -> CxxCompiler {
        let path = temp_path("fakecc", "sh");
        std::fs::write(&path, format!("#!/bin/sh\n{behavior}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        CxxCompiler::new(path.display().to_string())
    }

    #[test]
    fn successful_jobs_report_objects() {
        // The fake compiler touches its -o argument.
        let cc = fake_compiler(
            r#"while [ "$1" != "-o" ]; do shift; done; shift; : > "$1"; exit 0"#,
        );
        let units = vec![
            ("a".to_string(), "// a".to_string()),
            ("b".to_string(), "// b".to_string()),
        ];
        let results = compile_parallel(&cc, &units);
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(r.success, "{:?}", r);
            assert!(r.object.is_some());
        }
        for r in results {
            let _ = std::fs::remove_file(r.object.unwrap());
        }
    }

    #[test]
    fn failing_job_captures_stderr() {
        let cc = fake_compiler(r#"echo "boom: bad code" >&2; exit 1"#);
        let results = compile_parallel(&cc, &[("x".to_string(), "// x".to_string())]);
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].stderr.contains("boom: bad code"));
        assert!(results[0].object.is_none());
    }

    #[test]
    fn missing_compiler_is_a_per_job_failure() {
        let cc = CxxCompiler::new("/no/such/compiler-binary");
        let results = compile_parallel(&cc, &[("x".to_string(), String::new())]);
        assert!(!results[0].success);
        assert!(results[0].stderr.contains("failed to spawn"));
    }
}
