use clap::Parser;
use std::path::PathBuf;

use spicyc::codegen::CodegenOptions;
use spicyc::jit::{self, CxxCompiler};
use spicyc::pipeline::{Driver, DriverOptions};
use spicyc::printer;

const EXIT_OK: i32 = 0;
const EXIT_COMPILE_ERROR: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 2;
const EXIT_SYSTEM_ERROR: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Compile to a loadable `.hlto` library.
    Hlto,
    /// Emit the generated C++ source.
    Cpp,
    /// Print the resolved AST.
    Ast,
    /// Dump the units' grammars with their FIRST/FOLLOW sets.
    Grammar,
    /// Emit build provenance JSON.
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "spicyc",
    version,
    about = "Spicy compiler collection: compiles .spicy/.hlt grammar specifications to C++ parser modules"
)]
struct Cli {
    /// Input source files (.spicy, .hlt)
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output file path (default: stdout for text stages, a.hlto for hlto)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Hlto)]
    emit: EmitStage,

    /// Module search directory for imports (repeatable)
    #[arg(short = 'L', long = "library-path")]
    library_path: Vec<PathBuf>,

    /// Enable debug streams, colon-separated (e.g. "resolver:jit")
    #[arg(short = 'D', long = "debug")]
    debug: Option<String>,

    /// Directory to dump generated C++ sources into (in addition to --emit)
    #[arg(long)]
    cxx_dump: Option<PathBuf>,

    /// C++ compiler command
    #[arg(long, default_value = "c++")]
    cc: String,

    /// Additional C++ compiler flags (overrides default optimization flags)
    #[arg(long)]
    cflags: Option<String>,

    /// Release build: optimized generated code
    #[arg(long)]
    release: bool,

    /// Print pipeline progress
    #[arg(long)]
    verbose: bool,
}

fn main() {
    // Options from the environment use the same grammar as the CLI.
    let mut args: Vec<String> = std::env::args().collect();
    if let Ok(extra) = std::env::var("SPICYC_FLAGS") {
        let insert_at = 1;
        for (i, flag) in extra.split_whitespace().enumerate() {
            args.insert(insert_at + i, flag.to_string());
        }
    }
    let cli = Cli::parse_from(args);

    if let Some(streams) = &cli.debug {
        init_debug_streams(streams);
    } else if let Ok(streams) = std::env::var("SPICY_DEBUG") {
        init_debug_streams(&streams);
    }

    let mut library_paths = cli.library_path.clone();
    if let Ok(spicy_path) = std::env::var("SPICY_PATH") {
        library_paths.extend(spicy_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
    }

    let options = DriverOptions {
        library_paths,
        iteration_cap: 32,
        codegen: CodegenOptions {
            release: cli.release,
            ..CodegenOptions::default()
        },
    };
    let mut driver = Driver::new(options);

    for source in &cli.sources {
        if cli.verbose {
            eprintln!("spicyc: loading {}", source.display());
        }
        driver.load_file(source);
    }

    let result = driver.compile();

    for d in &driver.diagnostics {
        eprintln!("{d}");
    }
    if result.is_err() || driver.has_errors() {
        if cli.verbose {
            if let Err(e) = &result {
                eprintln!("spicyc: pipeline stopped at {:?}", e.failing_stage);
            }
        }
        std::process::exit(EXIT_COMPILE_ERROR);
    }

    if let Some(dir) = &cli.cxx_dump {
        if let Err(e) = dump_cxx(&driver, dir) {
            eprintln!("error: {e}");
            std::process::exit(EXIT_SYSTEM_ERROR);
        }
    }

    match cli.emit {
        EmitStage::Ast => {
            let mut out = String::new();
            for unit in &driver.units {
                out.push_str(&printer::print_module(&driver.ctx, unit.root));
                out.push('\n');
            }
            emit_output(&cli.output, &out);
        }
        EmitStage::Grammar => {
            emit_output(&cli.output, &driver.dump_grammars());
        }
        EmitStage::Cpp => {
            let mut out = String::new();
            for (name, source) in driver.cpp_sources() {
                out.push_str(&format!("// ── unit: {name} ──\n"));
                out.push_str(&source);
                out.push('\n');
            }
            emit_output(&cli.output, &out);
        }
        EmitStage::BuildInfo => {
            let mut out = String::new();
            for unit in &driver.units {
                out.push_str(&unit.provenance.to_json());
            }
            emit_output(&cli.output, &out);
        }
        EmitStage::Hlto => {
            let output = cli
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from("a.hlto"));
            build_hlto(&cli, &driver, &output);
        }
    }

    std::process::exit(EXIT_OK);
}

fn init_debug_streams(streams: &str) {
    use tracing_subscriber::EnvFilter;
    let directives: Vec<String> = streams
        .split(':')
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s}=debug"))
        .collect();
    let filter = directives.join(",");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit_output(output: &Option<PathBuf>, content: &str) {
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, content) {
                eprintln!("error: {}: {e}", path.display());
                std::process::exit(EXIT_SYSTEM_ERROR);
            }
        }
        None => print!("{content}"),
    }
}

fn dump_cxx(driver: &Driver, dir: &PathBuf) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (name, source) in driver.cpp_sources() {
        std::fs::write(dir.join(format!("{name}.cc")), source)?;
    }
    Ok(())
}

/// Compile all emitted C++ units in parallel and link the shared library.
fn build_hlto(cli: &Cli, driver: &Driver, output: &PathBuf) {
    let mut compiler = CxxCompiler::for_build(cli.cc.clone(), cli.release);
    if let Some(flags) = &cli.cflags {
        compiler.cflags = flags.split_whitespace().map(str::to_string).collect();
    }

    let sources = driver.cpp_sources();
    if cli.verbose {
        eprintln!("spicyc: compiling {} C++ units", sources.len());
    }
    let results = jit::compile_parallel(&compiler, &sources);

    let mut objects = Vec::new();
    let mut failed = false;
    for r in &results {
        if r.success {
            if let Some(obj) = &r.object {
                objects.push(obj.clone());
            }
        } else {
            failed = true;
            eprintln!("error: C++ compilation of unit '{}' failed:", r.name);
            eprint!("{}", r.stderr);
        }
    }
    if failed {
        for obj in &objects {
            let _ = std::fs::remove_file(obj);
        }
        std::process::exit(EXIT_COMPILE_ERROR);
    }

    let link = jit::link_shared(&compiler, &objects, output);
    if !link.success {
        eprintln!("error: linking failed:");
        eprint!("{}", link.stderr);
        std::process::exit(EXIT_COMPILE_ERROR);
    }
    if cli.verbose {
        eprintln!("spicyc: wrote {}", output.display());
    }
}
