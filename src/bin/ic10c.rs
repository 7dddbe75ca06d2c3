//! The compiler driver's CLI (`spec.md` §6): a `compile` subcommand that
//! discovers program classes under `--input` and writes one `.ic10` file per
//! class into `--out`, and a `catalogue` subcommand wrapping the offline
//! device-interface generator. `compile` additionally loads driver
//! [`Options`] from an `ic10c.toml` project file in `--input`, if one is
//! present; `--no-optimize` always overrides its `optimize` setting.

use std::path::PathBuf;
use std::process::ExitCode;
use std::{fs, io};

use clap::{Parser, Subcommand};
use ic10c::driver::{self, Options};
use ic10c::sbil::{ClassInfo, SourceProgram};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Source-to-source compiler from SBIL to IC10 assembly")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile every program class found under `--input` into `--out`.
    Compile {
        /// Directory containing one JSON-encoded class per `*.json` file.
        #[arg(short, long)]
        input: PathBuf,
        /// Directory `{ClassName}.ic10` files are written into.
        #[arg(short, long)]
        out: PathBuf,
        /// Skip the optimiser and emit the driver's raw assembly.
        #[arg(long)]
        no_optimize: bool,
    },
    /// Generate device-interface declarations from a `PrefabData.json` dump.
    Catalogue {
        /// Path to `PrefabData.json`.
        #[arg(long)]
        prefab_data: PathBuf,
        /// File the generated Rust source is written to.
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compile { input, out, no_optimize } => compile(&input, &out, no_optimize),
        Command::Catalogue { prefab_data, out } => catalogue(&prefab_data, &out),
    }
}

fn compile(input: &PathBuf, out: &PathBuf, no_optimize: bool) -> ExitCode {
    let classes = match load_classes(input) {
        Ok(classes) => classes,
        Err(err) => {
            eprintln!("failed to load {}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };

    let mut opts = match load_project_options(input) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if no_optimize {
        opts.optimize = false;
    }

    let program = SourceProgram { classes };

    match driver::compile_program(&program, &opts) {
        Ok(outputs) => {
            if let Err(err) = fs::create_dir_all(out) {
                eprintln!("failed to create {}: {err}", out.display());
                return ExitCode::FAILURE;
            }
            for (class_name, text) in &outputs {
                let path = out.join(format!("{class_name}.ic10"));
                if let Err(err) = fs::write(&path, text) {
                    eprintln!("failed to write {}: {err}", path.display());
                    return ExitCode::FAILURE;
                }
            }
            tracing::info!(classes = outputs.len(), "compiled");
            ExitCode::SUCCESS
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
            ExitCode::FAILURE
        }
    }
}

fn catalogue(prefab_data: &PathBuf, out: &PathBuf) -> ExitCode {
    let json = match fs::read_to_string(prefab_data) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("failed to read {}: {err}", prefab_data.display());
            return ExitCode::FAILURE;
        }
    };
    let entries = match ic10c::catalogue::parse_prefab_data(&json) {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let generated = ic10c::catalogue::generate(&entries);
    if let Err(err) = fs::write(out, generated) {
        eprintln!("failed to write {}: {err}", out.display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Load `ic10c.toml` from the input directory, if present, falling back to
/// [`Options::default()`] otherwise. `--no-optimize` is applied on top of
/// whatever this returns, so the flag always wins over the project file.
fn load_project_options(input: &PathBuf) -> Result<Options, String> {
    let path = input.join("ic10c.toml");
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Options::default()),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };
    toml::from_str(&text).map_err(|err| format!("failed to parse {}: {err}", path.display()))
}

/// Load every `*.json` file directly under `dir`, each holding one
/// JSON-encoded [`ClassInfo`], sorted by file name for deterministic
/// compile order.
fn load_classes(dir: &PathBuf) -> io::Result<Vec<ClassInfo>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut classes = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(&path)?;
        let class: ClassInfo = serde_json::from_str(&text).map_err(io::Error::other)?;
        classes.push(class);
    }
    Ok(classes)
}
