//! A focused, single-purpose binary for the offline device-interface
//! catalogue generator (`spec.md` §6) — peripheral to the compiler core, so
//! it's kept separate from `ic10c`'s `compile` subcommand rather than adding
//! another flag to the main driver entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::fs;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about = "Derive device interface declarations from PrefabData.json")]
struct Cli {
    /// Path to `PrefabData.json`.
    #[arg(long)]
    prefab_data: PathBuf,
    /// File the generated Rust source is written to.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let json = match fs::read_to_string(&cli.prefab_data) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("failed to read {}: {err}", cli.prefab_data.display());
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
    match fs::write(&cli.out, generated) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("failed to write {}: {err}", cli.out.display());
            ExitCode::FAILURE
        }
    }
}
