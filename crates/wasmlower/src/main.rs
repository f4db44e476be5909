use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use wasmlower::codegen::naming::sanitize;
use wasmlower::{compile_file, compile_file_cached, CompileOptions, FilesystemCache};

/// wasmlower: lower WebAssembly modules to Rust source ahead of time.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input module (.wasm binary or .wat text)
    input: PathBuf,

    /// Output Rust source file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Module name used for registration and caching (default: input file stem)
    #[arg(long)]
    name: Option<String>,

    /// Reuse and store generated source in this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

fn module_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| sanitize(&stem.to_string_lossy()))
        .unwrap_or_else(|| "module".to_string())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    eprintln!("wasmlower: compiling {}", cli.input.display());

    let options = CompileOptions {
        module_name: cli.name.clone().unwrap_or_else(|| module_name(&cli.input)),
        ..CompileOptions::default()
    };

    let rust_code = match &cli.cache_dir {
        Some(dir) => {
            let mut cache = FilesystemCache::new(dir);
            compile_file_cached(&cli.input, &options, &mut cache)
        }
        None => compile_file(&cli.input, &options),
    }
    .context("compilation failed")?;

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &rust_code)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        eprintln!("wasmlower: wrote {}", output_path.display());
    } else {
        print!("{}", rust_code);
    }

    eprintln!("wasmlower: compilation complete");
    Ok(())
}
