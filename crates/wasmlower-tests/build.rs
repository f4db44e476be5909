//! Lowers every `data/*.wat` fixture into `$OUT_DIR/<name>.rs` and writes a
//! `mod.rs` declaring one module per fixture.

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use wasmlower::{compile, CompileOptions};

fn main() -> Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR is not set")?);
    let data_dir = Path::new("data");
    println!("cargo:rerun-if-changed={}", data_dir.display());

    let mut fixtures: Vec<PathBuf> = fs::read_dir(data_dir)
        .with_context(|| format!("failed to list {}", data_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "wat"))
        .collect();
    fixtures.sort();

    let mut modules = String::new();
    for path in fixtures {
        println!("cargo:rerun-if-changed={}", path.display());
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .with_context(|| format!("fixture without a name: {}", path.display()))?;
        let input = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let options = CompileOptions {
            module_name: name.clone(),
            ..CompileOptions::default()
        };
        let code = compile(&input, &options)
            .with_context(|| format!("failed to lower {}", path.display()))?;
        let target = out_dir.join(format!("{name}.rs"));
        fs::write(&target, code).with_context(|| format!("failed to write {}", target.display()))?;
        modules.push_str(&format!(
            "pub mod {name} {{\n    include!(concat!(env!(\"OUT_DIR\"), \"/{name}.rs\"));\n}}\n"
        ));
    }

    fs::write(out_dir.join("mod.rs"), modules).context("failed to write mod.rs")?;
    Ok(())
}
