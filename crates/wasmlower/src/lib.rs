//! wasmlower: ahead-of-time lowering of WebAssembly modules into Rust.
//!
//! The pipeline decodes a module (binary, or text via `wat`), lowers every
//! function body with a compile-time operand stack, and emits one Rust
//! source file declaring `pub struct Module`. The generated file links
//! against `wasmlower-runtime` for memories, tables, globals and the
//! import/export registry.

pub mod backend;
pub mod cache;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod ir;
pub mod parser;

use anyhow::Context;
use backend::SafeBackend;
use log::info;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub use cache::{Cache, FilesystemCache, MemoryCache};
pub use codegen::CodeGenerator;
pub use error::{Error, LexError, Result};

/// Configuration options for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Name the module is published under; also the cache key.
    pub module_name: String,
    /// Path of the runtime crate as seen from the generated code.
    pub runtime_crate: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: "module".to_string(),
            runtime_crate: "wasmlower_runtime".to_string(),
        }
    }
}

/// Compile a WebAssembly module to Rust source code.
///
/// `input` may be a binary module or WebAssembly text.
///
/// # Example
/// ```no_run
/// use wasmlower::{compile, CompileOptions};
///
/// let wasm = std::fs::read("input.wasm").unwrap();
/// let rust_code = compile(&wasm, &CompileOptions::default()).unwrap();
/// std::fs::write("output.rs", rust_code).unwrap();
/// ```
pub fn compile(input: &[u8], options: &CompileOptions) -> Result<String> {
    let module = parser::decode(input)?;
    info!(
        "decoded `{}`: {} type(s), {} import(s), {} function(s)",
        options.module_name,
        module.types.len(),
        module.imports.len(),
        module.functions.len()
    );
    let backend = SafeBackend::new();
    CodeGenerator::new(&backend).generate(&module, options)
}

/// Read and compile a `.wasm` or `.wat` file.
pub fn compile_file(path: &Path, options: &CompileOptions) -> anyhow::Result<String> {
    let input = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    compile(&input, options).with_context(|| format!("failed to compile {}", path.display()))
}

/// Like [`compile_file`], but reuses the artifact stored under
/// `options.module_name` unless `path` was modified after it was written.
pub fn compile_file_cached(
    path: &Path,
    options: &CompileOptions,
    cache: &mut dyn Cache,
) -> anyhow::Result<String> {
    let key = &options.module_name;
    let modified: Option<SystemTime> = fs::metadata(path).and_then(|m| m.modified()).ok();
    let fresh = match (modified, cache.timestamp(key)) {
        (Some(source), Some(cached)) => source <= cached,
        _ => false,
    };
    if fresh {
        if let Some(source) = cache.load(key)? {
            info!("cache hit for `{key}`");
            return Ok(source);
        }
    }

    let source = compile_file(path, options)?;
    cache
        .write(key, &source)
        .with_context(|| format!("failed to cache module `{key}`"))?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = CompileOptions::default();
        assert_eq!(options.runtime_crate, "wasmlower_runtime");
        assert_eq!(options.module_name, "module");
    }

    #[test]
    fn runtime_path_is_configurable() {
        let options = CompileOptions {
            module_name: "m".to_string(),
            runtime_crate: "crate::rt".to_string(),
        };
        let code = compile(b"(module)", &options).unwrap();
        assert!(code.contains("use crate::rt::*;"));
    }

    #[test]
    fn text_errors_are_typed() {
        let err = compile(b"(module (func (result i32) i32.bogus))", &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Text(_)));
    }

    #[test]
    fn cached_compilation_is_reused_until_the_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adder.wat");
        fs::write(&path, "(module (func (export \"one\") (result i32) i32.const 1))").unwrap();
        let options = CompileOptions {
            module_name: "adder".to_string(),
            ..CompileOptions::default()
        };

        let mut cache = MemoryCache::new();
        let first = compile_file_cached(&path, &options, &mut cache).unwrap();
        assert!(first.contains("pub fn one(&self) -> WasmResult<i32>"));

        // A stale entry written after the source is served as is.
        cache.write("adder", "// cached").unwrap();
        let second = compile_file_cached(&path, &options, &mut cache).unwrap();
        assert_eq!(second, "// cached");
    }

    #[test]
    fn missing_input_has_context() {
        let err = compile_file(Path::new("/nonexistent/input.wasm"), &CompileOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("failed to read /nonexistent/input.wasm"));
    }
}
