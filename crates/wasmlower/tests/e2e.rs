//! End-to-end integration tests for wasmlower.
//!
//! These tests verify the complete pipeline: Wasm → IR → Rust source.

use anyhow::{Context, Result};
use wasmlower::{compile, CompileOptions, Error};

/// Helper to lower WAT source to Rust code.
fn lower_wat(wat_source: &str) -> Result<String> {
    let wasm_bytes = wat::parse_str(wat_source).context("failed to parse WAT")?;
    let options = CompileOptions::default();
    compile(&wasm_bytes, &options).context("failed to lower module")
}

#[test]
fn test_simple_add() -> Result<()> {
    let wat = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add
            )
        )
    "#;

    let rust_code = lower_wat(wat)?;

    println!("Generated Rust code:\n{}", rust_code);

    assert!(rust_code.contains("fn fn_0(&self, mut l0: i32, mut l1: i32) -> WasmResult<i32>"));
    assert!(rust_code.contains("wrapping_add"));
    assert!(rust_code.contains("return Ok("));
    assert!(rust_code.contains("pub fn add(&self, l0: i32, l1: i32) -> WasmResult<i32>"));

    Ok(())
}

#[test]
fn test_text_and_binary_input_agree() -> Result<()> {
    let wat = r#"(module (func (export "f") (result i64) i64.const -1))"#;
    let from_text = compile(wat.as_bytes(), &CompileOptions::default())?;
    let from_binary = lower_wat(wat)?;
    assert_eq!(from_text, from_binary);
    Ok(())
}

#[test]
fn test_loop_and_branches() -> Result<()> {
    let wat = r#"
        (module
            (func (export "count") (param i32) (result i32)
                (local i32)
                block $exit
                    loop $again
                        local.get 0
                        i32.eqz
                        br_if $exit
                        local.get 1
                        i32.const 1
                        i32.add
                        local.set 1
                        local.get 0
                        i32.const 1
                        i32.sub
                        local.set 0
                        br $again
                    end
                end
                local.get 1
            )
        )
    "#;

    let rust_code = lower_wat(wat)?;

    assert!(rust_code.contains("'l0: {"));
    assert!(rust_code.contains("'l1: loop {"));
    assert!(rust_code.contains("break 'l0;"));
    assert!(rust_code.contains("continue 'l1;"));

    Ok(())
}

#[test]
fn test_memory_module() -> Result<()> {
    let wat = r#"
        (module
            (memory (export "mem") 1 2)
            (data (i32.const 8) "\01\02")
            (func (export "load") (param i32) (result i32)
                local.get 0
                i32.load
            )
        )
    "#;

    let rust_code = lower_wat(wat)?;

    assert!(rust_code.contains("static DATA_0: &[u8] = b\"\\x01\\x02\";"));
    assert!(rust_code.contains("Memory::new(1, Some(2))"));
    assert!(rust_code.contains("load_int(ops::effective_address(l0, 0)?, 32, false)? as i32"));
    assert!(rust_code.contains("pub fn memory_mem(&self) -> Rc<RefCell<Memory>>"));

    Ok(())
}

#[test]
fn test_imports_and_exports_are_wired() -> Result<()> {
    let wat = r#"
        (module
            (import "env" "print" (func $print (param i32)))
            (func (export "run")
                i32.const 42
                call $print
            )
        )
    "#;

    let rust_code = lower_wat(wat)?;

    assert!(rust_code.contains("let ref_0 = env.import(\"env\")?;"));
    assert!(rust_code.contains("self.fn_0.call(&[Value::I32(42i32)])?;"));
    assert!(rust_code.contains("env.export(module.clone(), name);"));
    assert!(rust_code.contains("\"run\" => Some(self.ref_fn_1()),"));

    Ok(())
}

#[test]
fn test_errors_are_typed() {
    let bad_version = compile(b"\0asm\x02\0\0\0", &CompileOptions::default()).unwrap_err();
    assert!(matches!(bad_version, Error::Parsing { offset: 4, .. }), "{bad_version}");

    let underflow = compile(
        br#"(module (func (result i32) i32.add))"#,
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(underflow, Error::StackUnderflow { .. }), "{underflow}");
}
