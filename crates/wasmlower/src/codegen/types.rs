//! Rust spellings of Wasm type lists and value tuples.

use crate::ir::ValType;

/// `()`, `i32`, or `(i32, i64)` for a result list.
pub fn rust_tuple_type(types: &[ValType]) -> String {
    match types {
        [] => "()".to_string(),
        [ty] => ty.rust_type().to_string(),
        _ => {
            let parts: Vec<&str> = types.iter().map(|t| t.rust_type()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// `WasmResult<..>` return type of a function with these results.
pub fn format_return_type(results: &[ValType]) -> String {
    format!("WasmResult<{}>", rust_tuple_type(results))
}

/// Tuple expression over already-rendered values.
pub fn rust_tuple(values: &[String]) -> String {
    match values {
        [] => "()".to_string(),
        [value] => value.clone(),
        _ => format!("({})", values.join(", ")),
    }
}

/// `&[ValType::I32, ValType::I64]`, the body of a `Signature` field.
pub fn runtime_type_slice(types: &[ValType]) -> String {
    let parts: Vec<&str> = types.iter().map(|t| t.runtime_variant()).collect();
    format!("&[{}]", parts.join(", "))
}
