//! Runtime tests for linear memory access, growth and bulk operations.

use std::rc::Rc;
use wasmlower_runtime::{Environment, WasmTrap, PAGE_SIZE};
use wasmlower_tests::memory;

fn instance() -> Rc<memory::Module> {
    let mut env = Environment::new();
    memory::Module::new(&mut env, "memory").unwrap()
}

#[test]
fn test_active_data_is_written() {
    let m = instance();
    let mem = m.memory_memory();
    assert_eq!(mem.borrow().read(16, 5).unwrap(), b"hello");
}

#[test]
fn test_store_then_load() {
    let m = instance();
    assert_eq!(m.store_load(64, 42).unwrap(), 42);
    assert_eq!(m.store_load(0, -1).unwrap(), -1);
}

#[test]
fn test_sub_width_loads_extend() {
    let m = instance();
    m.store_load(100, 0xff).unwrap();
    assert_eq!(m.load8_s(100).unwrap(), -1);
    assert_eq!(m.load8_u(100).unwrap(), 255);

    m.store16(200, 0x1_8000).unwrap();
    assert_eq!(m.load16_s(200).unwrap(), -32768);
}

#[test]
fn test_float_store_with_offset() {
    let m = instance();
    m.store_f64(32, 2.5).unwrap();
    assert_eq!(m.load_f64(32).unwrap(), 2.5);
    let mem = m.memory_memory();
    assert_eq!(mem.borrow().read(40, 8).unwrap(), &2.5f64.to_le_bytes());
}

#[test]
fn test_out_of_bounds_traps() {
    let m = instance();
    assert_eq!(m.load8_u(PAGE_SIZE as i32), Err(WasmTrap::OutOfBounds));
    assert_eq!(m.store_load(PAGE_SIZE as i32 - 2, 1), Err(WasmTrap::OutOfBounds));
    assert_eq!(m.load8_u(-1), Err(WasmTrap::OutOfBounds));
}

#[test]
fn test_grow_respects_maximum() {
    let m = instance();
    assert_eq!(m.size().unwrap(), 1);
    assert_eq!(m.grow(1).unwrap(), 1);
    assert_eq!(m.size().unwrap(), 2);
    assert_eq!(m.grow(5).unwrap(), -1);
    assert_eq!(m.size().unwrap(), 2);
    assert_eq!(m.grow(0).unwrap(), 2);
}

#[test]
fn test_grown_memory_is_usable() {
    let m = instance();
    m.grow(1).unwrap();
    assert_eq!(m.store_load(PAGE_SIZE as i32, 7).unwrap(), 7);
}

#[test]
fn test_fill_and_copy() {
    let m = instance();
    m.fill(300, 0xab, 4).unwrap();
    m.copy(302, 16, 5).unwrap();
    let mem = m.memory_memory();
    assert_eq!(mem.borrow().read(300, 7).unwrap(), b"\xab\xabhello");
}

#[test]
fn test_overlapping_copy() {
    let m = instance();
    m.copy(18, 16, 5).unwrap();
    let mem = m.memory_memory();
    assert_eq!(mem.borrow().read(16, 7).unwrap(), b"hehello");
}

#[test]
fn test_passive_segment_until_dropped() {
    let m = instance();
    m.init_tail(400).unwrap();
    {
        let mem = m.memory_memory();
        assert_eq!(mem.borrow().read(400, 5).unwrap(), b"wasm!");
    }
    m.drop_tail().unwrap();
    assert_eq!(m.init_tail(400), Err(WasmTrap::OutOfBounds));
}

#[test]
fn test_memories_are_per_instance() {
    let a = instance();
    let b = instance();
    a.store_load(8, 1).unwrap();
    assert_eq!(b.load8_u(8).unwrap(), 0);
}
