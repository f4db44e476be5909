// Include generated modules from build.rs (in OUT_DIR)
include!(concat!(env!("OUT_DIR"), "/mod.rs"));

use std::cell::RefCell;
use std::rc::Rc;
use wasmlower_runtime::{Environment, FuncRef, HostModule, Signature, ValType, Value};

static LOG_SIGNATURE: Signature = Signature {
    params: &[ValType::I32],
    results: &[],
};

/// Registers a `host` module whose `log` function records its argument.
pub fn host_with_log(env: &mut Environment) -> Rc<RefCell<Vec<i32>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let log = FuncRef::new(&LOG_SIGNATURE, move |args: &[Value]| {
        sink.borrow_mut().push(args[0].as_i32()?);
        Ok(vec![])
    });
    env.register_host("host", HostModule::new().with_func("log", log));
    seen
}

pub fn fibo_orig(n: i32) -> i32 {
    if n <= 1 {
        n
    } else {
        let mut a: i32 = 0;
        let mut b: i32 = 1;
        for _ in 2..=n {
            let tmp = a.wrapping_add(b);
            a = b;
            b = tmp;
        }
        b
    }
}
