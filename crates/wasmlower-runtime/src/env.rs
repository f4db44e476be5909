//! Cross-module registry.
//!
//! Every generated module publishes itself with [`Environment::export`] at the
//! end of its constructor and resolves its imports with
//! [`Environment::import`]. Native code takes part through [`HostModule`].

use crate::{FuncRef, Global, Memory, Signature, Table, WasmTrap};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// An instantiated module, seen from the outside: its exports by name.
pub trait Instance {
    fn func(&self, name: &str) -> Option<FuncRef>;
    fn memory(&self, name: &str) -> Option<Rc<RefCell<Memory>>>;
    fn table(&self, name: &str) -> Option<Rc<RefCell<Table>>>;
    fn global(&self, name: &str) -> Option<Rc<RefCell<Global>>>;
}

/// Errors raised while instantiating a generated module.
#[derive(Debug, Clone, PartialEq)]
pub enum InstantiationError {
    /// `import` of a module name nobody has exported.
    UnknownModule(String),
    /// The imported module exists but lacks the named item.
    MissingExport {
        module: String,
        name: String,
        kind: &'static str,
    },
    /// An imported function has a different signature than declared.
    SignatureMismatch { module: String, name: String },
    /// A trap during initialisation (segment out of bounds, start function).
    Trap(WasmTrap),
    /// The initial size of a memory or table could not be allocated.
    ResourceExhausted { kind: &'static str, minimum: u32 },
}

impl fmt::Display for InstantiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiationError::UnknownModule(name) => write!(f, "unknown module `{name}`"),
            InstantiationError::MissingExport { module, name, kind } => {
                write!(f, "module `{module}` has no {kind} export `{name}`")
            }
            InstantiationError::SignatureMismatch { module, name } => {
                write!(f, "imported function `{module}.{name}` has an incompatible signature")
            }
            InstantiationError::Trap(trap) => write!(f, "trap during instantiation: {trap}"),
            InstantiationError::ResourceExhausted { kind, minimum } => {
                write!(f, "cannot allocate {minimum} initial {kind}")
            }
        }
    }
}

impl std::error::Error for InstantiationError {}

impl From<WasmTrap> for InstantiationError {
    fn from(trap: WasmTrap) -> Self {
        InstantiationError::Trap(trap)
    }
}

/// Registry mapping module names to instances.
#[derive(Default)]
pub struct Environment {
    modules: HashMap<String, Rc<dyn Instance>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a previously exported module.
    pub fn import(&self, name: &str) -> Result<Rc<dyn Instance>, InstantiationError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| InstantiationError::UnknownModule(name.to_string()))
    }

    /// Publish `handle` under `name`, replacing any earlier module of that name.
    pub fn export(&mut self, handle: Rc<dyn Instance>, name: &str) {
        self.modules.insert(name.to_string(), handle);
    }

    /// Publish a natively implemented module.
    pub fn register_host(&mut self, name: &str, module: HostModule) {
        self.export(Rc::new(module), name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

/// A module implemented in Rust, for satisfying imports.
#[derive(Default)]
pub struct HostModule {
    funcs: HashMap<String, FuncRef>,
    memories: HashMap<String, Rc<RefCell<Memory>>>,
    tables: HashMap<String, Rc<RefCell<Table>>>,
    globals: HashMap<String, Rc<RefCell<Global>>>,
}

impl HostModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_func(mut self, name: &str, func: FuncRef) -> Self {
        self.funcs.insert(name.to_string(), func);
        self
    }

    pub fn with_memory(mut self, name: &str, memory: Rc<RefCell<Memory>>) -> Self {
        self.memories.insert(name.to_string(), memory);
        self
    }

    pub fn with_table(mut self, name: &str, table: Rc<RefCell<Table>>) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    pub fn with_global(mut self, name: &str, global: Rc<RefCell<Global>>) -> Self {
        self.globals.insert(name.to_string(), global);
        self
    }
}

impl Instance for HostModule {
    fn func(&self, name: &str) -> Option<FuncRef> {
        self.funcs.get(name).cloned()
    }

    fn memory(&self, name: &str) -> Option<Rc<RefCell<Memory>>> {
        self.memories.get(name).cloned()
    }

    fn table(&self, name: &str) -> Option<Rc<RefCell<Table>>> {
        self.tables.get(name).cloned()
    }

    fn global(&self, name: &str) -> Option<Rc<RefCell<Global>>> {
        self.globals.get(name).cloned()
    }
}

fn missing(module: &str, name: &str, kind: &'static str) -> InstantiationError {
    InstantiationError::MissingExport {
        module: module.to_string(),
        name: name.to_string(),
        kind,
    }
}

/// Fetch an imported function and assert its signature.
pub fn resolve_func(
    instance: &dyn Instance,
    module: &str,
    name: &str,
    expected: &Signature,
) -> Result<FuncRef, InstantiationError> {
    let func = instance
        .func(name)
        .ok_or_else(|| missing(module, name, "func"))?;
    func.expect_type(expected)
        .map_err(|_| InstantiationError::SignatureMismatch {
            module: module.to_string(),
            name: name.to_string(),
        })?;
    Ok(func)
}

pub fn resolve_memory(
    instance: &dyn Instance,
    module: &str,
    name: &str,
) -> Result<Rc<RefCell<Memory>>, InstantiationError> {
    instance
        .memory(name)
        .ok_or_else(|| missing(module, name, "memory"))
}

pub fn resolve_table(
    instance: &dyn Instance,
    module: &str,
    name: &str,
) -> Result<Rc<RefCell<Table>>, InstantiationError> {
    instance
        .table(name)
        .ok_or_else(|| missing(module, name, "table"))
}

pub fn resolve_global(
    instance: &dyn Instance,
    module: &str,
    name: &str,
) -> Result<Rc<RefCell<Global>>, InstantiationError> {
    instance
        .global(name)
        .ok_or_else(|| missing(module, name, "global"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ValType, Value};

    static LOG: Signature = Signature {
        params: &[ValType::I32],
        results: &[],
    };
    static OTHER: Signature = Signature {
        params: &[ValType::I64],
        results: &[],
    };

    fn host() -> HostModule {
        HostModule::new()
            .with_func("log", FuncRef::new(&LOG, |_| Ok(vec![])))
            .with_memory("memory", Rc::new(RefCell::new(Memory::new(1, None).unwrap())))
    }

    #[test]
    fn import_unknown_module_fails() {
        let env = Environment::new();
        assert_eq!(
            env.import("env").err(),
            Some(InstantiationError::UnknownModule("env".to_string()))
        );
    }

    #[test]
    fn export_then_import() {
        let mut env = Environment::new();
        env.register_host("env", host());
        assert!(env.contains("env"));
        let inst = env.import("env").unwrap();
        let f = resolve_func(&*inst, "env", "log", &LOG).unwrap();
        assert_eq!(f.call(&[Value::I32(1)]), Ok(vec![]));
        assert_eq!(resolve_memory(&*inst, "env", "memory").unwrap().borrow().size(), 1);
    }

    #[test]
    fn resolve_reports_missing_and_mismatched() {
        let inst = host();
        assert_eq!(
            resolve_func(&inst, "env", "log", &OTHER).err(),
            Some(InstantiationError::SignatureMismatch {
                module: "env".to_string(),
                name: "log".to_string(),
            })
        );
        assert!(matches!(
            resolve_table(&inst, "env", "table"),
            Err(InstantiationError::MissingExport { kind: "table", .. })
        ));
        assert!(resolve_global(&inst, "env", "g").is_err());
    }

    #[test]
    fn error_display() {
        let err = InstantiationError::UnknownModule("wasi".to_string());
        assert_eq!(err.to_string(), "unknown module `wasi`");
    }
}
