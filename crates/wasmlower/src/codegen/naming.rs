//! Rust identifiers for export names.
//!
//! Export names are arbitrary UTF-8. They are snake-cased with `heck`,
//! reduced to ASCII identifier characters, escaped when they collide with a
//! keyword, and de-duplicated against every other generated method.

use heck::ToSnakeCase;
use std::collections::HashSet;

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized",
    "use", "virtual", "where", "while", "yield",
];

/// Keywords that cannot be raw identifiers.
const NON_RAW: &[&str] = &["self", "super", "crate", "Self"];

/// Snake-cased name made of `[a-z0-9_]`, not starting with a digit. Never a
/// keyword once prefixed, so accessor names can be built from it directly.
pub fn sanitize(name: &str) -> String {
    let mut ident: String = name
        .to_snake_case()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.chars().all(|c| c == '_') {
        ident = "export".to_string();
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// `sanitize` plus keyword escaping: `type` becomes `r#type`, `self`
/// becomes `self_`.
pub fn method_ident(name: &str) -> String {
    let ident = sanitize(name);
    if NON_RAW.contains(&ident.as_str()) {
        format!("{ident}_")
    } else if KEYWORDS.contains(&ident.as_str()) {
        format!("r#{ident}")
    } else {
        ident
    }
}

/// Allocates unique method names within the generated `impl Module`.
#[derive(Debug)]
pub struct Namer {
    used: HashSet<String>,
}

impl Default for Namer {
    fn default() -> Self {
        Self::new()
    }
}

impl Namer {
    /// The constructor and the `Instance` lookups are always present.
    pub fn new() -> Self {
        let used = ["new", "func", "memory", "table", "global"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self { used }
    }

    /// Claim `candidate`, or the first free `candidate_N` (N >= 2).
    pub fn claim(&mut self, candidate: String) -> String {
        if !self.is_taken(&candidate) {
            self.used.insert(candidate.clone());
            return candidate;
        }
        let base = candidate.trim_start_matches("r#");
        let mut n = 2;
        loop {
            let name = format!("{base}_{n}");
            if !self.is_taken(&name) {
                self.used.insert(name.clone());
                return name;
            }
            n += 1;
        }
    }

    fn is_taken(&self, name: &str) -> bool {
        self.used.contains(name) || is_internal(name)
    }
}

/// `fn_N` and `ref_fn_N` name function bodies and their handles.
fn is_internal(name: &str) -> bool {
    let digits = name
        .strip_prefix("ref_fn_")
        .or_else(|| name.strip_prefix("fn_"));
    matches!(digits, Some(d) if !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
}
