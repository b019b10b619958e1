//! Static pre-execution gate over a code string.
//!
//! This is a best-effort denylist, not a trust boundary: it is syntactic only
//! and can be evaded through aliasing or reflection. The interpreter process
//! behind it installs a guarded `__import__` for the same module list.

use std::sync::OnceLock;

use regex::Regex;

pub const FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "http",
    "urllib",
    "requests",
    "pathlib",
    "shutil",
    "glob",
    "tempfile",
    "pickle",
    "shelve",
    "multiprocessing",
    "threading",
    "asyncio",
    "concurrent",
];

pub const FORBIDDEN_CALLS: &[&str] = &[
    "open",
    "file",
    "input",
    "raw_input",
    "exec",
    "eval",
    "compile",
    "reload",
    "__import__",
];

/// Textual markers of direct filesystem or OS access.
const FORBIDDEN_MARKERS: &[(&str, &str)] = &[
    ("pathlib", r"\bpathlib\b"),
    ("os.", r"\bos\."),
    ("sys.", r"\bsys\."),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("import of forbidden module `{0}`")]
    ForbiddenModule(String),

    #[error("call to forbidden builtin `{0}`")]
    ForbiddenCall(String),

    #[error("forbidden pattern `{0}`")]
    ForbiddenPattern(String),
}

struct Patterns {
    import: Regex,
    from: Regex,
    calls: Regex,
    markers: Vec<(&'static str, Regex)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let calls = FORBIDDEN_CALLS
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        Patterns {
            // `import a.b as c, d` up to end of statement
            import: Regex::new(r"(?m)\bimport\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)")
                .expect("static regex"),
            from: Regex::new(r"(?m)\bfrom\s+([\w.]+)\s+import\b").expect("static regex"),
            calls: Regex::new(&format!(r"(?:^|[^\w])({calls})\s*\(")).expect("static regex"),
            markers: FORBIDDEN_MARKERS
                .iter()
                .map(|(name, re)| (*name, Regex::new(re).expect("static regex")))
                .collect(),
        }
    })
}

fn forbidden_root(module: &str) -> Option<String> {
    let root = module.split('.').next().unwrap_or(module).trim();
    FORBIDDEN_MODULES.contains(&root).then(|| root.to_string())
}

/// First violation found, checked in order: imports, from-imports, builtin
/// calls, textual markers.
pub fn check(code: &str) -> Result<(), Violation> {
    let p = patterns();

    for caps in p.import.captures_iter(code) {
        for part in caps[1].split(',') {
            let module = part.split_whitespace().next().unwrap_or_default();
            if let Some(root) = forbidden_root(module) {
                return Err(Violation::ForbiddenModule(root));
            }
        }
    }

    for caps in p.from.captures_iter(code) {
        if let Some(root) = forbidden_root(&caps[1]) {
            return Err(Violation::ForbiddenModule(root));
        }
    }

    if let Some(caps) = p.calls.captures(code) {
        return Err(Violation::ForbiddenCall(caps[1].to_string()));
    }

    for (name, re) in &p.markers {
        if re.is_match(code) {
            return Err(Violation::ForbiddenPattern((*name).to_string()));
        }
    }

    Ok(())
}

pub fn is_safe(code: &str) -> bool {
    check(code).is_ok()
}
