//! The sandbox's closed capability set, expressed as data.
//!
//! Scripts may only `import` modules listed in [`ALLOWED_MODULES`] and call
//! functions listed there or in [`BUILTINS`]. Names in [`DENIED_NAMES`]
//! (and any `__dunder__` name) are rejected wherever they appear.

use std::fmt;

/// Accepted argument counts for a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
            Arity::AtLeast(lo) => n >= lo,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Arity::Exact(1) => write!(f, "1 argument"),
            Arity::Exact(k) => write!(f, "{k} arguments"),
            Arity::Range(lo, hi) => write!(f, "{lo} to {hi} arguments"),
            Arity::AtLeast(lo) => write!(f, "at least {lo} argument(s)"),
        }
    }
}

/// An importable module.
#[derive(Debug)]
pub struct ModuleSpec {
    pub name: &'static str,
    pub functions: &'static [(&'static str, Arity)],
    pub constants: &'static [(&'static str, f64)],
}

impl ModuleSpec {
    pub fn function(&self, name: &str) -> Option<Arity> {
        self.functions
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, arity)| *arity)
    }

    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

pub const ALLOWED_MODULES: &[ModuleSpec] = &[
    ModuleSpec {
        name: "math",
        functions: &[
            ("floor", Arity::Exact(1)),
            ("ceil", Arity::Exact(1)),
            ("sqrt", Arity::Exact(1)),
            ("pow", Arity::Exact(2)),
            ("exp", Arity::Exact(1)),
            ("log", Arity::Range(1, 2)),
            ("log10", Arity::Exact(1)),
            ("abs", Arity::Exact(1)),
            ("min", Arity::AtLeast(1)),
            ("max", Arity::AtLeast(1)),
            ("round", Arity::Range(1, 2)),
            ("clamp", Arity::Exact(3)),
        ],
        constants: &[
            ("pi", std::f64::consts::PI),
            ("e", std::f64::consts::E),
            ("inf", f64::INFINITY),
        ],
    },
    ModuleSpec {
        name: "random",
        functions: &[
            ("random", Arity::Exact(0)),
            ("uniform", Arity::Exact(2)),
            ("randint", Arity::Exact(2)),
            ("choice", Arity::Exact(1)),
            ("chance", Arity::Exact(1)),
        ],
        constants: &[],
    },
    ModuleSpec {
        name: "time",
        functions: &[
            ("now", Arity::Exact(0)),
            ("monotonic", Arity::Exact(0)),
            ("sleep", Arity::Exact(1)),
        ],
        constants: &[],
    },
    ModuleSpec {
        name: "collections",
        functions: &[
            ("sum", Arity::Exact(1)),
            ("mean", Arity::Exact(1)),
            ("sorted", Arity::Exact(1)),
            ("reversed", Arity::Exact(1)),
            ("first", Arity::Exact(1)),
            ("last", Arity::Exact(1)),
            ("count", Arity::Exact(2)),
        ],
        constants: &[],
    },
];

/// Functions available without an import.
pub const BUILTINS: &[(&str, Arity)] = &[
    ("len", Arity::Exact(1)),
    ("range", Arity::Range(1, 3)),
    ("str", Arity::Exact(1)),
    ("num", Arity::Exact(1)),
    ("int", Arity::Exact(1)),
    ("abs", Arity::Exact(1)),
    ("min", Arity::AtLeast(1)),
    ("max", Arity::AtLeast(1)),
    ("round", Arity::Range(1, 2)),
    ("append", Arity::Exact(2)),
    ("slice", Arity::Range(2, 3)),
    ("keys", Arity::Exact(1)),
    ("has", Arity::Exact(2)),
    ("type_of", Arity::Exact(1)),
];

/// Why a name is denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedCategory {
    FileAccess,
    ProcessControl,
    Network,
    DynamicEvaluation,
    RuntimeReflection,
}

impl fmt::Display for DeniedCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeniedCategory::FileAccess => "file access",
            DeniedCategory::ProcessControl => "process control",
            DeniedCategory::Network => "network access",
            DeniedCategory::DynamicEvaluation => "dynamic evaluation",
            DeniedCategory::RuntimeReflection => "runtime reflection",
        };
        write!(f, "{s}")
    }
}

pub const DENIED_NAMES: &[(&str, DeniedCategory)] = &[
    ("open", DeniedCategory::FileAccess),
    ("file", DeniedCategory::FileAccess),
    ("io", DeniedCategory::FileAccess),
    ("fs", DeniedCategory::FileAccess),
    ("path", DeniedCategory::FileAccess),
    ("pathlib", DeniedCategory::FileAccess),
    ("shutil", DeniedCategory::FileAccess),
    ("os", DeniedCategory::ProcessControl),
    ("sys", DeniedCategory::ProcessControl),
    ("subprocess", DeniedCategory::ProcessControl),
    ("process", DeniedCategory::ProcessControl),
    ("signal", DeniedCategory::ProcessControl),
    ("threading", DeniedCategory::ProcessControl),
    ("multiprocessing", DeniedCategory::ProcessControl),
    ("ctypes", DeniedCategory::ProcessControl),
    ("exit", DeniedCategory::ProcessControl),
    ("quit", DeniedCategory::ProcessControl),
    ("socket", DeniedCategory::Network),
    ("net", DeniedCategory::Network),
    ("http", DeniedCategory::Network),
    ("urllib", DeniedCategory::Network),
    ("requests", DeniedCategory::Network),
    ("fetch", DeniedCategory::Network),
    ("ssl", DeniedCategory::Network),
    ("eval", DeniedCategory::DynamicEvaluation),
    ("exec", DeniedCategory::DynamicEvaluation),
    ("compile", DeniedCategory::DynamicEvaluation),
    ("importlib", DeniedCategory::DynamicEvaluation),
    ("require", DeniedCategory::DynamicEvaluation),
    ("load", DeniedCategory::DynamicEvaluation),
    ("pickle", DeniedCategory::DynamicEvaluation),
    ("marshal", DeniedCategory::DynamicEvaluation),
    ("globals", DeniedCategory::RuntimeReflection),
    ("locals", DeniedCategory::RuntimeReflection),
    ("vars", DeniedCategory::RuntimeReflection),
    ("getattr", DeniedCategory::RuntimeReflection),
    ("setattr", DeniedCategory::RuntimeReflection),
    ("delattr", DeniedCategory::RuntimeReflection),
    ("dir", DeniedCategory::RuntimeReflection),
    ("type", DeniedCategory::RuntimeReflection),
    ("builtins", DeniedCategory::RuntimeReflection),
    ("inspect", DeniedCategory::RuntimeReflection),
    ("gc", DeniedCategory::RuntimeReflection),
];

pub fn module(name: &str) -> Option<&'static ModuleSpec> {
    ALLOWED_MODULES.iter().find(|m| m.name == name)
}

pub fn builtin(name: &str) -> Option<Arity> {
    BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, arity)| *arity)
}

/// The denial category for `name`, if it is denied.
pub fn denied(name: &str) -> Option<DeniedCategory> {
    if name.starts_with("__") {
        return Some(DeniedCategory::RuntimeReflection);
    }
    DENIED_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, category)| *category)
}

/// Comma-separated allow-list, for diagnostics.
pub fn allowed_module_names() -> String {
    ALLOWED_MODULES
        .iter()
        .map(|m| m.name)
        .collect::<Vec<_>>()
        .join(", ")
}
