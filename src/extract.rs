//! Symbol extraction: one file's text into a structural module record.
//!
//! Pure: same (path, root, text) always yields the same record. A file
//! that cannot be read or parsed still yields a record, with no imports
//! and no classes, so that it exists as an empty module downstream.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::parser::ast::{self, ClassDef, ImportFromStmt, ImportStmt, ParamKind, Stmt, Visitor};
use crate::parser::{ParseError, SourceParser};

/// Everything extracted from one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Dotted module name relative to the scan root.
    pub name: String,
    /// Raw import references, qualified for relative imports, deduplicated.
    pub imports: Vec<String>,
    pub classes: Vec<ClassRecord>,
}

impl ModuleRecord {
    pub fn empty(path: PathBuf, name: String) -> Self {
        Self {
            path,
            name,
            imports: Vec::new(),
            classes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    /// `module.Class`
    pub full_name: String,
    pub methods: Vec<MethodRecord>,
    pub attributes: Vec<AttributeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecord {
    pub name: String,
    /// `module.Class.method`
    pub full_name: String,
    /// Positional parameter names, `self` excluded.
    pub params: Vec<String>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub name: String,
    /// `module.Class.attr`
    pub full_name: String,
}

/// Why a file contributed an empty record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Syntax { line: usize, column: usize },
    Decode { message: String },
    Io { message: String },
    Timeout { after_ms: u64 },
    Parser { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Syntax { line, column } => {
                write!(f, "syntax error at line {}, column {}", line, column)
            }
            FailureReason::Decode { message } => write!(f, "decode error: {}", message),
            FailureReason::Io { message } => write!(f, "read error: {}", message),
            FailureReason::Timeout { after_ms } => write!(f, "read timed out after {}ms", after_ms),
            FailureReason::Parser { message } => write!(f, "parser unavailable: {}", message),
        }
    }
}

impl From<ParseError> for FailureReason {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Syntax { line, column } => FailureReason::Syntax { line, column },
            ParseError::Decode(message) => FailureReason::Decode { message },
            ParseError::Grammar(message) => FailureReason::Parser { message },
        }
    }
}

/// A per-file failure, as reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub reason: FailureReason,
}

/// Result of extracting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Parsed(ModuleRecord),
    Failed {
        record: ModuleRecord,
        failure: ParseFailure,
    },
}

impl FileOutcome {
    pub fn record(&self) -> &ModuleRecord {
        match self {
            FileOutcome::Parsed(record) | FileOutcome::Failed { record, .. } => record,
        }
    }

    pub fn failure(&self) -> Option<&ParseFailure> {
        match self {
            FileOutcome::Parsed(_) => None,
            FileOutcome::Failed { failure, .. } => Some(failure),
        }
    }

    pub fn into_parts(self) -> (ModuleRecord, Option<ParseFailure>) {
        match self {
            FileOutcome::Parsed(record) => (record, None),
            FileOutcome::Failed { record, failure } => (record, Some(failure)),
        }
    }
}

/// Dotted module name of `path` relative to `root`, suffix stripped.
///
/// `root/pkg/sub/mod.py` → `pkg.sub.mod`. Paths outside the root fall back
/// to their own components.
pub fn module_name(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let stripped = relative.with_extension("");
    stripped
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// An empty record for a file that could not be read or parsed.
pub fn failed(path: &Path, root: &Path, reason: FailureReason) -> FileOutcome {
    FileOutcome::Failed {
        record: ModuleRecord::empty(path.to_path_buf(), module_name(path, root)),
        failure: ParseFailure {
            path: path.to_path_buf(),
            reason,
        },
    }
}

/// Extract from raw file bytes (UTF-8, optional BOM).
pub fn extract_bytes(
    path: &Path,
    root: &Path,
    bytes: &[u8],
    parser: &mut dyn SourceParser,
) -> FileOutcome {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => extract_module(path, root, text, parser),
        Err(e) => failed(
            path,
            root,
            FailureReason::Decode {
                message: e.to_string(),
            },
        ),
    }
}

/// Extract the structural record of one module from its text.
pub fn extract_module(
    path: &Path,
    root: &Path,
    text: &str,
    parser: &mut dyn SourceParser,
) -> FileOutcome {
    let name = module_name(path, root);
    let tree = match parser.parse(text) {
        Ok(tree) => tree,
        Err(err) => return failed(path, root, err.into()),
    };

    let (imports, classes) = {
        let mut collector = Collector::new(&name);
        ast::walk_module(&mut collector, &tree);
        (collector.imports, collector.classes)
    };

    FileOutcome::Parsed(ModuleRecord {
        path: path.to_path_buf(),
        name,
        imports,
        classes,
    })
}

/// Qualify a `from … import …` statement against the importing module.
///
/// Level 0 yields the module itself. Level N strips the module's own last
/// component, walks up N-1 further packages and prefixes what remains.
/// Walking above the root keeps the leading-dot form, which never resolves.
pub fn qualify_from_import(module_name: &str, stmt: &ImportFromStmt) -> Vec<String> {
    if stmt.level == 0 {
        return stmt.module.iter().cloned().collect();
    }

    let parts: Vec<&str> = module_name.split('.').collect();
    let package = &parts[..parts.len().saturating_sub(1)];
    let up = stmt.level - 1;

    let targets: Vec<&str> = match &stmt.module {
        Some(module) => vec![module.as_str()],
        None => stmt.names.iter().map(String::as_str).collect(),
    };

    if up > package.len() {
        let dots = ".".repeat(stmt.level);
        return targets.iter().map(|t| format!("{}{}", dots, t)).collect();
    }

    let prefix = package[..package.len() - up].join(".");
    targets
        .iter()
        .map(|t| {
            if prefix.is_empty() {
                t.to_string()
            } else {
                format!("{}.{}", prefix, t)
            }
        })
        .collect()
}

struct Collector<'a> {
    module: &'a str,
    imports: Vec<String>,
    classes: Vec<ClassRecord>,
}

impl<'a> Collector<'a> {
    fn new(module: &'a str) -> Self {
        Self {
            module,
            imports: Vec::new(),
            classes: Vec::new(),
        }
    }

    fn push_import(&mut self, reference: String) {
        if !reference.is_empty() && !self.imports.contains(&reference) {
            self.imports.push(reference);
        }
    }

    fn class_record(&self, class: &ClassDef) -> ClassRecord {
        let full_name = format!("{}.{}", self.module, class.name);
        let mut methods: Vec<MethodRecord> = Vec::new();
        let mut attributes: Vec<AttributeRecord> = Vec::new();

        for stmt in &class.body {
            match stmt {
                Stmt::FunctionDef(function) => {
                    let method = MethodRecord {
                        name: function.name.clone(),
                        full_name: format!("{}.{}", full_name, function.name),
                        params: function
                            .params
                            .iter()
                            .filter(|p| {
                                matches!(p.kind, ParamKind::Positional | ParamKind::PositionalOnly)
                            })
                            .filter(|p| p.name != "self")
                            .map(|p| p.name.clone())
                            .collect(),
                        is_async: function.is_async,
                    };
                    // A redefinition replaces the earlier one, as at runtime.
                    match methods.iter_mut().find(|m| m.name == method.name) {
                        Some(existing) => *existing = method,
                        None => methods.push(method),
                    }
                }
                Stmt::Assign(assign) => {
                    if let Some(name) = assign.simple_target() {
                        if !attributes.iter().any(|a| a.name == name) {
                            attributes.push(AttributeRecord {
                                name: name.to_string(),
                                full_name: format!("{}.{}", full_name, name),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        ClassRecord {
            name: class.name.clone(),
            full_name,
            methods,
            attributes,
        }
    }
}

impl Visitor for Collector<'_> {
    fn visit_import(&mut self, import: &ImportStmt) {
        for name in &import.names {
            self.push_import(name.clone());
        }
    }

    fn visit_import_from(&mut self, import: &ImportFromStmt) {
        for reference in qualify_from_import(self.module, import) {
            self.push_import(reference);
        }
    }

    fn visit_class(&mut self, class: &ClassDef) {
        let record = self.class_record(class);
        self.classes.push(record);
        ast::walk_body(self, &class.body);
    }
}
