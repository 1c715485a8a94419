//! The structural syntax tree the extractor works on.
//!
//! A closed set of statement kinds. Anything the extractor does not care
//! about is lowered into [`Stmt::Nested`] so that definitions buried in
//! conditionals, loops, `try` blocks or function bodies stay reachable.

/// A parsed source module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `import a.b, c as d`
    Import(ImportStmt),
    /// `from ..pkg import x, y`
    ImportFrom(ImportFromStmt),
    ClassDef(ClassDef),
    /// `def` and `async def`.
    FunctionDef(FunctionDef),
    /// A plain `=` assignment (no annotation, not augmented).
    Assign(Assign),
    /// Statements found inside some other construct.
    Nested(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStmt {
    /// Dotted module names, aliases dropped.
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFromStmt {
    /// Number of leading dots; 0 for absolute imports.
    pub level: usize,
    /// Dotted module after the dots, if any (`from . import x` has none).
    pub module: Option<String>,
    /// Imported names, aliases dropped. Empty for `import *`.
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub is_async: bool,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Before a `/` separator.
    PositionalOnly,
    /// Ordinary positional-or-keyword parameter.
    Positional,
    /// `*args`
    VarPositional,
    /// After `*` or `*args`.
    KeywordOnly,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assign {
    /// One entry per `=`; `a = b = 1` has two.
    pub targets: Vec<AssignTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignTarget {
    Name(String),
    /// Tuples, lists, attributes, subscripts, starred targets.
    Complex,
}

impl Assign {
    /// The identifier bound by a single-target, simple-name assignment.
    pub fn simple_target(&self) -> Option<&str> {
        match self.targets.as_slice() {
            [AssignTarget::Name(name)] => Some(name),
            _ => None,
        }
    }
}

/// Visitor over the closed statement set with default full-depth traversal.
///
/// Implementors override the hooks they need and call the matching
/// `walk_*` function to keep descending.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_import(&mut self, _import: &ImportStmt) {}

    fn visit_import_from(&mut self, _import: &ImportFromStmt) {}

    fn visit_class(&mut self, class: &ClassDef) {
        walk_body(self, &class.body);
    }

    fn visit_function(&mut self, function: &FunctionDef) {
        walk_body(self, &function.body);
    }

    fn visit_assign(&mut self, _assign: &Assign) {}
}

pub fn walk_module<V: Visitor + ?Sized>(visitor: &mut V, module: &Module) {
    walk_body(visitor, &module.body);
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Import(import) => visitor.visit_import(import),
        Stmt::ImportFrom(import) => visitor.visit_import_from(import),
        Stmt::ClassDef(class) => visitor.visit_class(class),
        Stmt::FunctionDef(function) => visitor.visit_function(function),
        Stmt::Assign(assign) => visitor.visit_assign(assign),
        Stmt::Nested(body) => walk_body(visitor, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClassCounter(usize);

    impl Visitor for ClassCounter {
        fn visit_class(&mut self, class: &ClassDef) {
            self.0 += 1;
            walk_body(self, &class.body);
        }
    }

    #[test]
    fn test_visitor_reaches_nested_classes() {
        let inner = Stmt::ClassDef(ClassDef {
            name: "Inner".to_string(),
            body: vec![],
        });
        let in_function = Stmt::FunctionDef(FunctionDef {
            name: "factory".to_string(),
            is_async: false,
            params: vec![],
            body: vec![Stmt::Nested(vec![Stmt::ClassDef(ClassDef {
                name: "Local".to_string(),
                body: vec![],
            })])],
        });
        let module = Module {
            body: vec![Stmt::ClassDef(ClassDef {
                name: "Outer".to_string(),
                body: vec![inner],
            }), in_function],
        };

        let mut counter = ClassCounter(0);
        walk_module(&mut counter, &module);
        assert_eq!(counter.0, 3);
    }

    #[test]
    fn test_simple_target() {
        let single = Assign {
            targets: vec![AssignTarget::Name("x".to_string())],
        };
        assert_eq!(single.simple_target(), Some("x"));

        let chained = Assign {
            targets: vec![
                AssignTarget::Name("a".to_string()),
                AssignTarget::Name("b".to_string()),
            ],
        };
        assert_eq!(chained.simple_target(), None);

        let tuple = Assign {
            targets: vec![AssignTarget::Complex],
        };
        assert_eq!(tuple.simple_target(), None);
    }
}
