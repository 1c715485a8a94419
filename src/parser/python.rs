//! Python front end: tree-sitter-python lowered into the structural AST.
//!
//! Walks the concrete tree directly rather than running queries.

use tree_sitter::{Node, Parser, Tree};

use super::ast::*;
use super::{ParseError, SourceParser};

/// Parser for Python source backed by tree-sitter.
pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ParseError::Grammar(e.to_string()))?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, text: &str) -> Result<Tree, ParseError> {
        self.parser
            .parse(text, None)
            .ok_or_else(|| ParseError::Grammar("parser produced no tree".to_string()))
    }
}

impl SourceParser for PythonParser {
    fn parse(&mut self, text: &str) -> Result<Module, ParseError> {
        let tree = self.parse_tree(text)?;
        let root = tree.root_node();
        if root.has_error() {
            let (line, column) = first_error_position(&root)
                .unwrap_or((root.start_position().row, root.start_position().column));
            return Err(ParseError::Syntax {
                line: line + 1,
                column,
            });
        }
        let source = text.as_bytes();
        Ok(Module {
            body: lower_body(&root, source),
        })
    }
}

/// Outcome of looking at one concrete node.
enum Lowered {
    Stmt(Stmt),
    /// Not interesting, and nothing interesting can live below it.
    Skip,
    /// Not interesting itself; statements may be nested below it.
    Descend,
}

/// Lower the direct statements of a module or block.
///
/// Unknown compound statements become [`Stmt::Nested`] so that callers can
/// tell direct members of a class body from ones inside an `if`.
fn lower_body(node: &Node, source: &[u8]) -> Vec<Stmt> {
    let mut body = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match lower_statement(&child, source) {
            Lowered::Stmt(stmt) => body.push(stmt),
            Lowered::Skip => {}
            Lowered::Descend => {
                let nested = lower_descendants(&child, source);
                if !nested.is_empty() {
                    body.push(Stmt::Nested(nested));
                }
            }
        }
    }
    body
}

/// Collect every interesting statement below `node`, flattened in source order.
fn lower_descendants(node: &Node, source: &[u8]) -> Vec<Stmt> {
    let mut found = Vec::new();
    let mut stack = named_children_rev(node);
    while let Some(child) = stack.pop() {
        match lower_statement(&child, source) {
            Lowered::Stmt(stmt) => found.push(stmt),
            Lowered::Skip => {}
            Lowered::Descend => stack.extend(named_children_rev(&child)),
        }
    }
    found
}

fn named_children_rev<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let mut children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children.reverse();
    children
}

fn lower_statement(node: &Node, source: &[u8]) -> Lowered {
    match node.kind() {
        "import_statement" => Lowered::Stmt(Stmt::Import(ImportStmt {
            names: imported_names(node, source),
        })),
        "import_from_statement" => Lowered::Stmt(Stmt::ImportFrom(lower_import_from(node, source))),
        "future_import_statement" => Lowered::Stmt(Stmt::ImportFrom(ImportFromStmt {
            level: 0,
            module: Some("__future__".to_string()),
            names: imported_names(node, source),
        })),
        "class_definition" => match lower_class(node, source) {
            Some(class) => Lowered::Stmt(Stmt::ClassDef(class)),
            None => Lowered::Skip,
        },
        "function_definition" => match lower_function(node, source) {
            Some(function) => Lowered::Stmt(Stmt::FunctionDef(function)),
            None => Lowered::Skip,
        },
        "decorated_definition" => match node.child_by_field_name("definition") {
            Some(definition) => lower_statement(&definition, source),
            None => Lowered::Skip,
        },
        "expression_statement" => {
            let mut cursor = node.walk();
            let first = node.named_children(&mut cursor).next();
            match first {
                Some(expr) if expr.kind() == "assignment" => match lower_assignment(&expr, source) {
                    Some(assign) => Lowered::Stmt(Stmt::Assign(assign)),
                    None => Lowered::Skip,
                },
                _ => Lowered::Skip,
            }
        }
        // Statement-bearing compounds; their header expressions fall to `Skip`.
        "block" | "if_statement" | "elif_clause" | "else_clause" | "for_statement"
        | "while_statement" | "try_statement" | "except_clause" | "except_group_clause"
        | "finally_clause" | "with_statement" | "match_statement" | "case_clause" => {
            Lowered::Descend
        }
        _ => Lowered::Skip,
    }
}

fn lower_import_from(node: &Node, source: &[u8]) -> ImportFromStmt {
    let mut level = 0;
    let mut module = None;

    if let Some(module_node) = node.child_by_field_name("module_name") {
        match module_node.kind() {
            "relative_import" => {
                let mut cursor = module_node.walk();
                for part in module_node.named_children(&mut cursor) {
                    match part.kind() {
                        "import_prefix" => {
                            level = text_of(&part, source).chars().filter(|c| *c == '.').count();
                        }
                        "dotted_name" => module = Some(dotted_text(&part, source)),
                        _ => {}
                    }
                }
            }
            _ => module = Some(dotted_text(&module_node, source)),
        }
    }

    ImportFromStmt {
        level,
        module,
        names: imported_names(node, source),
    }
}

/// Names bound by an import statement's `name` fields, aliases dropped.
fn imported_names(node: &Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        match name.kind() {
            "dotted_name" => names.push(dotted_text(&name, source)),
            "aliased_import" => {
                if let Some(inner) = name.child_by_field_name("name") {
                    names.push(dotted_text(&inner, source));
                }
            }
            _ => {}
        }
    }
    names
}

fn lower_class(node: &Node, source: &[u8]) -> Option<ClassDef> {
    let name = node.child_by_field_name("name").map(|n| text_of(&n, source))?;
    let body = node
        .child_by_field_name("body")
        .map(|b| lower_body(&b, source))
        .unwrap_or_default();
    Some(ClassDef { name, body })
}

fn lower_function(node: &Node, source: &[u8]) -> Option<FunctionDef> {
    let name = node.child_by_field_name("name").map(|n| text_of(&n, source))?;

    let mut is_async = false;
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "async" {
            is_async = true;
            break;
        }
    }

    let params = node
        .child_by_field_name("parameters")
        .map(|p| lower_parameters(&p, source))
        .unwrap_or_default();
    let body = node
        .child_by_field_name("body")
        .map(|b| lower_body(&b, source))
        .unwrap_or_default();

    Some(FunctionDef {
        name,
        is_async,
        params,
        body,
    })
}

fn lower_parameters(node: &Node, source: &[u8]) -> Vec<Param> {
    let mut params: Vec<Param> = Vec::new();
    let mut keyword_only = false;

    let positional = |keyword_only: bool| {
        if keyword_only {
            ParamKind::KeywordOnly
        } else {
            ParamKind::Positional
        }
    };

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => params.push(Param {
                name: text_of(&child, source),
                kind: positional(keyword_only),
            }),
            "default_parameter" | "typed_default_parameter" => {
                if let Some(name) = child.child_by_field_name("name") {
                    params.push(Param {
                        name: text_of(&name, source),
                        kind: positional(keyword_only),
                    });
                }
            }
            "typed_parameter" => {
                let mut inner_cursor = child.walk();
                let first = child.named_children(&mut inner_cursor).next();
                match first {
                    Some(inner) if inner.kind() == "identifier" => params.push(Param {
                        name: text_of(&inner, source),
                        kind: positional(keyword_only),
                    }),
                    Some(inner) if inner.kind() == "list_splat_pattern" => {
                        keyword_only = true;
                        params.push(splat_param(&inner, source, ParamKind::VarPositional));
                    }
                    Some(inner) if inner.kind() == "dictionary_splat_pattern" => {
                        params.push(splat_param(&inner, source, ParamKind::VarKeyword));
                    }
                    _ => {}
                }
            }
            "list_splat_pattern" => {
                keyword_only = true;
                params.push(splat_param(&child, source, ParamKind::VarPositional));
            }
            "dictionary_splat_pattern" => {
                params.push(splat_param(&child, source, ParamKind::VarKeyword));
            }
            "keyword_separator" => keyword_only = true,
            "positional_separator" => {
                for param in params.iter_mut() {
                    if param.kind == ParamKind::Positional {
                        param.kind = ParamKind::PositionalOnly;
                    }
                }
            }
            _ => {}
        }
    }

    params
}

fn splat_param(node: &Node, source: &[u8], kind: ParamKind) -> Param {
    let mut cursor = node.walk();
    let name = node
        .named_children(&mut cursor)
        .find(|n| n.kind() == "identifier")
        .map(|n| text_of(&n, source))
        .unwrap_or_default();
    Param { name, kind }
}

fn lower_assignment(node: &Node, source: &[u8]) -> Option<Assign> {
    // `x: int = 1` and bare `x: int` are annotations, not plain assignments.
    if node.child_by_field_name("type").is_some() {
        return None;
    }

    let mut targets = Vec::new();
    let mut current = *node;
    loop {
        let left = current.child_by_field_name("left")?;
        targets.push(match left.kind() {
            "identifier" => AssignTarget::Name(text_of(&left, source)),
            _ => AssignTarget::Complex,
        });
        match current.child_by_field_name("right") {
            Some(right) if right.kind() == "assignment" => current = right,
            _ => break,
        }
    }

    Some(Assign { targets })
}

fn text_of(node: &Node, source: &[u8]) -> String {
    node.utf8_text(source).map(str::to_string).unwrap_or_default()
}

/// Dotted name text with any interior whitespace removed (`a . b` → `a.b`).
fn dotted_text(node: &Node, source: &[u8]) -> String {
    text_of(node, source)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\\')
        .collect()
}

/// Zero-based (row, column) of the first error or missing node.
fn first_error_position(root: &Node) -> Option<(usize, usize)> {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return Some((pos.row, pos.column));
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children(&mut cursor).collect();
            // Push in reverse so the leftmost child is examined first.
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
    }
    None
}
