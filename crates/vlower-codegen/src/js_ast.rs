//! Minimal JavaScript statement tree
//!
//! Only what extern preambles need: variable declarations, namespaced
//! assignments, function declarations and object literals. Every node
//! prints itself through `Display`.

use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    Name(String),
    /// `object.name`, or `object["name"]` when `name` is not an identifier
    Member { object: Box<JsExpr>, name: String },
    /// `{}`
    ObjectLiteral,
    Function(JsFunction),
    Str(String),
    Null,
}

impl JsExpr {
    pub fn name(name: impl Into<String>) -> Self {
        JsExpr::Name(name.into())
    }

    pub fn member(self, name: impl Into<String>) -> Self {
        JsExpr::Member { object: Box::new(self), name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<JsStmt>,
}

impl JsFunction {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self { name: name.into(), params, body: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsStmt {
    /// Statements spliced into the enclosing scope without braces
    GlobalBlock(Vec<JsStmt>),
    Var {
        name: String,
        init: Option<JsExpr>,
        doc: Option<String>,
    },
    Assign {
        target: JsExpr,
        value: JsExpr,
        doc: Option<String>,
    },
    Function {
        function: JsFunction,
        doc: Option<String>,
    },
    Expr(JsExpr),
    Return(Option<JsExpr>),
}

/// Whether `name` can be written after a dot.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn write_str_literal(out: &mut impl Write, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn write_doc(out: &mut impl Write, doc: &Option<String>, indent: usize) -> fmt::Result {
    if let Some(doc) = doc {
        writeln!(out, "{:indent$}/** {} */", "", doc, indent = indent)?;
    }
    Ok(())
}

fn write_function(out: &mut impl Write, function: &JsFunction, indent: usize) -> fmt::Result {
    write!(out, "function {}({})", function.name, function.params.join(", "))?;
    if function.body.is_empty() {
        return out.write_str(" {}");
    }
    out.write_str(" {\n")?;
    for stmt in &function.body {
        write_stmt(out, stmt, indent + 2)?;
    }
    write!(out, "{:indent$}}}", "", indent = indent)
}

fn write_expr(out: &mut impl Write, expr: &JsExpr, indent: usize) -> fmt::Result {
    match expr {
        JsExpr::Name(name) => out.write_str(name),
        JsExpr::Member { object, name } => {
            write_expr(out, object, indent)?;
            if is_identifier(name) {
                write!(out, ".{}", name)
            } else {
                out.write_char('[')?;
                write_str_literal(out, name)?;
                out.write_char(']')
            }
        }
        JsExpr::ObjectLiteral => out.write_str("{}"),
        JsExpr::Function(function) => write_function(out, function, indent),
        JsExpr::Str(s) => write_str_literal(out, s),
        JsExpr::Null => out.write_str("null"),
    }
}

fn write_stmt(out: &mut impl Write, stmt: &JsStmt, indent: usize) -> fmt::Result {
    match stmt {
        JsStmt::GlobalBlock(stmts) => {
            for stmt in stmts {
                write_stmt(out, stmt, indent)?;
            }
            Ok(())
        }
        JsStmt::Var { name, init, doc } => {
            write_doc(out, doc, indent)?;
            write!(out, "{:indent$}var {}", "", name, indent = indent)?;
            if let Some(init) = init {
                out.write_str(" = ")?;
                write_expr(out, init, indent)?;
            }
            out.write_str(";\n")
        }
        JsStmt::Assign { target, value, doc } => {
            write_doc(out, doc, indent)?;
            write!(out, "{:indent$}", "", indent = indent)?;
            write_expr(out, target, indent)?;
            out.write_str(" = ")?;
            write_expr(out, value, indent)?;
            out.write_str(";\n")
        }
        JsStmt::Function { function, doc } => {
            write_doc(out, doc, indent)?;
            write!(out, "{:indent$}", "", indent = indent)?;
            write_function(out, function, indent)?;
            out.write_char('\n')
        }
        JsStmt::Expr(expr) => {
            write!(out, "{:indent$}", "", indent = indent)?;
            write_expr(out, expr, indent)?;
            out.write_str(";\n")
        }
        JsStmt::Return(value) => {
            write!(out, "{:indent$}return", "", indent = indent)?;
            if let Some(value) = value {
                out.write_char(' ')?;
                write_expr(out, value, indent)?;
            }
            out.write_str(";\n")
        }
    }
}

impl fmt::Display for JsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self, 0)
    }
}

impl fmt::Display for JsStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}
