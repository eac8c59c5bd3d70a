//! Cross-module extern emission
//!
//! Declarations exported by one module are re-declared in the preamble of
//! another under a single global namespace object, so both sides agree
//! on where each declaration lives:
//!
//! ```text
//! /** @const */
//! var kotlin_kotlin = {};
//! /** @const */
//! kotlin_kotlin.ns = {};
//! kotlin_kotlin.ns.f = function f() {};
//! ```

use crate::js_ast::{JsExpr, JsFunction, JsStmt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use vlower_ir::{DeclKind, Program};
use vlower_types::DeclId;

pub const DEFAULT_ROOT_NAMESPACE: &str = "kotlin_kotlin";

const NAMESPACE_DOC: &str = "@const";

/// Export descriptor produced by the export model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportedDeclaration {
    Namespace {
        name: String,
        #[serde(default)]
        declarations: Vec<ExportedDeclaration>,
    },
    Class {
        name: String,
        ir: DeclId,
    },
    Property {
        name: String,
        #[serde(default)]
        ir: Option<DeclId>,
    },
    Function {
        name: String,
        ir: DeclId,
    },
    /// Any kind the export model does not classify
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unclassified exported declaration in `{namespace}`")]
    UnknownDeclaration { namespace: String },

    #[error("exported declaration {0} does not exist")]
    MissingDeclaration(DeclId),

    #[error("`{name}` ({id}) cannot be exported as a {expected}")]
    WrongKind { name: String, id: DeclId, expected: &'static str },

    #[error("invalid export descriptors: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a JSON list of export descriptors.
pub fn parse_descriptors(text: &str) -> Result<Vec<ExportedDeclaration>, ExportError> {
    Ok(serde_json::from_str(text)?)
}

/// State shared by every translation of one emission run
pub struct JsGenerationContext<'p> {
    pub program: &'p Program,
    /// Declarations provided by the platform rather than by any module
    pub externals: Vec<DeclId>,
}

impl<'p> JsGenerationContext<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self { program, externals: Vec::new() }
    }

    pub fn with_externals(mut self, externals: Vec<DeclId>) -> Self {
        self.externals = externals;
        self
    }
}

/// Translation of IR declarations into JavaScript
pub trait DeclarationTransformer {
    fn transform(&self, decl: DeclId, ctx: &JsGenerationContext<'_>) -> Result<JsStmt, ExportError>;

    fn transform_function(
        &self,
        decl: DeclId,
        ctx: &JsGenerationContext<'_>,
    ) -> Result<JsFunction, ExportError>;
}

/// Emits bodiless extern declarations: signatures only.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubDeclarationTransformer;

impl StubDeclarationTransformer {
    fn params(names: impl Iterator<Item = String>) -> Vec<String> {
        names.map(|n| sanitize(&n)).collect()
    }
}

impl DeclarationTransformer for StubDeclarationTransformer {
    fn transform(&self, decl: DeclId, ctx: &JsGenerationContext<'_>) -> Result<JsStmt, ExportError> {
        let program = ctx.program;
        let d = program.try_get(decl).ok_or(ExportError::MissingDeclaration(decl))?;
        match &d.kind {
            DeclKind::Class(class) => {
                let params = program
                    .primary_constructor(decl)
                    .and_then(|c| program.function(c))
                    .map(|c| Self::params(c.params.into_iter().map(|p| p.name)))
                    .unwrap_or_default();
                let doc = if class.is_interface { "@interface" } else { "@constructor" };
                Ok(JsStmt::Function {
                    function: JsFunction::new(sanitize(&d.name), params),
                    doc: Some(doc.to_string()),
                })
            }
            DeclKind::Function(_) => Ok(JsStmt::Function {
                function: self.transform_function(decl, ctx)?,
                doc: None,
            }),
            DeclKind::Property(_) | DeclKind::Field(_) => Ok(JsStmt::Var {
                name: sanitize(&d.name),
                init: None,
                doc: Some("@type {*}".to_string()),
            }),
            DeclKind::Initializer(_) => Err(ExportError::WrongKind {
                name: program.qualified_name(decl),
                id: decl,
                expected: "declaration",
            }),
        }
    }

    fn transform_function(
        &self,
        decl: DeclId,
        ctx: &JsGenerationContext<'_>,
    ) -> Result<JsFunction, ExportError> {
        let program = ctx.program;
        let d = program.try_get(decl).ok_or(ExportError::MissingDeclaration(decl))?;
        let func = d.as_function().ok_or_else(|| ExportError::WrongKind {
            name: program.qualified_name(decl),
            id: decl,
            expected: "function",
        })?;
        let params = Self::params(func.params.iter().map(|p| p.name.clone()));
        Ok(JsFunction::new(sanitize(&d.name), params))
    }
}

/// Replace characters JavaScript identifiers cannot hold.
fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) || out.is_empty() {
        out.insert(0, '_');
    }
    out
}

pub struct CrossModuleExternGenerator<'t> {
    declarations: Vec<ExportedDeclaration>,
    transformer: &'t dyn DeclarationTransformer,
    root: String,
}

impl<'t> CrossModuleExternGenerator<'t> {
    pub fn new(declarations: Vec<ExportedDeclaration>, transformer: &'t dyn DeclarationTransformer) -> Self {
        Self { declarations, transformer, root: DEFAULT_ROOT_NAMESPACE.to_string() }
    }

    pub fn with_root_namespace(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Root declaration followed by one statement per descriptor, in
    /// descriptor order. A namespace path is declared only the first time
    /// it appears.
    pub fn generate(&self, ctx: &JsGenerationContext<'_>) -> Result<JsStmt, ExportError> {
        let mut statements = vec![JsStmt::Var {
            name: self.root.clone(),
            init: Some(JsExpr::ObjectLiteral),
            doc: Some(NAMESPACE_DOC.to_string()),
        }];
        let root = vec![self.root.clone()];
        let mut declared = HashSet::new();
        for declaration in &self.declarations {
            if let Some(stmt) = self.statement(declaration, &root, ctx, &mut declared)? {
                statements.push(stmt);
            }
        }
        debug!("emitted {} namespaces under {}", declared.len(), self.root);
        Ok(JsStmt::GlobalBlock(statements))
    }

    fn statement(
        &self,
        declaration: &ExportedDeclaration,
        namespace: &[String],
        ctx: &JsGenerationContext<'_>,
        declared: &mut HashSet<Vec<String>>,
    ) -> Result<Option<JsStmt>, ExportError> {
        match declaration {
            ExportedDeclaration::Namespace { name, declarations } => {
                let mut path = namespace.to_vec();
                path.push(name.clone());
                let mut block = Vec::new();
                if declared.insert(path.clone()) {
                    block.push(JsStmt::Assign {
                        target: qualify(namespace).member(name.clone()),
                        value: JsExpr::ObjectLiteral,
                        doc: Some(NAMESPACE_DOC.to_string()),
                    });
                }
                for member in declarations {
                    if let Some(stmt) = self.statement(member, &path, ctx, declared)? {
                        block.push(stmt);
                    }
                }
                Ok(Some(JsStmt::GlobalBlock(block)))
            }
            ExportedDeclaration::Class { ir, .. } => self.transformer.transform(*ir, ctx).map(Some),
            ExportedDeclaration::Property { ir, .. } => {
                ir.map(|ir| self.transformer.transform(ir, ctx)).transpose()
            }
            ExportedDeclaration::Function { ir, .. } => {
                let function = self.transformer.transform_function(*ir, ctx)?;
                Ok(Some(JsStmt::Assign {
                    target: qualify(namespace).member(function.name.clone()),
                    value: JsExpr::Function(function),
                    doc: None,
                }))
            }
            ExportedDeclaration::Unknown => Err(ExportError::UnknownDeclaration {
                namespace: namespace.join("."),
            }),
        }
    }
}

fn qualify(path: &[String]) -> JsExpr {
    let mut parts = path.iter();
    let mut expr = JsExpr::name(parts.next().cloned().unwrap_or_default());
    for part in parts {
        expr = expr.member(part.clone());
    }
    expr
}

/// Extern declarations for every platform-provided declaration.
pub fn generate_externs(
    transformer: &dyn DeclarationTransformer,
    ctx: &JsGenerationContext<'_>,
) -> Result<JsStmt, ExportError> {
    let statements = ctx
        .externals
        .iter()
        .map(|decl| transformer.transform(*decl, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(JsStmt::GlobalBlock(statements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlower_ir::{Body, Expr, ProgramBuilder};
    use vlower_types::Type;

    fn fixture() -> (Program, DeclId, DeclId) {
        let mut b = ProgramBuilder::new();
        let point = b.class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let f = b.function("f", &[], Type::Unit, Body::Expr(Expr::int(0)));
        (b.finish(), f, point.class)
    }

    fn emit(program: &Program, declarations: Vec<ExportedDeclaration>) -> String {
        let ctx = JsGenerationContext::new(program);
        CrossModuleExternGenerator::new(declarations, &StubDeclarationTransformer)
            .generate(&ctx)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_namespace_then_function() {
        let (program, f, _) = fixture();
        let out = emit(
            &program,
            vec![ExportedDeclaration::Namespace {
                name: "ns".into(),
                declarations: vec![ExportedDeclaration::Function { name: "f".into(), ir: f }],
            }],
        );
        assert_eq!(
            out,
            "/** @const */\nvar kotlin_kotlin = {};\n/** @const */\nkotlin_kotlin.ns = {};\nkotlin_kotlin.ns.f = function f() {};\n"
        );
    }

    #[test]
    fn test_repeated_namespace_is_declared_once() {
        let (program, f, _) = fixture();
        let ns = ExportedDeclaration::Namespace {
            name: "ns".into(),
            declarations: vec![ExportedDeclaration::Function { name: "f".into(), ir: f }],
        };
        let out = emit(&program, vec![ns.clone(), ns]);
        assert_eq!(out.matches("kotlin_kotlin.ns = {};").count(), 1);
        assert_eq!(out.matches("kotlin_kotlin.ns.f = ").count(), 2);
    }

    #[test]
    fn test_nested_namespaces_and_classes() {
        let (program, f, point) = fixture();
        let ctx = JsGenerationContext::new(&program);
        let out = CrossModuleExternGenerator::new(
            vec![
                ExportedDeclaration::Namespace {
                    name: "a".into(),
                    declarations: vec![ExportedDeclaration::Namespace {
                        name: "b-c".into(),
                        declarations: vec![ExportedDeclaration::Function { name: "f".into(), ir: f }],
                    }],
                },
                ExportedDeclaration::Class { name: "Point".into(), ir: point },
                ExportedDeclaration::Property { name: "hidden".into(), ir: None },
            ],
            &StubDeclarationTransformer,
        )
        .with_root_namespace("lib")
        .generate(&ctx)
        .unwrap()
        .to_string();

        let expected = [
            "/** @const */",
            "var lib = {};",
            "/** @const */",
            "lib.a = {};",
            "/** @const */",
            "lib.a[\"b-c\"] = {};",
            "lib.a[\"b-c\"].f = function f() {};",
            "/** @constructor */",
            "function Point(x, y) {}",
        ];
        assert_eq!(out.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let (program, _, _) = fixture();
        let declarations =
            parse_descriptors(r#"[{"kind": "namespace", "name": "ns", "declarations": [{"kind": "enum_entry", "name": "A"}]}]"#)
                .unwrap();
        let ctx = JsGenerationContext::new(&program);
        let err = CrossModuleExternGenerator::new(declarations, &StubDeclarationTransformer)
            .generate(&ctx)
            .unwrap_err();
        assert!(matches!(err, ExportError::UnknownDeclaration { ref namespace } if namespace == "kotlin_kotlin.ns"));
    }

    #[test]
    fn test_externs_cover_every_declaration() {
        let (program, f, point) = fixture();
        let ctx = JsGenerationContext::new(&program).with_externals(vec![point, f]);
        let out = generate_externs(&StubDeclarationTransformer, &ctx).unwrap().to_string();
        assert_eq!(out, "/** @constructor */\nfunction Point(x, y) {}\nfunction f() {}\n");
    }
}
