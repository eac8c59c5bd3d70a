//! JavaScript emission for vlower
//!
//! Only the cross-module preamble is produced here: the namespace object
//! that lets one module find declarations compiled into another.

pub mod cross_module;
pub mod js_ast;

pub use cross_module::{
    generate_externs, parse_descriptors, CrossModuleExternGenerator, DeclarationTransformer,
    ExportError, ExportedDeclaration, JsGenerationContext, StubDeclarationTransformer,
    DEFAULT_ROOT_NAMESPACE,
};
pub use js_ast::{JsExpr, JsFunction, JsStmt};
