//! Replacement decisions
//!
//! Classifies every function as needing no rewrite, a static replacement
//! (a free function over the receiver's leaves) or a method replacement
//! (same receiver, aggregate parameters expanded into leaves), and creates
//! the replacement declaration when one is needed.

use crate::error::{LoweringError, Result};
use crate::registry::MultiFieldValueClassReplacements;
use log::debug;
use std::ops::Range;
use std::sync::Arc;
use vlower_diagnostics::DiagnosticCode;
use vlower_ir::{DeclKind, FunctionDecl, FunctionKind, Modality, Origin, Param, SourceLanguage};
use vlower_types::{DeclId, Type};

#[derive(Debug, Clone)]
pub enum Decision {
    NoReplacement,
    StaticReplacement(Arc<Replacement>),
    MethodReplacement(Arc<Replacement>),
}

impl Decision {
    pub fn replacement(&self) -> Option<&Arc<Replacement>> {
        match self {
            Decision::NoReplacement => None,
            Decision::StaticReplacement(r) | Decision::MethodReplacement(r) => Some(r),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Decision::StaticReplacement(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Decision::NoReplacement => "none",
            Decision::StaticReplacement(_) => "static",
            Decision::MethodReplacement(_) => "method",
        }
    }
}

/// A run of consecutive replacement parameters holding one aggregate's leaves
#[derive(Debug, Clone, PartialEq)]
pub struct LeafSlot {
    pub class: DeclId,
    pub type_args: Vec<Type>,
    pub range: Range<usize>,
}

impl LeafSlot {
    pub fn params(&self) -> impl Iterator<Item = usize> {
        self.range.clone()
    }
}

/// Where an original parameter went in the replacement
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSlot {
    /// Passed through unchanged at this index
    Value { index: usize },
    Leaves(LeafSlot),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub original: DeclId,
    pub function: DeclId,
    /// Leaves of the dispatch receiver (static replacements only)
    pub receiver: Option<LeafSlot>,
    /// One slot per original parameter
    pub params: Vec<ParamSlot>,
}

pub fn decide(registry: &MultiFieldValueClassReplacements<'_>, function: DeclId) -> Result<Decision> {
    let program = registry.program();
    let decl = program
        .try_get(function)
        .ok_or_else(|| LoweringError::malformed(format!("unknown declaration {}", function)))?;
    let Some(func) = decl.as_function() else {
        return Err(LoweringError::malformed(format!(
            "`{}` is not a function",
            program.qualified_name(function)
        )));
    };

    let skip = (func.is_local && func.overridden.is_empty())
        || (func.is_local && decl.origin == Origin::DelegatedPropertyAccessor)
        || decl.origin == Origin::StaticValueClassReplacement
        || (decl.origin.is_synthetic() && decl.origin != Origin::SyntheticSamImplementation);
    if skip {
        return Ok(Decision::NoReplacement);
    }

    if program.is_multi_field_value_class_field_getter(function) {
        // Getters of aggregate-typed fields keep returning the boxed value;
        // callers that want leaves go through the unbox functions.
        return Ok(Decision::NoReplacement);
    }

    let owner = program.parent_class(function);
    if let Some(class) = owner.filter(|c| program.is_multi_field_value_class(*c)) {
        if func.is_primary_constructor() {
            return Ok(Decision::NoReplacement);
        }
        if func.is_constructor() {
            return Err(LoweringError::unsupported(
                DiagnosticCode::UnsupportedFeature,
                "secondary constructors of multi-field value classes are not supported",
            )
            .in_context(program.qualified_name(function)));
        }
        if is_remove_at_stub(&decl.origin, &decl.name, func) {
            return Ok(Decision::NoReplacement);
        }
        let from_default_interface = func.is_fake_override && {
            let base_id = program.resolve_fake_override(function).ok_or_else(|| {
                LoweringError::internal(format!(
                    "fake override `{}` has no overridden declaration",
                    program.qualified_name(function)
                ))
            })?;
            let base = program.function(base_id).ok_or_else(|| {
                LoweringError::internal(format!("override target {} is not a function", base_id))
            })?;
            let in_interface = program
                .parent_class(base_id)
                .and_then(|c| program.class(c))
                .map_or(false, |c| c.is_interface);
            in_interface && (base.language == SourceLanguage::Foreign || base.compiled_to_default_interface)
        };
        if from_default_interface || decl.origin == Origin::BuiltinsStub {
            return create_method_replacement(registry, function).map(Decision::MethodReplacement);
        }
        return create_static_replacement(registry, class, function).map(Decision::StaticReplacement);
    }

    if func.is_constructor() {
        return Ok(Decision::NoReplacement);
    }
    let takes_aggregate = func
        .params
        .iter()
        .any(|p| program.is_multi_field_value_class_type(&p.ty));
    if func.language != SourceLanguage::Foreign && takes_aggregate {
        return create_method_replacement(registry, function).map(Decision::MethodReplacement);
    }

    Ok(Decision::NoReplacement)
}

/// `remove(index: Int)` stub generated for builtin list supertypes.
fn is_remove_at_stub(origin: &Origin, name: &str, func: &FunctionDecl) -> bool {
    *origin == Origin::BuiltinsStub
        && name == "remove"
        && func.params.len() == 1
        && func.params[0].ty.is_int()
}

fn create_static_replacement(
    registry: &MultiFieldValueClassReplacements<'_>,
    class: DeclId,
    function: DeclId,
) -> Result<Arc<Replacement>> {
    let program = registry.program();
    let original = program.get(function);
    let func = original
        .as_function()
        .ok_or_else(|| LoweringError::internal("static replacement of a non-function"))?;
    let owner = registry.require_declarations(class)?;

    let mut params = Vec::new();
    let receiver = if func.has_dispatch_receiver {
        let this_type = program.this_type(class);
        let start = params.len();
        push_leaves(registry, &mut params, "$this", &this_type)?;
        Some(LeafSlot {
            class: owner.value_class,
            type_args: type_args(&this_type),
            range: start..params.len(),
        })
    } else {
        None
    };
    let slots = expand_params(registry, &mut params, &func.params)?;

    let class_decl = program.class(class);
    let mut type_params = class_decl.map(|c| c.type_params).unwrap_or_default();
    type_params.extend(func.type_params.iter().cloned());

    let replacement = FunctionDecl {
        kind: FunctionKind::Simple,
        params,
        has_dispatch_receiver: false,
        return_type: func.return_type.clone(),
        body: None,
        visibility: func.visibility,
        modality: Modality::Final,
        is_local: func.is_local,
        is_fake_override: false,
        overridden: Vec::new(),
        language: func.language,
        compiled_to_default_interface: false,
        property: None,
        type_params,
    };
    let id = program.alloc(
        format!("{}-impl", original.name),
        None,
        Origin::StaticValueClassReplacement,
        DeclKind::Function(replacement),
    );
    program.attach(Some(class), id);
    debug!("static replacement {} for {}", id, program.qualified_name(function));

    Ok(Arc::new(Replacement { original: function, function: id, receiver, params: slots }))
}

fn create_method_replacement(
    registry: &MultiFieldValueClassReplacements<'_>,
    function: DeclId,
) -> Result<Arc<Replacement>> {
    let program = registry.program();
    let original = program.get(function);
    let func = original
        .as_function()
        .ok_or_else(|| LoweringError::internal("method replacement of a non-function"))?;

    let mut params = Vec::new();
    let slots = expand_params(registry, &mut params, &func.params)?;

    let mut overridden = Vec::new();
    for base in &func.overridden {
        if let Some(r) = registry.replacement_for(*base)? {
            overridden.push(r.function);
        }
    }

    // A fake override stays one only while it has a replaced base to
    // resolve to; otherwise it becomes a bridge back to the original.
    let is_fake_override = func.is_fake_override && !overridden.is_empty();
    let replacement = FunctionDecl {
        kind: FunctionKind::Simple,
        params,
        has_dispatch_receiver: func.has_dispatch_receiver,
        return_type: func.return_type.clone(),
        body: None,
        visibility: func.visibility,
        modality: func.modality,
        is_local: func.is_local,
        is_fake_override,
        overridden,
        language: func.language,
        compiled_to_default_interface: func.compiled_to_default_interface,
        property: None,
        type_params: func.type_params.clone(),
    };
    let id = program.alloc(
        format!("{}-mfvc", original.name),
        None,
        Origin::MethodValueClassReplacement,
        DeclKind::Function(replacement),
    );
    program.attach(original.parent, id);
    debug!("method replacement {} for {}", id, program.qualified_name(function));

    Ok(Arc::new(Replacement { original: function, function: id, receiver: None, params: slots }))
}

/// Append replacement parameters for `params`, expanding every
/// multi-field value class parameter into its leaves.
fn expand_params(
    registry: &MultiFieldValueClassReplacements<'_>,
    out: &mut Vec<Param>,
    params: &[Param],
) -> Result<Vec<ParamSlot>> {
    let program = registry.program();
    let mut slots = Vec::with_capacity(params.len());
    for param in params {
        match program.multi_field_value_class_of(&param.ty) {
            Some(class) => {
                let start = out.len();
                push_leaves(registry, out, &param.name, &param.ty)?;
                slots.push(ParamSlot::Leaves(LeafSlot {
                    class,
                    type_args: type_args(&param.ty),
                    range: start..out.len(),
                }));
            }
            None => {
                slots.push(ParamSlot::Value { index: out.len() });
                out.push(param.clone());
            }
        }
    }
    Ok(slots)
}

fn push_leaves(
    registry: &MultiFieldValueClassReplacements<'_>,
    out: &mut Vec<Param>,
    prefix: &str,
    ty: &Type,
) -> Result<()> {
    let class = ty
        .class_id()
        .ok_or_else(|| LoweringError::internal(format!("`{}` is not a class type", ty)))?;
    let declarations = registry.require_declarations(class)?;
    for (name, leaf_ty) in declarations.leaf_types(ty) {
        out.push(Param::new(format!("{}-{}", prefix, name), leaf_ty));
    }
    Ok(())
}

fn type_args(ty: &Type) -> Vec<Type> {
    match ty {
        Type::Class { args, .. } => args.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlower_ir::{Body, Expr, ProgramBuilder};

    #[test]
    fn test_decision_classification() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let line = b.value_class(
            "Line",
            &[("start", Type::class(point.class)), ("end", Type::class(point.class))],
        );
        let holder = b.class("Holder", &[("count", Type::Int)]);
        let describe = b.method(holder.class, "describe", &[], Type::String, Some(Body::Expr(Expr::string("h"))));
        let length = b.function(
            "length",
            &[("p", Type::class(point.class))],
            Type::Int,
            Body::Expr(Expr::int(0)),
        );
        let sum = b.method(point.class, "sum", &[], Type::Int, Some(Body::Expr(Expr::int(0))));
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        assert!(matches!(registry.decision_for(describe).unwrap(), Decision::NoReplacement));
        assert!(matches!(registry.decision_for(length).unwrap(), Decision::MethodReplacement(_)));
        assert!(matches!(registry.decision_for(point.constructor).unwrap(), Decision::NoReplacement));
        assert!(matches!(registry.decision_for(point.getters[0]).unwrap(), Decision::NoReplacement));
        // Getter of a field whose type is itself a multi-field value class.
        assert!(matches!(registry.decision_for(line.getters[0]).unwrap(), Decision::NoReplacement));

        let Decision::StaticReplacement(r) = registry.decision_for(sum).unwrap() else {
            panic!("expected a static replacement");
        };
        let replacement = program.function(r.function).unwrap();
        assert!(!replacement.has_dispatch_receiver);
        let names: Vec<&str> = replacement.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["$this-x", "$this-y"]);
        assert_eq!(program.get(r.function).origin, Origin::StaticValueClassReplacement);
        assert!(program.members(point.class).contains(&r.function));
    }

    #[test]
    fn test_method_replacement_expands_nested_leaves() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let line = b.value_class(
            "Line",
            &[("start", Type::class(point.class)), ("end", Type::class(point.class))],
        );
        let scale = b.function(
            "scale",
            &[("factor", Type::Int), ("line", Type::class(line.class))],
            Type::Int,
            Body::Expr(Expr::int(0)),
        );
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        let r = registry.replacement_for(scale).unwrap().unwrap();
        assert_eq!(r.params[0], ParamSlot::Value { index: 0 });
        let ParamSlot::Leaves(slot) = &r.params[1] else {
            panic!("expected leaves");
        };
        assert_eq!(slot.range, 1..5);
        let names: Vec<String> = program
            .function(r.function)
            .unwrap()
            .params
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(
            names,
            ["factor", "line-start-x", "line-start-y", "line-end-x", "line-end-y"]
        );
    }

    #[test]
    fn test_excluded_functions() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let p = Type::class(point.class);
        let local = b.function("local", &[("p", p.clone())], Type::Int, Body::Expr(Expr::int(0)));
        b.configure(local, |f| f.is_local = true);
        let foreign = b.function("foreign", &[("p", p.clone())], Type::Int, Body::Expr(Expr::int(0)));
        b.configure(foreign, |f| f.language = SourceLanguage::Foreign);
        let sam = b.function("sam", &[("p", p.clone())], Type::Int, Body::Expr(Expr::int(0)));
        b.set_origin(sam, Origin::SyntheticSamImplementation);
        let bridge = b.function("bridge", &[("p", p)], Type::Int, Body::Expr(Expr::int(0)));
        b.set_origin(bridge, Origin::Synthetic("bridge".into()));
        let remove = b.method(point.class, "remove", &[("index", Type::Int)], Type::Int, None);
        b.set_origin(remove, Origin::BuiltinsStub);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        assert!(matches!(registry.decision_for(local).unwrap(), Decision::NoReplacement));
        assert!(matches!(registry.decision_for(foreign).unwrap(), Decision::NoReplacement));
        assert!(matches!(registry.decision_for(bridge).unwrap(), Decision::NoReplacement));
        assert!(matches!(registry.decision_for(remove).unwrap(), Decision::NoReplacement));
        // The SAM implementation is the one synthetic origin that still gets replaced.
        assert!(matches!(registry.decision_for(sam).unwrap(), Decision::MethodReplacement(_)));
    }

    #[test]
    fn test_default_interface_fake_override_gets_method_replacement() {
        let mut b = ProgramBuilder::new();
        let shape = b.interface("Shape");
        let area = b.method(shape, "area", &[], Type::Int, Some(Body::Expr(Expr::int(1))));
        b.configure(area, |f| f.compiled_to_default_interface = true);
        let name = b.method(shape, "name", &[], Type::String, Some(Body::Expr(Expr::string("s"))));
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let fake_area = b.fake_override(point.class, area);
        let fake_name = b.fake_override(point.class, name);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        let area_decision = registry.decision_for(fake_area).unwrap();
        assert!(matches!(area_decision, Decision::MethodReplacement(_)));
        let r = area_decision.replacement().unwrap();
        let func = program.function(r.function).unwrap();
        assert!(!func.is_fake_override && func.has_dispatch_receiver);
        assert!(registry.decision_for(fake_name).unwrap().is_static());
    }

    #[test]
    fn test_class_inherited_default_method_gets_static_replacement() {
        let mut b = ProgramBuilder::new();
        let base = b.class("Base", &[]);
        let describe = b.method(base.class, "describe", &[], Type::String, Some(Body::Expr(Expr::string("b"))));
        b.configure(describe, |f| {
            f.compiled_to_default_interface = true;
            f.language = SourceLanguage::Foreign;
        });
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let fake_describe = b.fake_override(point.class, describe);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        assert!(registry.decision_for(fake_describe).unwrap().is_static());
    }

    #[test]
    fn test_dangling_fake_override_is_internal_error() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let orphan = b.method(point.class, "orphan", &[], Type::Int, None);
        b.configure(orphan, |f| f.is_fake_override = true);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        assert!(registry.decision_for(orphan).unwrap_err().is_internal());
    }

    #[test]
    fn test_decisions_are_memoized() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let length = b.function(
            "length",
            &[("p", Type::class(point.class))],
            Type::Int,
            Body::Expr(Expr::int(0)),
        );
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        let first = registry.replacement_for(length).unwrap().unwrap();
        let before = program.len();
        let second = registry.replacement_for(length).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(program.len(), before);
        assert_eq!(registry.decision_runs(), 1);
    }
}
