//! Call-site rewriting
//!
//! Once every multi-field value class has its new shape, function bodies
//! still refer to the old one: removed fields and getters, the old primary
//! constructor, functions that received replacements and aggregate
//! equality. Each body is rewritten by a closed match over the expression
//! tree. Aggregates are expanded into leaf expressions wherever a
//! replacement takes leaves.

use crate::decision::{Decision, ParamSlot, Replacement};
use crate::error::{LoweringError, Result};
use crate::registry::{MultiFieldValueClassReplacements, RemovedField};
use crate::specific::SpecificDeclarations;
use log::trace;
use std::sync::Arc;
use vlower_diagnostics::DiagnosticCode;
use vlower_ir::dump::render_expr;
use vlower_ir::{Body, Expr, FunctionDecl, Modality, Origin, Stmt, TypeContext, ValueRef};
use vlower_types::DeclId;

/// New bodies for `function` and, when it was replaced, for its
/// replacement. The caller applies them.
pub fn rewrite_function(
    registry: &MultiFieldValueClassReplacements<'_>,
    function: DeclId,
) -> Result<Vec<(DeclId, Body)>> {
    let program = registry.program();
    let decl = program.get(function);
    let Some(func) = decl.as_function() else {
        return Ok(Vec::new());
    };
    if matches!(
        decl.origin,
        Origin::StaticValueClassReplacement | Origin::MethodValueClassReplacement
    ) {
        // Filled in together with their original.
        return Ok(Vec::new());
    }

    let context = || program.qualified_name(function);
    let decision = registry.decision_for(function)?;
    trace!("rewriting {} ({})", context(), decision.kind_name());

    let mut updates = Vec::new();
    match (&decision, &func.body) {
        (Decision::NoReplacement, None) => {}
        (Decision::NoReplacement, Some(body)) => {
            let mut scope = Scope::for_function(registry, function, func);
            let body = scope.body(body).map_err(|e| e.in_context(context()))?;
            updates.push((function, body));
        }
        (Decision::StaticReplacement(r) | Decision::MethodReplacement(r), Some(body)) => {
            let mut scope = Scope::for_replacement(registry, r, func)?;
            let moved = scope.body(body).map_err(|e| e.in_context(context()))?;
            updates.push((r.function, moved));
            updates.push((function, Body::Expr(delegate_to_replacement(registry, r, func)?)));
        }
        (Decision::StaticReplacement(r) | Decision::MethodReplacement(r), None) => {
            let replacement = program.function(r.function).ok_or_else(|| {
                LoweringError::internal(format!("replacement {} is not a function", r.function))
            })?;
            let is_abstract = func.modality == Modality::Abstract && !func.is_fake_override;
            if !replacement.is_fake_override && !is_abstract {
                updates.push((r.function, Body::Expr(bridge_to_original(registry, r, func)?)));
            }
        }
    }
    Ok(updates)
}

/// Original body after replacement: unbox the receiver and aggregate
/// arguments and call the replacement.
fn delegate_to_replacement(
    registry: &MultiFieldValueClassReplacements<'_>,
    r: &Replacement,
    func: &FunctionDecl,
) -> Result<Expr> {
    let mut args = Vec::new();
    if let Some(slot) = &r.receiver {
        args.extend(registry.require_declarations(slot.class)?.unbox_calls(&Expr::this()));
    }
    for (i, slot) in r.params.iter().enumerate() {
        match slot {
            ParamSlot::Value { .. } => args.push(Expr::param(i)),
            ParamSlot::Leaves(leaves) => {
                let declarations = registry.require_declarations(leaves.class)?;
                args.extend(declarations.unbox_calls(&Expr::param(i)));
            }
        }
    }
    let receiver = (r.receiver.is_none() && func.has_dispatch_receiver).then(|| Box::new(Expr::this()));
    Ok(Expr::Call { function: r.function, receiver, args, type_args: Vec::new() })
}

/// Replacement of a bodyless, non-abstract original: box the leaves back
/// and call the original, which dispatches to the inherited body.
fn bridge_to_original(
    registry: &MultiFieldValueClassReplacements<'_>,
    r: &Replacement,
    func: &FunctionDecl,
) -> Result<Expr> {
    let receiver = match &r.receiver {
        Some(slot) => {
            let declarations = registry.require_declarations(slot.class)?;
            Some(Box::new(declarations.box_call(slot.params().map(Expr::param).collect())))
        }
        None if func.has_dispatch_receiver => Some(Box::new(Expr::this())),
        None => None,
    };
    let mut args = Vec::new();
    for slot in &r.params {
        match slot {
            ParamSlot::Value { index } => args.push(Expr::param(*index)),
            ParamSlot::Leaves(leaves) => {
                let declarations = registry.require_declarations(leaves.class)?;
                args.push(declarations.box_call(leaves.params().map(Expr::param).collect()));
            }
        }
    }
    Ok(Expr::Call { function: r.original, receiver, args, type_args: Vec::new() })
}

/// How a value of the original body reads after rewriting
#[derive(Debug, Clone)]
enum Binding {
    /// Read through this value reference
    Value(ValueRef),
    /// An aggregate that now arrives as leaf expressions
    Leaves {
        declarations: Arc<SpecificDeclarations>,
        exprs: Vec<Expr>,
    },
}

struct Scope<'a, 'p> {
    registry: &'a MultiFieldValueClassReplacements<'p>,
    this: Binding,
    params: Vec<Binding>,
    /// Types of the original body's values
    types: TypeContext,
}

impl<'a, 'p> Scope<'a, 'p> {
    fn for_function(
        registry: &'a MultiFieldValueClassReplacements<'p>,
        function: DeclId,
        func: &FunctionDecl,
    ) -> Self {
        Self {
            registry,
            this: Binding::Value(ValueRef::This),
            params: (0..func.params.len()).map(|i| Binding::Value(ValueRef::Param(i))).collect(),
            types: TypeContext::for_function(registry.program(), function),
        }
    }

    /// Scope for moving the original's body into its replacement.
    fn for_replacement(
        registry: &'a MultiFieldValueClassReplacements<'p>,
        r: &Replacement,
        func: &FunctionDecl,
    ) -> Result<Self> {
        let leaves = |class: DeclId, range: std::ops::Range<usize>| -> Result<Binding> {
            Ok(Binding::Leaves {
                declarations: registry.require_declarations(class)?,
                exprs: range.map(Expr::param).collect(),
            })
        };
        let this = match &r.receiver {
            Some(slot) => leaves(slot.class, slot.range.clone())?,
            None => Binding::Value(ValueRef::This),
        };
        let params = r
            .params
            .iter()
            .map(|slot| match slot {
                ParamSlot::Value { index } => Ok(Binding::Value(ValueRef::Param(*index))),
                ParamSlot::Leaves(s) => leaves(s.class, s.range.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        debug_assert_eq!(params.len(), func.params.len());
        Ok(Self {
            registry,
            this,
            params,
            types: TypeContext::for_function(registry.program(), r.original),
        })
    }

    fn body(&mut self, body: &Body) -> Result<Body> {
        match body {
            Body::Expr(expr) => Ok(Body::Expr(self.expr(expr)?)),
            Body::Block(stmts) => {
                let mut out = Vec::with_capacity(stmts.len());
                for stmt in stmts {
                    out.push(self.stmt(stmt)?);
                    self.types.declare(stmt);
                }
                Ok(Body::Block(out))
            }
        }
    }

    fn stmt(&self, stmt: &Stmt) -> Result<Stmt> {
        Ok(match stmt {
            Stmt::Let { id, name, ty, init } => Stmt::Let {
                id: *id,
                name: name.clone(),
                ty: ty.clone(),
                init: self.expr(init)?,
            },
            Stmt::Expr { expr } => Stmt::expr(self.expr(expr)?),
            Stmt::Return { value } => Stmt::Return {
                value: value.as_ref().map(|v| self.expr(v)).transpose()?,
            },
        })
    }

    fn binding(&self, value: &ValueRef) -> Option<&Binding> {
        match value {
            ValueRef::This => Some(&self.this),
            ValueRef::Param(i) => self.params.get(*i),
            ValueRef::Local(_) => None,
        }
    }

    fn exprs(&self, exprs: &[Expr]) -> Result<Vec<Expr>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&self, expr: &Option<Box<Expr>>) -> Result<Option<Box<Expr>>> {
        expr.as_deref().map(|e| self.expr(e).map(Box::new)).transpose()
    }

    fn expr(&self, expr: &Expr) -> Result<Expr> {
        let registry = self.registry;
        Ok(match expr {
            Expr::Const { .. } => expr.clone(),
            Expr::FunctionReference { function } => {
                if registry.decision_for(*function)?.replacement().is_some() {
                    return Err(LoweringError::unsupported(
                        DiagnosticCode::UnsupportedFunctionReference,
                        format!(
                            "reference to `{}`, which was replaced to take multi-field value class leaves",
                            registry.program().qualified_name(*function)
                        ),
                    ));
                }
                expr.clone()
            }
            Expr::Get { value } => match self.binding(value) {
                Some(Binding::Leaves { declarations, exprs }) => declarations.box_call(exprs.clone()),
                Some(Binding::Value(moved)) => Expr::Get { value: *moved },
                None => expr.clone(),
            },
            Expr::Set { target, value } => {
                let target = match self.binding(target) {
                    Some(Binding::Leaves { .. }) => {
                        return Err(LoweringError::unsupported(
                            DiagnosticCode::UnsupportedFeature,
                            "assignment to a multi-field value class parameter",
                        ))
                    }
                    Some(Binding::Value(moved)) => *moved,
                    None => *target,
                };
                Expr::Set { target, value: Box::new(self.expr(value)?) }
            }
            Expr::GetField { field, receiver } => match registry.removed_field(*field)? {
                Some(removed) => self.removed_field_read(&removed, receiver)?,
                None => Expr::GetField { field: *field, receiver: self.boxed(receiver)? },
            },
            Expr::SetField { field, receiver, value } => {
                if registry.removed_field(*field)?.is_some() {
                    return Err(LoweringError::unsupported(
                        DiagnosticCode::UnsupportedFieldWrite,
                        format!(
                            "cannot assign `{}`: multi-field value class fields are immutable",
                            registry.program().qualified_name(*field)
                        ),
                    ));
                }
                Expr::SetField {
                    field: *field,
                    receiver: self.boxed(receiver)?,
                    value: Box::new(self.expr(value)?),
                }
            }
            Expr::Call { function, receiver, args, type_args } => {
                if receiver.is_some() {
                    if let Some(removed) = registry.removed_getter(*function)? {
                        return self.removed_field_read(&removed, receiver);
                    }
                }
                match registry.decision_for(*function)? {
                    Decision::NoReplacement => Expr::Call {
                        function: *function,
                        receiver: self.boxed(receiver)?,
                        args: self.exprs(args)?,
                        type_args: type_args.clone(),
                    },
                    Decision::StaticReplacement(r) => {
                        let mut leaves = match (&r.receiver, receiver.as_deref()) {
                            (Some(slot), Some(recv)) => self.expand(recv, slot.class)?,
                            (None, None) => Vec::new(),
                            _ => {
                                return Err(LoweringError::internal(format!(
                                    "receiver mismatch calling static replacement of `{}`",
                                    registry.program().qualified_name(*function)
                                )))
                            }
                        };
                        leaves.extend(self.args(&r, args)?);
                        Expr::Call {
                            function: r.function,
                            receiver: None,
                            args: leaves,
                            type_args: type_args.clone(),
                        }
                    }
                    Decision::MethodReplacement(r) => Expr::Call {
                        function: r.function,
                        receiver: self.boxed(receiver)?,
                        args: self.args(&r, args)?,
                        type_args: type_args.clone(),
                    },
                }
            }
            Expr::ConstructorCall { constructor, args, type_args } => {
                match registry.removed_primary_constructor(*constructor)? {
                    Some(declarations) => Expr::ConstructorCall {
                        constructor: declarations.primary_constructor,
                        args: self.constructor_leaves(&declarations, args)?,
                        type_args: type_args.clone(),
                    },
                    None => Expr::ConstructorCall {
                        constructor: *constructor,
                        args: self.exprs(args)?,
                        type_args: type_args.clone(),
                    },
                }
            }
            Expr::Equals { left, right } => match self.aggregate_equality(left, right)? {
                Some(declarations) => {
                    let class = declarations.value_class;
                    declarations.equals_call(self.expand(left, class)?, self.expand(right, class)?)
                }
                None => Expr::equals(self.expr(left)?, self.expr(right)?),
            },
            Expr::AndAnd { left, right } => Expr::and_and(self.expr(left)?, self.expr(right)?),
            Expr::Intrinsic { op, args } => Expr::intrinsic(*op, self.exprs(args)?),
        })
    }

    /// Both operands have the same multi-field value class type.
    fn aggregate_equality(&self, left: &Expr, right: &Expr) -> Result<Option<Arc<SpecificDeclarations>>> {
        let program = self.registry.program();
        let class_of = |e: &Expr| {
            program
                .type_of(e, &self.types)
                .and_then(|t| program.multi_field_value_class_of(&t))
        };
        match (class_of(left), class_of(right)) {
            (Some(a), Some(b)) if a == b => Ok(Some(self.registry.require_declarations(a)?)),
            _ => Ok(None),
        }
    }

    /// Arguments for a replacement, aggregates expanded per slot.
    fn args(&self, r: &Replacement, args: &[Expr]) -> Result<Vec<Expr>> {
        if args.len() != r.params.len() {
            return Err(LoweringError::malformed(format!(
                "`{}` called with {} arguments, expected {}",
                self.registry.program().qualified_name(r.original),
                args.len(),
                r.params.len()
            )));
        }
        let mut out = Vec::new();
        for (arg, slot) in args.iter().zip(&r.params) {
            match slot {
                ParamSlot::Value { .. } => out.push(self.expr(arg)?),
                ParamSlot::Leaves(leaves) => out.extend(self.expand(arg, leaves.class)?),
            }
        }
        Ok(out)
    }

    /// Leaves for an old-shape constructor call's arguments.
    fn constructor_leaves(&self, declarations: &SpecificDeclarations, args: &[Expr]) -> Result<Vec<Expr>> {
        let program = self.registry.program();
        if args.len() != declarations.old_fields.len() {
            return Err(LoweringError::malformed(format!(
                "constructor of `{}` called with {} arguments, expected {}",
                program.qualified_name(declarations.value_class),
                args.len(),
                declarations.old_fields.len()
            )));
        }
        let mut out = Vec::new();
        for (arg, field) in args.iter().zip(&declarations.old_fields) {
            match self.nested_class(*field) {
                Some(inner) => out.extend(self.expand(arg, inner)?),
                None => out.push(self.expr(arg)?),
            }
        }
        Ok(out)
    }

    /// Value class an old field's type refers to.
    fn nested_class(&self, field: DeclId) -> Option<DeclId> {
        let program = self.registry.program();
        program
            .get(field)
            .as_field()
            .and_then(|f| program.multi_field_value_class_of(&f.ty))
    }

    fn removed_field_read(&self, removed: &RemovedField, receiver: &Option<Box<Expr>>) -> Result<Expr> {
        let slice = self.field_leaves(removed, receiver)?;
        match self.nested_class(removed.field) {
            Some(inner) => Ok(self.registry.require_declarations(inner)?.box_call(slice)),
            None => slice
                .into_iter()
                .next()
                .ok_or_else(|| LoweringError::internal("field without leaves")),
        }
    }

    /// Leaf expressions of an expression whose type is `class`.
    fn expand(&self, expr: &Expr, class: DeclId) -> Result<Vec<Expr>> {
        let registry = self.registry;
        let declarations = registry.require_declarations(class)?;
        match expr {
            Expr::Get { value } => {
                if let Some(Binding::Leaves { declarations: d, exprs }) = self.binding(value) {
                    if d.value_class == class {
                        return Ok(exprs.clone());
                    }
                }
            }
            Expr::ConstructorCall { constructor, args, .. } => {
                if *constructor == declarations.old_primary_constructor {
                    return self.constructor_leaves(&declarations, args);
                }
                if *constructor == declarations.primary_constructor {
                    return self.exprs(args);
                }
            }
            Expr::Call { function, receiver, args, .. } => {
                if *function == declarations.box_method {
                    return self.exprs(args);
                }
                if receiver.is_some() {
                    if let Some(removed) = registry.removed_getter(*function)? {
                        if self.nested_class(removed.field) == Some(class) {
                            return self.field_leaves(&removed, receiver);
                        }
                    }
                }
            }
            Expr::GetField { field, receiver } => {
                if let Some(removed) = registry.removed_field(*field)? {
                    if self.nested_class(removed.field) == Some(class) {
                        return self.field_leaves(&removed, receiver);
                    }
                }
            }
            _ => {}
        }

        let value = self.expr(expr)?;
        if value.is_pure() {
            return Ok(declarations.unbox_calls(&value));
        }
        Err(LoweringError::unsupported(
            DiagnosticCode::UnsupportedReceiver,
            format!(
                "cannot split `{}` into the leaves of `{}`; bind it to a local first",
                render_expr(registry.program(), expr, &[]),
                registry.program().qualified_name(class)
            ),
        ))
    }

    /// Leaves of a removed field, sliced out of the receiver's leaves.
    ///
    /// The other leaves are dropped, so each of them must be free of side
    /// effects.
    fn field_leaves(&self, removed: &RemovedField, receiver: &Option<Box<Expr>>) -> Result<Vec<Expr>> {
        let receiver = receiver.as_deref().ok_or_else(|| {
            LoweringError::malformed("read of a multi-field value class field without a receiver")
        })?;
        let leaves = self.expand(receiver, removed.declarations.value_class)?;
        if removed.leaves.end > leaves.len() {
            return Err(LoweringError::internal("leaf range out of bounds"));
        }
        for (index, leaf) in leaves.iter().enumerate() {
            if !removed.leaves.contains(&index) && !self.is_discardable(leaf)? {
                return Err(LoweringError::unsupported(
                    DiagnosticCode::UnsupportedReceiver,
                    format!(
                        "reading `{}` from `{}` would skip evaluating `{}`; bind the value to a local first",
                        self.registry.program().qualified_name(removed.field),
                        render_expr(self.registry.program(), receiver, &[]),
                        render_expr(self.registry.program(), leaf, &[])
                    ),
                ));
            }
        }
        Ok(leaves[removed.leaves.clone()].to_vec())
    }

    /// Pure leaves and unbox calls on pure values can be dropped unevaluated.
    fn is_discardable(&self, leaf: &Expr) -> Result<bool> {
        if leaf.is_pure() {
            return Ok(true);
        }
        if let Expr::Call { function, receiver: Some(receiver), args, .. } = leaf {
            if args.is_empty() && receiver.is_pure() {
                if let Some(class) = self.registry.program().parent_class(*function) {
                    if let Some(declarations) = self.registry.declarations_for(class)? {
                        return Ok(declarations.unbox_methods.contains(function));
                    }
                }
            }
        }
        Ok(false)
    }
}
