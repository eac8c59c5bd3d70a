//! Specific declarations of a multi-field value class
//!
//! Everything a class needs once it is represented by its leaves: one field
//! per leaf, replacement properties, a primary constructor over the leaves
//! with an `impl` function holding the relocated initializer code, a box
//! function, one unbox function per leaf and a leaf-wise equality.
//!
//! Building only allocates declarations. Nothing is attached to the class
//! here; the lowering pass performs the swap.

use crate::error::{LoweringError, Result};
use crate::registry::MultiFieldValueClassReplacements;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use vlower_diagnostics::DiagnosticCode;
use vlower_ir::builder::signature;
use vlower_ir::{
    Body, DeclKind, Expr, FieldDecl, FunctionDecl, FunctionKind, Origin, Param, Program,
    PropertyDecl, Stmt, ValueRef,
};
use vlower_types::{DeclId, Type};

/// A non-aggregate value reached by flattening nested aggregate fields
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Field names along the path, joined with `-`
    pub name: String,
    pub ty: Type,
    /// Original fields from the outer class down to the leaf
    pub path: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementProperty {
    pub property: DeclId,
    pub getter: Option<DeclId>,
    pub old_property: DeclId,
    pub old_getter: Option<DeclId>,
    /// Leaves the property exposes
    pub leaves: Range<usize>,
}

#[derive(Debug)]
pub struct SpecificDeclarations {
    pub value_class: DeclId,
    pub type_params: Vec<String>,
    pub leaves: Vec<Leaf>,
    /// New fields, one per leaf
    pub fields: Vec<DeclId>,
    pub old_fields: Vec<DeclId>,
    /// Leaves that replace each old field
    pub field_ranges: HashMap<DeclId, Range<usize>>,
    /// Keyed by property name
    pub properties: HashMap<String, ReplacementProperty>,
    pub old_primary_constructor: DeclId,
    pub primary_constructor: DeclId,
    pub primary_constructor_impl: DeclId,
    pub box_method: DeclId,
    pub unbox_methods: Vec<DeclId>,
    pub specialized_equals: DeclId,
}

impl SpecificDeclarations {
    /// Leaf names and types for a use of the class at type `ty`.
    pub fn leaf_types(&self, ty: &Type) -> Vec<(String, Type)> {
        let args = match ty {
            Type::Class { args, .. } => args.as_slice(),
            _ => &[],
        };
        self.leaves
            .iter()
            .map(|leaf| (leaf.name.clone(), leaf.ty.substitute(&self.type_params, args)))
            .collect()
    }

    pub fn box_call(&self, leaves: Vec<Expr>) -> Expr {
        Expr::call(self.box_method, leaves)
    }

    /// One unbox call per leaf on a boxed value. The receiver is cloned
    /// into every call and must be pure.
    pub fn unbox_calls(&self, receiver: &Expr) -> Vec<Expr> {
        self.unbox_methods
            .iter()
            .map(|unbox| Expr::call_method(*unbox, receiver.clone(), Vec::new()))
            .collect()
    }

    pub fn equals_call(&self, left: Vec<Expr>, right: Vec<Expr>) -> Expr {
        let mut args = left;
        args.extend(right);
        Expr::call(self.specialized_equals, args)
    }

    /// Every declaration this bundle created.
    pub fn generated(&self) -> Vec<DeclId> {
        let mut ids = self.fields.clone();
        for property in self.properties.values() {
            ids.push(property.property);
            ids.extend(property.getter);
        }
        ids.extend([self.primary_constructor, self.primary_constructor_impl, self.box_method]);
        ids.extend(&self.unbox_methods);
        ids.push(self.specialized_equals);
        ids.sort();
        ids
    }
}

pub fn build(
    registry: &MultiFieldValueClassReplacements<'_>,
    class: DeclId,
) -> Result<SpecificDeclarations> {
    let program = registry.program();
    let class_name = program.qualified_name(class);
    let class_decl = program
        .class(class)
        .ok_or_else(|| LoweringError::internal(format!("`{}` is not a class", class_name)))?;

    check_acyclic(registry, class, &mut Vec::new())?;
    let old_fields: Vec<DeclId> = registry.old_fields(class).to_vec();

    // Leaves, flattening nested aggregates through their own declarations.
    let mut leaves = Vec::new();
    let mut field_ranges = HashMap::new();
    let mut nested: Vec<Option<Arc<SpecificDeclarations>>> = Vec::new();
    for &field in &old_fields {
        let decl = program.get(field);
        let ty = decl
            .as_field()
            .map(|f| f.ty.clone())
            .ok_or_else(|| LoweringError::internal(format!("{} is not a field", field)))?;
        let start = leaves.len();
        match program.multi_field_value_class_of(&ty) {
            Some(inner_class) => {
                let inner = registry.require_declarations(inner_class)?;
                for (leaf, (name, leaf_ty)) in inner.leaves.iter().zip(inner.leaf_types(&ty)) {
                    let mut path = vec![field];
                    path.extend(&leaf.path);
                    leaves.push(Leaf { name: format!("{}-{}", decl.name, name), ty: leaf_ty, path });
                }
                nested.push(Some(inner));
            }
            None => {
                leaves.push(Leaf { name: decl.name.clone(), ty, path: vec![field] });
                nested.push(None);
            }
        }
        field_ranges.insert(field, start..leaves.len());
    }
    debug_assert!(!leaves.is_empty(), "multi-field value class without leaves");

    let old_primary_constructor = check_primary_constructor(program, class, &old_fields)
        .map_err(|e| e.in_context(class_name.clone()))?;

    let this_type = program.this_type(class);
    let type_params = class_decl.type_params.clone();
    let type_args: Vec<Type> = type_params.iter().map(Type::type_var).collect();
    let leaf_params: Vec<Param> =
        leaves.iter().map(|l| Param::new(l.name.clone(), l.ty.clone())).collect();
    let all_params = || (0..leaves.len()).map(Expr::param).collect::<Vec<_>>();
    let member = |name: String, kind: DeclKind| {
        program.alloc(name, Some(class), Origin::MultiFieldValueClassMember, kind)
    };
    let function = |params: Vec<Param>, return_type: Type, dispatch: bool, body: Option<Body>| {
        DeclKind::Function(FunctionDecl {
            params,
            body,
            type_params: if dispatch { Vec::new() } else { type_params.clone() },
            ..signature(&[], return_type, dispatch)
        })
    };

    let fields: Vec<DeclId> = leaves
        .iter()
        .map(|leaf| {
            member(
                leaf.name.clone(),
                DeclKind::Field(FieldDecl {
                    ty: leaf.ty.clone(),
                    is_static: false,
                    initializer: None,
                    property: None,
                }),
            )
        })
        .collect();

    // Constructor pair: `<init>(leaves)` calls `constructor-impl(leaves)`,
    // then stores each leaf.
    let relocation = Relocation { program, old_fields: &old_fields, field_ranges: &field_ranges, nested: &nested };
    let mut impl_body = Vec::new();
    for m in program.members(class) {
        if let Some(init) = program.get(m).as_initializer() {
            for stmt in &init.body {
                impl_body.push(relocation.stmt(stmt).map_err(|e| e.in_context(class_name.clone()))?);
            }
        }
    }
    let primary_constructor_impl = member(
        "constructor-impl".to_string(),
        function(leaf_params.clone(), Type::Unit, false, Some(Body::Block(impl_body))),
    );
    let mut ctor_body = vec![Stmt::expr(Expr::call(primary_constructor_impl, all_params()))];
    for (i, field) in fields.iter().enumerate() {
        ctor_body.push(Stmt::expr(Expr::set_field(*field, Expr::this(), Expr::param(i))));
    }
    let primary_constructor = member(
        "<init>".to_string(),
        DeclKind::Function(FunctionDecl {
            kind: FunctionKind::Constructor { is_primary: true },
            params: leaf_params.clone(),
            body: Some(Body::Block(ctor_body)),
            ..signature(&[], this_type.clone(), false)
        }),
    );

    let box_method = member(
        "box-impl".to_string(),
        function(
            leaf_params.clone(),
            this_type.clone(),
            false,
            Some(Body::Expr(Expr::ConstructorCall {
                constructor: primary_constructor,
                args: all_params(),
                type_args: type_args.clone(),
            })),
        ),
    );

    let unbox_methods: Vec<DeclId> = leaves
        .iter()
        .zip(&fields)
        .map(|(leaf, field)| {
            member(
                format!("unbox-impl-{}", leaf.name),
                function(
                    Vec::new(),
                    leaf.ty.clone(),
                    true,
                    Some(Body::Expr(Expr::get_field(*field, Expr::this()))),
                ),
            )
        })
        .collect();

    // Leaf-wise equality, left leaves first, folded left to right.
    let n = leaves.len();
    let mut equals_params: Vec<Param> =
        leaves.iter().map(|l| Param::new(format!("left-{}", l.name), l.ty.clone())).collect();
    equals_params.extend(leaves.iter().map(|l| Param::new(format!("right-{}", l.name), l.ty.clone())));
    let equality = (0..n)
        .map(|i| Expr::equals(Expr::param(i), Expr::param(n + i)))
        .reduce(Expr::and_and)
        .ok_or_else(|| LoweringError::internal(format!("`{}` has no leaves", class_name)))?;
    let specialized_equals = member(
        "equals-impl0".to_string(),
        function(equals_params, Type::Boolean, false, Some(Body::Expr(equality))),
    );

    let properties = build_properties(program, class, &old_fields, &fields, &field_ranges, &nested)?;

    Ok(SpecificDeclarations {
        value_class: class,
        type_params,
        leaves,
        fields,
        old_fields,
        field_ranges,
        properties,
        old_primary_constructor,
        primary_constructor,
        primary_constructor_impl,
        box_method,
        unbox_methods,
        specialized_equals,
    })
}

/// Value classes cannot contain themselves, directly or through another
/// value class.
fn check_acyclic(
    registry: &MultiFieldValueClassReplacements<'_>,
    class: DeclId,
    stack: &mut Vec<DeclId>,
) -> Result<()> {
    let program = registry.program();
    if stack.contains(&class) {
        return Err(LoweringError::malformed(format!(
            "value class `{}` contains itself",
            program.qualified_name(class)
        )));
    }
    stack.push(class);
    for field in registry.old_fields(class).iter() {
        let inner = program
            .get(*field)
            .as_field()
            .and_then(|f| program.multi_field_value_class_of(&f.ty));
        if let Some(inner) = inner {
            check_acyclic(registry, inner, stack)?;
        }
    }
    stack.pop();
    Ok(())
}

/// The primary constructor must take exactly the fields, in order, and
/// have nothing of its own to run.
fn check_primary_constructor(program: &Program, class: DeclId, old_fields: &[DeclId]) -> Result<DeclId> {
    let ctor = program.primary_constructor(class).ok_or_else(|| {
        LoweringError::unsupported(DiagnosticCode::UnsupportedFeature, "value class has no primary constructor")
    })?;
    let func = program
        .function(ctor)
        .ok_or_else(|| LoweringError::internal("primary constructor is not a function"))?;

    let one_to_one = func.params.len() == old_fields.len()
        && old_fields.iter().enumerate().all(|(i, field)| {
            program
                .get(*field)
                .as_field()
                .map_or(false, |f| f.initializer.as_ref() == Some(&Expr::param(i)))
        });
    if !one_to_one {
        return Err(LoweringError::unsupported(
            DiagnosticCode::UnsupportedFeature,
            "primary constructor parameters must initialize the fields one to one",
        ));
    }

    match &func.body {
        None => Ok(ctor),
        Some(Body::Block(stmts)) if stmts.is_empty() => Ok(ctor),
        Some(_) => Err(LoweringError::unsupported(
            DiagnosticCode::UnsupportedInitializer,
            "primary constructor body cannot be relocated",
        )),
    }
}

fn build_properties(
    program: &Program,
    class: DeclId,
    old_fields: &[DeclId],
    fields: &[DeclId],
    field_ranges: &HashMap<DeclId, Range<usize>>,
    nested: &[Option<Arc<SpecificDeclarations>>],
) -> Result<HashMap<String, ReplacementProperty>> {
    let mut properties = HashMap::new();

    for m in program.members(class) {
        let old = program.get(m);
        let Some(property) = old.as_property() else { continue };
        let Some(backing) = property.backing_field.filter(|f| old_fields.contains(f)) else {
            continue;
        };
        let range = field_ranges[&backing].clone();
        let inner = old_fields
            .iter()
            .position(|f| *f == backing)
            .and_then(|i| nested.get(i).cloned().flatten());

        let new_property = program.alloc(
            old.name.clone(),
            Some(class),
            old.origin.clone(),
            DeclKind::Property(PropertyDecl {
                ty: property.ty.clone(),
                getter: None,
                backing_field: if inner.is_none() { Some(fields[range.start]) } else { None },
            }),
        );

        let getter = match property.getter {
            None => None,
            Some(old_getter) => {
                let name = program.get(old_getter).name.clone();
                let (origin, body) = match &inner {
                    None => (
                        Origin::DefaultPropertyAccessor,
                        Expr::get_field(fields[range.start], Expr::this()),
                    ),
                    Some(inner) => (
                        Origin::MultiFieldValueClassMember,
                        Expr::Call {
                            function: inner.box_method,
                            receiver: None,
                            args: range.clone().map(|k| Expr::get_field(fields[k], Expr::this())).collect(),
                            type_args: match &property.ty {
                                Type::Class { args, .. } => args.clone(),
                                _ => Vec::new(),
                            },
                        },
                    ),
                };
                Some(program.alloc(
                    name,
                    Some(class),
                    origin,
                    DeclKind::Function(FunctionDecl {
                        property: Some(new_property),
                        body: Some(Body::Expr(body)),
                        ..signature(&[], property.ty.clone(), true)
                    }),
                ))
            }
        };

        program.update(new_property, |decl| {
            if let DeclKind::Property(p) = &mut decl.kind {
                p.getter = getter;
            }
        });
        if inner.is_none() {
            program.update(fields[range.start], |decl| {
                if let DeclKind::Field(f) = &mut decl.kind {
                    f.property = Some(new_property);
                }
            });
        }

        properties.insert(
            old.name.clone(),
            ReplacementProperty {
                property: new_property,
                getter,
                old_property: m,
                old_getter: property.getter,
                leaves: range,
            },
        );
    }
    Ok(properties)
}

/// Moves initializer statements into `constructor-impl`, whose parameters
/// are the leaves. Reads of the constructor parameters and of `this`'s own
/// fields become leaf parameters (or a box over them); any other use of
/// `this` has no object to refer to.
struct Relocation<'a> {
    program: &'a Program,
    old_fields: &'a [DeclId],
    field_ranges: &'a HashMap<DeclId, Range<usize>>,
    nested: &'a [Option<Arc<SpecificDeclarations>>],
}

impl Relocation<'_> {
    fn stmt(&self, stmt: &Stmt) -> Result<Stmt> {
        Ok(match stmt {
            Stmt::Let { id, name, ty, init } => Stmt::Let {
                id: *id,
                name: name.clone(),
                ty: ty.clone(),
                init: self.expr(init)?,
            },
            Stmt::Expr { expr } => Stmt::expr(self.expr(expr)?),
            Stmt::Return { .. } => {
                return Err(LoweringError::unsupported(
                    DiagnosticCode::UnsupportedInitializer,
                    "`return` inside an initializer block",
                ))
            }
        })
    }

    /// Leaf parameters standing for old field `index`.
    fn field_value(&self, index: usize) -> Result<Expr> {
        let field = self
            .old_fields
            .get(index)
            .ok_or_else(|| LoweringError::internal(format!("no field for parameter {}", index)))?;
        let range = self.field_ranges[field].clone();
        Ok(match self.nested.get(index).and_then(Option::as_ref) {
            Some(inner) => inner.box_call(range.map(Expr::param).collect()),
            None => Expr::param(range.start),
        })
    }

    fn own_field_index(&self, field: DeclId) -> Option<usize> {
        self.old_fields.iter().position(|f| *f == field)
    }

    fn is_this(expr: &Option<Box<Expr>>) -> bool {
        matches!(expr.as_deref(), Some(Expr::Get { value: ValueRef::This }))
    }

    fn exprs(&self, exprs: &[Expr]) -> Result<Vec<Expr>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&self, expr: &Option<Box<Expr>>) -> Result<Option<Box<Expr>>> {
        expr.as_deref().map(|e| self.expr(e).map(Box::new)).transpose()
    }

    fn expr(&self, expr: &Expr) -> Result<Expr> {
        Ok(match expr {
            Expr::Const { .. } => expr.clone(),
            Expr::Get { value } => match value {
                ValueRef::This => {
                    return Err(LoweringError::unsupported(
                        DiagnosticCode::UnsupportedInitializer,
                        "`this` cannot escape an initializer block of a multi-field value class",
                    ))
                }
                ValueRef::Param(i) => self.field_value(*i)?,
                ValueRef::Local(_) => expr.clone(),
            },
            Expr::Set { target, value } => match target {
                ValueRef::Local(_) => Expr::Set { target: *target, value: Box::new(self.expr(value)?) },
                _ => {
                    return Err(LoweringError::unsupported(
                        DiagnosticCode::UnsupportedInitializer,
                        "assignment to a constructor parameter inside an initializer block",
                    ))
                }
            },
            Expr::GetField { field, receiver } => match self.own_field_index(*field) {
                Some(index) if Self::is_this(receiver) => self.field_value(index)?,
                _ => Expr::GetField { field: *field, receiver: self.boxed(receiver)? },
            },
            Expr::SetField { field, receiver, value } => {
                if self.field_ranges.contains_key(field) {
                    return Err(LoweringError::unsupported(
                        DiagnosticCode::UnsupportedFieldWrite,
                        format!("cannot assign field `{}` of a multi-field value class", self.program.get(*field).name),
                    ));
                }
                Expr::SetField {
                    field: *field,
                    receiver: self.boxed(receiver)?,
                    value: Box::new(self.expr(value)?),
                }
            }
            Expr::Call { function, receiver, args, type_args } => {
                let own_getter = self
                    .program
                    .getter_backing_field(*function)
                    .and_then(|f| self.own_field_index(f));
                match own_getter {
                    Some(index) if Self::is_this(receiver) => self.field_value(index)?,
                    _ => Expr::Call {
                        function: *function,
                        receiver: self.boxed(receiver)?,
                        args: self.exprs(args)?,
                        type_args: type_args.clone(),
                    },
                }
            }
            Expr::ConstructorCall { constructor, args, type_args } => Expr::ConstructorCall {
                constructor: *constructor,
                args: self.exprs(args)?,
                type_args: type_args.clone(),
            },
            Expr::FunctionReference { .. } => expr.clone(),
            Expr::Equals { left, right } => Expr::equals(self.expr(left)?, self.expr(right)?),
            Expr::AndAnd { left, right } => Expr::and_and(self.expr(left)?, self.expr(right)?),
            Expr::Intrinsic { op, args } => Expr::intrinsic(*op, self.exprs(args)?),
        })
    }
}
