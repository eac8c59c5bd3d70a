//! Declaration arena
//!
//! The program is an append-only arena of declarations addressed by
//! [`DeclId`]. Slots hold `Arc<Declaration>`: readers take cheap snapshots,
//! writers copy-on-write under the arena lock. Structural swaps such as
//! "replace the fields of a class" are edits of the owning class's member
//! list, never moves of the declarations themselves.

use crate::ir::*;
use log::trace;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use vlower_types::{DeclId, LocalId, Type};

#[derive(Debug, Error)]
pub enum IrError {
    #[error("declaration {id} is stored at index {index}")]
    MisplacedDeclaration { id: DeclId, index: usize },
    #[error("declaration {from} refers to missing declaration {to}")]
    DanglingReference { from: DeclId, to: DeclId },
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Plain serializable mirror of a [`Program`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramData {
    pub decls: Vec<Declaration>,
    /// Top-level declarations in order
    pub roots: Vec<DeclId>,
}

impl ProgramData {
    pub fn from_json(text: &str) -> Result<Self, IrError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
pub struct Program {
    decls: RwLock<Vec<Arc<Declaration>>>,
    roots: RwLock<Vec<DeclId>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a program from its serialized form, checking that every
    /// declaration reference resolves.
    pub fn from_data(data: ProgramData) -> Result<Self, IrError> {
        let len = data.decls.len();
        let check = |from: DeclId, to: DeclId| {
            if to.index() < len {
                Ok(())
            } else {
                Err(IrError::DanglingReference { from, to })
            }
        };

        for (index, decl) in data.decls.iter().enumerate() {
            if decl.id.index() != index {
                return Err(IrError::MisplacedDeclaration { id: decl.id, index });
            }
            if let Some(parent) = decl.parent {
                check(decl.id, parent)?;
            }
            for referenced in direct_references(decl).into_iter().chain(nested_references(decl)) {
                check(decl.id, referenced)?;
            }
        }
        for root in &data.roots {
            check(*root, *root)?;
        }

        Ok(Self {
            decls: RwLock::new(data.decls.into_iter().map(Arc::new).collect()),
            roots: RwLock::new(data.roots),
        })
    }

    pub fn to_data(&self) -> ProgramData {
        ProgramData {
            decls: self.decls.read().iter().map(|d| (**d).clone()).collect(),
            roots: self.roots.read().clone(),
        }
    }

    /// Append a declaration and return its id.
    pub fn alloc(
        &self,
        name: impl Into<String>,
        parent: Option<DeclId>,
        origin: Origin,
        kind: DeclKind,
    ) -> DeclId {
        let mut decls = self.decls.write();
        let id = DeclId(decls.len() as u32);
        let name = name.into();
        trace!("alloc {} `{}`", id, name);
        decls.push(Arc::new(Declaration { id, name, parent, origin, kind }));
        id
    }

    /// Snapshot of a declaration.
    ///
    /// Ids are only minted by this arena, so an out-of-range id is a
    /// compiler bug and panics like any out-of-bounds index.
    pub fn get(&self, id: DeclId) -> Arc<Declaration> {
        Arc::clone(&self.decls.read()[id.index()])
    }

    pub fn try_get(&self, id: DeclId) -> Option<Arc<Declaration>> {
        self.decls.read().get(id.index()).cloned()
    }

    /// Mutate a declaration in place (copy-on-write if snapshots are alive).
    pub fn update<R>(&self, id: DeclId, f: impl FnOnce(&mut Declaration) -> R) -> R {
        let mut decls = self.decls.write();
        f(Arc::make_mut(&mut decls[id.index()]))
    }

    pub fn len(&self) -> usize {
        self.decls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids allocated so far.
    pub fn ids(&self) -> Vec<DeclId> {
        (0..self.len() as u32).map(DeclId).collect()
    }

    pub fn roots(&self) -> Vec<DeclId> {
        self.roots.read().clone()
    }

    pub fn add_root(&self, id: DeclId) {
        self.roots.write().push(id);
    }

    /// Append `member` to `owner`'s member list, or to the roots when there
    /// is no owner, and point its parent at the owner.
    pub fn attach(&self, owner: Option<DeclId>, member: DeclId) {
        match owner {
            Some(class) => {
                self.update(class, |decl| {
                    if let Some(c) = decl.as_class_mut() {
                        c.members.push(member);
                    }
                });
            }
            None => self.add_root(member),
        }
        self.update(member, |decl| decl.parent = owner);
    }

    pub fn class(&self, id: DeclId) -> Option<ClassDecl> {
        self.get(id).as_class().cloned()
    }

    pub fn function(&self, id: DeclId) -> Option<FunctionDecl> {
        self.get(id).as_function().cloned()
    }

    pub fn members(&self, class: DeclId) -> Vec<DeclId> {
        self.get(class)
            .as_class()
            .map(|c| c.members.clone())
            .unwrap_or_default()
    }

    /// Class owning this declaration, if the parent is a class.
    pub fn parent_class(&self, id: DeclId) -> Option<DeclId> {
        let parent = self.get(id).parent?;
        self.get(parent).as_class().map(|_| parent)
    }

    /// Dotted path from the root, e.g. `Point.sum`.
    pub fn qualified_name(&self, id: DeclId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        let mut seen = HashSet::new();
        while let Some(cur) = current {
            if !seen.insert(cur) {
                break;
            }
            let decl = self.get(cur);
            parts.push(decl.name.clone());
            current = decl.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    // ---- value class predicates ----

    pub fn value_repr(&self, class: DeclId) -> Option<ValueRepr> {
        self.get(class).as_class().and_then(|c| c.value_repr)
    }

    pub fn is_value_class(&self, class: DeclId) -> bool {
        self.value_repr(class).is_some()
    }

    pub fn is_multi_field_value_class(&self, class: DeclId) -> bool {
        self.value_repr(class) == Some(ValueRepr::MultiField)
    }

    pub fn is_multi_field_value_class_type(&self, ty: &Type) -> bool {
        self.multi_field_value_class_of(ty).is_some()
    }

    /// The multi-field value class a (non-nullable) type refers to.
    pub fn multi_field_value_class_of(&self, ty: &Type) -> Option<DeclId> {
        ty.class_id()
            .filter(|id| id.index() < self.len() && self.is_multi_field_value_class(*id))
    }

    /// Single-field wrappers are handled by a different lowering.
    pub fn is_inline_class_type(&self, ty: &Type) -> bool {
        ty.class_id()
            .map_or(false, |id| self.value_repr(id) == Some(ValueRepr::Inline))
    }

    /// Type of `this` inside the class.
    pub fn this_type(&self, class: DeclId) -> Type {
        let args = self
            .get(class)
            .as_class()
            .map(|c| c.type_params.iter().map(Type::type_var).collect())
            .unwrap_or_default();
        Type::Class { id: class, args }
    }

    // ---- member queries ----

    /// Instance fields of a class, in member order.
    pub fn fields(&self, class: DeclId) -> Vec<DeclId> {
        self.members(class)
            .into_iter()
            .filter(|m| self.get(*m).is_instance_field())
            .collect()
    }

    pub fn primary_constructor(&self, class: DeclId) -> Option<DeclId> {
        self.members(class).into_iter().find(|m| {
            self.get(*m)
                .as_function()
                .map_or(false, FunctionDecl::is_primary_constructor)
        })
    }

    /// A getter generated for a property with an instance backing field.
    pub fn is_field_getter(&self, function: DeclId) -> bool {
        self.getter_backing_field(function).is_some()
    }

    /// Backing field read by a generated property getter.
    pub fn getter_backing_field(&self, function: DeclId) -> Option<DeclId> {
        let decl = self.get(function);
        if decl.origin != Origin::DefaultPropertyAccessor {
            return None;
        }
        let func = decl.as_function()?;
        if !func.has_dispatch_receiver || !func.params.is_empty() {
            return None;
        }
        let property = self.get(func.property?);
        let field = property.as_property()?.backing_field?;
        self.get(field).is_instance_field().then_some(field)
    }

    /// Getter of a multi-field value class's own field.
    pub fn is_multi_field_value_class_field_getter(&self, function: DeclId) -> bool {
        self.parent_class(function)
            .map_or(false, |class| self.is_multi_field_value_class(class))
            && self.is_field_getter(function)
    }

    /// Follow fake overrides down to the declaration that has a real body
    /// (or is abstract).
    pub fn resolve_fake_override(&self, function: DeclId) -> Option<DeclId> {
        let mut current = function;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return None;
            }
            let func = self.function(current)?;
            if !func.is_fake_override {
                return Some(current);
            }
            current = *func.overridden.first()?;
        }
    }

    /// Whether `function` overrides `target`, directly or transitively.
    pub fn overrides(&self, function: DeclId, target: DeclId) -> bool {
        let mut stack = vec![function];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(func) = self.function(current) {
                stack.extend(func.overridden.iter().copied());
            }
        }
        false
    }

    /// Every function declaration currently in the arena.
    pub fn functions(&self) -> Vec<DeclId> {
        self.decls
            .read()
            .iter()
            .filter(|d| d.as_function().is_some())
            .map(|d| d.id)
            .collect()
    }

    pub fn classes(&self) -> Vec<DeclId> {
        self.decls
            .read()
            .iter()
            .filter(|d| d.as_class().is_some())
            .map(|d| d.id)
            .collect()
    }
}

/// Types of the values a body can read
#[derive(Debug, Clone, Default)]
pub struct TypeContext {
    pub this: Option<Type>,
    pub params: Vec<Type>,
    pub locals: HashMap<LocalId, Type>,
}

impl TypeContext {
    /// Context at the entry of `function`'s body.
    pub fn for_function(program: &Program, function: DeclId) -> Self {
        let decl = program.get(function);
        let Some(func) = decl.as_function() else {
            return Self::default();
        };
        let this = if func.has_dispatch_receiver || func.is_constructor() {
            program.parent_class(function).map(|c| program.this_type(c))
        } else {
            None
        };
        Self {
            this,
            params: func.params.iter().map(|p| p.ty.clone()).collect(),
            locals: HashMap::new(),
        }
    }

    /// Record the local introduced by a statement, if any.
    pub fn declare(&mut self, stmt: &Stmt) {
        if let Stmt::Let { id, ty, .. } = stmt {
            self.locals.insert(*id, ty.clone());
        }
    }
}

impl Program {
    /// Whether the declaration is still reachable from the roots through
    /// member lists. Declarations swapped out of a class stay in the arena
    /// but are no longer attached.
    pub fn is_attached(&self, id: DeclId) -> bool {
        match self.get(id).parent {
            Some(parent) => self.members(parent).contains(&id) && self.is_attached(parent),
            None => self.roots.read().contains(&id),
        }
    }

    /// Static type of an expression.
    pub fn type_of(&self, expr: &Expr, ctx: &TypeContext) -> Option<Type> {
        match expr {
            Expr::Const { value } => Some(match value {
                Literal::Unit => Type::Unit,
                Literal::Null => Type::Nothing.nullable(),
                Literal::Bool(_) => Type::Boolean,
                Literal::Int(_) => Type::Int,
                Literal::Double(_) => Type::Double,
                Literal::String(_) => Type::String,
            }),
            Expr::Get { value } => match value {
                ValueRef::This => ctx.this.clone(),
                ValueRef::Param(i) => ctx.params.get(*i).cloned(),
                ValueRef::Local(id) => ctx.locals.get(id).cloned(),
            },
            Expr::GetField { field, .. } => self.get(*field).as_field().map(|f| f.ty.clone()),
            Expr::Call { function, .. } => {
                self.get(*function).as_function().map(|f| f.return_type.clone())
            }
            Expr::ConstructorCall { constructor, type_args, .. } => {
                let class = self.parent_class(*constructor)?;
                if type_args.is_empty() {
                    Some(self.this_type(class))
                } else {
                    Some(Type::Class { id: class, args: type_args.clone() })
                }
            }
            Expr::FunctionReference { .. } => Some(Type::Any),
            Expr::Equals { .. } | Expr::AndAnd { .. } => Some(Type::Boolean),
            Expr::Set { .. } | Expr::SetField { .. } => Some(Type::Unit),
            Expr::Intrinsic { op, .. } => Some(match op {
                Intrinsic::Add | Intrinsic::Sub => Type::Int,
                Intrinsic::Concat => Type::String,
                Intrinsic::Print => Type::Unit,
            }),
        }
    }
}

/// Declarations named by a declaration's own fields (not by its bodies).
fn direct_references(decl: &Declaration) -> Vec<DeclId> {
    match &decl.kind {
        DeclKind::Class(c) => c.members.iter().chain(&c.supertypes).copied().collect(),
        DeclKind::Function(f) => f.overridden.iter().copied().chain(f.property).collect(),
        DeclKind::Field(f) => f.property.into_iter().collect(),
        DeclKind::Property(p) => p.getter.into_iter().chain(p.backing_field).collect(),
        DeclKind::Initializer(_) => Vec::new(),
    }
}

/// Declarations named inside a declaration's types, bodies and initializers.
fn nested_references(decl: &Declaration) -> Vec<DeclId> {
    let mut out = Vec::new();
    match &decl.kind {
        DeclKind::Class(_) => {}
        DeclKind::Function(f) => {
            for param in &f.params {
                type_references(&param.ty, &mut out);
            }
            type_references(&f.return_type, &mut out);
            match &f.body {
                Some(Body::Expr(expr)) => expr_references(expr, &mut out),
                Some(Body::Block(stmts)) => stmts.iter().for_each(|s| stmt_references(s, &mut out)),
                None => {}
            }
        }
        DeclKind::Field(f) => {
            type_references(&f.ty, &mut out);
            if let Some(init) = &f.initializer {
                expr_references(init, &mut out);
            }
        }
        DeclKind::Property(p) => type_references(&p.ty, &mut out),
        DeclKind::Initializer(init) => init.body.iter().for_each(|s| stmt_references(s, &mut out)),
    }
    out
}

fn type_references(ty: &Type, out: &mut Vec<DeclId>) {
    match ty {
        Type::Class { id, args } => {
            out.push(*id);
            args.iter().for_each(|a| type_references(a, out));
        }
        Type::Nullable { inner } => type_references(inner, out),
        _ => {}
    }
}

fn stmt_references(stmt: &Stmt, out: &mut Vec<DeclId>) {
    match stmt {
        Stmt::Let { ty, init, .. } => {
            type_references(ty, out);
            expr_references(init, out);
        }
        Stmt::Expr { expr } => expr_references(expr, out),
        Stmt::Return { value } => {
            if let Some(value) = value {
                expr_references(value, out);
            }
        }
    }
}

fn expr_references(expr: &Expr, out: &mut Vec<DeclId>) {
    match expr {
        Expr::Const { .. } | Expr::Get { .. } => {}
        Expr::Set { value, .. } => expr_references(value, out),
        Expr::GetField { field, receiver } => {
            out.push(*field);
            if let Some(receiver) = receiver {
                expr_references(receiver, out);
            }
        }
        Expr::SetField { field, receiver, value } => {
            out.push(*field);
            if let Some(receiver) = receiver {
                expr_references(receiver, out);
            }
            expr_references(value, out);
        }
        Expr::Call { function, receiver, args, type_args } => {
            out.push(*function);
            if let Some(receiver) = receiver {
                expr_references(receiver, out);
            }
            args.iter().for_each(|a| expr_references(a, out));
            type_args.iter().for_each(|t| type_references(t, out));
        }
        Expr::ConstructorCall { constructor, args, type_args } => {
            out.push(*constructor);
            args.iter().for_each(|a| expr_references(a, out));
            type_args.iter().for_each(|t| type_references(t, out));
        }
        Expr::FunctionReference { function } => out.push(*function),
        Expr::Equals { left, right } | Expr::AndAnd { left, right } => {
            expr_references(left, out);
            expr_references(right, out);
        }
        Expr::Intrinsic { args, .. } => args.iter().for_each(|a| expr_references(a, out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;

    #[test]
    fn test_copy_on_write_keeps_snapshots_stable() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();

        let before = program.get(point.class);
        program.update(point.class, |decl| {
            decl.as_class_mut().unwrap().members.clear();
        });
        assert!(!before.as_class().unwrap().members.is_empty());
        assert!(program.members(point.class).is_empty());
    }

    #[test]
    fn test_field_getter_detection() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();

        assert!(program.is_multi_field_value_class(point.class));
        assert!(program.is_multi_field_value_class_field_getter(point.getters[0]));
        assert_eq!(program.getter_backing_field(point.getters[1]), Some(point.fields[1]));
        assert_eq!(program.qualified_name(point.getters[0]), "Point.<get-x>");
    }

    #[test]
    fn test_data_round_trip_and_validation() {
        let mut b = ProgramBuilder::new();
        b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();

        let data = program.to_data();
        let json = data.to_json().unwrap();
        let reloaded = Program::from_data(ProgramData::from_json(&json).unwrap()).unwrap();
        assert_eq!(reloaded.len(), program.len());

        let mut broken = program.to_data();
        broken.roots.push(DeclId(999));
        assert!(matches!(
            Program::from_data(broken),
            Err(IrError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_dangling_reference_inside_body_is_rejected() {
        let mut b = ProgramBuilder::new();
        b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let main = b.function(
            "main",
            &[],
            Type::Int,
            Body::Expr(Expr::get_field(DeclId(999), Expr::int(0))),
        );
        let program = b.finish();

        let json = program.to_data().to_json().unwrap();
        let result = Program::from_data(ProgramData::from_json(&json).unwrap());
        assert!(matches!(
            result,
            Err(IrError::DanglingReference { from, to }) if from == main && to == DeclId(999)
        ));
    }

    #[test]
    fn test_dangling_type_reference_is_rejected() {
        let mut b = ProgramBuilder::new();
        b.function("f", &[("p", Type::class(DeclId(500)))], Type::Unit, Body::Block(Vec::new()));
        let program = b.finish();

        assert!(matches!(
            Program::from_data(program.to_data()),
            Err(IrError::DanglingReference { to, .. }) if to == DeclId(500)
        ));
    }

    #[test]
    fn test_resolve_fake_override_chain() {
        let mut b = ProgramBuilder::new();
        let iface = b.interface("Shape");
        let area = b.method(iface, "area", &[], Type::Int, Some(Body::Expr(Expr::int(1))));
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let fake = b.fake_override(point.class, area);
        let program = b.finish();

        assert_eq!(program.resolve_fake_override(fake), Some(area));
        assert!(program.overrides(fake, area));
        assert!(!program.overrides(area, fake));
    }
}
