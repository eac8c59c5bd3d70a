//! Program construction helpers
//!
//! Front ends and tests use [`ProgramBuilder`] to assemble well-formed
//! programs: every class gets its fields, properties, generated getters
//! and primary constructor wired together the way the lowering expects.

use crate::ir::*;
use crate::program::Program;
use vlower_types::{DeclId, Type};

/// Declarations created for a class with a primary constructor
#[derive(Debug, Clone)]
pub struct ClassHandle {
    pub class: DeclId,
    pub constructor: DeclId,
    pub fields: Vec<DeclId>,
    pub properties: Vec<DeclId>,
    pub getters: Vec<DeclId>,
}

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn finish(self) -> Program {
        self.program
    }

    /// Value class `name(val f0: T0, val f1: T1, ...)`.
    ///
    /// More than one field, or a single field whose type is itself a
    /// multi-field value class, makes the class multi-field; a lone field
    /// of any other type makes it an inline wrapper.
    pub fn value_class(&mut self, name: &str, fields: &[(&str, Type)]) -> ClassHandle {
        let repr = match fields {
            [(_, ty)] if !self.program.is_multi_field_value_class_type(ty) => ValueRepr::Inline,
            _ => ValueRepr::MultiField,
        };
        self.class_with_repr(name, &[], fields, Some(repr))
    }

    /// Generic value class with the given type parameters.
    pub fn generic_value_class(
        &mut self,
        name: &str,
        type_params: &[&str],
        fields: &[(&str, Type)],
    ) -> ClassHandle {
        self.class_with_repr(name, type_params, fields, Some(ValueRepr::MultiField))
    }

    /// Ordinary class with a primary constructor storing every field.
    pub fn class(&mut self, name: &str, fields: &[(&str, Type)]) -> ClassHandle {
        self.class_with_repr(name, &[], fields, None)
    }

    pub fn interface(&mut self, name: &str) -> DeclId {
        let id = self.program.alloc(
            name,
            None,
            Origin::Defined,
            DeclKind::Class(ClassDecl { is_interface: true, ..ClassDecl::default() }),
        );
        self.program.add_root(id);
        id
    }

    fn class_with_repr(
        &mut self,
        name: &str,
        type_params: &[&str],
        fields: &[(&str, Type)],
        value_repr: Option<ValueRepr>,
    ) -> ClassHandle {
        let class = self.program.alloc(
            name,
            None,
            Origin::Defined,
            DeclKind::Class(ClassDecl {
                value_repr,
                type_params: type_params.iter().map(|p| p.to_string()).collect(),
                ..ClassDecl::default()
            }),
        );
        self.program.add_root(class);

        let this_type = self.program.this_type(class);
        let constructor = self.alloc_function(
            class,
            "<init>",
            Origin::Defined,
            FunctionDecl {
                kind: FunctionKind::Constructor { is_primary: true },
                ..signature(fields, this_type, false)
            },
        );

        let mut handle = ClassHandle {
            class,
            constructor,
            fields: Vec::new(),
            properties: Vec::new(),
            getters: Vec::new(),
        };
        for (index, (field_name, ty)) in fields.iter().enumerate() {
            let (property, field, getter) =
                self.property_with_field(class, field_name, ty.clone(), Expr::param(index));
            handle.fields.push(field);
            handle.properties.push(property);
            handle.getters.push(getter);
        }
        handle
    }

    /// `val name: ty = initializer` with a generated getter.
    /// Returns `(property, field, getter)`.
    pub fn property_with_field(
        &mut self,
        class: DeclId,
        name: &str,
        ty: Type,
        initializer: Expr,
    ) -> (DeclId, DeclId, DeclId) {
        let property = self.program.alloc(
            name,
            None,
            Origin::Defined,
            DeclKind::Property(PropertyDecl { ty: ty.clone(), getter: None, backing_field: None }),
        );
        let field = self.program.alloc(
            name,
            None,
            Origin::Defined,
            DeclKind::Field(FieldDecl {
                ty: ty.clone(),
                is_static: false,
                initializer: Some(initializer),
                property: Some(property),
            }),
        );
        let getter = self.program.alloc(
            format!("<get-{}>", name),
            None,
            Origin::DefaultPropertyAccessor,
            DeclKind::Function(FunctionDecl {
                property: Some(property),
                body: Some(Body::Expr(Expr::get_field(field, Expr::this()))),
                ..signature(&[], ty, true)
            }),
        );
        self.program.update(property, |decl| {
            if let DeclKind::Property(p) = &mut decl.kind {
                p.getter = Some(getter);
                p.backing_field = Some(field);
            }
        });
        self.program.attach(Some(class), field);
        self.program.attach(Some(class), property);
        self.program.attach(Some(class), getter);
        (property, field, getter)
    }

    /// Computed property: a getter with a custom body and no backing field.
    pub fn computed_property(&mut self, class: DeclId, name: &str, ty: Type, body: Body) -> DeclId {
        let property = self.program.alloc(
            name,
            None,
            Origin::Defined,
            DeclKind::Property(PropertyDecl { ty: ty.clone(), getter: None, backing_field: None }),
        );
        let getter = self.alloc_function(
            class,
            &format!("<get-{}>", name),
            Origin::Defined,
            FunctionDecl { property: Some(property), body: Some(body), ..signature(&[], ty, true) },
        );
        self.program.update(property, |decl| {
            if let DeclKind::Property(p) = &mut decl.kind {
                p.getter = Some(getter);
            }
        });
        self.program.attach(Some(class), property);
        getter
    }

    /// `init { ... }` block appended to the class.
    pub fn init_block(&mut self, class: DeclId, body: Vec<Stmt>) -> DeclId {
        let id = self.program.alloc(
            "<anonymous-init>",
            None,
            Origin::Defined,
            DeclKind::Initializer(InitializerDecl { body }),
        );
        self.program.attach(Some(class), id);
        id
    }

    /// Member function with a dispatch receiver. Without a body it is abstract.
    pub fn method(
        &mut self,
        owner: DeclId,
        name: &str,
        params: &[(&str, Type)],
        return_type: Type,
        body: Option<Body>,
    ) -> DeclId {
        let modality = if body.is_none() { Modality::Abstract } else { Modality::Final };
        self.alloc_function(
            owner,
            name,
            Origin::Defined,
            FunctionDecl { body, modality, ..signature(params, return_type, true) },
        )
    }

    /// Function owned by a class but without a dispatch receiver.
    pub fn static_function(
        &mut self,
        owner: DeclId,
        name: &str,
        params: &[(&str, Type)],
        return_type: Type,
        body: Body,
    ) -> DeclId {
        self.alloc_function(
            owner,
            name,
            Origin::Defined,
            FunctionDecl { body: Some(body), ..signature(params, return_type, false) },
        )
    }

    /// Top-level function.
    pub fn function(
        &mut self,
        name: &str,
        params: &[(&str, Type)],
        return_type: Type,
        body: Body,
    ) -> DeclId {
        let id = self.program.alloc(
            name,
            None,
            Origin::Defined,
            DeclKind::Function(FunctionDecl {
                body: Some(body),
                ..signature(params, return_type, false)
            }),
        );
        self.program.add_root(id);
        id
    }

    /// Fake override of `base` inside `owner`. Also records the base's
    /// class as a supertype of `owner`.
    pub fn fake_override(&mut self, owner: DeclId, base: DeclId) -> DeclId {
        let base_decl = self.program.get(base);
        let mut func = base_decl
            .as_function()
            .cloned()
            .unwrap_or_else(|| signature(&[], Type::Unit, true));
        func.body = None;
        func.is_fake_override = true;
        func.overridden = vec![base];
        func.compiled_to_default_interface = false;
        func.language = SourceLanguage::Native;

        if let Some(super_class) = base_decl.parent {
            self.program.update(owner, |decl| {
                if let Some(c) = decl.as_class_mut() {
                    if !c.supertypes.contains(&super_class) {
                        c.supertypes.push(super_class);
                    }
                }
            });
        }
        self.alloc_function(owner, &base_decl.name, Origin::FakeOverride, func)
    }

    /// Overriding member with its own body.
    pub fn override_method(&mut self, owner: DeclId, base: DeclId, body: Body) -> DeclId {
        let base_decl = self.program.get(base);
        let mut func = base_decl
            .as_function()
            .cloned()
            .unwrap_or_else(|| signature(&[], Type::Unit, true));
        func.body = Some(body);
        func.modality = Modality::Final;
        func.overridden = vec![base];
        func.language = SourceLanguage::Native;
        func.compiled_to_default_interface = false;
        self.alloc_function(owner, &base_decl.name, Origin::Defined, func)
    }

    /// Edit a function after creation.
    pub fn configure(&mut self, function: DeclId, f: impl FnOnce(&mut FunctionDecl)) {
        self.program.update(function, |decl| {
            if let Some(func) = decl.as_function_mut() {
                f(func);
            }
        });
    }

    pub fn set_origin(&mut self, id: DeclId, origin: Origin) {
        self.program.update(id, |decl| decl.origin = origin);
    }

    fn alloc_function(
        &mut self,
        owner: DeclId,
        name: &str,
        origin: Origin,
        func: FunctionDecl,
    ) -> DeclId {
        let id = self.program.alloc(name, None, origin, DeclKind::Function(func));
        self.program.attach(Some(owner), id);
        id
    }
}

/// Plain function signature with default metadata.
pub fn signature(params: &[(&str, Type)], return_type: Type, has_dispatch_receiver: bool) -> FunctionDecl {
    FunctionDecl {
        kind: FunctionKind::Simple,
        params: params.iter().map(|(n, t)| Param::new(*n, t.clone())).collect(),
        has_dispatch_receiver,
        return_type,
        body: None,
        visibility: Visibility::Public,
        modality: Modality::Final,
        is_local: false,
        is_fake_override: false,
        overridden: Vec::new(),
        language: SourceLanguage::Native,
        compiled_to_default_interface: false,
        property: None,
        type_params: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let mut b = ProgramBuilder::new();
        let meters = b.value_class("Meters", &[("value", Type::Double)]);
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let wrapper = b.value_class("Wrapper", &[("point", Type::class(point.class))]);
        let program = b.finish();

        assert_eq!(program.value_repr(meters.class), Some(ValueRepr::Inline));
        assert!(program.is_inline_class_type(&Type::class(meters.class)));
        assert!(program.is_multi_field_value_class(point.class));
        assert!(program.is_multi_field_value_class(wrapper.class));
    }

    #[test]
    fn test_class_shape() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();

        assert_eq!(program.primary_constructor(point.class), Some(point.constructor));
        assert_eq!(program.fields(point.class), point.fields);
        let field = program.get(point.fields[1]);
        assert_eq!(field.as_field().unwrap().initializer, Some(Expr::param(1)));
        assert_eq!(program.roots(), vec![point.class]);
        assert!(program.is_attached(point.getters[0]));
    }
}
