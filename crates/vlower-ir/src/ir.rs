//! IR node definitions
//!
//! Declarations form an owned tree: every non-root declaration names its
//! parent, and class declarations list their members in order. Bodies are
//! small expression trees that refer to declarations by [`DeclId`].

use serde::{Deserialize, Serialize};
use vlower_types::{DeclId, LocalId, Type};

/// How a value class is represented after code generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRepr {
    /// Single-field trivial wrapper, erased to its underlying value
    Inline,
    /// Flattenable aggregate, represented as a tuple of leaf values
    MultiField,
}

/// Where a declaration came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "origin", content = "name", rename_all = "snake_case")]
pub enum Origin {
    /// Written by the user
    #[default]
    Defined,
    /// Inherited unchanged from a supertype
    FakeOverride,
    /// Generated getter of a property with a backing field
    DefaultPropertyAccessor,
    /// Accessor of a delegated property
    DelegatedPropertyAccessor,
    /// Collection stub generated for a builtin supertype
    BuiltinsStub,
    /// Implementation of a SAM-converted lambda
    SyntheticSamImplementation,
    /// Any other compiler-generated declaration
    Synthetic(String),
    /// Static replacement generated by value class lowering
    StaticValueClassReplacement,
    /// Method replacement generated by value class lowering
    MethodValueClassReplacement,
    /// Box, unbox, equality, constructor or leaf field generated for a multi-field value class
    MultiFieldValueClassMember,
}

impl Origin {
    /// Compiler-generated origins. Lowering output counts as synthetic so it
    /// is never considered for replacement again.
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            Origin::SyntheticSamImplementation
                | Origin::Synthetic(_)
                | Origin::StaticValueClassReplacement
                | Origin::MethodValueClassReplacement
                | Origin::MultiFieldValueClassMember
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    Private,
    /// Visible only inside the enclosing body
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Final,
    Open,
    Abstract,
}

/// Language a declaration was compiled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLanguage {
    #[default]
    Native,
    /// Declared in a foreign-language source (never gets replacements)
    Foreign,
}

/// A node in the program tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub id: DeclId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<DeclId>,
    #[serde(default)]
    pub origin: Origin,
    pub kind: DeclKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decl", rename_all = "snake_case")]
pub enum DeclKind {
    Class(ClassDecl),
    Function(FunctionDecl),
    Field(FieldDecl),
    Property(PropertyDecl),
    Initializer(InitializerDecl),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassDecl {
    /// Member declarations in source order
    #[serde(default)]
    pub members: Vec<DeclId>,
    #[serde(default)]
    pub value_repr: Option<ValueRepr>,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub type_params: Vec<String>,
    #[serde(default)]
    pub supertypes: Vec<DeclId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionKind {
    #[default]
    Simple,
    Constructor { is_primary: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    #[serde(default)]
    pub kind: FunctionKind,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Member functions take `this` as an implicit receiver
    #[serde(default)]
    pub has_dispatch_receiver: bool,
    pub return_type: Type,
    #[serde(default)]
    pub body: Option<Body>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub modality: Modality,
    /// Declared inside another function body
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub is_fake_override: bool,
    /// Functions this one directly overrides
    #[serde(default)]
    pub overridden: Vec<DeclId>,
    #[serde(default)]
    pub language: SourceLanguage,
    /// Interface member compiled to a default interface method
    #[serde(default)]
    pub compiled_to_default_interface: bool,
    /// Property this function is an accessor of
    #[serde(default)]
    pub property: Option<DeclId>,
    #[serde(default)]
    pub type_params: Vec<String>,
}

impl FunctionDecl {
    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, FunctionKind::Constructor { .. })
    }

    pub fn is_primary_constructor(&self) -> bool {
        matches!(self.kind, FunctionKind::Constructor { is_primary: true })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub ty: Type,
    #[serde(default)]
    pub is_static: bool,
    /// Initializer, evaluated with the primary constructor's parameters in scope
    #[serde(default)]
    pub initializer: Option<Expr>,
    #[serde(default)]
    pub property: Option<DeclId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub ty: Type,
    #[serde(default)]
    pub getter: Option<DeclId>,
    #[serde(default)]
    pub backing_field: Option<DeclId>,
}

/// Anonymous `init { ... }` block, run in member order during primary construction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InitializerDecl {
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "body", content = "value", rename_all = "snake_case")]
pub enum Body {
    Block(Vec<Stmt>),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    /// Local variable declaration
    Let {
        id: LocalId,
        name: String,
        ty: Type,
        init: Expr,
    },
    Expr { expr: Expr },
    Return { value: Option<Expr> },
}

impl Stmt {
    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr { expr }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return { value: Some(value) }
    }
}

/// A readable value in scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "value", content = "index", rename_all = "snake_case")]
pub enum ValueRef {
    /// Dispatch receiver, or the object under construction
    This,
    Param(usize),
    Local(LocalId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

/// Built-in operations that need no declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intrinsic {
    /// Integer addition
    Add,
    /// Integer subtraction
    Sub,
    /// String concatenation of the rendered arguments
    Concat,
    /// Append the rendered argument to the program output
    Print,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
    Const {
        value: Literal,
    },
    Get {
        value: ValueRef,
    },
    Set {
        target: ValueRef,
        value: Box<Expr>,
    },
    GetField {
        field: DeclId,
        #[serde(default)]
        receiver: Option<Box<Expr>>,
    },
    SetField {
        field: DeclId,
        #[serde(default)]
        receiver: Option<Box<Expr>>,
        value: Box<Expr>,
    },
    Call {
        function: DeclId,
        #[serde(default)]
        receiver: Option<Box<Expr>>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    ConstructorCall {
        constructor: DeclId,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    FunctionReference {
        function: DeclId,
    },
    /// Structural equality
    Equals {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Short-circuit logical and
    AndAnd {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Intrinsic {
        op: Intrinsic,
        #[serde(default)]
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Const { value: Literal::Int(value) }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Const { value: Literal::String(value.into()) }
    }

    pub fn bool(value: bool) -> Self {
        Expr::Const { value: Literal::Bool(value) }
    }

    pub fn this() -> Self {
        Expr::Get { value: ValueRef::This }
    }

    pub fn param(index: usize) -> Self {
        Expr::Get { value: ValueRef::Param(index) }
    }

    pub fn local(id: LocalId) -> Self {
        Expr::Get { value: ValueRef::Local(id) }
    }

    pub fn get_field(field: DeclId, receiver: Expr) -> Self {
        Expr::GetField { field, receiver: Some(Box::new(receiver)) }
    }

    pub fn set_field(field: DeclId, receiver: Expr, value: Expr) -> Self {
        Expr::SetField {
            field,
            receiver: Some(Box::new(receiver)),
            value: Box::new(value),
        }
    }

    /// Call without a dispatch receiver
    pub fn call(function: DeclId, args: Vec<Expr>) -> Self {
        Expr::Call { function, receiver: None, args, type_args: Vec::new() }
    }

    pub fn call_method(function: DeclId, receiver: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            function,
            receiver: Some(Box::new(receiver)),
            args,
            type_args: Vec::new(),
        }
    }

    pub fn construct(constructor: DeclId, args: Vec<Expr>) -> Self {
        Expr::ConstructorCall { constructor, args, type_args: Vec::new() }
    }

    pub fn equals(left: Expr, right: Expr) -> Self {
        Expr::Equals { left: Box::new(left), right: Box::new(right) }
    }

    pub fn and_and(left: Expr, right: Expr) -> Self {
        Expr::AndAnd { left: Box::new(left), right: Box::new(right) }
    }

    pub fn intrinsic(op: Intrinsic, args: Vec<Expr>) -> Self {
        Expr::Intrinsic { op, args }
    }

    /// Expressions that can be evaluated more than once without changing
    /// the program: constants, value reads and field reads of such values.
    pub fn is_pure(&self) -> bool {
        match self {
            Expr::Const { .. } | Expr::Get { .. } => true,
            Expr::GetField { receiver, .. } => receiver.as_deref().map_or(true, Expr::is_pure),
            _ => false,
        }
    }
}

impl Declaration {
    pub fn as_class(&self) -> Option<&ClassDecl> {
        match &self.kind {
            DeclKind::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut ClassDecl> {
        match &mut self.kind {
            DeclKind::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            DeclKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionDecl> {
        match &mut self.kind {
            DeclKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldDecl> {
        match &self.kind {
            DeclKind::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyDecl> {
        match &self.kind {
            DeclKind::Property(property) => Some(property),
            _ => None,
        }
    }

    pub fn as_initializer(&self) -> Option<&InitializerDecl> {
        match &self.kind {
            DeclKind::Initializer(init) => Some(init),
            _ => None,
        }
    }

    pub fn is_instance_field(&self) -> bool {
        self.as_field().map_or(false, |f| !f.is_static)
    }
}
