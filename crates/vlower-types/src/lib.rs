//! Type system for vlower
//!
//! Defines the identifiers and type representations shared by the IR,
//! the lowering passes and the code generators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable index of a declaration in the program arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclId(pub u32);

impl DeclId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier for local variables inside a body
pub type LocalId = u32;

/// Core type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    /// Unit (no meaningful value)
    Unit,
    Boolean,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    Double,
    String,
    /// Top type
    Any,
    /// Bottom type
    Nothing,
    /// Reference to a class declaration, with type arguments
    Class {
        id: DeclId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Type>,
    },
    /// Type parameter reference (e.g. T in class<T>)
    TypeVar { name: String },
    /// Nullable wrapper (T?)
    Nullable { inner: Box<Type> },
}

impl Type {
    /// Shorthand for a non-generic class type
    pub fn class(id: DeclId) -> Self {
        Type::Class { id, args: Vec::new() }
    }

    pub fn type_var(name: impl Into<String>) -> Self {
        Type::TypeVar { name: name.into() }
    }

    pub fn nullable(self) -> Self {
        match self {
            Type::Nullable { .. } => self,
            other => Type::Nullable { inner: Box::new(other) },
        }
    }

    /// Check if this type is a primitive
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Unit | Type::Boolean | Type::Int | Type::Long | Type::Double
        )
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int)
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable { .. } | Type::Any)
    }

    /// Replace type variables named in `params` with the matching `args`.
    /// Variables without a matching argument are left as they are.
    pub fn substitute(&self, params: &[String], args: &[Type]) -> Type {
        match self {
            Type::TypeVar { name } => params
                .iter()
                .position(|p| p == name)
                .and_then(|i| args.get(i))
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Type::Class { id, args: inner } => Type::Class {
                id: *id,
                args: inner.iter().map(|a| a.substitute(params, args)).collect(),
            },
            Type::Nullable { inner } => inner.substitute(params, args).nullable(),
            other => other.clone(),
        }
    }

    /// The class this type refers to, if it is a non-nullable class type.
    /// Nullable class types are boxed and never flattened.
    pub fn class_id(&self) -> Option<DeclId> {
        match self {
            Type::Class { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unit => write!(f, "Unit"),
            Type::Boolean => write!(f, "Boolean"),
            Type::Int => write!(f, "Int"),
            Type::Long => write!(f, "Long"),
            Type::Double => write!(f, "Double"),
            Type::String => write!(f, "String"),
            Type::Any => write!(f, "Any"),
            Type::Nothing => write!(f, "Nothing"),
            Type::Class { id, args } => {
                write!(f, "{}", id)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::TypeVar { name } => write!(f, "{}", name),
            Type::Nullable { inner } => write!(f, "{}?", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_class_is_not_flattenable_reference() {
        let ty = Type::class(DeclId(3));
        assert_eq!(ty.class_id(), Some(DeclId(3)));
        assert_eq!(ty.clone().nullable().class_id(), None);
        assert_eq!(ty.clone().nullable().nullable(), ty.nullable());
    }

    #[test]
    fn test_display() {
        let ty = Type::Class {
            id: DeclId(1),
            args: vec![Type::Int, Type::type_var("T")],
        };
        assert_eq!(ty.to_string(), "#1<Int, T>");
        assert_eq!(Type::String.nullable().to_string(), "String?");
    }

    #[test]
    fn test_substitute_nested_type_vars() {
        let params = vec!["T".to_string()];
        let ty = Type::Class {
            id: DeclId(2),
            args: vec![Type::type_var("T").nullable(), Type::type_var("U")],
        };
        let out = ty.substitute(&params, &[Type::Int]);
        assert_eq!(out.to_string(), "#2<Int?, U>");
    }
}
