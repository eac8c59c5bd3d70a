//! Memoized replacement registry
//!
//! The registry is the one place that decides how a declaration is
//! rewritten, and it decides exactly once: specific declarations per
//! multi-field value class, and a replacement decision per function. It is
//! also the synchronization point between lowering workers.

use crate::decision::{self, Decision, Replacement};
use crate::error::{LoweringError, Result};
use crate::memo::Memoized;
use crate::specific::{self, SpecificDeclarations};
use dashmap::DashMap;
use log::debug;
use std::ops::Range;
use std::sync::Arc;
use vlower_ir::Program;
use vlower_types::DeclId;

/// A field swapped out of a multi-field value class, with the leaves that
/// replaced it
#[derive(Debug, Clone)]
pub struct RemovedField {
    pub field: DeclId,
    pub declarations: Arc<SpecificDeclarations>,
    pub leaves: Range<usize>,
}

pub struct MultiFieldValueClassReplacements<'p> {
    program: &'p Program,
    declarations: Memoized<DeclId, Result<Option<Arc<SpecificDeclarations>>>>,
    decisions: Memoized<DeclId, Result<Decision>>,
    old_fields: DashMap<DeclId, Arc<[DeclId]>>,
}

impl<'p> MultiFieldValueClassReplacements<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            declarations: Memoized::new(),
            decisions: Memoized::new(),
            old_fields: DashMap::new(),
        }
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    /// Specific declarations of a multi-field value class; `None` for any
    /// other declaration.
    pub fn declarations_for(&self, class: DeclId) -> Result<Option<Arc<SpecificDeclarations>>> {
        self.declarations.get_or_compute(&class, || {
            if self.program.try_get(class).is_none() {
                return Err(LoweringError::malformed(format!("unknown declaration {}", class)));
            }
            if !self.program.is_multi_field_value_class(class) {
                return Ok(None);
            }
            debug!("building specific declarations for {}", self.program.qualified_name(class));
            specific::build(self, class).map(|d| Some(Arc::new(d)))
        })
    }

    /// Like [`declarations_for`](Self::declarations_for), for a class that
    /// must be a multi-field value class.
    pub fn require_declarations(&self, class: DeclId) -> Result<Arc<SpecificDeclarations>> {
        self.declarations_for(class)?.ok_or_else(|| {
            LoweringError::internal(format!(
                "`{}` is not a multi-field value class",
                self.program.qualified_name(class)
            ))
        })
    }

    pub fn decision_for(&self, function: DeclId) -> Result<Decision> {
        self.decisions
            .get_or_compute(&function, || decision::decide(self, function))
    }

    /// Replacement of a function, if it has one.
    pub fn replacement_for(&self, function: DeclId) -> Result<Option<Arc<Replacement>>> {
        Ok(self.decision_for(function)?.replacement().cloned())
    }

    /// Every replacement decided so far, ordered by original function.
    pub fn replacements(&self) -> Vec<Arc<Replacement>> {
        let mut keys = self.decisions.keys();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| self.decisions.get(&k))
            .filter_map(|d| d.ok().and_then(|d| d.replacement().cloned()))
            .collect()
    }

    /// Instance fields of a class as they were before lowering. The first
    /// request snapshots the current fields; lowering requests it before it
    /// mutates the class.
    pub fn old_fields(&self, class: DeclId) -> Arc<[DeclId]> {
        Arc::clone(
            self.old_fields
                .entry(class)
                .or_insert_with(|| self.program.fields(class).into())
                .value(),
        )
    }

    pub fn record_old_fields(&self, class: DeclId) {
        self.old_fields(class);
    }

    /// Number of specific-declaration computations so far.
    pub fn builder_runs(&self) -> usize {
        self.declarations.computations()
    }

    pub fn decision_runs(&self) -> usize {
        self.decisions.computations()
    }

    /// Whether `field` is an original field of a multi-field value class.
    pub fn removed_field(&self, field: DeclId) -> Result<Option<RemovedField>> {
        let Some(class) = self.program.parent_class(field) else {
            return Ok(None);
        };
        if !self.program.is_multi_field_value_class(class) {
            return Ok(None);
        }
        let declarations = self.require_declarations(class)?;
        let leaves = declarations.field_ranges.get(&field).cloned();
        Ok(leaves.map(|leaves| RemovedField { field, declarations, leaves }))
    }

    /// Whether `function` is the generated getter of a removed field.
    pub fn removed_getter(&self, function: DeclId) -> Result<Option<RemovedField>> {
        match self.program.getter_backing_field(function) {
            Some(field) => self.removed_field(field),
            None => Ok(None),
        }
    }

    /// Specific declarations of the class whose original primary
    /// constructor is `constructor`.
    pub fn removed_primary_constructor(
        &self,
        constructor: DeclId,
    ) -> Result<Option<Arc<SpecificDeclarations>>> {
        let Some(class) = self.program.parent_class(constructor) else {
            return Ok(None);
        };
        match self.declarations_for(class)? {
            Some(d) if d.old_primary_constructor == constructor => Ok(Some(d)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use vlower_ir::ProgramBuilder;
    use vlower_types::Type;

    #[test]
    fn test_declarations_are_identical_across_threads() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        let results: Vec<Arc<SpecificDeclarations>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.declarations_for(point.class).unwrap().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.builder_runs(), 1);
        assert!(results.iter().all(|d| Arc::ptr_eq(d, &results[0])));
        let again = registry.declarations_for(point.class).unwrap().unwrap();
        assert!(Arc::ptr_eq(&again, &results[0]));
        assert_eq!(registry.builder_runs(), 1);
    }

    #[test]
    fn test_non_value_classes_have_no_declarations() {
        let mut b = ProgramBuilder::new();
        let plain = b.class("Plain", &[("a", Type::Int), ("b", Type::Int)]);
        let meters = b.value_class("Meters", &[("value", Type::Double)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        assert!(registry.declarations_for(plain.class).unwrap().is_none());
        assert!(registry.declarations_for(meters.class).unwrap().is_none());
        assert!(registry.declarations_for(DeclId(999)).is_err());
    }

    #[test]
    fn test_old_fields_snapshot_survives_mutation() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        registry.record_old_fields(point.class);
        program.update(point.class, |decl| decl.as_class_mut().unwrap().members.clear());
        assert_eq!(&*registry.old_fields(point.class), point.fields.as_slice());
    }

    #[test]
    fn test_removed_field_lookup() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);

        let y = registry.removed_field(point.fields[1]).unwrap().unwrap();
        assert_eq!(y.leaves, 1..2);
        let via_getter = registry.removed_getter(point.getters[0]).unwrap().unwrap();
        assert_eq!(via_getter.field, point.fields[0]);

        let new_field = y.declarations.fields[0];
        assert!(registry.removed_field(new_field).unwrap().is_none());
        assert!(registry
            .removed_primary_constructor(point.constructor)
            .unwrap()
            .is_some());
    }
}
