//! Multi-field value class lowering pass
//!
//! The pass runs in three phases:
//!
//! 1. every multi-field value class is lowered to its new shape, in
//!    parallel, one class per worker;
//! 2. every function gets its replacement decision, in declaration order;
//! 3. every body is rewritten against the new shapes, in parallel, and
//!    the new bodies are applied in declaration order.
//!
//! Unsupported constructs become diagnostics; compilation stops after the
//! phase that produced them. Internal errors abort the pass.

use crate::decision::Decision;
use crate::error::{LoweringError, Result};
use crate::memo::Memoized;
use crate::registry::MultiFieldValueClassReplacements;
use crate::rewrite;
use crate::specific::SpecificDeclarations;
use dashmap::DashMap;
use log::{debug, info, trace};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use vlower_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use vlower_ir::{DeclKind, Origin, Program};
use vlower_types::DeclId;

/// Progress of one class through lowering. Each step may only move to its
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoweringState {
    Untouched,
    SpecificDeclarationsBuilt,
    FieldsReplaced,
    PropertiesReplaced,
    ConstructorReplaced,
    BoxBuilt,
    UnboxBuilt,
    EqualityBuilt,
    Done,
}

impl LoweringState {
    pub fn successor(self) -> Option<Self> {
        use LoweringState::*;
        Some(match self {
            Untouched => SpecificDeclarationsBuilt,
            SpecificDeclarationsBuilt => FieldsReplaced,
            FieldsReplaced => PropertiesReplaced,
            PropertiesReplaced => ConstructorReplaced,
            ConstructorReplaced => BoxBuilt,
            BoxBuilt => UnboxBuilt,
            UnboxBuilt => EqualityBuilt,
            EqualityBuilt => Done,
            Done => return None,
        })
    }
}

impl fmt::Display for LoweringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct LoweringOptions {
    /// Worker threads; `None` uses one per core
    pub threads: Option<usize>,
    /// Rewrite function bodies after the classes are lowered
    pub rewrite_call_sites: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self { threads: None, rewrite_call_sites: true }
    }
}

/// Result of lowering one class
#[derive(Debug)]
pub struct ClassOutcome {
    pub class: DeclId,
    pub declarations: Arc<SpecificDeclarations>,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
pub struct LoweringReport {
    pub lowered_classes: Vec<DeclId>,
    /// Functions that received a replacement, with their decision
    pub replaced_functions: Vec<(DeclId, Decision)>,
    pub rewritten_bodies: usize,
    pub diagnostics: Diagnostics,
}

impl LoweringReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Lower every multi-field value class of `program` and rewrite its users.
pub fn lower_program(program: &Program, options: &LoweringOptions) -> Result<LoweringReport> {
    let registry = MultiFieldValueClassReplacements::new(program);
    MultiFieldValueClassLowering::new(&registry).run(options)
}

pub struct MultiFieldValueClassLowering<'r, 'p> {
    registry: &'r MultiFieldValueClassReplacements<'p>,
    classes: Memoized<DeclId, Result<Arc<ClassOutcome>>>,
    states: DashMap<DeclId, LoweringState>,
}

impl<'r, 'p> MultiFieldValueClassLowering<'r, 'p> {
    pub fn new(registry: &'r MultiFieldValueClassReplacements<'p>) -> Self {
        Self { registry, classes: Memoized::new(), states: DashMap::new() }
    }

    pub fn state(&self, class: DeclId) -> LoweringState {
        self.states.get(&class).map_or(LoweringState::Untouched, |s| *s)
    }

    /// Lower one class. Repeated and concurrent requests share one run.
    pub fn lower_class(&self, class: DeclId) -> Result<Arc<ClassOutcome>> {
        self.classes.get_or_compute(&class, || self.handle_specific_new_class(class))
    }

    pub fn run(&self, options: &LoweringOptions) -> Result<LoweringReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads.unwrap_or(0))
            .build()
            .map_err(|e| LoweringError::internal(format!("cannot start lowering workers: {}", e)))?;
        pool.install(|| self.run_phases(options))
    }

    fn run_phases(&self, options: &LoweringOptions) -> Result<LoweringReport> {
        let program = self.registry.program();
        let mut report = LoweringReport::default();

        let classes: Vec<DeclId> = program
            .classes()
            .into_iter()
            .filter(|c| program.is_multi_field_value_class(*c) && program.is_attached(*c))
            .collect();
        info!("lowering {} multi-field value classes", classes.len());

        let outcomes: Vec<(DeclId, Result<Arc<ClassOutcome>>)> =
            classes.par_iter().map(|c| (*c, self.lower_class(*c))).collect();
        for (class, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    report.lowered_classes.push(class);
                    report.diagnostics.extend(outcome.warnings.iter().cloned());
                }
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => report
                    .diagnostics
                    .push(e.in_context(program.qualified_name(class)).to_diagnostic()),
            }
        }
        if report.has_errors() || !options.rewrite_call_sites {
            return Ok(report);
        }

        let functions: Vec<DeclId> = program
            .functions()
            .into_iter()
            .filter(|f| program.is_attached(*f))
            .collect();
        debug!("deciding replacements for {} functions", functions.len());
        for function in &functions {
            match self.registry.decision_for(*function) {
                Ok(decision) if decision.replacement().is_some() => {
                    report.replaced_functions.push((*function, decision));
                }
                Ok(_) => {}
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => report
                    .diagnostics
                    .push(e.in_context(program.qualified_name(*function)).to_diagnostic()),
            }
        }
        if report.has_errors() {
            return Ok(report);
        }

        let rewrites: Vec<(DeclId, Result<_>)> = functions
            .par_iter()
            .map(|f| (*f, rewrite::rewrite_function(self.registry, *f)))
            .collect();
        for (function, rewrite) in rewrites {
            match rewrite {
                Ok(updates) => {
                    for (id, body) in updates {
                        trace!("new body for {}", program.qualified_name(id));
                        program.update(id, |decl| {
                            if let Some(func) = decl.as_function_mut() {
                                func.body = Some(body);
                            }
                        });
                        report.rewritten_bodies += 1;
                    }
                }
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => report
                    .diagnostics
                    .push(e.in_context(program.qualified_name(function)).to_diagnostic()),
            }
        }
        info!(
            "lowered {} classes, replaced {} functions, rewrote {} bodies",
            report.lowered_classes.len(),
            report.replaced_functions.len(),
            report.rewritten_bodies
        );
        Ok(report)
    }

    fn advance(&self, class: DeclId, to: LoweringState) -> Result<()> {
        let mut state = self.states.entry(class).or_insert(LoweringState::Untouched);
        if state.successor() != Some(to) {
            return Err(LoweringError::internal(format!(
                "class {} cannot move from {} to {}",
                class, *state, to
            )));
        }
        trace!("class {}: {} -> {}", class, *state, to);
        *state = to;
        Ok(())
    }

    fn handle_specific_new_class(&self, class: DeclId) -> Result<Arc<ClassOutcome>> {
        let program = self.registry.program();
        self.registry.record_old_fields(class);
        let declarations = self.registry.require_declarations(class)?;
        if declarations.value_class != class {
            return Err(LoweringError::internal(format!(
                "declarations of `{}` were built for {}",
                program.qualified_name(class),
                declarations.value_class
            )));
        }
        self.advance(class, LoweringState::SpecificDeclarationsBuilt)?;

        let old_fields: HashSet<DeclId> = declarations.old_fields.iter().copied().collect();
        splice_members(program, class, &old_fields, &declarations.fields);
        self.advance(class, LoweringState::FieldsReplaced)?;

        let mut properties: Vec<_> = declarations.properties.values().collect();
        properties.sort_by_key(|p| (p.leaves.start, p.old_property));
        let old: HashSet<DeclId> = properties
            .iter()
            .flat_map(|p| std::iter::once(p.old_property).chain(p.old_getter))
            .collect();
        let new: Vec<DeclId> = properties
            .iter()
            .flat_map(|p| std::iter::once(p.property).chain(p.getter))
            .collect();
        splice_members(program, class, &old, &new);
        self.advance(class, LoweringState::PropertiesReplaced)?;

        let mut old: HashSet<DeclId> = program
            .members(class)
            .into_iter()
            .filter(|m| program.get(*m).as_initializer().is_some())
            .collect();
        old.insert(declarations.old_primary_constructor);
        splice_members(
            program,
            class,
            &old,
            &[declarations.primary_constructor, declarations.primary_constructor_impl],
        );
        self.advance(class, LoweringState::ConstructorReplaced)?;

        append_members(program, class, &[declarations.box_method]);
        self.advance(class, LoweringState::BoxBuilt)?;

        append_members(program, class, &declarations.unbox_methods);
        self.advance(class, LoweringState::UnboxBuilt)?;

        append_members(program, class, &[declarations.specialized_equals]);
        let warnings = self.user_equals_warnings(class);
        self.advance(class, LoweringState::EqualityBuilt)?;

        self.advance(class, LoweringState::Done)?;
        debug!("lowered {}", program.qualified_name(class));
        Ok(Arc::new(ClassOutcome { class, declarations, warnings }))
    }

    fn user_equals_warnings(&self, class: DeclId) -> Vec<Diagnostic> {
        let program = self.registry.program();
        program
            .members(class)
            .into_iter()
            .filter(|m| {
                let decl = program.get(*m);
                decl.name == "equals"
                    && decl.origin == Origin::Defined
                    && decl.as_function().map_or(false, |f| {
                        f.has_dispatch_receiver && !f.is_fake_override && f.params.len() == 1
                    })
            })
            .map(|m| {
                Diagnostic::warning(
                    DiagnosticCode::IgnoredUserEquals,
                    format!(
                        "`==` on `{}` compares leaves and does not call the user-defined equals",
                        program.qualified_name(class)
                    ),
                )
                .with_context(program.qualified_name(m))
                .build()
            })
            .collect()
    }
}

/// Swap `old` members for `new`, inserting at the first old position.
fn splice_members(program: &Program, class: DeclId, old: &HashSet<DeclId>, new: &[DeclId]) {
    program.update(class, |decl| {
        if let DeclKind::Class(c) = &mut decl.kind {
            let at = c.members.iter().position(|m| old.contains(m)).unwrap_or(c.members.len());
            let before = c.members[..at].iter().filter(|m| !old.contains(m)).count();
            c.members.retain(|m| !old.contains(m));
            c.members.splice(before..before, new.iter().copied());
        }
    });
}

fn append_members(program: &Program, class: DeclId, new: &[DeclId]) {
    splice_members(program, class, &HashSet::new(), new);
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlower_ir::{Body, Expr, Intrinsic, Interpreter, ProgramBuilder, Stmt, Value, ValueRef};
    use vlower_types::Type;

    fn lower(program: &Program) -> LoweringReport {
        lower_program(program, &LoweringOptions { threads: Some(2), rewrite_call_sites: true })
            .unwrap()
    }

    fn names(program: &Program, ids: &[DeclId]) -> Vec<String> {
        ids.iter().map(|id| program.get(*id).name.clone()).collect()
    }

    /// `length(p: Point) = p.x + p.y`, and a `main` exercising it,
    /// construction and equality.
    fn point_program() -> (Program, DeclId) {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let point_ty = Type::class(point.class);
        let length = b.function(
            "length",
            &[("p", point_ty.clone())],
            Type::Int,
            Body::Expr(Expr::intrinsic(
                Intrinsic::Add,
                vec![
                    Expr::call_method(point.getters[0], Expr::param(0), vec![]),
                    Expr::get_field(point.fields[1], Expr::param(0)),
                ],
            )),
        );
        let main = b.function(
            "main",
            &[],
            Type::Int,
            Body::Block(vec![
                Stmt::Let {
                    id: 0,
                    name: "p".into(),
                    ty: point_ty,
                    init: Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)]),
                },
                Stmt::expr(Expr::intrinsic(
                    Intrinsic::Print,
                    vec![Expr::call(length, vec![Expr::local(0)])],
                )),
                Stmt::expr(Expr::intrinsic(
                    Intrinsic::Print,
                    vec![Expr::equals(
                        Expr::local(0),
                        Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)]),
                    )],
                )),
                Stmt::ret(Expr::call(
                    length,
                    vec![Expr::construct(point.constructor, vec![Expr::int(3), Expr::int(4)])],
                )),
            ]),
        );
        (b.finish(), main)
    }

    fn run_main(program: &Program, main: DeclId) -> (Value, Vec<String>) {
        let mut interp = Interpreter::new(program);
        let result = interp.call(main, None, vec![]).unwrap();
        (result, interp.output().to_vec())
    }

    #[test]
    fn test_lowering_preserves_behaviour() {
        let (program, main) = point_program();
        let (before, before_output) = run_main(&program, main);

        let report = lower(&program);
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(report.lowered_classes.len(), 1);
        assert_eq!(report.replaced_functions.len(), 1);

        let (after, after_output) = run_main(&program, main);
        assert_eq!(before.as_int(), Some(7));
        assert_eq!(after.as_int(), Some(7));
        assert_eq!(before_output, after_output);
        assert_eq!(after_output, vec!["3".to_string(), "true".to_string()]);
    }

    #[test]
    fn test_class_shape_after_lowering() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);
        let lowering = MultiFieldValueClassLowering::new(&registry);

        assert_eq!(lowering.state(point.class), LoweringState::Untouched);
        let outcome = lowering.lower_class(point.class).unwrap();
        assert_eq!(lowering.state(point.class), LoweringState::Done);

        let members = program.members(point.class);
        for old in point.fields.iter().chain(&point.getters).chain([&point.constructor]) {
            assert!(!members.contains(old));
        }
        let d = &outcome.declarations;
        assert_eq!(program.fields(point.class), d.fields);
        assert_eq!(program.primary_constructor(point.class), Some(d.primary_constructor));
        assert_eq!(
            names(&program, &members),
            vec![
                "<init>", "constructor-impl", "x", "y", "x", "<get-x>", "y", "<get-y>", "box-impl",
                "unbox-impl-x", "unbox-impl-y", "equals-impl0",
            ]
        );

        let again = lowering.lower_class(point.class).unwrap();
        assert!(Arc::ptr_eq(&outcome, &again));
        assert_eq!(registry.builder_runs(), 1);
    }

    #[test]
    fn test_box_and_unbox_round_trip() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let line = b.value_class(
            "Line",
            &[("start", Type::class(point.class)), ("end", Type::class(point.class))],
        );
        let program = b.finish();
        assert!(!lower(&program).has_errors());

        let members = program.members(line.class);
        let find = |name: &str| {
            members
                .iter()
                .copied()
                .find(|m| program.get(*m).name == name)
                .unwrap()
        };
        let mut interp = Interpreter::new(&program);
        let boxed = interp
            .call(find("box-impl"), None, (1..=4).map(Value::Int).collect())
            .unwrap();
        assert_eq!(interp.render(&boxed), "Line(start-x=1, start-y=2, end-x=3, end-y=4)");
        let unboxes = ["unbox-impl-start-x", "unbox-impl-start-y", "unbox-impl-end-x", "unbox-impl-end-y"];
        let leaves: Vec<i64> = unboxes
            .iter()
            .map(|n| interp.call(find(n), Some(boxed.clone()), vec![]).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(leaves, vec![1, 2, 3, 4]);

        let start = interp.call(find("<get-start>"), Some(boxed.clone()), vec![]).unwrap();
        assert_eq!(interp.render(&start), "Point(x=1, y=2)");
    }

    #[test]
    fn test_specialized_equality_compares_leaves() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);
        let lowering = MultiFieldValueClassLowering::new(&registry);
        let equals = lowering.lower_class(point.class).unwrap().declarations.specialized_equals;

        let mut interp = Interpreter::new(&program);
        let mut eq = |v: [i64; 4]| {
            interp
                .call(equals, None, v.iter().copied().map(Value::Int).collect())
                .unwrap()
                .as_bool()
                .unwrap()
        };
        assert!(eq([1, 2, 1, 2]));
        assert!(!eq([1, 2, 1, 3]));
        assert!(!eq([0, 2, 1, 2]));
    }

    #[test]
    fn test_out_of_order_transition_is_internal() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let program = b.finish();
        let registry = MultiFieldValueClassReplacements::new(&program);
        let lowering = MultiFieldValueClassLowering::new(&registry);

        let err = lowering.advance(point.class, LoweringState::BoxBuilt).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(lowering.state(point.class), LoweringState::Untouched);
        assert_eq!(LoweringState::Done.successor(), None);
    }

    #[test]
    fn test_methods_move_into_static_replacements() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let sum = b.method(
            point.class,
            "sum",
            &[],
            Type::Int,
            Some(Body::Expr(Expr::intrinsic(
                Intrinsic::Add,
                vec![
                    Expr::get_field(point.fields[0], Expr::this()),
                    Expr::call_method(point.getters[1], Expr::this(), vec![]),
                ],
            ))),
        );
        let main = b.function(
            "main",
            &[],
            Type::Int,
            Body::Expr(Expr::call_method(
                sum,
                Expr::construct(point.constructor, vec![Expr::int(20), Expr::int(22)]),
                vec![],
            )),
        );
        let program = b.finish();
        let report = lower(&program);
        assert!(!report.has_errors());

        let (decision_fn, decision) = &report.replaced_functions[0];
        assert_eq!(*decision_fn, sum);
        assert!(decision.is_static());
        let replacement = decision.replacement().unwrap().function;
        assert_eq!(program.get(replacement).name, "sum-impl");
        assert!(program.members(point.class).contains(&replacement));

        // The original delegates; the caller goes straight to the replacement.
        match program.function(main).unwrap().body {
            Some(Body::Expr(Expr::Call { function, receiver: None, ref args, .. })) => {
                assert_eq!(function, replacement);
                assert_eq!(args.len(), 2);
            }
            ref other => panic!("unexpected body {:?}", other),
        }
        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.call(main, None, vec![]).unwrap().as_int(), Some(42));
    }

    #[test]
    fn test_field_write_is_reported() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        b.function(
            "mutate",
            &[("p", Type::class(point.class))],
            Type::Unit,
            Body::Expr(Expr::set_field(point.fields[0], Expr::param(0), Expr::int(1))),
        );
        let program = b.finish();
        let report = lower(&program);

        let diag = report.diagnostics.iter().next().unwrap();
        assert_eq!(diag.code, DiagnosticCode::UnsupportedFieldWrite);
        assert_eq!(diag.context.as_deref(), Some("mutate"));
    }

    #[test]
    fn test_reference_to_replaced_function_is_reported() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let consume = b.function(
            "consume",
            &[("p", Type::class(point.class))],
            Type::Unit,
            Body::Block(vec![]),
        );
        b.function(
            "take",
            &[],
            Type::Any,
            Body::Expr(Expr::FunctionReference { function: consume }),
        );
        let program = b.finish();
        let report = lower(&program);

        let codes: Vec<_> = report.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::UnsupportedFunctionReference]);
    }

    #[test]
    fn test_impure_aggregate_argument_is_reported() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let point_ty = Type::class(point.class);
        let make = b.function(
            "make",
            &[],
            point_ty.clone(),
            Body::Expr(Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)])),
        );
        let consume = b.function("consume", &[("p", point_ty)], Type::Unit, Body::Block(vec![]));
        b.function(
            "main",
            &[],
            Type::Unit,
            Body::Expr(Expr::call(consume, vec![Expr::call(make, vec![])])),
        );
        let program = b.finish();
        let report = lower(&program);

        let diag = report.diagnostics.iter().next().unwrap();
        assert_eq!(diag.code, DiagnosticCode::UnsupportedReceiver);
        assert_eq!(diag.context.as_deref(), Some("main"));
    }

    #[test]
    fn test_field_read_dropping_side_effects_is_reported() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let point_ty = Type::class(point.class);
        let noisy = b.function(
            "noisy",
            &[],
            Type::Int,
            Body::Block(vec![
                Stmt::expr(Expr::intrinsic(Intrinsic::Print, vec![Expr::string("side effect")])),
                Stmt::ret(Expr::int(2)),
            ]),
        );
        b.function(
            "main",
            &[],
            Type::Int,
            Body::Expr(Expr::get_field(
                point.fields[0],
                Expr::construct(point.constructor, vec![Expr::int(1), Expr::call(noisy, vec![])]),
            )),
        );
        b.function(
            "quiet",
            &[],
            Type::Int,
            Body::Block(vec![
                Stmt::Let {
                    id: 0,
                    name: "p".into(),
                    ty: point_ty,
                    init: Expr::construct(point.constructor, vec![Expr::int(3), Expr::int(4)]),
                },
                Stmt::ret(Expr::intrinsic(
                    Intrinsic::Add,
                    vec![
                        Expr::get_field(point.fields[1], Expr::local(0)),
                        Expr::get_field(
                            point.fields[0],
                            Expr::construct(point.constructor, vec![Expr::int(5), Expr::int(6)]),
                        ),
                    ],
                )),
            ]),
        );
        let program = b.finish();
        let report = lower(&program);

        let codes: Vec<_> = report.diagnostics.iter().map(|d| (d.code, d.context.clone())).collect();
        assert_eq!(codes, vec![(DiagnosticCode::UnsupportedReceiver, Some("main".to_string()))]);
        // Dropped leaves that are constants or unbox calls on a local are fine.
        assert!(!report.diagnostics.iter().any(|d| d.context.as_deref() == Some("quiet")));
    }

    #[test]
    fn test_nested_aggregates_keep_behaviour() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let line = b.value_class(
            "Line",
            &[("start", Type::class(point.class)), ("end", Type::class(point.class))],
        );
        let line_ty = Type::class(line.class);
        let make_line = |x1: i64, y1: i64, x2: i64, y2: i64| {
            Expr::construct(
                line.constructor,
                vec![
                    Expr::construct(point.constructor, vec![Expr::int(x1), Expr::int(y1)]),
                    Expr::construct(point.constructor, vec![Expr::int(x2), Expr::int(y2)]),
                ],
            )
        };
        // f(l) = l.start.x + l.end.y
        let f = b.function(
            "f",
            &[("l", line_ty.clone())],
            Type::Int,
            Body::Expr(Expr::intrinsic(
                Intrinsic::Add,
                vec![
                    Expr::get_field(
                        point.fields[0],
                        Expr::call_method(line.getters[0], Expr::param(0), vec![]),
                    ),
                    Expr::call_method(
                        point.getters[1],
                        Expr::get_field(line.fields[1], Expr::param(0)),
                        vec![],
                    ),
                ],
            )),
        );
        let print = |e: Expr| Stmt::expr(Expr::intrinsic(Intrinsic::Print, vec![e]));
        let main = b.function(
            "main",
            &[],
            Type::Int,
            Body::Block(vec![
                Stmt::Let { id: 0, name: "l".into(), ty: line_ty, init: make_line(1, 2, 3, 4) },
                print(Expr::equals(Expr::local(0), make_line(1, 2, 3, 4))),
                print(Expr::equals(Expr::local(0), make_line(1, 2, 3, 5))),
                print(Expr::equals(
                    Expr::call_method(line.getters[0], Expr::local(0), vec![]),
                    Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)]),
                )),
                Stmt::ret(Expr::call(f, vec![Expr::local(0)])),
            ]),
        );
        let program = b.finish();
        let (before, before_output) = run_main(&program, main);

        let report = lower(&program);
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        let (after, after_output) = run_main(&program, main);

        assert_eq!(before.as_int(), Some(5));
        assert_eq!(after.as_int(), Some(5));
        assert_eq!(before_output, vec!["true", "false", "true"]);
        assert_eq!(after_output, before_output);
    }

    #[test]
    fn test_moved_bodies_read_remapped_parameters() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        // offset(p, k) = p.y + k
        let offset = b.function(
            "offset",
            &[("p", Type::class(point.class)), ("k", Type::Int)],
            Type::Int,
            Body::Expr(Expr::intrinsic(
                Intrinsic::Add,
                vec![Expr::get_field(point.fields[1], Expr::param(0)), Expr::param(1)],
            )),
        );
        // Point.shift(k) = this.x + k
        let shift = b.method(
            point.class,
            "shift",
            &[("k", Type::Int)],
            Type::Int,
            Some(Body::Expr(Expr::intrinsic(
                Intrinsic::Add,
                vec![Expr::get_field(point.fields[0], Expr::this()), Expr::param(0)],
            ))),
        );
        let main = b.function(
            "main",
            &[],
            Type::Int,
            Body::Block(vec![
                Stmt::expr(Expr::intrinsic(
                    Intrinsic::Print,
                    vec![Expr::call(
                        offset,
                        vec![
                            Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)]),
                            Expr::int(10),
                        ],
                    )],
                )),
                Stmt::ret(Expr::call_method(
                    shift,
                    Expr::construct(point.constructor, vec![Expr::int(20), Expr::int(22)]),
                    vec![Expr::int(5)],
                )),
            ]),
        );
        let program = b.finish();
        let (before, before_output) = run_main(&program, main);

        let report = lower(&program);
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        let (after, after_output) = run_main(&program, main);

        assert_eq!(before.as_int(), Some(25));
        assert_eq!(after.as_int(), Some(25));
        assert_eq!(before_output, vec!["12"]);
        assert_eq!(after_output, before_output);
    }

    #[test]
    fn test_user_equals_is_ignored_with_warning() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        b.method(
            point.class,
            "equals",
            &[("other", Type::Any.nullable())],
            Type::Boolean,
            Some(Body::Expr(Expr::bool(false))),
        );
        let program = b.finish();
        let report = lower(&program);

        assert!(!report.has_errors());
        let warning = report.diagnostics.iter().next().unwrap();
        assert_eq!(warning.code, DiagnosticCode::IgnoredUserEquals);
        assert_eq!(warning.context.as_deref(), Some("Point.equals"));
    }

    #[test]
    fn test_parameter_reassignment_is_reported() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        b.function(
            "reset",
            &[("p", Type::class(point.class))],
            Type::Unit,
            Body::Expr(Expr::Set {
                target: ValueRef::Param(0),
                value: Box::new(Expr::construct(point.constructor, vec![Expr::int(0), Expr::int(0)])),
            }),
        );
        let program = b.finish();
        let report = lower(&program);
        let diag = report.diagnostics.iter().next().unwrap();
        assert_eq!(diag.code, DiagnosticCode::UnsupportedFeature);
    }

    #[test]
    fn test_many_classes_lower_in_parallel() {
        let mut b = ProgramBuilder::new();
        let handles: Vec<_> = (0..16)
            .map(|i| b.value_class(&format!("P{}", i), &[("a", Type::Int), ("b", Type::String)]))
            .collect();
        let program = b.finish();
        let report = lower_program(
            &program,
            &LoweringOptions { threads: Some(4), rewrite_call_sites: false },
        )
        .unwrap();

        let mut lowered = report.lowered_classes.clone();
        lowered.sort();
        let mut expected: Vec<_> = handles.iter().map(|h| h.class).collect();
        expected.sort();
        assert_eq!(lowered, expected);
        for h in &handles {
            assert_eq!(program.fields(h.class).len(), 2);
            assert!(!program.members(h.class).contains(&h.constructor));
        }
        assert_eq!(report.rewritten_bodies, 0);
    }
}
