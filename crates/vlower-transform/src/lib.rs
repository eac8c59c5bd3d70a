//! Multi-field value class lowering
//!
//! A multi-field value class is flattened into its leaves: fields,
//! parameters and equality work on the leaf values, and a boxed object is
//! only built where a reference is needed.
//!
//! - [`registry`]: memoized per-class declarations and per-function
//!   replacement decisions, shared by all workers
//! - [`specific`]: the declarations generated for one class
//! - [`decision`]: whether and how a function is replaced
//! - [`lowering`]: the per-class state machine and the pass driver
//! - [`rewrite`]: call-site rewriting of function bodies

pub mod decision;
pub mod error;
pub mod lowering;
pub mod memo;
pub mod registry;
pub mod rewrite;
pub mod specific;

pub use decision::{Decision, LeafSlot, ParamSlot, Replacement};
pub use error::{LoweringError, Result};
pub use lowering::{
    lower_program, ClassOutcome, LoweringOptions, LoweringReport, LoweringState,
    MultiFieldValueClassLowering,
};
pub use memo::Memoized;
pub use registry::{MultiFieldValueClassReplacements, RemovedField};
pub use specific::{Leaf, ReplacementProperty, SpecificDeclarations};
