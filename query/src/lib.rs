//! Query language for almanac records.
//!
//! Queries are prefix s-expressions such as
//! `(and (contains "full_name" "ann") (exists "email"))`. A [`Compiler`]
//! configured with a [`PredicateTable`] turns the text into an immutable
//! [`Expression`] once; an [`Evaluator`] then tests it against any number of
//! records.
//!
//! # Design
//!
//! - Parsing and type checking happen up front; evaluation cannot fail.
//! - Predicates are a closed set of [`Builtin`]s. Tables only decide which
//!   names resolve to which builtin, so dialects and aliases are data.
//! - Text tests fold case with Unicode lowercasing. An absent field compares
//!   as the empty string.
//! - Evaluation is pure: the current time and the recurrence expansion are
//!   supplied by the [`Evaluator`].

mod compile;
mod coverage;
mod eval;
mod expr;
pub mod sexp;
mod table;
pub mod time;

pub use compile::{CompileError, Compiler};
pub use coverage::is_summary_answerable;
pub use eval::{Evaluator, Interval, OccurrenceSource, SingleOccurrence, evaluate};
pub use expr::{Expression, FieldSelector, Node, TextTest, TimeExpr, ValueType};
pub use table::{ANY_FIELD, Builtin, PredicateTable, Signature};
