//! Variables and their expansion for pmake.
//!
//! - [`Vars`] holds the command-line, global and internal scopes plus a
//!   private copy of the environment, and implements assignment, export and
//!   the lookup chain.
//! - [`Scope`] is one table of variables; target-local scopes are owned by
//!   their targets and passed in where needed.
//! - [`Expander`] evaluates `$x`, `${name}` and `${name:modifiers}`.

mod cond;
pub mod expand;
mod modifiers;
pub mod pattern;
pub mod scope;
pub mod store;
pub mod words;

pub use expand::{EvalMode, ExprValue, Expander};
pub use pattern::WordPattern;
pub use scope::{canonical_name, Scope, ScopeKind, Var, VarFlags};
pub use store::{parse_bool, ExportKind, ExportMode, SetOpts, TargetInfo, Vars};
