//! Shell abstraction for pmake.
//!
//! A [`Shell`] describes one shell dialect purely textually: how to turn echo
//! and error checking on and off, and which templates wrap a command when the
//! dialect lacks native control. [`ScriptWriter`] uses it to turn recipe lines
//! into the exact bytes of a job script. [`words`] holds the helpers shared with
//! the sequential executor (metacharacter test, argument splitting) and
//! [`capture`] runs `:!cmd!`-style shell captures.

pub mod capture;
pub mod script;
pub mod shell;
pub mod words;

pub use capture::{capture, Capture};
pub use script::{escape_dbl_quote, CommandFlags, JobFlags, ScriptWriter};
pub use shell::Shell;
pub use words::{needs_shell, split_words};
