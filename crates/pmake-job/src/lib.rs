//! Running a dependency graph for pmake.
//!
//! - [`Graph`] is the target graph handed over by the parser (or loaded from
//!   JSON), with the readiness bookkeeping both executors share.
//! - [`Build`] owns one invocation and picks the executor: the parallel
//!   [`Scheduler`] draws from a [`TokenPool`] shared with child makes through
//!   `MAKEFLAGS`, while [`Compat`] makes one target and one command at a time.
//! - [`OutputSink`] serialises job output, [`EventEmitter`] reports progress
//!   and [`SignalBridge`] turns signals into messages for the running loop.

pub mod compat;
pub mod events;
pub mod graph;
pub mod job;
pub mod make;
pub mod output;
pub mod recipe;
pub mod scheduler;
pub mod signals;
pub mod token;

pub use compat::Compat;
pub use events::{BuildEvent, EventEmitter};
pub use graph::{Graph, GraphFile, Node, NodeId, TargetDef, Verdict};
pub use job::{Exit, Job, JobId, JobTable};
pub use make::Build;
pub use output::{CapturedOutput, OutputSink};
pub use scheduler::Scheduler;
pub use signals::{reraise, SignalBridge, SignalInjector};
pub use token::{Acquire, TokenPool};
