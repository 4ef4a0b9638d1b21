//! Shared types, errors and configuration for the pmake execution engine.
//!
//! This crate provides the foundational types used across all other pmake crates:
//! - `MakeError`: unified error taxonomy
//! - `BuildConfig`: knobs for one build invocation
//! - `NodeFlags` / `MadeState`: per-target attributes shared by the scheduler and executors
//! - `Diagnostic`: a recorded, non-fatal expansion problem

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unified error type for all pmake subsystems.
#[derive(Debug, thiserror::Error)]
pub enum MakeError {
    // === Expansion Errors ===
    #[error("{message}")]
    Expansion { message: String },

    // === Recipe Errors ===
    #[error("*** [{target}] {status}")]
    CommandFailed { target: String, status: String },

    #[error("{errors} error(s), stopped in {}", stopped_in.display())]
    BuildFailed { errors: usize, stopped_in: PathBuf },

    // === Fatal Errors ===
    #[error("{0}")]
    Fatal(String),

    #[error("token botch: {released} releases for {acquired} acquires and {preload} preloaded")]
    TokenBotch {
        acquired: u64,
        released: u64,
        preload: u64,
    },

    #[error("no free job slot for target '{target}' (capacity {capacity})")]
    NoFreeSlot { target: String, capacity: usize },

    #[error("could not start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A failure has been detected in another branch of the parallel make ({reason})")]
    AbortedByPeer { reason: AbortReason },

    // === Signals ===
    #[error("interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    // === Collaborators ===
    #[error("bad shell specification: {0}")]
    Shell(String),

    #[error("graph error: {0}")]
    Graph(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MakeError {
    /// Returns `true` if the whole invocation must stop rather than a single target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MakeError::Fatal(_)
                | MakeError::TokenBotch { .. }
                | MakeError::NoFreeSlot { .. }
                | MakeError::Spawn { .. }
                | MakeError::AbortedByPeer { .. }
                | MakeError::Interrupted { .. }
        )
    }

    /// The process exit status a top-level binary should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MakeError::BuildFailed { .. } | MakeError::CommandFailed { .. } => 1,
            MakeError::Expansion { .. } => 1,
            MakeError::AbortedByPeer { .. } => 6,
            MakeError::Interrupted { signal } => 128 + signal,
            _ => 2,
        }
    }
}

/// A convenience alias for `Result<T, MakeError>`.
pub type Result<T> = std::result::Result<T, MakeError>;

// ---------------------------------------------------------------------------
// Abort state
// ---------------------------------------------------------------------------

/// Why a build (and everything sharing its token pool) is winding down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbortReason {
    /// A recipe failed and keep-going is off.
    Error,
    /// A terminating signal arrived.
    Interrupt,
    /// Finish what is running, start nothing new.
    Wait,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Error => write!(f, "error"),
            AbortReason::Interrupt => write!(f, "interrupt"),
            AbortReason::Wait => write!(f, "wait"),
        }
    }
}

// ---------------------------------------------------------------------------
// Node attributes
// ---------------------------------------------------------------------------

/// Per-target attribute bits supplied by the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFlags {
    /// Do not echo commands (`.SILENT`).
    pub silent: bool,
    /// Ignore command failures (`.IGNORE`).
    pub ignore: bool,
    /// Not a file; always out of date (`.PHONY`).
    pub phony: bool,
    /// Never delete on error or interrupt (`.PRECIOUS`).
    pub precious: bool,
    /// `.BEGIN`, `.END`, `.INTERRUPT` and friends.
    pub special: bool,
    /// Remaining commands are deferred to `.END` (set by `...`).
    pub save_cmds: bool,
    /// Run commands even under `-n` (`.MAKE`).
    pub make: bool,
}

/// How far a node has progressed through the build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MadeState {
    /// Not examined yet.
    #[default]
    Unmade,
    /// Examined but waiting on children.
    Deferred,
    /// All children done; queued to be made.
    Requested,
    /// A job is running for it.
    BeingMade,
    /// Commands ran successfully.
    Made,
    /// Nothing needed doing.
    UpToDate,
    /// A command failed.
    Error,
    /// A child failed so this was never attempted.
    Aborted,
}

impl MadeState {
    /// Terminal states after which parents may proceed (or give up).
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            MadeState::Made | MadeState::UpToDate | MadeState::Error | MadeState::Aborted
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, MadeState::Error | MadeState::Aborted)
    }
}

impl fmt::Display for MadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MadeState::Unmade => "unmade",
            MadeState::Deferred => "deferred",
            MadeState::Requested => "requested",
            MadeState::BeingMade => "being made",
            MadeState::Made => "made",
            MadeState::UpToDate => "up-to-date",
            MadeState::Error => "error",
            MadeState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// A problem found while expanding text. Recorded once; never aborts the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    /// The expression (or command) text the problem was found in.
    pub context: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (in \"{}\")", self.message, self.context)
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A token-pool pipe inherited from a parent build: read end, write end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jobserver {
    pub read_fd: i32,
    pub write_fd: i32,
}

impl Jobserver {
    /// Parse the `R,W` argument of `-J`.
    pub fn parse(arg: &str) -> Option<Self> {
        let (r, w) = arg.split_once(',')?;
        Some(Self {
            read_fd: r.trim().parse().ok()?,
            write_fd: w.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for Jobserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.read_fd, self.write_fd)
    }
}

/// Knobs for one build invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum number of concurrently running recipes.
    pub jobs: usize,
    /// Continue with unrelated targets after a failure (`-k`).
    pub keep_going: bool,
    /// Run one command at a time without the token pool (`-B`).
    pub compat: bool,
    /// Treat undefined variables in recipes as errors.
    pub strict: bool,
    /// Print commands instead of running them (`-n`).
    pub no_execute: bool,
    /// Do not echo commands (`-s`).
    pub silent: bool,
    /// Ignore every command failure (`-i`).
    pub ignore_errors: bool,
    /// Look at the environment before global variables (`-e`).
    pub check_env_first: bool,
    /// Remove a target whose commands failed (`.DELETE_ON_ERROR`).
    pub delete_on_error: bool,
    /// Keep temporary job scripts around for debugging.
    pub keep_script: bool,
    /// Prefix of the "output switched" marker (`.MAKE.JOB.PREFIX`).
    pub job_prefix: String,
    /// Where job scripts are written. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
    /// Token pool inherited from a parent build.
    pub jobserver: Option<Jobserver>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            keep_going: false,
            compat: false,
            strict: false,
            no_execute: false,
            silent: false,
            ignore_errors: false,
            check_env_first: false,
            delete_on_error: false,
            keep_script: false,
            job_prefix: "---".to_string(),
            temp_dir: None,
            jobserver: None,
        }
    }
}

impl BuildConfig {
    /// Compat mode is used when explicitly selected or when parallelism is off.
    pub fn use_compat(&self) -> bool {
        self.compat || (self.jobs <= 1 && self.jobserver.is_none())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Apply the flags found in a `MAKEFLAGS` value inherited from a parent build.
    ///
    /// Only the options that affect execution are honoured: `-jN`, `-J R,W`,
    /// `-k`, `-n`, `-s`, `-i`, `-e`, `-B`. Unknown words are skipped.
    pub fn apply_makeflags(&mut self, makeflags: &str) {
        let mut words = makeflags.split_whitespace().peekable();
        while let Some(word) = words.next() {
            let Some(opts) = word.strip_prefix('-') else {
                continue;
            };
            let mut chars = opts.char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    'j' | 'J' => {
                        let rest = &opts[i + 1..];
                        let arg = if rest.is_empty() {
                            words.next().unwrap_or_default().to_string()
                        } else {
                            rest.to_string()
                        };
                        if c == 'j' {
                            if let Ok(n) = arg.parse::<usize>() {
                                self.jobs = n.max(1);
                            }
                        } else if let Some(js) = Jobserver::parse(&arg) {
                            self.jobserver = Some(js);
                        }
                        break;
                    }
                    'k' => self.keep_going = true,
                    'n' => self.no_execute = true,
                    's' => self.silent = true,
                    'i' => self.ignore_errors = true,
                    'e' => self.check_env_first = true,
                    'B' => self.compat = true,
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_category() {
        let failed = MakeError::BuildFailed {
            errors: 2,
            stopped_in: PathBuf::from("/tmp"),
        };
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(MakeError::Fatal("boom".into()).exit_code(), 2);
        assert_eq!(
            MakeError::AbortedByPeer {
                reason: AbortReason::Error
            }
            .exit_code(),
            6
        );
        assert_eq!(MakeError::Interrupted { signal: 2 }.exit_code(), 130);
    }

    #[test]
    fn fatal_errors_are_flagged() {
        assert!(MakeError::Fatal("x".into()).is_fatal());
        assert!(MakeError::Interrupted { signal: 15 }.is_fatal());
        assert!(!MakeError::CommandFailed {
            target: "all".into(),
            status: "Error code 1".into()
        }
        .is_fatal());
    }

    #[test]
    fn build_failed_names_directory() {
        let err = MakeError::BuildFailed {
            errors: 1,
            stopped_in: PathBuf::from("/src/lib"),
        };
        assert_eq!(err.to_string(), "1 error(s), stopped in /src/lib");
    }

    #[test]
    fn made_state_terminal_states() {
        assert!(MadeState::Made.is_finished());
        assert!(MadeState::Aborted.is_finished());
        assert!(!MadeState::BeingMade.is_finished());
        assert!(MadeState::Error.is_failure());
        assert!(!MadeState::UpToDate.is_failure());
    }

    #[test]
    fn jobserver_parse_and_display() {
        let js = Jobserver::parse("3,4").unwrap();
        assert_eq!(js.read_fd, 3);
        assert_eq!(js.write_fd, 4);
        assert_eq!(js.to_string(), "3,4");
        assert!(Jobserver::parse("3").is_none());
        assert!(Jobserver::parse("a,b").is_none());
    }

    #[test]
    fn makeflags_set_jobs_and_jobserver() {
        let mut config = BuildConfig::default();
        config.apply_makeflags("-j 4 -J 5,6 -k FOO=bar");
        assert_eq!(config.jobs, 4);
        assert_eq!(
            config.jobserver,
            Some(Jobserver {
                read_fd: 5,
                write_fd: 6
            })
        );
        assert!(config.keep_going);
        assert!(!config.use_compat());
    }

    #[test]
    fn makeflags_accept_attached_arguments() {
        let mut config = BuildConfig::default();
        config.apply_makeflags("-ks -j8 -J7,9");
        assert!(config.keep_going);
        assert!(config.silent);
        assert_eq!(config.jobs, 8);
        assert_eq!(config.jobserver.unwrap().write_fd, 9);
    }

    #[test]
    fn single_job_defaults_to_compat() {
        let config = BuildConfig::default();
        assert!(config.use_compat());
        let parallel = BuildConfig {
            jobs: 3,
            ..BuildConfig::default()
        };
        assert!(!parallel.use_compat());
    }

    #[test]
    fn diagnostic_display_includes_context() {
        let d = Diagnostic {
            message: "Unknown modifier \":Z\"".into(),
            context: "${X:Z}".into(),
        };
        assert_eq!(d.to_string(), "Unknown modifier \":Z\" (in \"${X:Z}\")");
    }
}
