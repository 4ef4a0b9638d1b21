//! The build driver shared by the parallel scheduler and the sequential
//! executor.
//!
//! [`Build`] owns everything one invocation needs (configuration, graph,
//! variables, output, events, signals) and implements the bookkeeping both
//! executors perform the same way: settling nodes that need no commands,
//! recording completion, judging exit statuses and writing job scripts.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Instant;

use pmake_types::{AbortReason, BuildConfig, MadeState, MakeError, Result};
use pmake_vars::Vars;

use crate::compat::Compat;
use crate::events::{BuildEvent, EventEmitter};
use crate::graph::{Graph, NodeId, Verdict, END};
use crate::job::Exit;
use crate::output::OutputSink;
use crate::recipe::{expand_recipe, Recipe};
use crate::scheduler::Scheduler;
use crate::signals::{SignalBridge, SignalInjector};
use crate::token::TokenPool;

/// Result of looking at a ready node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    /// Its commands must run.
    Run,
    /// Finished without running anything.
    Done,
    /// Finished as a failure that counts as an error.
    Failed,
}

pub struct Build {
    pub(crate) config: BuildConfig,
    pub(crate) graph: Graph,
    pub(crate) vars: Vars,
    pub(crate) output: OutputSink,
    pub(crate) emitter: EventEmitter,
    pub(crate) signals: SignalBridge,
    /// Commands collected after `...`, run with `.END`.
    pub(crate) deferred_end: Vec<String>,
    pub(crate) errors: usize,
    pub(crate) aborting: Option<AbortReason>,
}

impl Build {
    pub fn new(config: BuildConfig, graph: Graph, vars: Vars) -> Self {
        let markers = config.jobs > 1 && !config.compat;
        let output = OutputSink::stdout(config.job_prefix.clone(), markers);
        Self {
            config,
            graph,
            vars,
            output,
            emitter: EventEmitter::default(),
            signals: SignalBridge::detached(),
            deferred_end: Vec::new(),
            errors: 0,
            aborting: None,
        }
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_signals(mut self, signals: SignalBridge) -> Self {
        self.signals = signals;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Vars {
        &mut self.vars
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn injector(&self) -> SignalInjector {
        self.signals.injector()
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Make `goals` (or the default goals) with the executor the
    /// configuration selects.
    pub async fn run(&mut self, goals: &[String]) -> Result<()> {
        let started = Instant::now();
        let compat = self.config.use_compat();
        self.emitter.emit(BuildEvent::BuildStarted {
            goals: goals.to_vec(),
            jobs: self.config.jobs,
            compat,
        });
        tracing::info!(jobs = self.config.jobs, compat, "build started");

        let pool = if compat {
            None
        } else {
            match token_pool(&self.config) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(error = %e, "token pool unavailable, running sequentially");
                    self.output
                        .message(&format!("pmake: warning: {e}; running one command at a time"));
                    self.output.set_markers(false);
                    None
                }
            }
        };
        let result = match pool {
            Some(pool) => Scheduler::new(self, pool).make(goals).await,
            None => Compat::new(self).make(goals).await,
        };

        self.emitter.emit(BuildEvent::BuildFinished {
            errors: self.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        if let Err(e) = &result {
            tracing::info!(error = %e, "build stopped");
        }
        result
    }

    pub(crate) fn failed(&self) -> MakeError {
        MakeError::BuildFailed {
            errors: self.errors.max(1),
            stopped_in: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub(crate) fn abort(&mut self, reason: AbortReason) {
        if self.aborting.is_none() {
            tracing::debug!(%reason, "no new jobs will be started");
            self.aborting = Some(reason);
        }
    }

    // --- node bookkeeping ---

    /// Record that a node finished and queue the parents it released.
    pub(crate) fn complete(&mut self, id: NodeId, state: MadeState, ready: &mut VecDeque<NodeId>) {
        let target = self.graph.node(id).name.clone();
        let event = if state.is_failure() {
            BuildEvent::TargetFailed {
                target: target.clone(),
                state,
            }
        } else {
            BuildEvent::TargetMade {
                target: target.clone(),
                state,
            }
        };
        self.emitter.emit(event);
        tracing::debug!(target = %target, %state, "target finished");
        ready.extend(self.graph.finish(id, state));
    }

    /// Handle a ready node that does not need a job.
    pub(crate) fn settle(&mut self, id: NodeId, ready: &mut VecDeque<NodeId>) -> Settled {
        match self.graph.verdict(id) {
            Verdict::Run => Settled::Run,
            Verdict::Skip(state) => {
                self.complete(id, state, ready);
                Settled::Done
            }
            Verdict::Abort => {
                let name = self.graph.node(id).name.clone();
                self.output
                    .message(&format!("`{name}' not remade because of errors"));
                self.complete(id, MadeState::Aborted, ready);
                Settled::Done
            }
            Verdict::NoRule => {
                let name = self.graph.node(id).name.clone();
                let tail = if self.config.keep_going {
                    " (continuing)"
                } else {
                    ". Stop"
                };
                self.output
                    .message(&format!("pmake: don't know how to make {name}{tail}"));
                self.errors += 1;
                self.complete(id, MadeState::Error, ready);
                Settled::Failed
            }
        }
    }

    /// Set the node's local variables and expand its commands. Commands
    /// after `...` are queued for `.END`; `.END` itself picks them up.
    pub(crate) fn prepare_recipe(&mut self, id: NodeId) -> Result<Recipe> {
        self.graph.set_locals(id);
        let strict = self.config.strict;
        let node = self.graph.node_mut(id);
        let mut recipe = expand_recipe(&mut self.vars, node, strict)?;
        if node.name == END {
            recipe.lines.append(&mut self.deferred_end);
        }
        self.deferred_end.append(&mut recipe.deferred);
        Ok(recipe)
    }

    /// Environment for a command run on behalf of `id`.
    pub(crate) fn child_env(&mut self, id: NodeId, makeflags: Option<&str>) -> Vec<(String, String)> {
        let node = self.graph.node_mut(id);
        let mut env = self.vars.child_env(Some(&mut node.locals));
        if let Some(extra) = makeflags {
            add_makeflags(&mut env, extra);
        }
        env
    }

    /// The failure line for a job, and whether the node still counts as made.
    pub(crate) fn judge(&mut self, id: NodeId, exit: Exit, ignore: bool) -> MadeState {
        if exit.success() {
            return MadeState::Made;
        }
        let name = self.graph.node(id).name.clone();
        let ignored = ignore && matches!(exit, Exit::Code(_));
        let suffix = if ignored { " (ignored)" } else { "" };
        self.output
            .message_for(&name, &format!("*** [{name}] {exit}{suffix}"));
        if ignored {
            return MadeState::Made;
        }
        self.errors += 1;
        if self.config.delete_on_error || matches!(exit, Exit::Signal(_)) {
            self.remove_target(id);
        }
        MadeState::Error
    }

    pub(crate) fn remove_target(&mut self, id: NodeId) {
        if let Some(path) = self.graph.remove_target_file(id) {
            self.output
                .message(&format!("*** {} removed", path.display()));
        }
    }

    /// Print "`goal' is up to date." for goals that needed nothing.
    pub(crate) fn report_goals(&mut self, goals: &[NodeId]) {
        for &goal in goals {
            let node = self.graph.node(goal);
            if node.made == MadeState::UpToDate {
                let line = format!("`{}' is up to date.", node.name);
                self.output.message(&line);
            }
        }
    }

    /// Write a job script into the temp directory and return it opened for
    /// reading from the start, with its path.
    pub(crate) fn write_script(&self, script: &str) -> Result<(File, PathBuf)> {
        let path = self
            .config
            .temp_dir()
            .join(format!("pmake-{}.sh", uuid::Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(script.as_bytes())?;
        file.seek(SeekFrom::Start(0))?;
        Ok((file, path))
    }
}

/// The pool a parallel build draws from: inherited when a parent build
/// passed one down, otherwise a fresh root pool.
fn token_pool(config: &BuildConfig) -> Result<TokenPool> {
    match config.jobserver {
        Some(js) => TokenPool::from_inherited(js, config.jobs),
        None => TokenPool::new_root(config.jobs),
    }
}

/// Add `extra` to `MAKEFLAGS` in a child environment. The job-control
/// words `-J R,W` and `-j N` are replaced rather than repeated, so they do
/// not pile up down a chain of sub-builds.
fn add_makeflags(env: &mut Vec<(String, String)>, extra: &str) {
    let Some((_, value)) = env.iter_mut().find(|(k, _)| k == "MAKEFLAGS") else {
        env.push(("MAKEFLAGS".to_string(), extra.to_string()));
        return;
    };
    let mut kept = Vec::new();
    let mut words = value.split_whitespace();
    while let Some(word) = words.next() {
        match word {
            "-j" | "-J" => {
                words.next();
            }
            w if w.starts_with("-j") || w.starts_with("-J") => {}
            w => kept.push(w),
        }
    }
    kept.push(extra);
    *value = kept.join(" ");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn makeflags_are_appended() {
        let mut env = vec![("MAKEFLAGS".to_string(), "-k".to_string())];
        add_makeflags(&mut env, "-J 3,4 -j2");
        assert_eq!(env[0].1, "-k -J 3,4 -j2");

        let mut env = Vec::new();
        add_makeflags(&mut env, "-J 3,4");
        assert_eq!(env, vec![("MAKEFLAGS".to_string(), "-J 3,4".to_string())]);
    }

    #[test]
    fn job_control_words_are_replaced_at_each_level() {
        let mut env = vec![("MAKEFLAGS".to_string(), "-k".to_string())];
        add_makeflags(&mut env, "-J 3,4 -j2");
        add_makeflags(&mut env, "-J 9,10 -j3");
        assert_eq!(env[0].1, "-k -J 9,10 -j3");

        let mut env = vec![("MAKEFLAGS".to_string(), "-J5,6 -s -j 4".to_string())];
        add_makeflags(&mut env, "-J 7,8 -j4");
        assert_eq!(env[0].1, "-s -J 7,8 -j4");
    }

    #[test]
    fn scripts_are_written_and_rewound() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..BuildConfig::default()
        };
        let build = Build::new(config, Graph::new(), Vars::new());
        let (mut file, path) = build.write_script("echo hi\n").unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "echo hi\n");
        assert!(path.starts_with(dir.path()));
    }

    #[test]
    fn ignored_failures_still_count_as_made() {
        let (sink, out) = OutputSink::capture("---", false);
        let mut graph = Graph::new();
        let id = graph.add_node("t");
        let mut build = Build::new(BuildConfig::default(), graph, Vars::new()).with_output(sink);

        assert_eq!(build.judge(id, Exit::Code(1), true), MadeState::Made);
        assert_eq!(build.errors(), 0);
        assert_eq!(build.judge(id, Exit::Signal(9), true), MadeState::Error);
        assert_eq!(build.judge(id, Exit::Code(0), false), MadeState::Made);
        assert_eq!(build.errors(), 1);
        assert_eq!(
            out.text(),
            "*** [t] Error code 1 (ignored)\n*** [t] Signal 9\n"
        );
    }
}
