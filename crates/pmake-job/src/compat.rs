//! The sequential executor.
//!
//! Targets are made one at a time and each command line is its own child:
//! through `shell -c` when it uses shell syntax, or exec'd directly when it
//! does not. No token pool and no scripts are involved.

use std::collections::VecDeque;
use std::process::Stdio;

use tokio::sync::mpsc;

use pmake_shell::{needs_shell, split_words, CommandFlags};
use pmake_types::{AbortReason, MadeState, MakeError, Result};

use crate::events::BuildEvent;
use crate::graph::{NodeId, END};
use crate::job::{signal_group, spawn, Exit, JobId, JobMsg, SpawnSpec};
use crate::make::{Build, Settled};
use crate::recipe::{expand_line, is_save_marker};
use crate::signals::{classify, stop_self, SignalAction};

/// Outcome of one command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Failed,
    /// Killed by a signal; the target is removed.
    Killed,
}

pub struct Compat<'b> {
    build: &'b mut Build,
    ready: VecDeque<NodeId>,
    tx: mpsc::UnboundedSender<JobMsg>,
    rx: mpsc::UnboundedReceiver<JobMsg>,
}

impl<'b> Compat<'b> {
    pub fn new(build: &'b mut Build) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            build,
            ready: VecDeque::new(),
            tx,
            rx,
        }
    }

    /// Make `goals`, running `.BEGIN` first and `.END` last.
    pub async fn make(mut self, goals: &[String]) -> Result<()> {
        let result = self.make_goals(goals).await;
        if let Err(MakeError::Interrupted { signal }) = &result {
            if *signal == libc::SIGINT {
                if let Some(handler) = self.build.graph.interrupt() {
                    if let Err(e) = self.make_node(handler).await {
                        tracing::warn!(error = %e, ".INTERRUPT failed");
                    }
                }
            }
        }
        result
    }

    async fn make_goals(&mut self, goals: &[String]) -> Result<()> {
        let goal_ids = self.build.graph.resolve_goals(goals)?;

        if let Some(begin) = self.build.graph.begin() {
            if !self.make_special(begin).await? {
                return Err(self.build.failed());
            }
        }

        self.ready = self.build.graph.prepare(&goal_ids)?;
        while let Some(id) = self.ready.pop_front() {
            if self.build.aborting.is_some() {
                break;
            }
            match self.build.settle(id, &mut self.ready) {
                Settled::Run => self.make_node(id).await?,
                Settled::Done => {}
                Settled::Failed => {
                    if !self.build.config.keep_going {
                        self.build.abort(AbortReason::Error);
                    }
                }
            }
        }

        if self.build.errors > 0 {
            self.build.output.message("");
            self.build.output.message("Stop.");
            return Err(self.build.failed());
        }

        let end = match self.build.graph.end() {
            None if !self.build.deferred_end.is_empty() => Some(self.build.graph.add_node(END)),
            end => end,
        };
        if let Some(end) = end {
            if !self.make_special(end).await? {
                return Err(self.build.failed());
            }
        }
        self.build.report_goals(&goal_ids);
        Ok(())
    }

    async fn make_special(&mut self, id: NodeId) -> Result<bool> {
        self.make_node(id).await?;
        Ok(!self.build.graph.node(id).made.is_failure())
    }

    /// Run a node's commands in order, stopping at the first failure.
    async fn make_node(&mut self, id: NodeId) -> Result<()> {
        self.build.graph.set_locals(id);
        self.build.graph.node_mut(id).made = MadeState::BeingMade;
        let commands = self.build.graph.node(id).commands.clone();
        let strict = self.build.config.strict;

        let mut state = MadeState::Made;
        let mut killed = false;
        for cmd in &commands {
            if is_save_marker(cmd) {
                self.build.graph.node_mut(id).flags.save_cmds = true;
                continue;
            }
            let node = self.build.graph.node_mut(id);
            let line = match expand_line(&mut self.build.vars, &mut node.locals, cmd, strict) {
                Ok(line) => line,
                Err(e) => {
                    self.build.errors += 1;
                    self.build.complete(id, MadeState::Error, &mut self.ready);
                    return Err(e);
                }
            };
            if node.flags.save_cmds {
                self.build.deferred_end.push(line);
                continue;
            }
            match self.run_command(id, &line).await? {
                Step::Continue => {}
                step => {
                    killed = step == Step::Killed;
                    state = MadeState::Error;
                    break;
                }
            }
        }
        if self.build.graph.node(id).name == END {
            for line in std::mem::take(&mut self.build.deferred_end) {
                if state == MadeState::Error {
                    break;
                }
                let step = self.run_command(id, &line).await?;
                if step != Step::Continue {
                    killed = step == Step::Killed;
                    state = MadeState::Error;
                }
            }
        }

        if state == MadeState::Error {
            self.build.errors += 1;
            if self.build.config.delete_on_error || killed {
                self.build.remove_target(id);
            }
            if !self.build.config.keep_going {
                self.build.abort(AbortReason::Error);
            }
        }
        self.build.complete(id, state, &mut self.ready);
        Ok(())
    }

    /// Echo and run one expanded command line.
    async fn run_command(&mut self, id: NodeId, line: &str) -> Result<Step> {
        let (flags, cmd) = CommandFlags::parse(line, false);
        let node = self.build.graph.node(id);
        let config = &self.build.config;
        let silent = !flags.echo || node.flags.silent || config.silent;
        let ignore = flags.ignore_errors || node.flags.ignore || config.ignore_errors;
        let run = !config.no_execute || flags.always || node.flags.make;

        if !silent || !run {
            self.build.output.message(cmd);
        }
        if !run || cmd.is_empty() {
            return Ok(Step::Continue);
        }

        let shell = self.build.vars.shell().clone();
        let (program, arg0, args) = if needs_shell(cmd) {
            let mut args = Vec::new();
            if !ignore {
                args.extend(shell.err_flag_arg());
            }
            args.push("-c".to_string());
            args.push(cmd.to_string());
            (shell.path.clone(), shell.name.clone(), args)
        } else {
            let mut words = split_words(cmd, true)?.into_iter();
            let Some(program) = words.next() else {
                return Ok(Step::Continue);
            };
            (program.clone(), program, words.collect())
        };

        let env = self.build.child_env(id, None);
        let spec = SpawnSpec {
            program: program.clone(),
            arg0,
            args,
            stdin: Stdio::inherit(),
            env,
            keep_fds: None,
        };
        tracing::debug!(program = %program, "running command");
        let exit = match spawn(spec, JobId(0), self.tx.clone()) {
            Ok(pid) => self.wait_child(id, pid).await?,
            Err(e) => {
                self.build
                    .output
                    .message(&format!("pmake: exec({program}) failed ({e})"));
                Exit::Code(1)
            }
        };
        Ok(self.report(exit, ignore))
    }

    /// Collect the child's output and exit, handling signals meanwhile.
    async fn wait_child(&mut self, id: NodeId, pid: u32) -> Result<Exit> {
        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(JobMsg::Output { data, .. }) => self.build.output.raw(&data),
                    Some(JobMsg::Exited { exit, .. }) => return Ok(exit),
                    None => return Ok(Exit::Code(1)),
                },
                sig = self.build.signals.recv() => {
                    let Some(sig) = sig else { continue };
                    match classify(sig) {
                        SignalAction::Reap => {}
                        SignalAction::Interrupt => return Err(self.interrupt(id, pid, sig).await),
                        SignalAction::Stop => {
                            signal_group(pid, sig);
                            stop_self();
                        }
                        SignalAction::Forward => signal_group(pid, sig),
                    }
                }
            }
        }
    }

    fn report(&mut self, exit: Exit, ignore: bool) -> Step {
        if exit.success() {
            return Step::Continue;
        }
        let mut text = format!("*** {exit}");
        let step = match exit {
            Exit::Code(_) if ignore => {
                text.push_str(" (ignored)");
                Step::Continue
            }
            Exit::Code(_) => Step::Failed,
            Exit::Signal(_) => Step::Killed,
        };
        if step != Step::Continue && self.build.config.keep_going {
            text.push_str(" (continuing)");
        }
        self.build.output.message(&text);
        step
    }

    /// Forward `signal` to the running child, wait for it and remove the
    /// target. `.INTERRUPT` runs once the error reaches [`make`](Self::make).
    async fn interrupt(&mut self, id: NodeId, pid: u32, signal: i32) -> MakeError {
        tracing::info!(signal, "interrupted");
        self.build.emitter.emit(BuildEvent::Interrupted { signal });
        self.build.abort(AbortReason::Interrupt);
        signal_group(pid, signal);
        while let Some(msg) = self.rx.recv().await {
            match msg {
                JobMsg::Output { data, .. } => self.build.output.raw(&data),
                JobMsg::Exited { .. } => break,
            }
        }
        self.build.remove_target(id);
        self.build.complete(id, MadeState::Aborted, &mut self.ready);
        MakeError::Interrupted { signal }
    }
}
