//! The parallel executor.
//!
//! Each out-of-date target becomes one job: its commands are written to a
//! script that a single shell reads on stdin. Jobs start while the token
//! pool grants tokens; output and exits come back as messages, and signals
//! arrive through the [`SignalBridge`](crate::signals::SignalBridge), so all
//! job-table changes happen in this loop.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use pmake_shell::{CommandFlags, JobFlags, ScriptWriter};
use pmake_types::{AbortReason, MadeState, MakeError, Result};

use crate::events::BuildEvent;
use crate::graph::{NodeId, END};
use crate::job::{signal_group, spawn, Exit, Job, JobId, JobMsg, JobTable, SpawnSpec};
use crate::make::{Build, Settled};
use crate::signals::{classify, stop_self, SignalAction};
use crate::token::{Acquire, TokenPool};

/// How often to retry when the pool is empty but our own jobs are running.
const TOKEN_POLL: Duration = Duration::from_millis(50);

pub struct Scheduler<'b> {
    build: &'b mut Build,
    table: JobTable,
    pool: TokenPool,
    ready: VecDeque<NodeId>,
    tx: mpsc::UnboundedSender<JobMsg>,
    rx: mpsc::UnboundedReceiver<JobMsg>,
    /// An error that stops the whole build once running jobs finish.
    fatal: Option<MakeError>,
    interrupted: Option<i32>,
}

impl<'b> Scheduler<'b> {
    pub fn new(build: &'b mut Build, pool: TokenPool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let table = JobTable::new(build.config.jobs);
        Self {
            build,
            table,
            pool,
            ready: VecDeque::new(),
            tx,
            rx,
            fatal: None,
            interrupted: None,
        }
    }

    /// Make `goals`, running `.BEGIN` first and `.END` last.
    pub async fn make(mut self, goals: &[String]) -> Result<()> {
        let goal_ids = self.build.graph.resolve_goals(goals)?;

        if let Some(begin) = self.build.graph.begin() {
            if !self.run_special(begin).await? {
                return Err(self.build.failed());
            }
        }

        self.ready = self.build.graph.prepare(&goal_ids)?;
        loop {
            let blocked = self.dispatch()?;
            if self.table.is_empty() && (self.ready.is_empty() || self.build.aborting.is_some()) {
                break;
            }
            self.drain_finished(blocked).await?;
        }

        if let Some(err) = self.fatal.take() {
            return Err(err);
        }
        self.pool.check()?;
        if self.build.errors > 0 {
            return Err(self.build.failed());
        }

        let end = match self.build.graph.end() {
            None if !self.build.deferred_end.is_empty() => Some(self.build.graph.add_node(END)),
            end => end,
        };
        if let Some(end) = end {
            if !self.run_special(end).await? {
                return Err(self.build.failed());
            }
        }
        self.build.report_goals(&goal_ids);
        Ok(())
    }

    /// Start ready targets while tokens last. Returns `true` when stopped by
    /// an empty pool.
    fn dispatch(&mut self) -> Result<bool> {
        while self.build.aborting.is_none() {
            let Some(id) = self.ready.pop_front() else {
                return Ok(false);
            };
            match self.build.settle(id, &mut self.ready) {
                Settled::Done => continue,
                Settled::Failed => {
                    if !self.build.config.keep_going {
                        self.abort(AbortReason::Error);
                    }
                    continue;
                }
                Settled::Run => {}
            }
            match self.pool.acquire() {
                Acquire::Granted => {
                    let target = self.build.graph.node(id).name.clone();
                    self.build.emitter.emit(BuildEvent::TokenAcquired {
                        target,
                        running: self.pool.running(),
                    });
                    self.start(id, true)?;
                }
                Acquire::Blocked => {
                    self.ready.push_front(id);
                    return Ok(true);
                }
                Acquire::Aborted(reason) => {
                    self.ready.push_front(id);
                    self.abort(reason);
                }
            }
        }
        Ok(false)
    }

    fn abort(&mut self, reason: AbortReason) {
        self.build.abort(reason);
        self.pool.set_aborting(reason);
    }

    fn release_token(&mut self, target: &str) -> Result<()> {
        self.pool.release()?;
        self.build.emitter.emit(BuildEvent::TokenReleased {
            target: target.to_string(),
            running: self.pool.running(),
        });
        Ok(())
    }

    /// Start the job for one target. A node with nothing to run finishes
    /// immediately.
    pub fn start(&mut self, id: NodeId, holds_token: bool) -> Result<()> {
        let name = self.build.graph.node(id).name.clone();
        self.build.graph.node_mut(id).made = MadeState::BeingMade;

        let recipe = match self.build.prepare_recipe(id) {
            Ok(recipe) => recipe,
            Err(e) => {
                tracing::warn!(target = %name, error = %e, "cannot expand commands");
                self.build.errors += 1;
                self.fatal.get_or_insert(e);
                self.abort(AbortReason::Error);
                if holds_token {
                    self.release_token(&name)?;
                }
                self.build.complete(id, MadeState::Error, &mut self.ready);
                return Ok(());
            }
        };

        let config = &self.build.config;
        let node = self.build.graph.node(id);
        let shell = self.build.vars.shell().clone();
        let job_flags = JobFlags {
            echo: !(config.silent || node.flags.silent),
            ignore_errors: config.ignore_errors || node.flags.ignore,
            run: true,
            trace: false,
        };
        let force = node.flags.make;
        let no_execute = config.no_execute;

        let mut writer = ScriptWriter::new(&shell);
        let mut printed = Vec::new();
        for line in &recipe.lines {
            let (flags, cmd) = CommandFlags::parse(line, false);
            if no_execute && !flags.always && !force {
                printed.push(cmd.to_string());
                continue;
            }
            writer.command(&job_flags, line);
        }
        for cmd in printed {
            self.build.output.message_for(&name, &cmd);
        }

        if writer.is_empty() {
            if holds_token {
                self.release_token(&name)?;
            }
            self.build.complete(id, MadeState::Made, &mut self.ready);
            return Ok(());
        }

        let Some(job_id) = self.table.free_slot() else {
            return Err(MakeError::NoFreeSlot {
                target: name,
                capacity: self.table.capacity(),
            });
        };
        let (file, path) = self.build.write_script(&writer.finish())?;
        let makeflags = format!(
            "{} -j{}",
            self.pool.jobserver_arg(),
            self.build.config.jobs
        );
        let env = self.build.child_env(id, Some(&makeflags));
        let js = self.pool.jobserver();
        let spec = SpawnSpec {
            program: shell.path.clone(),
            arg0: shell.name.clone(),
            args: shell.script_args(job_flags.echo, job_flags.ignore_errors),
            stdin: Stdio::from(file),
            env,
            keep_fds: Some((js.read_fd, js.write_fd)),
        };
        let pid = match spawn(spec, job_id, self.tx.clone()) {
            Ok(pid) => pid,
            Err(source) => {
                let _ = std::fs::remove_file(&path);
                return Err(MakeError::Spawn {
                    command: shell.path,
                    source,
                });
            }
        };

        let script = if self.build.config.keep_script {
            tracing::debug!(target = %name, script = %path.display(), "job script kept");
            Some(path)
        } else {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(error = %e, "could not unlink job script");
            }
            None
        };

        let special = self.build.graph.node(id).flags.special;
        self.table.insert(
            job_id,
            Job {
                node: id,
                target: name.clone(),
                pid,
                special,
                ignore_errors: job_flags.ignore_errors,
                holds_token,
                script,
                pending: Vec::new(),
                started: Instant::now(),
            },
        );
        tracing::debug!(target = %name, job = %job_id, pid, "job started");
        self.build.emitter.emit(BuildEvent::JobStarted {
            target: name,
            job: job_id.0,
            pid,
        });
        Ok(())
    }

    /// Wait for at least one message, then handle everything queued.
    pub async fn drain_finished(&mut self, blocked: bool) -> Result<()> {
        tokio::select! {
            msg = self.rx.recv() => {
                if let Some(msg) = msg {
                    self.handle(msg)?;
                }
            }
            sig = self.build.signals.recv() => {
                if let Some(sig) = sig {
                    self.on_signal(sig).await?;
                }
            }
            _ = tokio::time::sleep(TOKEN_POLL), if blocked => {}
        }
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg)?;
        }
        Ok(())
    }

    /// Handle messages until no job is running. Signals are passed on to
    /// the jobs meanwhile; an interrupt is reported once they have all
    /// finished.
    pub async fn wait_all(&mut self) -> Result<()> {
        let mut caught = None;
        while !self.table.is_empty() {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg)?,
                    None => break,
                },
                sig = self.build.signals.recv() => {
                    let Some(signal) = sig else { continue };
                    match classify(signal) {
                        SignalAction::Reap => {}
                        SignalAction::Interrupt => {
                            self.note_interrupt(signal);
                            self.forward(signal);
                            caught.get_or_insert(signal);
                        }
                        SignalAction::Stop => {
                            self.forward(signal);
                            stop_self();
                        }
                        SignalAction::Forward => self.forward(signal),
                    }
                }
            }
        }
        match caught {
            Some(signal) => Err(MakeError::Interrupted { signal }),
            None => Ok(()),
        }
    }

    fn handle(&mut self, msg: JobMsg) -> Result<()> {
        match msg {
            JobMsg::Output { id, data } => {
                self.catch_output(id, &data);
                Ok(())
            }
            JobMsg::Exited { id, exit } => self.job_finished(id, exit),
        }
    }

    /// Pass on complete lines; keep a partial line until more arrives.
    fn catch_output(&mut self, id: JobId, data: &[u8]) {
        let Some(job) = self.table.get_mut(id) else {
            return;
        };
        job.pending.extend_from_slice(data);
        let Some(last) = job.pending.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let lines: Vec<u8> = job.pending.drain(..=last).collect();
        let target = job.target.clone();
        let no_print = self.build.vars.shell().no_print.clone();
        self.build.output.job_output(&target, &lines, &no_print);
    }

    fn job_finished(&mut self, id: JobId, exit: Exit) -> Result<()> {
        let Some(job) = self.table.remove(id) else {
            return Ok(());
        };
        if !job.pending.is_empty() {
            let no_print = self.build.vars.shell().no_print.clone();
            self.build
                .output
                .job_output(&job.target, &job.pending, &no_print);
        }
        let duration_ms = job.started.elapsed().as_millis() as u64;
        tracing::debug!(target = %job.target, job = %id, %exit, duration_ms, "job finished");
        self.build.emitter.emit(BuildEvent::JobFinished {
            target: job.target.clone(),
            job: id.0,
            status: exit.to_string(),
            duration_ms,
        });

        let state = if self.interrupted.is_some() {
            MadeState::Aborted
        } else {
            let state = self.build.judge(job.node, exit, job.ignore_errors);
            if state == MadeState::Error && !self.build.config.keep_going && !job.special {
                self.abort(AbortReason::Error);
            }
            state
        };
        // After any abort, so the byte handed back tells the peers.
        if job.holds_token {
            self.release_token(&job.target)?;
        }
        self.build.complete(job.node, state, &mut self.ready);
        Ok(())
    }

    /// Run `.BEGIN` or `.END` to completion. Returns whether it succeeded.
    pub async fn run_special(&mut self, id: NodeId) -> Result<bool> {
        self.start(id, false)?;
        match self.wait_all().await {
            Ok(()) => Ok(!self.build.graph.node(id).made.is_failure()),
            Err(MakeError::Interrupted { signal }) => Err(self.interrupt(signal).await),
            Err(e) => Err(e),
        }
    }

    async fn on_signal(&mut self, signal: i32) -> Result<()> {
        match classify(signal) {
            SignalAction::Reap => Ok(()),
            SignalAction::Interrupt => Err(self.interrupt(signal).await),
            SignalAction::Stop => {
                self.forward(signal);
                stop_self();
                Ok(())
            }
            SignalAction::Forward => {
                self.forward(signal);
                Ok(())
            }
        }
    }

    fn forward(&self, signal: i32) {
        for (_, job) in self.table.iter() {
            signal_group(job.pid, signal);
        }
    }

    /// Record the first interrupt and stop starting jobs.
    fn note_interrupt(&mut self, signal: i32) {
        if self.interrupted.is_some() {
            return;
        }
        tracing::info!(signal, running = self.table.len(), "interrupted");
        self.interrupted = Some(signal);
        self.build.emitter.emit(BuildEvent::Interrupted { signal });
        self.abort(AbortReason::Interrupt);
    }

    /// Pass `signal` to every running job, wait for them, remove the targets
    /// they were making and run `.INTERRUPT` for SIGINT.
    pub async fn interrupt(&mut self, signal: i32) -> MakeError {
        self.note_interrupt(signal);

        let victims: Vec<NodeId> = self.table.iter().map(|(_, job)| job.node).collect();
        self.forward(signal);
        match self.wait_all().await {
            Ok(()) | Err(MakeError::Interrupted { .. }) => {}
            Err(e) => return e,
        }
        for id in victims {
            self.build.remove_target(id);
        }

        if signal == libc::SIGINT {
            if let Some(handler) = self.build.graph.interrupt() {
                self.interrupted = None;
                let run = match self.start(handler, false) {
                    Ok(()) => self.wait_all().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = run {
                    tracing::warn!(error = %e, ".INTERRUPT failed");
                }
            }
        }
        MakeError::Interrupted { signal }
    }
}
