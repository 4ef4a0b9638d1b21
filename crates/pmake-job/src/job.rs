//! Running children and keeping track of them.
//!
//! [`JobTable`] is a fixed-size arena of running jobs indexed by [`JobId`],
//! with a side map from process id. [`spawn`] starts a child in its own
//! process group and reports its output and exit status as [`JobMsg`]s on a
//! channel, so the controller loop is the only place the table changes.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::sync::mpsc;

use crate::graph::NodeId;
use crate::token::set_cloexec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exit {
    Code(i32),
    Signal(i32),
}

impl Exit {
    pub fn success(self) -> bool {
        self == Exit::Code(0)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Exit::Code(code),
            (None, Some(sig)) => Exit::Signal(sig),
            (None, None) => Exit::Code(1),
        }
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Code(code) => write!(f, "Error code {code}"),
            Exit::Signal(sig) => write!(f, "Signal {sig}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Job table
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Job {
    pub node: NodeId,
    pub target: String,
    pub pid: u32,
    /// `.BEGIN`, `.END` or `.INTERRUPT`; runs without a token.
    pub special: bool,
    pub ignore_errors: bool,
    pub holds_token: bool,
    /// Script left on disk for debugging.
    pub script: Option<PathBuf>,
    /// Output after the last newline.
    pub pending: Vec<u8>,
    pub started: Instant,
}

#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
    by_pid: HashMap<u32, JobId>,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(1));
        slots.resize_with(capacity.max(1), || None);
        Self {
            slots,
            by_pid: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    /// The lowest free slot, if any.
    pub fn free_slot(&self) -> Option<JobId> {
        self.slots.iter().position(Option::is_none).map(JobId)
    }

    /// Place a started job in a slot obtained from [`free_slot`](Self::free_slot).
    pub fn insert(&mut self, id: JobId, job: Job) {
        self.by_pid.insert(job.pid, id);
        self.slots[id.0] = Some(job);
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn by_pid(&self, pid: u32) -> Option<JobId> {
        self.by_pid.get(&pid).copied()
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.slots.get_mut(id.0)?.take()?;
        self.by_pid.remove(&job.pid);
        Some(job)
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|job| (JobId(i), job)))
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// What a running child reports back to the controller.
#[derive(Debug)]
pub enum JobMsg {
    Output { id: JobId, data: Vec<u8> },
    /// Sent once the shell has exited and its buffered output has been
    /// delivered.
    Exited { id: JobId, exit: Exit },
}

/// Everything needed to start one child.
#[derive(Debug)]
pub struct SpawnSpec {
    pub program: String,
    pub arg0: String,
    pub args: Vec<String>,
    pub stdin: Stdio,
    /// The complete environment; nothing is inherited.
    pub env: Vec<(String, String)>,
    /// Token pool descriptors the child must keep across exec.
    pub keep_fds: Option<(RawFd, RawFd)>,
}

/// How long to keep reading after the shell exits. Output still in the pipe
/// arrives at once; anything later belongs to a background grandchild that
/// kept the write end open.
const DRAIN_IDLE: Duration = Duration::from_millis(50);
const DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// One pipe carrying both stdout and stderr, so output keeps the order the
/// child wrote it in.
fn output_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    // SAFETY: fds has room for the two descriptors pipe fills in.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and nothing else owns them.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_raw_fd(), true)?;
    set_cloexec(write.as_raw_fd(), true)?;
    Ok((read, write))
}

/// Start a child in a new process group and return its pid.
pub fn spawn(spec: SpawnSpec, id: JobId, tx: mpsc::UnboundedSender<JobMsg>) -> std::io::Result<u32> {
    let (read, write) = output_pipe()?;
    let mut cmd = std::process::Command::new(&spec.program);
    cmd.arg0(&spec.arg0)
        .args(&spec.args)
        .env_clear()
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(spec.stdin)
        .stdout(Stdio::from(write.try_clone()?))
        .stderr(Stdio::from(write))
        .process_group(0);
    if let Some((read_fd, write_fd)) = spec.keep_fds {
        // SAFETY: only async-signal-safe fcntl calls run between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                set_cloexec(read_fd, false)?;
                set_cloexec(write_fd, false)
            });
        }
    }

    // The command holds our copies of the write end; dropping it here leaves
    // the child as the only writer.
    let mut child = tokio::process::Command::from(cmd).spawn()?;
    let pid = child.id().unwrap_or_default();
    tracing::debug!(job = %id, pid, program = %spec.program, "spawned");

    let mut reader = pipe::Receiver::from_owned_fd(read)?;
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let mut open = true;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                read = reader.read(&mut buf), if open => {
                    open = forward(read, &buf, id, &tx);
                }
            }
        };
        let exit = match status {
            Ok(status) => Exit::from(status),
            Err(e) => {
                tracing::warn!(job = %id, error = %e, "wait failed");
                Exit::Code(1)
            }
        };

        let deadline = Instant::now() + DRAIN_LIMIT;
        while open {
            let idle = DRAIN_IDLE.min(deadline.saturating_duration_since(Instant::now()));
            let read = tokio::time::timeout(idle, reader.read(&mut buf)).await;
            match read {
                Ok(read) => open = forward(read, &buf, id, &tx),
                Err(_) => {
                    tracing::debug!(job = %id, "output still open after exit; not waiting");
                    break;
                }
            }
        }
        let _ = tx.send(JobMsg::Exited { id, exit });
    });
    Ok(pid)
}

/// Pass one read on to the controller. Returns whether the pipe is still
/// worth reading.
fn forward(
    read: std::io::Result<usize>,
    buf: &[u8],
    id: JobId,
    tx: &mpsc::UnboundedSender<JobMsg>,
) -> bool {
    match read {
        Ok(0) => false,
        Ok(n) => tx
            .send(JobMsg::Output {
                id,
                data: buf[..n].to_vec(),
            })
            .is_ok(),
        Err(e) => {
            tracing::debug!(job = %id, error = %e, "output read failed");
            false
        }
    }
}

/// Send `signal` to the process group led by `pid`.
pub fn signal_group(pid: u32, signal: i32) {
    if pid == 0 {
        return;
    }
    tracing::debug!(pid, signal, "signalling process group");
    // SAFETY: kill has no memory-safety preconditions.
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(pid: u32) -> Job {
        Job {
            node: NodeId(0),
            target: format!("t{pid}"),
            pid,
            special: false,
            ignore_errors: false,
            holds_token: true,
            script: None,
            pending: Vec::new(),
            started: Instant::now(),
        }
    }

    fn spec(script: &str) -> SpawnSpec {
        SpawnSpec {
            program: "/bin/sh".into(),
            arg0: "sh".into(),
            args: vec!["-c".into(), script.into()],
            stdin: Stdio::null(),
            env: vec![("PATH".into(), std::env::var("PATH").unwrap_or_default())],
            keep_fds: None,
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<JobMsg>) -> (Vec<u8>, Exit) {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                JobMsg::Output { data, .. } => out.extend(data),
                JobMsg::Exited { exit, .. } => return (out, exit),
            }
        }
        panic!("channel closed before exit");
    }

    // --- table ---

    #[test]
    fn table_fills_lowest_slot_first() {
        let mut table = JobTable::new(2);
        let a = table.free_slot().unwrap();
        table.insert(a, job(100));
        let b = table.free_slot().unwrap();
        table.insert(b, job(200));
        assert_eq!((a, b), (JobId(0), JobId(1)));
        assert!(table.free_slot().is_none());
        assert_eq!(table.by_pid(200), Some(b));

        let removed = table.remove(a).unwrap();
        assert_eq!(removed.pid, 100);
        assert_eq!(table.by_pid(100), None);
        assert_eq!(table.free_slot(), Some(JobId(0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn iter_skips_empty_slots() {
        let mut table = JobTable::new(3);
        table.insert(JobId(2), job(7));
        let ids: Vec<_> = table.iter().map(|(id, j)| (id, j.pid)).collect();
        assert_eq!(ids, vec![(JobId(2), 7)]);
    }

    #[test]
    fn exit_display_matches_failure_text() {
        assert_eq!(Exit::Code(2).to_string(), "Error code 2");
        assert_eq!(Exit::Signal(9).to_string(), "Signal 9");
        assert!(Exit::Code(0).success());
    }

    // --- children ---

    #[tokio::test]
    async fn output_arrives_before_exit() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn(spec("echo out; echo err >&2; exit 3"), JobId(0), tx).unwrap();
        let (out, exit) = collect(rx).await;
        assert_eq!(String::from_utf8(out).unwrap(), "out\nerr\n");
        assert_eq!(exit, Exit::Code(3));
    }

    #[tokio::test]
    async fn stdout_and_stderr_keep_their_order() {
        for _ in 0..20 {
            let (tx, rx) = mpsc::unbounded_channel();
            spawn(spec("echo 1; echo 2 >&2; echo 3; echo 4 >&2; echo 5"), JobId(0), tx).unwrap();
            let (out, exit) = collect(rx).await;
            assert_eq!(String::from_utf8(out).unwrap(), "1\n2\n3\n4\n5\n");
            assert!(exit.success());
        }
    }

    #[tokio::test]
    async fn background_grandchild_does_not_delay_exit() {
        let (tx, rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        spawn(spec("sleep 3 & echo done"), JobId(0), tx).unwrap();
        let (out, exit) = collect(rx).await;
        assert_eq!(String::from_utf8(out).unwrap(), "done\n");
        assert!(exit.success());
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn environment_is_exactly_what_was_given() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut s = spec("echo \"[$PMAKE_JOB_TEST][$HOME]\"");
        s.env.push(("PMAKE_JOB_TEST".into(), "yes".into()));
        spawn(s, JobId(1), tx).unwrap();
        let (out, _) = collect(rx).await;
        assert_eq!(String::from_utf8(out).unwrap(), "[yes][]\n");
    }

    #[tokio::test]
    async fn group_signal_reaches_the_child() {
        let (tx, rx) = mpsc::unbounded_channel();
        let pid = spawn(spec("sleep 10"), JobId(0), tx).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        signal_group(pid, libc::SIGTERM);
        let (_, exit) = collect(rx).await;
        assert_eq!(exit, Exit::Signal(libc::SIGTERM));
    }
}
