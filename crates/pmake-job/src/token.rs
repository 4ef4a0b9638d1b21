//! The token pool (jobserver) shared by a tree of builds.
//!
//! Tokens are single bytes in a pipe. A process that wants to run a job reads
//! a byte and writes it back when the job is done. Every process also owns
//! one implicit token that is never in the pipe, so the root preloads
//! `jobs - 1` bytes and a sub-build can always make progress on its own.
//!
//! A byte other than `+` means the tree is winding down; it is written back
//! immediately so every other member sees it too.

use std::io;
use std::os::fd::RawFd;

use pmake_types::{AbortReason, Jobserver, MakeError, Result};

pub const TOKEN_NORMAL: u8 = b'+';
pub const TOKEN_ERROR: u8 = b'E';
pub const TOKEN_INTERRUPT: u8 = b'I';
pub const TOKEN_WAIT: u8 = b'W';

/// Outcome of a non-blocking attempt to take a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// None available right now.
    Blocked,
    /// Some member of the tree is aborting; start nothing new.
    Aborted(AbortReason),
}

fn token_for(reason: Option<AbortReason>) -> u8 {
    match reason {
        None => TOKEN_NORMAL,
        Some(AbortReason::Error) => TOKEN_ERROR,
        Some(AbortReason::Interrupt) => TOKEN_INTERRUPT,
        Some(AbortReason::Wait) => TOKEN_WAIT,
    }
}

fn reason_for(token: u8) -> AbortReason {
    match token {
        TOKEN_INTERRUPT => AbortReason::Interrupt,
        TOKEN_WAIT => AbortReason::Wait,
        _ => AbortReason::Error,
    }
}

#[derive(Debug)]
pub struct TokenPool {
    read_fd: RawFd,
    write_fd: RawFd,
    /// The root created the pipe and closes it on drop.
    owned: bool,
    max_jobs: usize,
    running: usize,
    preload: u64,
    acquired: u64,
    released: u64,
    aborting: Option<AbortReason>,
}

impl TokenPool {
    /// Create the pool for the top of a build tree.
    pub fn new_root(jobs: usize) -> Result<Self> {
        let jobs = jobs.max(1);
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` is a valid two-element array.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(io::Error::last_os_error().into());
        }
        let mut pool = Self {
            read_fd: fds[0],
            write_fd: fds[1],
            owned: true,
            max_jobs: jobs,
            running: 0,
            preload: 0,
            acquired: 0,
            released: 0,
            aborting: None,
        };
        set_cloexec(pool.read_fd, true)?;
        set_cloexec(pool.write_fd, true)?;
        set_nonblocking(pool.read_fd)?;
        for _ in 1..jobs {
            pool.write_token(TOKEN_NORMAL);
            pool.preload += 1;
        }
        tracing::debug!(
            read_fd = pool.read_fd,
            write_fd = pool.write_fd,
            preload = pool.preload,
            "token pool created"
        );
        Ok(pool)
    }

    /// Join a pool created by a parent build.
    ///
    /// Fails when either descriptor is not open in this process, in which
    /// case the caller should fall back to running one command at a time.
    pub fn from_inherited(js: Jobserver, jobs: usize) -> Result<Self> {
        for fd in [js.read_fd, js.write_fd] {
            // SAFETY: F_GETFD only inspects the descriptor table.
            if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
                return Err(MakeError::Fatal(format!(
                    "jobserver descriptor {fd} is not open"
                )));
            }
        }
        set_cloexec(js.read_fd, true)?;
        set_cloexec(js.write_fd, true)?;
        set_nonblocking(js.read_fd)?;
        tracing::debug!(jobserver = %js, "joined inherited token pool");
        Ok(Self {
            read_fd: js.read_fd,
            write_fd: js.write_fd,
            owned: false,
            max_jobs: jobs.max(1),
            running: 0,
            preload: 0,
            acquired: 0,
            released: 0,
            aborting: None,
        })
    }

    fn write_token(&self, token: u8) {
        loop {
            // SAFETY: writes one byte from a valid local.
            let n = unsafe {
                libc::write(
                    self.write_fd,
                    &token as *const u8 as *const libc::c_void,
                    1,
                )
            };
            if n == 1 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                tracing::warn!(error = %err, "could not return token to pool");
                return;
            }
        }
    }

    fn read_token(&self) -> Option<u8> {
        let mut token = 0u8;
        loop {
            // SAFETY: reads at most one byte into a valid local.
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    &mut token as *mut u8 as *mut libc::c_void,
                    1,
                )
            };
            match n {
                1 => return Some(token),
                0 => return None,
                _ => {
                    let err = io::Error::last_os_error();
                    match err.kind() {
                        io::ErrorKind::Interrupted => continue,
                        io::ErrorKind::WouldBlock => return None,
                        _ => {
                            tracing::warn!(error = %err, "token pool read failed");
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Try to take a token without blocking.
    pub fn acquire(&mut self) -> Acquire {
        if let Some(reason) = self.aborting {
            return Acquire::Aborted(reason);
        }
        if self.running >= self.max_jobs {
            return Acquire::Blocked;
        }
        match self.read_token() {
            Some(TOKEN_NORMAL) => {
                if self.running == 0 {
                    // The implicit slot is free; leave the byte for others.
                    self.write_token(TOKEN_NORMAL);
                }
            }
            Some(token) => {
                let reason = reason_for(token);
                self.write_token(token);
                self.aborting = Some(reason);
                tracing::info!(%reason, "abort token seen in pool");
                return Acquire::Aborted(reason);
            }
            None if self.running != 0 => return Acquire::Blocked,
            None => {}
        }
        self.running += 1;
        self.acquired += 1;
        tracing::trace!(running = self.running, "token acquired");
        Acquire::Granted
    }

    /// Give back a token taken with [`acquire`](Self::acquire).
    ///
    /// While aborting, the returned byte is the abort token.
    pub fn release(&mut self) -> Result<()> {
        if self.running == 0 {
            return Err(MakeError::TokenBotch {
                acquired: self.acquired,
                released: self.released + 1,
                preload: self.preload,
            });
        }
        self.running -= 1;
        self.released += 1;
        let token = token_for(self.aborting);
        if self.running != 0 || token != TOKEN_NORMAL {
            self.write_token(token);
        }
        tracing::trace!(running = self.running, "token released");
        Ok(())
    }

    /// Tell every member of the tree to stop starting jobs.
    pub fn set_aborting(&mut self, reason: AbortReason) {
        if self.aborting.is_some() {
            return;
        }
        self.aborting = Some(reason);
        self.write_token(token_for(Some(reason)));
    }

    pub fn aborting(&self) -> Option<AbortReason> {
        self.aborting
    }

    /// Releases never exceed acquires and nothing is still held.
    pub fn check(&self) -> Result<()> {
        if self.released > self.acquired || self.running != 0 {
            return Err(MakeError::TokenBotch {
                acquired: self.acquired,
                released: self.released,
                preload: self.preload,
            });
        }
        Ok(())
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn acquired(&self) -> u64 {
        self.acquired
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    pub fn preload(&self) -> u64 {
        self.preload
    }

    pub fn jobserver(&self) -> Jobserver {
        Jobserver {
            read_fd: self.read_fd,
            write_fd: self.write_fd,
        }
    }

    /// The `-J R,W` words passed to sub-builds through `MAKEFLAGS`.
    pub fn jobserver_arg(&self) -> String {
        format!("-J {}", self.jobserver())
    }
}

impl Drop for TokenPool {
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: both descriptors were created by this pool.
            unsafe {
                libc::close(self.read_fd);
                libc::close(self.write_fd);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor flags
// ---------------------------------------------------------------------------

/// Set or clear `FD_CLOEXEC`. Children clear it so the pool survives exec.
pub fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we were handed; failures are reported.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        let flags = if on {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: as above.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
