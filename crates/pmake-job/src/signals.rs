//! Turning process signals into messages for the controller loop.
//!
//! Listeners never touch build state; each delivery becomes a signal number
//! on one channel, read by whichever executor is running.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pmake_types::Result;

const WATCHED: &[libc::c_int] = &[
    libc::SIGCHLD,
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGHUP,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGCONT,
    libc::SIGWINCH,
];

/// What the controller does with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// A child changed state; the job tasks already reap it.
    Reap,
    /// Forward, wait for children, clean up and stop the build.
    Interrupt,
    /// Forward, then stop ourselves.
    Stop,
    /// Forward only.
    Forward,
}

pub fn classify(signal: i32) -> SignalAction {
    match signal {
        libc::SIGCHLD => SignalAction::Reap,
        libc::SIGINT | libc::SIGTERM | libc::SIGHUP | libc::SIGQUIT => SignalAction::Interrupt,
        libc::SIGTSTP => SignalAction::Stop,
        _ => SignalAction::Forward,
    }
}

pub struct SignalBridge {
    rx: mpsc::UnboundedReceiver<i32>,
    tx: mpsc::UnboundedSender<i32>,
    listeners: Vec<JoinHandle<()>>,
}

/// Delivers synthetic signals to a bridge.
#[derive(Debug, Clone)]
pub struct SignalInjector {
    tx: mpsc::UnboundedSender<i32>,
}

impl SignalInjector {
    pub fn send(&self, signal: i32) {
        let _ = self.tx.send(signal);
    }
}

impl SignalBridge {
    /// Listen for the signals a build reacts to. Must be called inside a
    /// Tokio runtime.
    pub fn install() -> Result<Self> {
        let mut bridge = Self::detached();
        for &signo in WATCHED {
            let mut stream = signal(SignalKind::from_raw(signo))?;
            let tx = bridge.tx.clone();
            bridge.listeners.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(signo).is_err() {
                        break;
                    }
                }
            }));
        }
        tracing::debug!(count = WATCHED.len(), "signal listeners installed");
        Ok(bridge)
    }

    /// A bridge that only carries injected signals.
    pub fn detached() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            tx,
            listeners: Vec::new(),
        }
    }

    pub fn injector(&self) -> SignalInjector {
        SignalInjector {
            tx: self.tx.clone(),
        }
    }

    /// The next signal. Never returns `None` while the bridge is alive.
    pub async fn recv(&mut self) -> Option<i32> {
        self.rx.recv().await
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

/// Stop this process after job-control stop was forwarded to the children.
pub fn stop_self() {
    // SAFETY: kill has no memory-safety preconditions.
    unsafe {
        libc::kill(libc::getpid(), libc::SIGSTOP);
    }
}

/// Die from `signal` the way an uncaught signal would, so the parent sees
/// the right status.
pub fn reraise(signal: i32) {
    // SAFETY: restoring the default disposition and raising are both
    // async-signal-safe and touch no Rust state.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        libc::raise(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminating_signals_interrupt() {
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT] {
            assert_eq!(classify(sig), SignalAction::Interrupt);
        }
        assert_eq!(classify(libc::SIGCHLD), SignalAction::Reap);
        assert_eq!(classify(libc::SIGTSTP), SignalAction::Stop);
        assert_eq!(classify(libc::SIGCONT), SignalAction::Forward);
        assert_eq!(classify(libc::SIGWINCH), SignalAction::Forward);
    }

    #[tokio::test]
    async fn injected_signals_are_received_in_order() {
        let mut bridge = SignalBridge::detached();
        let injector = bridge.injector();
        injector.send(libc::SIGWINCH);
        injector.send(libc::SIGINT);
        assert_eq!(bridge.recv().await, Some(libc::SIGWINCH));
        assert_eq!(bridge.recv().await, Some(libc::SIGINT));
    }

    #[tokio::test]
    async fn installed_bridge_sees_real_signals() {
        let mut bridge = SignalBridge::install().unwrap();
        // SAFETY: SIGWINCH is now handled by the bridge.
        unsafe {
            libc::raise(libc::SIGWINCH);
        }
        let got = tokio::time::timeout(std::time::Duration::from_secs(5), bridge.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(libc::SIGWINCH));
    }
}
