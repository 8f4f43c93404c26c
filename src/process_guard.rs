//! Child process supervision
//!
//! Every external tool a step runs is spawned in its own process group and
//! recorded in a process-wide registry. When hostplan is interrupted
//! (SIGINT, SIGTERM, SIGHUP) or the guard is dropped, the registered groups
//! receive SIGTERM, then SIGKILL after a grace period, so no package manager
//! or clone keeps running behind a dead provisioning run.
//!
//! The step whose tool was stopped may be persisted as failed ("terminated
//! by a signal") before the process exits, or keep its previous status if
//! the exit wins the race. Either way it is not completed, so the next
//! resume runs it again from the top.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL when a signal arrives
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// Grace period used when the guard is dropped on a normal exit path
const DROP_GRACE: Duration = Duration::from_secs(5);

/// Registry of running child process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!(pid, "registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!(pid, "unregistered child process");
    }

    /// Number of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Stop every tracked process group.
    ///
    /// Groups get SIGTERM and up to `grace_period` to exit; survivors get
    /// SIGKILL. Only the first call does anything.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if std::mem::replace(&mut self.cleanup_initiated, true) {
            tracing::debug!("child cleanup already initiated");
            return;
        }

        let pids: Vec<u32> = self.pids.drain().collect();
        if pids.is_empty() {
            return;
        }

        tracing::info!(count = pids.len(), "stopping running tools");
        pids.iter().for_each(|&pid| signal_group(pid, Signal::SIGTERM));

        if wait_until_gone(&pids, grace_period) {
            tracing::info!("running tools stopped");
            return;
        }

        for pid in pids.into_iter().filter(|&pid| is_process_alive(pid)) {
            tracing::warn!(pid, "tool ignored SIGTERM, killing its process group");
            signal_group(pid, Signal::SIGKILL);
        }
    }
}

/// Signal the process group led by `pgid`, or just the process when the
/// group cannot be addressed.
///
/// A negative pid reaches grandchildren such as the `dpkg` processes an
/// `apt` run starts.
fn signal_group(pgid: u32, sig: Signal) {
    let raw = pgid as i32;
    if signal::kill(Pid::from_raw(-raw), sig).is_ok() {
        return;
    }
    if let Err(e) = signal::kill(Pid::from_raw(raw), sig) {
        tracing::debug!(pid = pgid, signal = ?sig, error = %e, "signal not delivered");
    }
}

/// Poll until none of `pids` is alive or `timeout` elapses
fn wait_until_gone(pids: &[u32], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pids.iter().any(|&pid| is_process_alive(pid)) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Alive means the pid exists and is not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // State letter follows the parenthesized command name
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(str::to_owned))
        })
        .is_none_or(|state| !matches!(state.as_str(), "Z" | "X"))
}

/// Stops the registered tools when dropped.
///
/// `main` holds one for the lifetime of the process.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(DROP_GRACE);
        }
    }
}

fn signal_label(sig: i32) -> &'static str {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "signal",
    }
}

/// Watch for SIGINT, SIGTERM and SIGHUP on a background thread.
///
/// The first one stops the registered tools, prints how to continue, and
/// exits with `128 + signal`. Call once at program start.
pub fn init_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("hostplan-signals".into())
        .spawn(move || {
            let Some(sig) = signals.forever().next() else {
                return;
            };
            tracing::warn!(signal = signal_label(sig), "interrupted, stopping running tools");
            eprintln!("\nInterrupted. Run `hostplan resume` to continue from the current step.");

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(SIGNAL_GRACE);
            }
            std::process::exit(128 + sig);
        })?;

    Ok(())
}

/// Spawn a command as the leader of its own process group, killed with
/// SIGTERM if hostplan dies first
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between
        // fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn spawn_sleeper(script: &str) -> std::process::Child {
        Command::new("sh")
            .args(["-c", script])
            .in_new_process_group()
            .spawn()
            .expect("spawn sh")
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(41);
        registry.register(42);
        registry.register(42);
        assert_eq!(registry.count(), 2);

        registry.unregister(41);
        registry.unregister(7);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_stops_group_and_grandchildren() {
        // The sleep is a grandchild; only a group signal reaches it
        let mut child = spawn_sleeper("sleep 60 & wait");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        assert!(is_process_alive(pid));

        registry.terminate_all(Duration::from_millis(500));
        let status = child.wait().expect("wait");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_sigkill_after_grace_period() {
        let mut child = spawn_sleeper("trap '' TERM; sleep 60");
        let pid = child.id();
        // Let the shell install its trap
        std::thread::sleep(Duration::from_millis(200));

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(300));

        let status = child.wait().expect("wait");
        assert!(!status.success());
    }

    #[test]
    fn test_terminate_all_only_acts_once() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));

        registry.register(999_998);
        registry.terminate_all(Duration::from_millis(10));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_nonexistent_process_is_not_alive() {
        assert!(!is_process_alive(999_999));
        assert!(wait_until_gone(&[999_999], Duration::ZERO));
    }
}
