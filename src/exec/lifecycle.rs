//! Teardown of a running pipeline.
//!
//! However the consumer stops (end of output, early drop, read error) the
//! same sequence runs once: close every pipe end, wait for the terminal
//! stage, signal the remaining stages with SIGTERM then SIGKILL, and reap them.

use std::io::BufReader;
use std::process::Child;

use os_pipe::PipeReader;

use super::{PipeSet, PipeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Reaped,
}

#[derive(Debug)]
pub struct Execution {
    pipes: PipeSet,
    output: Option<BufReader<PipeReader>>,
    /// (stage index, process), in spawn order.
    children: Vec<(usize, Child)>,
    terminal: usize,
    state: LifecycleState,
    status: PipeStatus,
}

impl Execution {
    pub(crate) fn new(pipes: PipeSet, terminal: usize) -> Self {
        Execution {
            pipes,
            output: None,
            children: Vec::new(),
            terminal,
            state: LifecycleState::Running,
            status: PipeStatus::unknown(),
        }
    }

    pub(crate) fn pipes_mut(&mut self) -> &mut PipeSet { &mut self.pipes }

    pub(crate) fn attach_output(&mut self, pipe: usize) {
        self.output = self.pipes.take_read(pipe).map(BufReader::new);
    }

    pub(crate) fn push_child(&mut self, stage: usize, child: Child) {
        self.children.push((stage, child));
    }

    /// Read end of the terminal stage's stdout. `None` once torn down, or when
    /// the terminal stage writes to a redirect instead.
    pub(crate) fn output_mut(&mut self) -> Option<&mut BufReader<PipeReader>> {
        self.output.as_mut()
    }

    pub fn state(&self) -> LifecycleState { self.state }

    /// Meaningful once the state is `Reaped`.
    pub fn status(&self) -> PipeStatus { self.status }

    /// Pids of stages not yet reaped, in stage order.
    pub fn pids(&self) -> Vec<u32> {
        let mut staged: Vec<(usize, u32)> = self.children.iter().map(|(i, c)| (*i, c.id())).collect();
        staged.sort_unstable();
        staged.into_iter().map(|(_, pid)| pid).collect()
    }

    /// Release everything and return the terminal stage's status. Runs the
    /// teardown at most once; later calls return the recorded status.
    pub fn finish(&mut self) -> PipeStatus {
        if self.state == LifecycleState::Reaped {
            return self.status;
        }
        self.state = LifecycleState::Draining;
        tracing::debug!(stages = self.children.len(), "draining pipeline");

        self.close_handles();

        if let Some(pos) = self.children.iter().position(|(i, _)| *i == self.terminal) {
            let (stage, mut child) = self.children.swap_remove(pos);
            match child.wait() {
                Ok(status) => self.status = status.into(),
                Err(e) => tracing::warn!(stage, pid = child.id(), error = %e, "could not wait on terminal stage"),
            }
        }

        self.kill_and_reap();
        self.state = LifecycleState::Reaped;
        tracing::debug!(code = ?self.status.code(), "pipeline reaped");
        self.status
    }

    /// Teardown for a launch that failed part way: nothing is waited on
    /// gracefully, every spawned stage is killed.
    pub(crate) fn abort(&mut self) {
        if self.state == LifecycleState::Reaped {
            return;
        }
        self.state = LifecycleState::Draining;
        self.close_handles();
        self.kill_and_reap();
        self.state = LifecycleState::Reaped;
    }

    fn close_handles(&mut self) {
        drop(self.output.take());
        self.pipes.close_all();
    }

    fn kill_and_reap(&mut self) {
        for sig in [libc::SIGTERM, libc::SIGKILL] {
            for (stage, child) in &self.children {
                signal(*stage, child, sig);
            }
        }
        for (stage, mut child) in self.children.drain(..) {
            if let Err(e) = child.wait() {
                tracing::trace!(stage, error = %e, "reap failed");
            }
        }
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.finish();
    }
}

/// The child is not reaped yet, so its pid cannot have been reused. ESRCH
/// and friends are ignored.
fn signal(stage: usize, child: &Child, sig: libc::c_int) {
    let pid = child.id() as libc::pid_t;
    // SAFETY: plain syscall on a pid we own.
    let rc = unsafe { libc::kill(pid, sig) };
    tracing::trace!(stage, pid, sig, delivered = rc == 0, "signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::CommandSpec;
    use crate::exec::Executor;

    #[test]
    fn finish_is_idempotent() {
        let mut ex = Executor::default().launch(&CommandSpec::new("true").into()).unwrap();
        assert_eq!(ex.state(), LifecycleState::Running);
        let first = ex.finish();
        assert_eq!(ex.state(), LifecycleState::Reaped);
        assert!(first.success());
        let second = ex.finish();
        assert_eq!(first, second);
        assert!(ex.pids().is_empty());
    }

    #[test]
    fn other_stages_are_killed_after_terminal_exits() {
        // `true` exits without reading; the sleeper would outlive it
        let p = CommandSpec::new("sleep").arg("30") | CommandSpec::new("true");
        let mut ex = Executor::default().launch(&p).unwrap();
        let sleeper = ex.pids()[0];
        let start = std::time::Instant::now();
        assert!(ex.finish().success());
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
        let alive = unsafe { libc::kill(sleeper as libc::pid_t, 0) } == 0;
        assert!(!alive);
    }
}
