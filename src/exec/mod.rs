//! Process launch: allocates pipes for a wiring plan and spawns every stage.

pub mod lifecycle;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};

use os_pipe::{PipeReader, PipeWriter};

use crate::cmd::{PipelineSpec, Redirect};
use crate::error::PipeError;
use crate::plan::{self, Endpoint, StageBinding};

pub use lifecycle::{Execution, LifecycleState};

#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Joins lines when output is materialized in one piece.
    pub line_separator: String,
    /// stderr of every stage that does not redirect fd 2 itself.
    pub stderr: Redirect,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig { line_separator: "\n".to_string(), stderr: Redirect::Inherit }
    }
}

/// Exit status of the terminal stage. Unknown when it could not be waited on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStatus(Option<ExitStatus>);

impl PipeStatus {
    pub fn unknown() -> Self { PipeStatus(None) }

    pub fn is_known(&self) -> bool { self.0.is_some() }

    pub fn exit_status(&self) -> Option<ExitStatus> { self.0 }

    pub fn code(&self) -> Option<i32> { self.0.and_then(|s| s.code()) }

    /// Signal that killed the terminal stage, if any.
    pub fn signal(&self) -> Option<i32> { self.0.and_then(|s| s.signal()) }

    pub fn success(&self) -> bool { self.code() == Some(0) }

    pub fn failed(&self) -> bool { !self.success() }
}

impl From<ExitStatus> for PipeStatus {
    fn from(s: ExitStatus) -> Self { PipeStatus(Some(s)) }
}

#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub status: PipeStatus,
    pub stdout: String,
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    pub config: ExecConfig,
}

impl Executor {
    pub fn new(config: ExecConfig) -> Self { Executor { config } }

    /// Plan and spawn every stage of `pipe`.
    ///
    /// On failure nothing survives: pipes are closed, stages that did start are
    /// killed and reaped, and the error names the stage that could not start.
    #[tracing::instrument(level = "debug", skip_all, fields(pipeline = %pipe, stages = pipe.len()))]
    pub fn launch(&self, pipe: &PipelineSpec) -> Result<Execution, PipeError> {
        let plan = plan::plan(pipe)?;
        let pipes = PipeSet::allocate(plan.pipe_count)?;
        let mut execution = Execution::new(pipes, plan.terminal());
        if let Some(out) = plan.output_pipe {
            execution.attach_output(out);
        }

        // All pipe ends exist up front and are close-on-exec, so order does
        // not matter; the terminal stage goes first.
        for (i, stage) in plan.stages.iter().enumerate().rev() {
            match spawn_stage(stage, execution.pipes_mut(), &self.config) {
                Ok(child) => {
                    tracing::debug!(stage = i, pid = child.id(), program = %stage.program(), "spawned stage");
                    execution.push_child(i, child);
                }
                Err(source) => {
                    tracing::debug!(stage = i, program = %stage.program(), error = %source, "stage failed to start");
                    execution.abort();
                    return Err(PipeError::Launch { stage: i, program: stage.program().to_string(), source });
                }
            }
        }
        Ok(execution)
    }
}

/// Both ends of every pipe of one execution. Each end is handed out at most
/// once; whatever is still here at teardown gets closed.
#[derive(Debug, Default)]
pub(crate) struct PipeSet {
    readers: Vec<Option<PipeReader>>,
    writers: Vec<Option<PipeWriter>>,
}

impl PipeSet {
    fn allocate(count: usize) -> io::Result<Self> {
        let mut set = PipeSet::default();
        for _ in 0..count {
            // an error drops `set`, closing what was opened so far
            let (r, w) = os_pipe::pipe()?;
            set.readers.push(Some(r));
            set.writers.push(Some(w));
        }
        Ok(set)
    }

    pub(crate) fn take_read(&mut self, i: usize) -> Option<PipeReader> {
        self.readers.get_mut(i).and_then(Option::take)
    }

    pub(crate) fn take_write(&mut self, i: usize) -> Option<PipeWriter> {
        self.writers.get_mut(i).and_then(Option::take)
    }

    /// Close every end still held. Safe to call repeatedly.
    pub(crate) fn close_all(&mut self) {
        let open = self.readers.iter().flatten().count() + self.writers.iter().flatten().count();
        if open > 0 {
            tracing::trace!(open, "closing pipe ends");
        }
        self.readers.iter_mut().for_each(|r| drop(r.take()));
        self.writers.iter_mut().for_each(|w| drop(w.take()));
    }
}

fn spawn_stage(stage: &StageBinding, pipes: &mut PipeSet, config: &ExecConfig) -> io::Result<Child> {
    let (program, args) = stage
        .argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

    // Pipe ends are taken before anything else can fail so an early return
    // still closes them.
    let stdin = endpoint_fd(&stage.stdin, pipes, true)?;
    let stdout = endpoint_fd(&stage.stdout, pipes, false)?;
    let stderr = match stage.extra.get(&2) {
        Some(r) => open_redirect(r, false)?,
        None => open_redirect(&config.stderr, false)?,
    };
    let mut extra = Vec::new();
    for (fd, r) in stage.extra.range(3..) {
        if let Some(owned) = open_redirect(r, false)? {
            extra.push((*fd as RawFd, owned));
        }
    }
    let extra = raise_sources(extra)?;

    let mut command = Command::new(program);
    command.args(args);
    command.stdin(into_stdio(stdin));
    command.stdout(into_stdio(stdout));
    command.stderr(into_stdio(stderr));
    if !extra.is_empty() {
        bind_extra_fds(&mut command, &extra);
    }
    let child = command.spawn();
    // dropping the command closes the parent's copies of the child's ends
    drop(command);
    drop(extra);
    child
}

fn endpoint_fd(ep: &Endpoint, pipes: &mut PipeSet, input: bool) -> io::Result<Option<OwnedFd>> {
    match ep {
        Endpoint::Inherit => Ok(None),
        Endpoint::Target(r) => open_redirect(r, input),
        Endpoint::PipeRead(i) => pipes.take_read(*i).map(|r| Some(OwnedFd::from(r))).ok_or_else(|| handed_out(*i)),
        Endpoint::PipeWrite(i) => pipes.take_write(*i).map(|w| Some(OwnedFd::from(w))).ok_or_else(|| handed_out(*i)),
    }
}

fn handed_out(i: usize) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("pipe {} end already handed out", i))
}

/// Open a redirect target for a child. `None` means inherit.
fn open_redirect(r: &Redirect, input: bool) -> io::Result<Option<OwnedFd>> {
    let fd: OwnedFd = match r {
        Redirect::Inherit => return Ok(None),
        Redirect::Null => OpenOptions::new().read(input).write(!input).open("/dev/null")?.into(),
        Redirect::File { path, .. } if input => File::open(path)?.into(),
        Redirect::File { path, append } => OpenOptions::new()
            .write(true)
            .create(true)
            .append(*append)
            .truncate(!*append)
            .open(path)?
            .into(),
        Redirect::Handle(fd) => fd.try_clone()?,
    };
    Ok(Some(fd))
}

fn into_stdio(fd: Option<OwnedFd>) -> Stdio {
    fd.map(Stdio::from).unwrap_or_else(Stdio::inherit)
}

/// Move every source descriptor above the highest target, so binding one
/// target in the child can never clobber the source of another.
fn raise_sources(extra: Vec<(RawFd, OwnedFd)>) -> io::Result<Vec<(RawFd, OwnedFd)>> {
    let floor = match extra.iter().map(|(target, _)| *target).max() {
        Some(max) => max + 1,
        None => return Ok(extra),
    };
    extra
        .into_iter()
        .map(|(target, fd)| {
            if fd.as_raw_fd() >= floor {
                return Ok((target, fd));
            }
            // SAFETY: `fd` is open and owned here; the duplicate is a fresh
            // descriptor that nothing else owns.
            let raised = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, floor) };
            if raised < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok((target, unsafe { OwnedFd::from_raw_fd(raised) }))
        })
        .collect()
}

/// Bind fd 3 and up in the child with dup2 right before exec. Sources sit
/// above every target (see `raise_sources`), so order does not matter.
fn bind_extra_fds(command: &mut Command, extra: &[(RawFd, OwnedFd)]) {
    let pairs: Vec<(RawFd, RawFd)> = extra.iter().map(|(target, fd)| (fd.as_raw_fd(), *target)).collect();
    // SAFETY: the closure only calls async-signal-safe libc functions.
    unsafe {
        command.pre_exec(move || {
            for &(src, dst) in &pairs {
                if libc::dup2(src, dst) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}
