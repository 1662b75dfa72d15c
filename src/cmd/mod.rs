//! Command modeling: stages, redirects and pipelines.
//!
//! Every type here is a value. Builder methods consume `self` and hand back a
//! new value, so a partially built command can be cloned and extended along
//! several branches without the branches seeing each other.

use std::collections::BTreeMap;
use std::ops::BitOr;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

/// Fd number to target. fd 0 and fd 1 of interior stages are replaced by pipes.
pub type Redirects = BTreeMap<u32, Redirect>;

#[derive(Debug, Clone)]
pub enum Redirect {
    Inherit,
    Null,
    /// Opened read-only when bound to fd 0, for writing otherwise.
    File { path: PathBuf, append: bool },
    /// An already-open descriptor. It is duplicated for the child at spawn time;
    /// the caller keeps its own copy.
    Handle(Arc<OwnedFd>),
}

impl Default for Redirect {
    fn default() -> Self { Redirect::Inherit }
}

impl Redirect {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Redirect::File { path: path.into(), append: false }
    }

    pub fn append(path: impl Into<PathBuf>) -> Self {
        Redirect::File { path: path.into(), append: true }
    }

    pub fn handle(fd: impl Into<OwnedFd>) -> Self {
        Redirect::Handle(Arc::new(fd.into()))
    }

    pub fn is_inherit(&self) -> bool {
        matches!(self, Redirect::Inherit)
    }
}

impl From<&str> for Redirect {
    fn from(path: &str) -> Self { Redirect::file(path) }
}

impl From<String> for Redirect {
    fn from(path: String) -> Self { Redirect::file(path) }
}

impl From<PathBuf> for Redirect {
    fn from(path: PathBuf) -> Self { Redirect::file(path) }
}

impl From<&std::path::Path> for Redirect {
    fn from(path: &std::path::Path) -> Self { Redirect::file(path) }
}

/// One executable stage: an argument vector plus its redirect map.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    argv: Vec<String>,
    redirects: Redirects,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec { argv: vec![program.into()], redirects: Redirects::new() }
    }

    /// A command with no program yet. Only useful as a carrier of redirects
    /// that get merged into another command.
    pub fn empty() -> Self { Self::default() }

    pub(crate) fn from_parts(argv: Vec<String>, redirects: Redirects) -> Self {
        CommandSpec { argv, redirects }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn argv(&self) -> &[String] { &self.argv }

    pub fn redirects(&self) -> &Redirects { &self.redirects }

    pub fn redirect_for(&self, fd: u32) -> Option<&Redirect> {
        self.redirects.get(&fd).filter(|r| !r.is_inherit())
    }

    pub fn is_empty(&self) -> bool { self.argv.is_empty() }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn redirect(mut self, fd: u32, target: impl Into<Redirect>) -> Self {
        self.redirects.insert(fd, target.into());
        self
    }

    pub(crate) fn merge_redirects(mut self, redirects: Redirects) -> Self {
        self.redirects.extend(redirects);
        self
    }

    /// `cmd < path`
    pub fn stdin_file(self, path: impl Into<PathBuf>) -> Self {
        self.redirect(0, Redirect::file(path))
    }

    /// `cmd > path`
    pub fn stdout_file(self, path: impl Into<PathBuf>) -> Self {
        self.redirect(1, Redirect::file(path))
    }

    /// `cmd >> path`
    pub fn stdout_append(self, path: impl Into<PathBuf>) -> Self {
        self.redirect(1, Redirect::append(path))
    }

    pub(crate) fn without(mut self, fd: u32) -> Self {
        self.redirects.remove(&fd);
        self
    }
}

/// Stages connected by pipes, in data-flow order.
#[derive(Debug, Clone, Default)]
pub struct PipelineSpec {
    stages: Vec<CommandSpec>,
}

impl PipelineSpec {
    pub fn new() -> Self { PipelineSpec { stages: Vec::new() } }

    /// Build from stages as given, without dropping boundary redirects.
    /// The planner still ignores interior fd 0/fd 1 redirects.
    pub fn from_stages(stages: Vec<CommandSpec>) -> Self { PipelineSpec { stages } }

    pub fn stages(&self) -> &[CommandSpec] { &self.stages }

    pub fn len(&self) -> usize { self.stages.len() }

    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// True when at least one pipe connects two stages.
    pub fn is_piped(&self) -> bool { self.stages.len() > 1 }

    /// Concatenate `next` after `self`. The redirects that end up on the new
    /// interior boundary (our last stdout, their first stdin) are dropped.
    pub fn pipe(self, next: impl Into<PipelineSpec>) -> PipelineSpec {
        let mut stages = self.stages;
        let mut rest = next.into().stages;
        if !stages.is_empty() && !rest.is_empty() {
            if let Some(last) = stages.pop() {
                stages.push(last.without(1));
            }
            let first = std::mem::take(&mut rest[0]);
            rest[0] = first.without(0);
        }
        stages.extend(rest);
        PipelineSpec { stages }
    }

    /// Redirect the first stage's stdin.
    pub fn stdin_file(self, path: impl Into<PathBuf>) -> Self {
        self.map_first(|c| c.stdin_file(path))
    }

    /// Redirect the terminal stage's stdout.
    pub fn stdout_file(self, path: impl Into<PathBuf>) -> Self {
        self.map_last(|c| c.stdout_file(path))
    }

    pub fn stdout_append(self, path: impl Into<PathBuf>) -> Self {
        self.map_last(|c| c.stdout_append(path))
    }

    fn map_first(mut self, f: impl FnOnce(CommandSpec) -> CommandSpec) -> Self {
        if let Some(first) = self.stages.first_mut() {
            *first = f(std::mem::take(first));
        }
        self
    }

    fn map_last(mut self, f: impl FnOnce(CommandSpec) -> CommandSpec) -> Self {
        if let Some(last) = self.stages.last_mut() {
            *last = f(std::mem::take(last));
        }
        self
    }
}

impl From<CommandSpec> for PipelineSpec {
    fn from(cmd: CommandSpec) -> Self { PipelineSpec { stages: vec![cmd] } }
}

impl From<&CommandSpec> for PipelineSpec {
    fn from(cmd: &CommandSpec) -> Self { PipelineSpec::from(cmd.clone()) }
}

impl From<&PipelineSpec> for PipelineSpec {
    fn from(pipe: &PipelineSpec) -> Self { pipe.clone() }
}

impl FromIterator<CommandSpec> for PipelineSpec {
    fn from_iter<I: IntoIterator<Item = CommandSpec>>(iter: I) -> Self {
        iter.into_iter().fold(PipelineSpec::new(), |p, c| p.pipe(c))
    }
}

impl<T: Into<PipelineSpec>> BitOr<T> for PipelineSpec {
    type Output = PipelineSpec;
    fn bitor(self, rhs: T) -> PipelineSpec { self.pipe(rhs) }
}

impl<T: Into<PipelineSpec>> BitOr<T> for CommandSpec {
    type Output = PipelineSpec;
    fn bitor(self, rhs: T) -> PipelineSpec { PipelineSpec::from(self).pipe(rhs) }
}

impl<T: Into<PipelineSpec>> BitOr<T> for &PipelineSpec {
    type Output = PipelineSpec;
    fn bitor(self, rhs: T) -> PipelineSpec { self.clone().pipe(rhs) }
}

impl<T: Into<PipelineSpec>> BitOr<T> for &CommandSpec {
    type Output = PipelineSpec;
    fn bitor(self, rhs: T) -> PipelineSpec { PipelineSpec::from(self).pipe(rhs) }
}
