//! Pipe wiring: decides which pipe end or redirect each stage's fds bind to.
//!
//! Planning is pure. Pipes are referred to by index; the launcher allocates
//! the real descriptors for a plan and hands out each end exactly once.

use crate::cmd::{PipelineSpec, Redirect, Redirects};
use crate::error::PipeError;

/// Where a stage fd is bound.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Inherit,
    Target(Redirect),
    PipeRead(usize),
    PipeWrite(usize),
}

impl Endpoint {
    fn from_redirect(r: Option<&Redirect>) -> Self {
        match r {
            Some(r) if !r.is_inherit() => Endpoint::Target(r.clone()),
            _ => Endpoint::Inherit,
        }
    }
}

/// Fully resolved bindings of one stage.
#[derive(Debug, Clone)]
pub struct StageBinding {
    pub argv: Vec<String>,
    pub stdin: Endpoint,
    pub stdout: Endpoint,
    /// fd 2 and up, passed through from the stage's redirect map.
    pub extra: Redirects,
}

impl StageBinding {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct WiringPlan {
    pub stages: Vec<StageBinding>,
    /// Pipes 0..n-1 join adjacent stages; the output pipe, if any, comes last.
    pub pipe_count: usize,
    /// Index of the pipe whose read end belongs to the consumer.
    pub output_pipe: Option<usize>,
}

impl WiringPlan {
    /// Every pipe end this plan creates. Each must be closed exactly once.
    pub fn handles(&self) -> Vec<Endpoint> {
        (0..self.pipe_count)
            .flat_map(|i| [Endpoint::PipeRead(i), Endpoint::PipeWrite(i)])
            .collect()
    }

    pub fn terminal(&self) -> usize {
        self.stages.len().saturating_sub(1)
    }
}

/// Resolve fd bindings for every stage of `pipe`.
///
/// Only the first stage's fd 0 and the terminal stage's fd 1 honor the
/// caller's redirects. When the terminal stage has no fd 1 redirect an output
/// pipe is allocated for the consumer.
pub fn plan(pipe: &PipelineSpec) -> Result<WiringPlan, PipeError> {
    let stages = pipe.stages();
    if stages.is_empty() {
        return Err(PipeError::InvalidArgument("pipeline has no stages".into()));
    }
    if let Some(i) = stages.iter().position(|c| c.is_empty()) {
        return Err(PipeError::InvalidArgument(format!("stage {} has no program", i)));
    }

    let n = stages.len();
    let internal = n - 1;
    let terminal_out = stages[n - 1].redirect_for(1);
    let output_pipe = if terminal_out.is_none() { Some(internal) } else { None };
    let pipe_count = internal + usize::from(output_pipe.is_some());

    let bindings = stages
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
            let stdin = if i == 0 {
                Endpoint::from_redirect(cmd.redirect_for(0))
            } else {
                Endpoint::PipeRead(i - 1)
            };
            let stdout = if i + 1 < n {
                Endpoint::PipeWrite(i)
            } else {
                match output_pipe {
                    Some(p) => Endpoint::PipeWrite(p),
                    None => Endpoint::from_redirect(terminal_out),
                }
            };
            let extra = cmd
                .redirects()
                .iter()
                .filter(|(fd, r)| **fd >= 2 && !r.is_inherit())
                .map(|(fd, r)| (*fd, r.clone()))
                .collect();
            StageBinding { argv: cmd.argv().to_vec(), stdin, stdout, extra }
        })
        .collect();

    Ok(WiringPlan { stages: bindings, pipe_count, output_pipe })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::CommandSpec;
    use std::collections::HashMap;

    fn chain(n: usize) -> PipelineSpec {
        // interior stages keep conflicting redirects; the planner must override them
        PipelineSpec::from_stages(
            (0..n)
                .map(|i| CommandSpec::new(format!("s{}", i)).stdin_file("/in").stdout_file("/out"))
                .collect(),
        )
    }

    #[test]
    fn single_stage_gets_output_pipe() {
        let plan = plan(&CommandSpec::new("ls").into()).unwrap();
        assert_eq!(plan.pipe_count, 1);
        assert_eq!(plan.output_pipe, Some(0));
        assert!(matches!(plan.stages[0].stdin, Endpoint::Inherit));
        assert!(matches!(plan.stages[0].stdout, Endpoint::PipeWrite(0)));
    }

    #[test]
    fn interior_fds_are_pipes() {
        let p = CommandSpec::new("a").stdin_file("/in")
            | CommandSpec::new("b")
            | CommandSpec::new("c")
            | CommandSpec::new("d");
        let plan = plan(&p).unwrap();
        assert_eq!(plan.pipe_count, 4);
        assert!(matches!(plan.stages[0].stdin, Endpoint::Target(Redirect::File { .. })));
        for i in 1..4 {
            assert!(matches!(plan.stages[i].stdin, Endpoint::PipeRead(k) if k == i - 1));
        }
        for i in 0..3 {
            assert!(matches!(plan.stages[i].stdout, Endpoint::PipeWrite(k) if k == i));
        }
        assert!(matches!(plan.stages[3].stdout, Endpoint::PipeWrite(3)));
    }

    #[test]
    fn terminal_redirect_replaces_output_pipe() {
        let p = CommandSpec::new("echo") | CommandSpec::new("cat").stdout_file("/out");
        let plan = plan(&p).unwrap();
        assert_eq!(plan.pipe_count, 1);
        assert_eq!(plan.output_pipe, None);
        assert!(matches!(plan.stages[1].stdout, Endpoint::Target(_)));
    }

    #[test]
    fn stderr_and_higher_fds_pass_through() {
        let p = CommandSpec::new("a").redirect(2, "/err") | CommandSpec::new("b").redirect(3, Redirect::Null);
        let plan = plan(&p).unwrap();
        assert!(plan.stages[0].extra.contains_key(&2));
        assert!(plan.stages[1].extra.contains_key(&3));
        assert!(!plan.stages[1].extra.contains_key(&0));
    }

    #[test]
    fn only_outer_redirects_survive_for_any_length() {
        for n in 1..8 {
            let p = chain(n);
            let plan = plan(&p).unwrap();
            for (i, st) in plan.stages.iter().enumerate() {
                let in_external = matches!(st.stdin, Endpoint::Target(_) | Endpoint::Inherit);
                assert_eq!(in_external, i == 0, "stage {} of {}", i, n);
                let out_pipe = matches!(st.stdout, Endpoint::PipeWrite(_));
                assert_eq!(out_pipe, i + 1 < n, "stage {} of {}", i, n);
            }
        }
    }

    #[test]
    fn every_handle_used_exactly_once() {
        for n in 1..6 {
            let p: PipelineSpec = (0..n).map(|i| CommandSpec::new(format!("s{}", i))).collect();
            let plan = plan(&p).unwrap();
            let mut uses: HashMap<(bool, usize), usize> = HashMap::new();
            for st in &plan.stages {
                for ep in [&st.stdin, &st.stdout] {
                    match ep {
                        Endpoint::PipeRead(k) => *uses.entry((false, *k)).or_default() += 1,
                        Endpoint::PipeWrite(k) => *uses.entry((true, *k)).or_default() += 1,
                        _ => {}
                    }
                }
            }
            if let Some(out) = plan.output_pipe {
                *uses.entry((false, out)).or_default() += 1;
            }
            let handles = plan.handles();
            assert_eq!(handles.len(), uses.len());
            assert!(uses.values().all(|&c| c == 1));
        }
    }

    #[test]
    fn empty_pipeline_rejected() {
        assert!(matches!(plan(&PipelineSpec::new()), Err(PipeError::InvalidArgument(_))));
        assert!(matches!(plan(&CommandSpec::empty().into()), Err(PipeError::InvalidArgument(_))));
    }
}
