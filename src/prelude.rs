//! lazypipe::prelude - grab-and-go imports for building and running pipelines

pub use crate::error::PipeError;
pub use crate::cmd::{CommandSpec, PipelineSpec, Redirect};
pub use crate::args::Token;
pub use crate::exec::{ExecConfig, Executor, PipeStatus};
pub use crate::stream::OutputStream;
pub use crate::cmd;
