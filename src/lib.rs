//! lazypipe: external command pipelines over OS pipes, with lazily streamed output.
//!
//! ```no_run
//! use lazypipe::prelude::*;
//!
//! # fn main() -> Result<(), PipeError> {
//! let tail = CommandSpec::new("tail").args(["-f", "/var/log/syslog"]);
//! for line in (tail | CommandSpec::new("grep").arg("error")).lines()?.take(5) {
//!     println!("{}", line);
//! }
//! // dropping the iterator kills both stages
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod cmd;
pub mod args;
pub mod plan;
pub mod render;
pub mod exec;
pub mod stream;
pub mod prelude;
pub mod macros;

pub use error::PipeError;
pub use cmd::{CommandSpec, PipelineSpec, Redirect, Redirects};
pub use exec::{ExecConfig, ExecResult, Executor, PipeStatus};
pub use stream::{Bytes, Chars, Lines, OutputStream};
