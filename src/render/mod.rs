//! Shell-like rendering of commands and pipelines, for display and logs.
//!
//! The output reads like POSIX shell but is never handed to a shell; stages
//! are always spawned directly from their argv.

use std::fmt;
use std::os::fd::AsRawFd;

use crate::cmd::{CommandSpec, PipelineSpec, Redirect};

#[derive(Debug, Clone, Copy)]
pub enum QuotePolicy {
    /// Quote every argument.
    Strict,
    /// Quote only arguments that contain shell metacharacters.
    Loose,
}

pub trait Renderer {
    fn render_cmd(&self, cmd: &CommandSpec) -> String;
    fn render_pipe(&self, pipe: &PipelineSpec) -> String {
        pipe.stages().iter().map(|c| self.render_cmd(c)).collect::<Vec<_>>().join(" | ")
    }
}

#[derive(Debug, Clone)]
pub struct PosixRenderer { pub quote: QuotePolicy }

impl Default for PosixRenderer { fn default() -> Self { Self { quote: QuotePolicy::Loose } } }

impl Renderer for PosixRenderer {
    fn render_cmd(&self, cmd: &CommandSpec) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut argv = cmd.argv().iter();
        if let Some(program) = argv.next() {
            parts.push(quote_word(program));
        }
        for a in argv {
            parts.push(match self.quote {
                QuotePolicy::Strict => quote_sh(a),
                QuotePolicy::Loose => quote_word(a),
            });
        }
        for (fd, r) in cmd.redirects() {
            if let Some(s) = render_redir(*fd, r) { parts.push(s); }
        }
        parts.join(" ")
    }
}

fn render_redir(fd: u32, r: &Redirect) -> Option<String> {
    let dir = if fd == 0 { "<" } else { ">" };
    let prefix = if fd <= 1 { String::new() } else { fd.to_string() };
    match r {
        Redirect::Inherit => None,
        Redirect::Null => Some(format!("{}{} /dev/null", prefix, dir)),
        Redirect::File { path, append } => {
            let op = if *append && fd != 0 { ">>" } else { dir };
            Some(format!("{}{} {}", prefix, op, quote_word(&path.to_string_lossy())))
        }
        Redirect::Handle(h) => Some(format!("{}{}&{}", prefix, dir, h.as_raw_fd())),
    }
}

fn quote_word(s: &str) -> String {
    if !s.is_empty() && is_simple_word(s) { s.to_string() } else { quote_sh(s) }
}

fn is_simple_word(s: &str) -> bool {
    s.chars().all(|c| matches!(c,
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '/' | ':' | '+' | '%' | '@' | '=' | ','))
}

fn quote_sh(s: &str) -> String {
    if s.is_empty() { return "''".to_string(); }
    let escaped = s.replace("'", "'\"'\"'");
    format!("'{}'", escaped)
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&PosixRenderer::default().render_cmd(self))
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&PosixRenderer::default().render_pipe(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_targets_are_quoted() {
        let c = CommandSpec::new("tee")
            .stdin_file("/tmp/in put")
            .redirect(2, Redirect::append("it's.log"));
        assert_eq!(c.to_string(), "tee < '/tmp/in put' 2>> 'it'\"'\"'s.log'");
    }

    #[test]
    fn empty_and_metachar_arguments_are_quoted() {
        let c = CommandSpec::new("grep").args(["", "a|b", "$HOME", "--count=3"]);
        assert_eq!(c.to_string(), "grep '' 'a|b' '$HOME' --count=3");
    }

    #[test]
    fn display_loose_quoting() {
        let c = CommandSpec::new("echo").arg("hi").arg("two words");
        assert_eq!(c.to_string(), "echo hi 'two words'");
    }

    #[test]
    fn strict_quotes_every_argument() {
        let r = PosixRenderer { quote: QuotePolicy::Strict };
        let c = CommandSpec::new("/bin/cat").arg("file.txt");
        assert_eq!(r.render_cmd(&c), "/bin/cat 'file.txt'");
    }

    #[test]
    fn render_redirections() {
        let c = CommandSpec::new("cat")
            .stdin_file("in.txt")
            .stdout_append("out.txt")
            .redirect(2, Redirect::Null);
        assert_eq!(c.to_string(), "cat < in.txt >> out.txt 2> /dev/null");
    }

    #[test]
    fn render_pipeline() {
        let p = CommandSpec::new("man").arg("ls")
            | CommandSpec::new("tail").args(["-n", "30"])
            | CommandSpec::new("head").args(["-n", "4"]);
        assert_eq!(p.to_string(), "man ls | tail -n 30 | head -n 4");
    }
}
