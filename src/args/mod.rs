//! Token translation: turns mixed arguments into argv and redirect fragments.
//!
//! `Flag("l")` becomes `-l`, `Flag("all")` becomes `--all`; option pairs with a
//! one-letter key become `-k v`, longer keys become `--key=v`. A command token
//! contributes its argv and its redirects. A piped pipeline cannot stand in for
//! a single argument and is rejected.

use crate::cmd::{CommandSpec, PipelineSpec, Redirects};
use crate::error::PipeError;

#[derive(Debug, Clone)]
pub enum Token {
    Str(String),
    Flag(String),
    Options(Vec<(String, String)>),
    Redirects(Redirects),
    Pipeline(PipelineSpec),
    List(Vec<Token>),
}

impl Token {
    pub fn flag(name: impl Into<String>) -> Self { Token::Flag(name.into()) }

    pub fn opt(key: impl Into<String>, value: impl ToString) -> Self {
        Token::Options(vec![(key.into(), value.to_string())])
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self { Token::Str(s.to_string()) }
}

impl From<String> for Token {
    fn from(s: String) -> Self { Token::Str(s) }
}

impl From<i64> for Token {
    fn from(n: i64) -> Self { Token::Str(n.to_string()) }
}

impl From<CommandSpec> for Token {
    fn from(cmd: CommandSpec) -> Self { Token::Pipeline(cmd.into()) }
}

impl From<&CommandSpec> for Token {
    fn from(cmd: &CommandSpec) -> Self { Token::Pipeline(cmd.into()) }
}

impl From<PipelineSpec> for Token {
    fn from(pipe: PipelineSpec) -> Self { Token::Pipeline(pipe) }
}

impl From<Redirects> for Token {
    fn from(r: Redirects) -> Self { Token::Redirects(r) }
}

impl<T: Into<Token>> From<Vec<T>> for Token {
    fn from(items: Vec<T>) -> Self { Token::List(items.into_iter().map(Into::into).collect()) }
}

/// Translate tokens into an argv fragment and a redirect fragment. Later
/// redirects for the same fd replace earlier ones.
pub fn translate(tokens: &[Token]) -> Result<(Vec<String>, Redirects), PipeError> {
    let mut argv = Vec::new();
    let mut redirects = Redirects::new();
    for token in tokens {
        translate_one(token, &mut argv, &mut redirects)?;
    }
    Ok((argv, redirects))
}

fn translate_one(token: &Token, argv: &mut Vec<String>, redirects: &mut Redirects) -> Result<(), PipeError> {
    match token {
        Token::Str(s) => argv.push(s.clone()),
        Token::Flag(name) => argv.push(flag(name)),
        Token::Options(pairs) => {
            for (k, v) in pairs {
                if k.chars().count() > 1 {
                    argv.push(format!("--{}={}", k, v));
                } else {
                    argv.push(format!("-{}", k));
                    argv.push(v.clone());
                }
            }
        }
        Token::Redirects(r) => redirects.extend(r.iter().map(|(fd, t)| (*fd, t.clone()))),
        Token::Pipeline(pipe) => {
            if pipe.is_piped() {
                return Err(PipeError::InvalidComposition(format!(
                    "a {}-stage pipeline cannot be used as an argument",
                    pipe.len()
                )));
            }
            if let Some(cmd) = pipe.stages().first() {
                argv.extend(cmd.argv().iter().cloned());
                redirects.extend(cmd.redirects().iter().map(|(fd, t)| (*fd, t.clone())));
            }
        }
        Token::List(items) => {
            for item in items {
                translate_one(item, argv, redirects)?;
            }
        }
    }
    Ok(())
}

fn flag(name: &str) -> String {
    if name.chars().count() > 1 { format!("--{}", name) } else { format!("-{}", name) }
}

impl CommandSpec {
    /// Derive a new command by appending translated tokens.
    pub fn with<I, T>(self, tokens: I) -> Result<CommandSpec, PipeError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        let tokens: Vec<Token> = tokens.into_iter().map(Into::into).collect();
        let (argv, redirects) = translate(&tokens)?;
        let mut all = self.argv().to_vec();
        all.extend(argv);
        let merged = self.redirects().clone();
        Ok(CommandSpec::from_parts(all, merged).merge_redirects(redirects))
    }
}
