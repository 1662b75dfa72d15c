//! Terse macros for everyday usage

/// Build a [`CommandSpec`](crate::cmd::CommandSpec) from a program and tokens.
///
/// Every token goes through [`Token::from`](crate::args::Token), so strings,
/// flags, option lists, redirect maps and single commands can be mixed.
/// Evaluates to `Result<CommandSpec, PipeError>`.
#[macro_export]
macro_rules! cmd {
    ($program:expr $(, $token:expr )* $(,)?) => {{
        let __tokens: ::std::vec::Vec<$crate::args::Token> =
            ::std::vec![ $( $crate::args::Token::from($token) ),* ];
        $crate::cmd::CommandSpec::new($program).with(__tokens)
    }};
}

#[cfg(test)]
mod tests {
    use crate::args::Token;
    use crate::error::PipeError;

    #[test]
    fn cmd_macro_mixes_tokens() {
        let c = cmd!("tail", Token::flag("f"), Token::opt("n", 3), "/var/log/x").unwrap();
        assert_eq!(c.argv(), ["tail", "-f", "-n", "3", "/var/log/x"]);
    }

    #[test]
    fn cmd_macro_without_tokens() {
        let c = cmd!("true").unwrap();
        assert_eq!(c.argv(), ["true"]);
    }

    #[test]
    fn cmd_macro_rejects_pipes() {
        let cat = crate::cmd::CommandSpec::new("cat");
        let err = cmd!("sudo", &cat | &cat).unwrap_err();
        assert!(matches!(err, PipeError::InvalidComposition(_)));
    }
}
