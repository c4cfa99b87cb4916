//! POSIX shell quoting for the remote side of an SSH boundary.
//!
//! `ssh` hands its trailing operands to the remote login shell as a single
//! string, so the remote argv must be re-quoted token by token. Tokens made
//! of safe characters pass through untouched to keep logged command lines
//! readable.

/// Characters that never need quoting in a POSIX shell word.
fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.' | b'/' | b'@' | b'#' | b':' | b'%' | b'+' | b'=' | b',')
}

/// Quotes a single token for a POSIX shell.
#[must_use]
pub fn shell_quote(token: &str) -> String {
    if !token.is_empty() && token.bytes().all(is_safe) {
        return token.to_owned();
    }
    // Single quotes inhibit everything except the closing quote itself,
    // which is spelled '\'' (close, escaped quote, reopen).
    let mut quoted = String::with_capacity(token.len() + 2);
    quoted.push('\'');
    for ch in token.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Joins an argv into one remote command line, quoting each token.
#[must_use]
pub fn shell_join<I, S>(argv: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (idx, token) in argv.into_iter().enumerate() {
        if idx > 0 {
            joined.push(' ');
        }
        joined.push_str(&shell_quote(token.as_ref()));
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_tokens_pass_through() {
        assert_eq!(shell_quote("zfs"), "zfs");
        assert_eq!(shell_quote("tank1/foo@daily_2024-01-01"), "tank1/foo@daily_2024-01-01");
        assert_eq!(shell_quote("-Hp"), "-Hp");
    }

    #[test]
    fn unsafe_tokens_are_single_quoted() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("a$b"), "'a$b'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn embedded_single_quotes_survive() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn join_preserves_token_boundaries() {
        let joined = shell_join(["zfs", "list", "pool/has space"]);
        assert_eq!(joined, "zfs list 'pool/has space'");
    }
}
