//! Stdout normalization and matching helpers
//!
//! Remote PTY output carries ANSI escape artifacts and backspace edits;
//! fragment matching (terminators, error fragments, directory probes) has to
//! compare against the cleaned text.

use std::sync::LazyLock;

use regex::Regex;

/// Fragment the sudo password flow treats as a hard failure
pub const COMMAND_NOT_FOUND: &str = "command not found";

static ANSI_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07|\x1b[@-_]").expect("ANSI pattern")
});

/// Strip ANSI escape sequences and resolve backspace edits.
///
/// The result is what a human would see on the terminal, which is what all
/// fragment comparisons are defined over.
pub fn escape_stdout(stdout: &str) -> String {
    let stripped = ANSI_SEQUENCE.replace_all(stdout, "");
    let mut result = String::with_capacity(stripped.len());
    for ch in stripped.chars() {
        if ch == '\u{8}' {
            result.pop();
        } else {
            result.push(ch);
        }
    }
    result
}

/// Substring check insensitive to escape sequences and carriage returns
pub fn escaped_contains(stdout: &str, fragment: &str) -> bool {
    if fragment.is_empty() {
        return false;
    }
    let stdout = escape_stdout(stdout).replace('\r', "");
    let fragment = escape_stdout(fragment).replace('\r', "");
    stdout.contains(&fragment)
}

/// Plain substring check across a terminator set
pub fn has_terminator(stdout: &str, terminators: &[String]) -> bool {
    terminators
        .iter()
        .any(|terminator| !terminator.is_empty() && stdout.contains(terminator.as_str()))
}

/// True unless stdout carries a permission-denied signature
pub fn is_permitted(stdout: &str) -> bool {
    !escaped_contains(stdout, "Permission denied") && !escaped_contains(stdout, "Operation not permitted")
}

/// Detects the shell's missing-directory complaint after a `cd`
pub fn check_no_such_file_or_directory(stdout: &str) -> bool {
    escape_stdout(stdout)
        .to_lowercase()
        .contains("no such file or directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_stdout_strips_ansi() {
        assert_eq!(escape_stdout("\x1b[31mred\x1b[0m text"), "red text");
        assert_eq!(escape_stdout("plain"), "plain");
    }

    #[test]
    fn test_escape_stdout_applies_backspaces() {
        assert_eq!(escape_stdout("abcd\u{8}\u{8}ef"), "abef");
    }

    #[test]
    fn test_escaped_contains() {
        assert!(escaped_contains("\x1b[1mPassword\x1b[0m:", "Password"));
        assert!(escaped_contains("line\r\nPassword:", "Password"));
        assert!(!escaped_contains("password:", "Password"));
        assert!(!escaped_contains("anything", ""));
    }

    #[test]
    fn test_has_terminator() {
        let terminators = vec!["$ ".to_string(), "Password".to_string()];
        assert!(has_terminator("ready $ ", &terminators));
        assert!(has_terminator("Password:", &terminators));
        assert!(!has_terminator("still running", &terminators));
        assert!(!has_terminator("anything", &[]));
    }

    #[test]
    fn test_is_permitted() {
        assert!(is_permitted("total 4\ndrwxr-xr-x"));
        assert!(!is_permitted("ls: /root: Permission denied"));
        assert!(!is_permitted("rm: Operation not permitted"));
    }

    #[test]
    fn test_check_no_such_file_or_directory() {
        assert!(check_no_such_file_or_directory(
            "bash: cd: /missing: No such file or directory"
        ));
        assert!(!check_no_such_file_or_directory("/tmp"));
    }
}
