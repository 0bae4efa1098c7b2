//! `when` predicate evaluation
//!
//! Predicates guard individual commands in a sequence. Both sides of a
//! comparison are expanded against the execution state before comparing, so
//! expressions like `$stdout:denied` or `${cmd[0].stdout} != error` work on
//! the in-flight response.

use crate::error::Result;
use crate::state::StateMap;

/// Evaluate a predicate expression against the execution state.
///
/// Supported forms, checked in order: `!=`, `==`, `=`, `:` (contains).
/// An empty expression yields `default_when_empty`; a bare expression is
/// truthy when its expansion is non-empty and neither `false` nor `0`.
pub fn evaluate(state: &StateMap, expression: &str, default_when_empty: bool) -> Result<bool> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(default_when_empty);
    }
    for (operator, negate, contains) in [("!=", true, false), ("==", false, false), ("=", false, false), (":", false, true)] {
        if let Some((lhs, rhs)) = expression.split_once(operator) {
            let lhs = state.expand_as_text(lhs.trim());
            let rhs = state.expand_as_text(rhs.trim());
            let holds = if contains {
                lhs.contains(&rhs)
            } else {
                lhs == rhs
            };
            return Ok(holds != negate);
        }
    }
    let expanded = state.expand_as_text(expression);
    let expanded = expanded.trim();
    Ok(!expanded.is_empty() && expanded != "false" && expanded != "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> StateMap {
        let mut state = StateMap::new();
        state.put("stdout", "connection refused");
        state.put("attempt", 2);
        state
    }

    #[test]
    fn test_empty_uses_default() {
        assert!(evaluate(&state(), "", true).unwrap());
        assert!(!evaluate(&state(), "  ", false).unwrap());
    }

    #[test]
    fn test_equality() {
        assert!(evaluate(&state(), "$attempt = 2", true).unwrap());
        assert!(evaluate(&state(), "$attempt == 2", true).unwrap());
        assert!(!evaluate(&state(), "$attempt = 3", true).unwrap());
    }

    #[test]
    fn test_inequality() {
        assert!(evaluate(&state(), "$attempt != 3", true).unwrap());
        assert!(!evaluate(&state(), "$attempt != 2", true).unwrap());
    }

    #[test]
    fn test_contains() {
        assert!(evaluate(&state(), "$stdout:refused", true).unwrap());
        assert!(!evaluate(&state(), "$stdout:accepted", true).unwrap());
    }

    #[test]
    fn test_bare_truthiness() {
        assert!(evaluate(&state(), "$stdout", false).unwrap());
        let mut falsy = StateMap::new();
        falsy.put("flag", "false");
        assert!(!evaluate(&falsy, "$flag", true).unwrap());
        falsy.put("flag", "0");
        assert!(!evaluate(&falsy, "$flag", true).unwrap());
    }
}
