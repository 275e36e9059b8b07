//! Stable numeric correlation ids.
//!
//! The automation pipeline expects numeric conversation/contact ids. When no
//! real CRM id exists yet, we derive one from the session id. The hash must
//! stay stable across process restarts so repeated dispatches for the same
//! session land on the same external conversation.

/// Multiplicative rolling hash over the UTF-16 code units of `input`,
/// reduced to a non-negative i32.
#[must_use]
pub fn stable_hash(input: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    reduce(hash)
}

// `i32::MIN` has no absolute value; it maps to zero.
fn reduce(hash: i32) -> i32 {
    hash.checked_abs().unwrap_or(0)
}

/// Fallback contact id for a session that has no CRM contact yet.
#[must_use]
pub fn fallback_contact_id(session_id: &str) -> i32 {
    stable_hash(&format!("{session_id}_contact"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = stable_hash("widget_session_abc123");
        let b = stable_hash("widget_session_abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn non_negative() {
        for input in ["", "a", "session-1", "𝓼𝓮𝓼𝓼𝓲𝓸𝓷", "\u{10000}"] {
            assert!(stable_hash(input) >= 0, "negative hash for {input:?}");
        }
    }

    #[test]
    fn distinct_sessions_differ() {
        assert_ne!(stable_hash("session-a"), stable_hash("session-b"));
    }

    #[test]
    fn contact_fallback_differs_from_conversation() {
        let sid = "session-a";
        assert_ne!(stable_hash(sid), fallback_contact_id(sid));
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(stable_hash(""), 0);
    }

    #[test]
    fn reduction_never_goes_negative() {
        assert_eq!(reduce(7), 7);
        assert_eq!(reduce(-5), 5);
        assert_eq!(reduce(i32::MIN), 0);
        assert_eq!(reduce(i32::MAX), i32::MAX);
    }

    #[test]
    fn known_values() {
        // hash = hash * 31 + code_unit, folded into i32.
        assert_eq!(stable_hash("a"), 97);
        assert_eq!(stable_hash("ab"), 97 * 31 + 98);
    }
}
