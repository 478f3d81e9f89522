//! Closed set of WebDriver error signals indicating the browser session
//! itself is gone, as opposed to an ordinary page-level failure. A message
//! matching one of these means the session must be evicted rather than
//! returned to the pool (spec §4.2 "a disconnected browser is removed from
//! the pool immediately").

const SIGNALS: &[&str] = &[
    "no such session",
    "session not found",
    "session deleted",
    "invalid session id",
    "disconnected",
    "chrome not reachable",
    "target window already closed",
];

pub fn is_disconnect_signal(message: &str) -> bool {
    let lower = message.to_lowercase();
    SIGNALS.iter().any(|signal| lower.contains(signal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_signals_case_insensitively() {
        assert!(is_disconnect_signal("No Such Session: session deleted as the browser has closed"));
        assert!(is_disconnect_signal("chrome not reachable"));
        assert!(is_disconnect_signal("Target window already closed"));
    }

    #[test]
    fn does_not_match_unrelated_errors() {
        assert!(!is_disconnect_signal("selector not found"));
        assert!(!is_disconnect_signal("navigation to https://x.com/a1 timed out"));
    }
}
