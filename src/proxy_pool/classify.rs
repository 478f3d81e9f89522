//! Closed set of network/proxy error signals (spec §4.1). A message matching
//! one of these marks the proxy unhealthy; anything else propagates as an
//! ordinary failure without touching proxy health.

const SIGNALS: &[&str] = &[
    "connection reset",
    "connection refused",
    "timed out",
    "timeout",
    "host unreachable",
    "407",
    "502",
    "503",
    "504",
    "tunneling socket",
    "proxy authentication required",
];

pub fn is_proxy_signal(message: &str) -> bool {
    let lower = message.to_lowercase();
    SIGNALS.iter().any(|signal| lower.contains(signal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_signals_case_insensitively() {
        assert!(is_proxy_signal("Connection Reset by peer"));
        assert!(is_proxy_signal("502 Bad Gateway"));
        assert!(is_proxy_signal("Proxy Authentication Required"));
    }

    #[test]
    fn does_not_match_unrelated_errors() {
        assert!(!is_proxy_signal("selector not found"));
        assert!(!is_proxy_signal("account not found"));
    }
}
