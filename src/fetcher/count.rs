//! Human-readable count parsing (spec §4.3, round-trip laws in §8):
//! strip commas, accept K/M/B suffixes, always non-negative.

/// Parse a string like `"1,234"`, `"1.2K"`, `"3.4M"`, `"2B"`, or `""` into an
/// integer. Empty input parses to `0`. Unrecognized input also falls back to
/// `0` rather than erroring — a missing stat is not worth failing the whole
/// fetch over.
pub fn parse_count(raw: &str) -> u64 {
    let trimmed = raw.trim().replace(',', "");
    if trimmed.is_empty() {
        return 0;
    }

    let (number_part, multiplier) = match trimmed.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&trimmed[..trimmed.len() - 1], 1_000.0),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&trimmed[..trimmed.len() - 1], 1_000_000.0),
        Some(c) if c.eq_ignore_ascii_case(&'b') => (&trimmed[..trimmed.len() - 1], 1_000_000_000.0),
        _ => (trimmed.as_str(), 1.0),
    };

    number_part
        .parse::<f64>()
        .ok()
        .map(|n| (n * multiplier).round().max(0.0) as u64)
        .unwrap_or(0)
}

/// Mean of `values`, rounded to the nearest integer; `0` for an empty slice
/// (spec §4.3: zero engagement when zero posts observed).
pub fn mean_rounded(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().sum();
    ((sum as f64) / (values.len() as f64)).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integers_and_commas() {
        assert_eq!(parse_count("1234"), 1234);
        assert_eq!(parse_count("1,234"), 1234);
    }

    #[test]
    fn parses_k_m_b_suffixes() {
        assert_eq!(parse_count("1.2K"), 1200);
        assert_eq!(parse_count("3.4M"), 3_400_000);
        assert_eq!(parse_count("2B"), 2_000_000_000);
        assert_eq!(parse_count("1.2k"), 1200);
    }

    #[test]
    fn empty_string_parses_to_zero() {
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("   "), 0);
    }

    #[test]
    fn mean_rounded_is_zero_for_no_posts() {
        assert_eq!(mean_rounded(&[]), 0);
        assert_eq!(mean_rounded(&[1, 2, 2]), 2);
    }
}
