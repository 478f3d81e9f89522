//! Dotted-path field access over a [`Sample`], and projection of a result
//! set down to just the requested paths.
//!
//! Design note #9: the source threads duck-typed payloads everywhere field
//! access is needed; here there is exactly one utility that knows how to
//! walk a dot-separated path against a `serde_json::Value` tree, and every
//! caller (alert-rule evaluation, metrics-store field projection) goes
//! through it instead of hand-rolling field matches.

use super::sample::Sample;
use serde_json::Value;

/// Resolve a dotted path (e.g. `"engagement.avg_likes"`) against a `Sample`,
/// returning its numeric value. `None` if any path segment is missing —
/// callers treat that as "not triggered" / "field absent from the result".
pub fn resolve_numeric(sample: &Sample, path: &str) -> Option<f64> {
    let value = serde_json::to_value(sample).ok()?;
    let mut current = &value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    current.as_f64()
}

/// Project a `Sample` down to only the dotted paths in `fields`. An empty
/// `fields` list is treated as "no projection" and returns the full value.
pub fn project(sample: &Sample, fields: &[String]) -> Value {
    let full = match serde_json::to_value(sample) {
        Ok(v) => v,
        Err(_) => return Value::Null,
    };
    if fields.is_empty() {
        return full;
    }

    let mut out = serde_json::Map::new();
    for path in fields {
        if let Some(value) = get_path(&full, path) {
            set_path(&mut out, path, value.clone());
        }
    }
    Value::Object(out)
}

fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_path(out: &mut serde_json::Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut target = out;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            target.insert(segment.to_string(), value);
            return;
        }
        let entry = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        target = entry.as_object_mut().expect("nested path segments are always objects");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::Engagement;
    use chrono::Utc;

    fn sample() -> Sample {
        Sample {
            account_id: "a1".into(),
            observed_at: Utc::now(),
            followers: 160,
            following: 10,
            posts: 5,
            engagement: Engagement {
                avg_likes: 20,
                avg_retweets: 3,
                avg_replies: 1,
            },
            source: Sample::SOURCE_SCRAPER.into(),
            previous_ref: None,
        }
    }

    #[test]
    fn resolves_top_level_and_nested_paths() {
        let s = sample();
        assert_eq!(resolve_numeric(&s, "followers"), Some(160.0));
        assert_eq!(resolve_numeric(&s, "engagement.avg_likes"), Some(20.0));
    }

    #[test]
    fn missing_path_resolves_to_none() {
        let s = sample();
        assert_eq!(resolve_numeric(&s, "engagement.avg_shares"), None);
        assert_eq!(resolve_numeric(&s, "nope"), None);
    }

    #[test]
    fn projection_keeps_only_requested_paths() {
        let s = sample();
        let fields = vec!["followers".to_string(), "engagement.avg_likes".to_string()];
        let projected = project(&s, &fields);
        assert_eq!(projected["followers"], 160);
        assert_eq!(projected["engagement"]["avg_likes"], 20);
        assert!(projected.get("posts").is_none());
        assert!(projected["engagement"].get("avg_retweets").is_none());
    }
}
