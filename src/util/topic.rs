//! Translation of MQTT topic patterns into SQL `LIKE` patterns.
//!
//! `+` matches one level and `#` the remainder in MQTT, while `LIKE` only has
//! `%` (any sequence). Both wildcards therefore become `%`, which also makes
//! `+` span several levels. Literal `%` and `_` inside topic segments are not
//! escaped.

/// Matches any topic
pub const MATCH_ALL: &str = "%";

const SEGMENT_SEPARATOR: char = '/';

/// Convert one MQTT subscription pattern into a `LIKE` pattern
pub fn to_like_pattern(pattern: &str) -> String {
    if pattern.is_empty() || pattern == "#" {
        return MATCH_ALL.to_string();
    }

    let mut like = pattern
        .split(SEGMENT_SEPARATOR)
        .map(|segment| match segment {
            "+" | "#" => MATCH_ALL,
            literal => literal,
        })
        .collect::<Vec<_>>()
        .join("/");

    // "%/%" and "%%" match exactly what "%" matches
    loop {
        let collapsed = like.replace("%/%", "%").replace("%%", "%");
        if collapsed == like {
            break like;
        }
        like = collapsed;
    }
}

/// Convert every pattern in a list
pub fn to_like_patterns<S: AsRef<str>>(patterns: &[S]) -> Vec<String> {
    patterns
        .iter()
        .map(|pattern| to_like_pattern(pattern.as_ref()))
        .collect()
}
