//! Placeholder expansion for destination names.

use chrono::{DateTime, Utc};

/// Expands `{date}`, `{timestamp}`, `{pid}` and `{env:NAME}` in `template`.
/// Dates are UTC. Unknown placeholders, and variables that are not set, are
/// left as written.
pub fn substitute(template: &str) -> String {
    substitute_at(template, Utc::now())
}

pub(crate) fn substitute_at(template: &str, now: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];
        let close = match rest.find('}') {
            Some(close) => close,
            None => break,
        };
        match resolve(&rest[1..close], now) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[..=close]),
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

fn resolve(key: &str, now: DateTime<Utc>) -> Option<String> {
    match key {
        "date" => Some(now.format("%Y%m%d").to_string()),
        "timestamp" => Some(now.format("%Y%m%d%H%M%S").to_string()),
        "pid" => Some(std::process::id().to_string()),
        _ => key
            .strip_prefix("env:")
            .and_then(|name| std::env::var(name).ok()),
    }
}
