use std::convert::TryFrom;
use std::time::SystemTime;

/// A single log record waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    timestamp: i64,
    content: String,
}

impl LogMessage {
    pub fn new(timestamp: i64, content: impl Into<String>) -> Self {
        Self {
            timestamp,
            content: content.into(),
        }
    }

    /// Creates a message stamped with the current time.
    pub fn now(content: impl Into<String>) -> Self {
        Self::new(timestamp(), content)
    }

    /// Milliseconds since the unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Size of the content in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Sorts by ascending timestamp. The sort is stable, so messages with equal
/// timestamps keep their queue order.
pub fn sort_by_timestamp(batch: &mut [LogMessage]) {
    batch.sort_by_key(LogMessage::timestamp);
}

/// Cuts `content` to at most `max_bytes`, backing off to a char boundary.
pub(crate) fn truncate_to(content: &mut String, max_bytes: usize) -> bool {
    if content.len() <= max_bytes {
        return false;
    }
    let mut end = max_bytes;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content.truncate(end);
    true
}

/// Returns current unix timestamp in milliseconds
pub fn timestamp() -> i64 {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        Err(err) => -i64::try_from(err.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let mut batch = vec![
            LogMessage::new(20, "c"),
            LogMessage::new(10, "a"),
            LogMessage::new(20, "d"),
            LogMessage::new(10, "b"),
        ];
        sort_by_timestamp(&mut batch);
        let contents: Vec<&str> = batch.iter().map(LogMessage::content).collect();
        assert_eq!(contents, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_size_counts_utf8_bytes() {
        assert_eq!(LogMessage::new(0, "\u{00A1}").size(), 2);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut content = String::from("ab\u{00A1}");
        assert!(truncate_to(&mut content, 3));
        assert_eq!(content, "ab");

        let mut content = String::from("abc");
        assert!(!truncate_to(&mut content, 3));
        assert_eq!(content, "abc");
    }

    #[test]
    fn test_timestamp_is_after_2020() {
        assert!(timestamp() > 1_577_836_800_000);
    }
}
