//! Token normalization: raw whitespace-separated tokens become canonical
//! lowercase alphanumeric keys, or are dropped.

/// Canonical key for a raw token, or `None` when the token normalizes away.
///
/// Keeps alphanumeric code points in order, lowercases them, and drops the
/// result when it is empty or consists entirely of digits.
pub fn normalize(token: &str) -> Option<String> {
    let mut key = String::with_capacity(token.len());
    for c in token.chars().filter(|c| c.is_alphanumeric()) {
        for lower in c.to_lowercase() {
            key.push(lower);
        }
    }
    if key.is_empty() || key.chars().all(|c| c.is_numeric()) {
        return None;
    }
    Some(key)
}

/// Normalized keys of one input line, split on whitespace runs.
pub fn tokenize(line: &str) -> impl Iterator<Item = String> + '_ {
    line.split_whitespace().filter_map(normalize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_lowercases() {
        assert_eq!(normalize("Hello,"), Some("hello".into()));
        assert_eq!(normalize("world."), Some("world".into()));
        assert_eq!(normalize("THE!"), Some("the".into()));
        assert_eq!(normalize("don't"), Some("dont".into()));
    }

    #[test]
    fn drops_empty_and_numeric_tokens() {
        assert_eq!(normalize("123"), None);
        assert_eq!(normalize("..."), None);
        assert_eq!(normalize(""), None);
        // Mixed alphanumerics survive.
        assert_eq!(normalize("4th"), Some("4th".into()));
    }

    #[test]
    fn handles_non_ascii_alphabetics() {
        assert_eq!(normalize("Åre"), Some("åre".into()));
        assert_eq!(normalize("Straße"), Some("straße".into()));
    }

    #[test]
    fn tokenize_splits_on_whitespace_runs() {
        let keys: Vec<_> = tokenize("Hello, hello  WORLD 123 world.").collect();
        assert_eq!(keys, vec!["hello", "hello", "world", "world"]);
    }
}
