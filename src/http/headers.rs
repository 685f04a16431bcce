//! Lookups over the flat `field, value, field, value, ...` header list that
//! assembled messages carry.

/// Iterates `(field, value)` pairs in arrival order.
pub fn pairs(raw: &[String]) -> impl Iterator<Item = (&str, &str)> {
    raw.chunks_exact(2).map(|pair| (pair[0].as_str(), pair[1].as_str()))
}

/// First value for `name`, compared case-insensitively.
pub fn get<'a>(raw: &'a [String], name: &str) -> Option<&'a str> {
    pairs(raw)
        .find(|(field, _)| field.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Every value for `name`, in arrival order.
pub fn get_all<'a>(raw: &'a [String], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    pairs(raw)
        .filter(move |(field, _)| field.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Whether any `name` header lists `token` in its comma-separated value.
pub fn has_token(raw: &[String], name: &str, token: &str) -> bool {
    get_all(raw, name)
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lookups_are_case_insensitive_and_ordered() {
        let headers = raw(&["Host", "x", "host", "y", "Connection", "Keep-Alive, Upgrade"]);

        assert_eq!(get(&headers, "HOST"), Some("x"));
        assert_eq!(get_all(&headers, "host").collect::<Vec<_>>(), vec!["x", "y"]);
        assert!(has_token(&headers, "connection", "upgrade"));
        assert!(!has_token(&headers, "connection", "close"));
        assert_eq!(pairs(&headers).count(), 3);
    }
}
