//! HTTP headers handling
//!
//! Headers keep insertion order, compare names case-insensitively and may
//! hold several values for one name. Responses retain every duplicate as
//! received; request-side merging goes through [`Headers::set`], which gives
//! last-write-wins semantics.

use super::{Error, Result};
use std::fmt;

/// HTTP headers collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Append a header, keeping any existing values for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single value
    ///
    /// The header keeps the position of its first occurrence, so re-setting a
    /// default does not reorder the block.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self
            .headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(first) => {
                self.headers[first] = (name.clone(), value);
                let mut idx = 0;
                self.headers.retain(|(n, _)| {
                    let keep = idx <= first || !n.eq_ignore_ascii_case(&name);
                    idx += 1;
                    keep
                });
            }
            None => self.headers.push((name, value)),
        }
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get the last value for a header (case-insensitive)
    pub fn get_last(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Whether any comma-separated token of `name` equals `token`, ignoring case
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Overlay `other` on top of `self`, name by name
    ///
    /// Every name present in `other` replaces the same name here.
    pub fn merge(&mut self, other: &Headers) {
        for name in other.names() {
            self.remove(name);
        }
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    /// Distinct header names in first-seen order
    fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.headers {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    /// Get the number of header lines
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    ///
    /// Splits on the first colon and trims both halves.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let Some(colon_pos) = line.find(':') else {
            return Err(Error::Protocol(format!("No colon in header: {}", line)));
        };

        let name = line[..colon_pos].trim();
        let value = line[colon_pos + 1..].trim();

        if name.is_empty() {
            return Err(Error::Protocol("Empty header name".to_string()));
        }

        Ok((name.to_string(), value.to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_duplicates_are_retained() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("set-cookie", "b=2");

        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
        assert_eq!(headers.get_last("Set-Cookie"), Some("b=2"));
    }

    #[test]
    fn test_set_is_last_write_wins() {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html");
        headers.insert("X-Trace", "1");
        headers.insert("accept", "text/plain");

        headers.set("ACCEPT", "application/json");

        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(
            collected,
            vec![("ACCEPT", "application/json"), ("X-Trace", "1")]
        );
    }

    #[test]
    fn test_merge_overrides_by_name() {
        let mut base: Headers = [("User-Agent", "snapwire"), ("Accept", "*/*")]
            .into_iter()
            .collect();
        let overlay: Headers = [("accept", "text/plain")].into_iter().collect();

        base.merge(&overlay);

        assert_eq!(base.get("User-Agent"), Some("snapwire"));
        assert_eq!(base.get_all("Accept"), vec!["text/plain"]);
    }

    #[test]
    fn test_has_token() {
        let mut headers = Headers::new();
        headers.insert("Connection", "Upgrade, close");

        assert!(headers.has_token("connection", "close"));
        assert!(!headers.has_token("connection", "keep-alive"));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");
        headers.insert("X-Remove", "value3");

        assert_eq!(headers.remove("x-remove"), 2);
        assert_eq!(headers.get("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (name, value) = Headers::parse_header_line("Location:  http://a/b:c  ").unwrap();
        assert_eq!(name, "Location");
        assert_eq!(value, "http://a/b:c");

        assert!(matches!(
            Headers::parse_header_line("Invalid"),
            Err(Error::Protocol(_))
        ));
        assert!(Headers::parse_header_line(": value").is_err());
    }
}
