//! Header fields shared by both protocols
//!
//! Names keep the spelling they arrived or were set with, which HTTP/1.1
//! echoes back on the wire; all lookups ignore ASCII case. The HTTP/2 layer
//! lower-cases names when it encodes them.

use super::{Error, Result};

/// Ordered multimap of header fields
///
/// Repeated names are kept as separate entries in arrival order, so
/// `Set-Cookie` and friends survive a round trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Append a field, keeping any existing values of the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replace all values of `name` with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values(name).next()
    }

    /// Every value of `name`, in order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.values(name).collect()
    }

    fn values<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.fields
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Elements of a comma-separated list header across all its fields
    ///
    /// Empty elements are skipped (RFC 7230 Section 7).
    pub fn tokens<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.values(name)
            .flat_map(|v| v.split(','))
            .map(|t| t.trim_matches(|c| c == ' ' || c == '\t'))
            .filter(|t| !t.is_empty())
    }

    /// Whether a list header carries `token`, ignoring case
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Drop every field named `name`; returns how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Split an HTTP/1.1 field line into name and value
    ///
    /// The name must be a token directly followed by the colon; whitespace
    /// before the colon is rejected (RFC 7230 Section 3.2.4). Optional
    /// whitespace around the value is trimmed.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("no colon in {:?}", line)))?;

        if name.is_empty() {
            return Err(Error::InvalidHeader("empty field name".to_string()));
        }
        if !name.bytes().all(is_token_byte) {
            return Err(Error::InvalidHeader(format!("invalid field name {:?}", name)));
        }

        let value = value.trim_matches(|c| c == ' ' || c == '\t');
        if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
            return Err(Error::InvalidHeader(format!("invalid value for {}", name)));
        }

        Ok((name.to_string(), value.to_string()))
    }
}

/// tchar from RFC 7230 Section 3.2.6
pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), None);
        assert_eq!(headers.iter().next(), Some(("Content-Type", "text/html")));
    }

    #[test]
    fn test_repeated_fields_keep_order() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("X-Other", "x");
        headers.insert("set-cookie", "b=2");

        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_set_and_remove() {
        let mut headers = Headers::new();
        headers.insert("X-A", "1");
        headers.insert("x-a", "2");
        headers.insert("X-B", "keep");
        headers.set("X-A", "3");
        assert_eq!(headers.get_all("X-A"), vec!["3"]);

        assert_eq!(headers.remove("x-a"), 1);
        assert_eq!(headers.remove("x-a"), 0);
        assert_eq!(headers.get("X-B"), Some("keep"));
    }

    #[test]
    fn test_list_tokens() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive, Upgrade");
        headers.insert("Connection", " ,close");

        let tokens: Vec<&str> = headers.tokens("connection").collect();
        assert_eq!(tokens, vec!["keep-alive", "Upgrade", "close"]);
        assert!(headers.has_token("Connection", "CLOSE"));
        assert!(!headers.has_token("Connection", "te"));
        assert_eq!(headers.tokens("Missing").count(), 0);
    }

    #[test]
    fn test_values_outlive_lookup_name() {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html, */*");

        let first = {
            let name = String::from("accept");
            headers.get(&name)
        };
        let all = {
            let name = String::from("ACCEPT");
            headers.get_all(&name)
        };
        assert_eq!(first, Some("text/html, */*"));
        assert_eq!(all, vec!["text/html, */*"]);
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!((name.as_str(), value.as_str()), ("Content-Type", "text/html"));

        let (_, value) = Headers::parse_header_line("X-Custom:\t value  ").unwrap();
        assert_eq!(value, "value");

        let (_, value) = Headers::parse_header_line("X-Time: 12:30").unwrap();
        assert_eq!(value, "12:30");

        let (_, value) = Headers::parse_header_line("X-Empty:").unwrap();
        assert_eq!(value, "");
    }

    #[test]
    fn test_parse_header_line_rejects() {
        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("Host : example.com").is_err());
        assert!(Headers::parse_header_line("Bad Name: x").is_err());
        assert!(Headers::parse_header_line("X-Nul: a\0b").is_err());
    }
}
