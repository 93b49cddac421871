//! HPACK static and dynamic tables
//!
//! Both tables share one index space: 1..=61 address the static table and
//! 62.. address the dynamic table, newest entry first.

use std::collections::VecDeque;

use super::{HeaderField, HpackError, Result};

/// Static table (RFC 7541 Appendix A), index 1 first
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Number of static table entries
pub const STATIC_LEN: usize = STATIC_TABLE.len();

/// Result of searching the tables for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Name and value both match at this index
    Full(usize),
    /// Only the name matches at this index
    Name(usize),
    None,
}

/// Search the static table
///
/// Exact matches win; otherwise the lowest index with the same name.
pub fn find_static(name: &str, value: &str) -> Match {
    let mut name_match = None;
    for (i, &(n, v)) in STATIC_TABLE.iter().enumerate() {
        if n == name {
            if v == value {
                return Match::Full(i + 1);
            }
            name_match.get_or_insert(i + 1);
        }
    }
    name_match.map_or(Match::None, Match::Name)
}

/// Dynamic table (RFC 7541 Section 2.3.2)
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    /// Create an empty table with the given maximum size
    pub fn new(max_size: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Current size: sum of `32 + name + value` over all entries
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Change the maximum size, evicting the oldest entries as needed
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    /// Insert a field as the newest entry
    ///
    /// A field larger than the whole table empties it and is not stored.
    pub fn insert(&mut self, field: HeaderField) {
        let entry_size = field.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }

        self.evict_to(self.max_size - entry_size);
        self.size += entry_size;
        self.entries.push_front(field);
    }

    /// Entry at a zero-based dynamic position (0 is the newest)
    pub fn get(&self, position: usize) -> Option<&HeaderField> {
        self.entries.get(position)
    }

    /// Search for a field; returns zero-based dynamic positions
    pub fn find(&self, name: &str, value: &str) -> Match {
        let mut name_match = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name == name {
                if entry.value == value {
                    return Match::Full(i);
                }
                name_match.get_or_insert(i);
            }
        }
        name_match.map_or(Match::None, Match::Name)
    }

    /// Look up a combined HPACK index (1-based, static first)
    pub fn lookup(&self, index: usize) -> Result<(&str, &str)> {
        match index {
            0 => Err(HpackError::InvalidIndex(0)),
            i if i <= STATIC_LEN => {
                let (name, value) = STATIC_TABLE[i - 1];
                Ok((name, value))
            }
            i => self
                .get(i - STATIC_LEN - 1)
                .map(|f| (f.name.as_str(), f.value.as_str()))
                .ok_or(HpackError::InvalidIndex(i)),
        }
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => {
                    self.size = 0;
                    break;
                }
            }
        }
    }

    /// Iterate entries newest first
    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup() {
        let table = DynamicTable::new(4096);
        assert_eq!(table.lookup(1).unwrap(), (":authority", ""));
        assert_eq!(table.lookup(2).unwrap(), (":method", "GET"));
        assert_eq!(table.lookup(61).unwrap(), ("www-authenticate", ""));
        assert_eq!(table.lookup(0), Err(HpackError::InvalidIndex(0)));
        assert_eq!(table.lookup(62), Err(HpackError::InvalidIndex(62)));
    }

    #[test]
    fn test_find_static() {
        assert_eq!(find_static(":method", "POST"), Match::Full(3));
        assert_eq!(find_static(":status", "418"), Match::Name(8));
        assert_eq!(find_static("x-custom", "1"), Match::None);
    }

    #[test]
    fn test_insert_newest_first() {
        let mut table = DynamicTable::new(4096);
        table.insert(HeaderField::new("a", "1"));
        table.insert(HeaderField::new("b", "2"));

        assert_eq!(table.lookup(62).unwrap(), ("b", "2"));
        assert_eq!(table.lookup(63).unwrap(), ("a", "1"));
        assert_eq!(table.size(), 68);
    }

    #[test]
    fn test_eviction_oldest_first() {
        // each entry is 32 + 1 + 1 = 34 bytes; room for two
        let mut table = DynamicTable::new(70);
        table.insert(HeaderField::new("a", "1"));
        table.insert(HeaderField::new("b", "2"));
        table.insert(HeaderField::new("c", "3"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.find("a", "1"), Match::None);
        assert_eq!(table.find("c", "3"), Match::Full(0));
        assert!(table.size() <= table.max_size());
    }

    #[test]
    fn test_oversize_entry_clears_table() {
        let mut table = DynamicTable::new(40);
        table.insert(HeaderField::new("a", "1"));
        table.insert(HeaderField::new("long-name", "long-value"));

        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_shrink_evicts() {
        let mut table = DynamicTable::new(4096);
        table.insert(HeaderField::new("a", "1"));
        table.insert(HeaderField::new("b", "2"));
        table.set_max_size(34);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().name, "b");

        table.set_max_size(0);
        assert!(table.is_empty());
    }
}
