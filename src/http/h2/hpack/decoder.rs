//! HPACK decoder
//!
//! Decoding a block is bounded by `max_decoded_size`, the total of name and
//! value lengths the block may expand to. The limit is charged before any
//! string is copied or any table entry is cloned, so a block of one-byte
//! indexed references to a large dynamic entry fails fast instead of
//! allocating.

use tracing::trace;

use super::table::DynamicTable;
use super::{
    decode_integer, decode_string, HeaderField, HpackError, Result, DEFAULT_TABLE_SIZE,
};

/// Default ceiling on the decoded size of one header block
pub const DEFAULT_MAX_DECODED_SIZE: usize = 64 * 1024;

/// Header block decoder; one per connection
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Largest table size the peer may select (our SETTINGS_HEADER_TABLE_SIZE)
    max_table_size: usize,
    max_decoded_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE, DEFAULT_MAX_DECODED_SIZE)
    }
}

/// Tracks how much of the decoded-size budget a block has used
struct Budget {
    used: usize,
    limit: usize,
}

impl Budget {
    fn remaining(&self) -> usize {
        self.limit - self.used
    }

    fn charge(&mut self, len: usize) -> Result<()> {
        let total = self.used.saturating_add(len);
        if total > self.limit {
            return Err(HpackError::DecompressionBomb {
                limit: self.limit,
                size: total,
            });
        }
        self.used = total;
        Ok(())
    }

    /// Rewrite a bomb error raised against the remaining budget in block terms
    fn rebase(&self, err: HpackError) -> HpackError {
        match err {
            HpackError::DecompressionBomb { size, .. } => HpackError::DecompressionBomb {
                limit: self.limit,
                size: self.used.saturating_add(size),
            },
            other => other,
        }
    }
}

impl Decoder {
    pub fn new(max_table_size: usize, max_decoded_size: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_table_size),
            max_table_size,
            max_decoded_size,
        }
    }

    /// Change the table size the peer is allowed to use
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
        if self.table.max_size() > size {
            self.table.set_max_size(size);
        }
    }

    pub fn max_decoded_size(&self) -> usize {
        self.max_decoded_size
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decode one complete header block
    ///
    /// Any error leaves the dynamic table in an unknown state; the caller
    /// must treat it as a COMPRESSION_ERROR for the whole connection.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        let mut headers = Vec::new();
        let mut budget = Budget {
            used: 0,
            limit: self.max_decoded_size,
        };
        let mut pos = 0;

        while pos < block.len() {
            let rest = &block[pos..];
            let first = rest[0];

            if first & 0x80 != 0 {
                // Indexed header field
                let (index, used) = decode_integer(rest, 7)?;
                let (name, value) = self.table.lookup(index)?;
                budget.charge(name.len() + value.len())?;
                headers.push(HeaderField::new(name, value));
                pos += used;
            } else if first & 0xc0 == 0x40 {
                // Literal with incremental indexing
                let (field, used) = self.decode_literal(rest, 6, &mut budget)?;
                self.table.insert(field.clone());
                headers.push(field);
                pos += used;
            } else if first & 0xe0 == 0x20 {
                if !headers.is_empty() {
                    return Err(HpackError::TableSizeUpdateMisplaced);
                }
                let (size, used) = decode_integer(rest, 5)?;
                if size > self.max_table_size {
                    return Err(HpackError::TableSizeUpdateTooLarge {
                        requested: size,
                        max: self.max_table_size,
                    });
                }
                trace!(size, "HPACK dynamic table size update");
                self.table.set_max_size(size);
                pos += used;
            } else {
                // Literal without indexing (0000) or never indexed (0001)
                let (field, used) = self.decode_literal(rest, 4, &mut budget)?;
                headers.push(field);
                pos += used;
            }
        }

        Ok(headers)
    }

    fn decode_literal(
        &self,
        src: &[u8],
        prefix_bits: u8,
        budget: &mut Budget,
    ) -> Result<(HeaderField, usize)> {
        let (index, mut pos) = decode_integer(src, prefix_bits)?;

        let name = if index == 0 {
            let (name, used) = decode_string(&src[pos..], budget.remaining())
                .map_err(|e| budget.rebase(e))?;
            pos += used;
            budget.charge(name.len())?;
            name
        } else {
            let (name, _) = self.table.lookup(index)?;
            budget.charge(name.len())?;
            name.to_string()
        };

        let (value, used) = decode_string(&src[pos..], budget.remaining())
            .map_err(|e| budget.rebase(e))?;
        pos += used;
        budget.charge(value.len())?;

        Ok((HeaderField { name, value }, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_with_indexing() {
        // RFC 7541 C.2.1
        let mut block = vec![0x40, 0x0a];
        block.extend_from_slice(b"custom-key");
        block.push(0x0d);
        block.extend_from_slice(b"custom-header");

        let mut decoder = Decoder::default();
        let headers = decoder.decode(&block).unwrap();
        assert_eq!(headers, vec![HeaderField::new("custom-key", "custom-header")]);
        assert_eq!(decoder.table().size(), 55);
    }

    #[test]
    fn test_literal_without_indexing() {
        // RFC 7541 C.2.2
        let mut block = vec![0x04, 0x0c];
        block.extend_from_slice(b"/sample/path");

        let mut decoder = Decoder::default();
        let headers = decoder.decode(&block).unwrap();
        assert_eq!(headers, vec![HeaderField::new(":path", "/sample/path")]);
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn test_never_indexed() {
        // RFC 7541 C.2.3
        let mut block = vec![0x10, 0x08];
        block.extend_from_slice(b"password");
        block.push(0x06);
        block.extend_from_slice(b"secret");

        let mut decoder = Decoder::default();
        let headers = decoder.decode(&block).unwrap();
        assert_eq!(headers, vec![HeaderField::new("password", "secret")]);
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn test_indexed_static() {
        // RFC 7541 C.2.4
        let mut decoder = Decoder::default();
        let headers = decoder.decode(&[0x82]).unwrap();
        assert_eq!(headers, vec![HeaderField::new(":method", "GET")]);
    }

    #[test]
    fn test_index_zero_rejected() {
        let mut decoder = Decoder::default();
        assert_eq!(decoder.decode(&[0x80]), Err(HpackError::InvalidIndex(0)));
    }

    #[test]
    fn test_index_past_dynamic_table() {
        let mut decoder = Decoder::default();
        assert_eq!(decoder.decode(&[0xbe]), Err(HpackError::InvalidIndex(62)));
    }

    #[test]
    fn test_size_update_at_start() {
        let mut decoder = Decoder::default();
        let headers = decoder.decode(&[0x20, 0x82]).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(decoder.table().max_size(), 0);
    }

    #[test]
    fn test_size_update_after_field() {
        let mut decoder = Decoder::default();
        assert_eq!(
            decoder.decode(&[0x82, 0x20]),
            Err(HpackError::TableSizeUpdateMisplaced)
        );
    }

    #[test]
    fn test_size_update_above_allowed() {
        let mut decoder = Decoder::new(100, DEFAULT_MAX_DECODED_SIZE);
        // 001 11111 + 70 = 101
        assert_eq!(
            decoder.decode(&[0x3f, 0x46]),
            Err(HpackError::TableSizeUpdateTooLarge {
                requested: 101,
                max: 100
            })
        );
    }

    #[test]
    fn test_decompression_bomb_indexed() {
        let mut decoder = Decoder::new(4096, 100);
        let block = [0x82u8; 50];
        assert!(matches!(
            decoder.decode(&block),
            Err(HpackError::DecompressionBomb { limit: 100, .. })
        ));
    }

    #[test]
    fn test_decompression_bomb_dynamic_reference() {
        let mut decoder = Decoder::new(4096, 1000);

        // a literal with a 600-byte value, then an indexed reference to it
        let mut block = vec![0x40, 0x01, b'x', 0x7f, 0xd9, 0x03];
        block.extend(std::iter::repeat(b'v').take(600));
        block.push(0xbe);

        let result = decoder.decode(&block);
        assert!(matches!(
            result,
            Err(HpackError::DecompressionBomb { limit: 1000, .. })
        ));
    }

    #[test]
    fn test_truncated_literal() {
        let mut decoder = Decoder::default();
        assert_eq!(
            decoder.decode(&[0x40, 0x05, b'a']),
            Err(HpackError::Truncated)
        );
    }
}
