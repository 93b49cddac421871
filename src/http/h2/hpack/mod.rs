//! HPACK header compression (RFC 7541)
//!
//! HTTP/2 header blocks are compressed with a combination of a fixed static
//! table, a per-connection dynamic table and a static Huffman code. This
//! module provides the building blocks and the encoder/decoder pair used by
//! [`H2Connection`](super::connection::H2Connection).
//!
//! Each connection owns one [`Encoder`] and one [`Decoder`]; they keep
//! independent dynamic tables and are only ever mutated by the thread that
//! owns the connection.

pub mod decoder;
pub mod encoder;
pub mod huffman;
pub mod table;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use table::{DynamicTable, STATIC_TABLE};

use bytes::{BufMut, BytesMut};

/// Per-entry overhead used for table size accounting (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: usize = 32;

/// Default dynamic table size (SETTINGS_HEADER_TABLE_SIZE default)
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// A single header field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    /// Create a new header field
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size accounted against the dynamic table: `32 + len(name) + len(value)`
    pub fn size(&self) -> usize {
        ENTRY_OVERHEAD + self.name.len() + self.value.len()
    }

    /// Whether this is a pseudo-header (`:method`, `:path`, ...)
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for HeaderField {
    fn from((name, value): (N, V)) -> Self {
        HeaderField::new(name, value)
    }
}

/// HPACK errors
///
/// Every variant is fatal for the connection: once a header block fails to
/// decode the dynamic tables on both ends no longer agree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    #[error("header block truncated")]
    Truncated,

    #[error("integer exceeds representable range")]
    IntegerOverflow,

    #[error("invalid table index: {0}")]
    InvalidIndex(usize),

    #[error("invalid Huffman code")]
    InvalidHuffmanCode,

    #[error("invalid Huffman padding")]
    InvalidPadding,

    #[error("EOS symbol inside Huffman string")]
    EosInString,

    #[error("header field is not valid UTF-8")]
    InvalidUtf8,

    #[error("decompressed header list exceeds {limit} bytes (reached {size})")]
    DecompressionBomb { limit: usize, size: usize },

    #[error("dynamic table size update to {requested} exceeds allowed maximum {max}")]
    TableSizeUpdateTooLarge { requested: usize, max: usize },

    #[error("dynamic table size update after first header field")]
    TableSizeUpdateMisplaced,
}

/// Result type for HPACK operations
pub type Result<T> = std::result::Result<T, HpackError>;

/// Encode an integer with an N-bit prefix (RFC 7541 Section 5.1)
///
/// `flags` carries the representation bits above the prefix.
pub fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, flags: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;

    if value < max_prefix {
        dst.put_u8(flags | value as u8);
        return;
    }

    dst.put_u8(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        dst.put_u8((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    dst.put_u8(rest as u8);
}

/// Decode an N-bit prefix integer
///
/// Returns the value and the number of bytes consumed.
pub fn decode_integer(src: &[u8], prefix_bits: u8) -> Result<(usize, usize)> {
    let first = *src.first().ok_or(HpackError::Truncated)?;
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = first as usize & max_prefix;

    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in src[1..].iter().enumerate() {
        // 4 continuation bytes already carry 28 bits; more cannot fit a u32 header size
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        let increment = ((byte & 0x7f) as usize)
            .checked_shl(shift)
            .ok_or(HpackError::IntegerOverflow)?;
        value = value
            .checked_add(increment)
            .ok_or(HpackError::IntegerOverflow)?;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((value, i + 2));
        }
    }

    Err(HpackError::Truncated)
}

/// Encode a string literal, Huffman-coding it when that is shorter
pub fn encode_string(dst: &mut BytesMut, value: &[u8]) {
    let huffman_len = huffman::encoded_len(value);
    if huffman_len < value.len() {
        encode_integer(dst, huffman_len, 7, 0x80);
        huffman::encode_into(value, dst);
    } else {
        encode_integer(dst, value.len(), 7, 0x00);
        dst.put_slice(value);
    }
}

/// Decode a string literal
///
/// `budget` is the number of decoded bytes still allowed for the current
/// header block. Raw strings are rejected before they are copied.
pub fn decode_string(src: &[u8], budget: usize) -> Result<(String, usize)> {
    let first = *src.first().ok_or(HpackError::Truncated)?;
    let is_huffman = first & 0x80 != 0;
    let (len, prefix_len) = decode_integer(src, 7)?;

    let end = prefix_len.checked_add(len).ok_or(HpackError::IntegerOverflow)?;
    if src.len() < end {
        return Err(HpackError::Truncated);
    }
    let raw = &src[prefix_len..end];

    let bytes = if is_huffman {
        huffman::decode_bounded(raw, budget)?
    } else {
        if raw.len() > budget {
            return Err(HpackError::DecompressionBomb {
                limit: budget,
                size: raw.len(),
            });
        }
        raw.to_vec()
    };

    let text = String::from_utf8(bytes).map_err(|_| HpackError::InvalidUtf8)?;
    Ok((text, end))
}
