//! HPACK encoder
//!
//! Field representation is chosen in this order: exact static match, exact
//! dynamic match, static name, dynamic name, literal name. Everything that
//! is not fully indexed is sent with incremental indexing so repeated
//! headers on later responses compress to a single byte.

use bytes::{Bytes, BytesMut};

use super::table::{find_static, DynamicTable, Match, STATIC_LEN};
use super::{encode_integer, encode_string, HeaderField, DEFAULT_TABLE_SIZE};

/// Header block encoder; one per connection
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Smallest and final size since the last block, if the size changed
    pending_update: Option<(usize, usize)>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Encoder {
            table: DynamicTable::new(max_table_size),
            pending_update: None,
        }
    }

    /// Apply a new SETTINGS_HEADER_TABLE_SIZE from the peer
    ///
    /// The change is signalled at the start of the next header block. If the
    /// size shrank and grew again in between, the smallest value is signalled
    /// first so the peer evicts the same entries we did.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size == self.table.max_size() && self.pending_update.is_none() {
            return;
        }
        let smallest = match self.pending_update {
            Some((min, _)) => min.min(size),
            None => self.table.max_size().min(size),
        };
        self.pending_update = Some((smallest, size));
        self.table.set_max_size(smallest);
        self.table.set_max_size(size);
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Encode a header list, appending the block to `dst`
    pub fn encode<'a, I>(&mut self, headers: I, dst: &mut BytesMut)
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        if let Some((smallest, last)) = self.pending_update.take() {
            if smallest < last {
                encode_integer(dst, smallest, 5, 0x20);
            }
            encode_integer(dst, last, 5, 0x20);
        }

        for field in headers {
            self.encode_field(field, dst);
        }
    }

    /// Encode a header list into a new buffer
    pub fn encode_block<'a, I>(&mut self, headers: I) -> Bytes
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        let mut dst = BytesMut::new();
        self.encode(headers, &mut dst);
        dst.freeze()
    }

    fn encode_field(&mut self, field: &HeaderField, dst: &mut BytesMut) {
        let name = field.name.as_str();
        let value = field.value.as_str();

        let static_match = find_static(name, value);
        if let Match::Full(index) = static_match {
            encode_integer(dst, index, 7, 0x80);
            return;
        }

        let dynamic_match = self.table.find(name, value);
        if let Match::Full(position) = dynamic_match {
            encode_integer(dst, STATIC_LEN + 1 + position, 7, 0x80);
            return;
        }

        let name_index = match (static_match, dynamic_match) {
            (Match::Name(index), _) => Some(index),
            (_, Match::Name(position)) => Some(STATIC_LEN + 1 + position),
            _ => None,
        };

        match name_index {
            Some(index) => encode_integer(dst, index, 6, 0x40),
            None => {
                dst.extend_from_slice(&[0x40]);
                encode_string(dst, name.as_bytes());
            }
        }
        encode_string(dst, value.as_bytes());

        self.table.insert(field.clone());
    }
}
