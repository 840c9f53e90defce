//! Reusable fill buffer for raw change records.
//!
//! A [`RawChangeBuffer`] is allocated once per session and overwritten on
//! every wait cycle. Producers either hand over a raw fill with
//! [`RawChangeBuffer::load`] or append records one at a time with
//! [`RawChangeBuffer::push_record`], which writes the same layout the
//! parser consumes:
//!
//! ```text
//! offset  size  field
//! 0       4     next_offset (LE u32, 0 = last record)
//! 4       4     action      (LE u32)
//! 8       4     name_len    (LE u32, bytes)
//! 12      n     name        (UTF-16LE)
//! ```
//!
//! Records start on 4-byte boundaries; `next_offset` includes the padding.

use thiserror::Error;

/// Size of the fixed record header.
pub const RECORD_HEADER_LEN: usize = 12;

/// Alignment of every record after the first.
const RECORD_ALIGN: usize = 4;

/// A record did not fit in the remaining capacity.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("record of {needed} bytes does not fit ({available} of {capacity} bytes free)")]
pub struct CapacityExceeded {
    pub needed: usize,
    pub available: usize,
    pub capacity: usize,
}

/// Fixed-capacity byte buffer holding one fill.
#[derive(Debug)]
pub struct RawChangeBuffer {
    bytes: Box<[u8]>,
    filled: usize,
    /// Start of the most recently pushed record, patched when another is chained.
    last_record: Option<usize>,
}

impl RawChangeBuffer {
    /// Allocates a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            filled: 0,
            last_record: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Number of bytes holding the current fill.
    #[must_use]
    pub fn filled_len(&self) -> usize {
        self.filled
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// The filled region.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }

    /// Discards the current fill without releasing the allocation.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.last_record = None;
    }

    /// Replaces the fill with raw bytes delivered by a producer.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] if `data` is larger than the buffer; the
    /// previous fill is cleared either way.
    pub fn load(&mut self, data: &[u8]) -> Result<(), CapacityExceeded> {
        self.clear();
        if data.len() > self.capacity() {
            return Err(CapacityExceeded {
                needed: data.len(),
                available: self.capacity(),
                capacity: self.capacity(),
            });
        }
        self.bytes[..data.len()].copy_from_slice(data);
        self.filled = data.len();
        Ok(())
    }

    /// Appends one record, chaining it to the previously pushed record.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] if the record (plus alignment padding)
    /// does not fit. The buffer is left unchanged in that case.
    pub fn push_record(&mut self, action: u32, name: &str) -> Result<(), CapacityExceeded> {
        let name_len = name.encode_utf16().count() * 2;
        let record_len = RECORD_HEADER_LEN + name_len;

        let start = match self.last_record {
            Some(_) => align_up(self.filled),
            None => self.filled,
        };
        let available = self.capacity().saturating_sub(start);
        let exceeded = CapacityExceeded {
            needed: record_len,
            available,
            capacity: self.capacity(),
        };
        if record_len > available {
            return Err(exceeded);
        }
        let name_len_field = u32::try_from(name_len).map_err(|_| exceeded)?;

        self.bytes[self.filled..start].fill(0);

        let header = &mut self.bytes[start..start + RECORD_HEADER_LEN];
        header[0..4].copy_from_slice(&0u32.to_le_bytes());
        header[4..8].copy_from_slice(&action.to_le_bytes());
        header[8..12].copy_from_slice(&name_len_field.to_le_bytes());

        let payload = &mut self.bytes[start + RECORD_HEADER_LEN..start + record_len];
        for (unit, slot) in name.encode_utf16().zip(payload.chunks_exact_mut(2)) {
            slot.copy_from_slice(&unit.to_le_bytes());
        }

        if let Some(previous) = self.last_record {
            // start - previous is bounded by capacity, which already fit name_len above
            let next_offset = (start - previous) as u32;
            self.bytes[previous..previous + 4].copy_from_slice(&next_offset.to_le_bytes());
        }

        self.last_record = Some(start);
        self.filled = start + record_len;
        Ok(())
    }
}

fn align_up(offset: usize) -> usize {
    (offset + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}
