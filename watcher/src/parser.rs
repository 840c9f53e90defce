//! Change-record parser.
//!
//! Decodes one fill of a [`RawChangeBuffer`] into [`FileChangeEvent`]s. A fill
//! is a chain of variable-length records, each starting with a 12-byte
//! little-endian header (`next_offset`, `action`, `name_len`) followed by
//! `name_len` bytes of UTF-16LE text. `next_offset` is the distance from the
//! start of the current record to the next one; `0` marks the last record.
//!
//! # Validation
//!
//! Every header and name is bounds-checked against the filled length before it
//! is read. The first malformed record ends the iteration with a
//! [`DecodeError`]; nothing after it in the same fill is interpreted.
//!
//! # Example
//!
//! ```
//! use ophanim::buffer::RawChangeBuffer;
//! use ophanim::parser::NotificationRecordParser;
//! use ophanim::types::EventKind;
//!
//! let mut buffer = RawChangeBuffer::new(256);
//! buffer.push_record(1, "a.txt").unwrap();
//!
//! let events: Vec<_> = NotificationRecordParser::new(&buffer)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].kind, EventKind::Added);
//! assert_eq!(events[0].name, "a.txt");
//! ```

use thiserror::Error;
use tracing::{debug, trace};

use crate::buffer::{RawChangeBuffer, RECORD_HEADER_LEN};
use crate::types::{EventKind, FileChangeEvent};

/// Errors that make the rest of a fill uninterpretable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than 12 bytes remain where a record header should start.
    #[error("truncated record header at offset {offset} (fill is {filled} bytes)")]
    TruncatedHeader { offset: usize, filled: usize },

    /// The declared name runs past the end of the fill.
    #[error("record at offset {offset} declares a {name_len}-byte name past the end of the fill ({filled} bytes)")]
    NameOverrun {
        offset: usize,
        name_len: u32,
        filled: usize,
    },

    /// The name payload is not a whole number of UTF-16 code units.
    #[error("record at offset {offset} has an odd name length of {name_len} bytes")]
    OddNameLength { offset: usize, name_len: u32 },

    /// The next record would start inside the current one.
    #[error("record at offset {offset} chains to offset {next_offset}, inside its own {record_len} bytes")]
    OverlappingRecord {
        offset: usize,
        next_offset: u32,
        record_len: usize,
    },
}

/// One record as laid out in the fill.
#[derive(Debug, Clone, Copy)]
struct NotificationRecord<'a> {
    next_offset: u32,
    action: u32,
    name_len: u32,
    name_bytes: &'a [u8],
}

impl NotificationRecord<'_> {
    fn len(&self) -> usize {
        RECORD_HEADER_LEN + self.name_bytes.len()
    }
}

/// Iterator over the records of a single fill.
///
/// Yields events in buffer order. After the terminal record or the first
/// error the iterator is exhausted.
#[derive(Debug)]
pub struct NotificationRecordParser<'a> {
    fill: &'a [u8],
    cursor: Option<usize>,
}

impl<'a> NotificationRecordParser<'a> {
    pub fn new(buffer: &'a RawChangeBuffer) -> Self {
        Self::from_bytes(buffer.filled())
    }

    /// Parses a filled region directly.
    pub fn from_bytes(fill: &'a [u8]) -> Self {
        Self {
            fill,
            cursor: (!fill.is_empty()).then_some(0),
        }
    }

    fn read_record(&self, offset: usize) -> Result<NotificationRecord<'a>, DecodeError> {
        let filled = self.fill.len();
        let header = self
            .fill
            .get(offset..)
            .filter(|rest| rest.len() >= RECORD_HEADER_LEN)
            .ok_or(DecodeError::TruncatedHeader { offset, filled })?;

        let next_offset = read_u32(header, 0);
        let action = read_u32(header, 4);
        let name_len = read_u32(header, 8);

        let name_start = offset + RECORD_HEADER_LEN;
        let name_bytes = usize::try_from(name_len)
            .ok()
            .and_then(|len| name_start.checked_add(len))
            .and_then(|end| self.fill.get(name_start..end))
            .ok_or(DecodeError::NameOverrun {
                offset,
                name_len,
                filled,
            })?;

        Ok(NotificationRecord {
            next_offset,
            action,
            name_len,
            name_bytes,
        })
    }

    fn decode(&self, offset: usize) -> Result<(FileChangeEvent, Option<usize>), DecodeError> {
        let record = self.read_record(offset)?;
        let name = decode_utf16le(record.name_bytes).ok_or(DecodeError::OddNameLength {
            offset,
            name_len: record.name_len,
        })?;
        let kind = EventKind::from_code(record.action);
        if let EventKind::Unknown(code) = kind {
            debug!(offset, code, "Unrecognised action code");
        }
        trace!(offset, %kind, name = %name, "Decoded record");

        let next = match record.next_offset {
            0 => None,
            step if (step as usize) < record.len() => {
                return Err(DecodeError::OverlappingRecord {
                    offset,
                    next_offset: step,
                    record_len: record.len(),
                });
            }
            step => offset.checked_add(step as usize),
        };

        Ok((FileChangeEvent { kind, name }, next))
    }
}

impl Iterator for NotificationRecordParser<'_> {
    type Item = Result<FileChangeEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.cursor.take()?;
        match self.decode(offset) {
            Ok((event, next)) => {
                self.cursor = next;
                Some(Ok(event))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl std::iter::FusedIterator for NotificationRecordParser<'_> {}

/// Decodes every record of a fill, stopping at the first malformed one.
///
/// # Errors
///
/// Returns the first [`DecodeError`] encountered.
pub fn parse_fill(buffer: &RawChangeBuffer) -> Result<Vec<FileChangeEvent>, DecodeError> {
    NotificationRecordParser::new(buffer).collect()
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decodes UTF-16LE, replacing unpaired surrogates with U+FFFD.
///
/// Returns `None` for an odd byte count.
fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    Some(
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    )
}
