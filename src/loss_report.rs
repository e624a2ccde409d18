//! Memory-mapped record of observed loss events, written by the conductor
//! and kept on disk for post-mortem inspection.
//!
//! Entry layout, 8-byte aligned:
//!
//! ```text
//! +-----------------------------+ 0
//! |      Observation Count      |
//! |                             |
//! +-----------------------------+ 8
//! |      Total Bytes Lost       |
//! |                             |
//! +-----------------------------+ 16
//! | First Observation Timestamp |
//! |                             |
//! +-----------------------------+ 24
//! | Last Observation Timestamp  |
//! |                             |
//! +-----------------------------+ 32
//! |         Session Id          |
//! +-----------------------------+ 36
//! |          Stream Id          |
//! +-----------------------------+ 40
//! |  Channel Length + Channel  ...
//! +-----------------------------+
//! |   Source Length + Source   ...
//! +-----------------------------+
//! ```
//!
//! The observation count doubles as the publication marker: readers ignore
//! entries whose count still reads zero.

use crate::concurrent::{AtomicBuffer, RawBuffer};
use crate::util::bit::align;
use crate::util::IndexT;

const OBSERVATION_COUNT_OFFSET: IndexT = 0;
const TOTAL_BYTES_LOST_OFFSET: IndexT = 8;
const FIRST_OBSERVATION_OFFSET: IndexT = 16;
const LAST_OBSERVATION_OFFSET: IndexT = 24;
const SESSION_ID_OFFSET: IndexT = 32;
const STREAM_ID_OFFSET: IndexT = 36;
const CHANNEL_OFFSET: IndexT = 40;

const ENTRY_ALIGNMENT: usize = 8;

/// Handle on a published loss entry, used for follow-up observations
#[derive(Debug, Clone, Copy)]
pub struct LossEntry {
    offset: IndexT,
}

/// Buffered-append writer over the mapped loss report region
pub struct LossReport {
    buffer: RawBuffer,
    next_record_offset: usize,
}

impl LossReport {
    /// Create a writer over a zeroed loss report region
    pub fn new(buffer: RawBuffer) -> LossReport {
        LossReport {
            buffer,
            next_record_offset: 0,
        }
    }

    /// Append a new entry for a stream that has just shown loss. Returns
    /// `None` when the region has no room left; loss accounting then degrades
    /// to counters only.
    pub fn create_entry(
        &mut self,
        initial_bytes_lost: i64,
        timestamp_ms: i64,
        session_id: i32,
        stream_id: i32,
        channel: &str,
        source: &str,
    ) -> Option<LossEntry> {
        let required = CHANNEL_OFFSET as usize
            + 4
            + channel.len()
            + 4
            + source.len();
        let aligned = align(required, ENTRY_ALIGNMENT);

        if self.next_record_offset + aligned > self.buffer.len() {
            return None;
        }

        let offset = self.next_record_offset as IndexT;
        let mut buffer = self.buffer;

        // UNWRAP: Room verified against the region length above
        buffer
            .put_i64(offset + TOTAL_BYTES_LOST_OFFSET, initial_bytes_lost)
            .unwrap();
        buffer
            .put_i64(offset + FIRST_OBSERVATION_OFFSET, timestamp_ms)
            .unwrap();
        buffer
            .put_i64(offset + LAST_OBSERVATION_OFFSET, timestamp_ms)
            .unwrap();
        buffer.put_i32(offset + SESSION_ID_OFFSET, session_id).unwrap();
        buffer.put_i32(offset + STREAM_ID_OFFSET, stream_id).unwrap();

        let mut cursor = offset + CHANNEL_OFFSET;
        cursor = put_length_prefixed(&mut buffer, cursor, channel);
        put_length_prefixed(&mut buffer, cursor, source);

        // Publishing the count makes the entry visible to readers
        buffer
            .put_i64_ordered(offset + OBSERVATION_COUNT_OFFSET, 1)
            .unwrap();

        self.next_record_offset += aligned;
        Some(LossEntry { offset })
    }

    /// Record a further observation against an existing entry
    pub fn record_observation(&mut self, entry: LossEntry, bytes_lost: i64, timestamp_ms: i64) {
        // UNWRAP: Entry offsets were bounds-checked when appended
        self.buffer
            .put_i64_ordered(entry.offset + LAST_OBSERVATION_OFFSET, timestamp_ms)
            .unwrap();
        self.buffer
            .get_and_add_i64(entry.offset + TOTAL_BYTES_LOST_OFFSET, bytes_lost)
            .unwrap();
        self.buffer
            .get_and_add_i64(entry.offset + OBSERVATION_COUNT_OFFSET, 1)
            .unwrap();
    }
}

fn put_length_prefixed(buffer: &mut RawBuffer, offset: IndexT, text: &str) -> IndexT {
    // UNWRAP: Caller verified room for the whole entry
    buffer.put_i32(offset, text.len() as i32).unwrap();
    buffer
        .put_slice(offset + 4, text.as_bytes(), 0, text.len() as IndexT)
        .unwrap();
    offset + 4 + text.len() as IndexT
}

/// A loss entry decoded out of a report region
#[derive(Debug, Clone, PartialEq)]
pub struct LossRecord {
    /// Times loss was observed on this stream
    pub observation_count: i64,
    /// Total bytes recorded as lost
    pub total_bytes_lost: i64,
    /// First observation, ms since epoch
    pub first_observation_timestamp: i64,
    /// Latest observation, ms since epoch
    pub last_observation_timestamp: i64,
    /// Session the loss was observed on
    pub session_id: i32,
    /// Stream the loss was observed on
    pub stream_id: i32,
    /// Channel URI of the stream
    pub channel: String,
    /// Source address of the stream
    pub source: String,
}

/// Scan a loss report region, yielding each published entry. Returns the
/// number of entries seen.
pub fn read_loss_report<A, F>(buffer: &A, mut handler: F) -> usize
where
    A: AtomicBuffer,
    F: FnMut(LossRecord),
{
    let mut offset: IndexT = 0;
    let mut records = 0;

    while (offset + CHANNEL_OFFSET) as usize <= buffer.len() {
        let observation_count = match buffer.get_i64_volatile(offset + OBSERVATION_COUNT_OFFSET) {
            Ok(count) if count > 0 => count,
            _ => break,
        };

        let (channel, after_channel) = get_length_prefixed(buffer, offset + CHANNEL_OFFSET);
        let (source, after_source) = get_length_prefixed(buffer, after_channel);

        // UNWRAP: Offsets bounded by the fixed header just scanned
        handler(LossRecord {
            observation_count,
            total_bytes_lost: buffer
                .get_i64_volatile(offset + TOTAL_BYTES_LOST_OFFSET)
                .unwrap(),
            first_observation_timestamp: buffer
                .get_i64_volatile(offset + FIRST_OBSERVATION_OFFSET)
                .unwrap(),
            last_observation_timestamp: buffer
                .get_i64_volatile(offset + LAST_OBSERVATION_OFFSET)
                .unwrap(),
            session_id: buffer.get_i32(offset + SESSION_ID_OFFSET).unwrap(),
            stream_id: buffer.get_i32(offset + STREAM_ID_OFFSET).unwrap(),
            channel,
            source,
        });

        records += 1;
        offset = align(after_source as usize, ENTRY_ALIGNMENT) as IndexT;
    }

    records
}

fn get_length_prefixed<A>(buffer: &A, offset: IndexT) -> (String, IndexT)
where
    A: AtomicBuffer,
{
    // UNWRAP: Length prefix sits inside the already-validated entry
    let length = buffer.get_i32(offset).unwrap() as usize;
    let start = (offset + 4) as usize;
    let text = String::from_utf8_lossy(&buffer[start..start + length]).into_owned();
    (text, offset + 4 + length as IndexT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_round_trip() {
        let mut bytes = vec![0u8; 1024];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut report = LossReport::new(buffer);

        let entry = report
            .create_entry(100, 7, 5, 1001, "udp://224.0.1.1:40456", "192.168.0.1:12345")
            .unwrap();
        report.record_observation(entry, 56, 9);

        let mut seen = Vec::new();
        assert_eq!(read_loss_report(&buffer, |r| seen.push(r)), 1);
        let record = &seen[0];
        assert_eq!(record.observation_count, 2);
        assert_eq!(record.total_bytes_lost, 156);
        assert_eq!(record.first_observation_timestamp, 7);
        assert_eq!(record.last_observation_timestamp, 9);
        assert_eq!(record.session_id, 5);
        assert_eq!(record.stream_id, 1001);
        assert_eq!(record.channel, "udp://224.0.1.1:40456");
        assert_eq!(record.source, "192.168.0.1:12345");
    }

    #[test]
    fn full_region_refuses_new_entries() {
        let mut bytes = vec![0u8; 64];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut report = LossReport::new(buffer);

        assert!(report
            .create_entry(1, 1, 1, 1, "udp://localhost:40456", "src")
            .is_none());
    }

    #[test]
    fn multiple_entries_scan_in_order() {
        let mut bytes = vec![0u8; 1024];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut report = LossReport::new(buffer);

        report.create_entry(10, 1, 1, 100, "ch-a", "src-a").unwrap();
        report.create_entry(20, 2, 2, 200, "ch-b", "src-b").unwrap();

        let mut streams = Vec::new();
        assert_eq!(read_loss_report(&buffer, |r| streams.push(r.stream_id)), 2);
        assert_eq!(streams, vec![100, 200]);
    }
}
