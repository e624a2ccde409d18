//! Deduplicating append-only error record living in the CnC error region.
//!
//! Record layout, 8-byte aligned:
//!
//! ```text
//! +-----------------------------+ 0
//! |           Length            |
//! +-----------------------------+ 4
//! |      Observation Count      |
//! +-----------------------------+ 8
//! | Last Observation Timestamp  |
//! +-----------------------------+ 16
//! | First Observation Timestamp |
//! +-----------------------------+ 24
//! |    Encoded Error (UTF-8)   ...
//! +-----------------------------+
//! ```
//!
//! Writing the length last publishes the record: external readers scan until
//! they hit a zero length, so a record is never observed half-written.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use parking_lot::Mutex;

use crate::concurrent::{AtomicBuffer, RawBuffer};
use crate::util::bit::align;
use crate::util::IndexT;

/// Offset of the total record length within a record
pub const LENGTH_OFFSET: IndexT = 0;
/// Offset of the observation count within a record
pub const OBSERVATION_COUNT_OFFSET: IndexT = 4;
/// Offset of the most recent observation timestamp within a record
pub const LAST_OBSERVATION_TIMESTAMP_OFFSET: IndexT = 8;
/// Offset of the first observation timestamp within a record
pub const FIRST_OBSERVATION_TIMESTAMP_OFFSET: IndexT = 16;
/// Offset of the encoded error text within a record
pub const ENCODED_ERROR_OFFSET: IndexT = 24;
/// Alignment of error log records
pub const RECORD_ALIGNMENT: IndexT = 8;

struct Observation {
    hash: u64,
    offset: IndexT,
}

struct Index {
    observations: Vec<Observation>,
    next_offset: IndexT,
}

/// Append-only error log that collapses repeat observations of the same
/// error into a single record.
///
/// New-record appends serialize on an in-process index; repeat observations
/// and all reads are lock-free against the shared memory itself.
pub struct DistinctErrorLog {
    buffer: RawBuffer,
    index: Mutex<Index>,
}

impl DistinctErrorLog {
    /// Create a log over the (zeroed) error region
    pub fn new(buffer: RawBuffer) -> DistinctErrorLog {
        DistinctErrorLog {
            buffer,
            index: Mutex::new(Index {
                observations: Vec::new(),
                next_offset: 0,
            }),
        }
    }

    /// Record an observation of `error_text` at `now_ms`.
    ///
    /// A text whose hash is already present updates the existing record's
    /// last-seen timestamp and count; otherwise a new record is appended.
    /// Returns `false` when the region has no room left for a new record.
    pub fn record(&self, now_ms: i64, error_text: &str) -> bool {
        let hash = text_hash(error_text);
        let mut index = self.index.lock();

        if let Some(observation) = index.observations.iter().find(|o| o.hash == hash) {
            self.bump_observation(observation.offset, now_ms);
            return true;
        }

        let length = ENCODED_ERROR_OFFSET + error_text.len() as IndexT;
        let aligned_length = align(length as usize, RECORD_ALIGNMENT as usize) as IndexT;
        let offset = index.next_offset;

        if (offset + aligned_length) as usize > self.buffer.len() {
            return false;
        }

        let mut buffer = self.buffer;
        // UNWRAP: Room verified against the region length above
        buffer
            .put_i64(offset + LAST_OBSERVATION_TIMESTAMP_OFFSET, now_ms)
            .unwrap();
        buffer
            .put_i64(offset + FIRST_OBSERVATION_TIMESTAMP_OFFSET, now_ms)
            .unwrap();
        buffer
            .put_i32(offset + OBSERVATION_COUNT_OFFSET, 1)
            .unwrap();
        buffer
            .put_slice(
                offset + ENCODED_ERROR_OFFSET,
                error_text.as_bytes(),
                0,
                error_text.len() as IndexT,
            )
            .unwrap();
        // Publishing the length makes the record visible to readers
        buffer.put_i32_release(offset + LENGTH_OFFSET, length).unwrap();

        index.observations.push(Observation { hash, offset });
        index.next_offset = offset + aligned_length;
        true
    }

    fn bump_observation(&self, offset: IndexT, now_ms: i64) {
        let mut buffer = self.buffer;
        // UNWRAP: Record offsets were bounds-checked when appended
        buffer
            .put_i64_ordered(offset + LAST_OBSERVATION_TIMESTAMP_OFFSET, now_ms)
            .unwrap();
        let count = buffer
            .get_i32_volatile(offset + OBSERVATION_COUNT_OFFSET)
            .unwrap();
        buffer
            .put_i32_ordered(offset + OBSERVATION_COUNT_OFFSET, count + 1)
            .unwrap();
    }
}

fn text_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(text.as_bytes());
    hasher.finish()
}

/// A single record decoded out of an error log region
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// How many times the error was observed
    pub observation_count: i32,
    /// Timestamp of the first observation, ms since epoch
    pub first_observation_timestamp: i64,
    /// Timestamp of the latest observation, ms since epoch
    pub last_observation_timestamp: i64,
    /// The recorded error text
    pub encoded_error: String,
}

/// Scan an error log region, yielding each published record. Returns the
/// number of records seen. Safe against a concurrent writer: records are
/// published length-last.
pub fn read_error_log<A, F>(buffer: &A, mut handler: F) -> usize
where
    A: AtomicBuffer,
    F: FnMut(ErrorRecord),
{
    let mut offset: IndexT = 0;
    let mut records = 0;

    while (offset + ENCODED_ERROR_OFFSET) as usize <= buffer.len() {
        let length = match buffer.get_i32_acquire(offset + LENGTH_OFFSET) {
            Ok(length) if length > 0 => length,
            _ => break,
        };

        let text_start = (offset + ENCODED_ERROR_OFFSET) as usize;
        let text_end = (offset + length) as usize;
        let encoded_error = String::from_utf8_lossy(&buffer[text_start..text_end]).into_owned();

        // UNWRAP: Offsets bounded by the record length just read
        handler(ErrorRecord {
            observation_count: buffer
                .get_i32_volatile(offset + OBSERVATION_COUNT_OFFSET)
                .unwrap(),
            first_observation_timestamp: buffer
                .get_i64_volatile(offset + FIRST_OBSERVATION_TIMESTAMP_OFFSET)
                .unwrap(),
            last_observation_timestamp: buffer
                .get_i64_volatile(offset + LAST_OBSERVATION_TIMESTAMP_OFFSET)
                .unwrap(),
            encoded_error,
        });

        records += 1;
        offset += align(length as usize, RECORD_ALIGNMENT as usize) as IndexT;
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_over(bytes: &mut Vec<u8>) -> DistinctErrorLog {
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        DistinctErrorLog::new(buffer)
    }

    #[test]
    fn first_observation_appends_record() {
        let mut bytes = vec![0u8; 1024];
        let log = log_over(&mut bytes);

        assert!(log.record(100, "something broke"));

        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut seen = Vec::new();
        assert_eq!(read_error_log(&buffer, |r| seen.push(r)), 1);
        assert_eq!(seen[0].observation_count, 1);
        assert_eq!(seen[0].first_observation_timestamp, 100);
        assert_eq!(seen[0].last_observation_timestamp, 100);
        assert_eq!(seen[0].encoded_error, "something broke");
    }

    #[test]
    fn repeat_observations_collapse() {
        let mut bytes = vec![0u8; 1024];
        let log = log_over(&mut bytes);

        for ts in 0..5 {
            assert!(log.record(ts, "same failure"));
        }
        assert!(log.record(99, "different failure"));

        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut seen = Vec::new();
        assert_eq!(read_error_log(&buffer, |r| seen.push(r)), 2);

        assert_eq!(seen[0].observation_count, 5);
        assert_eq!(seen[0].first_observation_timestamp, 0);
        assert_eq!(seen[0].last_observation_timestamp, 4);
        assert_eq!(seen[1].observation_count, 1);
        assert_eq!(seen[1].encoded_error, "different failure");
    }

    #[test]
    fn full_region_rejects_new_records() {
        let mut bytes = vec![0u8; 64];
        let log = log_over(&mut bytes);

        assert!(log.record(1, "first record fills most of the region"));
        assert!(!log.record(2, "no room for this one"));
        // Repeat observations of the recorded error still succeed
        assert!(log.record(3, "first record fills most of the region"));
    }
}
