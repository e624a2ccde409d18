//! Creation and mapping of the command-and-control file.
//!
//! The builder sizes the file from the configured region lengths, maps it
//! read/write, writes the metadata header in order, and leaves the ready word
//! for [`CncFile::signal_ready`] — the single release-store that makes the
//! driver discoverable.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap::{MmapMut, MmapOptions};

use crate::cnc_descriptor::{
    MetaDataDefinition, CNC_NOT_READY, CNC_READY, CNC_VERSION, META_DATA_LENGTH, READY_OFFSET,
};
use crate::concurrent::{AtomicBuffer, RawBuffer};
use crate::error::{DriverError, Result};
use crate::util::IndexT;

/// Region lengths used to size a CnC file. Ring and broadcast lengths include
/// their trailers; every length is validated before the file is created.
#[derive(Debug, Clone, Copy)]
pub struct CncLengths {
    /// to-driver command ring buffer region, trailer included
    pub to_driver: IndexT,
    /// to-clients broadcast region, trailer included
    pub to_clients: IndexT,
    /// counters metadata region
    pub counters_metadata: IndexT,
    /// counters values region
    pub counters_values: IndexT,
    /// error log region
    pub error_log: IndexT,
}

impl CncLengths {
    /// Total CnC file length implied by these regions
    pub fn total_file_length(&self) -> usize {
        META_DATA_LENGTH
            + self.to_driver as usize
            + self.to_clients as usize
            + self.counters_metadata as usize
            + self.counters_values as usize
            + self.error_log as usize
    }
}

/// An open, mapped CnC file. Owns the mapping; every region view carved from
/// it borrows that ownership by contract and must not outlive it. Dropping
/// the handle unmaps the file.
pub struct CncFile {
    mmap: MmapMut,
    path: PathBuf,
}

impl CncFile {
    /// Create, size, zero-fill, and map a new CnC file, then write the
    /// metadata header in order: version, region lengths, liveness timeout,
    /// start timestamp, pid. The ready word stays [`CNC_NOT_READY`].
    pub fn create(
        path: &Path,
        lengths: &CncLengths,
        client_liveness_timeout_ns: i64,
        start_timestamp_ms: i64,
    ) -> Result<CncFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| DriverError::io(format!("creating CnC file {}", path.display()), e))?;

        let total_length = lengths.total_file_length();
        file.set_len(total_length as u64)
            .map_err(|e| DriverError::io(format!("sizing CnC file {}", path.display()), e))?;

        let mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| DriverError::io(format!("mapping CnC file {}", path.display()), e))?;

        let mut cnc = CncFile {
            mmap,
            path: path.to_path_buf(),
        };

        {
            let metadata = cnc.metadata_mut();
            metadata.cnc_version = CNC_VERSION;
            metadata.to_driver_buffer_length = lengths.to_driver;
            metadata.to_clients_buffer_length = lengths.to_clients;
            metadata.counters_metadata_buffer_length = lengths.counters_metadata;
            metadata.counters_values_buffer_length = lengths.counters_values;
            metadata.error_log_buffer_length = lengths.error_log;
            metadata.client_liveness_timeout_ns = client_liveness_timeout_ns;
            metadata.start_timestamp_ms = start_timestamp_ms;
            metadata.pid = ::std::process::id() as i64;
            metadata.ready = CNC_NOT_READY;
        }

        Ok(cnc)
    }

    /// Map an existing CnC file read/write. Fails if the file is shorter than
    /// the metadata block or its recorded region lengths disagree with the
    /// actual file length — either means a half-built or foreign file.
    pub fn map_existing(path: &Path) -> Result<CncFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DriverError::io(format!("opening CnC file {}", path.display()), e))?;

        let mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| DriverError::io(format!("mapping CnC file {}", path.display()), e))?;

        if mmap.len() < META_DATA_LENGTH {
            return Err(DriverError::io(
                format!("reading CnC file {}", path.display()),
                ::std::io::Error::new(
                    ::std::io::ErrorKind::InvalidData,
                    "file shorter than metadata block",
                ),
            ));
        }

        let cnc = CncFile {
            mmap,
            path: path.to_path_buf(),
        };

        if cnc.metadata().expected_file_length() != cnc.mmap.len() {
            return Err(DriverError::io(
                format!("reading CnC file {}", path.display()),
                ::std::io::Error::new(
                    ::std::io::ErrorKind::InvalidData,
                    "recorded region lengths disagree with file length",
                ),
            ));
        }

        Ok(cnc)
    }

    /// Path this file was mapped from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The metadata header at the front of the file
    pub fn metadata(&self) -> &MetaDataDefinition {
        // UNWRAP: Length validated against META_DATA_LENGTH on construction
        self.mmap.overlay::<MetaDataDefinition>(0).unwrap()
    }

    fn metadata_mut(&mut self) -> &mut MetaDataDefinition {
        // UNWRAP: Length validated against META_DATA_LENGTH on construction
        self.mmap.overlay_mut::<MetaDataDefinition>(0).unwrap()
    }

    /// View over the whole mapped file
    pub fn buffer(&self) -> RawBuffer {
        unsafe { RawBuffer::new(self.mmap.as_ptr() as *mut u8, self.mmap.len()) }
    }

    /// View over the to-driver command ring region, trailer included
    pub fn to_driver_buffer(&self) -> RawBuffer {
        let metadata = self.metadata();
        self.buffer().view(
            metadata.to_driver_buffer_offset(),
            metadata.to_driver_buffer_length as usize,
        )
    }

    /// View over the to-clients broadcast region, trailer included
    pub fn to_clients_buffer(&self) -> RawBuffer {
        let metadata = self.metadata();
        self.buffer().view(
            metadata.to_clients_buffer_offset(),
            metadata.to_clients_buffer_length as usize,
        )
    }

    /// View over the counters metadata region
    pub fn counters_metadata_buffer(&self) -> RawBuffer {
        let metadata = self.metadata();
        self.buffer().view(
            metadata.counters_metadata_buffer_offset(),
            metadata.counters_metadata_buffer_length as usize,
        )
    }

    /// View over the counters values region
    pub fn counters_values_buffer(&self) -> RawBuffer {
        let metadata = self.metadata();
        self.buffer().view(
            metadata.counters_values_buffer_offset(),
            metadata.counters_values_buffer_length as usize,
        )
    }

    /// View over the error log region
    pub fn error_log_buffer(&self) -> RawBuffer {
        let metadata = self.metadata();
        self.buffer().view(
            metadata.error_log_buffer_offset(),
            metadata.error_log_buffer_length as usize,
        )
    }

    /// Acquire-read the ready word
    pub fn is_ready(&self) -> bool {
        // UNWRAP: Known-valid offset within the metadata block
        self.mmap.get_i32_acquire(READY_OFFSET).unwrap() == CNC_READY
    }

    /// Release-store the ready word. Must be the very last write of CnC
    /// construction: a client that observes it also observes every region
    /// initialization sequenced before it.
    pub fn signal_ready(&mut self) {
        // UNWRAP: Known-valid offset within the metadata block
        self.mmap.put_i32_release(READY_OFFSET, CNC_READY).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::cnc_descriptor::CNC_FILE;
    use crate::concurrent::ringbuffer::{buffer_descriptor, ManyToOneRingBuffer};

    fn test_lengths() -> CncLengths {
        CncLengths {
            to_driver: 1024 + buffer_descriptor::TRAILER_LENGTH,
            to_clients: 1024 + crate::concurrent::broadcast::buffer_descriptor::TRAILER_LENGTH,
            counters_metadata: 2048,
            counters_values: 1024,
            error_log: 4096,
        }
    }

    #[test]
    fn create_sizes_file_and_writes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        let lengths = test_lengths();

        let cnc = CncFile::create(&path, &lengths, 5_000_000_000, 1_234).unwrap();

        assert_eq!(
            ::std::fs::metadata(&path).unwrap().len() as usize,
            lengths.total_file_length()
        );

        let metadata = cnc.metadata();
        assert_eq!(metadata.cnc_version, CNC_VERSION);
        assert_eq!(metadata.to_driver_buffer_length, lengths.to_driver);
        assert_eq!(metadata.client_liveness_timeout_ns, 5_000_000_000);
        assert_eq!(metadata.start_timestamp_ms, 1_234);
        assert!(!cnc.is_ready());
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        let lengths = test_lengths();

        let _first = CncFile::create(&path, &lengths, 0, 0).unwrap();
        assert!(CncFile::create(&path, &lengths, 0, 0).is_err());
    }

    #[test]
    fn ready_signal_round_trips_through_second_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);

        let mut cnc = CncFile::create(&path, &test_lengths(), 0, 0).unwrap();
        {
            let observer = CncFile::map_existing(&path).unwrap();
            assert!(!observer.is_ready());
        }

        cnc.signal_ready();
        let observer = CncFile::map_existing(&path).unwrap();
        assert!(observer.is_ready());
    }

    #[test]
    fn regions_are_distinct_and_usable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        let cnc = CncFile::create(&path, &test_lengths(), 0, 0).unwrap();

        // A ring buffer wraps the to-driver region in place
        let mut ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();
        ring.update_consumer_heartbeat_time(42);

        let observer = CncFile::map_existing(&path).unwrap();
        let ring = ManyToOneRingBuffer::new(observer.to_driver_buffer()).unwrap();
        assert_eq!(ring.consumer_heartbeat_time(), 42);
    }

    #[test]
    fn map_existing_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        ::std::fs::write(&path, &[0u8; 32]).unwrap();

        assert!(CncFile::map_existing(&path).is_err());
    }
}
