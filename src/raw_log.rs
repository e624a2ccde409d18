//! Factory for the memory-mapped term-buffer files backing publications and
//! images. The lifecycle core treats the log format itself as opaque; this
//! layer only creates, sizes, maps, and deletes the files.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use memmap::{MmapMut, MmapOptions};

use crate::concurrent::RawBuffer;
use crate::error::{DriverError, Result};
use crate::util::bit::is_power_of_two;
use crate::util::IndexT;

const PAGE_LENGTH: usize = 4096;

/// A mapped term-buffer file. Owns the mapping; dropping unmaps but leaves
/// the file on disk for clients still holding it mapped.
pub struct RawLog {
    mmap: MmapMut,
    path: PathBuf,
    term_length: IndexT,
}

impl RawLog {
    /// View over the whole mapped log
    pub fn buffer(&self) -> RawBuffer {
        unsafe { RawBuffer::new(self.mmap.as_ptr() as *mut u8, self.mmap.len()) }
    }

    /// Term length this log was created with
    pub fn term_length(&self) -> IndexT {
        self.term_length
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmap and delete the backing file
    pub fn free(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)
            .map_err(|e| DriverError::io(format!("deleting log file {}", path.display()), e))
    }
}

/// Creates term-buffer files under the driver's state directory.
pub struct RawLogFactory {
    publications_dir: PathBuf,
    images_dir: PathBuf,
    max_term_length: IndexT,
    sparse: bool,
}

impl RawLogFactory {
    /// Create a factory rooted at the driver directory. Creates the
    /// per-category subdirectories eagerly so log creation stays one syscall
    /// cheaper on the conductor's duty cycle.
    pub fn new(driver_dir: &Path, max_term_length: IndexT, sparse: bool) -> Result<RawLogFactory> {
        let publications_dir = driver_dir.join("publications");
        let images_dir = driver_dir.join("images");

        for dir in [&publications_dir, &images_dir].iter() {
            fs::create_dir_all(dir)
                .map_err(|e| DriverError::io(format!("creating log dir {}", dir.display()), e))?;
        }

        Ok(RawLogFactory {
            publications_dir,
            images_dir,
            max_term_length,
            sparse,
        })
    }

    /// Create the log backing a publication
    pub fn new_publication_log(&self, registration_id: i64, term_length: IndexT) -> Result<RawLog> {
        let path = self
            .publications_dir
            .join(format!("{}.logbuffer", registration_id));
        self.new_log(&path, term_length)
    }

    /// Create the log backing a subscription image
    pub fn new_image_log(
        &self,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
        term_length: IndexT,
    ) -> Result<RawLog> {
        let path = self.images_dir.join(format!(
            "{}-{}-{}.logbuffer",
            session_id, stream_id, correlation_id
        ));
        self.new_log(&path, term_length)
    }

    fn new_log(&self, path: &Path, term_length: IndexT) -> Result<RawLog> {
        if !is_power_of_two(term_length) || term_length > self.max_term_length {
            return Err(DriverError::Configuration(format!(
                "term length {} must be a power of two no greater than {}",
                term_length, self.max_term_length
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| DriverError::io(format!("creating log file {}", path.display()), e))?;
        file.set_len(term_length as u64)
            .map_err(|e| DriverError::io(format!("sizing log file {}", path.display()), e))?;

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| DriverError::io(format!("mapping log file {}", path.display()), e))?;

        if !self.sparse {
            // Touch every page so the file is backed by real blocks up front
            // rather than faulting on the hot path.
            for offset in (0..mmap.len()).step_by(PAGE_LENGTH) {
                mmap[offset] = 0;
            }
        }

        Ok(RawLog {
            mmap,
            path: path.to_path_buf(),
            term_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::concurrent::AtomicBuffer;

    #[test]
    fn creates_sized_publication_log() {
        let dir = tempdir().unwrap();
        let factory = RawLogFactory::new(dir.path(), 1024 * 1024, true).unwrap();

        let log = factory.new_publication_log(42, 64 * 1024).unwrap();
        assert_eq!(log.term_length(), 64 * 1024);
        assert_eq!(
            fs::metadata(log.path()).unwrap().len(),
            64 * 1024
        );

        let mut buffer = log.buffer();
        buffer.put_i64(0, 7).unwrap();
        assert_eq!(buffer.get_i64(0), Ok(7));
    }

    #[test]
    fn rejects_oversized_or_ragged_term_lengths() {
        let dir = tempdir().unwrap();
        let factory = RawLogFactory::new(dir.path(), 64 * 1024, true).unwrap();

        assert!(factory.new_publication_log(1, 128 * 1024).is_err());
        assert!(factory.new_publication_log(2, 48 * 1024).is_err());
    }

    #[test]
    fn free_deletes_the_file() {
        let dir = tempdir().unwrap();
        let factory = RawLogFactory::new(dir.path(), 1024 * 1024, false).unwrap();

        let log = factory.new_image_log(1, 1001, 7, 64 * 1024).unwrap();
        let path = log.path().to_path_buf();
        assert!(path.exists());

        log.free().unwrap();
        assert!(!path.exists());
    }
}
