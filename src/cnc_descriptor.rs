//! Description of the command and control file used to communicate between
//! the media driver and its clients.
//!
//! File layout:
//!
//! ```text
//! +-----------------------------+
//! |          Meta Data          |
//! +-----------------------------+
//! |      to-driver Buffer       |
//! +-----------------------------+
//! |      to-clients Buffer      |
//! +-----------------------------+
//! |   Counters Metadata Buffer  |
//! +-----------------------------+
//! |    Counters Values Buffer   |
//! +-----------------------------+
//! |          Error Log          |
//! +-----------------------------+
//! ```
//!
//! Each region starts where the previous one ends; the meta data block is
//! padded out to two cache lines so the to-driver buffer begins cache-aligned.

use std::mem::size_of;

use crate::util::bit;
use crate::util::IndexT;

/// The CnC file metadata header. Layout:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         CnC Version                           |
/// +---------------------------------------------------------------+
/// |                   to-driver buffer length                     |
/// +---------------------------------------------------------------+
/// |                  to-clients buffer length                     |
/// +---------------------------------------------------------------+
/// |               Counters Metadata buffer length                 |
/// +---------------------------------------------------------------+
/// |                Counters Values buffer length                  |
/// +---------------------------------------------------------------+
/// |                   Error Log buffer length                     |
/// +---------------------------------------------------------------+
/// |                   Client Liveness Timeout                     |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                    Driver Start Timestamp                     |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                         Driver PID                            |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                          Ready Word                           |
/// +---------------------------------------------------------------+
/// ```
///
/// The ready word is the last field written during construction, with release
/// semantics. Clients spin on it and must not interpret any other region of
/// the file until it reads [`CNC_READY`].
#[repr(C, align(4))]
pub struct MetaDataDefinition {
    /// Version code for the CnC file format
    pub cnc_version: i32,
    /// Length in bytes of the to-driver command buffer, trailer included
    pub to_driver_buffer_length: i32,
    /// Length in bytes of the to-clients broadcast buffer, trailer included
    pub to_clients_buffer_length: i32,
    /// Length in bytes of the counters metadata buffer
    pub counters_metadata_buffer_length: i32,
    /// Length in bytes of the counters values buffer
    pub counters_values_buffer_length: i32,
    /// Length in bytes of the error log buffer
    pub error_log_buffer_length: i32,
    /// Nanoseconds after which a silent client is timed out
    pub client_liveness_timeout_ns: i64,
    /// Milliseconds since epoch at which the driver started
    pub start_timestamp_ms: i64,
    /// Operating system process id of the driver
    pub pid: i64,
    /// Readiness marker: [`CNC_NOT_READY`] until every region is initialized
    pub ready: i32,
}

/// Length of the metadata block in a CnC file. Note that it's not equivalent
/// to the actual struct length.
pub const META_DATA_LENGTH: usize =
    bit::align(size_of::<MetaDataDefinition>(), bit::CACHE_LINE_LENGTH * 2);

/// Byte offset of the ready word within the metadata block
pub const READY_OFFSET: IndexT = 48;

/// Ready word value while the file is still under construction
pub const CNC_NOT_READY: i32 = 0;

/// Ready word value once every region has been mapped and initialized
pub const CNC_READY: i32 = 1;

/// Version code for the CnC file format
pub const CNC_VERSION: i32 = crate::sematic_version_compose(0, 1, 0);

/// Filename for the CnC file located in the driver directory
pub const CNC_FILE: &str = "cnc.dat";

/// Filename for the loss report located in the driver directory
pub const LOSS_REPORT_FILE: &str = "loss-report.dat";

impl MetaDataDefinition {
    /// Offset of the to-driver buffer within the CnC file
    pub fn to_driver_buffer_offset(&self) -> usize {
        META_DATA_LENGTH
    }

    /// Offset of the to-clients buffer within the CnC file
    pub fn to_clients_buffer_offset(&self) -> usize {
        self.to_driver_buffer_offset() + self.to_driver_buffer_length as usize
    }

    /// Offset of the counters metadata buffer within the CnC file
    pub fn counters_metadata_buffer_offset(&self) -> usize {
        self.to_clients_buffer_offset() + self.to_clients_buffer_length as usize
    }

    /// Offset of the counters values buffer within the CnC file
    pub fn counters_values_buffer_offset(&self) -> usize {
        self.counters_metadata_buffer_offset() + self.counters_metadata_buffer_length as usize
    }

    /// Offset of the error log buffer within the CnC file
    pub fn error_log_buffer_offset(&self) -> usize {
        self.counters_values_buffer_offset() + self.counters_values_buffer_length as usize
    }

    /// Total file length implied by the region lengths in this header
    pub fn expected_file_length(&self) -> usize {
        self.error_log_buffer_offset() + self.error_log_buffer_length as usize
    }
}
