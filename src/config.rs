//! Configuration defaults and validation for the driver. Values arrive in an
//! already-populated [`DriverContext`](crate::context::DriverContext);
//! property-file loading stays outside the core.

use std::env;
use std::path::PathBuf;

use crate::error::{DriverError, Result};
use crate::util::bit::is_power_of_two;
use crate::util::IndexT;

/// How many OS threads host the three driver agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// No threads: the caller pumps a composite of all three agents
    Invoker,
    /// One thread runs a composite of all three agents
    Shared,
    /// One thread runs sender and receiver, one runs the conductor
    SharedNetwork,
    /// One thread per agent
    Dedicated,
}

/// Capacity of each inter-agent command queue
pub const CMD_QUEUE_CAPACITY_DEFAULT: usize = 1024;

/// Default data capacity of the to-driver command ring, trailer excluded
pub const TO_DRIVER_BUFFER_LENGTH_DEFAULT: IndexT = 1024 * 1024;

/// Default data capacity of the to-clients broadcast, trailer excluded
pub const TO_CLIENTS_BUFFER_LENGTH_DEFAULT: IndexT = 1024 * 1024;

/// Default length of the counters values region
pub const COUNTERS_VALUES_BUFFER_LENGTH_DEFAULT: IndexT = 1024 * 1024;

/// Default length of the error log region
pub const ERROR_BUFFER_LENGTH_DEFAULT: IndexT = 1024 * 1024;

/// Default length of the loss report file
pub const LOSS_REPORT_BUFFER_LENGTH_DEFAULT: IndexT = 1024 * 1024;

/// Smallest legal term buffer
pub const TERM_MIN_LENGTH: IndexT = 64 * 1024;

/// Largest legal term buffer
pub const TERM_MAX_LENGTH: IndexT = 1024 * 1024 * 1024;

/// Default term buffer length for network publications
pub const TERM_BUFFER_LENGTH_DEFAULT: IndexT = 16 * 1024 * 1024;

/// Default term buffer length for IPC publications
pub const IPC_TERM_BUFFER_LENGTH_DEFAULT: IndexT = 64 * 1024 * 1024;

/// Default ceiling on term buffer lengths
pub const MAX_TERM_BUFFER_LENGTH_DEFAULT: IndexT = TERM_MAX_LENGTH;

/// Length of a data frame header; the floor under any usable MTU
pub const DATA_HEADER_LENGTH: IndexT = 32;

/// Smallest legal MTU: a header plus one aligned payload chunk
pub const MTU_MIN_LENGTH: IndexT = DATA_HEADER_LENGTH + 32;

/// Largest payload a UDP datagram can carry
pub const MAX_UDP_PAYLOAD_LENGTH: IndexT = 65_504;

/// Default MTU for network channels
pub const MTU_LENGTH_DEFAULT: IndexT = 1408;

/// Default MTU for IPC channels
pub const IPC_MTU_LENGTH_DEFAULT: IndexT = 1408;

/// Default initial receiver window
pub const INITIAL_WINDOW_LENGTH_DEFAULT: IndexT = 128 * 1024;

/// Default socket receive buffer
pub const SOCKET_RCVBUF_LENGTH_DEFAULT: IndexT = 128 * 1024;

/// Default client liveness timeout
pub const CLIENT_LIVENESS_TIMEOUT_NS_DEFAULT: i64 = 10_000_000_000;

/// Default image liveness timeout
pub const IMAGE_LIVENESS_TIMEOUT_NS_DEFAULT: i64 = 10_000_000_000;

/// Default publication unblock timeout
pub const PUBLICATION_UNBLOCK_TIMEOUT_NS_DEFAULT: i64 = 15_000_000_000;

/// Default status message timeout
pub const STATUS_MESSAGE_TIMEOUT_NS_DEFAULT: i64 = 200_000_000;

/// Default driver liveness timeout used by peers probing the heartbeat
pub const DRIVER_TIMEOUT_MS_DEFAULT: i64 = 10_000;

fn user_name() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "default".to_string())
}

/// Default state directory for the driver: `/dev/shm` on Linux so the CnC
/// file lives in memory, the system temp directory elsewhere.
pub fn default_dir() -> PathBuf {
    let base_path = if cfg!(target_os = "linux") {
        PathBuf::from("/dev/shm")
    } else {
        env::temp_dir()
    };

    base_path.join(format!("rivulet-{}", user_name()))
}

/// Check an MTU sits within `[MTU_MIN_LENGTH, MAX_UDP_PAYLOAD_LENGTH]` and is
/// frame-aligned.
pub fn validate_mtu_length(name: &str, mtu_length: IndexT) -> Result<()> {
    if mtu_length < MTU_MIN_LENGTH || mtu_length > MAX_UDP_PAYLOAD_LENGTH {
        return Err(DriverError::Configuration(format!(
            "{} of {} is outside [{}, {}]",
            name, mtu_length, MTU_MIN_LENGTH, MAX_UDP_PAYLOAD_LENGTH
        )));
    }
    if mtu_length % 8 != 0 {
        return Err(DriverError::Configuration(format!(
            "{} of {} is not a multiple of 8",
            name, mtu_length
        )));
    }
    Ok(())
}

/// Check a term length is a power of two within `[TERM_MIN_LENGTH, max]`,
/// citing both values on failure.
pub fn validate_term_length(name: &str, term_length: IndexT, max_length: IndexT) -> Result<()> {
    if !is_power_of_two(term_length) {
        return Err(DriverError::Configuration(format!(
            "{} of {} is not a power of two",
            name, term_length
        )));
    }
    if term_length < TERM_MIN_LENGTH || term_length > max_length {
        return Err(DriverError::Configuration(format!(
            "{} of {} is outside [{}, {}]",
            name, term_length, TERM_MIN_LENGTH, max_length
        )));
    }
    Ok(())
}

/// Check the initial receiver window fits inside the socket receive buffer,
/// citing both values on failure.
pub fn validate_initial_window_length(
    initial_window_length: IndexT,
    socket_rcvbuf_length: IndexT,
) -> Result<()> {
    if initial_window_length > socket_rcvbuf_length {
        return Err(DriverError::Configuration(format!(
            "initial window length {} exceeds socket receive buffer length {}",
            initial_window_length, socket_rcvbuf_length
        )));
    }
    Ok(())
}

/// Check a shared-memory region capacity is a positive power of two, citing
/// the value on failure.
pub fn validate_buffer_capacity(name: &str, capacity: IndexT) -> Result<()> {
    if !is_power_of_two(capacity) {
        return Err(DriverError::Configuration(format!(
            "{} of {} is not a power of two",
            name, capacity
        )));
    }
    Ok(())
}
