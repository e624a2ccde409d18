//! High-throughput, low-latency messaging media driver: UDP unicast and
//! multicast plus shared-memory IPC transport.
//!
//! Three cooperating agents move messages between processes and across the
//! network: a conductor (control plane), a sender (egress), and a receiver
//! (ingress). Client processes discover and command the driver through a
//! single memory-mapped command-and-control file in the driver's state
//! directory. This crate is the driver's bootstrap and lifecycle core:
//! directory arbitration, CnC construction, agent assembly under the
//! configured threading mode, and orderly shutdown.
//!
//! ```no_run
//! use rivulet_driver::context::DriverContext;
//! use rivulet_driver::driver::MediaDriver;
//!
//! let mut driver = MediaDriver::launch(DriverContext::default())
//!     .expect("unable to launch media driver");
//! // ... the agents run on their own threads until ...
//! driver.close();
//! ```
#![deny(missing_docs)]

#[cfg(target_endian = "big")]
compile_error!("the CnC file format is only supported on little-endian architectures");

pub mod agent;
pub mod client_proxy;
pub mod cnc;
pub mod cnc_descriptor;
pub mod command;
pub mod concurrent;
pub mod conductor;
pub mod config;
pub mod context;
pub mod control_protocol;
pub mod counters;
pub mod directory;
pub mod driver;
pub mod error;
pub mod error_log;
pub mod idle;
pub mod loss_report;
pub mod media;
pub mod proxy;
pub mod raw_log;
pub mod receiver;
pub mod sender;
pub mod time;
pub mod timer;
pub mod util;

const fn sematic_version_compose(major: u8, minor: u8, patch: u8) -> i32 {
    (major as i32) << 16 | (minor as i32) << 8 | (patch as i32)
}
