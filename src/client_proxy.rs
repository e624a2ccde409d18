//! Conductor-side proxy transmitting driver events to every client over the
//! to-clients broadcast. Event bodies here carry the identifiers the
//! lifecycle core owns; the full client event codec lives with the client
//! library.

use crate::concurrent::broadcast::BroadcastTransmitter;
use crate::concurrent::{AtomicBuffer, RawBuffer};
use crate::control_protocol::DriverEvent;
use crate::error::ErrorHandler;
use crate::util::IndexT;

/// Single-producer event transmitter owned by the conductor.
pub struct ClientProxy {
    transmitter: BroadcastTransmitter<RawBuffer>,
    scratch: Vec<u8>,
    error_handler: ErrorHandler,
}

impl ClientProxy {
    /// Wrap the to-clients broadcast transmitter
    pub fn new(transmitter: BroadcastTransmitter<RawBuffer>, error_handler: ErrorHandler) -> ClientProxy {
        ClientProxy {
            transmitter,
            scratch: vec![0u8; 1024],
            error_handler,
        }
    }

    /// Acknowledge a command that completed without a dedicated event
    pub fn on_operation_success(&mut self, correlation_id: i64) {
        self.transmit(DriverEvent::OnOperationSuccess, |scratch| {
            scratch.put_i64(0, correlation_id).unwrap();
            8
        });
    }

    /// Report a command failure back to the requesting client
    pub fn on_error(&mut self, correlation_id: i64, message: &str) {
        self.transmit(DriverEvent::OnError, |scratch| {
            scratch.put_i64(0, correlation_id).unwrap();
            8 + scratch.put_string(8, message).unwrap()
        });
    }

    /// Announce a publication's buffers are ready
    pub fn on_publication_ready(
        &mut self,
        correlation_id: i64,
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        log_file: &str,
    ) {
        self.transmit(DriverEvent::OnPublicationReady, |scratch| {
            scratch.put_i64(0, correlation_id).unwrap();
            scratch.put_i64(8, registration_id).unwrap();
            scratch.put_i32(16, stream_id).unwrap();
            scratch.put_i32(20, session_id).unwrap();
            24 + scratch.put_string(24, log_file).unwrap()
        });
    }

    /// Announce a subscription is registered
    pub fn on_subscription_ready(&mut self, correlation_id: i64, registration_id: i64) {
        self.transmit(DriverEvent::OnSubscriptionReady, |scratch| {
            scratch.put_i64(0, correlation_id).unwrap();
            scratch.put_i64(8, registration_id).unwrap();
            16
        });
    }

    /// Announce image buffers are available for a stream
    pub fn on_available_image(
        &mut self,
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        source: &str,
        log_file: &str,
    ) {
        self.transmit(DriverEvent::OnAvailableImage, |scratch| {
            scratch.put_i64(0, correlation_id).unwrap();
            scratch.put_i32(8, session_id).unwrap();
            scratch.put_i32(12, stream_id).unwrap();
            let mut offset = 16;
            offset += scratch.put_string(offset, source).unwrap();
            offset += scratch.put_string(offset, log_file).unwrap();
            offset
        });
    }

    /// Announce a counter registration completed
    pub fn on_counter_ready(&mut self, correlation_id: i64, counter_id: i32) {
        self.transmit(DriverEvent::OnCounterReady, |scratch| {
            scratch.put_i64(0, correlation_id).unwrap();
            scratch.put_i32(8, counter_id).unwrap();
            12
        });
    }

    /// Inform a silent client it has been timed out
    pub fn on_client_timeout(&mut self, client_id: i64) {
        self.transmit(DriverEvent::OnClientTimeout, |scratch| {
            scratch.put_i64(0, client_id).unwrap();
            8
        });
    }

    fn transmit<F>(&mut self, event: DriverEvent, encode: F)
    where
        F: FnOnce(&mut Vec<u8>) -> IndexT,
    {
        let length = encode(&mut self.scratch);
        if let Err(e) = self.transmitter.transmit(event as i32, &self.scratch, 0, length) {
            (self.error_handler)(&e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::concurrent::broadcast::{buffer_descriptor, BroadcastReceiver};
    use crate::control_protocol::DriverEvent;

    #[test]
    fn events_reach_a_receiver() {
        let mut bytes = vec![0u8; 1024 + buffer_descriptor::TRAILER_LENGTH as usize];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };

        let transmitter = BroadcastTransmitter::new(buffer).unwrap();
        let mut receiver = BroadcastReceiver::new(buffer).unwrap();

        let handler: ErrorHandler = Arc::new(|_e| {});
        let mut proxy = ClientProxy::new(transmitter, handler);

        proxy.on_operation_success(42);
        proxy.on_error(43, "no such registration");

        assert!(receiver.receive_next().unwrap());
        assert_eq!(receiver.msg_type_id(), Ok(DriverEvent::OnOperationSuccess as i32));
        assert_eq!(receiver.message().unwrap()[..8], 42i64.to_le_bytes());

        assert!(receiver.receive_next().unwrap());
        assert_eq!(receiver.msg_type_id(), Ok(DriverEvent::OnError as i32));
    }
}
