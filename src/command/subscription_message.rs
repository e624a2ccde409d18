//! Flyweight for commands adding a subscription.
use std::mem::size_of;

use crate::command::correlated_message::CorrelatedMessageDefn;
use crate::command::flyweight::Flyweight;
use crate::concurrent::AtomicBuffer;
use crate::util::{IndexT, Result};

/// Raw command to add a subscription. The channel is a length-prefixed string
/// immediately trailing this struct and part of the same message.
#[repr(C, packed(4))]
pub struct SubscriptionMessageDefn {
    pub(in crate::command) correlated_message: CorrelatedMessageDefn,
    pub(in crate::command) registration_correlation_id: i64,
    pub(in crate::command) stream_id: i32,
}

impl<A> Flyweight<A, SubscriptionMessageDefn>
where
    A: AtomicBuffer,
{
    /// Retrieve the client identifier of this request.
    pub fn client_id(&self) -> i64 {
        self.get_struct().correlated_message.client_id
    }

    /// Set the client identifier of this request.
    pub fn put_client_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().correlated_message.client_id = value;
        self
    }

    /// Retrieve the correlation identifier of this request.
    pub fn correlation_id(&self) -> i64 {
        self.get_struct().correlated_message.correlation_id
    }

    /// Set the correlation identifier of this request.
    pub fn put_correlation_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().correlated_message.correlation_id = value;
        self
    }

    /// Correlation id of the registration this subscription relates to, or
    /// `-1` when standalone.
    pub fn registration_correlation_id(&self) -> i64 {
        self.get_struct().registration_correlation_id
    }

    /// Set the related registration correlation id.
    pub fn put_registration_correlation_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().registration_correlation_id = value;
        self
    }

    /// Retrieve the stream identifier within the channel.
    pub fn stream_id(&self) -> i32 {
        self.get_struct().stream_id
    }

    /// Set the stream identifier within the channel.
    pub fn put_stream_id(&mut self, value: i32) -> &mut Self {
        self.get_struct_mut().stream_id = value;
        self
    }

    /// Retrieve the channel URI this subscription listens on.
    pub fn channel(&self) -> Result<String> {
        self.buffer
            .get_string(size_of::<SubscriptionMessageDefn>() as IndexT)
    }

    /// Set the channel URI this subscription listens on.
    pub fn put_channel(&mut self, value: &str) -> Result<&mut Self> {
        self.buffer
            .put_string(size_of::<SubscriptionMessageDefn>() as IndexT, value)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::flyweight::Flyweight;

    #[test]
    fn subscription_message_round_trip() {
        let buffer = &mut [0u8; 128][..];
        let mut flyweight = Flyweight::new::<SubscriptionMessageDefn>(buffer, 0).unwrap();

        flyweight
            .put_client_id(3)
            .put_correlation_id(5)
            .put_registration_correlation_id(-1)
            .put_stream_id(2002);
        flyweight.put_channel("udp://224.0.1.1:40456").unwrap();

        assert_eq!(flyweight.client_id(), 3);
        assert_eq!(flyweight.registration_correlation_id(), -1);
        assert_eq!(flyweight.stream_id(), 2002);
        assert_eq!(flyweight.channel(), Ok("udp://224.0.1.1:40456".to_string()));
    }
}
