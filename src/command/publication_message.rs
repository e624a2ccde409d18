//! Flyweight for commands adding a publication.
use std::mem::size_of;

use crate::command::correlated_message::CorrelatedMessageDefn;
use crate::command::flyweight::Flyweight;
use crate::concurrent::AtomicBuffer;
use crate::util::{IndexT, Result};

/// Raw command to add a publication. The channel is a length-prefixed string
/// immediately trailing this struct and part of the same message.
#[repr(C, packed(4))]
pub struct PublicationMessageDefn {
    pub(in crate::command) correlated_message: CorrelatedMessageDefn,
    pub(in crate::command) stream_id: i32,
}

impl<A> Flyweight<A, PublicationMessageDefn>
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

    /// Retrieve the stream identifier within the channel.
    pub fn stream_id(&self) -> i32 {
        self.get_struct().stream_id
    }

    /// Set the stream identifier within the channel.
    pub fn put_stream_id(&mut self, value: i32) -> &mut Self {
        self.get_struct_mut().stream_id = value;
        self
    }

    /// Retrieve the channel URI this publication sends on.
    pub fn channel(&self) -> Result<String> {
        self.buffer
            .get_string(size_of::<PublicationMessageDefn>() as IndexT)
    }

    /// Set the channel URI this publication sends on.
    pub fn put_channel(&mut self, value: &str) -> Result<&mut Self> {
        self.buffer
            .put_string(size_of::<PublicationMessageDefn>() as IndexT, value)?;
        Ok(self)
    }

    /// Get the total byte length of this command
    pub fn length(&self) -> Result<IndexT> {
        let channel_length = self
            .buffer
            .get_i32(size_of::<PublicationMessageDefn>() as IndexT)?;
        Ok(size_of::<PublicationMessageDefn>() as IndexT + 4 + channel_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::flyweight::Flyweight;

    #[test]
    fn publication_message_round_trip() {
        let buffer = &mut [0u8; 128][..];
        let mut flyweight = Flyweight::new::<PublicationMessageDefn>(buffer, 0).unwrap();

        flyweight
            .put_client_id(7)
            .put_correlation_id(11)
            .put_stream_id(1001);
        flyweight.put_channel("udp://localhost:40123").unwrap();

        assert_eq!(flyweight.client_id(), 7);
        assert_eq!(flyweight.correlation_id(), 11);
        assert_eq!(flyweight.stream_id(), 1001);
        assert_eq!(flyweight.channel(), Ok("udp://localhost:40123".to_string()));
        assert_eq!(
            flyweight.length(),
            Ok(size_of::<PublicationMessageDefn>() as IndexT + 4 + 21)
        );
    }
}
