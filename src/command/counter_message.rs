//! Flyweight for commands registering a client counter.
use std::mem::size_of;

use crate::command::correlated_message::CorrelatedMessageDefn;
use crate::command::flyweight::Flyweight;
use crate::concurrent::AtomicBuffer;
use crate::util::{IndexT, Result};

/// Raw command to register a counter. The label is a length-prefixed string
/// immediately trailing this struct and part of the same message.
#[repr(C, packed(4))]
pub struct CounterMessageDefn {
    pub(in crate::command) correlated_message: CorrelatedMessageDefn,
    pub(in crate::command) type_id: i32,
}

impl<A> Flyweight<A, CounterMessageDefn>
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

    /// Retrieve the application type id of the counter.
    pub fn type_id(&self) -> i32 {
        self.get_struct().type_id
    }

    /// Set the application type id of the counter.
    pub fn put_type_id(&mut self, value: i32) -> &mut Self {
        self.get_struct_mut().type_id = value;
        self
    }

    /// Retrieve the counter label.
    pub fn label(&self) -> Result<String> {
        self.buffer
            .get_string(size_of::<CounterMessageDefn>() as IndexT)
    }

    /// Set the counter label.
    pub fn put_label(&mut self, value: &str) -> Result<&mut Self> {
        self.buffer
            .put_string(size_of::<CounterMessageDefn>() as IndexT, value)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::flyweight::Flyweight;

    #[test]
    fn counter_message_round_trip() {
        let buffer = &mut [0u8; 64][..];
        let mut flyweight = Flyweight::new::<CounterMessageDefn>(buffer, 0).unwrap();

        flyweight.put_client_id(9).put_correlation_id(10).put_type_id(1001);
        flyweight.put_label("orders in flight").unwrap();

        assert_eq!(flyweight.type_id(), 1001);
        assert_eq!(flyweight.label(), Ok("orders in flight".to_string()));
    }
}
