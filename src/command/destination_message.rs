//! Flyweight for commands managing manual destinations on a publication or
//! subscription.
use std::mem::size_of;

use crate::command::correlated_message::CorrelatedMessageDefn;
use crate::command::flyweight::Flyweight;
use crate::concurrent::AtomicBuffer;
use crate::util::{IndexT, Result};

/// Raw command to add or remove a destination. The destination channel is a
/// length-prefixed string immediately trailing this struct and part of the
/// same message.
#[repr(C, packed(4))]
pub struct DestinationMessageDefn {
    pub(in crate::command) correlated_message: CorrelatedMessageDefn,
    pub(in crate::command) registration_correlation_id: i64,
}

impl<A> Flyweight<A, DestinationMessageDefn>
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

    /// Registration id of the publication or subscription the destination
    /// belongs to.
    pub fn registration_correlation_id(&self) -> i64 {
        self.get_struct().registration_correlation_id
    }

    /// Set the owning registration id.
    pub fn put_registration_correlation_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().registration_correlation_id = value;
        self
    }

    /// Retrieve the destination channel URI.
    pub fn channel(&self) -> Result<String> {
        self.buffer
            .get_string(size_of::<DestinationMessageDefn>() as IndexT)
    }

    /// Set the destination channel URI.
    pub fn put_channel(&mut self, value: &str) -> Result<&mut Self> {
        self.buffer
            .put_string(size_of::<DestinationMessageDefn>() as IndexT, value)?;
        Ok(self)
    }
}
