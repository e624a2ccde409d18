//! Flyweight for the correlated header that leads every client command.
use crate::command::flyweight::Flyweight;
use crate::concurrent::AtomicBuffer;

/// Raw correlated header: the originating client and the correlation
/// identifier the client expects echoed in any response.
#[repr(C, packed(4))]
pub struct CorrelatedMessageDefn {
    pub(in crate::command) client_id: i64,
    pub(in crate::command) correlation_id: i64,
}

/// Length in bytes of the correlated header
pub const CORRELATED_MESSAGE_LENGTH: usize = ::std::mem::size_of::<CorrelatedMessageDefn>();

impl<A> Flyweight<A, CorrelatedMessageDefn>
where
    A: AtomicBuffer,
{
    /// Retrieve the client identifier associated with this message.
    pub fn client_id(&self) -> i64 {
        self.get_struct().client_id
    }

    /// Set the client identifier of this message.
    pub fn put_client_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().client_id = value;
        self
    }

    /// Retrieve the correlation identifier associated with this message.
    /// Used to associate driver responses with a specific request.
    pub fn correlation_id(&self) -> i64 {
        self.get_struct().correlation_id
    }

    /// Set the correlation identifier of this message.
    pub fn put_correlation_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().correlation_id = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::flyweight::Flyweight;

    #[test]
    fn round_trip_through_bytes() {
        let buffer = &mut [0u8; 16][..];
        let mut flyweight = Flyweight::new::<CorrelatedMessageDefn>(buffer, 0).unwrap();

        flyweight.put_client_id(42).put_correlation_id(-1);
        assert_eq!(flyweight.client_id(), 42);
        assert_eq!(flyweight.correlation_id(), -1);
    }

    #[test]
    fn rejects_undersized_buffer() {
        let buffer = &mut [0u8; 8][..];
        assert!(Flyweight::new::<CorrelatedMessageDefn>(buffer, 0).is_err());
    }
}
