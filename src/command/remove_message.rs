//! Flyweight for commands removing a previously registered resource.
use crate::command::correlated_message::CorrelatedMessageDefn;
use crate::command::flyweight::Flyweight;
use crate::concurrent::AtomicBuffer;

/// Raw command to remove a publication, subscription, or counter by its
/// original registration id.
#[repr(C, packed(4))]
pub struct RemoveMessageDefn {
    pub(in crate::command) correlated_message: CorrelatedMessageDefn,
    pub(in crate::command) registration_id: i64,
}

impl<A> Flyweight<A, RemoveMessageDefn>
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

    /// Registration id of the resource to remove.
    pub fn registration_id(&self) -> i64 {
        self.get_struct().registration_id
    }

    /// Set the registration id of the resource to remove.
    pub fn put_registration_id(&mut self, value: i64) -> &mut Self {
        self.get_struct_mut().registration_id = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::flyweight::Flyweight;

    #[test]
    fn remove_message_round_trip() {
        let buffer = &mut [0u8; 24][..];
        let mut flyweight = Flyweight::new::<RemoveMessageDefn>(buffer, 0).unwrap();

        flyweight
            .put_client_id(1)
            .put_correlation_id(2)
            .put_registration_id(77);
        assert_eq!(flyweight.registration_id(), 77);
    }
}
