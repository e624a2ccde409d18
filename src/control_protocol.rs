//! Message type identifiers exchanged over the CnC file: client commands on
//! the to-driver ring, driver events on the to-clients broadcast. The values
//! are part of the compatibility contract with clients.

/// Construct a C-compatible enum out of a set of fixed message ids, along
/// with a fallible conversion from the raw wire value.
macro_rules! define_enum {
    (
        $(#[$outer:meta])*
        pub enum $name:ident {$(
            $(#[$inner:meta]),*
            $left:ident = $right:expr,
        )+}
    ) => {
        #[repr(i32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $(#[$outer])*
        pub enum $name {$(
            $(#[$inner])*
            $left = $right,
        )*}

        impl ::std::convert::TryFrom<i32> for $name {
            type Error = ();
            fn try_from(val: i32) -> Result<$name, ()> {
                match val {
                    $(v if v == $name::$left as i32 => Ok($name::$left)),*,
                    _ => Err(())
                }
            }
        }
    }
}

define_enum!(
    #[doc = "Commands sent from clients to the driver over the to-driver ring"]
    pub enum ClientCommand {
        #[doc = "Add a Publication"]
        AddPublication = 0x01,
        #[doc = "Remove a Publication"]
        RemovePublication = 0x02,
        #[doc = "Add an Exclusive Publication"]
        AddExclusivePublication = 0x03,
        #[doc = "Add a Subscriber"]
        AddSubscription = 0x04,
        #[doc = "Remove a Subscriber"]
        RemoveSubscription = 0x05,
        #[doc = "Keepalive from Client"]
        ClientKeepalive = 0x06,
        #[doc = "Add Destination to an existing Publication"]
        AddDestination = 0x07,
        #[doc = "Remove Destination from an existing Publication"]
        RemoveDestination = 0x08,
        #[doc = "Add a Counter to the counters manager"]
        AddCounter = 0x09,
        #[doc = "Remove a Counter from the counters manager"]
        RemoveCounter = 0x0A,
        #[doc = "Close indication from Client"]
        ClientClose = 0x0B,
        #[doc = "Add Destination for existing Subscription"]
        AddRcvDestination = 0x0C,
        #[doc = "Remove Destination for existing Subscription"]
        RemoveRcvDestination = 0x0D,
        #[doc = "Request the driver to terminate"]
        TerminateDriver = 0x0E,
    }
);

define_enum!(
    #[doc = "Events sent from the driver to clients over the to-clients broadcast"]
    pub enum DriverEvent {
        #[doc = "Error as a result of attempting to process a client command"]
        OnError = 0x0F01,
        #[doc = "Operation has succeeded"]
        OnOperationSuccess = 0x0F02,
        #[doc = "New subscription image buffers are available"]
        OnAvailableImage = 0x0F03,
        #[doc = "Inform client of removal of an inactive image"]
        OnUnavailableImage = 0x0F04,
        #[doc = "New publication buffers are ready"]
        OnPublicationReady = 0x0F05,
        #[doc = "New subscription is ready"]
        OnSubscriptionReady = 0x0F06,
        #[doc = "New counter is ready"]
        OnCounterReady = 0x0F07,
        #[doc = "Inform clients of removal of a counter"]
        OnUnavailableCounter = 0x0F08,
        #[doc = "Inform a client it has been timed out"]
        OnClientTimeout = 0x0F09,
    }
);

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::{ClientCommand, DriverEvent};

    #[test]
    fn client_command_convert() {
        assert_eq!(Ok(ClientCommand::AddPublication), 0x01.try_into());
        assert_eq!(Ok(ClientCommand::TerminateDriver), 0x0E.try_into());
        let unknown: Result<ClientCommand, ()> = 0x7F.try_into();
        assert_eq!(unknown, Err(()));
    }

    #[test]
    fn driver_event_convert() {
        assert_eq!(Ok(DriverEvent::OnClientTimeout), 0x0F09.try_into());
    }
}
