//! Flyweight decoding of the command records clients write onto the
//! to-driver ring. Only the commands the lifecycle core consumes are decoded
//! here; richer command bodies belong to the client codec.

pub mod correlated_message;
pub mod counter_message;
pub mod destination_message;
pub mod flyweight;
pub mod publication_message;
pub mod remove_message;
pub mod subscription_message;
