//! Behavioral tests for the to-clients broadcast pair.
use rivulet_driver::concurrent::broadcast::{
    buffer_descriptor, BroadcastReceiver, BroadcastTransmitter,
};
use rivulet_driver::concurrent::RawBuffer;
use rivulet_driver::util::IndexT;

const CAPACITY: usize = 1024;
const TOTAL_BUFFER_LENGTH: usize = CAPACITY + buffer_descriptor::TRAILER_LENGTH as usize;

#[test]
fn should_calculate_capacity_for_buffer() {
    let buffer = BroadcastReceiver::new(vec![0u8; TOTAL_BUFFER_LENGTH]).unwrap();
    assert_eq!(buffer.capacity(), CAPACITY as IndexT);
}

#[test]
fn should_throw_exception_for_capacity_that_is_not_power_of_two() {
    let bytes = vec![0u8; 777 + buffer_descriptor::TRAILER_LENGTH as usize];

    assert!(BroadcastReceiver::new(bytes).is_err());
}

#[test]
fn should_not_be_lapped_before_reception() {
    let receiver = BroadcastReceiver::new(vec![0u8; TOTAL_BUFFER_LENGTH]).unwrap();
    assert_eq!(receiver.lapped_count(), 0);
}

#[test]
fn should_not_receive_from_empty_buffer() {
    let mut receiver = BroadcastReceiver::new(vec![0u8; TOTAL_BUFFER_LENGTH]).unwrap();
    assert_eq!(receiver.receive_next(), Ok(false));
}

#[test]
fn should_receive_transmitted_message_stream_in_order() {
    let mut bytes = vec![0u8; TOTAL_BUFFER_LENGTH];
    let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };

    let mut transmitter = BroadcastTransmitter::new(buffer).unwrap();
    let mut receiver = BroadcastReceiver::new(buffer).unwrap();

    for value in 1u8..=5 {
        let msg = &mut [value; 16][..];
        transmitter.transmit(i32::from(value), &msg, 0, 16).unwrap();
    }

    for value in 1u8..=5 {
        assert_eq!(receiver.receive_next(), Ok(true));
        assert_eq!(receiver.msg_type_id(), Ok(i32::from(value)));
        assert_eq!(receiver.message().unwrap(), [value; 16]);
        assert!(receiver.validate());
    }
    assert_eq!(receiver.receive_next(), Ok(false));
}

#[test]
fn late_receiver_starts_from_latest_record() {
    let mut bytes = vec![0u8; TOTAL_BUFFER_LENGTH];
    let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };

    let mut transmitter = BroadcastTransmitter::new(buffer).unwrap();
    let msg = &mut [9u8; 16][..];
    transmitter.transmit(7, &msg, 0, 16).unwrap();

    // A receiver joining now has missed the first message entirely
    let mut receiver = BroadcastReceiver::new(buffer).unwrap();
    assert_eq!(receiver.receive_next(), Ok(true));
    assert_eq!(receiver.msg_type_id(), Ok(7));
}
