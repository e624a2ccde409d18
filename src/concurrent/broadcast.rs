//! Broadcast buffer carrying driver events out to every listening client.
//! One transmitter (the conductor's client proxy), any number of receivers;
//! a slow receiver is lapped rather than back-pressuring the driver.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::concurrent::AtomicBuffer;
use crate::util::bit::align;
use crate::util::{BufferError, IndexT, Result};

/// Description of the broadcast buffer schema
pub mod buffer_descriptor {
    use std::mem::size_of;

    use crate::util::bit::{is_power_of_two, CACHE_LINE_LENGTH};
    use crate::util::{BufferError, IndexT, Result};

    /// Offset within the trailer for the tail intended value
    pub const TAIL_INTENT_COUNTER_OFFSET: IndexT = 0;

    /// Offset within the trailer for the tail value
    pub const TAIL_COUNTER_OFFSET: IndexT = TAIL_INTENT_COUNTER_OFFSET + size_of::<i64>() as IndexT;

    /// Offset within the buffer trailer for the latest sequence value
    pub const LATEST_COUNTER_OFFSET: IndexT = TAIL_COUNTER_OFFSET + size_of::<i64>() as IndexT;

    /// Size of the broadcast buffer metadata trailer
    pub const TRAILER_LENGTH: IndexT = CACHE_LINE_LENGTH as IndexT * 2;

    pub(super) fn check_capacity(capacity: IndexT) -> Result<()> {
        if is_power_of_two(capacity) {
            Ok(())
        } else {
            Err(BufferError::IllegalArgument)
        }
    }
}

/// Broadcast buffer record header
pub mod record_descriptor {
    use crate::util::IndexT;

    /// Message type to indicate a record used only for padding the buffer
    pub const PADDING_MSG_TYPE_ID: i32 = -1;

    /// Offset from the beginning of a record to its length
    pub const LENGTH_OFFSET: IndexT = 0;

    /// Offset from the beginning of a record to its type
    pub const TYPE_OFFSET: IndexT = 4;

    /// Total header length for each record
    pub const HEADER_LENGTH: IndexT = 8;

    /// Alignment for all broadcast records
    pub const RECORD_ALIGNMENT: IndexT = HEADER_LENGTH;

    /// Retrieve the byte offset for a record's length field given the record start
    pub fn length_offset(record_offset: IndexT) -> IndexT {
        record_offset + LENGTH_OFFSET
    }

    /// Retrieve the byte offset for a record's type field given the record start
    pub fn type_offset(record_offset: IndexT) -> IndexT {
        record_offset + TYPE_OFFSET
    }

    /// Retrieve the byte offset for a record's message given the record start
    pub fn msg_offset(record_offset: IndexT) -> IndexT {
        record_offset + HEADER_LENGTH
    }
}

/// Transmit messages to any receivers polling the same buffer. Strictly a
/// single-producer object: the conductor is its only writer.
pub struct BroadcastTransmitter<A>
where
    A: AtomicBuffer,
{
    buffer: A,
    capacity: IndexT,
    mask: IndexT,
    max_msg_length: IndexT,
    tail_intent_counter_index: IndexT,
    tail_counter_index: IndexT,
    latest_counter_index: IndexT,
}

impl<A> BroadcastTransmitter<A>
where
    A: AtomicBuffer,
{
    /// Create a new transmitter backed by `buffer`
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = buffer.capacity() - buffer_descriptor::TRAILER_LENGTH;
        buffer_descriptor::check_capacity(capacity)?;

        Ok(BroadcastTransmitter {
            buffer,
            capacity,
            mask: capacity - 1,
            max_msg_length: capacity / 8,
            tail_intent_counter_index: capacity + buffer_descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + buffer_descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + buffer_descriptor::LATEST_COUNTER_OFFSET,
        })
    }

    /// Get the total capacity of this transmitter, excluding the trailer
    pub fn capacity(&self) -> IndexT {
        self.capacity
    }

    /// Transmit a message to all receivers. A receiver that has fallen more
    /// than a buffer's length behind loses the overwritten records.
    pub fn transmit<B>(
        &mut self,
        msg_type_id: i32,
        source: &B,
        source_index: IndexT,
        length: IndexT,
    ) -> Result<()>
    where
        B: AtomicBuffer,
    {
        check_msg_type_id(msg_type_id)?;
        if length > self.max_msg_length {
            return Err(BufferError::IllegalArgument);
        }

        // Single producer: the tail is only ever advanced by us
        let mut tail = self.buffer.get_i64(self.tail_counter_index)?;
        let record_length = length + record_descriptor::HEADER_LENGTH;
        let aligned_length = align(
            record_length as usize,
            record_descriptor::RECORD_ALIGNMENT as usize,
        ) as IndexT;
        let new_tail = tail + i64::from(aligned_length);

        let mut record_offset = (tail & i64::from(self.mask)) as IndexT;
        let to_end_of_buffer = self.capacity - record_offset;

        if to_end_of_buffer < aligned_length {
            // Not enough room before the wrap point: pad to the end, then
            // write the record at the start of the buffer.
            self.signal_tail_intent(new_tail + i64::from(to_end_of_buffer))?;

            self.buffer.put_i32(
                record_descriptor::length_offset(record_offset),
                to_end_of_buffer,
            )?;
            self.buffer.put_i32(
                record_descriptor::type_offset(record_offset),
                record_descriptor::PADDING_MSG_TYPE_ID,
            )?;

            tail += i64::from(to_end_of_buffer);
            record_offset = 0;
        } else {
            self.signal_tail_intent(new_tail)?;
        }

        self.buffer.put_i32(
            record_descriptor::length_offset(record_offset),
            record_length,
        )?;
        self.buffer
            .put_i32(record_descriptor::type_offset(record_offset), msg_type_id)?;
        self.buffer.put_bytes(
            record_descriptor::msg_offset(record_offset),
            source,
            source_index,
            length,
        )?;

        self.buffer.put_i64(self.latest_counter_index, tail)?;
        self.buffer.put_i64_ordered(
            self.tail_counter_index,
            tail + i64::from(aligned_length),
        )?;

        Ok(())
    }

    fn signal_tail_intent(&mut self, new_tail: i64) -> Result<()> {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail)
    }
}

fn check_msg_type_id(msg_type_id: i32) -> Result<()> {
    if msg_type_id < 1 {
        Err(BufferError::IllegalArgument)
    } else {
        Ok(())
    }
}

/// Receive messages from a transmission stream. Works by polling `receive_next`
/// until `true` is returned, then inspecting messages using the provided methods.
pub struct BroadcastReceiver<A>
where
    A: AtomicBuffer,
{
    buffer: A,
    capacity: IndexT,
    mask: IndexT,
    tail_intent_counter_index: IndexT,
    tail_counter_index: IndexT,
    latest_counter_index: IndexT,
    record_offset: IndexT,
    cursor: i64,
    next_record: i64,
    lapped_count: AtomicI64,
}

impl<A> BroadcastReceiver<A>
where
    A: AtomicBuffer,
{
    /// Create a new receiver backed by `buffer`
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = buffer.capacity() - buffer_descriptor::TRAILER_LENGTH;
        buffer_descriptor::check_capacity(capacity)?;
        let mask = capacity - 1;

        let latest_counter_index = capacity + buffer_descriptor::LATEST_COUNTER_OFFSET;
        let cursor = buffer.get_i64(latest_counter_index)?;

        Ok(BroadcastReceiver {
            buffer,
            capacity,
            mask,
            tail_intent_counter_index: capacity + buffer_descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + buffer_descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index,
            record_offset: (cursor as i32) & mask,
            cursor,
            next_record: cursor,
            lapped_count: AtomicI64::new(0),
        })
    }

    /// Get the total capacity of this broadcast receiver
    pub fn capacity(&self) -> IndexT {
        self.capacity
    }

    /// Get the number of times the transmitter has lapped this receiver. Each
    /// lap represents at least a buffer's worth of lost data.
    pub fn lapped_count(&self) -> i64 {
        self.lapped_count.load(Ordering::SeqCst)
    }

    /// Non-blocking receive of next message from the transmission stream.
    /// If loss has occurred, `lapped_count` will be incremented. Returns `true`
    /// if the next transmission is available, `false` otherwise.
    pub fn receive_next(&mut self) -> Result<bool> {
        let mut is_available = false;
        let tail: i64 = self.buffer.get_i64_volatile(self.tail_counter_index)?;
        let mut cursor: i64 = self.next_record;

        if tail > cursor {
            if !self.validate_at(cursor) {
                self.lapped_count.fetch_add(1, Ordering::SeqCst);
                cursor = self.buffer.get_i64(self.latest_counter_index)?;
            }
            let mut record_offset = (cursor as i32) & self.mask;

            self.cursor = cursor;
            self.next_record = cursor
                + align(
                    self.buffer
                        .get_i32(record_descriptor::length_offset(record_offset))?
                        as usize,
                    record_descriptor::RECORD_ALIGNMENT as usize,
                ) as i64;

            if record_descriptor::PADDING_MSG_TYPE_ID
                == self
                    .buffer
                    .get_i32(record_descriptor::type_offset(record_offset))?
            {
                record_offset = 0;
                self.cursor = self.next_record;
                self.next_record += align(
                    self.buffer
                        .get_i32(record_descriptor::length_offset(record_offset))?
                        as usize,
                    record_descriptor::RECORD_ALIGNMENT as usize,
                ) as i64;
            }

            self.record_offset = record_offset;
            is_available = true;
        }

        Ok(is_available)
    }

    /// Get the length of the message in the current record
    pub fn length(&self) -> Result<i32> {
        Ok(self
            .buffer
            .get_i32(record_descriptor::length_offset(self.record_offset))?
            - record_descriptor::HEADER_LENGTH)
    }

    /// Get the offset to the message content in the current record
    pub fn offset(&self) -> i32 {
        record_descriptor::msg_offset(self.record_offset)
    }

    /// Read the current record's message body out of the buffer
    pub fn message(&self) -> Result<&[u8]> {
        let start = self.offset() as usize;
        let end = start + self.length()? as usize;
        Ok(&self.buffer[start..end])
    }

    /// Ensure that the current received record is still valid and has not
    /// been overwritten.
    pub fn validate(&self) -> bool {
        self.validate_at(self.cursor)
    }

    /// Get the message type identifier for the current record
    pub fn msg_type_id(&self) -> Result<i32> {
        self.buffer
            .get_i32(record_descriptor::type_offset(self.record_offset))
    }

    fn validate_at(&self, cursor: i64) -> bool {
        // UNWRAP: Length checks performed during initialization
        (cursor + i64::from(self.capacity))
            > self
                .buffer
                .get_i64_volatile(self.tail_intent_counter_index)
                .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::RawBuffer;

    const CAPACITY: usize = 1024;
    const TOTAL_LENGTH: usize = CAPACITY + buffer_descriptor::TRAILER_LENGTH as usize;

    #[test]
    fn transmit_then_receive() {
        let mut bytes = vec![0u8; TOTAL_LENGTH];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };

        let mut transmitter = BroadcastTransmitter::new(buffer).unwrap();
        let mut receiver = BroadcastReceiver::new(buffer).unwrap();

        let msg = &mut [1u8, 2, 3, 4][..];
        transmitter.transmit(7, &msg, 0, 4).unwrap();

        assert_eq!(receiver.receive_next(), Ok(true));
        assert_eq!(receiver.msg_type_id(), Ok(7));
        assert_eq!(receiver.length(), Ok(4));
        assert_eq!(receiver.message().unwrap(), [1, 2, 3, 4]);
        assert!(receiver.validate());

        assert_eq!(receiver.receive_next(), Ok(false));
    }

    #[test]
    fn transmit_wraps_with_padding() {
        let mut bytes = vec![0u8; TOTAL_LENGTH];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };

        let mut transmitter = BroadcastTransmitter::new(buffer).unwrap();
        let mut receiver = BroadcastReceiver::new(buffer).unwrap();

        // March the tail to within one record of the wrap point, consuming
        // as we go. Each record is 96 + 8 header = 104 aligned bytes.
        let chunk = &mut [0u8; 96][..];
        for _ in 0..9 {
            transmitter.transmit(1, &chunk, 0, 96).unwrap();
            assert_eq!(receiver.receive_next(), Ok(true));
        }

        // 9 * 104 = 936 bytes written; only 88 remain before the wrap, so
        // this message lands at offset zero behind a padding record
        transmitter.transmit(2, &chunk, 0, 96).unwrap();
        assert_eq!(receiver.receive_next(), Ok(true));
        assert_eq!(receiver.msg_type_id(), Ok(2));
        assert_eq!(receiver.length(), Ok(96));
    }

    #[test]
    fn transmit_rejects_oversized_message() {
        let mut bytes = vec![0u8; TOTAL_LENGTH];
        let buffer = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut transmitter = BroadcastTransmitter::new(buffer).unwrap();

        let oversized = vec![0u8; CAPACITY / 8 + 1];
        assert_eq!(
            transmitter.transmit(1, &oversized, 0, oversized.len() as i32),
            Err(BufferError::IllegalArgument)
        );
    }

    #[test]
    fn receiver_requires_power_of_two_capacity() {
        let bytes = vec![0u8; 777 + buffer_descriptor::TRAILER_LENGTH as usize];
        assert!(BroadcastReceiver::new(bytes).is_err());
    }
}
