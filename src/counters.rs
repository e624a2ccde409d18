//! Counters subsystem: metadata descriptors and cache-line-padded 64-bit
//! value slots inside the CnC file, plus the fixed registry of system
//! counters the driver publishes about itself.
//!
//! Metadata record layout (one per counter id):
//!
//! ```text
//! +-----------------------------+ 0
//! |        Record State         |
//! +-----------------------------+ 4
//! |           Type Id           |
//! +-----------------------------+ 8
//! |            Key              |
//! +-----------------------------+ 120
//! |        Label Length         |
//! +-----------------------------+ 124
//! |        Label (ASCII)        |
//! +-----------------------------+ 256
//! ```

use crate::concurrent::{AtomicBuffer, RawBuffer};
use crate::util::bit::CACHE_LINE_LENGTH;
use crate::util::{BufferError, IndexT, Result};

/// Length of one counter value slot: a 64-bit value padded out to two cache
/// lines so adjacent counters never false-share.
pub const COUNTER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Length of one counter metadata record
pub const METADATA_LENGTH: usize = CACHE_LINE_LENGTH * 4;

/// Record state: slot has never been used
pub const RECORD_UNUSED: i32 = 0;
/// Record state: slot is claimed mid-allocation, fields not yet complete
pub const RECORD_CLAIMED: i32 = 2;
/// Record state: slot carries a live counter
pub const RECORD_ALLOCATED: i32 = 1;
/// Record state: counter was freed and the slot may be reused
pub const RECORD_RECLAIMED: i32 = -1;

const TYPE_ID_OFFSET: IndexT = 4;
const KEY_OFFSET: IndexT = 8;
const LABEL_LENGTH_OFFSET: IndexT = 120;
const LABEL_OFFSET: IndexT = 124;

/// Largest key a counter metadata record can carry
pub const MAX_KEY_LENGTH: usize = (LABEL_LENGTH_OFFSET - KEY_OFFSET) as usize;

/// Largest label a counter metadata record can carry
pub const MAX_LABEL_LENGTH: usize = METADATA_LENGTH - LABEL_OFFSET as usize;

/// Handle on a single 64-bit counter slot. Trivially copyable; reads and
/// increments go through atomic operations so handles may be cloned across
/// agent threads.
#[derive(Clone, Copy)]
pub struct Counter {
    slot: RawBuffer,
    id: i32,
}

impl Counter {
    /// Identifier this counter was registered under
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Volatile read of the current value
    pub fn get(&self) -> i64 {
        // UNWRAP: Slot views are always 8-byte aligned and sized
        self.slot.get_i64_volatile(0).unwrap()
    }

    /// Add one to the counter
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add `amount` to the counter
    pub fn add(&self, amount: i64) {
        // UNWRAP: Slot views are always 8-byte aligned and sized
        self.slot.get_and_add_i64(0, amount).unwrap();
    }

    /// Overwrite the counter with an ordered store
    pub fn set_ordered(&mut self, value: i64) {
        // UNWRAP: Slot views are always 8-byte aligned and sized
        self.slot.put_i64_ordered(0, value).unwrap();
    }
}

/// Allocator for counter metadata records and value slots.
///
/// The single-writer flavor assumes only the conductor registers counters;
/// the concurrent flavor arbitrates free slots with a CAS on the record state
/// so multiple producers may allocate.
pub struct CountersManager {
    metadata: RawBuffer,
    values: RawBuffer,
    max_counters: usize,
    concurrent: bool,
}

impl CountersManager {
    /// Create a manager over the metadata and values regions. The usable
    /// counter count is bounded by whichever region fills up first.
    pub fn new(metadata: RawBuffer, values: RawBuffer, concurrent: bool) -> Self {
        let max_counters = ::std::cmp::min(
            metadata.len() / METADATA_LENGTH,
            values.len() / COUNTER_LENGTH,
        );
        CountersManager {
            metadata,
            values,
            max_counters,
            concurrent,
        }
    }

    /// Most counters this manager can hold
    pub fn max_counters(&self) -> usize {
        self.max_counters
    }

    /// Register a counter, writing its metadata record and zeroing its value
    /// slot. Labels must be US-ASCII. Returns the stable counter id.
    pub fn allocate(&mut self, type_id: i32, key: &[u8], label: &str) -> Result<i32> {
        if !label.is_ascii() || label.len() > MAX_LABEL_LENGTH || key.len() > MAX_KEY_LENGTH {
            return Err(BufferError::IllegalArgument);
        }

        let id = self.claim_slot()?;
        let record_offset = (id as usize * METADATA_LENGTH) as IndexT;

        self.metadata
            .put_i32(record_offset + TYPE_ID_OFFSET, type_id)?;
        self.metadata.set_memory(
            record_offset + KEY_OFFSET,
            MAX_KEY_LENGTH,
            0,
        )?;
        if !key.is_empty() {
            self.metadata
                .put_slice(record_offset + KEY_OFFSET, key, 0, key.len() as IndexT)?;
        }
        self.metadata
            .put_i32(record_offset + LABEL_LENGTH_OFFSET, label.len() as i32)?;
        self.metadata.set_memory(
            record_offset + LABEL_OFFSET,
            MAX_LABEL_LENGTH,
            0,
        )?;
        self.metadata.put_slice(
            record_offset + LABEL_OFFSET,
            label.as_bytes(),
            0,
            label.len() as IndexT,
        )?;

        let value_offset = id as usize * COUNTER_LENGTH;
        self.values
            .view(value_offset, COUNTER_LENGTH)
            .put_i64_ordered(0, 0)?;

        // Readers treat a record as live only once the state reads allocated,
        // so the state store must come after every field write.
        self.metadata
            .put_i32_release(record_offset, RECORD_ALLOCATED)?;

        Ok(id)
    }

    fn claim_slot(&mut self) -> Result<i32> {
        for id in 0..self.max_counters as i32 {
            let record_offset = (id as usize * METADATA_LENGTH) as IndexT;
            let state = self.metadata.get_i32_volatile(record_offset)?;

            if state != RECORD_UNUSED && state != RECORD_RECLAIMED {
                continue;
            }

            if self.concurrent {
                if self
                    .metadata
                    .compare_and_set_i32(record_offset, state, RECORD_CLAIMED)?
                {
                    return Ok(id);
                }
                // Lost the race for this slot; keep scanning
            } else {
                self.metadata.put_i32(record_offset, RECORD_CLAIMED)?;
                return Ok(id);
            }
        }

        Err(BufferError::InsufficientCapacity)
    }

    /// Release a counter id for reuse
    pub fn free(&mut self, id: i32) -> Result<()> {
        let record_offset = self.check_id(id)?;
        self.metadata.put_i32_release(record_offset, RECORD_RECLAIMED)
    }

    /// Handle on the value slot for `id`
    pub fn counter(&self, id: i32) -> Result<Counter> {
        self.check_id(id)?;
        Ok(Counter {
            slot: self.values.view(id as usize * COUNTER_LENGTH, COUNTER_LENGTH),
            id,
        })
    }

    /// Visit every allocated counter as `(id, type_id, label)`
    pub fn for_each<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(i32, i32, &str),
    {
        for id in 0..self.max_counters as i32 {
            let record_offset = (id as usize * METADATA_LENGTH) as IndexT;
            if self.metadata.get_i32_acquire(record_offset)? != RECORD_ALLOCATED {
                continue;
            }

            let type_id = self.metadata.get_i32(record_offset + TYPE_ID_OFFSET)?;
            let label_length =
                self.metadata.get_i32(record_offset + LABEL_LENGTH_OFFSET)? as usize;
            let label_start = (record_offset + LABEL_OFFSET) as usize;
            let label_bytes = &self.metadata[label_start..label_start + label_length];
            // Labels are validated as ASCII on allocation
            let label = ::std::str::from_utf8(label_bytes).unwrap_or("");

            handler(id, type_id, label);
        }
        Ok(())
    }

    fn check_id(&self, id: i32) -> Result<IndexT> {
        if id < 0 || id as usize >= self.max_counters {
            Err(BufferError::IllegalArgument)
        } else {
            Ok((id as usize * METADATA_LENGTH) as IndexT)
        }
    }
}

/// Fixed enumeration of the counters the driver registers about itself at
/// startup. Discriminants are the counter type ids and are stable for the
/// lifetime of the CnC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SystemCounterId {
    /// Bytes the sender has put on the wire
    BytesSent = 0,
    /// Bytes the receiver has taken off the wire
    BytesReceived = 1,
    /// Commands rejected by a full to-receiver queue
    ReceiverProxyFails = 2,
    /// Commands rejected by a full to-sender queue
    SenderProxyFails = 3,
    /// Commands rejected by a full to-conductor queue
    ConductorProxyFails = 4,
    /// NAK frames sent by the receiver
    NakMessagesSent = 5,
    /// NAK frames observed by the sender
    NakMessagesReceived = 6,
    /// Status messages sent to publishers
    StatusMessagesSent = 7,
    /// Status messages received from subscribers
    StatusMessagesReceived = 8,
    /// Heartbeat data frames sent
    HeartbeatsSent = 9,
    /// Heartbeat data frames received
    HeartbeatsReceived = 10,
    /// Data retransmits sent on NAK
    RetransmitsSent = 11,
    /// Flow control under-runs observed
    FlowControlUnderRuns = 12,
    /// Flow control over-runs observed
    FlowControlOverRuns = 13,
    /// Packets discarded as unparseable
    InvalidPackets = 14,
    /// Errors observed by the driver, regardless of origin
    Errors = 15,
    /// Socket sends that accepted fewer bytes than requested
    ShortSends = 16,
    /// Keepalive commands received from clients
    ClientKeepAlives = 17,
    /// Sends limited by the flow control window
    SenderFlowControlLimits = 18,
    /// Publications unblocked after a stalled claim
    UnblockedPublications = 19,
    /// Client commands unblocked after a stalled write
    UnblockedCommands = 20,
    /// Possible multicast TTL asymmetry events
    PossibleTtlAsymmetry = 21,
    /// Mode of the controllable idle strategy, writable by operators
    ControllableIdleStrategy = 22,
    /// Loss gaps filled by heartbeat rather than retransmit
    LossGapFills = 23,
    /// Clients timed out for missing keepalives
    ClientTimeouts = 24,
}

impl SystemCounterId {
    fn label(self) -> &'static str {
        use SystemCounterId::*;
        match self {
            BytesSent => "Bytes sent",
            BytesReceived => "Bytes received",
            ReceiverProxyFails => "Failed offers to ReceiverProxy",
            SenderProxyFails => "Failed offers to SenderProxy",
            ConductorProxyFails => "Failed offers to DriverConductorProxy",
            NakMessagesSent => "NAKs sent",
            NakMessagesReceived => "NAKs received",
            StatusMessagesSent => "Status Messages sent",
            StatusMessagesReceived => "Status Messages received",
            HeartbeatsSent => "Heartbeats sent",
            HeartbeatsReceived => "Heartbeats received",
            RetransmitsSent => "Retransmits sent",
            FlowControlUnderRuns => "Flow control under runs",
            FlowControlOverRuns => "Flow control over runs",
            InvalidPackets => "Invalid packets",
            Errors => "Errors",
            ShortSends => "Short sends",
            ClientKeepAlives => "Client keep-alives",
            SenderFlowControlLimits => "Sender flow control limits applied",
            UnblockedPublications => "Unblocked Publications",
            UnblockedCommands => "Unblocked Control Commands",
            PossibleTtlAsymmetry => "Possible TTL Asymmetry",
            ControllableIdleStrategy => "ControllableIdleStrategy status",
            LossGapFills => "Loss gap fills",
            ClientTimeouts => "Client liveness timeouts",
        }
    }

    /// Every system counter, in registration order
    pub const ALL: [SystemCounterId; 25] = {
        use SystemCounterId::*;
        [
            BytesSent,
            BytesReceived,
            ReceiverProxyFails,
            SenderProxyFails,
            ConductorProxyFails,
            NakMessagesSent,
            NakMessagesReceived,
            StatusMessagesSent,
            StatusMessagesReceived,
            HeartbeatsSent,
            HeartbeatsReceived,
            RetransmitsSent,
            FlowControlUnderRuns,
            FlowControlOverRuns,
            InvalidPackets,
            Errors,
            ShortSends,
            ClientKeepAlives,
            SenderFlowControlLimits,
            UnblockedPublications,
            UnblockedCommands,
            PossibleTtlAsymmetry,
            ControllableIdleStrategy,
            LossGapFills,
            ClientTimeouts,
        ]
    };
}

/// The system counter registry. Registered exactly once during conclude;
/// counter ids are positionally stable thereafter.
pub struct SystemCounters {
    counters: Vec<Counter>,
}

impl SystemCounters {
    /// Register every [`SystemCounterId`] with the manager, in order
    pub fn new(manager: &mut CountersManager) -> Result<SystemCounters> {
        let mut counters = Vec::with_capacity(SystemCounterId::ALL.len());
        for &id in SystemCounterId::ALL.iter() {
            let counter_id = manager.allocate(id as i32, &[], id.label())?;
            counters.push(manager.counter(counter_id)?);
        }
        Ok(SystemCounters { counters })
    }

    /// Handle on the slot backing `id`
    pub fn get(&self, id: SystemCounterId) -> Counter {
        self.counters[id as usize]
    }

    /// Errors observed by the driver
    pub fn errors(&self) -> Counter {
        self.get(SystemCounterId::Errors)
    }

    /// Failed offers to the sender's command queue
    pub fn sender_proxy_fails(&self) -> Counter {
        self.get(SystemCounterId::SenderProxyFails)
    }

    /// Failed offers to the receiver's command queue
    pub fn receiver_proxy_fails(&self) -> Counter {
        self.get(SystemCounterId::ReceiverProxyFails)
    }

    /// Failed offers to the conductor's command queue
    pub fn conductor_proxy_fails(&self) -> Counter {
        self.get(SystemCounterId::ConductorProxyFails)
    }

    /// Mode slot read by the controllable idle strategy
    pub fn controllable_idle_strategy(&self) -> Counter {
        self.get(SystemCounterId::ControllableIdleStrategy)
    }

    /// Keepalives received from clients
    pub fn client_keep_alives(&self) -> Counter {
        self.get(SystemCounterId::ClientKeepAlives)
    }

    /// Clients timed out for missing keepalives
    pub fn client_timeouts(&self) -> Counter {
        self.get(SystemCounterId::ClientTimeouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(bytes: &mut Vec<u8>, counters: usize) -> (RawBuffer, RawBuffer) {
        let metadata_len = counters * METADATA_LENGTH;
        let values_len = counters * COUNTER_LENGTH;
        bytes.resize(metadata_len + values_len, 0);
        let whole = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        (whole.view(0, metadata_len), whole.view(metadata_len, values_len))
    }

    #[test]
    fn allocates_sequential_ids() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 4);
        let mut manager = CountersManager::new(metadata, values, false);

        assert_eq!(manager.allocate(1, &[], "first"), Ok(0));
        assert_eq!(manager.allocate(1, &[], "second"), Ok(1));
    }

    #[test]
    fn freed_ids_are_reused() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 2);
        let mut manager = CountersManager::new(metadata, values, false);

        let a = manager.allocate(1, &[], "a").unwrap();
        let _b = manager.allocate(1, &[], "b").unwrap();
        assert_eq!(
            manager.allocate(1, &[], "c"),
            Err(BufferError::InsufficientCapacity)
        );

        manager.free(a).unwrap();
        assert_eq!(manager.allocate(1, &[], "c"), Ok(a));
    }

    #[test]
    fn concurrent_flavor_allocates_too() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 4);
        let mut manager = CountersManager::new(metadata, values, true);

        assert_eq!(manager.allocate(1, &[], "cas"), Ok(0));
        assert_eq!(manager.allocate(1, &[], "cas"), Ok(1));
    }

    #[test]
    fn rejects_non_ascii_label() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 2);
        let mut manager = CountersManager::new(metadata, values, false);

        assert_eq!(
            manager.allocate(1, &[], "héartbeats"),
            Err(BufferError::IllegalArgument)
        );
    }

    #[test]
    fn counter_handles_share_the_slot() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 2);
        let mut manager = CountersManager::new(metadata, values, false);

        let id = manager.allocate(1, b"key", "shared").unwrap();
        let counter = manager.counter(id).unwrap();
        let alias = counter;

        counter.increment();
        alias.add(2);
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn for_each_reports_labels() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 4);
        let mut manager = CountersManager::new(metadata, values, false);

        manager.allocate(9, &[], "visible").unwrap();
        let freed = manager.allocate(9, &[], "gone").unwrap();
        manager.free(freed).unwrap();

        let mut seen = Vec::new();
        manager
            .for_each(|id, type_id, label| seen.push((id, type_id, label.to_string())))
            .unwrap();
        assert_eq!(seen, vec![(0, 9, "visible".to_string())]);
    }

    #[test]
    fn system_counters_register_every_id() {
        let mut bytes = Vec::new();
        let (metadata, values) = buffers(&mut bytes, 32);
        let mut manager = CountersManager::new(metadata, values, false);

        let system = SystemCounters::new(&mut manager).unwrap();
        assert_eq!(system.errors().get(), 0);
        assert_eq!(
            system.get(SystemCounterId::ControllableIdleStrategy).id(),
            SystemCounterId::ControllableIdleStrategy as i32
        );

        system.sender_proxy_fails().increment();
        assert_eq!(system.sender_proxy_fails().get(), 1);
        // The same slot through the manager agrees
        let direct = manager
            .counter(SystemCounterId::SenderProxyFails as i32)
            .unwrap();
        assert_eq!(direct.get(), 1);
    }
}
