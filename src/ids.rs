//! Time-ordered 64-bit identifiers.
//!
//! Layout (most significant first): 1 unused bit, 41 bits of milliseconds
//! since 2024-01-01T00:00:00Z, 10 bits of node id, 12 bits of sequence.

use std::sync::atomic::{AtomicU64, Ordering};

use hourglass_rs::SafeTimeProvider;
use parking_lot::Mutex;

use crate::config::MAX_NODE_ID;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << 41) - 1;

/// 2024-01-01T00:00:00Z in unix milliseconds
pub const EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// source of unique identifiers for every entity the engine creates
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// snowflake-style generator reading its clock from a time provider
pub struct SnowflakeGenerator {
    node_id: u64,
    time: SafeTimeProvider,
    state: Mutex<SnowflakeState>,
}

struct SnowflakeState {
    last_millis: u64,
    sequence: u64,
}

impl SnowflakeGenerator {
    pub fn new(node_id: u16, time: SafeTimeProvider) -> Self {
        Self {
            node_id: u64::from(node_id.min(MAX_NODE_ID)),
            time,
            state: Mutex::new(SnowflakeState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    fn elapsed_millis(&self) -> u64 {
        let millis = self.time.now().timestamp_millis() - EPOCH_MILLIS;
        u64::try_from(millis).unwrap_or(0) & TIMESTAMP_MASK
    }

    /// split an id back into (millis since epoch, node, sequence)
    pub fn decompose(id: u64) -> (u64, u64, u64) {
        (
            id >> (NODE_BITS + SEQUENCE_BITS),
            (id >> SEQUENCE_BITS) & u64::from(MAX_NODE_ID),
            id & MAX_SEQUENCE,
        )
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> u64 {
        let now = self.elapsed_millis();
        let mut state = self.state.lock();

        if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        } else {
            // clock stood still or moved backwards: keep counting on the last
            // millisecond, borrowing the next one once the sequence runs out
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                state.last_millis += 1;
                state.sequence = 0;
            }
        }

        (state.last_millis << (NODE_BITS + SEQUENCE_BITS))
            | (self.node_id << SEQUENCE_BITS)
            | state.sequence
    }
}

/// counter starting at 1, for deterministic tests and fixtures
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
