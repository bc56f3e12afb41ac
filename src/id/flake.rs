//! Snowflake-style distributed time-sequence allocator.
//!
//! Ids pack `[41-bit ms since epoch][10-bit worker id][12-bit sequence]`.
//! Allocation is serialized behind one mutex; the shared timestamp/sequence
//! state makes that the simplest correct arrangement and an allocation is
//! O(microseconds), so the bottleneck is deliberate.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use crate::error::Result;

/// Fixed epoch: 2020-01-01T00:00:00Z, in milliseconds since Unix epoch.
pub const FLAKE_EPOCH_MS: i64 = 1_577_836_800_000;

pub const WORKER_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = WORKER_BITS + SEQUENCE_BITS;

struct FlakeState {
    last_ts: i64,
    sequence: u16,
}

/// Distributed time-sequence identifier allocator.
///
/// The only strategy whose ids are unique across independently-running
/// processes without shared coordination, provided each process carries a
/// distinct worker id.
pub struct FlakeAllocator {
    worker_id: u16,
    state: Mutex<FlakeState>,
}

impl FlakeAllocator {
    /// `configured_worker_id == 0` derives an id from a network interface
    /// hardware address, falling back to a random one.
    pub fn new(configured_worker_id: u16) -> Result<Self> {
        let worker_id = resolve_worker_id(configured_worker_id);
        Ok(Self {
            worker_id,
            state: Mutex::new(FlakeState {
                last_ts: -1,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    pub fn next_id(&self) -> Result<i64> {
        let mut state = self.state.lock();
        let mut now = current_millis();

        if now < state.last_ts {
            // Wall clock went backwards. Ids never rewind; block until the
            // clock catches up with what we already issued.
            warn!(
                now_ms = now,
                last_ms = state.last_ts,
                "flake.clock_regression"
            );
            while now < state.last_ts {
                thread::sleep(Duration::from_millis(1));
                now = current_millis();
            }
        }

        if now == state.last_ts {
            state.sequence = state.sequence.wrapping_add(1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // 4096 ids issued within one millisecond; spin to the next.
                while now <= state.last_ts {
                    now = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ts = now;

        let id = ((now - FLAKE_EPOCH_MS) << TIMESTAMP_SHIFT)
            | ((self.worker_id as i64) << SEQUENCE_BITS)
            | state.sequence as i64;
        if id < 0 {
            warn!(id, "flake.negative_id");
        }
        Ok(id)
    }
}

impl super::IdAllocator for FlakeAllocator {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn allocate(&self, _sequence: &str) -> Result<i64> {
        self.next_id()
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn resolve_worker_id(configured: u16) -> u16 {
    if configured != 0 {
        if configured > MAX_WORKER_ID {
            let replacement = rand::thread_rng().gen_range(0..=MAX_WORKER_ID);
            warn!(
                configured_worker_id = configured,
                replacement, "flake.worker_id.out_of_range"
            );
            return replacement;
        }
        return configured;
    }
    match derived_worker_id() {
        Some(id) => id,
        None => rand::thread_rng().gen_range(0..=MAX_WORKER_ID),
    }
}

/// Derives a worker id from the first non-loopback interface hardware
/// address, XORed with a random byte so two hosts sharing a cloned MAC do
/// not collide deterministically.
#[cfg(target_os = "linux")]
fn derived_worker_id() -> Option<u16> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_str() == Some("lo") {
            continue;
        }
        let Ok(addr) = std::fs::read_to_string(entry.path().join("address")) else {
            continue;
        };
        let bytes: Vec<u8> = addr
            .trim()
            .split(':')
            .filter_map(|part| u8::from_str_radix(part, 16).ok())
            .collect();
        if bytes.len() != 6 || bytes.iter().all(|b| *b == 0) {
            continue;
        }
        let base = ((bytes[4] as u16) << 8) | bytes[5] as u16;
        let salt: u8 = rand::thread_rng().gen();
        return Some((base ^ salt as u16) & MAX_WORKER_ID);
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn derived_worker_id() -> Option<u16> {
    None
}

// 41 timestamp + 10 worker + 12 sequence + sign bit == 64
const _: () = assert!(41 + WORKER_BITS + SEQUENCE_BITS + 1 == 64);
