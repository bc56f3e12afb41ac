//! UUID-derived identifier strategies.
//!
//! Both derive a 64-bit id from the high half of a generated UUID. The
//! random strategy relies on v4 collision odds; the time-based strategy
//! builds v1 UUIDs whose 60-bit timestamps come from the durable
//! [`ClockSync`](super::clock_sync::ClockSync) pair, so distinct timestamps
//! give distinct high halves even across restarts.

use std::path::Path;

use rand::RngCore;
use uuid::Uuid;

use super::clock_sync::ClockSync;
use crate::error::Result;

const VERSION_TIME_BASED: u16 = 1 << 12;

enum Kind {
    Random,
    Time {
        sync: ClockSync,
        /// 2 clock-seq + 6 node bytes, randomized per process.
        node: [u8; 8],
    },
}

/// Identifier allocator deriving ids from UUIDs. Globally unique in
/// expectation (random) or per synchronizer directory (time-based); the
/// sequence name is ignored.
pub struct UuidAllocator {
    kind: Kind,
}

impl UuidAllocator {
    pub fn random() -> Self {
        Self { kind: Kind::Random }
    }

    /// Time-based strategy. `dir` locates the clock synchronizer pair;
    /// `None` uses `tern-clock-sync` under the system temp directory.
    pub fn time_based(dir: Option<&Path>) -> Result<Self> {
        let default_dir;
        let dir = match dir {
            Some(d) => d,
            None => {
                default_dir = std::env::temp_dir().join("tern-clock-sync");
                &default_dir
            }
        };
        let sync = ClockSync::open(dir)?;
        let mut node = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut node);
        // Multicast bit set per RFC 4122 for a node id that is not a MAC.
        node[2] |= 0x01;
        Ok(Self {
            kind: Kind::Time { sync, node },
        })
    }

    fn next_uuid(&self) -> Result<Uuid> {
        match &self.kind {
            Kind::Random => Ok(Uuid::new_v4()),
            Kind::Time { sync, node } => {
                let ts = sync.next_timestamp()?;
                let time_low = (ts & 0xFFFF_FFFF) as u32;
                let time_mid = ((ts >> 32) & 0xFFFF) as u16;
                let time_hi_version = (((ts >> 48) & 0x0FFF) as u16) | VERSION_TIME_BASED;
                Ok(Uuid::from_fields(time_low, time_mid, time_hi_version, node))
            }
        }
    }
}

impl super::IdAllocator for UuidAllocator {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn allocate(&self, _sequence: &str) -> Result<i64> {
        let (high, _low) = self.next_uuid()?.as_u64_pair();
        Ok(high as i64)
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        match &self.kind {
            Kind::Random => Ok(()),
            Kind::Time { sync, .. } => sync.release(),
        }
    }
}
