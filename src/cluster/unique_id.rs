//! Cluster-wide unique identifiers
//!
//! An id packs the milliseconds elapsed since [`EPOCH_MILLIS`] into the high
//! 48 bits of a `u64` and the server number into the low 16 bits. Server
//! numbers are unique among live servers and each server issues strictly
//! increasing deltas, so ids never repeat and sort by issue time.
//!
//! The text form is the big-endian bytes in URL-safe base64 without padding.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{ClusterError, ClusterResult};

/// Zero point of id deltas, 2009-09-22T00:00:00Z
pub const EPOCH_MILLIS: i64 = 1_253_577_600_000;

const SERVER_BITS: u32 = 16;
const SERVER_MASK: u64 = (1 << SERVER_BITS) - 1;
const DELTA_MASK: u64 = (1 << (64 - SERVER_BITS)) - 1;

/// Globally unique, time-ordered identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterUniqueId(u64);

impl ClusterUniqueId {
    pub fn from_parts(server_number: u16, delta_millis: u64) -> Self {
        Self(((delta_millis & DELTA_MASK) << SERVER_BITS) | server_number as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Number of the server that issued the id
    pub fn server_number(&self) -> u16 {
        (self.0 & SERVER_MASK) as u16
    }

    /// Milliseconds between the epoch and issue time
    pub fn delta_millis(&self) -> u64 {
        self.0 >> SERVER_BITS
    }

    /// Issue time
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let millis = EPOCH_MILLIS.checked_add(i64::try_from(self.delta_millis()).ok()?)?;
        DateTime::from_timestamp_millis(millis)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.to_be_bytes())
    }
}

impl fmt::Display for ClusterUniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ClusterUniqueId {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s.trim())
            .map_err(|e| ClusterError::InvalidUniqueId(e.to_string()))?;
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ClusterError::InvalidUniqueId(format!("expected 8 bytes, got {}", b.len())))?;
        Ok(Self(u64::from_be_bytes(raw)))
    }
}

/// Issues ids for one settled server number
#[derive(Debug)]
pub struct UniqueIdGenerator {
    server_number: u16,
    clock: Arc<dyn Clock>,
    previous_delta: Mutex<u64>,
}

impl UniqueIdGenerator {
    pub fn new(server_number: u32, clock: Arc<dyn Clock>) -> ClusterResult<Self> {
        let server_number =
            u16::try_from(server_number).map_err(|_| ClusterError::ServerNumberOverflow(server_number))?;
        Ok(Self {
            server_number,
            clock,
            previous_delta: Mutex::new(0),
        })
    }

    pub fn server_number(&self) -> u16 {
        self.server_number
    }

    /// Next id, strictly greater than every id issued before by this generator
    pub fn next_id(&self) -> ClusterUniqueId {
        let mut previous = self.previous_delta.lock();
        let delta = loop {
            let delta = self.current_delta();
            if delta > *previous {
                break delta;
            }
            if delta < *previous {
                // Clock stepped back; keep counting from the last issued value.
                break *previous + 1;
            }
            std::hint::spin_loop();
        };
        *previous = delta;
        ClusterUniqueId::from_parts(self.server_number, delta)
    }

    fn current_delta(&self) -> u64 {
        (self.clock.now_millis() - EPOCH_MILLIS).max(0) as u64
    }
}
