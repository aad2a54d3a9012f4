//! Remote port allocation
//!
//! Occupancy comes from the `port:{server_id}:{port}` reservation keys; the
//! allocator itself never writes them. Reservation happens in the traffic
//! manager under its port mutex, together with the master-side create, so
//! concurrent creates cannot race on the same gap.

use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

use ret2frp_cache::Cache;

use crate::error::EngineError;

/// Picks free remote ports for a tunnel server out of a configured range
pub struct PortAllocator {
    cache: Cache,
}

impl PortAllocator {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Return `count` distinct free ports in `[lo, hi]` for `server_id`.
    ///
    /// The scan starts at a uniformly random seed (the only randomness),
    /// walks up to `hi`, then down from the seed to `lo`, and fails with
    /// [`EngineError::PortsExhausted`] when fewer than `count` ports are
    /// free.
    pub async fn allocate(
        &self,
        server_id: &str,
        (lo, hi): (u16, u16),
        count: usize,
    ) -> Result<Vec<u16>, EngineError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let occupied = self.occupied_ports(server_id).await?;
        let seed = rand::thread_rng().gen_range(lo..=hi);
        debug!(server_id, lo, hi, seed, occupied = occupied.len(), "allocating remote ports");

        let mut free = Vec::with_capacity(count);
        for port in seed..=hi {
            if !occupied.contains(&port) {
                free.push(port);
                if free.len() == count {
                    return Ok(free);
                }
            }
        }
        for port in (lo..seed).rev() {
            if !occupied.contains(&port) {
                free.push(port);
                if free.len() == count {
                    return Ok(free);
                }
            }
        }

        Err(EngineError::PortsExhausted {
            server_id: server_id.to_string(),
            wanted: count,
            lo,
            hi,
        })
    }

    /// Ports with a live reservation key. Keys that do not parse as
    /// `port:{server_id}:{u16}` are ignored; a loose backend glob may hand
    /// back extra-segment matches.
    async fn occupied_ports(&self, server_id: &str) -> Result<HashSet<u16>, EngineError> {
        let pattern = format!("port:{server_id}:*");
        let keys = self.cache.keys(&pattern).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let segments: Vec<&str> = key.split(':').collect();
                if segments.len() != 3 {
                    return None;
                }
                segments[2].parse().ok()
            })
            .collect())
    }
}
