//! Flow record aggregation.
//!
//! Consumes decoded flow records from the NetFlow boundary and folds their
//! volumes into per-port and per-switch counters. Records arrive already
//! decoded; no wire parsing happens here, and no ordering is assumed across
//! records from different sources.

use crate::error::{Result, SimError};
use crate::store::{ChangeKind, StateStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A decoded flow record as delivered by the NetFlow boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// IP protocol number
    pub protocol: u8,
    pub bytes: u64,
    pub packets: u64,
    /// Port the flow entered on, if reported
    pub ingress_port: Option<u16>,
    /// Port the flow left on, if reported
    pub egress_port: Option<u16>,
}

/// Aggregates decoded flow records into the store's traffic counters.
pub struct FlowAggregator {
    store: Arc<StateStore>,
    unresolved: AtomicU64,
}

impl FlowAggregator {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            unresolved: AtomicU64::new(0),
        }
    }

    /// Ingests one record.
    ///
    /// The owning switch is resolved by port id, first switch in id order
    /// wins. The ingress endpoint increments the port's inbound counters,
    /// the egress endpoint its outbound counters, and both add to the
    /// switch aggregate. A record with any unresolvable endpoint bumps the
    /// unresolved counter and applies nothing for that endpoint.
    pub fn ingest(&self, record: &FlowRecord) -> Result<()> {
        let now = Utc::now();
        let mut unresolved = false;

        for (port, inbound) in [(record.ingress_port, true), (record.egress_port, false)] {
            let Some(port) = port else { continue };
            match self.resolve_switch(port) {
                Some((switch_id, port_id)) => {
                    self.store.update(
                        ChangeKind::TrafficUpdated {
                            switch_id: switch_id.clone(),
                        },
                        |state| {
                            let stats = state.traffic.entry(switch_id.clone()).or_default();
                            stats.record_flow(port_id, now, record.bytes, record.packets, inbound);
                            Ok(())
                        },
                    )?;
                }
                None => unresolved = true,
            }
        }

        if unresolved {
            let total = self.unresolved.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                src = %record.src_addr,
                dst = %record.dst_addr,
                unresolved = total,
                "flow record references unknown port"
            );
        }
        Ok(())
    }

    /// Ingests a batch, logging per-record failures without stopping.
    pub fn ingest_all(&self, records: &[FlowRecord]) {
        for record in records {
            if let Err(e) = self.ingest(record) {
                warn!(error = %e, "flow record dropped");
            }
        }
    }

    /// Number of records that referenced an unknown port.
    pub fn unresolved(&self) -> u64 {
        self.unresolved.load(Ordering::Relaxed)
    }

    /// Resets the unresolved counter.
    pub fn reset(&self) {
        self.unresolved.store(0, Ordering::Relaxed);
    }

    /// Finds the first switch (ascending id order) owning the port id.
    fn resolve_switch(&self, port: u16) -> Option<(String, u8)> {
        let port_id = u8::try_from(port).ok()?;
        let snapshot = self.store.read();
        snapshot
            .state
            .switches
            .iter()
            .find(|(_, sw)| sw.port(port_id).is_some())
            .map(|(id, _)| (id.clone(), port_id))
    }
}

/// Validates a decoded record before ingestion.
///
/// The boundary decoder occasionally produces zero-volume records for
/// template refreshes; those are ignorable rather than errors.
pub fn is_ingestible(record: &FlowRecord) -> Result<()> {
    if record.bytes == 0 && record.packets == 0 {
        return Err(SimError::Validation("empty flow record".to_string()));
    }
    Ok(())
}
