//! Rolling traffic statistics for switches and ports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Smoothing factor for the exponential moving average of rates.
pub const RATE_SMOOTHING: f64 = 0.2;

/// Maximum number of rate samples retained per port (FIFO eviction).
pub const RATE_HISTORY_LIMIT: usize = 60;

/// One point-in-time rate observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub timestamp: DateTime<Utc>,
    pub packet_rate: f64,
    pub byte_rate: f64,
}

/// Per-port traffic counters and smoothed rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortTrafficStats {
    /// Total synthetic packets observed
    pub total_packets: u64,
    /// Total synthetic bytes observed
    pub total_bytes: u64,
    /// Flow bytes received on this port
    pub bytes_in: u64,
    /// Flow bytes sent from this port
    pub bytes_out: u64,
    /// Flow packets received on this port
    pub packets_in: u64,
    /// Flow packets sent from this port
    pub packets_out: u64,
    /// Smoothed packets-per-second rate
    pub packet_rate: f64,
    /// Smoothed bytes-per-second rate
    pub byte_rate: f64,
    /// Timestamp of the last packet event
    pub last_update: Option<DateTime<Utc>>,
    /// Bounded rolling rate history
    #[serde(default)]
    pub history: VecDeque<RateSample>,
}

impl PortTrafficStats {
    /// Records one synthetic packet and returns the instantaneous
    /// `(packet_rate, byte_rate)` pair used for the switch aggregate.
    ///
    /// Rates combine the instantaneous inter-event rate with the prior
    /// smoothed value via an exponential moving average. The first event on
    /// a port (no prior timestamp) only establishes the baseline.
    pub fn record_packet(&mut self, now: DateTime<Utc>, size: u64) -> Option<(f64, f64)> {
        self.total_packets += 1;
        self.total_bytes += size;

        let prev = self.last_update.replace(now)?;
        let dt = (now - prev).num_milliseconds() as f64 / 1000.0;
        if dt <= 0.0 {
            return None;
        }

        let inst_packet_rate = 1.0 / dt;
        let inst_byte_rate = size as f64 / dt;
        self.packet_rate = RATE_SMOOTHING * inst_packet_rate + (1.0 - RATE_SMOOTHING) * self.packet_rate;
        self.byte_rate = RATE_SMOOTHING * inst_byte_rate + (1.0 - RATE_SMOOTHING) * self.byte_rate;

        self.history.push_back(RateSample {
            timestamp: now,
            packet_rate: self.packet_rate,
            byte_rate: self.byte_rate,
        });
        while self.history.len() > RATE_HISTORY_LIMIT {
            self.history.pop_front();
        }

        Some((inst_packet_rate, inst_byte_rate))
    }
}

/// Per-switch traffic aggregate plus its per-port breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchTrafficStats {
    /// Total packets across all ports
    pub total_packets: u64,
    /// Total bytes across all ports
    pub total_bytes: u64,
    /// Smoothed switch-level packets-per-second rate
    pub packet_rate: f64,
    /// Smoothed switch-level bytes-per-second rate
    pub byte_rate: f64,
    /// Timestamp of the last update
    pub last_update: Option<DateTime<Utc>>,
    /// Per-port statistics
    #[serde(default)]
    pub ports: BTreeMap<u8, PortTrafficStats>,
}

impl SwitchTrafficStats {
    /// Records one synthetic packet on a port, updating both the port entry
    /// and the switch aggregate with the same smoothing.
    pub fn record_packet(&mut self, port_id: u8, now: DateTime<Utc>, size: u64) {
        self.total_packets += 1;
        self.total_bytes += size;
        self.last_update = Some(now);

        let port = self.ports.entry(port_id).or_default();
        if let Some((inst_packet_rate, inst_byte_rate)) = port.record_packet(now, size) {
            self.packet_rate =
                RATE_SMOOTHING * inst_packet_rate + (1.0 - RATE_SMOOTHING) * self.packet_rate;
            self.byte_rate = RATE_SMOOTHING * inst_byte_rate + (1.0 - RATE_SMOOTHING) * self.byte_rate;
        }
    }

    /// Records a decoded flow record's volume against a port.
    ///
    /// `inbound` selects the ingress counters, otherwise egress.
    pub fn record_flow(&mut self, port_id: u8, now: DateTime<Utc>, bytes: u64, packets: u64, inbound: bool) {
        self.total_packets += packets;
        self.total_bytes += bytes;
        self.last_update = Some(now);

        let port = self.ports.entry(port_id).or_default();
        if inbound {
            port.bytes_in += bytes;
            port.packets_in += packets;
        } else {
            port.bytes_out += bytes;
            port.packets_out += packets;
        }
    }

    /// Resets all counters, rates, and history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_first_packet_establishes_baseline() {
        let mut stats = PortTrafficStats::default();
        let now = Utc::now();

        assert_eq!(stats.record_packet(now, 500), None);
        assert_eq!(stats.total_packets, 1);
        assert_eq!(stats.total_bytes, 500);
        assert_eq!(stats.packet_rate, 0.0);
        assert!(stats.history.is_empty());
    }

    #[test]
    fn test_ema_smoothing() {
        let mut stats = PortTrafficStats::default();
        let t0 = Utc::now();
        stats.record_packet(t0, 1000);

        // One packet per second: instantaneous rate 1.0.
        let (pr, br) = stats.record_packet(t0 + Duration::seconds(1), 1000).unwrap();
        assert!((pr - 1.0).abs() < 1e-9);
        assert!((br - 1000.0).abs() < 1e-9);
        // EMA from zero: 0.2 * 1.0
        assert!((stats.packet_rate - 0.2).abs() < 1e-9);
        assert!((stats.byte_rate - 200.0).abs() < 1e-9);

        stats.record_packet(t0 + Duration::seconds(2), 1000);
        assert!((stats.packet_rate - (0.2 + 0.8 * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut stats = PortTrafficStats::default();
        let t0 = Utc::now();
        for i in 0..(RATE_HISTORY_LIMIT as i64 + 20) {
            stats.record_packet(t0 + Duration::seconds(i), 64);
        }
        assert_eq!(stats.history.len(), RATE_HISTORY_LIMIT);
        // Oldest samples were evicted first.
        let first = stats.history.front().unwrap();
        assert!(first.timestamp > t0);
    }

    #[test]
    fn test_switch_aggregate_tracks_ports() {
        let mut stats = SwitchTrafficStats::default();
        let t0 = Utc::now();
        stats.record_packet(1, t0, 100);
        stats.record_packet(2, t0, 100);
        stats.record_packet(1, t0 + Duration::seconds(1), 100);

        assert_eq!(stats.total_packets, 3);
        assert_eq!(stats.total_bytes, 300);
        assert_eq!(stats.ports.len(), 2);
        assert!(stats.packet_rate > 0.0);
    }

    #[test]
    fn test_flow_counters_split_by_direction() {
        let mut stats = SwitchTrafficStats::default();
        let now = Utc::now();
        stats.record_flow(5, now, 4000, 8, true);
        stats.record_flow(5, now, 2000, 4, false);

        let port = &stats.ports[&5];
        assert_eq!(port.bytes_in, 4000);
        assert_eq!(port.packets_in, 8);
        assert_eq!(port.bytes_out, 2000);
        assert_eq!(port.packets_out, 4);
        assert_eq!(stats.total_bytes, 6000);
        assert_eq!(stats.total_packets, 12);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stats = SwitchTrafficStats::default();
        let now = Utc::now();
        stats.record_packet(1, now, 100);
        stats.reset();
        assert_eq!(stats, SwitchTrafficStats::default());
    }
}
