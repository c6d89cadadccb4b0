// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;
use std::time::Instant;

use log::*;
use serde::Serialize;

use super::rtt::RttEstimator;
use super::space::SentPacket;
use crate::congestion_control;
use crate::congestion_control::CongestionController;
use crate::RecoveryConfig;

/// A network path on which QUIC packets can be sent.
pub struct Path {
    /// Congestion controller of the path.
    pub(crate) congestion: Box<dyn CongestionController>,

    /// RTT estimation of the path.
    pub(crate) rtt: RttEstimator,

    /// The sum of the size in bytes of all in-flight packets.
    pub(crate) bytes_in_flight: u64,

    /// Statistics about the path.
    pub(crate) stats: PathStats,

    /// Trace id.
    trace_id: String,
}

impl Path {
    /// Create a new path
    pub(crate) fn new(conf: &RecoveryConfig, trace_id: &str) -> Self {
        Self {
            congestion: congestion_control::build_congestion_controller(conf),
            rtt: RttEstimator::new(conf.initial_rtt),
            bytes_in_flight: 0,
            stats: PathStats::default(),
            trace_id: trace_id.to_string(),
        }
    }

    /// Base retransmission timer used before any timer-based retransmission.
    pub fn retransmit_timer(&self) -> Duration {
        self.rtt.pto_base()
    }

    /// Whether the congestion window allows sending more data.
    pub fn can_send(&self) -> bool {
        self.bytes_in_flight < self.congestion.congestion_window()
    }

    /// Return the congestion window of the path.
    pub fn congestion_window(&self) -> u64 {
        self.congestion.congestion_window()
    }

    /// Return the bytes in flight of the path.
    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    /// Return the RTT estimator of the path.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Return the statistics of the path.
    pub fn stats(&self) -> &PathStats {
        &self.stats
    }

    pub(crate) fn on_sent(&mut self, pkt: &SentPacket, now: Instant) {
        self.stats.sent_count = self.stats.sent_count.saturating_add(1);
        self.stats.sent_bytes = self.stats.sent_bytes.saturating_add(pkt.sent_size as u64);

        if pkt.in_flight() {
            self.bytes_in_flight = self.bytes_in_flight.saturating_add(pkt.sent_size as u64);
            self.congestion.on_sent(now, pkt, self.bytes_in_flight);
        }

        trace!(
            "{} sent packet {:?} cwnd={} inflight={}",
            self.trace_id,
            pkt,
            self.congestion.congestion_window(),
            self.bytes_in_flight
        );
    }

    pub(crate) fn on_acked(&mut self, pkt: &SentPacket, now: Instant) {
        self.stats.acked_count = self.stats.acked_count.saturating_add(1);
        self.stats.acked_bytes = self.stats.acked_bytes.saturating_add(pkt.sent_size as u64);

        if !pkt.in_flight() {
            return;
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(pkt.sent_size as u64);
        self.congestion
            .on_ack(pkt, now, &self.rtt, self.bytes_in_flight);
    }

    /// Account a packet declared lost. Return the bytes it removed from
    /// flight.
    pub(crate) fn on_lost(&mut self, pkt: &SentPacket) -> u64 {
        self.stats.lost_count = self.stats.lost_count.saturating_add(1);
        self.stats.lost_bytes = self.stats.lost_bytes.saturating_add(pkt.sent_size as u64);

        if !pkt.in_flight() {
            return 0;
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(pkt.sent_size as u64);
        pkt.sent_size as u64
    }

    /// Account a packet taken out of flight to be resent as a tail loss
    /// probe. It is not counted as lost.
    pub(crate) fn on_tail_loss_probe(&mut self, pkt: &SentPacket) {
        self.stats.tlp_count = self.stats.tlp_count.saturating_add(1);
        if pkt.in_flight() {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(pkt.sent_size as u64);
        }
    }

    /// Stop tracking a packet of a discarded packet number space.
    pub(crate) fn on_discarded(&mut self, pkt: &SentPacket) {
        if pkt.in_flight() {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(pkt.sent_size as u64);
        }
    }

    /// Signal one congestion event for a loss sweep, identified by its newest
    /// lost packet.
    pub(crate) fn on_congestion_event(
        &mut self,
        largest_lost: &SentPacket,
        lost_bytes: u64,
        timer_based: bool,
        now: Instant,
    ) {
        self.congestion.on_congestion_event(
            now,
            largest_lost,
            timer_based,
            lost_bytes,
            self.bytes_in_flight,
        );
        trace!(
            "{} congestion event pn={} timer_based={} {:?}",
            self.trace_id,
            largest_lost.pkt_num,
            timer_based,
            self
        );
    }

    /// Signal newly reported ECN-CE marks. Return whether the window was cut.
    pub(crate) fn on_ecn_ce(&mut self, now: Instant) -> bool {
        if !self.congestion.on_ecn_ce(now) {
            return false;
        }
        self.stats.ecn_ce_events = self.stats.ecn_ce_events.saturating_add(1);
        debug!("{} ECN-CE congestion event {:?}", self.trace_id, self);
        true
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.congestion)?;
        write!(f, " inflight={}", self.bytes_in_flight)?;
        write!(f, " srtt={:?}", self.rtt.smoothed_rtt())?;
        Ok(())
    }
}

/// Statistics about a path.
#[repr(C)]
#[derive(Debug, Default, Clone, Serialize)]
pub struct PathStats {
    /// The number of QUIC packets sent.
    pub sent_count: u64,

    /// The number of sent bytes.
    pub sent_bytes: u64,

    /// The number of QUIC packets acknowledged.
    pub acked_count: u64,

    /// The number of acknowledged bytes.
    pub acked_bytes: u64,

    /// The number of QUIC packets declared lost and handed back for
    /// retransmission.
    pub lost_count: u64,

    /// The number of lost bytes.
    pub lost_bytes: u64,

    /// The number of retransmissions later found to be unnecessary.
    pub spurious_count: u64,

    /// The number of congestion events caused by ECN-CE marks.
    pub ecn_ce_events: u64,

    /// The number of tail loss probes sent.
    pub tlp_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    #[test]
    fn path_bytes_in_flight() {
        let conf = RecoveryConfig::default();
        let mut path = Path::new(&conf, "test");
        let now = Instant::now();
        assert_eq!(path.retransmit_timer(), path.rtt().pto_base());
        assert_eq!(path.congestion_window(), 12000);

        let mut pkts = Vec::new();
        for pn in 0..10 {
            let pkt = SentPacket::new(pn, now, PacketType::OneRTT, 1200);
            path.on_sent(&pkt, now);
            pkts.push(pkt);
        }
        assert_eq!(path.bytes_in_flight(), 12000);
        assert!(!path.can_send());

        // Pure control packets are not counted in flight
        let mut ack_only = SentPacket::new(10, now, PacketType::OneRTT, 50);
        ack_only.is_pure_control = true;
        path.on_sent(&ack_only, now);
        assert_eq!(path.bytes_in_flight(), 12000);
        assert_eq!(path.stats().sent_count, 11);
        path.on_acked(&ack_only, now);
        assert_eq!(path.bytes_in_flight(), 12000);
        assert_eq!(path.congestion_window(), 12000);

        path.on_acked(&pkts[0], now);
        assert_eq!(path.bytes_in_flight(), 10800);
        assert_eq!(path.congestion_window(), 13200);
        assert!(path.can_send());

        let lost = path.on_lost(&pkts[1]) + path.on_lost(&pkts[2]);
        assert_eq!(lost, 2400);
        assert_eq!(path.bytes_in_flight(), 8400);
        assert_eq!(path.congestion_window(), 13200);
        path.on_congestion_event(&pkts[2], lost, false, now);
        assert_eq!(path.congestion_window(), 6600);
        assert_eq!(path.stats().lost_count, 2);
        assert_eq!(path.stats().lost_bytes, 2400);
        assert_eq!(path.stats().acked_count, 2);

        // Already in recovery
        assert!(!path.on_ecn_ce(now));
        assert_eq!(path.stats().ecn_ce_events, 0);
    }

    #[test]
    fn path_tail_loss_probe() {
        let conf = RecoveryConfig::default();
        let mut path = Path::new(&conf, "test");
        let now = Instant::now();

        let pkt = SentPacket::new(0, now, PacketType::OneRTT, 1200);
        path.on_sent(&pkt, now);
        path.on_tail_loss_probe(&pkt);
        assert_eq!(path.bytes_in_flight(), 0);
        assert_eq!(path.stats().tlp_count, 1);
        assert_eq!(path.stats().lost_count, 0);
        assert_eq!(path.stats().lost_bytes, 0);
        assert_eq!(path.congestion_window(), 12000);
    }

    #[test]
    fn path_ecn_ce() {
        let conf = RecoveryConfig::default();
        let mut path = Path::new(&conf, "test");
        let now = Instant::now();

        assert!(path.on_ecn_ce(now));
        assert_eq!(path.congestion_window(), 6000);
        assert_eq!(path.stats().ecn_ce_events, 1);
        assert_eq!(
            format!("{:?}", path),
            format!(
                "NEWRENO phase=Recovery cwnd=6000 ssthresh=6000 inflight=0 srtt={:?}",
                conf.initial_rtt
            )
        );
    }

    #[test]
    fn path_stats_json() -> Result<(), serde_json::Error> {
        let conf = RecoveryConfig::default();
        let mut path = Path::new(&conf, "test");
        let now = Instant::now();

        let pkt = SentPacket::new(0, now, PacketType::OneRTT, 1200);
        path.on_sent(&pkt, now);
        path.on_acked(&pkt, now);

        let stats = serde_json::to_value(path.stats())?;
        assert_eq!(stats["sent_count"], 1);
        assert_eq!(stats["acked_bytes"], 1200);
        assert_eq!(stats["spurious_count"], 0);
        Ok(())
    }
}
