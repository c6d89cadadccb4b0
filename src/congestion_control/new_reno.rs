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

use std::cmp;
use std::time::Instant;

use log::*;

use super::CongestionController;
use super::CongestionPhase;
use super::CongestionStats;
use crate::connection::rtt::RttEstimator;
use crate::connection::space::SentPacket;
use crate::RecoveryConfig;

/// NewReno Configuration.
#[derive(Debug, Clone)]
pub struct NewRenoConfig {
    /// Minimal congestion window in bytes.
    min_congestion_window: u64,

    /// Initial congestion window in bytes.
    initial_congestion_window: u64,

    /// The threshold for slow start in bytes.
    slow_start_thresh: u64,

    /// Max datagram size in bytes.
    max_datagram_size: u64,
}

impl NewRenoConfig {
    pub fn new(
        min_congestion_window: u64,
        initial_congestion_window: u64,
        max_datagram_size: u64,
    ) -> Self {
        Self {
            min_congestion_window,
            initial_congestion_window,
            slow_start_thresh: u64::MAX,
            max_datagram_size,
        }
    }

    pub fn from(conf: &RecoveryConfig) -> Self {
        let max_datagram_size = conf.max_datagram_size as u64;
        let min_congestion_window = conf.min_congestion_window.saturating_mul(max_datagram_size);
        let initial_congestion_window = conf
            .initial_congestion_window
            .saturating_mul(max_datagram_size);
        let slow_start_thresh = conf.slow_start_thresh.saturating_mul(max_datagram_size);

        Self {
            min_congestion_window,
            initial_congestion_window,
            slow_start_thresh,
            max_datagram_size,
        }
    }
}

impl Default for NewRenoConfig {
    fn default() -> Self {
        let max_datagram_size = crate::DEFAULT_SEND_UDP_PAYLOAD_SIZE as u64;
        Self::new(2 * max_datagram_size, 10 * max_datagram_size, max_datagram_size)
    }
}

/// NewReno congestion control algorithm, reacting to both inferred loss and
/// ECN-CE marks.
///
/// See RFC 9002 Section 7 and RFC 6582.
#[derive(Debug)]
pub struct NewReno {
    /// Configuration.
    config: NewRenoConfig,

    /// Congestion window in bytes.
    cwnd: u64,

    /// Slow start thresh in bytes.
    ssthresh: u64,

    /// Current state.
    phase: CongestionPhase,

    /// Time of the last recovery entry. Only meaningful in recovery.
    recovery_start: Option<Instant>,

    /// Acknowledged bytes not yet turned into window growth during
    /// congestion avoidance.
    residual_ack: u64,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl NewReno {
    pub fn new(config: NewRenoConfig) -> Self {
        let cwnd = cmp::max(config.initial_congestion_window, config.min_congestion_window);
        let ssthresh = config.slow_start_thresh;
        Self {
            config,
            cwnd,
            ssthresh,
            phase: CongestionPhase::SlowStart,
            recovery_start: None,
            residual_ack: 0,
            stats: Default::default(),
        }
    }

    /// Halve the window and freeze it for one round trip.
    fn enter_recovery(&mut self, now: Instant) {
        self.ssthresh = cmp::max(self.cwnd / 2, self.config.min_congestion_window);
        self.cwnd = self.ssthresh;
        self.recovery_start = Some(now);
        self.residual_ack = 0;
        self.phase = CongestionPhase::Recovery;
        self.stats.recovery_count = self.stats.recovery_count.saturating_add(1);

        debug!(
            "{} enter recovery cwnd={} ssthresh={}",
            self.name(),
            self.cwnd,
            self.ssthresh
        );
    }

    fn exit_recovery(&mut self) {
        self.phase = CongestionPhase::CongestionAvoidance;
        debug!("{} exit recovery cwnd={}", self.name(), self.cwnd);
    }
}

impl CongestionController for NewReno {
    fn name(&self) -> &str {
        "NEWRENO"
    }

    fn on_sent(&mut self, now: Instant, packet: &SentPacket, bytes_in_flight: u64) {
        let sent_bytes = packet.sent_size as u64;

        self.stats.bytes_in_flight = bytes_in_flight;
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(sent_bytes);
        if self.in_slow_start() {
            self.stats.bytes_sent_in_slow_start = self
                .stats
                .bytes_sent_in_slow_start
                .saturating_add(sent_bytes);
        }
    }

    fn on_ack(
        &mut self,
        packet: &SentPacket,
        now: Instant,
        rtt: &RttEstimator,
        bytes_in_flight: u64,
    ) {
        let acked_bytes = packet.sent_size as u64;

        self.stats.bytes_in_flight = bytes_in_flight;
        self.stats.bytes_acked_in_total =
            self.stats.bytes_acked_in_total.saturating_add(acked_bytes);
        if self.in_slow_start() {
            self.stats.bytes_acked_in_slow_start = self
                .stats
                .bytes_acked_in_slow_start
                .saturating_add(acked_bytes);
        }

        if self.phase == CongestionPhase::Recovery {
            // Recovery lasts until a packet sent after its start is acked.
            if self.in_recovery(packet.time_sent) {
                return;
            }
            self.exit_recovery();
        }

        match self.phase {
            CongestionPhase::SlowStart => {
                self.cwnd = self.cwnd.saturating_add(acked_bytes);
                if self.cwnd >= self.ssthresh {
                    self.phase = CongestionPhase::CongestionAvoidance;
                }
            }
            CongestionPhase::CongestionAvoidance => {
                self.residual_ack = self.residual_ack.saturating_add(acked_bytes);
                if self.residual_ack >= self.cwnd {
                    self.residual_ack -= self.cwnd;
                    self.cwnd = self.cwnd.saturating_add(self.config.max_datagram_size);
                }
            }
            CongestionPhase::Recovery => (),
        }
    }

    fn on_congestion_event(
        &mut self,
        now: Instant,
        packet: &SentPacket,
        timer_based: bool,
        lost_bytes: u64,
        bytes_in_flight: u64,
    ) {
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(lost_bytes);
        self.stats.bytes_in_flight = bytes_in_flight;
        if self.in_slow_start() {
            self.stats.bytes_lost_in_slow_start = self
                .stats
                .bytes_lost_in_slow_start
                .saturating_add(lost_bytes);
        }

        if timer_based {
            // A retransmission timeout collapses the window.
            self.ssthresh = cmp::max(self.cwnd / 2, self.config.min_congestion_window);
            self.cwnd = self.config.min_congestion_window;
            self.residual_ack = 0;
            self.phase = CongestionPhase::SlowStart;
            debug!(
                "{} retransmission timeout cwnd={} ssthresh={}",
                self.name(),
                self.cwnd,
                self.ssthresh
            );
            return;
        }

        if self.in_recovery(packet.time_sent) {
            return;
        }
        self.enter_recovery(now);
    }

    fn on_ecn_ce(&mut self, now: Instant) -> bool {
        if self.phase == CongestionPhase::Recovery {
            return false;
        }

        self.stats.ecn_ce_count = self.stats.ecn_ce_count.saturating_add(1);
        self.enter_recovery(now);
        true
    }

    fn on_recovery_timeout(&mut self, now: Instant) {
        if self.phase == CongestionPhase::Recovery {
            self.exit_recovery();
        }
    }

    fn phase(&self) -> CongestionPhase {
        self.phase
    }

    fn in_recovery(&self, sent_time: Instant) -> bool {
        self.phase == CongestionPhase::Recovery
            && self.recovery_start.map_or(false, |t| sent_time <= t)
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    fn initial_window(&self) -> u64 {
        self.config.initial_congestion_window
    }

    fn minimal_window(&self) -> u64 {
        self.config.min_congestion_window
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use std::time::Duration;

    const MSS: u64 = 1200;
    const CWIN_MINIMUM: u64 = 2 * MSS;

    fn new_reno(initial_cwnd: u64) -> NewReno {
        NewReno::new(NewRenoConfig::new(CWIN_MINIMUM, initial_cwnd, MSS))
    }

    fn packet(pkt_num: u64, time_sent: Instant) -> SentPacket {
        SentPacket::new(pkt_num, time_sent, PacketType::OneRTT, MSS as usize)
    }

    #[test]
    fn new_reno_default_config() {
        let r = NewReno::new(NewRenoConfig::default());
        assert_eq!(r.name(), "NEWRENO");
        assert_eq!(r.minimal_window(), CWIN_MINIMUM);
        assert_eq!(r.initial_window(), 10 * MSS);
        assert_eq!(r.congestion_window(), 10 * MSS);
        assert_eq!(r.phase(), CongestionPhase::SlowStart);
    }

    #[test]
    fn new_reno_ecn_cutback() {
        let now = Instant::now();
        let mut r = new_reno(40000);

        assert!(r.on_ecn_ce(now));
        assert_eq!(r.ssthresh(), 20000);
        assert_eq!(r.congestion_window(), 20000);
        assert_eq!(r.phase(), CongestionPhase::Recovery);
        assert_eq!(r.stats().recovery_count, 1);
        assert_eq!(r.stats().ecn_ce_count, 1);
    }

    #[test]
    fn new_reno_ecn_cutback_floor() {
        let now = Instant::now();

        let mut r = new_reno(2 * CWIN_MINIMUM);
        assert!(r.on_ecn_ce(now));
        assert_eq!(r.ssthresh(), CWIN_MINIMUM);
        assert_eq!(r.congestion_window(), CWIN_MINIMUM);

        let mut r = new_reno(CWIN_MINIMUM);
        assert!(r.on_ecn_ce(now));
        assert_eq!(r.ssthresh(), CWIN_MINIMUM);
        assert_eq!(r.congestion_window(), CWIN_MINIMUM);
    }

    #[test]
    fn new_reno_single_cut_in_recovery() {
        let now = Instant::now();
        let mut r = new_reno(40000);

        assert!(r.on_ecn_ce(now));
        assert!(!r.on_ecn_ce(now + Duration::from_millis(1)));
        assert_eq!(r.congestion_window(), 20000);

        // Loss of a packet sent before recovery started is part of the
        // same episode.
        let lost = packet(1, now - Duration::from_millis(5));
        r.on_congestion_event(now, &lost, false, MSS, 0);
        assert_eq!(r.congestion_window(), 20000);
        assert_eq!(r.stats().recovery_count, 1);
        assert_eq!(r.stats().bytes_lost_in_total, MSS);
    }

    #[test]
    fn new_reno_recovery_exit_on_ack() {
        let now = Instant::now();
        let rtt = RttEstimator::new(Duration::from_millis(20));
        let mut r = new_reno(40000);
        r.on_ecn_ce(now);

        // Acks of packets sent before recovery neither grow nor exit
        r.on_ack(&packet(1, now - Duration::from_millis(1)), now, &rtt, 0);
        assert_eq!(r.phase(), CongestionPhase::Recovery);
        assert_eq!(r.congestion_window(), 20000);
        assert!(r.in_recovery(now));

        // Ack of a packet sent after the start ends recovery
        let later = now + Duration::from_millis(20);
        r.on_ack(&packet(2, later), later, &rtt, 0);
        assert_eq!(r.phase(), CongestionPhase::CongestionAvoidance);
        assert!(!r.in_recovery(now));
        assert_eq!(r.congestion_window(), 20000);
    }

    #[test]
    fn new_reno_recovery_timeout() {
        let now = Instant::now();
        let mut r = new_reno(40000);

        // No effect outside of recovery
        r.on_recovery_timeout(now);
        assert_eq!(r.phase(), CongestionPhase::SlowStart);

        r.on_ecn_ce(now);
        r.on_recovery_timeout(now + Duration::from_millis(30));
        assert_eq!(r.phase(), CongestionPhase::CongestionAvoidance);
        assert_eq!(r.congestion_window(), 20000);

        // A new episode may start again
        assert!(r.on_ecn_ce(now + Duration::from_millis(40)));
        assert_eq!(r.congestion_window(), 10000);
    }

    #[test]
    fn new_reno_slow_start_growth() {
        let now = Instant::now();
        let rtt = RttEstimator::new(Duration::from_millis(20));
        let mut r = new_reno(10 * MSS);

        for pn in 0..5 {
            let pkt = packet(pn, now);
            r.on_sent(now, &pkt, (pn + 1) * MSS);
        }
        assert_eq!(r.stats().bytes_sent_in_slow_start, 5 * MSS);
        assert_eq!(r.stats().bytes_sent_in_total, 5 * MSS);

        for pn in 0..5 {
            r.on_ack(&packet(pn, now), now, &rtt, (4 - pn) * MSS);
        }
        assert_eq!(r.congestion_window(), 15 * MSS);
        assert_eq!(r.stats().bytes_acked_in_slow_start, 5 * MSS);
        assert_eq!(r.phase(), CongestionPhase::SlowStart);
    }

    #[test]
    fn new_reno_congestion_avoidance_growth() {
        let now = Instant::now();
        let rtt = RttEstimator::new(Duration::from_millis(20));
        let mut r = new_reno(10 * MSS);
        r.on_ecn_ce(now);
        r.on_recovery_timeout(now);
        assert_eq!(r.congestion_window(), 5 * MSS);

        let later = now + Duration::from_millis(1);
        for pn in 0..4 {
            r.on_ack(&packet(pn, later), later, &rtt, 0);
        }
        assert_eq!(r.congestion_window(), 5 * MSS);

        // A full window of acks adds one datagram
        r.on_ack(&packet(4, later), later, &rtt, 0);
        assert_eq!(r.congestion_window(), 6 * MSS);
    }

    #[test]
    fn new_reno_timer_based_loss() {
        let now = Instant::now();
        let mut r = new_reno(40000);

        let lost = packet(1, now);
        r.on_congestion_event(now, &lost, true, MSS, 0);
        assert_eq!(r.ssthresh(), 20000);
        assert_eq!(r.congestion_window(), CWIN_MINIMUM);
        assert_eq!(r.phase(), CongestionPhase::SlowStart);
        assert_eq!(r.stats().bytes_lost_in_slow_start, MSS);
    }

    #[test]
    fn new_reno_data_driven_loss() {
        let now = Instant::now();
        let mut r = new_reno(40000);

        let lost = packet(1, now);
        r.on_congestion_event(now + Duration::from_millis(1), &lost, false, MSS, 0);
        assert_eq!(r.ssthresh(), 20000);
        assert_eq!(r.congestion_window(), 20000);
        assert_eq!(r.phase(), CongestionPhase::Recovery);
        assert_eq!(r.stats().ecn_ce_count, 0);
    }
}
