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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use strum_macros::EnumIter;

use crate::connection::rtt::RttEstimator;
use crate::connection::space::SentPacket;
use crate::Error;
use crate::RecoveryConfig;
use crate::Result;
pub use new_reno::NewReno;
pub use new_reno::NewRenoConfig;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CongestionControlAlgorithm {
    /// NewReno halves the congestion window on a congestion event, whether
    /// signalled by loss or by ECN-CE marks, and grows it by one datagram per
    /// window of acknowledged data in congestion avoidance.
    #[default]
    NewReno,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("newreno") || algor.eq_ignore_ascii_case("reno") {
            Ok(CongestionControlAlgorithm::NewReno)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// State of the congestion window state machine.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum CongestionPhase {
    /// The window grows by the acknowledged bytes.
    #[default]
    SlowStart,

    /// The window is frozen for one round trip after a congestion event.
    Recovery,

    /// The window grows by one datagram per window of acknowledged bytes.
    CongestionAvoidance,
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CongestionStats {
    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Total bytes sent in slow start.
    pub bytes_sent_in_slow_start: u64,

    /// Total bytes acked in slow start.
    pub bytes_acked_in_slow_start: u64,

    /// Total bytes lost in slow start.
    pub bytes_lost_in_slow_start: u64,

    /// Total bytes sent.
    pub bytes_sent_in_total: u64,

    /// Total bytes acked.
    pub bytes_acked_in_total: u64,

    /// Total bytes lost.
    pub bytes_lost_in_total: u64,

    /// Number of times recovery was entered.
    pub recovery_count: u64,

    /// Number of recovery entries caused by ECN-CE marks.
    pub ecn_ce_count: u64,
}

/// Congestion control interfaces shared by different algorithms.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback after packet was sent out.
    fn on_sent(&mut self, now: Instant, packet: &SentPacket, bytes_in_flight: u64);

    /// Callback for processing each ack packet.
    fn on_ack(
        &mut self,
        packet: &SentPacket,
        now: Instant,
        rtt: &RttEstimator,
        bytes_in_flight: u64,
    ) {
    }

    /// Loss of the given packet. `timer_based` is set when the loss was
    /// declared by the retransmission timer rather than by acknowledgments.
    fn on_congestion_event(
        &mut self,
        now: Instant,
        packet: &SentPacket,
        timer_based: bool,
        lost_bytes: u64,
        bytes_in_flight: u64,
    ) {
    }

    /// The peer reported ECN-CE marks not seen before. Return whether
    /// recovery was entered.
    fn on_ecn_ce(&mut self, now: Instant) -> bool {
        false
    }

    /// The round trip following recovery entry has elapsed.
    fn on_recovery_timeout(&mut self, now: Instant) {}

    /// Current state of the window state machine.
    fn phase(&self) -> CongestionPhase;

    /// Check if in slow start.
    fn in_slow_start(&self) -> bool {
        self.phase() == CongestionPhase::SlowStart
    }

    /// Check if a packet sent at `sent_time` belongs to the current recovery
    /// period.
    fn in_recovery(&self, sent_time: Instant) -> bool {
        false
    }

    /// Current congestion window.
    fn congestion_window(&self) -> u64;

    /// Current slow start threshold.
    fn ssthresh(&self) -> u64;

    /// Initial congestion window.
    fn initial_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} phase={:?} cwnd={} ssthresh={}",
            self.name(),
            self.phase(),
            self.congestion_window(),
            self.ssthresh()
        )
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &RecoveryConfig) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::NewReno => Box::new(NewReno::new(NewRenoConfig::from(conf))),
    }
}


mod new_reno;
