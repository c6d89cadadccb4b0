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

//! TQUIC recovery is the acknowledgment processing and loss recovery engine of
//! a QUIC transport.
//!
//! ## Features
//!
//! * **ACK processing**: decoding and validation of ACK and ACK_ECN frames
//!   (RFC 9000 Section 19.3), removal of acknowledged packets and RTT
//!   sampling.
//! * **Loss detection**: fast retransmit by packet count, reordering and
//!   drift time thresholds, an exponentially backed-off retransmission timer
//!   and tail loss probes.
//! * **Congestion control**: NewReno with ECN-CE triggered recovery
//!   (RFC 9002 Section 7).
//!
//! The engine performs no I/O and reads no clock. Every operation takes the
//! current time from the caller, and operations on one connection must be
//! serialized.
//!
//! ## Get started
//!
//! ```
//! use std::time::Instant;
//! use tquic_recovery::frame::AckFrame;
//! use tquic_recovery::Config;
//! use tquic_recovery::Connection;
//! use tquic_recovery::Level;
//! use tquic_recovery::PacketType;
//! use tquic_recovery::SentPacket;
//! use tquic_recovery::SpaceId;
//!
//! let conf = Config::new();
//! let mut conn = Connection::new(&conf, "example");
//! let now = Instant::now();
//! conn.on_packet_sent(SpaceId::Data, SentPacket::new(0, now, PacketType::OneRTT, 1200), now)?;
//!
//! let ack = AckFrame {
//!     largest_acknowledged: 0,
//!     ..AckFrame::default()
//! };
//! conn.process_ack_frame(&ack, now, Level::OneRTT)?;
//! assert_eq!(conn.path().bytes_in_flight(), 0);
//! # Ok::<(), tquic_recovery::error::Error>(())
//! ```

use std::cmp;
use std::time::Duration;

/// The default maximum size of outgoing UDP payloads.
const DEFAULT_SEND_UDP_PAYLOAD_SIZE: usize = 1200;

/// The timer granularity.
/// See RFC 9002 Section 6.1.2
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// The RTT used before an RTT sample is taken.
/// See RFC 9002 Section 6.2.2
const INITIAL_RTT: Duration = Duration::from_millis(333);

/// The default ack delay exponent.
/// See RFC 9000 Section 18.2
const DEFAULT_ACK_DELAY_EXPONENT: u64 = 3;

/// Values above 20 are invalid for the ack_delay_exponent.
/// See RFC 9000 Section 18.2
const MAX_ACK_DELAY_EXPONENT: u64 = 20;

/// Packets acknowledged after a packet, in excess of which it is lost.
const DEFAULT_PACKET_THRESHOLD: u64 = 3;

/// Default time threshold of the reordering rule.
const DEFAULT_REORDERING_THRESHOLD: Duration = Duration::from_millis(10);

/// Default time threshold of the drift rule.
const DEFAULT_DRIFT_THRESHOLD: Duration = Duration::from_millis(10);

/// Default maximum number of tail loss probes per tail event.
const DEFAULT_MAX_TAIL_LOSS_PROBES: u32 = 3;

/// Default lower bound of the tail loss probe timeout.
const DEFAULT_MIN_TAIL_LOSS_PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Result type for recovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about a QUIC connection.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Configurations about loss recovery and congestion control.
    recovery: RecoveryConfig,

    /// The `ack_delay_exponent` transport parameter of the peer.
    ack_delay_exponent: u64,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut conf = tquic_recovery::Config::new();
    /// conf.set_initial_rtt(100);
    /// conf.set_initial_congestion_window(32);
    /// ```
    pub fn new() -> Self {
        Self {
            recovery: RecoveryConfig::default(),
            ack_delay_exponent: DEFAULT_ACK_DELAY_EXPONENT,
        }
    }

    /// Set the maximum outgoing UDP payload size in bytes.
    /// The default value is `1200`.
    pub fn set_max_datagram_size(&mut self, v: usize) {
        self.recovery.max_datagram_size = cmp::max(v, 1);
    }

    /// Set the `ack_delay_exponent` transport parameter of the peer. Values
    /// above 20 are capped.
    /// The default value is `3`.
    pub fn set_ack_delay_exponent(&mut self, v: u64) {
        self.ack_delay_exponent = cmp::min(v, MAX_ACK_DELAY_EXPONENT);
    }

    /// Set congestion control algorithm that the connection would use.
    /// The default value is NewReno.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.recovery.congestion_control_algorithm = cca;
    }

    /// Set the initial congestion window in packets.
    /// The default value is 10.
    pub fn set_initial_congestion_window(&mut self, packets: u64) {
        self.recovery.initial_congestion_window = packets;
    }

    /// Set the minimal congestion window in packets.
    /// The default value is 2.
    pub fn set_min_congestion_window(&mut self, packets: u64) {
        self.recovery.min_congestion_window = packets
    }

    /// Set the threshold for slow start in packets.
    /// The default value is the maximum value of u64.
    pub fn set_slow_start_thresh(&mut self, packets: u64) {
        self.recovery.slow_start_thresh = packets
    }

    /// Set the initial RTT in milliseconds. The default value is 333ms.
    ///
    /// The configuration should be changed with caution. Setting a value less than the default
    /// will cause retransmission of handshake packets to be more aggressive.
    pub fn set_initial_rtt(&mut self, millis: u64) {
        self.recovery.initial_rtt = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the packet threshold of fast retransmit. A packet is lost when
    /// more than `v` later packets have been acknowledged.
    /// The default value is 3.
    pub fn set_packet_threshold(&mut self, v: u64) {
        self.recovery.packet_threshold = cmp::max(v, 1);
    }

    /// Set the reordering time threshold in milliseconds.
    /// The default value is 10ms.
    pub fn set_reordering_threshold(&mut self, millis: u64) {
        self.recovery.reordering_threshold =
            cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the drift time threshold in milliseconds.
    /// The default value is 10ms.
    pub fn set_drift_threshold(&mut self, millis: u64) {
        self.recovery.drift_threshold = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the maximum number of tail loss probes per tail event. Zero turns
    /// tail loss probes off.
    /// The default value is 3.
    pub fn set_max_tail_loss_probes(&mut self, v: u32) {
        self.recovery.max_tail_loss_probes = v;
    }

    /// Set the lower bound of the tail loss probe timeout in milliseconds.
    /// The default value is 10ms.
    pub fn set_min_tail_loss_probe_timeout(&mut self, millis: u64) {
        self.recovery.min_tail_loss_probe_timeout =
            cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }
}

/// Configurations about loss recovery and congestion control.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// The maximum size of outgoing UDP payloads.
    pub max_datagram_size: usize,

    /// The congestion control algorithm used for a path.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// The minimal congestion window in packets.
    /// The RECOMMENDED value is 2 * max_datagram_size.
    /// See RFC 9002 Section 7.2
    pub min_congestion_window: u64,

    /// The initial congestion window in packets.
    /// See RFC 9002 Section 7.2
    pub initial_congestion_window: u64,

    /// The threshold for slow start in packets.
    pub slow_start_thresh: u64,

    /// The initial rtt, used before real rtt is estimated.
    pub initial_rtt: Duration,

    /// Fast retransmit packet count threshold.
    pub packet_threshold: u64,

    /// Time threshold of the reordering rule.
    pub reordering_threshold: Duration,

    /// Time threshold of the drift rule.
    pub drift_threshold: Duration,

    /// Maximum number of tail loss probes per tail event.
    pub max_tail_loss_probes: u32,

    /// Lower bound of the tail loss probe timeout.
    pub min_tail_loss_probe_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> RecoveryConfig {
        RecoveryConfig {
            max_datagram_size: DEFAULT_SEND_UDP_PAYLOAD_SIZE,
            congestion_control_algorithm: CongestionControlAlgorithm::NewReno,
            min_congestion_window: 2_u64,
            initial_congestion_window: 10_u64,
            slow_start_thresh: u64::MAX,
            initial_rtt: INITIAL_RTT,
            packet_threshold: DEFAULT_PACKET_THRESHOLD,
            reordering_threshold: DEFAULT_REORDERING_THRESHOLD,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            max_tail_loss_probes: DEFAULT_MAX_TAIL_LOSS_PROBES,
            min_tail_loss_probe_timeout: DEFAULT_MIN_TAIL_LOSS_PROBE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    #[test]
    fn default_config() {
        let config = Config::new();
        assert_eq!(config.ack_delay_exponent, 3);
        assert_eq!(config.recovery.max_datagram_size, 1200);
        assert_eq!(config.recovery.initial_congestion_window, 10);
        assert_eq!(config.recovery.min_congestion_window, 2);
        assert_eq!(config.recovery.packet_threshold, 3);
        assert_eq!(config.recovery.max_tail_loss_probes, 3);
        assert_eq!(
            config.recovery.congestion_control_algorithm,
            CongestionControlAlgorithm::NewReno
        );
    }

    #[test]
    fn initial_rtt() {
        let mut config = Config::new();

        config.set_initial_rtt(0);
        assert_eq!(config.recovery.initial_rtt, TIMER_GRANULARITY);

        config.set_initial_rtt(100);
        assert_eq!(config.recovery.initial_rtt, Duration::from_millis(100));
    }

    #[test]
    fn ack_delay_exponent() {
        let mut config = Config::new();

        config.set_ack_delay_exponent(10);
        assert_eq!(config.ack_delay_exponent, 10);

        config.set_ack_delay_exponent(u64::MAX);
        assert_eq!(config.ack_delay_exponent, MAX_ACK_DELAY_EXPONENT);
    }

    #[test]
    fn loss_thresholds() {
        let mut config = Config::new();
        assert_eq!(config.recovery.reordering_threshold, Duration::from_millis(10));
        assert_eq!(config.recovery.drift_threshold, Duration::from_millis(10));

        config.set_reordering_threshold(0);
        assert_eq!(config.recovery.reordering_threshold, TIMER_GRANULARITY);

        config.set_drift_threshold(25);
        assert_eq!(config.recovery.drift_threshold, Duration::from_millis(25));
        assert_eq!(config.recovery.reordering_threshold, TIMER_GRANULARITY);

        config.set_packet_threshold(0);
        assert_eq!(config.recovery.packet_threshold, 1);

        config.set_max_tail_loss_probes(0);
        assert_eq!(config.recovery.max_tail_loss_probes, 0);

        config.set_min_tail_loss_probe_timeout(200);
        assert_eq!(
            config.recovery.min_tail_loss_probe_timeout,
            Duration::from_millis(200)
        );
    }

    #[test]
    fn congestion_windows() -> Result<()> {
        let mut config = Config::new();
        config.set_max_datagram_size(0);
        assert_eq!(config.recovery.max_datagram_size, 1);

        config.set_max_datagram_size(1350);
        config.set_initial_congestion_window(20);
        config.set_min_congestion_window(4);
        config.set_slow_start_thresh(100);
        config.set_congestion_control_algorithm("reno".parse()?);

        let conn = Connection::new(&config, "");
        assert_eq!(conn.path().congestion_window(), 20 * 1350);
        assert_eq!(conn.path().congestion.minimal_window(), 4 * 1350);
        assert_eq!(conn.path().congestion.ssthresh(), 100 * 1350);
        Ok(())
    }
}

pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionPhase;
pub use crate::congestion_control::CongestionStats;
pub use crate::connection::path::Path;
pub use crate::connection::path::PathStats;
pub use crate::connection::recovery::LossDecision;
pub use crate::connection::recovery::RetransmitVerdict;
pub use crate::connection::space::SentPacket;
pub use crate::connection::space::SpaceId;
pub use crate::connection::Connection;
pub use crate::error::Error;
pub use crate::packet::Level;
pub use crate::packet::PacketType;

#[path = "connection/connection.rs"]
pub mod connection;

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

pub mod error;
pub mod frame;
mod packet;
