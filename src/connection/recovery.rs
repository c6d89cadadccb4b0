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
use std::time::Duration;
use std::time::Instant;

use log::*;
use smallvec::SmallVec;

use super::path::Path;
use super::space::PacketContext;
use super::space::RetransmittedPacket;
use super::space::SentPacket;
use crate::frame::DecodedRange;
use crate::packet::PacketType;
use crate::RecoveryConfig;

/// Base of the exponential back-off once a timer-based retransmission
/// happened in a packet number space.
const RETRANSMIT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Retransmission decision for one in-flight packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetransmitVerdict {
    /// The packet is not considered lost yet.
    No,

    /// The packet is considered lost and must be retransmitted.
    Retransmit,

    /// A tail loss probe is due. Only applies to the most recently sent
    /// packet still in flight.
    RetransmitNewestProbe,
}

/// Output of the loss detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LossDecision {
    pub verdict: RetransmitVerdict,

    /// Whether the retransmission is caused by a timer rather than by
    /// acknowledgments.
    pub timer_based: bool,
}

/// Tail loss probe state for the current tail event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TailLossProbe {
    /// Time after which a probe may be sent, if armed.
    pub deadline: Option<Instant>,

    /// Probes sent since the state was last cleared.
    pub probes_sent: u32,
}

impl TailLossProbe {
    fn arm(&mut self, now: Instant, smoothed_rtt: Duration, min_timeout: Duration) {
        self.deadline = Some(now + cmp::max(2 * smoothed_rtt, min_timeout));
    }

    fn on_probe_sent(&mut self) {
        self.probes_sent = self.probes_sent.saturating_add(1);
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Retransmission timer of a packet number space, given the number of
/// consecutive timer-based retransmission rounds.
fn retransmit_timer(consecutive_retransmits: u32, base_timer: Duration) -> Duration {
    if consecutive_retransmits == 0 {
        return base_timer;
    }
    1_u32
        .checked_shl(consecutive_retransmits - 1)
        .and_then(|m| RETRANSMIT_BACKOFF_BASE.checked_mul(m))
        .unwrap_or(Duration::MAX)
}

/// Loss detection driven by acknowledgments, time thresholds, a
/// retransmission timer and tail loss probes.
pub struct Recovery {
    /// Minimum number of packets acknowledged after a packet, in excess of
    /// which the packet is considered lost.
    pub packet_threshold: u64,

    /// Maximum reordering in time between a packet and the latest
    /// acknowledged one.
    pub reordering_threshold: Duration,

    /// Bound on the time elapsed since a later packet was sent and
    /// acknowledged.
    pub drift_threshold: Duration,

    /// Maximum number of tail loss probes per tail event.
    pub max_tail_loss_probes: u32,

    /// Lower bound of the tail loss probe timeout.
    pub min_tail_loss_probe_timeout: Duration,

    /// Tail loss probe state.
    pub(crate) tlp: TailLossProbe,

    /// Trace id.
    trace_id: String,
}

impl Recovery {
    pub(super) fn new(conf: &RecoveryConfig) -> Self {
        Recovery {
            packet_threshold: conf.packet_threshold,
            reordering_threshold: conf.reordering_threshold,
            drift_threshold: conf.drift_threshold,
            max_tail_loss_probes: conf.max_tail_loss_probes,
            min_tail_loss_probe_timeout: conf.min_tail_loss_probe_timeout,
            tlp: TailLossProbe::default(),
            trace_id: String::from(""),
        }
    }

    /// Set trace id.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    /// Return the tail loss probe state.
    pub fn tail_loss_probe(&self) -> &TailLossProbe {
        &self.tlp
    }

    /// Handle packet sent event.
    pub(super) fn on_packet_sent(
        &mut self,
        pkt: SentPacket,
        ctx: &mut PacketContext,
        path: &mut Path,
        now: Instant,
    ) {
        path.on_sent(&pkt, now);
        if !pkt.is_pure_control {
            self.tlp.arm(
                now,
                path.rtt.smoothed_rtt(),
                self.min_tail_loss_probe_timeout,
            );
        }
        ctx.on_packet_sent(pkt);
    }

    /// Apply decoded ranges of an ACK frame, highest first. Return the
    /// largest acknowledged packet number if it was newly acknowledged.
    pub(super) fn on_ack_ranges(
        &mut self,
        ranges: &[DecodedRange],
        largest_acked: u64,
        ack_delay: Duration,
        ctx: &mut PacketContext,
        path: &mut Path,
        now: Instant,
    ) -> Option<u64> {
        let mut newest_acked = None;
        let mut newly_acked = false;

        for (i, range) in ranges.iter().enumerate() {
            if i == 0 {
                newest_acked = self.update_rtt(largest_acked, ack_delay, ctx, path, now);
            }

            for pkt in ctx.remove_acked(range) {
                newly_acked = true;
                path.on_acked(&pkt, now);
                trace!(
                    "{} packet {:?} acked in {:?}, cwnd={} inflight={}",
                    self.trace_id,
                    pkt,
                    ctx.id,
                    path.congestion.congestion_window(),
                    path.bytes_in_flight
                );
            }

            if range.high > range.low {
                self.check_spurious_retransmission(range, ctx, path);
            }
        }

        // The tail event ends with any new acknowledgment. Packets still in
        // flight start a new one.
        if newly_acked {
            self.tlp.reset();
            if ctx.newest_in_flight().is_some() {
                self.tlp.arm(
                    now,
                    path.rtt.smoothed_rtt(),
                    self.min_tail_loss_probe_timeout,
                );
            }
        }

        newest_acked
    }

    /// Take an RTT sample from the largest acknowledged packet and advance
    /// the acknowledgment bookkeeping of the space.
    fn update_rtt(
        &mut self,
        largest_acked: u64,
        ack_delay: Duration,
        ctx: &mut PacketContext,
        path: &mut Path,
        now: Instant,
    ) -> Option<u64> {
        let (time_sent, is_pure_control) = match ctx.sent.get(&largest_acked) {
            Some(pkt) => (pkt.time_sent, pkt.is_pure_control),
            None => {
                ctx.update_highest_acknowledged(largest_acked, None);
                return None;
            }
        };

        if !is_pure_control {
            path.rtt.on_ack(time_sent, now, ack_delay);
        }
        ctx.update_highest_acknowledged(largest_acked, Some(time_sent));
        ctx.consecutive_retransmits = 0;

        Some(largest_acked)
    }

    /// Detect retransmitted packets whose original was acknowledged after
    /// all, and undo the timer back-off they caused.
    fn check_spurious_retransmission(
        &mut self,
        range: &DecodedRange,
        ctx: &mut PacketContext,
        path: &mut Path,
    ) {
        let spurious: SmallVec<[u64; 4]> = ctx
            .retransmitted
            .range(range.low..=range.high)
            .map(|(pn, _)| *pn)
            .collect();

        for pn in spurious {
            let p = match ctx.retransmitted.remove(&pn) {
                Some(p) => p,
                None => continue,
            };
            path.stats.spurious_count = path.stats.spurious_count.saturating_add(1);
            if p.timer_based {
                ctx.consecutive_retransmits = 0;
            }
            debug!(
                "{} spurious retransmission of packet {} timer_based={}",
                self.trace_id, pn, p.timer_based
            );
        }
    }

    /// Decide whether the given in-flight packet must be retransmitted.
    ///
    /// The first matching rule wins: fast retransmit by packet count,
    /// reordering time threshold, drift since the latest acknowledgment,
    /// retransmission timer, and finally the tail loss probe. The returned
    /// timer-based flag is the given one, forced to true when the
    /// retransmission timer fires.
    pub fn retransmit_needed(
        &mut self,
        pkt: &SentPacket,
        ctx: &PacketContext,
        base_timer: Duration,
        now: Instant,
        timer_based: bool,
    ) -> LossDecision {
        let mut timer_based = timer_based;

        if let Some(highest) = ctx.highest_acknowledged {
            if highest.saturating_sub(pkt.pkt_num) > self.packet_threshold {
                return LossDecision {
                    verdict: RetransmitVerdict::Retransmit,
                    timer_based,
                };
            }
        }

        let mut retransmit = self.lost_by_time(pkt, ctx, now);

        if !retransmit {
            let timer = retransmit_timer(ctx.consecutive_retransmits, base_timer);
            if now.saturating_duration_since(pkt.time_sent) >= timer {
                retransmit = true;
                timer_based = true;
            }
        }

        if !retransmit && self.tlp.probes_sent < self.max_tail_loss_probes {
            if let Some(deadline) = self.tlp.deadline {
                let verdict = if now > deadline {
                    RetransmitVerdict::RetransmitNewestProbe
                } else {
                    RetransmitVerdict::No
                };
                return LossDecision {
                    verdict,
                    timer_based,
                };
            }
        }

        self.tlp.reset();
        let verdict = if retransmit {
            RetransmitVerdict::Retransmit
        } else {
            RetransmitVerdict::No
        };
        LossDecision {
            verdict,
            timer_based,
        }
    }

    /// Time-based loss rules, relative to the send time of the latest
    /// acknowledged packet.
    fn lost_by_time(&self, pkt: &SentPacket, ctx: &PacketContext, now: Instant) -> bool {
        let latest = match ctx.latest_time_acknowledged {
            Some(v) => v,
            None => return false,
        };

        let delta_t = latest.saturating_duration_since(pkt.time_sent);
        if delta_t > self.reordering_threshold && pkt.pkt_type != PacketType::ZeroRTT {
            return true;
        }

        if latest > pkt.time_sent {
            let since_latest = now.saturating_duration_since(latest) + delta_t;
            return since_latest > self.drift_threshold;
        }

        false
    }

    /// Run the loss detector over every in-flight packet of the space, oldest
    /// first. Packets to retransmit are removed from flight. Pure control
    /// packets are dropped, the others are returned for retransmission.
    pub(super) fn detect_retransmissions(
        &mut self,
        ctx: &mut PacketContext,
        path: &mut Path,
        now: Instant,
    ) -> Vec<SentPacket> {
        let base_timer = path.retransmit_timer();
        ctx.expire_retransmitted(now, base_timer);

        let newest = ctx.newest_in_flight();
        let mut timer_based = false;
        let mut lost: SmallVec<[(u64, bool, bool); 8]> = SmallVec::new();

        for pkt in ctx.sent.values() {
            let decision = self.retransmit_needed(pkt, ctx, base_timer, now, timer_based);
            timer_based = decision.timer_based;

            let is_probe = match decision.verdict {
                RetransmitVerdict::No => continue,
                RetransmitVerdict::Retransmit => false,
                RetransmitVerdict::RetransmitNewestProbe => {
                    if Some(pkt.pkt_num) != newest {
                        continue;
                    }
                    true
                }
            };
            lost.push((pkt.pkt_num, decision.timer_based, is_probe));
        }

        let mut retransmits = Vec::with_capacity(lost.len());
        let mut lost_bytes = 0_u64;
        let mut largest_lost: Option<SentPacket> = None;
        let mut any_timer_based = false;

        for (pn, timer_based, is_probe) in lost {
            let mut pkt = match ctx.sent.remove(&pn) {
                Some(pkt) => pkt,
                None => continue,
            };
            if is_probe {
                self.tlp.on_probe_sent();
                path.on_tail_loss_probe(&pkt);
                debug!(
                    "{} tail loss probe {} for packet {}",
                    self.trace_id, self.tlp.probes_sent, pn
                );
            } else {
                let bytes = path.on_lost(&pkt);
                lost_bytes = lost_bytes.saturating_add(bytes);
                any_timer_based |= timer_based;
                if pkt.in_flight() {
                    largest_lost = Some(pkt.clone());
                }
            }

            trace!(
                "{} packet {:?} needs retransmission timer_based={} probe={}",
                self.trace_id,
                pkt,
                timer_based,
                is_probe
            );

            if pkt.is_pure_control {
                continue;
            }

            ctx.retransmitted.insert(
                pn,
                RetransmittedPacket {
                    pkt_num: pn,
                    time_retransmitted: now,
                    timer_based,
                },
            );
            pkt.retransmit_count = pkt.retransmit_count.saturating_add(1);
            retransmits.push(pkt);
        }

        if let Some(pkt) = largest_lost {
            path.on_congestion_event(&pkt, lost_bytes, any_timer_based, now);
        }
        if any_timer_based {
            ctx.consecutive_retransmits = ctx.consecutive_retransmits.saturating_add(1);
        }

        retransmits
    }
}
