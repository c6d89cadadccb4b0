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

//! Loss recovery and congestion response of a QUIC connection.

use std::time::Duration;
use std::time::Instant;

use log::*;

use self::ecn::EcnCounters;
use self::path::Path;
use self::recovery::LossDecision;
use self::recovery::Recovery;
use self::reserve::FrameReserver;
use self::reserve::ReserveOutcome;
use self::space::PacketContext;
use self::space::PacketContextMap;
use self::space::SentPacket;
use self::space::SpaceId;
use crate::error::ConnectionError;
use crate::error::Error;
use crate::frame::AckFrame;
use crate::packet::Level;
use crate::Config;
use crate::Result;

/// Loss recovery state of a QUIC connection.
///
/// All operations are driven by the caller with explicit timestamps and must
/// be serialized per connection.
pub struct Connection {
    /// Packet number spaces.
    spaces: PacketContextMap,

    /// The network path the connection operates on.
    path: Path,

    /// Loss detection.
    recovery: Recovery,

    /// ECN counters reported by the peer.
    ecn: EcnCounters,

    /// The ack delay exponent of the peer.
    peer_ack_delay_exponent: u64,

    /// The first fatal error detected locally.
    local_error: Option<ConnectionError>,

    /// Unique trace id for deubg logging
    trace_id: String,
}

impl Connection {
    /// Create a new connection.
    pub fn new(conf: &Config, trace_id: &str) -> Self {
        let mut recovery = Recovery::new(&conf.recovery);
        recovery.set_trace_id(trace_id);

        Connection {
            spaces: PacketContextMap::default(),
            path: Path::new(&conf.recovery, trace_id),
            recovery,
            ecn: EcnCounters::default(),
            peer_ack_delay_exponent: conf.ack_delay_exponent,
            local_error: None,
            trace_id: trace_id.to_string(),
        }
    }

    /// Record a packet sent in the given space. Packet numbers must be sent
    /// in increasing order.
    pub fn on_packet_sent(&mut self, space_id: SpaceId, pkt: SentPacket, now: Instant) -> Result<()> {
        let ctx = self.spaces.get_mut(space_id).ok_or(Error::InternalError)?;
        if pkt.pkt_num < ctx.send_sequence {
            return Err(Error::InvalidState(format!(
                "packet number {} already used",
                pkt.pkt_num
            )));
        }

        self.recovery.on_packet_sent(pkt, ctx, &mut self.path, now);
        Ok(())
    }

    /// Process an ACK or ACK_ECN frame received at the given encryption level.
    ///
    /// Malformed or inconsistent frames close the connection and return the
    /// transport error. Once closed, `Error::Done` is returned.
    pub fn process_ack_frame(&mut self, frame: &AckFrame, now: Instant, level: Level) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Done);
        }

        trace!("{} recv frame {:?} at {:?}", self.trace_id, frame, level);
        match self.do_process_ack_frame(frame, now, level) {
            Err(e) if e.is_fatal() => {
                self.connection_error(&e, frame.frame_type());
                Err(e)
            }
            v => v,
        }
    }

    fn do_process_ack_frame(&mut self, frame: &AckFrame, now: Instant, level: Level) -> Result<()> {
        // No ACK frame, with or without ECN counts, is acceptable in 0-RTT.
        if level.is_early_data() {
            debug!(
                "{} ack frame {:#x} not expected in 0-RTT packet",
                self.trace_id,
                frame.frame_type()
            );
            return Err(Error::ProtocolViolation);
        }

        let ctx = self
            .spaces
            .get_mut(level.to_space())
            .ok_or(Error::InternalError)?;
        if frame.largest_acknowledged >= ctx.send_sequence {
            debug!(
                "{} ack of unsent packet largest={} next={}",
                self.trace_id, frame.largest_acknowledged, ctx.send_sequence
            );
            return Err(Error::ProtocolViolation);
        }

        // ACK Delay is decoded by multiplying the value in the field by 2 to
        // the power of the ack_delay_exponent of the sender.
        // See RFC 9000 Section 19.3
        let mul = 2_u64.pow(self.peer_ack_delay_exponent as u32);
        let ack_delay = frame
            .ack_delay
            .checked_mul(mul)
            .ok_or(Error::FrameEncodingError)?;
        let ack_delay = Duration::from_micros(ack_delay);

        // Validate the whole frame before touching any state.
        let ranges = frame.decode_ranges().map_err(|e| {
            debug!("{} ack range error in {:?}", self.trace_id, frame);
            e
        })?;

        self.recovery.on_ack_ranges(
            &ranges,
            frame.largest_acknowledged,
            ack_delay,
            ctx,
            &mut self.path,
            now,
        );

        if let Some(counts) = &frame.ecn_counts {
            self.ecn.on_ack_ecn(counts);
        }
        if self.ecn.has_new_ce() {
            self.path.on_ecn_ce(now);
        }
        self.ecn.mark_ce_acknowledged();

        Ok(())
    }

    /// Decide whether the in-flight packet `pkt_num` of the space must be
    /// retransmitted now. Once closed, `Error::Done` is returned.
    pub fn loss_detector_decide(
        &mut self,
        space_id: SpaceId,
        pkt_num: u64,
        now: Instant,
        timer_based: bool,
    ) -> Result<LossDecision> {
        if self.is_closed() {
            return Err(Error::Done);
        }

        let ctx = self.spaces.get(space_id).ok_or(Error::InternalError)?;
        let pkt = ctx.sent.get(&pkt_num).ok_or(Error::Done)?;

        Ok(self.recovery.retransmit_needed(
            pkt,
            ctx,
            self.path.retransmit_timer(),
            now,
            timer_based,
        ))
    }

    /// Return the packets of the space that must be retransmitted now. They
    /// are no longer tracked as in flight.
    pub fn retransmit_needed(&mut self, space_id: SpaceId, now: Instant) -> Result<Vec<SentPacket>> {
        if self.is_closed() {
            return Err(Error::Done);
        }

        let ctx = self.spaces.get_mut(space_id).ok_or(Error::InternalError)?;
        let lost = self.recovery.detect_retransmissions(ctx, &mut self.path, now);
        Ok(lost)
    }

    /// End the recovery period of the path one round trip after it started.
    pub fn congestion_on_recovery_timeout(&mut self, now: Instant) {
        self.path.congestion.on_recovery_timeout(now);
    }

    /// Reserve a control frame for the next send opportunity on the path.
    pub fn reserve_for_send_opportunity<R: FrameReserver + ?Sized>(
        &self,
        reserver: &mut R,
        retransmit: Option<&SentPacket>,
        has_stream_data: bool,
        frame_type: u64,
        payload_len: usize,
    ) -> Result<ReserveOutcome> {
        reserve::reserve_for_send_opportunity(
            reserver,
            retransmit,
            has_stream_data,
            &self.path,
            frame_type,
            payload_len,
        )
    }

    /// Discard the state of a packet number space.
    pub fn drop_space(&mut self, space_id: SpaceId) {
        let ctx = match self.spaces.get(space_id) {
            Some(ctx) => ctx,
            None => return,
        };
        for pkt in ctx.sent.values() {
            self.path.on_discarded(pkt);
        }
        self.spaces.drop(space_id);
        trace!("{} drop space {:?}", self.trace_id, space_id);
    }

    /// Request closure of the connection after a fatal error. Only the first
    /// error is kept.
    fn connection_error(&mut self, err: &Error, frame_type: u64) {
        if self.local_error.is_some() {
            return;
        }

        info!(
            "{} connection closed, error {:?} frame_type={:#x}",
            self.trace_id, err, frame_type
        );
        self.local_error = Some(ConnectionError {
            is_app: false,
            error_code: err.to_wire(),
            frame_type: Some(frame_type),
            reason: vec![],
        });
    }

    /// Close the connection.
    pub fn close(&mut self, app: bool, err: u64, reason: &[u8]) -> Result<()> {
        if self.local_error.is_some() {
            return Err(Error::Done);
        }

        self.local_error = Some(ConnectionError {
            is_app: app,
            error_code: err,
            frame_type: None,
            reason: reason.to_vec(),
        });
        Ok(())
    }

    /// Check whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.local_error.is_some()
    }

    /// Returns the local error, if any.
    pub fn local_error(&self) -> Option<&ConnectionError> {
        self.local_error.as_ref()
    }

    /// Return the network path of the connection.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the packet number space, if not discarded.
    pub fn space(&self, space_id: SpaceId) -> Option<&PacketContext> {
        self.spaces.get(space_id)
    }

    /// Return the ECN counters reported by the peer.
    pub fn ecn_counters(&self) -> &EcnCounters {
        &self.ecn
    }

    /// Return the loss detection state.
    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    /// Return the trace id of the connection.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}


pub mod ecn;
pub mod path;
pub mod recovery;
pub mod reserve;
pub mod rtt;
pub mod space;
