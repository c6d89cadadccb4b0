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

//! Reservation of control frames for the next outgoing packet.

use log::*;

use super::path::Path;
use super::space::SentPacket;
use crate::packet::PacketType;
use crate::Error;
use crate::Result;

/// A control frame of fixed size reserved for the next outgoing packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlFrameSlot {
    /// Frame type of the reserved frame.
    pub frame_type: u64,

    /// Frame payload, not including the type byte.
    pub payload: Vec<u8>,
}

impl ControlFrameSlot {
    /// Allocate a zeroed slot. An allocation failure is reported as
    /// `Error::ResourceExhausted`.
    pub fn new(frame_type: u64, payload_len: usize) -> Result<Self> {
        let mut payload = Vec::new();
        payload.try_reserve_exact(payload_len)?;
        payload.resize(payload_len, 0);

        Ok(ControlFrameSlot {
            frame_type,
            payload,
        })
    }

    /// Bytes the frame takes in a packet.
    pub fn wire_len(&self) -> usize {
        1 + self.payload.len()
    }
}

/// Frame scheduler able to place reserved control frames in upcoming
/// packets.
pub trait FrameReserver {
    /// Whether a reserved frame is still waiting for a packet.
    fn has_pending_reservation(&self) -> bool;

    /// Reserve room for the slot. Return the number of bytes reserved.
    fn reserve(&mut self, slot: ControlFrameSlot) -> usize;

    /// Drop any pending reservation.
    fn cancel_reservation(&mut self) {}
}

/// Result of a reservation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Nothing in the next packet needs the frame.
    Skipped,

    /// A frame reserved earlier is still pending and is reused.
    Pending,

    /// A new frame was reserved.
    Reserved,
}

/// Reserve a control frame for the next send opportunity.
///
/// Nothing is reserved when no stream data can be sent and the packet to
/// retransmit, if any, is a pure control, crypto or non 1-RTT packet.
pub fn reserve_for_send_opportunity<R: FrameReserver + ?Sized>(
    reserver: &mut R,
    retransmit: Option<&SentPacket>,
    has_stream_data: bool,
    path: &Path,
    frame_type: u64,
    payload_len: usize,
) -> Result<ReserveOutcome> {
    // Stream data is only sendable when not congestion blocked.
    let stream_to_send =
        has_stream_data && path.congestion_window() >= path.bytes_in_flight();

    let protect_retransmit = match retransmit {
        Some(pkt) => !pkt.is_pure_control && !pkt.has_crypto && pkt.pkt_type == PacketType::OneRTT,
        None => false,
    };

    if !stream_to_send && !protect_retransmit {
        reserver.cancel_reservation();
        return Ok(ReserveOutcome::Skipped);
    }

    if reserver.has_pending_reservation() {
        return Ok(ReserveOutcome::Pending);
    }

    let slot = ControlFrameSlot::new(frame_type, payload_len)?;
    let wanted = slot.wire_len();
    let reserved = reserver.reserve(slot);
    if reserved < wanted {
        debug!(
            "unable to reserve frame {:#x}, size {}/{}",
            frame_type, reserved, wanted
        );
        return Err(Error::ResourceExhausted);
    }

    Ok(ReserveOutcome::Reserved)
}
