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

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::frame::DecodedRange;
use crate::packet::Level;
use crate::packet::PacketType;

/// Packet number space identifiers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u64)]
pub enum SpaceId {
    /// Initial space for all Initial packets.
    Initial = 0,

    /// Handshake space for all Handhshake packets.
    Handshake = 1,

    /// Application data space for all 0-RTT and 1-RTT packets.
    Data = 2,
}

impl SpaceId {
    /// Get encryption level for the given packet number space.
    pub fn to_level(self) -> Level {
        match self {
            SpaceId::Initial => Level::Initial,
            SpaceId::Handshake => Level::Handshake,
            SpaceId::Data => Level::OneRTT,
        }
    }
}

/// Acknowledgment bookkeeping for one packet number space.
pub struct PacketContext {
    /// The unique id for the packet number space.
    pub id: SpaceId,

    /// The packet number of the next packet that will be sent.
    pub send_sequence: u64,

    /// The largest packet number acknowledged in the space so far.
    pub highest_acknowledged: Option<u64>,

    /// Send time of the packet that carried `highest_acknowledged`.
    pub latest_time_acknowledged: Option<Instant>,

    /// The number of timer-based retransmission rounds without an
    /// acknowledgment in between.
    pub consecutive_retransmits: u32,

    /// Sent packets not yet acknowledged nor declared lost, keyed by packet
    /// number.
    pub sent: BTreeMap<u64, SentPacket>,

    /// Packets handed back for retransmission, kept to detect spurious
    /// retransmissions.
    pub retransmitted: BTreeMap<u64, RetransmittedPacket>,
}

impl PacketContext {
    pub fn new(id: SpaceId) -> Self {
        PacketContext {
            id,
            send_sequence: 0,
            highest_acknowledged: None,
            latest_time_acknowledged: None,
            consecutive_retransmits: 0,
            sent: BTreeMap::new(),
            retransmitted: BTreeMap::new(),
        }
    }

    /// Record a sent packet. The packet number must be `send_sequence`.
    pub fn on_packet_sent(&mut self, pkt: SentPacket) {
        self.send_sequence = pkt.pkt_num.saturating_add(1);
        self.sent.insert(pkt.pkt_num, pkt);
    }

    /// Remove and return all in-flight packets within the range, lowest first.
    /// Packets already removed are silently skipped.
    pub fn remove_acked(&mut self, range: &DecodedRange) -> SmallVec<[SentPacket; 8]> {
        let nums: SmallVec<[u64; 8]> = self
            .sent
            .range(range.low..=range.high)
            .map(|(pn, _)| *pn)
            .collect();

        nums.iter().filter_map(|pn| self.sent.remove(pn)).collect()
    }

    /// Raise the largest acknowledged packet number. The value never decreases.
    pub fn update_highest_acknowledged(&mut self, pkt_num: u64, time_sent: Option<Instant>) {
        if self.highest_acknowledged.map_or(true, |h| pkt_num > h) {
            self.highest_acknowledged = Some(pkt_num);
            if time_sent.is_some() {
                self.latest_time_acknowledged = time_sent;
            }
        }
    }

    /// Packet number of the most recently sent packet still in flight.
    /// Pure control packets are not counted in flight.
    pub fn newest_in_flight(&self) -> Option<u64> {
        self.sent
            .values()
            .rev()
            .find(|p| p.in_flight())
            .map(|p| p.pkt_num)
    }

    /// Iterate over in-flight packets, oldest first.
    pub fn iter_sent(&self) -> btree_map::Values<'_, u64, SentPacket> {
        self.sent.values()
    }

    /// Forget retransmitted packets older than `ttl`.
    pub fn expire_retransmitted(&mut self, now: Instant, ttl: Duration) {
        self.retransmitted
            .retain(|_, p| now.saturating_duration_since(p.time_retransmitted) < ttl);
    }
}

/// All packet number spaces on a QUIC connection
pub struct PacketContextMap {
    /// Packet number spaces for Initial/Handshake/Data
    spaces: FxHashMap<u64, PacketContext>,
}

impl PacketContextMap {
    pub fn new() -> Self {
        let mut m = PacketContextMap {
            spaces: FxHashMap::default(),
        };
        m.spaces.insert(0, PacketContext::new(SpaceId::Initial));
        m.spaces.insert(1, PacketContext::new(SpaceId::Handshake));
        m.spaces.insert(2, PacketContext::new(SpaceId::Data));
        m
    }

    /// Get an immutable reference to the specified space.
    pub fn get(&self, space_id: SpaceId) -> Option<&PacketContext> {
        self.spaces.get(&(space_id as u64))
    }

    /// Get an mutable reference to the specified space.
    pub fn get_mut(&mut self, space_id: SpaceId) -> Option<&mut PacketContext> {
        self.spaces.get_mut(&(space_id as u64))
    }

    /// Return an iterator over all spaces.
    pub fn iter(&self) -> impl Iterator<Item = &PacketContext> {
        self.spaces.values()
    }

    /// Discard the space once its keys are dropped.
    pub fn drop(&mut self, space_id: SpaceId) {
        self.spaces.remove(&(space_id as u64));
    }
}

impl Default for PacketContextMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata of sent packet
#[derive(Clone)]
pub struct SentPacket {
    /// The packet number of the sent packet.
    pub pkt_num: u64,

    /// The time the packet was sent.
    pub time_sent: Instant,

    /// The type of the packet.
    pub pkt_type: PacketType,

    /// Whether the packet carries only control frames (ACK, PADDING, MTU
    /// probe) and no payload worth retransmitting.
    pub is_pure_control: bool,

    /// Whether the packet contains CRYPTO frames.
    pub has_crypto: bool,

    /// The number of bytes sent in the packet, not including UDP or IP overhead,
    /// but including QUIC framing overhead.
    pub sent_size: usize,

    /// The number of times the payload of this packet was retransmitted.
    pub retransmit_count: u32,
}

impl SentPacket {
    pub fn new(pkt_num: u64, time_sent: Instant, pkt_type: PacketType, sent_size: usize) -> Self {
        SentPacket {
            pkt_num,
            time_sent,
            pkt_type,
            is_pure_control: false,
            has_crypto: false,
            sent_size,
            retransmit_count: 0,
        }
    }

    /// Whether the packet counts toward bytes in flight.
    pub fn in_flight(&self) -> bool {
        !self.is_pure_control
    }
}

impl std::fmt::Debug for SentPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "pn={:?}", self.pkt_num)?;
        write!(f, " type={:?}", self.pkt_type)?;
        if self.is_pure_control {
            write!(f, " pure_control")?;
        }
        if self.has_crypto {
            write!(f, " crypto")?;
        }
        write!(f, " sent_size={}", self.sent_size)?;

        Ok(())
    }
}

/// Metadata of a packet handed back for retransmission.
#[derive(Clone, Debug)]
pub struct RetransmittedPacket {
    /// The packet number of the original packet.
    pub pkt_num: u64,

    /// The time the retransmission was decided.
    pub time_retransmitted: Instant,

    /// Whether the retransmission was caused by the retransmission timer.
    pub timer_based: bool,
}
