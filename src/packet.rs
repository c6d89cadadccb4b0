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

use strum_macros::EnumIter;

use self::PacketType::*;
use crate::connection::space::SpaceId;

/// Type of a packet that carries frames tracked by loss recovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    /// Initial packet carries the first CRYPTO frames sent by the client and
    /// server to perform key exchange.
    Initial,

    /// 0-RTT packet is used to carry "early" data from the client to the
    /// server as part of the first flight, prior to handshake completion.
    ZeroRTT,

    /// Handshake packet is used to carry cryptographic handshake messages and
    /// acknowledgments from the server and client.
    Handshake,

    /// 1-RTT packet is used after the version and 1-RTT keys are negotiated.
    #[default]
    OneRTT,
}

impl PacketType {
    /// Get encryption level for the given packet type.
    ///
    /// Data is protected using a number of encryption levels: Initial keys,
    /// Early data (0-RTT) keys, Handshake keys, Application data (1-RTT) keys.
    /// See RFC 9001 Section 2.1
    pub fn to_level(self) -> Level {
        match self {
            Initial => Level::Initial,
            ZeroRTT => Level::ZeroRTT,
            Handshake => Level::Handshake,
            OneRTT => Level::OneRTT,
        }
    }

    /// Get packet number space for the given packet type.
    pub fn to_space(self) -> SpaceId {
        self.to_level().to_space()
    }
}

/// Encryption level (epoch) on which a frame was received.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter)]
pub enum Level {
    Initial,
    ZeroRTT,
    Handshake,
    OneRTT,
}

impl Level {
    /// Get the packet number space whose acknowledgment bookkeeping is used
    /// for the given level. 0-RTT and 1-RTT share the application data space.
    /// See RFC 9000 Section 12.3
    pub fn to_space(self) -> SpaceId {
        match self {
            Level::Initial => SpaceId::Initial,
            Level::Handshake => SpaceId::Handshake,
            Level::ZeroRTT | Level::OneRTT => SpaceId::Data,
        }
    }

    /// Whether the level carries early data sent before handshake completion.
    pub fn is_early_data(self) -> bool {
        self == Level::ZeroRTT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn packet_type_to_level() {
        assert_eq!(PacketType::Initial.to_level(), Level::Initial);
        assert_eq!(PacketType::ZeroRTT.to_level(), Level::ZeroRTT);
        assert_eq!(PacketType::Handshake.to_level(), Level::Handshake);
        assert_eq!(PacketType::OneRTT.to_level(), Level::OneRTT);
        assert_eq!(PacketType::default(), PacketType::OneRTT);
    }

    #[test]
    fn level_to_space() {
        let spaces: Vec<SpaceId> = Level::iter().map(|l| l.to_space()).collect();
        assert_eq!(
            spaces,
            vec![
                SpaceId::Initial,
                SpaceId::Data,
                SpaceId::Handshake,
                SpaceId::Data
            ]
        );
        assert_eq!(PacketType::ZeroRTT.to_space(), SpaceId::Data);

        for level in Level::iter() {
            assert_eq!(level.is_early_data(), level == Level::ZeroRTT);
        }
    }
}
