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

#![no_main]

use std::time::Duration;
use std::time::Instant;

use lazy_static::lazy_static;
use libfuzzer_sys::fuzz_target;

use tquic_recovery::frame::AckBlock;
use tquic_recovery::frame::AckFrame;
use tquic_recovery::frame::EcnCounts;
use tquic_recovery::Config;
use tquic_recovery::Connection;
use tquic_recovery::Level;
use tquic_recovery::PacketType;
use tquic_recovery::SentPacket;
use tquic_recovery::SpaceId;

const SENT_PACKETS: u64 = 64;

lazy_static! {
    static ref CONFIG: Config = Config::new();
}

fn read_u64(data: &mut &[u8]) -> Option<u64> {
    if data.len() < 8 {
        return None;
    }
    let (head, tail) = data.split_at(8);
    *data = tail;
    let mut buf = [0; 8];
    buf.copy_from_slice(head);
    // Keep values close to the sent packet numbers most of the time.
    let v = u64::from_le_bytes(buf);
    Some(if v & 1 == 0 { (v >> 1) % (SENT_PACKETS * 2) } else { v })
}

fn parse_frame(mut data: &[u8]) -> Option<AckFrame> {
    let mut frame = AckFrame {
        largest_acknowledged: read_u64(&mut data)?,
        ack_delay: read_u64(&mut data)?,
        first_ack_block: read_u64(&mut data)?,
        ..AckFrame::default()
    };
    if read_u64(&mut data)? & 1 == 1 {
        frame.ecn_counts = Some(EcnCounts {
            ect0_count: read_u64(&mut data)?,
            ect1_count: read_u64(&mut data)?,
            ecn_ce_count: read_u64(&mut data)?,
        });
    }
    while let (Some(gap), Some(additional_range)) = (read_u64(&mut data), read_u64(&mut data)) {
        frame.ack_blocks.push(AckBlock {
            gap,
            additional_range,
        });
    }
    Some(frame)
}

fuzz_target!(|data: &[u8]| {
    let frame = match parse_frame(data) {
        Some(frame) => frame,
        None => return,
    };

    let now = Instant::now();
    let mut conn = Connection::new(&CONFIG, "fuzz");
    for pn in 0..SENT_PACKETS {
        let pkt = SentPacket::new(pn, now, PacketType::OneRTT, 1200);
        if conn.on_packet_sent(SpaceId::Data, pkt, now).is_err() {
            return;
        }
    }

    let later = now + Duration::from_millis(50);
    if conn.process_ack_frame(&frame, later, Level::OneRTT).is_err() {
        return;
    }
    conn.retransmit_needed(SpaceId::Data, later).ok();
});
