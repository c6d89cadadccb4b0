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

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;
use criterion::Criterion;

use tquic_recovery::frame::AckBlock;
use tquic_recovery::frame::AckFrame;
use tquic_recovery::Config;
use tquic_recovery::Connection;
use tquic_recovery::Level;
use tquic_recovery::PacketType;
use tquic_recovery::SentPacket;
use tquic_recovery::SpaceId;

const PACKETS: u64 = 10_000;

fn new_conn(now: Instant) -> Connection {
    let mut conf = Config::new();
    conf.set_initial_congestion_window(PACKETS);
    let mut conn = Connection::new(&conf, "bench");
    for pn in 0..PACKETS {
        let pkt = SentPacket::new(pn, now, PacketType::OneRTT, 1200);
        conn.on_packet_sent(SpaceId::Data, pkt, now).ok();
    }
    conn
}

/// An ACK frame acknowledging every other pair of packets.
fn sparse_ack_frame() -> AckFrame {
    let blocks = (PACKETS / 4) - 1;
    AckFrame {
        largest_acknowledged: PACKETS - 1,
        ack_delay: 100,
        first_ack_block: 1,
        ack_blocks: (0..blocks)
            .map(|_| AckBlock {
                gap: 1,
                additional_range: 1,
            })
            .collect(),
        ecn_counts: None,
    }
}

pub fn ack_processing_benchmark(c: &mut Criterion) {
    let frame = sparse_ack_frame();
    c.bench_function("ack range decode", |b| b.iter(|| frame.decode_ranges()));

    let now = Instant::now();
    let ack_time = now + Duration::from_millis(20);
    c.bench_function("ack frame process", |b| {
        b.iter_batched(
            || new_conn(now),
            |mut conn| conn.process_ack_frame(&frame, ack_time, Level::OneRTT),
            BatchSize::LargeInput,
        )
    });

    c.bench_function("retransmission sweep", |b| {
        b.iter_batched(
            || {
                let mut conn = new_conn(now);
                conn.process_ack_frame(&frame, ack_time, Level::OneRTT).ok();
                conn
            },
            |mut conn| conn.retransmit_needed(SpaceId::Data, ack_time),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, ack_processing_benchmark);
criterion_main!(benches);
