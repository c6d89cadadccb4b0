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

use crate::frame::EcnCounts;

/// ECN counters reported by the peer and the part of them the congestion
/// controller has already reacted to.
/// See RFC 9000 Section 13.4
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EcnCounters {
    /// Cumulative ECT(0) count reported by the peer.
    pub ect0_total: u64,

    /// Cumulative ECT(1) count reported by the peer.
    pub ect1_total: u64,

    /// Cumulative ECN-CE count reported by the peer.
    pub ce_total: u64,

    /// The ECN-CE count the congestion controller last reacted to.
    pub ce_acknowledged: u64,
}

impl EcnCounters {
    /// Overwrite the remote totals with the counts of an ACK_ECN frame. The
    /// peer is authoritative; the counts are not checked for monotonicity.
    pub fn on_ack_ecn(&mut self, counts: &EcnCounts) {
        self.ect0_total = counts.ect0_count;
        self.ect1_total = counts.ect1_count;
        self.ce_total = counts.ecn_ce_count;
    }

    /// Whether the peer reported CE marks not yet reacted to.
    pub fn has_new_ce(&self) -> bool {
        self.ce_total > self.ce_acknowledged
    }

    /// Mark the current CE total as handled.
    pub fn mark_ce_acknowledged(&mut self) {
        self.ce_acknowledged = self.ce_total;
    }
}
