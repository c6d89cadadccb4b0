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

use crate::TIMER_GRANULARITY;

/// RTT estimation for a network path
/// See RFC 9002 Section 5
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// The most recent RTT sample.
    latest_rtt: Duration,

    /// Exponentially weighted moving average of the samples, None until the
    /// first sample.
    smoothed_rtt: Option<Duration>,

    /// Mean variation of the samples.
    rttvar: Duration,

    /// The minimum RTT observed on the path, ignoring ack delay.
    min_rtt: Duration,

    /// The maximum RTT observed on the path, ignoring ack delay.
    max_rtt: Duration,

    /// Number of samples taken.
    samples: u64,
}

impl RttEstimator {
    pub fn new(initial_rtt: Duration) -> Self {
        let initial_rtt = cmp::max(initial_rtt, TIMER_GRANULARITY);
        Self {
            latest_rtt: initial_rtt,
            smoothed_rtt: None,
            rttvar: initial_rtt / 2,
            min_rtt: initial_rtt,
            max_rtt: initial_rtt,
            samples: 0,
        }
    }

    /// Return the current best RTT estimation.
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt.unwrap_or(self.latest_rtt)
    }

    /// Return the latest rtt sample
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    /// Return the Minimum RTT observed so far for this estimator.
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    /// Return the variation in the RTT samples.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Return the Maximum RTT observed so far for this estimator.
    pub fn max_rtt(&self) -> Duration {
        self.max_rtt
    }

    /// Return the number of samples taken so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Base retransmission timer of the path, computed as the PTO of
    /// RFC 9002 Section 6.2.1 without the max_ack_delay term.
    pub fn pto_base(&self) -> Duration {
        self.smoothed_rtt() + cmp::max(4 * self.rttvar, TIMER_GRANULARITY)
    }

    /// Replace the initial RTT, unless a sample was already taken.
    pub fn try_set_init_rtt(&mut self, init_rtt: Duration) {
        if self.smoothed_rtt.is_some() {
            return;
        }
        *self = Self::new(init_rtt);
    }

    /// Take a sample from the acknowledgment of a packet sent at `time_sent`.
    /// Return the raw sample, or None if the clock went backwards.
    pub fn on_ack(&mut self, time_sent: Instant, now: Instant, ack_delay: Duration) -> Option<Duration> {
        let rtt = now.checked_duration_since(time_sent)?;
        self.update(ack_delay, rtt);
        Some(rtt)
    }

    /// Update estimator with the given RTT sample
    pub fn update(&mut self, ack_delay: Duration, rtt: Duration) {
        self.samples += 1;
        self.latest_rtt = rtt;

        let smoothed_rtt = match self.smoothed_rtt {
            Some(v) => v,
            None => {
                self.smoothed_rtt = Some(rtt);
                self.rttvar = rtt / 2;
                self.min_rtt = rtt;
                self.max_rtt = rtt;
                return;
            }
        };

        self.min_rtt = cmp::min(self.min_rtt, rtt);
        self.max_rtt = cmp::max(self.max_rtt, rtt);

        // The ack delay is not subtracted if the result would be smaller than
        // the min_rtt.
        let adjusted_rtt = match rtt.checked_sub(ack_delay) {
            Some(v) if v >= self.min_rtt => v,
            _ => rtt,
        };

        let var_sample = if smoothed_rtt > adjusted_rtt {
            smoothed_rtt - adjusted_rtt
        } else {
            adjusted_rtt - smoothed_rtt
        };

        self.rttvar = (3 * self.rttvar + var_sample) / 4;
        self.smoothed_rtt = Some((7 * smoothed_rtt + adjusted_rtt) / 8);
    }
}
