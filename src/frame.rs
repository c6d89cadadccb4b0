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

//! Acknowledgment frames as handed over by the frame parser, and the decoder
//! turning their block list into packet number intervals.

use std::fmt;

use smallvec::SmallVec;

use crate::Error;
use crate::Result;

/// Frame type of an ACK frame without ECN counts.
pub const ACK_FRAME_TYPE: u64 = 0x02;

/// Frame type of an ACK frame carrying ECN counts.
pub const ACK_ECN_FRAME_TYPE: u64 = 0x03;

/// Number of decoded ranges kept inline before spilling to the heap.
const INLINE_RANGES: usize = 8;

/// Decoded ranges of one frame, highest first.
pub type DecodedRanges = SmallVec<[DecodedRange; INLINE_RANGES]>;

/// One gap and range pair following the first range of an ACK frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckBlock {
    /// The number of contiguous unacknowledged packets between the previous
    /// range and this one.
    pub gap: u64,

    /// The number of contiguous acknowledged packets in this range, minus one.
    pub additional_range: u64,
}

/// ECN counts reported by the peer in an ACK_ECN frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    /// The total number of packets received with the ECT(0) codepoint
    /// in the packet number space of the ACK frame.
    pub ect0_count: u64,

    /// The total number of packets received with the ECT(1) codepoint
    /// in the packet number space of the ACK frame.
    pub ect1_count: u64,

    /// The total number of packets received with the ECN-CE codepoint
    /// in the packet number space of the ACK frame.
    pub ecn_ce_count: u64,
}

/// An acknowledgment frame whose fields were already read off the wire.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AckFrame {
    /// The largest packet number the peer is acknowledging.
    pub largest_acknowledged: u64,

    /// The acknowledgment delay, in units scaled by the peer's ack delay
    /// exponent.
    pub ack_delay: u64,

    /// The number of contiguous packets preceding the Largest Acknowledged
    /// that are being acknowledged.
    pub first_ack_block: u64,

    /// Additional ranges in decreasing packet number order.
    pub ack_blocks: Vec<AckBlock>,

    /// ECN counts, present only for ACK_ECN frames.
    pub ecn_counts: Option<EcnCounts>,
}

impl AckFrame {
    /// Whether the frame carries ECN counts.
    pub fn is_ecn(&self) -> bool {
        self.ecn_counts.is_some()
    }

    /// Type byte identifying the frame on the wire.
    pub fn frame_type(&self) -> u64 {
        if self.is_ecn() {
            ACK_ECN_FRAME_TYPE
        } else {
            ACK_FRAME_TYPE
        }
    }

    /// Return an iterator over the acknowledged intervals, highest first.
    pub fn ranges(&self) -> AckRangeDecoder<'_> {
        AckRangeDecoder::new(self)
    }

    /// Decode and validate every interval of the frame.
    pub fn decode_ranges(&self) -> Result<DecodedRanges> {
        self.ranges().collect()
    }
}

impl fmt::Debug for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ACK largest={} delay={} first={} blocks={:?} ecn_counts={:?}",
            self.largest_acknowledged,
            self.ack_delay,
            self.first_ack_block,
            self.ack_blocks,
            self.ecn_counts
        )
    }
}

/// A closed interval of acknowledged packet numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedRange {
    pub low: u64,
    pub high: u64,
}

impl DecodedRange {
    /// Number of packets in the interval, minus one.
    pub fn length(&self) -> u64 {
        self.high - self.low
    }

    /// Whether the interval contains the given packet number.
    pub fn contains(&self, pkt_num: u64) -> bool {
        self.low <= pkt_num && pkt_num <= self.high
    }
}

/// Decoder turning the block list of an ACK frame into intervals.
///
/// Yields the first range, then one range per block, each strictly below the
/// previous one. Any arithmetic that would leave the packet number space
/// yields `Error::FrameEncodingError` and ends the iteration.
pub struct AckRangeDecoder<'a> {
    frame: &'a AckFrame,

    /// Index of the next block; None before the first range is emitted.
    next_block: Option<usize>,

    /// The last emitted range and its encoded length.
    prev: Option<(DecodedRange, u64)>,

    /// Set after the last range or the first error.
    done: bool,
}

impl<'a> AckRangeDecoder<'a> {
    pub fn new(frame: &'a AckFrame) -> Self {
        Self {
            frame,
            next_block: None,
            prev: None,
            done: false,
        }
    }

    fn first_range(&self) -> Result<(DecodedRange, u64)> {
        let high = self.frame.largest_acknowledged;
        let length = self.frame.first_ack_block;
        let low = high
            .checked_sub(length)
            .ok_or(Error::FrameEncodingError)?;

        Ok((DecodedRange { low, high }, length))
    }

    fn next_range(prev: (DecodedRange, u64), block: &AckBlock) -> Result<(DecodedRange, u64)> {
        let (prev_range, prev_length) = prev;

        let block_to_block = block
            .gap
            .checked_add(1)
            .and_then(|v| v.checked_add(prev_length))
            .ok_or(Error::FrameEncodingError)?;
        let high = prev_range
            .high
            .checked_sub(block_to_block)
            .ok_or(Error::FrameEncodingError)?;
        let low = high
            .checked_sub(block.additional_range)
            .ok_or(Error::FrameEncodingError)?;

        Ok((DecodedRange { low, high }, block.additional_range))
    }
}

impl<'a> Iterator for AckRangeDecoder<'a> {
    type Item = Result<DecodedRange>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let decoded = match (self.next_block, self.prev) {
            (None, _) => {
                self.next_block = Some(0);
                self.first_range()
            }
            (Some(i), Some(prev)) => match self.frame.ack_blocks.get(i) {
                Some(block) => {
                    self.next_block = Some(i + 1);
                    Self::next_range(prev, block)
                }
                None => {
                    self.done = true;
                    return None;
                }
            },
            (Some(_), None) => Err(Error::InternalError),
        };

        match decoded {
            Ok(v) => {
                self.prev = Some(v);
                Some(Ok(v.0))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> std::iter::FusedIterator for AckRangeDecoder<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(low: u64, high: u64) -> DecodedRange {
        DecodedRange { low, high }
    }

    #[test]
    fn ack_frame_type() {
        let mut frame = AckFrame {
            largest_acknowledged: 10,
            ..AckFrame::default()
        };
        assert!(!frame.is_ecn());
        assert_eq!(frame.frame_type(), ACK_FRAME_TYPE);

        frame.ecn_counts = Some(EcnCounts {
            ect0_count: 1,
            ect1_count: 2,
            ecn_ce_count: 3,
        });
        assert!(frame.is_ecn());
        assert_eq!(frame.frame_type(), ACK_ECN_FRAME_TYPE);
        assert_eq!(
            format!("{:?}", frame),
            "ACK largest=10 delay=0 first=0 blocks=[] \
            ecn_counts=Some(EcnCounts { ect0_count: 1, ect1_count: 2, ecn_ce_count: 3 })"
        );
    }

    #[test]
    fn decode_single_range() -> Result<()> {
        let frame = AckFrame {
            largest_acknowledged: 10,
            first_ack_block: 2,
            ..AckFrame::default()
        };
        assert_eq!(frame.decode_ranges()?.as_slice(), &[range(8, 10)]);

        // An isolated packet
        let frame = AckFrame {
            largest_acknowledged: 0,
            first_ack_block: 0,
            ..AckFrame::default()
        };
        let ranges = frame.decode_ranges()?;
        assert_eq!(ranges.as_slice(), &[range(0, 0)]);
        assert_eq!(ranges[0].length(), 0);
        Ok(())
    }

    #[test]
    fn decode_with_blocks() -> Result<()> {
        let frame = AckFrame {
            largest_acknowledged: 10,
            first_ack_block: 2,
            ack_blocks: vec![AckBlock {
                gap: 1,
                additional_range: 1,
            }],
            ..AckFrame::default()
        };
        let ranges = frame.decode_ranges()?;
        assert_eq!(ranges.as_slice(), &[range(8, 10), range(5, 6)]);
        assert!(!ranges.iter().any(|r| r.contains(7)));
        Ok(())
    }

    #[test]
    fn decode_ranges_monotonic() -> Result<()> {
        let frame = AckFrame {
            largest_acknowledged: 1000,
            first_ack_block: 5,
            ack_blocks: vec![
                AckBlock {
                    gap: 0,
                    additional_range: 0,
                },
                AckBlock {
                    gap: 7,
                    additional_range: 20,
                },
                AckBlock {
                    gap: 0,
                    additional_range: 3,
                },
                AckBlock {
                    gap: 100,
                    additional_range: 0,
                },
            ],
            ..AckFrame::default()
        };

        let ranges = frame.decode_ranges()?;
        assert_eq!(ranges.len(), 5);
        for r in ranges.iter() {
            assert!(r.low <= r.high);
        }
        for w in ranges.windows(2) {
            assert!(w[1].high < w[0].low);
        }
        Ok(())
    }

    #[test]
    fn decode_first_block_underflow() {
        let frame = AckFrame {
            largest_acknowledged: 3,
            first_ack_block: 4,
            ..AckFrame::default()
        };
        assert_eq!(frame.decode_ranges(), Err(Error::FrameEncodingError));

        let frame = AckFrame {
            largest_acknowledged: 3,
            first_ack_block: 3,
            ..AckFrame::default()
        };
        assert_eq!(frame.decode_ranges().map(|r| r.len()), Ok(1));
    }

    #[test]
    fn decode_gap_underflow() {
        // The block would start below packet number zero
        let frame = AckFrame {
            largest_acknowledged: 5,
            first_ack_block: 2,
            ack_blocks: vec![AckBlock {
                gap: 3,
                additional_range: 0,
            }],
            ..AckFrame::default()
        };
        assert_eq!(frame.decode_ranges(), Err(Error::FrameEncodingError));

        // The block length would reach below packet number zero
        let frame = AckFrame {
            largest_acknowledged: 5,
            first_ack_block: 2,
            ack_blocks: vec![AckBlock {
                gap: 0,
                additional_range: 3,
            }],
            ..AckFrame::default()
        };
        assert_eq!(frame.decode_ranges(), Err(Error::FrameEncodingError));

        // Overflow while summing the gap
        let frame = AckFrame {
            largest_acknowledged: u64::MAX,
            first_ack_block: 1,
            ack_blocks: vec![AckBlock {
                gap: u64::MAX,
                additional_range: 0,
            }],
            ..AckFrame::default()
        };
        assert_eq!(frame.decode_ranges(), Err(Error::FrameEncodingError));
    }

    #[test]
    fn decoder_fused_after_error() {
        let frame = AckFrame {
            largest_acknowledged: 10,
            first_ack_block: 0,
            ack_blocks: vec![
                AckBlock {
                    gap: 20,
                    additional_range: 0,
                },
                AckBlock {
                    gap: 0,
                    additional_range: 0,
                },
            ],
            ..AckFrame::default()
        };

        let mut decoder = frame.ranges();
        assert_eq!(decoder.next(), Some(Ok(range(10, 10))));
        assert_eq!(decoder.next(), Some(Err(Error::FrameEncodingError)));
        assert_eq!(decoder.next(), None);
        assert_eq!(decoder.next(), None);
    }
}
