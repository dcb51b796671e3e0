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

//! Generation size control.
//!
//! A generation is the group of packets encoded and decoded together by a
//! network-coded transport. Larger generations amortize coding overhead and
//! raise throughput, smaller ones lose less when the network is congested.

use core::str::FromStr;
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::Error;
use crate::GenerationConfig;
use crate::Result;
use crate::GENERATION_SIZE_STEP;
pub use dgsa::Dgsa;
pub use fixed::Fixed;
pub use grtt::GrttEstimator;

/// How one adaptation epoch changed the generation size.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Decision {
    /// The generation size reached the congestion window and was clamped to it.
    Clamp,

    /// GRTT was within the threshold and the generation grew.
    Grow,

    /// GRTT exceeded the threshold and the generation shrank.
    Shrink,

    /// The candidate size reached the congestion window and was rejected; the
    /// generation size is unchanged.
    Hold,
}

/// Compute the adjusted generation size (EGS) and the decision taken.
///
/// See [`adjust_generation_size`].
pub fn decide(cwnd: i64, gs: i64, grtt: i64, rtt_threshold: i64) -> (i64, Decision) {
    if gs >= cwnd {
        return (cwnd, Decision::Clamp);
    }

    let (candidate, decision) = match grtt.cmp(&rtt_threshold) {
        Ordering::Less | Ordering::Equal => (gs.saturating_add(GENERATION_SIZE_STEP), Decision::Grow),
        Ordering::Greater => (gs.saturating_sub(GENERATION_SIZE_STEP), Decision::Shrink),
    };

    // Fall back to the current size instead of clamping at the window edge,
    // so the size does not oscillate around cwnd.
    if candidate >= cwnd {
        return (gs, Decision::Hold);
    }

    (candidate, decision)
}

/// Dynamic generation size adjustment.
///
/// Given the congestion window `cwnd` (packets), the current generation size
/// `gs` (packets), the measured generation round-trip time `grtt` (ms) and
/// the threshold `rtt_threshold` (ms), return the adjusted generation size:
///
/// * if `gs >= cwnd`, the result is `cwnd`;
/// * otherwise the candidate is `gs + 4` when `grtt <= rtt_threshold` and
///   `gs - 4` when `grtt > rtt_threshold`;
/// * a candidate reaching `cwnd` is rejected and `gs` is returned.
///
/// The result never exceeds `cwnd`. There is no floor at zero: shrinking a
/// generation smaller than 4 packets yields a negative size, and callers are
/// expected to handle it.
///
/// ```
/// use ncgen::adjust_generation_size;
///
/// assert_eq!(adjust_generation_size(25, 6, 80, 100), 10);
/// assert_eq!(adjust_generation_size(10, 9, 80, 100), 9);
/// assert_eq!(adjust_generation_size(5, 6, 80, 100), 5);
/// assert_eq!(adjust_generation_size(25, 2, 150, 100), -2);
/// ```
pub fn adjust_generation_size(cwnd: i64, gs: i64, grtt: i64, rtt_threshold: i64) -> i64 {
    decide(cwnd, gs, grtt, rtt_threshold).0
}

/// Convert a duration to nanoseconds, saturating at `i64::MAX`.
pub(crate) fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Network readings consumed by one adaptation epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSignals {
    /// Congestion window, in packets.
    pub cwnd: i64,

    /// Generation round-trip time sample.
    pub grtt: Duration,
}

impl NetworkSignals {
    pub fn new(cwnd: i64, grtt: Duration) -> Self {
        Self { cwnd, grtt }
    }
}

/// Available generation control algorithm
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum GenerationControlAlgorithm {
    /// DGSA grows the generation by a fixed step while GRTT stays within the
    /// threshold and shrinks it once GRTT exceeds the threshold, bounded by
    /// the congestion window.
    #[default]
    Dgsa,

    /// Fixed keeps a static generation size. It is intended to be used as a
    /// baseline in experiments.
    Fixed,
}

impl FromStr for GenerationControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<GenerationControlAlgorithm> {
        if algor.eq_ignore_ascii_case("dgsa") {
            Ok(GenerationControlAlgorithm::Dgsa)
        } else if algor.eq_ignore_ascii_case("fixed") {
            Ok(GenerationControlAlgorithm::Fixed)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Generation control statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GenerationStats {
    /// Adaptation epochs run.
    pub epochs: u64,

    /// Epochs that grew the generation.
    pub grows: u64,

    /// Epochs that shrank the generation.
    pub shrinks: u64,

    /// Epochs that clamped the generation to the congestion window.
    pub clamps: u64,

    /// Epochs that left the generation unchanged.
    pub holds: u64,

    /// Generation size after the latest epoch.
    pub last_generation_size: i64,
}

impl GenerationStats {
    /// Account one epoch.
    pub(crate) fn record(&mut self, decision: Decision, egs: i64) {
        self.epochs = self.epochs.saturating_add(1);
        match decision {
            Decision::Grow => self.grows = self.grows.saturating_add(1),
            Decision::Shrink => self.shrinks = self.shrinks.saturating_add(1),
            Decision::Clamp => self.clamps = self.clamps.saturating_add(1),
            Decision::Hold => self.holds = self.holds.saturating_add(1),
        }
        self.last_generation_size = egs;
    }
}

/// Generation control interfaces shared by different algorithms.
pub trait GenerationController {
    /// Name of generation control algorithm.
    fn name(&self) -> &str;

    /// Run one adaptation epoch and return the new generation size.
    fn on_epoch(&mut self, now: Duration, signals: &NetworkSignals) -> i64;

    /// Current generation size.
    fn generation_size(&self) -> i64;

    /// Initial generation size.
    fn initial_generation_size(&self) -> i64;

    /// Generation control stats.
    fn stats(&self) -> &GenerationStats;
}

impl fmt::Debug for dyn GenerationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation controller {}.", self.name())
    }
}

/// Build a generation controller.
pub fn build_generation_controller(conf: &GenerationConfig) -> Box<dyn GenerationController> {
    match conf.generation_control_algorithm {
        GenerationControlAlgorithm::Dgsa => Box::new(Dgsa::new(
            conf.initial_generation_size,
            conf.rtt_threshold,
            conf.grtt_smoothing,
        )),
        GenerationControlAlgorithm::Fixed => Box::new(Fixed::new(conf.initial_generation_size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_control_name() {
        let cases = [
            ("dgsa", Ok(GenerationControlAlgorithm::Dgsa)),
            ("Dgsa", Ok(GenerationControlAlgorithm::Dgsa)),
            ("DGSA", Ok(GenerationControlAlgorithm::Dgsa)),
            ("fixed", Ok(GenerationControlAlgorithm::Fixed)),
            ("FIXED", Ok(GenerationControlAlgorithm::Fixed)),
            ("dgas", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(GenerationControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn adjust_grow() {
        // 80 <= 100, candidate 6 + 4 = 10 < 25.
        assert_eq!(adjust_generation_size(25, 6, 80, 100), 10);
        assert_eq!(decide(25, 6, 80, 100), (10, Decision::Grow));

        // Equal to the threshold still counts as underloaded.
        assert_eq!(adjust_generation_size(25, 6, 100, 100), 10);
    }

    #[test]
    fn adjust_shrink() {
        assert_eq!(adjust_generation_size(10, 8, 150, 100), 4);
        assert_eq!(decide(10, 8, 150, 100), (4, Decision::Shrink));
    }

    #[test]
    fn adjust_rejects_candidate_at_window_edge() {
        // Candidate 9 + 4 = 13 >= 10, fall back to 9.
        assert_eq!(adjust_generation_size(10, 9, 80, 100), 9);
        assert_eq!(decide(10, 9, 80, 100), (9, Decision::Hold));

        // Candidate exactly at cwnd is rejected too.
        assert_eq!(adjust_generation_size(10, 6, 80, 100), 6);
    }

    #[test]
    fn adjust_clamps_to_window() {
        for (grtt, thresh) in [(0, 0), (80, 100), (150, 100), (i64::MAX, 0)] {
            assert_eq!(adjust_generation_size(5, 6, grtt, thresh), 5);
            assert_eq!(adjust_generation_size(5, 5, grtt, thresh), 5);
        }
        assert_eq!(decide(5, 6, 0, 0), (5, Decision::Clamp));
        assert_eq!(adjust_generation_size(0, 0, 0, 0), 0);
    }

    #[test]
    fn adjust_can_go_negative() {
        assert_eq!(adjust_generation_size(25, 3, 150, 100), -1);
        assert_eq!(adjust_generation_size(25, 0, 150, 100), -4);
    }

    #[test]
    fn adjust_never_exceeds_window() {
        for cwnd in 0..40 {
            for gs in 0..50 {
                for (grtt, thresh) in [(50, 100), (100, 100), (101, 100)] {
                    let egs = adjust_generation_size(cwnd, gs, grtt, thresh);
                    assert!(egs <= cwnd, "cwnd={} gs={} egs={}", cwnd, gs, egs);
                    if gs >= GENERATION_SIZE_STEP || gs >= cwnd || grtt <= thresh {
                        assert!(egs >= 0);
                    }
                }
            }
        }
    }

    #[test]
    fn adjust_is_deterministic() {
        let a = adjust_generation_size(25, 6, 80, 100);
        let b = adjust_generation_size(25, 6, 80, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn adjust_saturates() {
        assert_eq!(adjust_generation_size(i64::MAX, i64::MAX - 1, 0, 0), i64::MAX - 1);
        assert_eq!(adjust_generation_size(i64::MAX, i64::MIN, 1, 0), i64::MIN);
    }

    #[test]
    fn duration_nanos() {
        assert_eq!(duration_to_nanos(Duration::from_millis(80)), 80_000_000);
        assert_eq!(duration_to_nanos(Duration::from_micros(100_500)), 100_500_000);
        assert_eq!(duration_to_nanos(Duration::MAX), i64::MAX);
    }

    #[test]
    fn build_controllers() {
        let mut conf = GenerationConfig::default();
        let c = build_generation_controller(&conf);
        assert_eq!(c.name(), "DGSA");
        assert_eq!(c.generation_size(), crate::DEFAULT_GENERATION_SIZE);

        conf.set_generation_control_algorithm(GenerationControlAlgorithm::Fixed);
        conf.set_initial_generation_size(12);
        let c = build_generation_controller(&conf);
        assert_eq!(c.name(), "FIXED");
        assert_eq!(c.generation_size(), 12);
        assert_eq!(format!("{:?}", c), "generation controller FIXED.");
    }

    #[test]
    fn stats_record() {
        let mut stats = GenerationStats::default();
        stats.record(Decision::Grow, 10);
        stats.record(Decision::Shrink, 6);
        stats.record(Decision::Hold, 6);
        stats.record(Decision::Clamp, 5);
        assert_eq!(stats.epochs, 4);
        assert_eq!(stats.grows, 1);
        assert_eq!(stats.shrinks, 1);
        assert_eq!(stats.holds, 1);
        assert_eq!(stats.clamps, 1);
        assert_eq!(stats.last_generation_size, 5);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.starts_with("{\"epochs\":4,"));
    }
}

mod dgsa;
mod fixed;
pub mod grtt;
