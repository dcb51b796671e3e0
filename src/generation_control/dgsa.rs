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

use log::trace;

use super::decide;
use super::duration_to_nanos;
use super::GenerationController;
use super::GenerationStats;
use super::GrttEstimator;
use super::NetworkSignals;

/// Dynamic generation size adjustment (DGSA).
///
/// DGSA keeps the current generation size and applies
/// [`adjust_generation_size`](super::adjust_generation_size) to it on every
/// epoch.
#[derive(Debug)]
pub struct Dgsa {
    /// Current generation size in packets.
    gs: i64,

    /// Generation size before the first epoch.
    initial_gs: i64,

    /// GRTT threshold.
    rtt_threshold: Duration,

    /// Use the smoothed GRTT rather than the latest sample.
    smoothing: bool,

    /// GRTT samples seen so far.
    grtt: Option<GrttEstimator>,

    /// Generation control statistics.
    stats: GenerationStats,
}

impl Dgsa {
    pub fn new(initial_gs: i64, rtt_threshold: Duration, smoothing: bool) -> Self {
        Self {
            gs: initial_gs,
            initial_gs,
            rtt_threshold,
            smoothing,
            grtt: None,
            stats: GenerationStats {
                last_generation_size: initial_gs,
                ..Default::default()
            },
        }
    }

    /// Return the GRTT fed to the latest epoch.
    pub fn grtt(&self) -> Option<Duration> {
        self.grtt.as_ref().map(|g| self.effective_grtt(g))
    }

    fn effective_grtt(&self, g: &GrttEstimator) -> Duration {
        if self.smoothing {
            g.smoothed_grtt()
        } else {
            g.latest_grtt()
        }
    }
}

impl GenerationController for Dgsa {
    fn name(&self) -> &str {
        "DGSA"
    }

    fn on_epoch(&mut self, now: Duration, signals: &NetworkSignals) -> i64 {
        match self.grtt.as_mut() {
            Some(g) => g.update(signals.grtt),
            None => self.grtt = Some(GrttEstimator::new(signals.grtt)),
        }
        let grtt = self
            .grtt
            .as_ref()
            .map_or(signals.grtt, |g| self.effective_grtt(g));

        // Nanosecond precision.
        let (egs, decision) = decide(
            signals.cwnd,
            self.gs,
            duration_to_nanos(grtt),
            duration_to_nanos(self.rtt_threshold),
        );
        trace!(
            "DGSA {:?} cwnd={} gs={} grtt={:?} threshold={:?} {:?} egs={}",
            now,
            signals.cwnd,
            self.gs,
            grtt,
            self.rtt_threshold,
            decision,
            egs
        );

        self.gs = egs;
        self.stats.record(decision, egs);
        egs
    }

    fn generation_size(&self) -> i64 {
        self.gs
    }

    fn initial_generation_size(&self) -> i64 {
        self.initial_gs
    }

    fn stats(&self) -> &GenerationStats {
        &self.stats
    }
}
