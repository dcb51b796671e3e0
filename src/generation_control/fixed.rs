// Copyright (c) 2024 The TQUIC Authors.
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

use super::Decision;
use super::GenerationController;
use super::GenerationStats;
use super::NetworkSignals;

/// Fixed is a simple generation controller with a static generation size,
/// capped by the congestion window. It is intended to be used for testing
/// and experiments.
#[derive(Debug)]
pub struct Fixed {
    /// Configured generation size in packets.
    gs: i64,

    /// Generation size of the latest epoch.
    egs: i64,

    /// Generation control statistics.
    stats: GenerationStats,
}

impl Fixed {
    pub fn new(gs: i64) -> Self {
        Self {
            gs,
            egs: gs,
            stats: GenerationStats {
                last_generation_size: gs,
                ..Default::default()
            },
        }
    }
}

impl GenerationController for Fixed {
    fn name(&self) -> &str {
        "FIXED"
    }

    fn on_epoch(&mut self, _now: Duration, signals: &NetworkSignals) -> i64 {
        self.egs = cmp::min(self.gs, signals.cwnd);
        let decision = if self.egs < self.gs {
            Decision::Clamp
        } else {
            Decision::Hold
        };
        self.stats.record(decision, self.egs);
        self.egs
    }

    fn generation_size(&self) -> i64 {
        self.egs
    }

    fn initial_generation_size(&self) -> i64 {
        self.gs
    }

    fn stats(&self) -> &GenerationStats {
        &self.stats
    }
}
