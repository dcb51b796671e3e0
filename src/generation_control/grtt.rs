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

/// Generation round-trip time estimation.
///
/// GRTT is the time from sending the first packet of a generation until the
/// generation is acknowledged as decoded. Samples are smoothed with the
/// weights of RFC 6298 Section 2.
#[derive(Debug, Clone)]
pub struct GrttEstimator {
    /// The most recent GRTT sample.
    latest_grtt: Duration,

    /// Exponentially weighted moving average of the samples.
    smoothed_grtt: Duration,

    /// Mean deviation of the samples.
    grttvar: Duration,

    /// The minimum GRTT observed.
    min_grtt: Duration,

    /// The maximum GRTT observed.
    max_grtt: Duration,

    /// Number of samples.
    samples: u64,
}

impl GrttEstimator {
    /// Create an estimator from the first sample.
    pub fn new(first_sample: Duration) -> Self {
        Self {
            latest_grtt: first_sample,
            smoothed_grtt: first_sample,
            grttvar: first_sample / 2,
            min_grtt: first_sample,
            max_grtt: first_sample,
            samples: 1,
        }
    }

    /// Return the current best GRTT estimation.
    pub fn smoothed_grtt(&self) -> Duration {
        self.smoothed_grtt
    }

    /// Return the latest GRTT sample.
    pub fn latest_grtt(&self) -> Duration {
        self.latest_grtt
    }

    /// Return the variation in the GRTT samples.
    pub fn grttvar(&self) -> Duration {
        self.grttvar
    }

    pub fn min_grtt(&self) -> Duration {
        self.min_grtt
    }

    pub fn max_grtt(&self) -> Duration {
        self.max_grtt
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Update estimator with the given GRTT sample
    pub fn update(&mut self, grtt: Duration) {
        self.latest_grtt = grtt;
        self.min_grtt = cmp::min(self.min_grtt, grtt);
        self.max_grtt = cmp::max(self.max_grtt, grtt);
        self.samples = self.samples.saturating_add(1);

        let var_sample = if self.smoothed_grtt > grtt {
            self.smoothed_grtt - grtt
        } else {
            grtt - self.smoothed_grtt
        };

        self.grttvar = (3 * self.grttvar + var_sample) / 4;
        self.smoothed_grtt = (7 * self.smoothed_grtt + grtt) / 8;
    }
}
