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

use std::fs::File;
use std::time::Duration;

use clap::builder::PossibleValue;
use clap::ValueEnum;
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use ncgen::simulator::SignalSource;
use ncgen::GenerationControlAlgorithm;
use ncgen::NetworkSignals;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Generation control algorithm selectable from the command line.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct Algorithm(pub GenerationControlAlgorithm);

impl ValueEnum for Algorithm {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Algorithm(GenerationControlAlgorithm::Dgsa),
            Algorithm(GenerationControlAlgorithm::Fixed),
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self.0 {
            GenerationControlAlgorithm::Dgsa => PossibleValue::new("dgsa"),
            GenerationControlAlgorithm::Fixed => PossibleValue::new("fixed"),
        })
    }
}

/// Return the env_logger target: the given file, or `stderr`.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    if let Some(path) = log_file {
        let file = File::create(path)?;
        return Ok(env_logger::Target::Pipe(Box::new(file)));
    }
    Ok(env_logger::Target::Stderr)
}

/// Synthetic network readings: a fixed window and a GRTT drawn uniformly
/// from `grtt ± jitter`.
pub struct JitterSignals {
    cwnd: i64,
    grtt: Duration,
    jitter: Duration,
    rng: StdRng,
}

impl JitterSignals {
    /// Create a source. The same seed always yields the same readings.
    pub fn new(cwnd: i64, grtt: Duration, jitter: Duration, seed: u64) -> Self {
        Self {
            cwnd,
            grtt,
            jitter,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SignalSource for JitterSignals {
    fn signals(&mut self, now: Duration) -> NetworkSignals {
        if self.jitter.is_zero() {
            return NetworkSignals::new(self.cwnd, self.grtt);
        }

        let low = self.grtt.saturating_sub(self.jitter);
        let high = self.grtt.saturating_add(self.jitter);
        let grtt = self.rng.gen_range(low..=high);
        debug!("signals {:?} cwnd={} grtt={:?}", now, self.cwnd, grtt);
        NetworkSignals::new(self.cwnd, grtt)
    }
}
