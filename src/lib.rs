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

//! NCGEN adapts the generation size of a network-coded transport and drives
//! scheduled packet-sending sessions on a virtual clock.
//!
//! ## Components
//!
//! * **Generation size control**: [`adjust_generation_size`] decides, on each
//!   adaptation tick, how many packets to bundle into one coding generation,
//!   using the congestion window and the generation round-trip time (GRTT).
//!   The [`GenerationController`] trait wraps it into stateful controllers.
//! * **Send sessions**: [`SendSession`] models one flow's lifecycle: start,
//!   periodic emission and stop, with the pending timer cancellable at any
//!   point.
//! * **Virtual time**: [`VirtualClock`] implements the [`TimerService`] used by
//!   sessions. Nothing sleeps; the owner of the clock advances time.
//! * **Simulator**: [`Simulator`] owns a clock, a set of sessions and an
//!   optional generation controller, and dispatches timers in time order.
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use ncgen::simulator::CountingSink;
//! use ncgen::SessionConfig;
//! use ncgen::Simulator;
//!
//! let sink = Rc::new(CountingSink::default());
//! let mut sim = Simulator::new(sink.clone());
//!
//! let mut conf = SessionConfig::default();
//! conf.set_target_count(10);
//! let id = sim.add_session(&conf)?;
//! sim.schedule_start(id, Duration::from_secs(2))?;
//! sim.schedule_stop(id, Duration::from_secs(10))?;
//! sim.run_until(Duration::from_secs(20))?;
//!
//! assert_eq!(sim.session(id).map(|s| s.sent_count()), Some(8));
//! assert_eq!(sink.packets(), 8);
//! # Ok::<(), ncgen::error::Error>(())
//! ```

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::time::Duration;

/// Generation size change applied by one adaptation epoch, in packets.
pub const GENERATION_SIZE_STEP: i64 = 4;

/// Default generation size, in packets.
pub const DEFAULT_GENERATION_SIZE: i64 = 6;

/// Default congestion window, in packets.
pub const DEFAULT_CONGESTION_WINDOW: i64 = 25;

/// Default GRTT threshold separating an underloaded network from a congested
/// one.
pub const DEFAULT_RTT_THRESHOLD: Duration = Duration::from_millis(100);

/// Default period between two adaptation epochs.
pub const DEFAULT_ADAPTATION_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest adaptation interval. Shorter intervals are raised to it.
pub const MIN_ADAPTATION_INTERVAL: Duration = Duration::from_millis(1);

/// Default payload size of a packet, in bytes.
pub const DEFAULT_PACKET_SIZE: u32 = 536;

/// Default number of packets sent by a session.
pub const DEFAULT_PACKET_COUNT: u32 = 10;

/// Default period between two packets of a session.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Default destination port of a session.
pub const DEFAULT_PEER_PORT: u16 = 9;

/// A specialized [`Result`] type for ncgen operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// The transport collaborator used by send sessions.
///
/// Sends are fire-and-forget: no acknowledgment is expected. An error is
/// reported upward to whoever fired the session's timer; it is never retried
/// by the session.
pub trait PacketSink {
    /// Called when a session emits one packet of `size` bytes to `peer`.
    fn on_packet_send(&self, peer: SocketAddr, size: usize) -> Result<()>;
}

/// Parameters of a send session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Destination of the packets.
    peer: SocketAddr,

    /// Bytes per packet. Must be positive.
    packet_size: u32,

    /// Total number of packets to send.
    target_count: u32,

    /// Virtual time between two consecutive sends.
    interval: Duration,
}

impl SessionConfig {
    /// Create a session configuration.
    ///
    /// The configuration is checked when it is applied to a session.
    pub fn new(peer: SocketAddr, packet_size: u32, target_count: u32, interval: Duration) -> Self {
        Self {
            peer,
            packet_size,
            target_count,
            interval,
        }
    }

    /// Set the destination address.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }

    /// Set the packet size in bytes.
    pub fn set_packet_size(&mut self, v: u32) {
        self.packet_size = v;
    }

    /// Set the number of packets to send.
    pub fn set_target_count(&mut self, v: u32) {
        self.target_count = v;
    }

    /// Set the interval between two packets in milliseconds.
    pub fn set_interval(&mut self, millis: u64) {
        self.interval = Duration::from_millis(millis);
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 {
            return Err(Error::InvalidConfig("packet size must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)), DEFAULT_PEER_PORT),
            packet_size: DEFAULT_PACKET_SIZE,
            target_count: DEFAULT_PACKET_COUNT,
            interval: DEFAULT_SEND_INTERVAL,
        }
    }
}

/// Configurations about generation size adaptation.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// The generation control algorithm.
    pub generation_control_algorithm: GenerationControlAlgorithm,

    /// The generation size used before the first adaptation epoch, in packets.
    pub initial_generation_size: i64,

    /// GRTT at or below which the network is considered underloaded.
    pub rtt_threshold: Duration,

    /// Period between two adaptation epochs.
    pub adaptation_interval: Duration,

    /// Feed the controller a smoothed GRTT instead of the latest sample.
    pub grtt_smoothing: bool,
}

impl GenerationConfig {
    /// Set the generation control algorithm.
    pub fn set_generation_control_algorithm(&mut self, algor: GenerationControlAlgorithm) {
        self.generation_control_algorithm = algor;
    }

    /// Set the initial generation size in packets.
    pub fn set_initial_generation_size(&mut self, packets: i64) {
        self.initial_generation_size = packets;
    }

    /// Set the GRTT threshold in milliseconds.
    pub fn set_rtt_threshold(&mut self, millis: u64) {
        self.rtt_threshold = Duration::from_millis(millis);
    }

    /// Set the adaptation interval in milliseconds. Zero is raised to
    /// [`MIN_ADAPTATION_INTERVAL`].
    pub fn set_adaptation_interval(&mut self, millis: u64) {
        self.adaptation_interval =
            std::cmp::max(Duration::from_millis(millis), MIN_ADAPTATION_INTERVAL);
    }

    /// Enable or disable GRTT smoothing.
    pub fn enable_grtt_smoothing(&mut self, v: bool) {
        self.grtt_smoothing = v;
    }
}

impl Default for GenerationConfig {
    fn default() -> GenerationConfig {
        GenerationConfig {
            generation_control_algorithm: GenerationControlAlgorithm::Dgsa,
            initial_generation_size: DEFAULT_GENERATION_SIZE,
            rtt_threshold: DEFAULT_RTT_THRESHOLD,
            adaptation_interval: DEFAULT_ADAPTATION_INTERVAL,
            grtt_smoothing: false,
        }
    }
}

pub use crate::error::Error;
pub use crate::generation_control::adjust_generation_size;
pub use crate::generation_control::build_generation_controller;
pub use crate::generation_control::Decision;
pub use crate::generation_control::GenerationControlAlgorithm;
pub use crate::generation_control::GenerationController;
pub use crate::generation_control::GenerationStats;
pub use crate::generation_control::NetworkSignals;
pub use crate::session::SendSession;
pub use crate::session::SessionId;
pub use crate::session::SessionState;
pub use crate::simulator::Simulator;
pub use crate::timer_queue::TimerHandle;
pub use crate::timer_queue::TimerService;
pub use crate::timer_queue::VirtualClock;

pub mod error;

#[path = "generation_control/generation_control.rs"]
pub mod generation_control;

pub mod session;
pub mod simulator;
pub mod timer_queue;
