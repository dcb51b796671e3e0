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

//! Scheduled, cancellable packet-sending session.
//!
//! A session sends `target_count` packets of `packet_size` bytes to one peer,
//! one every `interval` of virtual time. The first packet is sent
//! synchronously by [`SendSession::start`]; each following packet is emitted
//! by [`SendSession::on_timeout`] when the session's timer fires.
//!
//! ```text
//!            start              timer (more left)
//!   Idle ──────────────▶ Active ◀──────────┐
//!     │                    │  └────────────┘
//!     │                    │ timer (last sent)
//!     │                    ▼
//!     │                Exhausted
//!     │ stop               │ stop
//!     └──────────▶ Stopped ◀┘   (stop is accepted from any state)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use log::debug;
use log::info;
use log::trace;
use log::warn;
use serde::Serialize;

use crate::timer_queue::TimerEvent;
use crate::timer_queue::TimerHandle;
use crate::timer_queue::TimerKind;
use crate::timer_queue::TimerService;
use crate::Error;
use crate::PacketSink;
use crate::Result;
use crate::SessionConfig;

/// Identifier of a send session.
pub type SessionId = u64;

/// Lifecycle state of a send session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Configured, never started.
    Idle,

    /// Started, has sent at least one packet, may have a pending timer.
    Active,

    /// All packets are sent. No timer is pending.
    Exhausted,

    /// Stopped. No transition leaves this state.
    Stopped,
}

/// Statistics about a send session.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    /// Packets handed to the transport.
    pub packets_sent: u64,

    /// Bytes handed to the transport.
    pub bytes_sent: u64,

    /// Sends rejected by the transport.
    pub send_failures: u64,

    /// Virtual time of the first packet.
    pub first_send_time: Option<Duration>,

    /// Virtual time of the latest packet.
    pub last_send_time: Option<Duration>,
}

/// A timer-driven producer of packets for one flow.
pub struct SendSession {
    /// Session id, also the owner of the session's timers.
    id: SessionId,

    /// Parameters of the flow.
    config: SessionConfig,

    /// Lifecycle state.
    state: SessionState,

    /// Packets sent since the session started. Never exceeds the target.
    sent_count: u32,

    /// The outstanding send timer, if any.
    pending: Option<TimerHandle>,

    /// The shared timer service.
    clock: Rc<dyn TimerService>,

    /// The transport collaborator.
    sink: Rc<dyn PacketSink>,

    /// Session statistics.
    stats: SessionStats,

    /// Unique trace id for debug logging.
    trace_id: String,
}

impl SendSession {
    /// Create an idle session with the default configuration.
    pub fn new(id: SessionId, clock: Rc<dyn TimerService>, sink: Rc<dyn PacketSink>) -> Self {
        Self {
            id,
            config: SessionConfig::default(),
            state: SessionState::Idle,
            sent_count: 0,
            pending: None,
            clock,
            sink,
            stats: SessionStats::default(),
            trace_id: format!("SESSION-{}", id),
        }
    }

    /// Set the flow parameters. Only allowed before the session starts.
    pub fn configure(
        &mut self,
        peer: SocketAddr,
        packet_size: u32,
        target_count: u32,
        interval: Duration,
    ) -> Result<()> {
        self.configure_with(&SessionConfig::new(
            peer,
            packet_size,
            target_count,
            interval,
        ))
    }

    /// Apply a session configuration. Only allowed before the session starts.
    pub fn configure_with(&mut self, config: &SessionConfig) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "configure {} while {:?}",
                self.trace_id, self.state
            )));
        }
        config.validate()?;

        debug!(
            "{} configured peer={} packet_size={} target_count={} interval={:?}",
            self.trace_id,
            config.peer(),
            config.packet_size(),
            config.target_count(),
            config.interval()
        );
        self.config = config.clone();
        Ok(())
    }

    /// Start the session and send the first packet.
    ///
    /// A session starts only once: starting an active, exhausted or stopped
    /// session is an error. A session with nothing to send is exhausted
    /// immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "start {} while {:?}",
                self.trace_id, self.state
            )));
        }

        self.state = SessionState::Active;
        self.sent_count = 0;
        info!(
            "{} start at {:?}, {} packets to {}",
            self.trace_id,
            self.clock.now(),
            self.config.target_count(),
            self.config.peer()
        );

        if self.config.target_count() == 0 {
            self.state = SessionState::Exhausted;
            return Ok(());
        }
        self.send_one()
    }

    /// Stop the session, cancelling the pending timer if any.
    ///
    /// Stopping is always allowed, including before start, after the last
    /// packet, and more than once.
    pub fn stop(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.clock.cancel(handle);
            trace!("{} cancel {:?}", self.trace_id, handle);
        }
        if self.state != SessionState::Stopped {
            info!(
                "{} stop at {:?} after {} packets",
                self.trace_id,
                self.clock.now(),
                self.sent_count
            );
        }
        self.state = SessionState::Stopped;
    }

    /// Handle a fired timer.
    ///
    /// Timers that are not the session's pending send timer, or that fire
    /// while the session is not active, are ignored.
    pub fn on_timeout(&mut self, handle: TimerHandle) -> Result<()> {
        if self.state != SessionState::Active || self.pending != Some(handle) {
            trace!(
                "{} ignore stale {:?} while {:?}",
                self.trace_id,
                handle,
                self.state
            );
            return Ok(());
        }

        self.pending = None;
        self.send_one()
    }

    /// Retry after a transport failure left the session active without a
    /// pending timer. Does nothing in any other situation.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != SessionState::Active
            || self.pending.is_some()
            || self.sent_count >= self.config.target_count()
        {
            return Ok(());
        }

        debug!("{} resume after {} packets", self.trace_id, self.sent_count);
        self.send_one()
    }

    /// Emit one packet and schedule the next one if more remain.
    fn send_one(&mut self) -> Result<()> {
        let now = self.clock.now();
        let size = self.config.packet_size() as usize;

        if let Err(e) = self.sink.on_packet_send(self.config.peer(), size) {
            self.stats.send_failures = self.stats.send_failures.saturating_add(1);
            warn!(
                "{} send packet {} failed: {:?}",
                self.trace_id,
                self.sent_count + 1,
                e
            );
            return Err(match e {
                Error::TransportFailure(reason) => Error::TransportFailure(reason),
                e => Error::TransportFailure(e.to_string()),
            });
        }

        self.sent_count += 1;
        self.stats.packets_sent = self.stats.packets_sent.saturating_add(1);
        self.stats.bytes_sent = self.stats.bytes_sent.saturating_add(size as u64);
        self.stats.first_send_time.get_or_insert(now);
        self.stats.last_send_time = Some(now);
        trace!(
            "{} sent packet {}/{} size={} at {:?}",
            self.trace_id,
            self.sent_count,
            self.config.target_count(),
            size,
            now
        );

        if self.sent_count < self.config.target_count() {
            let event = TimerEvent::new(self.id, TimerKind::Send);
            self.pending = Some(self.clock.schedule_after(self.config.interval(), event));
        } else {
            self.state = SessionState::Exhausted;
            debug!("{} exhausted at {:?}", self.trace_id, now);
        }
        Ok(())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session was started and not stopped.
    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Active | SessionState::Exhausted)
    }

    /// Whether every packet was sent.
    pub fn is_exhausted(&self) -> bool {
        self.state == SessionState::Exhausted
    }

    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The outstanding send timer, if any.
    pub fn pending_timer(&self) -> Option<TimerHandle> {
        self.pending
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

impl fmt::Debug for SendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} sent={}/{} pending={:?}",
            self.trace_id,
            self.state,
            self.sent_count,
            self.config.target_count(),
            self.pending
        )
    }
}
