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

//! Discrete-event harness for send sessions and generation control.
//!
//! The [`Simulator`] owns the [`VirtualClock`]. Sessions and the generation
//! controller only register timers on it; the simulator pops them in time
//! order and dispatches each one to its owner, running every callback to
//! completion before the next one.

use std::cell::Cell;
use std::cmp;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use log::debug;
use log::info;
use log::trace;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use serde::Serialize;
use slab::Slab;

use crate::generation_control::GenerationController;
use crate::generation_control::NetworkSignals;
use crate::session::SendSession;
use crate::session::SessionId;
use crate::session::SessionState;
use crate::timer_queue::TimerEvent;
use crate::timer_queue::TimerHandle;
use crate::timer_queue::TimerKind;
use crate::timer_queue::TimerService;
use crate::timer_queue::VirtualClock;
use crate::Error;
use crate::MIN_ADAPTATION_INTERVAL;
use crate::PacketSink;
use crate::Result;
use crate::SessionConfig;

/// Owner id of the adaptation timer. Session ids are slab keys and never
/// reach it.
const ADAPTATION_OWNER: u64 = u64::MAX;

/// Source of the network readings fed to each adaptation epoch.
pub trait SignalSource {
    /// Return the readings at virtual time `now`.
    fn signals(&mut self, now: Duration) -> NetworkSignals;
}

/// Static readings.
impl SignalSource for NetworkSignals {
    fn signals(&mut self, _now: Duration) -> NetworkSignals {
        *self
    }
}

/// Replays recorded readings in order, then repeats the last one.
#[derive(Debug, Clone)]
pub struct SignalTrace {
    samples: Vec<NetworkSignals>,
    next: usize,
}

impl SignalTrace {
    /// Create a trace. An empty trace yields a zero window and zero GRTT.
    pub fn new(samples: Vec<NetworkSignals>) -> Self {
        Self { samples, next: 0 }
    }
}

impl SignalSource for SignalTrace {
    fn signals(&mut self, _now: Duration) -> NetworkSignals {
        let s = match self.samples.get(self.next) {
            Some(s) => *s,
            None => self
                .samples
                .last()
                .copied()
                .unwrap_or(NetworkSignals::new(0, Duration::ZERO)),
        };
        self.next = self.next.saturating_add(1);
        s
    }
}

/// One generation size decision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct EgsRecord {
    /// Virtual time of the epoch.
    pub time: Duration,

    /// Readings fed to the epoch.
    pub signals: NetworkSignals,

    /// Adjusted generation size.
    pub egs: i64,
}

/// Packet sink counting the traffic per peer.
#[derive(Debug, Default)]
pub struct CountingSink {
    packets: Cell<u64>,
    bytes: Cell<u64>,
    peers: RefCell<FxHashMap<SocketAddr, u64>>,
}

impl CountingSink {
    /// Total packets sent.
    pub fn packets(&self) -> u64 {
        self.packets.get()
    }

    /// Total bytes sent.
    pub fn bytes(&self) -> u64 {
        self.bytes.get()
    }

    /// Packets sent to `peer`.
    pub fn packets_to(&self, peer: &SocketAddr) -> u64 {
        self.peers.borrow().get(peer).copied().unwrap_or(0)
    }
}

impl PacketSink for CountingSink {
    fn on_packet_send(&self, peer: SocketAddr, size: usize) -> Result<()> {
        self.packets.set(self.packets.get().saturating_add(1));
        self.bytes.set(self.bytes.get().saturating_add(size as u64));
        *self.peers.borrow_mut().entry(peer).or_insert(0) += 1;
        Ok(())
    }
}

struct Adaptation {
    controller: Box<dyn GenerationController>,
    signals: Box<dyn SignalSource>,
    interval: Duration,
    timer: Option<TimerHandle>,
}

/// A discrete-event simulation of send sessions on one virtual timeline.
pub struct Simulator {
    /// The virtual clock shared with every session.
    clock: Rc<VirtualClock>,

    /// Transport shared by every session.
    sink: Rc<dyn PacketSink>,

    /// Sessions indexed by id.
    sessions: Slab<SendSession>,

    /// Periodic generation size adaptation.
    adaptation: Option<Adaptation>,

    /// Every adaptation decision, in time order.
    egs_history: Vec<EgsRecord>,

    /// Scheduled start and stop timers that have not fired yet.
    lifecycle_timers: FxHashSet<TimerHandle>,
}

impl Simulator {
    /// Create a simulator at virtual time zero.
    pub fn new(sink: Rc<dyn PacketSink>) -> Self {
        Self {
            clock: Rc::new(VirtualClock::new()),
            sink,
            sessions: Slab::new(),
            adaptation: None,
            egs_history: Vec::new(),
            lifecycle_timers: FxHashSet::default(),
        }
    }

    /// The virtual clock.
    pub fn clock(&self) -> &Rc<VirtualClock> {
        &self.clock
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Create a configured, idle session.
    pub fn add_session(&mut self, conf: &SessionConfig) -> Result<SessionId> {
        conf.validate()?;

        let entry = self.sessions.vacant_entry();
        let id = entry.key() as SessionId;
        let clock: Rc<dyn TimerService> = self.clock.clone();
        let mut session = SendSession::new(id, clock, self.sink.clone());
        session.configure_with(conf)?;
        entry.insert(session);

        debug!("simulator add session {} to {}", id, conf.peer());
        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> Option<&SendSession> {
        self.sessions.get(id as usize)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut SendSession> {
        self.sessions.get_mut(id as usize)
    }

    /// Iterate over all sessions.
    pub fn sessions(&self) -> impl Iterator<Item = &SendSession> {
        self.sessions.iter().map(|(_, s)| s)
    }

    /// Start the session at virtual time `at`, or now if `at` has passed.
    pub fn schedule_start(&mut self, id: SessionId, at: Duration) -> Result<TimerHandle> {
        self.schedule_at(id, at, TimerKind::Start)
    }

    /// Stop the session at virtual time `at`, or now if `at` has passed.
    pub fn schedule_stop(&mut self, id: SessionId, at: Duration) -> Result<TimerHandle> {
        self.schedule_at(id, at, TimerKind::Stop)
    }

    fn schedule_at(&mut self, id: SessionId, at: Duration, kind: TimerKind) -> Result<TimerHandle> {
        if !self.sessions.contains(id as usize) {
            return Err(Error::InvalidState(format!("unknown session {}", id)));
        }
        let delay = at.saturating_sub(self.clock.now());
        let handle = self.clock.schedule_after(delay, TimerEvent::new(id, kind));
        self.lifecycle_timers.insert(handle);
        Ok(handle)
    }

    /// Run the generation controller once per `interval`, starting now.
    /// Intervals shorter than [`MIN_ADAPTATION_INTERVAL`] are raised to it.
    ///
    /// Replaces any controller set before.
    pub fn set_generation_controller(
        &mut self,
        controller: Box<dyn GenerationController>,
        signals: Box<dyn SignalSource>,
        interval: Duration,
    ) {
        let interval = cmp::max(interval, MIN_ADAPTATION_INTERVAL);
        if let Some(timer) = self.adaptation.take().and_then(|a| a.timer) {
            self.clock.cancel(timer);
        }

        info!(
            "simulator generation control {} every {:?}",
            controller.name(),
            interval
        );
        let timer = self.clock.schedule_after(
            Duration::ZERO,
            TimerEvent::new(ADAPTATION_OWNER, TimerKind::Adaptation),
        );
        self.adaptation = Some(Adaptation {
            controller,
            signals,
            interval,
            timer: Some(timer),
        });
    }

    /// The generation controller, if any.
    pub fn generation_controller(&self) -> Option<&dyn GenerationController> {
        self.adaptation.as_ref().map(|a| a.controller.as_ref())
    }

    /// Every adaptation decision recorded since the last
    /// [`take_egs_history`](Self::take_egs_history).
    pub fn egs_history(&self) -> &[EgsRecord] {
        &self.egs_history
    }

    /// Drain the recorded adaptation decisions.
    pub fn take_egs_history(&mut self) -> Vec<EgsRecord> {
        std::mem::take(&mut self.egs_history)
    }

    /// Stop generation size adaptation.
    pub fn stop_adaptation(&mut self) {
        if let Some(timer) = self.adaptation.as_mut().and_then(|a| a.timer.take()) {
            self.clock.cancel(timer);
        }
    }

    /// Fire every timer due up to `deadline` in time order, then move the
    /// clock to `deadline`.
    ///
    /// A transport failure stops the run at the failing event and is returned
    /// to the caller, who may inspect the session and run again.
    pub fn run_until(&mut self, deadline: Duration) -> Result<()> {
        while let Some((handle, event)) = self.clock.fire_next(deadline) {
            self.dispatch(handle, event)?;
        }
        self.clock.advance_to(deadline);
        Ok(())
    }

    /// Fire timers until no session has a pending send and no start or stop
    /// is scheduled. Adaptation epochs alone do not keep the run going.
    pub fn run(&mut self) -> Result<()> {
        while self.is_active() {
            let deadline = match self.clock.next_timeout() {
                Some(t) => t,
                None => break,
            };
            self.run_until(deadline)?;
        }
        Ok(())
    }

    /// Whether a session has a pending send, or a start or stop is scheduled.
    pub fn is_active(&self) -> bool {
        !self.lifecycle_timers.is_empty()
            || self
                .sessions
                .iter()
                .any(|(_, s)| s.pending_timer().is_some())
    }

    fn dispatch(&mut self, handle: TimerHandle, event: TimerEvent) -> Result<()> {
        trace!("simulator {:?} dispatch {:?}", self.clock.now(), event);

        if event.kind == TimerKind::Adaptation {
            return self.on_adaptation(handle);
        }

        self.lifecycle_timers.remove(&handle);
        let session = match self.sessions.get_mut(event.owner as usize) {
            Some(s) => s,
            None => return Ok(()),
        };
        match event.kind {
            TimerKind::Start => {
                if session.state() == SessionState::Stopped {
                    debug!("{} stopped before start", session.trace_id());
                    return Ok(());
                }
                session.start()
            }
            TimerKind::Send => session.on_timeout(handle),
            TimerKind::Stop => {
                session.stop();
                Ok(())
            }
            TimerKind::Adaptation => Ok(()),
        }
    }

    fn on_adaptation(&mut self, handle: TimerHandle) -> Result<()> {
        let now = self.clock.now();
        let a = match self.adaptation.as_mut() {
            Some(a) if a.timer == Some(handle) => a,
            _ => return Ok(()),
        };

        let signals = a.signals.signals(now);
        let egs = a.controller.on_epoch(now, &signals);
        debug!(
            "simulator {:?} {} cwnd={} grtt={:?} egs={}",
            now,
            a.controller.name(),
            signals.cwnd,
            signals.grtt,
            egs
        );
        self.egs_history.push(EgsRecord {
            time: now,
            signals,
            egs,
        });

        a.timer = Some(self.clock.schedule_after(
            a.interval,
            TimerEvent::new(ADAPTATION_OWNER, TimerKind::Adaptation),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation_control::Dgsa;
    use crate::generation_control::Fixed;

    fn new_sim() -> (Simulator, Rc<CountingSink>) {
        let sink = Rc::new(CountingSink::default());
        (Simulator::new(sink.clone()), sink)
    }

    fn conf(target_count: u32) -> SessionConfig {
        let mut c = SessionConfig::default();
        c.set_target_count(target_count);
        c
    }

    #[test]
    fn scheduled_start_and_stop() -> Result<()> {
        let (mut sim, sink) = new_sim();
        let id = sim.add_session(&conf(10))?;
        sim.schedule_start(id, Duration::from_secs(2))?;
        sim.schedule_stop(id, Duration::from_secs(10))?;

        sim.run_until(Duration::from_secs(1))?;
        assert_eq!(sim.session(id).unwrap().state(), SessionState::Idle);
        assert!(sim.is_active());

        sim.run_until(Duration::from_secs(20))?;
        let s = sim.session(id).unwrap();
        // Sends at 2..=9 s; the stop at 10 s cancels the send due then.
        assert_eq!(s.sent_count(), 8);
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(sink.packets(), 8);
        assert_eq!(sink.bytes(), 8 * 536);
        assert_eq!(sim.now(), Duration::from_secs(20));
        assert!(!sim.is_active());
        assert_eq!(sim.clock().pending(), 0);
        Ok(())
    }

    #[test]
    fn sessions_share_the_timeline() -> Result<()> {
        let (mut sim, sink) = new_sim();
        let a = sim.add_session(&conf(3))?;
        let mut other = conf(5);
        other.set_peer("10.1.1.2:9".parse().unwrap());
        other.set_interval(500);
        let b = sim.add_session(&other)?;
        assert_ne!(a, b);

        sim.schedule_start(a, Duration::ZERO)?;
        sim.schedule_start(b, Duration::from_secs(1))?;
        sim.run_until(Duration::from_secs(10))?;

        assert_eq!(sim.session(a).unwrap().sent_count(), 3);
        assert_eq!(sim.session(b).unwrap().sent_count(), 5);
        assert!(sim.sessions().all(|s| s.is_exhausted()));
        assert_eq!(sink.packets(), 8);
        assert_eq!(sink.packets_to(&other.peer()), 5);
        Ok(())
    }

    #[test]
    fn stop_before_start() -> Result<()> {
        let (mut sim, sink) = new_sim();
        let id = sim.add_session(&conf(10))?;
        sim.schedule_stop(id, Duration::from_secs(1))?;
        sim.schedule_start(id, Duration::from_secs(2))?;
        sim.run_until(Duration::from_secs(5))?;

        assert_eq!(sim.session(id).unwrap().state(), SessionState::Stopped);
        assert_eq!(sink.packets(), 0);
        Ok(())
    }

    #[test]
    fn double_start_is_reported() -> Result<()> {
        let (mut sim, _) = new_sim();
        let id = sim.add_session(&conf(10))?;
        sim.schedule_start(id, Duration::from_secs(1))?;
        sim.schedule_start(id, Duration::from_secs(2))?;
        assert!(matches!(
            sim.run_until(Duration::from_secs(5)),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(sim.now(), Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn unknown_session() {
        let (mut sim, _) = new_sim();
        assert!(matches!(
            sim.schedule_start(3, Duration::ZERO),
            Err(Error::InvalidState(_))
        ));
        assert!(sim.session(3).is_none());
    }

    #[test]
    fn invalid_session_config() {
        let (mut sim, _) = new_sim();
        let mut c = conf(10);
        c.set_packet_size(0);
        assert!(matches!(sim.add_session(&c), Err(Error::InvalidConfig(_))));
        assert_eq!(sim.sessions().count(), 0);
    }

    #[test]
    fn adaptation_epochs() -> Result<()> {
        let (mut sim, _) = new_sim();
        let signals = NetworkSignals::new(25, Duration::from_millis(80));
        sim.set_generation_controller(
            Box::new(Dgsa::new(6, Duration::from_millis(100), false)),
            Box::new(signals),
            Duration::from_secs(1),
        );

        sim.run_until(Duration::from_millis(4500))?;
        let egs: Vec<i64> = sim.egs_history().iter().map(|r| r.egs).collect();
        assert_eq!(egs, vec![10, 14, 18, 22, 22]);
        assert_eq!(sim.egs_history()[1].time, Duration::from_secs(1));
        assert_eq!(sim.egs_history()[1].signals, signals);

        let c = sim.generation_controller().unwrap();
        assert_eq!(c.name(), "DGSA");
        assert_eq!(c.generation_size(), 22);
        assert_eq!(c.stats().epochs, 5);

        sim.stop_adaptation();
        sim.run_until(Duration::from_secs(10))?;
        assert_eq!(sim.egs_history().len(), 5);
        assert_eq!(sim.clock().pending(), 0);
        Ok(())
    }

    #[test]
    fn adaptation_with_trace() -> Result<()> {
        let (mut sim, _) = new_sim();
        let trace = SignalTrace::new(vec![
            NetworkSignals::new(25, Duration::from_millis(80)),
            NetworkSignals::new(25, Duration::from_millis(150)),
            NetworkSignals::new(8, Duration::from_millis(150)),
        ]);
        sim.set_generation_controller(
            Box::new(Dgsa::new(6, Duration::from_millis(100), false)),
            Box::new(trace),
            Duration::from_secs(1),
        );
        sim.run_until(Duration::from_secs(3))?;

        // grow, shrink, shrink, then the last reading repeats: 2 - 4 = -2.
        let egs: Vec<i64> = sim.egs_history().iter().map(|r| r.egs).collect();
        assert_eq!(egs, vec![10, 6, 2, -2]);
        Ok(())
    }

    #[test]
    fn replace_controller() -> Result<()> {
        let (mut sim, _) = new_sim();
        let signals = NetworkSignals::new(25, Duration::from_millis(80));
        sim.set_generation_controller(
            Box::new(Dgsa::new(6, Duration::from_millis(100), false)),
            Box::new(signals),
            Duration::from_secs(1),
        );
        sim.run_until(Duration::from_millis(1500))?;
        assert_eq!(sim.egs_history().len(), 2);

        sim.set_generation_controller(
            Box::new(Fixed::new(8)),
            Box::new(signals),
            Duration::from_secs(1),
        );
        sim.run_until(Duration::from_millis(2600))?;
        let egs: Vec<i64> = sim.egs_history().iter().map(|r| r.egs).collect();
        assert_eq!(egs, vec![10, 14, 8, 8]);
        assert_eq!(sim.clock().pending(), 1);
        Ok(())
    }

    #[test]
    fn run_to_completion() -> Result<()> {
        let (mut sim, sink) = new_sim();
        sim.set_generation_controller(
            Box::new(Fixed::new(8)),
            Box::new(NetworkSignals::new(25, Duration::from_millis(80))),
            Duration::from_secs(1),
        );
        let id = sim.add_session(&conf(5))?;
        sim.schedule_start(id, Duration::from_secs(3))?;

        sim.run()?;
        assert_eq!(sink.packets(), 5);
        assert_eq!(sim.now(), Duration::from_secs(7));
        assert!(!sim.is_active());
        assert_eq!(sim.egs_history().len(), 8);

        // Nothing left to do.
        sim.run()?;
        assert_eq!(sim.now(), Duration::from_secs(7));
        Ok(())
    }

    #[test]
    fn zero_adaptation_interval() -> Result<()> {
        let (mut sim, _) = new_sim();
        sim.set_generation_controller(
            Box::new(Fixed::new(8)),
            Box::new(NetworkSignals::new(25, Duration::from_millis(80))),
            Duration::ZERO,
        );
        sim.run_until(Duration::from_secs(1))?;

        // One epoch per millisecond, both ends included.
        assert_eq!(sim.egs_history().len(), 1001);
        assert_eq!(sim.egs_history()[1].time, MIN_ADAPTATION_INTERVAL);
        assert_eq!(sim.now(), Duration::from_secs(1));
        assert_eq!(sim.clock().pending(), 1);
        Ok(())
    }

    #[test]
    fn drain_egs_history() -> Result<()> {
        let (mut sim, _) = new_sim();
        sim.set_generation_controller(
            Box::new(Dgsa::new(6, Duration::from_millis(100), false)),
            Box::new(NetworkSignals::new(25, Duration::from_millis(80))),
            Duration::from_secs(1),
        );
        sim.run_until(Duration::from_millis(1500))?;

        let taken: Vec<i64> = sim.take_egs_history().iter().map(|r| r.egs).collect();
        assert_eq!(taken, vec![10, 14]);
        assert!(sim.egs_history().is_empty());

        sim.run_until(Duration::from_millis(2500))?;
        let egs: Vec<i64> = sim.egs_history().iter().map(|r| r.egs).collect();
        assert_eq!(egs, vec![18]);
        assert_eq!(sim.egs_history()[0].time, Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn empty_trace() {
        let mut t = SignalTrace::new(vec![]);
        assert_eq!(
            t.signals(Duration::ZERO),
            NetworkSignals::new(0, Duration::ZERO)
        );
    }
}
