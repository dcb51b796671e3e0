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

#![no_main]

use std::rc::Rc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;

use ncgen::simulator::CountingSink;
use ncgen::SessionConfig;
use ncgen::Simulator;

fuzz_target!(|data: (u8, u16, u16, u16, u16)| {
    let (count, interval, start, stop, deadline) = data;
    let sink = Rc::new(CountingSink::default());
    let mut sim = Simulator::new(sink.clone());

    let mut conf = SessionConfig::default();
    conf.set_target_count(count as u32);
    conf.set_interval(interval as u64);
    let id = sim.add_session(&conf).unwrap();
    sim.schedule_start(id, Duration::from_millis(start as u64)).unwrap();
    sim.schedule_stop(id, Duration::from_millis(stop as u64)).unwrap();
    sim.run_until(Duration::from_millis(deadline as u64)).unwrap();

    let s = sim.session(id).unwrap();
    assert!(s.sent_count() <= count as u32);
    assert_eq!(s.sent_count() as u64, sink.packets());
    if s.pending_timer().is_some() {
        assert!(s.is_running());
    }
});
