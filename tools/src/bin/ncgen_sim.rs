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

//! Run one send session and a generation controller on a virtual clock.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::error;
use log::info;
use serde::Serialize;

use ncgen::build_generation_controller;
use ncgen::session::SessionStats;
use ncgen::simulator::CountingSink;
use ncgen::simulator::EgsRecord;
use ncgen::GenerationConfig;
use ncgen::GenerationStats;
use ncgen::SessionConfig;
use ncgen::SessionState;
use ncgen::Simulator;
use ncgen_tools::Algorithm;
use ncgen_tools::JitterSignals;
use ncgen_tools::Result;

#[derive(Parser, Debug)]
#[clap(name = "ncgen_sim")]
pub struct SimOpt {
    /// Destination address of the session.
    #[clap(long, default_value = "10.1.1.1:9", value_name = "ADDR")]
    pub peer: SocketAddr,

    /// Packet size in bytes.
    #[clap(long, default_value = "536", value_name = "NUM")]
    pub packet_size: u32,

    /// Number of packets to send.
    #[clap(short, long, default_value = "10", value_name = "NUM")]
    pub packets: u32,

    /// Interval between two packets in milliseconds.
    #[clap(short, long, default_value = "1000", value_name = "TIME")]
    pub interval: u64,

    /// Virtual start time of the session in milliseconds.
    #[clap(long, default_value = "2000", value_name = "TIME")]
    pub start_time: u64,

    /// Virtual stop time of the session in milliseconds.
    #[clap(long, default_value = "10000", value_name = "TIME")]
    pub stop_time: u64,

    /// Virtual duration of the simulation in milliseconds.
    #[clap(short, long, default_value = "20000", value_name = "TIME")]
    pub duration: u64,

    /// Generation control algorithm.
    #[clap(long, default_value = "dgsa", value_name = "STR")]
    pub algor: Algorithm,

    /// Congestion window in packets.
    #[clap(long, default_value = "25", value_name = "NUM")]
    pub cwnd: i64,

    /// Initial generation size in packets.
    #[clap(long, default_value = "6", value_name = "NUM")]
    pub generation_size: i64,

    /// Generation round-trip time in milliseconds.
    #[clap(long, default_value = "80", value_name = "TIME")]
    pub grtt: u64,

    /// Uniform jitter applied to each GRTT reading in milliseconds.
    #[clap(long, default_value = "0", value_name = "TIME")]
    pub grtt_jitter: u64,

    /// Smooth GRTT readings before feeding them to the controller.
    #[clap(long)]
    pub grtt_smoothing: bool,

    /// GRTT threshold in milliseconds.
    #[clap(long, default_value = "100", value_name = "TIME")]
    pub rtt_threshold: u64,

    /// Adaptation interval in milliseconds.
    #[clap(long, default_value = "1000", value_name = "TIME")]
    pub adaptation_interval: u64,

    /// Seed of the GRTT jitter.
    #[clap(long, default_value = "1", value_name = "NUM")]
    pub seed: u64,

    /// Print a JSON report to stdout.
    #[clap(long)]
    pub json: bool,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

/// Outcome of one simulation run.
#[derive(Serialize)]
struct Report {
    state: SessionState,
    sent_count: u32,
    session: SessionStats,
    generation: GenerationStats,
    egs_history: Vec<EgsRecord>,
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let option = SimOpt::parse();

    if option.packet_size == 0 {
        return Err(SimOpt::command().error(
            ErrorKind::InvalidValue,
            "Packet size must be positive",
        ));
    }

    if option.stop_time < option.start_time {
        return Err(SimOpt::command().error(
            ErrorKind::ArgumentConflict,
            "Stop time is earlier than start time",
        ));
    }

    Ok(option)
}

fn process_option(option: &SimOpt) -> Result<()> {
    env_logger::builder()
        .target(ncgen_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();
    Ok(())
}

fn run(option: &SimOpt) -> Result<Report> {
    let sink = Rc::new(CountingSink::default());
    let mut sim = Simulator::new(sink.clone());

    let mut gen_conf = GenerationConfig::default();
    gen_conf.set_generation_control_algorithm(option.algor.0);
    gen_conf.set_initial_generation_size(option.generation_size);
    gen_conf.set_rtt_threshold(option.rtt_threshold);
    gen_conf.set_adaptation_interval(option.adaptation_interval);
    gen_conf.enable_grtt_smoothing(option.grtt_smoothing);

    let signals = JitterSignals::new(
        option.cwnd,
        Duration::from_millis(option.grtt),
        Duration::from_millis(option.grtt_jitter),
        option.seed,
    );
    sim.set_generation_controller(
        build_generation_controller(&gen_conf),
        Box::new(signals),
        gen_conf.adaptation_interval,
    );

    let mut conf = SessionConfig::default();
    conf.set_peer(option.peer);
    conf.set_packet_size(option.packet_size);
    conf.set_target_count(option.packets);
    conf.set_interval(option.interval);
    let id = sim.add_session(&conf)?;
    sim.schedule_start(id, Duration::from_millis(option.start_time))?;
    sim.schedule_stop(id, Duration::from_millis(option.stop_time))?;

    sim.run_until(Duration::from_millis(option.duration))?;

    let egs_history = sim.take_egs_history();
    let session = sim
        .session(id)
        .ok_or_else(|| format!("session {} vanished", id))?;
    let generation = sim
        .generation_controller()
        .map(|c| c.stats().clone())
        .unwrap_or_default();
    info!(
        "{} {:?}: {} packets, {} bytes sent to {}, estimated generation size {}",
        session.trace_id(),
        session.state(),
        sink.packets(),
        sink.bytes(),
        option.peer,
        generation.last_generation_size
    );

    Ok(Report {
        state: session.state(),
        sent_count: session.sent_count(),
        session: session.stats().clone(),
        generation,
        egs_history,
    })
}

fn main() -> Result<()> {
    // Parse simulation option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    // Process simulation option.
    process_option(&option)?;

    // Run simulation.
    let report = match run(&option) {
        Ok(report) => report,
        Err(e) => {
            error!("simulation failed: {:?}", e);
            return Err(e);
        }
    };

    if option.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
