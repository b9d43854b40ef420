// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Runs the host-peering anomaly detector over pcap savefiles.

use clap::Parser;
use sigforge::detector::AnomalyDetector;
use sigforge::net::PcapReader;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(about = "Scan pcap savefiles for hosts with anomalous peering behavior")]
struct Args {
    /// Print every flagged host as soon as it trips, not just the
    /// final set
    #[arg(short, long)]
    verbose: bool,

    /// Pcap savefiles, processed in order
    #[arg(required = true)]
    pcap_files: Vec<PathBuf>,
}

fn run(args: &Args) -> sigforge::Result<()> {
    let mut detector: Option<AnomalyDetector> = None;
    let mut frames = 0u64;

    for path in &args.pcap_files {
        log::info!("processing {path:?}");
        let reader = PcapReader::open(path)?;
        let link_type = reader.link_type();

        let detector =
            detector.get_or_insert_with(|| AnomalyDetector::new(link_type));

        for frame in reader.frames() {
            let frame = frame?;
            let before = detector.current_generation();

            detector.process_packet(frame.timestamp, &frame.data);
            frames += 1;

            if args.verbose && detector.current_generation() != before {
                for host in detector.anomalous_hosts() {
                    println!(
                        "generation {}: {host} is anomalous",
                        detector.current_generation(),
                    );
                }
            }
        }
    }

    let Some(detector) = detector else {
        return Err(sigforge::Error::InvalidConfig("no input files"));
    };

    log::info!(
        "{frames} frames, {} hosts tracked, {} dropped",
        detector.tracked_host_count(),
        detector.dropped_packets(),
    );

    let mut flagged: Vec<String> = detector
        .anomalous_hosts()
        .map(ToString::to_string)
        .collect();
    flagged.sort();

    for host in &flagged {
        println!("{host}");
    }
    log::info!("{} hosts currently flagged", flagged.len());

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
