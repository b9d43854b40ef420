// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Builds a benign-traffic Bloom filter from pcap savefiles.

use clap::Parser;
use sigforge::bloom::{
    build::{build_from_pcaps, BuildStrategy},
    BloomFilter,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(about = "Create a benign n-gram bloom filter from pcap files")]
struct Args {
    /// Merge two existing filter files instead of building one
    #[arg(short, long)]
    merge: bool,

    /// Run the multithreaded build pipeline
    #[arg(short, long)]
    thread: bool,

    /// Number of hasher threads
    #[arg(short = 'T', long, default_value_t = 2)]
    thread_num: usize,

    /// Desired probability of false alarm
    #[arg(long, default_value_t = 0.00001)]
    prob_fa: f64,

    /// Expected number of insertion strings
    #[arg(short, long, default_value_t = 10)]
    num_insertions: u64,

    /// IP protocol number
    #[arg(long, default_value_t = 6)]
    ip_proto: u8,

    /// TCP/UDP port number
    #[arg(long, default_value_t = 80)]
    port_num: u16,

    /// Minimum n-gram size
    #[arg(long, default_value_t = 4)]
    min_depth: usize,

    /// Maximum n-gram size
    #[arg(long, default_value_t = 4)]
    max_depth: usize,

    /// Output file name
    #[arg(short, long, default_value = "out.bloom")]
    out_file: PathBuf,

    /// Input files: pcap savefiles, or two filter files with --merge
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn run(args: &Args) -> sigforge::Result<()> {
    if args.merge {
        let [first, second] = args.inputs.as_slice() else {
            return Err(sigforge::Error::InvalidConfig(
                "--merge takes exactly two filter files",
            ));
        };

        let a = BloomFilter::from_file(first, true)?;
        let b = BloomFilter::from_file(second, true)?;
        a.write_combined(&b, &args.out_file)?;
        return Ok(());
    }

    let filter = BloomFilter::with_capacity(
        args.num_insertions,
        args.prob_fa,
        args.ip_proto,
        args.port_num,
        args.min_depth,
        args.max_depth,
    );

    let strategy = if args.thread {
        BuildStrategy::Pipelined {
            hashers: args.thread_num,
        }
    } else {
        BuildStrategy::Direct
    };

    let (filter, report) = build_from_pcaps(filter, &args.inputs, strategy)?;
    log::info!(
        "{} frames, {} payload bytes into {:?}",
        report.frames,
        report.payload_bytes,
        args.out_file,
    );

    filter.flush(&args.out_file)
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
