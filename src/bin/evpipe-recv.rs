// Evpipe Receiver CLI
// Recreates the announced devices through uinput and injects the streamed events

use std::io::{self, BufReader};

use clap::{ArgAction, Parser};

use evpipe_core::output::{receive_session, UinputFactory};

/// Replay a forwarded input event stream on local virtual devices
#[derive(Parser, Debug)]
#[command(name = "evpipe-recv")]
#[command(version)]
#[command(about = "Replay a forwarded input event stream on virtual devices", long_about = None)]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

fn run() -> anyhow::Result<u64> {
    let input = BufReader::new(io::stdin().lock());
    let injected = receive_session(input, &mut UinputFactory)?;
    Ok(injected)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match run() {
        Ok(injected) => log::info!("Session ended after {} event(s)", injected),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
