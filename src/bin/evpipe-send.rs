// Evpipe Sender CLI
// Reads local input devices and streams their events to stdout or a consumer command

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};

use evpipe_core::delivery::{CommandLauncher, DeliveryChannel};
use evpipe_core::event::{LoopExit, SourceLoop};
use evpipe_core::input::{find_device_by_name, read_capabilities, SourceDevice};
use evpipe_core::protocol::{DeviceDescriptor, Handshake};
use evpipe_core::settings::Settings;
use evpipe_core::translate::{Passthrough, RecordHandler, Translator};

/// Forward input device events over a byte stream
#[derive(Parser, Debug)]
#[command(name = "evpipe-send")]
#[command(version)]
#[command(about = "Forward input device events over a byte stream", long_about = None)]
struct Args {
    /// Source device path (can be used multiple times)
    #[arg(short = 'p', long = "device-by-path", value_name = "PATH")]
    device_paths: Vec<PathBuf>,

    /// Source device name (can be used multiple times)
    #[arg(short = 'n', long = "device-by-name", value_name = "NAME")]
    device_names: Vec<String>,

    /// Grab the devices so local applications stop seeing their events
    #[arg(short, long)]
    exclusive: bool,

    /// Translate a single remote control into a synthetic keyboard and mouse
    #[arg(short, long)]
    remote: bool,

    /// Pipe the stream into this shell command, restarting it when it dies
    #[arg(short = 'c', long, value_name = "COMMAND")]
    output_command: Option<String>,

    /// TOML configuration file
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

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

/// Resolve every requested device to a path, paths first.
fn resolve_paths(args: &Args) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = args.device_paths.clone();
    for name in &args.device_names {
        paths.push(find_device_by_name(name)?);
    }
    if paths.is_empty() {
        bail!("no source device given (use --device-by-path or --device-by-name)");
    }
    if args.remote && paths.len() != 1 {
        bail!("--remote translates exactly one device, {} given", paths.len());
    }
    Ok(paths)
}

/// The handshake devices and the per-source handlers feeding them.
fn build_sources(
    args: &Args,
    settings: &Settings,
    paths: &[PathBuf],
) -> anyhow::Result<(Vec<DeviceDescriptor>, Vec<Box<dyn RecordHandler>>)> {
    if args.remote {
        let profile = settings.remote_profile();
        let descriptors = profile.descriptors();
        let handler: Box<dyn RecordHandler> = Box::new(Translator::new(profile));
        return Ok((descriptors, vec![handler]));
    }

    let mut descriptors = Vec::with_capacity(paths.len());
    let mut handlers: Vec<Box<dyn RecordHandler>> = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        descriptors.push(read_capabilities(path)?);
        handlers.push(Box::new(Passthrough::new(index as u32)));
    }
    Ok((descriptors, handlers))
}

fn spawn_signal_handler(running: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    std::thread::spawn(move || {
        if let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) {
            if let Some(signal) = signals.forever().next() {
                log::info!("Received signal {}, shutting down", signal);
                running.store(false, Ordering::SeqCst);
            }
        }
    });
}

fn run(args: Args) -> anyhow::Result<()> {
    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(path) = settings.source_path() {
        log::info!("Loaded settings from {}", path.display());
    }

    let paths = resolve_paths(&args)?;
    let (descriptors, handlers) = build_sources(&args, &settings, &paths)?;
    let handshake = Handshake::new(descriptors)?;

    // Remote mode owns its device; passthrough grabs only on request
    let exclusive = args.remote || args.exclusive;
    let mut source_loop = SourceLoop::new(settings.grab_policy());
    for (path, handler) in paths.iter().zip(handlers) {
        let device = SourceDevice::open(path)?;
        log::info!("Reading {}", path.display());
        source_loop.add_device(device, handler, exclusive)?;
    }

    let output_command = args
        .output_command
        .clone()
        .or_else(|| settings.sender.output_command.clone());
    let mut channel = match output_command {
        Some(command) => {
            DeliveryChannel::to_process(Box::new(CommandLauncher::new(command)), handshake)?
        }
        None => DeliveryChannel::to_stream(Box::new(std::io::stdout()), handshake)?,
    };

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    let exit = source_loop.run(&mut channel, &running, settings.sender.poll_timeout_ms)?;
    source_loop.release_all();
    shut_down(exit, channel);
    Ok(())
}

/// A finished session lets the consumer drain; a signal terminates it.
fn shut_down(exit: LoopExit, channel: DeliveryChannel) {
    match exit {
        LoopExit::EndOfStream(label) => {
            log::info!("{} closed, session finished", label);
            channel.finish();
        }
        LoopExit::Stopped => {
            log::info!("Stopped, terminating consumer");
            channel.terminate();
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Grab failure after the bounded retries lands here too
    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["evpipe-send", "--device-by-path", "/dev/input/event3"]);

        assert_eq!(args.device_paths, vec![PathBuf::from("/dev/input/event3")]);
        assert!(args.device_names.is_empty());
        assert!(!args.exclusive);
        assert!(!args.remote);
        assert_eq!(args.output_command, None);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_args_with_options() {
        let args = Args::parse_from([
            "evpipe-send",
            "-p",
            "/dev/input/event3",
            "-n",
            "Logitech USB Receiver",
            "-e",
            "-c",
            "ssh media-pc evpipe-recv",
            "-vv",
        ]);

        assert_eq!(args.device_names, vec!["Logitech USB Receiver".to_string()]);
        assert!(args.exclusive);
        assert_eq!(args.output_command.as_deref(), Some("ssh media-pc evpipe-recv"));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_resolve_paths_requires_a_device() {
        let args = Args::parse_from(["evpipe-send"]);
        assert!(resolve_paths(&args).is_err());
    }

    #[test]
    fn test_remote_mode_takes_one_device() {
        let args = Args::parse_from([
            "evpipe-send",
            "--remote",
            "-p",
            "/dev/input/event3",
            "-p",
            "/dev/input/event4",
        ]);
        assert!(resolve_paths(&args).is_err());
    }

    #[test]
    fn test_remote_sources_use_profile() {
        let args = Args::parse_from(["evpipe-send", "--remote", "-p", "/dev/input/event3"]);
        let settings = Settings::new();
        let paths = resolve_paths(&args).unwrap();

        let (descriptors, handlers) = build_sources(&args, &settings, &paths).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].name, "keyboard");
        assert_eq!(descriptors[1].name, "mouse");
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn test_stop_terminates_consumer_promptly() {
        let handshake = Handshake::new(vec![DeviceDescriptor::new("kbd", 1, 1)]).unwrap();
        let channel =
            DeliveryChannel::to_process(Box::new(CommandLauncher::new("sleep 30")), handshake)
                .unwrap();

        let started = std::time::Instant::now();
        shut_down(LoopExit::Stopped, channel);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
