//! # Strata
//!
//! Runs the compositor core on the headless backend. Outputs are created
//! from `--outputs`, a keyboard and a pointer are plugged in, and events
//! from `--script` are fed through the calloop driver until the script
//! ends or a quit binding fires.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use std::fs;
use std::path::Path;

use strata::backend::headless::HeadlessBackend;
use strata::backend::Mode;
use strata::input::DeviceKind;
use strata::ipc::JsonLinesSink;
use strata::{CompositorLoop, Event, Server, StrataConfig};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Tag-based tiling compositor core, driven by a headless backend")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/strata/strata.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Headless outputs to create, e.g. "1920x1080,1280x1024"
    #[arg(long, default_value = "1920x1080")]
    outputs: String,

    /// JSON array of events to replay. Outputs get handles 1..=N in the
    /// order given; the keyboard and pointer follow.
    #[arg(long)]
    script: Option<String>,

    /// Write status snapshots to stdout as JSON lines
    #[arg(long)]
    status: bool,
}

fn parse_outputs(list: &str) -> Result<Vec<Mode>> {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (width, height) = part
                .split_once('x')
                .with_context(|| format!("Invalid output size '{}', expected WxH", part))?;
            let width: i32 = width.parse().with_context(|| format!("Invalid width in '{}'", part))?;
            let height: i32 = height.parse().with_context(|| format!("Invalid height in '{}'", part))?;
            if width <= 0 || height <= 0 {
                bail!("Output size '{}' must be positive", part);
            }
            Ok(Mode::new(width, height, 60_000))
        })
        .collect()
}

fn load_script(path: &Path) -> Result<Vec<Event>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse script: {}", path.display()))
}

/// Deliver a startup event; only fatal errors abort
fn dispatch_startup(server: &mut Server<HeadlessBackend>, event: Event) -> Result<()> {
    match server.dispatch(event) {
        Err(err) if err.is_fatal() => Err(err).context("Startup failed"),
        Err(err) => {
            error!("❌ {}", err);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Strata");
    info!(
        "📄 Version: {} ({}, built {})",
        strata::VERSION,
        env!("STRATA_GIT_COMMIT"),
        env!("STRATA_BUILD_DATE")
    );

    // Load configuration
    let mut config = match StrataConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
            StrataConfig::default()
        }
    };
    if cli.debug {
        config.general.debug = true;
    }

    let modes = parse_outputs(&cli.outputs)?;
    let script = match &cli.script {
        Some(path) => load_script(Path::new(path))?,
        None => Vec::new(),
    };

    let mut backend = HeadlessBackend::new();
    let outputs: Vec<_> = modes
        .iter()
        .enumerate()
        .map(|(i, mode)| backend.add_output(&format!("HEADLESS-{}", i + 1), *mode))
        .collect();
    let keyboard = backend.new_device();
    let pointer = backend.new_device();
    info!("⌨️ keyboard {:?}, 🖱️ pointer {:?}", keyboard, pointer);

    let mut server = Server::new(config, backend)?;
    if cli.status {
        server
            .status_mut()
            .set_default_sink(|| Box::new(JsonLinesSink::new(std::io::stdout())));
    }

    for output in outputs {
        dispatch_startup(&mut server, Event::NewOutput { output })?;
    }
    dispatch_startup(
        &mut server,
        Event::NewInput {
            device: keyboard,
            kind: DeviceKind::Keyboard,
            name: "headless-keyboard".to_string(),
        },
    )?;
    dispatch_startup(
        &mut server,
        Event::NewInput {
            device: pointer,
            kind: DeviceKind::Pointer,
            name: "headless-pointer".to_string(),
        },
    )?;

    let compositor_loop = CompositorLoop::new()?;
    let sender = compositor_loop.sender();
    let feeder = std::thread::spawn(move || {
        for event in script {
            if sender.send(event).is_err() {
                break;
            }
        }
    });

    compositor_loop.run(&mut server)?;
    if feeder.join().is_err() {
        error!("❌ script feeder panicked");
    }

    if server.config().general.debug {
        server.print_server_info();
    }
    server.cleanup();
    info!("👋 Strata shutting down");
    Ok(())
}
