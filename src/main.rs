//! Entry point for the chapter narrator.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml`.
//! - Load the chapter text and its page range.
//! - Drive the playback controller from stdin commands until quit.

mod backend;
mod commands;

use crate::backend::{DynBackend, create_backend};
use crate::commands::{Command, HELP, parse_command};
use anyhow::{Context, Result, anyhow, bail};
use narrator_core::cache::CheckpointStore;
use narrator_core::config::{AppConfig, clamp_pitch, clamp_rate, load_config};
use narrator_core::position::PageRange;
use narrator_core::{ControllerConfig, PlaybackController, PlaybackState, load_chapter};
use std::env;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
type Controller = PlaybackController<DynBackend>;

const USAGE: &str = "Usage: pdf-narrator <chapter.txt> [--start-page N] [--end-page M] \
[--voice ID] [--rate X] [--pitch X]";
const EVENT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
struct Args {
    path: PathBuf,
    start_page: Option<u32>,
    end_page: Option<u32>,
    voice: Option<String>,
    rate: Option<f32>,
    pitch: Option<f32>,
}

enum Input {
    Line(String),
    Closed,
    Interrupt,
}

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    if !args.path.exists() {
        return Err(anyhow!("File not found: {}", args.path.display()));
    }
    let mut config = load_config(Path::new("conf/config.toml"));
    apply_overrides(&mut config, &args);
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %args.path.display(),
        level = %config.log_level,
        "Starting narrator"
    );
    info!(
        voice = ?config.voice,
        rate = config.speech_rate,
        pitch = config.speech_pitch,
        max_chunk_chars = config.max_chunk_chars,
        "Active speech configuration"
    );

    let mut document = load_chapter(&args.path)?;
    if let Some(range) = page_range_override(&args)? {
        info!(?range, "Using page range from command line");
        document = document.with_page_range(Some(range));
    }
    let store = CheckpointStore::for_document(Path::new(&config.cache_dir), document.key());

    let backend = create_backend(&config)?;
    let controller_config = ControllerConfig::from_app_config(&config);
    let mut controller = PlaybackController::new(backend, controller_config)
        .context("Failed to start speech session")?;
    controller.load_document(document, Some(store));
    if controller.state() == PlaybackState::Paused {
        println!(
            "resuming at word {} ({}); `play` continues, `stop` starts over",
            controller.current_word_idx().map_or(0, |idx| idx + 1),
            controller.current_word().unwrap_or("")
        );
    }
    if let Some(page) = controller.current_page() {
        println!("page {page}");
    }
    println!("{HELP}");

    let inputs = spawn_inputs()?;
    run_session(&mut controller, &inputs)?;
    controller.teardown();
    info!("Narrator exiting");
    Ok(())
}

/// Main loop: fold backend events, commit debounced pages, apply commands.
fn run_session(controller: &mut Controller, inputs: &mpsc::Receiver<Input>) -> Result<()> {
    let mut input_open = true;
    loop {
        controller.wait_for_events(EVENT_POLL);
        if let Some(page) = controller.poll_page_sync(Instant::now()) {
            println!("page {page}");
            controller.on_page_changed(page);
        }

        while let Ok(input) = inputs.try_recv() {
            match input {
                Input::Line(line) => match parse_command(&line) {
                    Ok(Some(Command::Quit)) => {
                        controller.pause();
                        return Ok(());
                    }
                    Ok(Some(command)) => apply_command(controller, command)?,
                    Ok(None) => {}
                    Err(err) => println!("{err:#}"),
                },
                Input::Interrupt => {
                    info!("Interrupted; saving position");
                    controller.pause();
                    return Ok(());
                }
                Input::Closed => input_open = false,
            }
        }

        if !input_open && controller.state() != PlaybackState::Playing {
            return Ok(());
        }
    }
}

fn apply_command(controller: &mut Controller, command: Command) -> Result<()> {
    match command {
        Command::Play => controller.play(),
        Command::Pause => controller.pause(),
        Command::Resume => controller.resume(),
        Command::Stop => controller.stop(),
        Command::Page(page) => match controller.go_to_page(page) {
            Some(page) => {
                println!("page {page}");
                controller.on_page_changed(page);
            }
            None => println!("chapter has no page range"),
        },
        Command::Voice(id) => {
            if !controller.set_voice(&id) {
                println!("unknown voice `{id}`; see `voices`");
            }
        }
        Command::Rate(rate) => println!("rate {}", controller.set_rate(rate)),
        Command::Pitch(pitch) => println!("pitch {}", controller.set_pitch(pitch)),
        Command::Voices => {
            for voice in controller.voices() {
                println!(
                    "{}\t{}\t{}",
                    voice.id,
                    voice.name,
                    voice.locale.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Status => {
            let snapshot = serde_json::to_string_pretty(&controller.snapshot())
                .context("Serializing playback status")?;
            println!("{snapshot}");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn spawn_inputs() -> Result<mpsc::Receiver<Input>> {
    let (tx, rx) = mpsc::channel();

    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Input::Interrupt);
    })
    .context("Installing Ctrl+C handler")?;

    thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Input::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("Failed to read command: {err}");
                        break;
                    }
                }
            }
            let _ = tx.send(Input::Closed);
        })
        .context("Spawning stdin reader")?;
    Ok(rx)
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut path = None;
    let mut parsed = Args {
        path: PathBuf::new(),
        start_page: None,
        end_page: None,
        voice: None,
        rate: None,
        pitch: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--start-page" => parsed.start_page = Some(flag_value(&arg, args.next())?),
            "--end-page" => parsed.end_page = Some(flag_value(&arg, args.next())?),
            "--voice" => {
                parsed.voice = Some(args.next().ok_or_else(|| anyhow!("--voice needs a value"))?)
            }
            "--rate" => parsed.rate = Some(flag_value(&arg, args.next())?),
            "--pitch" => parsed.pitch = Some(flag_value(&arg, args.next())?),
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("Unknown option {flag}\n{USAGE}"),
            _ if path.is_none() => path = Some(PathBuf::from(&arg)),
            _ => bail!("Unexpected argument {arg}\n{USAGE}"),
        }
    }
    parsed.path = path.ok_or_else(|| anyhow!("{USAGE}"))?;
    Ok(parsed)
}

fn flag_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.ok_or_else(|| anyhow!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|_| anyhow!("Invalid value for {flag}: {value}"))
}

fn page_range_override(args: &Args) -> Result<Option<PageRange>> {
    match (args.start_page, args.end_page) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => PageRange::new(start, end)
            .map(Some)
            .ok_or_else(|| anyhow!("--end-page {end} is before --start-page {start}")),
        _ => bail!("--start-page and --end-page must be given together"),
    }
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(voice) = &args.voice {
        config.voice = Some(voice.clone());
    }
    if let Some(rate) = args.rate {
        config.speech_rate = clamp_rate(rate);
    }
    if let Some(pitch) = args.pitch {
        config.speech_pitch = clamp_pitch(pitch);
    }
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    warn!("Logging initialized; override level with config.log_level or RUST_LOG");
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("debug"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
