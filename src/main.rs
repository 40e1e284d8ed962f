use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use softplayer::buffer::Frame;
use softplayer::player::{PlaybackController, PlayerEvent, Presenter};
use softplayer::stream::FileOpener;
use softplayer::utils::{format_duration, Config};

/// softplayer - decode and play a YUV4MPEG2 video stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file to play (.y4m)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Restart the stream when it ends
    #[arg(short, long = "loop")]
    loop_playback: bool,

    /// Decoded frames that may wait for presentation
    #[arg(long, value_name = "C")]
    capacity: Option<usize>,

    /// Pixel buffers in circulation (at least 2)
    #[arg(long, value_name = "N")]
    pool_size: Option<usize>,

    /// Configuration file instead of the default locations
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print playback statistics as JSON on exit
    #[arg(long)]
    stats: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Presenter for headless runs: logs geometry and a periodic frame rate
struct LogPresenter {
    started: Option<Instant>,
    window_start: Instant,
    window_frames: u32,
}

impl LogPresenter {
    fn new() -> Self {
        Self {
            started: None,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }
}

impl Presenter for LogPresenter {
    fn on_frame_ready(&mut self, frame: &Frame) {
        let now = Instant::now();
        let started = *self.started.get_or_insert(now);
        self.window_frames += 1;

        let elapsed = now.duration_since(self.window_start);
        if elapsed.as_secs() >= 2 {
            info!(
                "[{}] frame {}: {:.1} fps",
                format_duration(now.duration_since(started)),
                frame.sequence_index,
                self.window_frames as f64 / elapsed.as_secs_f64()
            );
            self.window_start = now;
            self.window_frames = 0;
        }
    }

    fn on_size_changed(&mut self, width: u32, height: u32, coded_width: u32, coded_height: u32) {
        info!("Video size {}x{} (coded {}x{})", width, height, coded_width, coded_height);
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load()?,
    };

    if args.loop_playback {
        config.playback.loop_playback = true;
    }
    if let Some(capacity) = args.capacity {
        config.playback.buffer_capacity = capacity;
    }
    if let Some(pool_size) = args.pool_size {
        config.playback.pool_size = pool_size;
    }
    if args.debug {
        config.general.log_level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

fn report(command: &str, result: softplayer::Result<()>) {
    if let Err(e) = result {
        warn!("{} failed: {}", command, e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or(config.general.log_level.as_str()))
        .format_timestamp_millis()
        .init();

    info!("Starting softplayer v{}", env!("CARGO_PKG_VERSION"));

    let Some(file) = args.file.clone() else {
        bail!("No input file given");
    };
    if !file.exists() {
        error!("File not found: {:?}", file);
        bail!("File not found: {}", file.display());
    }

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let failed = Arc::new(AtomicBool::new(false));

    let player = {
        let failed = Arc::clone(&failed);
        PlaybackController::builder()
            .with_source(FileOpener::new(&file, config.decoder.read_chunk_size))
            .with_config(config)
            .with_presenter(LogPresenter::new())
            .with_event_handler(move |event: PlayerEvent| {
                let _ = event_tx.send(event);
            })
            .on_error(move |e| {
                error!("Playback error: {}", e);
                failed.store(true, Ordering::SeqCst);
            })
            .build()?
    };

    player.play()?;
    info!("Commands: pause, resume, play, stop, stats, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "" => {}
                    "pause" | "p" => report("pause", player.pause()),
                    "resume" | "r" => report("resume", player.resume()),
                    "play" => report("play", player.play()),
                    "stop" | "s" => report("stop", player.stop()),
                    "stats" => println!("{}", serde_json::to_string_pretty(&player.stats())?),
                    "quit" | "q" => break,
                    other => warn!("Unknown command '{}'", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Cannot read commands: {}", e);
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Some(PlayerEvent::EndOfStream) => {
                    info!("End of stream reached");
                    break;
                }
                Some(PlayerEvent::Error { message }) => {
                    debug!("Stopping after error: {}", message);
                    break;
                }
                Some(PlayerEvent::SequenceStarted { header }) => {
                    info!(
                        "Stream {}x{} at {}",
                        header.width,
                        header.height,
                        header
                            .picture_rate
                            .as_f64()
                            .map(|fps| format!("{:.3} fps", fps))
                            .unwrap_or_else(|| "unknown rate".to_string())
                    );
                }
                Some(PlayerEvent::StateChanged { from, to }) => debug!("{:?} -> {:?}", from, to),
                None => break,
            },
        }
    }

    player.destroy();

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&player.stats())?);
    }

    if failed.load(Ordering::SeqCst) {
        bail!("Playback failed");
    }
    Ok(())
}
