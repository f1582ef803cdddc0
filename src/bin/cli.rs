//! CLI binary for hark.

use clap::{Parser, Subcommand};
use hark::audio::{AudioSource, CpalCapture, CpalPlayback};
use hark::config::ms_to_samples;
use hark::llm::OpenAiAssistant;
use hark::pipeline::messages::AudioChunk;
use hark::stt::OpenAiTranscriber;
use hark::tools::{StdioToolConnector, ToolConnectionManager};
use hark::tts::OpenAiSynthesizer;
use hark::vad::compute_rms_energy;
use hark::wakeword::template::save_reference_wav;
use hark::{Collaborators, HarkConfig, PipelineCoordinator, RuntimeEvent, WakeWordDetector};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Hark: wake-word voice assistant with interruptible replies.
#[derive(Parser)]
#[command(name = "hark", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "HARK_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Listen for the wake word and hold a conversation (default).
    Run,

    /// List available audio devices.
    Devices,

    /// Connect to the tool server and print the tools it offers.
    Tools,

    /// Record wake word reference clips into the references directory.
    Enroll {
        /// Number of clips to record.
        #[arg(short, long, default_value_t = 5)]
        count: usize,

        /// Length of each clip in milliseconds.
        #[arg(long, default_value_t = 2_000)]
        duration_ms: u32,
    },

    /// Write the effective configuration to the config path.
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hark=info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(HarkConfig::default_config_path);
    let config = if config_path.exists() {
        HarkConfig::from_file(&config_path)?
    } else {
        HarkConfig::default()
    };
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Devices => list_devices(),
        Command::Tools => list_tools(config).await,
        Command::Enroll { count, duration_ms } => enroll(config, count, duration_ms).await,
        Command::InitConfig => {
            config.save_to_file(&config_path)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
    }
}

async fn run(config: HarkConfig) -> anyhow::Result<()> {
    println!("Hark v{}", env!("CARGO_PKG_VERSION"));

    // Device errors are fatal: nothing works without a microphone and speaker.
    let capture = CpalCapture::new(&config.audio)?;
    let sink = Arc::new(CpalPlayback::new(&config.audio)?);

    let detector = WakeWordDetector::initialize(&config.wakeword, config.audio.input_sample_rate)?;
    let collaborators = Collaborators {
        transcriber: Arc::new(OpenAiTranscriber::new(&config.provider)?),
        assistant: Arc::new(OpenAiAssistant::new(&config.provider)?),
        synthesizer: Arc::new(OpenAiSynthesizer::new(&config.provider)?),
    };

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = broadcast::channel(128);
    tokio::spawn(print_events(events_rx));

    let pipeline = PipelineCoordinator::new(config.clone(), detector, sink, collaborators)
        .with_runtime_events(events_tx);
    if config.tools.enabled {
        let manager = ToolConnectionManager::new(tool_connector(&config), &config.tools)
            .with_cancellation(cancel.clone());
        pipeline.connect_tools(manager);
    }

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let (audio_tx, audio_rx) = mpsc::channel::<AudioChunk>(config.audio.channel_capacity);
    let capture_cancel = cancel.clone();
    let capture_task = tokio::spawn(async move { capture.run(audio_tx, capture_cancel).await });

    println!(
        "\nListening for \"{}\"... Press Ctrl+C to quit.\n",
        config.wakeword.label
    );
    pipeline.run(audio_rx, cancel.clone()).await?;
    cancel.cancel();

    capture_task.await??;
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<RuntimeEvent>) {
    loop {
        match rx.recv().await {
            Ok(RuntimeEvent::Transcript(text)) if !text.is_empty() => println!("you:  {text}"),
            Ok(RuntimeEvent::AssistantReply(text)) => println!("hark: {text}"),
            Ok(RuntimeEvent::Degraded(mode)) => println!("(degraded: {mode:?})"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("event printer lagged by {n}"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn tool_connector(config: &HarkConfig) -> Arc<StdioToolConnector> {
    Arc::new(StdioToolConnector::new(
        config.tools.command.clone(),
        config.tools.args.clone(),
    ))
}

async fn list_tools(config: HarkConfig) -> anyhow::Result<()> {
    let manager = ToolConnectionManager::new(tool_connector(&config), &config.tools);
    let result = manager
        .connect(
            config.tools.max_attempts,
            Duration::from_millis(config.tools.base_delay_ms),
        )
        .await;

    match result {
        Ok(connected) => {
            println!(
                "Connected after {} attempt(s). {} tool(s):",
                connected.attempts,
                connected.tools.len()
            );
            for tool in &connected.tools {
                println!("  - {}: {}", tool.name, tool.description);
            }
        }
        Err(e) => {
            // Not fatal for the pipeline; the run command continues without tools.
            warn!("{e}");
            for line in &e.diagnostics {
                println!("  | {line}");
            }
        }
    }
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

async fn enroll(config: HarkConfig, count: usize, duration_ms: u32) -> anyhow::Result<()> {
    let dir = &config.wakeword.references_dir;
    std::fs::create_dir_all(dir)?;
    let rate = config.audio.input_sample_rate;
    let wanted = ms_to_samples(rate, duration_ms);
    let capture = Arc::new(CpalCapture::new(&config.audio)?);

    println!("Recording {count} clip(s) of \"{}\" into {}", config.wakeword.label, dir.display());
    for i in 1..=count {
        print!("Clip {i}/{count}: press ENTER, then say the wake word...");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;

        let samples = record(Arc::clone(&capture), wanted).await?;
        let trimmed = trim_silence(&samples, config.vad.silence_threshold / 2.0, rate);
        if trimmed.len() < wanted / 10 {
            println!("  very short or silent recording, skipped");
            continue;
        }
        let path = dir.join(format!("reference_{i}.wav"));
        save_reference_wav(&path, trimmed, rate)?;
        println!(
            "  saved {} ({:.1}s)",
            path.display(),
            trimmed.len() as f32 / rate as f32
        );
    }
    Ok(())
}

/// Capture `wanted` samples from the microphone.
async fn record(capture: Arc<CpalCapture>, wanted: usize) -> anyhow::Result<Vec<f32>> {
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move { capture.run(tx, task_cancel).await });

    let mut samples = Vec::with_capacity(wanted);
    while samples.len() < wanted {
        match rx.recv().await {
            Some(chunk) => samples.extend_from_slice(&chunk.samples),
            None => break,
        }
    }
    cancel.cancel();
    task.await??;
    samples.truncate(wanted);
    Ok(samples)
}

/// Drop leading and trailing 10ms frames quieter than `threshold`.
fn trim_silence(samples: &[f32], threshold: f32, rate: u32) -> &[f32] {
    let frame = (rate as usize / 100).max(1);
    let loud = |c: &[f32]| compute_rms_energy(c) > threshold;
    let start = samples.chunks(frame).position(loud).map_or(samples.len(), |i| i * frame);
    let end = samples
        .chunks(frame)
        .rposition(loud)
        .map_or(start, |i| ((i + 1) * frame).min(samples.len()));
    &samples[start..end.max(start)]
}
