use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::EnvFilter;

use voicebot::voice::{AudioCapture, AudioPlayback, frame_energy};
use voicebot::{Config, VoiceBot};

/// voicebot - Talk to a local language model by text or voice
#[derive(Parser)]
#[command(name = "voicebot", version, about)]
struct Cli {
    /// Conversation context id (defaults to "general")
    #[arg(short, long, env = "VOICEBOT_CONTEXT", global = true)]
    context: Option<String>,

    /// Ollama model to chat with (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Print replies only, skip speech synthesis
    #[arg(long)]
    no_tts: bool,

    /// Path to a TOML config file
    #[arg(long, env = "VOICEBOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Capture one utterance and print its transcript
    Listen,
    /// Check that Ollama and the STT/TTS services respond
    Health,
    /// Forget conversation history
    Clear {
        /// Forget every context, not just the selected one
        #[arg(long)]
        all: bool,
    },
    /// Print conversation history
    History,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "info,voicebot=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    tracing::debug!(?config, "loaded configuration");

    let context = cli.context.as_deref();

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker(&config).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Listen => listen(&config).await,
            Command::Health => health(&config).await,
            Command::Clear { all } => clear(&config, context, all),
            Command::History => history(&config, context),
        };
    }

    let bot = VoiceBot::new(&config)?;

    let playback = if cli.no_tts {
        None
    } else {
        match AudioPlayback::new(config.audio.playback_sample_rate) {
            Ok(playback) => Some(playback),
            Err(e) => {
                tracing::warn!(error = %e, "audio output unavailable, continuing text-only");
                None
            }
        }
    };

    chat(&bot, context, playback.as_ref()).await
}

/// Interactive conversation loop
#[allow(clippy::future_not_send)]
async fn chat(
    bot: &VoiceBot,
    context: Option<&str>,
    playback: Option<&AudioPlayback>,
) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    println!("Bot has started! ({})", bot.controller().model_name());
    println!(
        "Type a message, press Enter on an empty line to speak, /clear to forget, quit to exit."
    );

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let input = line?.trim().to_string();

        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "stop") {
            break;
        }

        if input == "/clear" {
            bot.clear_memory(context);
            println!("Memory cleared");
            continue;
        }

        let input = if input.is_empty() {
            println!("Starting voice capture... (Ctrl-C to cancel)");
            let heard = tokio::select! {
                heard = bot.listen() => heard,
                _ = tokio::signal::ctrl_c() => {
                    println!("[cancelled]");
                    continue;
                }
            };
            match heard {
                Ok(text) => {
                    println!("> {text}");
                    text
                }
                Err(e) if e.is_recoverable() => {
                    println!("{e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            input
        };

        match respond(bot, &input, context, playback).await {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => eprintln!("\n{e}"),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Stream one reply to stdout and the speakers; Ctrl-C cancels the turn
#[allow(clippy::future_not_send)]
async fn respond(
    bot: &VoiceBot,
    input: &str,
    context: Option<&str>,
    playback: Option<&AudioPlayback>,
) -> voicebot::Result<()> {
    let mut reply = bot.ask(input, playback.is_some(), context);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            item = reply.next() => {
                let Some(fragment) = item else {
                    break;
                };
                let fragment = fragment?;

                if fragment.has_text() {
                    print!("{}", fragment.text);
                    std::io::stdout().flush()?;
                }
                if let Some(playback) = playback {
                    playback.enqueue(&fragment.audio);
                }
            }
            _ = &mut ctrl_c => {
                println!("\n[interrupted]");
                if let Some(playback) = playback {
                    playback.stop();
                }
                return Ok(());
            }
        }
    }

    println!();
    if let Some(playback) = playback {
        tokio::select! {
            () = playback.drain() => {}
            _ = &mut ctrl_c => {
                println!("[interrupted]");
                playback.stop();
            }
        }
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    let threshold = config.vad.energy_threshold;
    println!("Sample rate: {sample_rate} Hz | speech threshold: {threshold:.4}");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_samples();
        let energy = frame_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if energy > threshold { "speech" } else { "" };

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}] {}",
            i + 1,
            energy,
            peak,
            meter,
            marker
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If speech never registers, lower vad.energy_threshold in the config file.");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    let sample_rate = config.audio.playback_sample_rate;
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(sample_rate)?;

    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play(&samples).await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output through the TTS service
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let bot = VoiceBot::new(config)?;
    let playback = AudioPlayback::new(config.audio.playback_sample_rate)?;

    println!("Synthesizing speech...");
    let mut audio = bot.controller().synthesize(text).await?;
    let mut total = 0usize;

    while let Some(chunk) = audio.next().await {
        let chunk = chunk?;
        total += chunk.len();
        playback.enqueue(&chunk);
    }

    println!("Got {total} samples of audio");
    playback.drain().await;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Capture one utterance and print the transcript
async fn listen(config: &Config) -> anyhow::Result<()> {
    let bot = VoiceBot::new(config)?;

    println!("Listening... speak now");
    let text = bot.listen().await?;
    println!("{text}");

    Ok(())
}

/// Report service reachability
async fn health(config: &Config) -> anyhow::Result<()> {
    let bot = VoiceBot::new(config)?;
    let report = bot.controller().health().await;

    println!("ollama ({}): {}", config.services.ollama_url, report.llm);
    println!("stt    ({}): {}", config.services.stt_url, report.stt);
    println!("tts    ({}): {}", config.services.tts_url, report.tts);

    if !report.all_up() {
        anyhow::bail!("one or more services are unavailable");
    }
    Ok(())
}

/// Forget conversation history
fn clear(config: &Config, context: Option<&str>, all: bool) -> anyhow::Result<()> {
    let bot = VoiceBot::new(config)?;

    if all {
        bot.clear_all_memory();
        println!("All memory cleared");
    } else {
        bot.clear_memory(context);
        println!(
            "Memory cleared for context id: {}",
            voicebot::resolve_context(context)
        );
    }

    if config.memory.path.is_none() {
        println!("(memory.path is not set, so nothing was persisted to begin with)");
    }
    Ok(())
}

/// Print conversation history
fn history(config: &Config, context: Option<&str>) -> anyhow::Result<()> {
    let bot = VoiceBot::new(config)?;
    let messages = bot.history(context);

    if messages.is_empty() {
        println!("No history for context id: {}", voicebot::resolve_context(context));
        return Ok(());
    }

    for message in messages {
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.role,
            message.content
        );
    }
    Ok(())
}
