//! Interactive driver for the Viva voice pipeline.
//!
//! Reads lines from stdin as finalized utterances, routes them through the
//! capture controller into a dialogue session, and speaks each reply
//! through the TTS playback pipeline. Slash commands switch modes and
//! control playback:
//!
//! - `/interview` enters mock-interview mode
//! - `/end` returns to free-form analysis
//! - `/stop` cuts off the current speech
//! - `/quit` exits

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use viva_capture::{
    CaptureConfig, CaptureController, CaptureEvent, RecognitionEvent, SpeechSegment,
};
use viva_dialogue::{DialogueSession, GeminiConfig, GeminiProvider, SessionConfig};
use viva_tts::{
    create_provider, PlaybackConfig, PlaybackEvent, PlaybackPipeline, SystemAudioSink, TtsConfig,
};

/// Viva -- conversational coding-interview practice, out loud.
#[derive(Parser, Debug)]
#[command(name = "viva", version, about)]
struct Cli {
    /// Start directly in mock-interview mode
    #[arg(long)]
    interview: bool,

    /// TTS provider to use (google or elevenlabs)
    #[arg(long, default_value = "google")]
    tts_provider: String,

    /// Voice ID override for the TTS provider
    #[arg(long)]
    voice: Option<String>,

    /// Maximum characters per synthesized chunk
    #[arg(long, default_value_t = viva_text::DEFAULT_MAX_CHUNK_LEN)]
    max_chunk_len: usize,

    /// Print replies without speaking them
    #[arg(long)]
    no_speak: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let provider = Arc::new(GeminiProvider::from_config(GeminiConfig::default())?);
    let mut session = DialogueSession::new(SessionConfig::default(), provider);

    let speech = if cli.no_speak {
        None
    } else {
        match build_speech(&cli) {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                tracing::warn!(error = %e, "speech disabled");
                None
            }
        }
    };

    // Typed lines stand in for the recognition engine: each line is a
    // finalized utterance. The silence timer has no meaning here, so
    // auto-stop is off and the controller listens for the whole run.
    let capture_config = CaptureConfig {
        auto_stop: false,
        ..CaptureConfig::default()
    };
    let (capture_tx, mut capture_rx) = mpsc::channel::<CaptureEvent>(32);
    let controller = CaptureController::new(capture_config, capture_tx);
    let (mut rec_tx, rec_rx) = mpsc::channel::<RecognitionEvent>(32);
    let _ = controller.start(rec_rx)?;

    if cli.interview {
        let opening = session.start_interview();
        deliver(&opening, &cli, speech.as_ref()).await;
    }

    println!("viva ready. Type to talk; /interview, /end, /stop, /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line {
                    "/quit" => break,
                    "/stop" => {
                        if let Some(speech) = &speech {
                            speech.pipeline.stop().await;
                        }
                    }
                    "/interview" => {
                        let opening = session.start_interview();
                        deliver(&opening, &cli, speech.as_ref()).await;
                    }
                    "/end" => {
                        session.end_interview();
                        println!("(back to analysis mode)");
                    }
                    _ => {
                        rec_tx
                            .send(RecognitionEvent::Final(line.to_string()))
                            .await
                            .ok();
                    }
                }
            }
            event = capture_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    CaptureEvent::Segment(segment) => {
                        respond(&mut session, &segment, &cli, speech.as_ref()).await;
                    }
                    CaptureEvent::SegmentPending(segment) => {
                        tracing::debug!(sequence = segment.sequence, "segment awaiting confirmation");
                    }
                    CaptureEvent::SilenceTimeout => {
                        tracing::info!("capture stopped after silence");
                    }
                    CaptureEvent::Error(e) => {
                        tracing::warn!(error = %e, "recognition error");
                    }
                    CaptureEvent::Stopped => {
                        // Restart on a fresh channel so typing keeps working.
                        let (tx, rx) = mpsc::channel::<RecognitionEvent>(32);
                        rec_tx = tx;
                        let _ = controller.start(rx)?;
                    }
                }
            }
        }
    }

    controller.stop();
    if let Some(speech) = &speech {
        speech.pipeline.stop().await;
    }
    Ok(())
}

struct Speech {
    pipeline: PlaybackPipeline,
    // Keeps the event drain task alive for the lifetime of the pipeline.
    _drain: tokio::task::JoinHandle<()>,
}

fn build_speech(cli: &Cli) -> anyhow::Result<Speech> {
    let tts_config = TtsConfig {
        provider: cli.tts_provider.clone(),
        voice: cli.voice.clone(),
        ..TtsConfig::default()
    };
    let provider = create_provider(&tts_config)?;
    let sink = Arc::new(SystemAudioSink::detect()?);

    let playback_config = PlaybackConfig {
        voice: cli.voice.clone(),
        ..PlaybackConfig::default()
    };
    let (event_tx, mut event_rx) = mpsc::channel::<PlaybackEvent>(32);
    let pipeline = PlaybackPipeline::new(provider, sink, playback_config, event_tx);

    let drain = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                PlaybackEvent::ChunkSkipped { index, error } => {
                    tracing::warn!(index, error = %error, "chunk skipped");
                }
                PlaybackEvent::Failed { error } => {
                    tracing::warn!(error = %error, "playback failed");
                }
                event => tracing::debug!(?event, "playback"),
            }
        }
    });

    Ok(Speech {
        pipeline,
        _drain: drain,
    })
}

/// Exchange one captured utterance and deliver the reply.
async fn respond(
    session: &mut DialogueSession,
    segment: &SpeechSegment,
    cli: &Cli,
    speech: Option<&Speech>,
) {
    match session.send_user_turn(&segment.text).await {
        Ok(reply) => deliver(&reply, cli, speech).await,
        Err(e) => tracing::warn!(error = %e, "exchange rejected"),
    }
}

/// Print a reply and speak it as sanitized, chunked text.
async fn deliver(reply: &str, cli: &Cli, speech: Option<&Speech>) {
    println!("{reply}");

    let Some(speech) = speech else { return };
    let clean = viva_text::sanitize(reply);
    if clean.is_empty() {
        tracing::debug!("reply had no speakable text");
        return;
    }
    let chunks: Vec<String> = viva_text::split(&clean, cli.max_chunk_len)
        .into_iter()
        .map(|chunk| chunk.text)
        .collect();
    if let Err(e) = speech.pipeline.speak(chunks).await {
        tracing::warn!(error = %e, "failed to start speech");
    }
}
