//! Ordered speech playback with cancel-then-replace semantics.
//!
//! [`PlaybackPipeline`] speaks a sequence of text chunks strictly in order:
//! chunk N+1 never starts synthesis-to-playback before chunk N has finished
//! or been skipped. Starting a new job cancels and fully tears down the
//! previous one before any new audio is produced, so two jobs never overlap
//! audibly.
//!
//! Synthesis failures are retried per chunk with doubling backoff; a chunk
//! that exhausts its attempts is skipped and playback continues with the
//! next one. A job ends in exactly one terminal event: `Completed`,
//! `Failed` (nothing at all was played), or `Cancelled`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{TtsError, TtsProvider, TtsResult};

// ---------------------------------------------------------------------------
// Audio sink
// ---------------------------------------------------------------------------

/// Trait for audio output backends.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play the audio bytes, resolving when playback has finished.
    async fn play(&self, audio: &[u8]) -> TtsResult<()>;

    /// Stop any in-progress playback. Idempotent; a no-op when nothing is
    /// playing.
    async fn stop(&self);
}

/// Audio players probed in order, with the flags each needs for quiet
/// MP3 playback from a file path.
const PLAYER_CANDIDATES: &[(&str, &[&str])] = &[
    ("afplay", &[]),
    ("mpg123", &["-q"]),
    ("play", &["-q"]),
    ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
];

/// Plays audio through a system media player subprocess.
///
/// Audio bytes are written to a temp file and handed to the first player
/// found on PATH. [`stop`](AudioSink::stop) kills the subprocess.
pub struct SystemAudioSink {
    player: String,
    player_args: Vec<String>,
    current: Mutex<Option<CancellationToken>>,
}

impl SystemAudioSink {
    /// Detect a system audio player and build a sink around it.
    pub fn detect() -> TtsResult<Self> {
        let (player, args) = find_player().ok_or_else(|| {
            TtsError::ConfigError(
                "no system audio player found (tried afplay, mpg123, play, ffplay)".to_string(),
            )
        })?;
        tracing::debug!(player = %player, "using system audio player");
        Ok(Self::with_player(player, args))
    }

    /// Build a sink around an explicit player command.
    pub fn with_player(player: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            player: player.into(),
            player_args: args,
            current: Mutex::new(None),
        }
    }
}

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

/// A written temp audio file, removed on drop.
///
/// Removal lives in `Drop` because the owning `play` future can be dropped
/// mid-chunk when a job is cancelled; every exit path still deletes the
/// file.
struct TempAudio(std::path::PathBuf);

impl TempAudio {
    async fn create(audio: &[u8]) -> TtsResult<Self> {
        let n = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("viva-tts-{}-{n}.mp3", std::process::id()));
        tokio::fs::write(&path, audio)
            .await
            .map_err(|e| TtsError::PlaybackError(format!("failed to write temp audio: {e}")))?;
        Ok(Self(path))
    }

    fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TempAudio {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Search PATH for the first known audio player.
fn find_player() -> Option<(String, Vec<String>)> {
    let path_var = std::env::var_os("PATH")?;
    for (name, args) in PLAYER_CANDIDATES {
        for dir in std::env::split_paths(&path_var) {
            if dir.join(name).is_file() {
                return Some((
                    name.to_string(),
                    args.iter().map(|a| a.to_string()).collect(),
                ));
            }
        }
    }
    None
}

#[async_trait]
impl AudioSink for SystemAudioSink {
    async fn play(&self, audio: &[u8]) -> TtsResult<()> {
        let temp = TempAudio::create(audio).await?;

        let mut child = Command::new(&self.player)
            .args(&self.player_args)
            .arg(temp.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TtsError::PlaybackError(format!("failed to spawn {}: {e}", self.player))
            })?;

        let stop = CancellationToken::new();
        {
            let mut guard = self.current.lock().await;
            *guard = Some(stop.clone());
        }

        let outcome = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        {
            let mut guard = self.current.lock().await;
            *guard = None;
        }

        match outcome {
            // Stopped by request; not an error.
            None => Ok(()),
            Some(Ok(status)) if status.success() => Ok(()),
            Some(Ok(status)) => Err(TtsError::PlaybackError(format!(
                "{} exited with {status}",
                self.player
            ))),
            Some(Err(e)) => Err(TtsError::PlaybackError(format!(
                "failed to wait on {}: {e}",
                self.player
            ))),
        }
    }

    async fn stop(&self) {
        if let Some(token) = self.current.lock().await.take() {
            token.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Playback configuration and events
// ---------------------------------------------------------------------------

/// Configuration for the playback pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Synthesis attempts per chunk before it is skipped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in milliseconds; doubles per failed attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Pause between consecutive chunks in milliseconds.
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,

    /// Voice ID passed to the provider. `None` uses the provider default.
    #[serde(default)]
    pub voice: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_inter_chunk_delay_ms() -> u64 {
    150
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
            voice: None,
        }
    }
}

/// Events emitted over the pipeline's event channel.
///
/// Every job ends with exactly one of `Completed`, `Failed`, or
/// `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Synthesis for a chunk has begun.
    ChunkStarted { index: usize },
    /// A chunk finished playing.
    ChunkPlayed { index: usize },
    /// A chunk was dropped after exhausting its synthesis attempts or
    /// failing to play.
    ChunkSkipped { index: usize, error: String },
    /// The job ran to the end of the chunk list.
    Completed { played: usize, skipped: usize },
    /// Every chunk failed; nothing was played.
    Failed { error: String },
    /// The job was cancelled by `stop` or by a replacing `speak`.
    Cancelled,
}

// ---------------------------------------------------------------------------
// PlaybackPipeline
// ---------------------------------------------------------------------------

struct ActiveJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Speaks chunk sequences through a TTS provider and an audio sink.
///
/// At most one job is active at a time. [`speak`](PlaybackPipeline::speak)
/// cancels and awaits the previous job before spawning the next, so
/// replacement is never audible as overlap.
pub struct PlaybackPipeline {
    provider: Arc<dyn TtsProvider>,
    sink: Arc<dyn AudioSink>,
    config: PlaybackConfig,
    event_tx: mpsc::Sender<PlaybackEvent>,
    active: Mutex<Option<ActiveJob>>,
}

enum SynthOutcome {
    Audio(Vec<u8>),
    Failed(String),
    Cancelled,
}

impl PlaybackPipeline {
    /// Create a pipeline. Job events are delivered on `event_tx`.
    pub fn new(
        provider: Arc<dyn TtsProvider>,
        sink: Arc<dyn AudioSink>,
        config: PlaybackConfig,
        event_tx: mpsc::Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            provider,
            sink,
            config,
            event_tx,
            active: Mutex::new(None),
        }
    }

    /// Start speaking the chunks, replacing any active job.
    ///
    /// The previous job is cancelled, its audio stopped, and its task
    /// awaited before the new job produces any sound.
    pub async fn speak(&self, chunks: Vec<String>) -> TtsResult<()> {
        if chunks.is_empty() || chunks.iter().all(|c| c.trim().is_empty()) {
            return Err(TtsError::EmptyText);
        }

        let mut active = self.active.lock().await;
        Self::cancel_job(&mut active, &*self.sink).await;

        let cancel = CancellationToken::new();
        let job = Job {
            provider: self.provider.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(job.run(chunks));
        *active = Some(ActiveJob { cancel, handle });
        Ok(())
    }

    /// Cancel the active job, if any. Idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        Self::cancel_job(&mut active, &*self.sink).await;
    }

    /// Whether a job is currently running.
    pub async fn is_speaking(&self) -> bool {
        let active = self.active.lock().await;
        matches!(&*active, Some(job) if !job.handle.is_finished())
    }

    async fn cancel_job(active: &mut Option<ActiveJob>, sink: &dyn AudioSink) {
        if let Some(job) = active.take() {
            job.cancel.cancel();
            sink.stop().await;
            // The old task must fully wind down before a new one starts.
            let _ = job.handle.await;
        }
    }
}

/// One playback job: the spawned task state for a single chunk sequence.
struct Job {
    provider: Arc<dyn TtsProvider>,
    sink: Arc<dyn AudioSink>,
    config: PlaybackConfig,
    event_tx: mpsc::Sender<PlaybackEvent>,
    cancel: CancellationToken,
}

impl Job {
    async fn run(self, chunks: Vec<String>) {
        let total = chunks.len();
        let mut played = 0usize;
        let mut skipped = 0usize;
        let mut last_error = String::new();

        for (index, text) in chunks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.emit(PlaybackEvent::Cancelled).await;
                return;
            }

            self.emit(PlaybackEvent::ChunkStarted { index }).await;

            match self.synthesize_with_retry(text).await {
                SynthOutcome::Cancelled => {
                    self.emit(PlaybackEvent::Cancelled).await;
                    return;
                }
                SynthOutcome::Failed(error) => {
                    tracing::warn!(index, error = %error, "skipping chunk after failed synthesis");
                    skipped += 1;
                    last_error = error.clone();
                    self.emit(PlaybackEvent::ChunkSkipped { index, error }).await;
                }
                SynthOutcome::Audio(audio) => {
                    let result = tokio::select! {
                        result = self.sink.play(&audio) => result,
                        _ = self.cancel.cancelled() => {
                            self.sink.stop().await;
                            self.emit(PlaybackEvent::Cancelled).await;
                            return;
                        }
                    };
                    match result {
                        Ok(()) => {
                            played += 1;
                            self.emit(PlaybackEvent::ChunkPlayed { index }).await;
                        }
                        Err(e) => {
                            tracing::warn!(index, error = %e, "skipping chunk after playback failure");
                            skipped += 1;
                            last_error = e.to_string();
                            self.emit(PlaybackEvent::ChunkSkipped {
                                index,
                                error: e.to_string(),
                            })
                            .await;
                        }
                    }
                }
            }

            if index + 1 < total && self.config.inter_chunk_delay_ms > 0 {
                let pause = Duration::from_millis(self.config.inter_chunk_delay_ms);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.cancel.cancelled() => {
                        self.emit(PlaybackEvent::Cancelled).await;
                        return;
                    }
                }
            }
        }

        if played == 0 && skipped > 0 {
            self.emit(PlaybackEvent::Failed { error: last_error }).await;
        } else {
            self.emit(PlaybackEvent::Completed { played, skipped }).await;
        }
    }

    /// Synthesize one chunk, retrying with doubling backoff.
    async fn synthesize_with_retry(&self, text: &str) -> SynthOutcome {
        let voice = self.config.voice.as_deref();
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.provider.synthesize(text, voice).await {
                Ok(audio) => return SynthOutcome::Audio(audio),
                Err(e) => {
                    if attempt == max_attempts {
                        return SynthOutcome::Failed(e.to_string());
                    }
                    let delay = Duration::from_millis(
                        self.config.retry_base_delay_ms << (attempt - 1),
                    );
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "synthesis failed; retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return SynthOutcome::Cancelled,
                    }
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn emit(&self, event: PlaybackEvent) {
        // A dropped receiver only means nobody is watching anymore.
        let _ = self.event_tx.send(event).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
