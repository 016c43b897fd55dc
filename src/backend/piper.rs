//! Text-to-speech using `piper-rs`, played through a `rodio` sink.
//!
//! Each utterance is synthesized to a WAV file in the cache directory (keyed
//! by model, text, rate and pitch) and reused on later runs. Piper has no
//! word-boundary callbacks, so progress is reported at word starts spread
//! over the clip duration in proportion to word length.

use anyhow::{Context, Result, anyhow};
use narrator_core::backend::{
    EventSink, SpeechBackend, Utterance, UtteranceBatch, Voice, word_starts, word_timing_weights,
};
use piper_rs::{PiperModel, from_config_path};
use piper_rs::synth::{AudioOutputConfig, PiperSpeechSynthesizer};
use rodio::{Decoder, OutputStream, Sink, Source};
use sha2::{Digest, Sha256};
use std::env;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_SLICE: Duration = Duration::from_millis(20);

enum Command {
    Submit(UtteranceBatch),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    paused: AtomicBool,
    speaking: AtomicBool,
    submitted: AtomicU64,
    cancelled_through: AtomicU64,
}

impl Shared {
    fn is_cancelled(&self, generation: u64) -> bool {
        generation <= self.cancelled_through.load(Ordering::Acquire)
    }
}

struct Worker {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

pub struct PiperBackend {
    model_path: PathBuf,
    cache_root: PathBuf,
    voice: Voice,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    events: Option<EventSink>,
}

impl PiperBackend {
    pub fn new(model_path: PathBuf, espeak_path: PathBuf, cache_root: PathBuf) -> Result<Self> {
        let config_path = resolve_piper_config(&model_path);
        if !config_path.exists() {
            anyhow::bail!(
                "Piper config not found at {} (expected from {})",
                config_path.display(),
                model_path.display()
            );
        }
        let espeak_path = sanitize_espeak_root(espeak_path);
        if env::var_os("PIPER_ESPEAKNG_DATA_DIRECTORY").is_none() {
            // Set once at startup before any worker thread exists.
            unsafe {
                env::set_var("PIPER_ESPEAKNG_DATA_DIRECTORY", &espeak_path);
            }
        }
        info!(
            model = %model_path.display(),
            espeak_root = %espeak_path.display(),
            "Initializing Piper backend"
        );
        Ok(Self {
            voice: voice_for_model(&model_path),
            model_path,
            cache_root,
            shared: Arc::default(),
            worker: None,
            events: None,
        })
    }
}

impl SpeechBackend for PiperBackend {
    fn acquire(&mut self, events: EventSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("Piper backend already acquired"));
        }
        let config_path = resolve_piper_config(&self.model_path);
        let model = from_config_path(&config_path).context("Loading Piper model")?;

        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let worker = SynthWorker {
            model,
            model_path: self.model_path.clone(),
            cache_root: self.cache_root.clone(),
            shared,
            events: events.clone(),
        };
        let handle = thread::Builder::new()
            .name("piper-speech".to_string())
            .spawn(move || worker.run(rx))
            .context("Spawning Piper worker")?;
        self.worker = Some(Worker { tx, handle });
        self.events = Some(events);
        Ok(())
    }

    fn release(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.tx.send(Command::Shutdown);
            if worker.handle.join().is_err() {
                warn!("Piper worker panicked");
            }
        }
        self.events = None;
    }

    fn voices(&self) -> Vec<Voice> {
        vec![self.voice.clone()]
    }

    fn submit(&mut self, batch: UtteranceBatch) {
        let Some(worker) = &self.worker else {
            warn!("Piper backend not acquired; dropping batch");
            return;
        };
        self.shared
            .submitted
            .store(batch.token.generation(), Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.speaking.store(true, Ordering::Release);
        let token = batch.token.clone();
        if worker.tx.send(Command::Submit(batch)).is_err() {
            warn!("Piper worker is gone; dropping batch");
            self.shared.speaking.store(false, Ordering::Release);
            if let Some(events) = &self.events {
                events.failed(&token, 0);
            }
        }
    }

    fn pause(&mut self) {
        if self.is_speaking() {
            self.shared.paused.store(true, Ordering::Release);
        }
    }

    fn resume(&mut self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    fn cancel(&mut self) {
        let submitted = self.shared.submitted.load(Ordering::Acquire);
        self.shared
            .cancelled_through
            .store(submitted, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.speaking.store(false, Ordering::Release);
    }

    fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::Acquire)
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }
}

impl Drop for PiperBackend {
    fn drop(&mut self) {
        self.release();
    }
}

struct SynthWorker {
    model: Arc<dyn PiperModel + Send + Sync>,
    model_path: PathBuf,
    cache_root: PathBuf,
    shared: Arc<Shared>,
    events: EventSink,
}

impl SynthWorker {
    fn run(self, rx: mpsc::Receiver<Command>) {
        // The output stream is not `Send`; it lives on this thread only.
        let output = PiperSpeechSynthesizer::new(Arc::clone(&self.model))
            .map_err(|err| anyhow!("Preparing Piper synthesizer: {err}"))
            .and_then(|synth| {
                let (stream, handle) =
                    OutputStream::try_default().context("Opening audio output")?;
                Ok((synth, stream, handle))
            });
        if let Err(err) = &output {
            warn!("Piper worker cannot speak: {err:#}");
        }
        while let Ok(command) = rx.recv() {
            match command {
                Command::Shutdown => break,
                Command::Submit(batch) => {
                    let generation = batch.token.generation();
                    let result = match &output {
                        Ok((synth, _stream, handle)) => Sink::try_new(handle)
                            .context("Creating sink")
                            .map_err(|err| (0, err))
                            .and_then(|sink| self.speak_batch(synth, &batch, &sink)),
                        Err(err) => Err((0, anyhow!("{err:#}"))),
                    };
                    if let Err((idx, err)) = result {
                        self.report_failure(&batch, idx, &err);
                    }
                    if self.shared.submitted.load(Ordering::Acquire) == generation {
                        self.shared.speaking.store(false, Ordering::Release);
                    }
                }
            }
        }
        debug!("Piper worker exiting");
    }

    /// Speak every utterance in order; on error, the index that failed.
    fn speak_batch(
        &self,
        synth: &PiperSpeechSynthesizer,
        batch: &UtteranceBatch,
        sink: &Sink,
    ) -> std::result::Result<(), (usize, anyhow::Error)> {
        for (idx, utterance) in batch.utterances.iter().enumerate() {
            self.speak_utterance(synth, batch, idx, utterance, sink)
                .map_err(|err| (idx, err))?;
        }
        Ok(())
    }

    fn speak_utterance(
        &self,
        synth: &PiperSpeechSynthesizer,
        batch: &UtteranceBatch,
        idx: usize,
        utterance: &Utterance,
        sink: &Sink,
    ) -> Result<()> {
        self.ensure_live(batch, "synthesis")?;
        let path = cache_path(&self.cache_root, &self.model_path, utterance);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Creating TTS cache directory")?;
            }
            synth_with_piper(synth, &path, utterance)?;
        }
        let reader = BufReader::new(File::open(&path)?);
        let source = Decoder::new(reader).context("Decoding synthesized audio")?;
        let duration = source.total_duration().unwrap_or(Duration::from_secs(1));
        sink.append(source);
        sink.play();
        self.play_with_progress(batch, idx, &utterance.text, duration, sink)?;
        self.ensure_live(batch, "finish")?;
        if !self.events.finished(&batch.token, idx) {
            return Err(anyhow!("event receiver closed"));
        }
        Ok(())
    }

    /// Cancellation ends a batch quietly; anything else is reported as `Failed`.
    fn report_failure(&self, batch: &UtteranceBatch, idx: usize, err: &anyhow::Error) {
        let generation = batch.token.generation();
        if self.shared.is_cancelled(generation) || batch.token.is_aborted() {
            debug!(generation, "Piper batch ended early: {err}");
            return;
        }
        warn!(generation, utterance = idx, "Piper speech failed: {err:#}");
        self.events.failed(&batch.token, idx);
    }

    /// Report word starts while the clip plays, tracking only unpaused time.
    fn play_with_progress(
        &self,
        batch: &UtteranceBatch,
        idx: usize,
        text: &str,
        duration: Duration,
        sink: &Sink,
    ) -> Result<()> {
        let starts = word_starts(text);
        let mut marks = Vec::with_capacity(starts.len());
        let mut elapsed_weight = 0.0;
        for weight in word_timing_weights(text) {
            marks.push(duration.mul_f64(elapsed_weight));
            elapsed_weight += weight;
        }

        let mut next_word = 0;
        let mut played = Duration::ZERO;
        loop {
            if let Err(err) = self.ensure_live(batch, "playback") {
                sink.stop();
                return Err(err);
            }
            let paused = self.shared.paused.load(Ordering::Acquire);
            if paused != sink.is_paused() {
                if paused {
                    sink.pause();
                } else {
                    sink.play();
                }
            }
            while next_word < starts.len() && marks[next_word] <= played {
                if !self.events.progress(&batch.token, idx, starts[next_word]) {
                    sink.stop();
                    return Err(anyhow!("event receiver closed"));
                }
                next_word += 1;
            }
            if sink.empty() {
                return Ok(());
            }
            let started = Instant::now();
            thread::sleep(POLL_SLICE);
            if !paused {
                played += started.elapsed();
            }
        }
    }

    fn ensure_live(&self, batch: &UtteranceBatch, stage: &'static str) -> Result<()> {
        if self.shared.is_cancelled(batch.token.generation()) {
            return Err(anyhow!("batch cancelled at stage={stage}"));
        }
        batch.token.ensure_live(stage)
    }
}

fn cache_path(base: &Path, model_path: &Path, utterance: &Utterance) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(model_path.as_os_str().to_string_lossy().as_bytes());
    hasher.update(utterance.text.as_bytes());
    hasher.update(utterance.rate.to_le_bytes());
    hasher.update(utterance.pitch.to_le_bytes());
    let hash = format!("{:x}", hasher.finalize());
    base.join("tts").join(format!("tts-{hash}.wav"))
}

fn voice_for_model(model_path: &Path) -> Voice {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "piper".to_string());
    let locale = stem
        .split('-')
        .next()
        .filter(|prefix| prefix.contains('_'))
        .map(str::to_string);
    Voice {
        id: stem.clone(),
        name: stem,
        locale,
    }
}

/// Piper expects the parent directory that contains `espeak-ng-data/phonindex`.
/// Users often point directly at `.../espeak-ng-data`; trim that to avoid
/// duplicated segments like `/espeak-ng-data/espeak-ng-data/phonindex`.
fn sanitize_espeak_root(path: PathBuf) -> PathBuf {
    if path
        .file_name()
        .map(|n| n == "espeak-ng-data")
        .unwrap_or(false)
    {
        if let Some(parent) = path.parent() {
            debug!(
                original = %path.display(),
                sanitized = %parent.display(),
                "Trimming espeak-ng-data suffix"
            );
            return parent.to_path_buf();
        }
    }
    path
}

fn synth_with_piper(
    piper: &PiperSpeechSynthesizer,
    path: &Path,
    utterance: &Utterance,
) -> Result<()> {
    debug!(
        path = %path.display(),
        rate = utterance.rate,
        pitch = utterance.pitch,
        chars = utterance.text.len(),
        "Synthesizing utterance with Piper"
    );
    let neutral_rate = (utterance.rate - 1.0).abs() <= f32::EPSILON;
    let neutral_pitch = (utterance.pitch - 1.0).abs() <= f32::EPSILON;
    let output_config = if neutral_rate && neutral_pitch {
        None
    } else {
        Some(AudioOutputConfig {
            rate: (!neutral_rate).then(|| speed_to_rate_percent(utterance.rate)),
            volume: None,
            pitch: (!neutral_pitch).then(|| pitch_to_percent(utterance.pitch)),
            appended_silence_ms: None,
        })
    };
    piper
        .synthesize_to_file(path, utterance.text.clone(), output_config)
        .context("Synthesizing audio")?;
    Ok(())
}

fn resolve_piper_config(model_path: &Path) -> PathBuf {
    if model_path
        .extension()
        .map(|ext| ext == "onnx")
        .unwrap_or(false)
    {
        return model_path.with_extension("onnx.json");
    }
    model_path.to_path_buf()
}

fn speed_to_rate_percent(speed: f32) -> u8 {
    let clamped = speed.clamp(0.5, 5.5);
    let percent = ((clamped - 0.5) / 5.0) * 100.0;
    percent.round().clamp(0.0, 100.0) as u8
}

/// Pitch 0..2 onto Piper's 0..100 percent scale; 1.0 is the midpoint.
fn pitch_to_percent(pitch: f32) -> u8 {
    (pitch.clamp(0.0, 2.0) * 50.0).round() as u8
}
