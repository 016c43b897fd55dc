//! Silent backend that paces word progress at a fixed reading speed.
//!
//! No audio is produced. A worker thread walks each utterance word by word,
//! sleeping for the word's share of the utterance duration at
//! `base_words_per_minute * rate`, and reports progress at word starts. This
//! is the default backend and the one used for headless runs.

use anyhow::{Context, Result, anyhow};
use narrator_core::backend::{
    EventSink, SpeechBackend, UtteranceBatch, Voice, word_starts, word_timing_weights,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_SLICE: Duration = Duration::from_millis(20);
pub const PACED_VOICE_ID: &str = "paced";

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

pub struct PacedBackend {
    words_per_minute: f32,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    events: Option<EventSink>,
}

impl PacedBackend {
    pub fn new(words_per_minute: f32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1.0),
            shared: Arc::default(),
            worker: None,
            events: None,
        }
    }
}

impl SpeechBackend for PacedBackend {
    fn acquire(&mut self, events: EventSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("Paced backend already acquired"));
        }
        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let wpm = self.words_per_minute;
        let worker_events = events.clone();
        let handle = thread::Builder::new()
            .name("paced-speech".to_string())
            .spawn(move || run_worker(rx, shared, worker_events, wpm))
            .context("Spawning paced speech worker")?;
        info!(wpm, "Paced speech backend ready");
        self.worker = Some(Worker { tx, handle });
        self.events = Some(events);
        Ok(())
    }

    fn release(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.tx.send(Command::Shutdown);
            if worker.handle.join().is_err() {
                warn!("Paced speech worker panicked");
            }
        }
        self.events = None;
    }

    fn voices(&self) -> Vec<Voice> {
        vec![Voice {
            id: PACED_VOICE_ID.to_string(),
            name: "Paced reader (silent)".to_string(),
            locale: None,
        }]
    }

    fn submit(&mut self, batch: UtteranceBatch) {
        let Some(worker) = &self.worker else {
            warn!("Paced backend not acquired; dropping batch");
            return;
        };
        let generation = batch.token.generation();
        self.shared.submitted.store(generation, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.speaking.store(true, Ordering::Release);
        let token = batch.token.clone();
        if worker.tx.send(Command::Submit(batch)).is_err() {
            warn!("Paced speech worker is gone; dropping batch");
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

impl Drop for PacedBackend {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker(rx: mpsc::Receiver<Command>, shared: Arc<Shared>, events: EventSink, wpm: f32) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Shutdown => break,
            Command::Submit(batch) => {
                let generation = batch.token.generation();
                match speak_batch(&batch, &shared, &events, wpm) {
                    Ok(()) => debug!(generation, "Paced batch finished"),
                    Err(err) => debug!(generation, "Paced batch ended early: {err}"),
                }
                if shared.submitted.load(Ordering::Acquire) == generation {
                    shared.speaking.store(false, Ordering::Release);
                }
            }
        }
    }
    debug!("Paced speech worker exiting");
}

fn speak_batch(
    batch: &UtteranceBatch,
    shared: &Shared,
    events: &EventSink,
    wpm: f32,
) -> Result<()> {
    let generation = batch.token.generation();
    for (idx, utterance) in batch.utterances.iter().enumerate() {
        let starts = word_starts(&utterance.text);
        let weights = word_timing_weights(&utterance.text);
        let total = utterance_duration(starts.len(), wpm, utterance.rate);
        for (start, weight) in starts.into_iter().zip(weights) {
            ensure_live(batch, shared, "progress")?;
            if !events.progress(&batch.token, idx, start) {
                return Err(anyhow!("event receiver closed"));
            }
            wait_unpaused(total.mul_f64(weight), shared, generation);
        }
        ensure_live(batch, shared, "finish")?;
        if !events.finished(&batch.token, idx) {
            return Err(anyhow!("event receiver closed"));
        }
    }
    Ok(())
}

fn ensure_live(batch: &UtteranceBatch, shared: &Shared, stage: &'static str) -> Result<()> {
    if shared.is_cancelled(batch.token.generation()) {
        return Err(anyhow!("batch cancelled at stage={stage}"));
    }
    batch.token.ensure_live(stage)
}

/// Spoken duration of `words` words at `wpm * rate`.
pub fn utterance_duration(words: usize, wpm: f32, rate: f32) -> Duration {
    let effective = (wpm * rate).max(1.0) as f64;
    Duration::from_secs_f64(words as f64 * 60.0 / effective)
}

/// Sleep for `duration` of unpaused time; returns early on cancellation.
fn wait_unpaused(duration: Duration, shared: &Shared, generation: u64) {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if shared.is_cancelled(generation) {
            return;
        }
        let started = Instant::now();
        thread::sleep(POLL_SLICE.min(remaining));
        if !shared.paused.load(Ordering::Acquire) {
            remaining = remaining.saturating_sub(started.elapsed());
        }
    }
}
