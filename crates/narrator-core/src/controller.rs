//! Read-aloud playback controller.
//!
//! The controller is the only owner of the playback session. It turns the
//! current document into a queue of utterances, submits the queue to the
//! speech backend, and folds the backend's progress events back into a
//! global word index:
//!
//! ```text
//! global char = char_base (sum of finished utterances + separators)
//!             + chunk-local char index from the backend
//! word index  = last word whose offset <= global char
//! ```
//!
//! Every submission carries its own [`AbortToken`]. Stopping, restarting and
//! switching documents abort the token before the backend is told to cancel,
//! so events that were already in flight are dropped on arrival.

use crate::backend::{
    EventSink, SpeechBackend, SpeechEvent, SpeechEventKind, Utterance, UtteranceBatch, Voice,
};
use crate::cache::{Checkpoint, CheckpointStore};
use crate::cancellation::AbortToken;
use crate::chunker::{DEFAULT_MAX_CHUNK_CHARS, chunk_starts, chunk_text};
use crate::config::{AppConfig, clamp_pitch, clamp_rate};
use crate::document::Document;
use crate::page_sync::{PageChangeOrigin, PageSync, PageSyncConfig};
use crate::position::word_index_for_char;
use crate::text_utils::byte_offset_for_char;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub max_chunk_chars: usize,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub page_sync: PageSyncConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            page_sync: PageSyncConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_chunk_chars: config.max_chunk_chars.max(1),
            voice: config.voice.clone(),
            rate: clamp_rate(config.speech_rate),
            pitch: clamp_pitch(config.speech_pitch),
            page_sync: PageSyncConfig {
                delay_per_page: config.page_sync_delay_per_page(),
                max_delay: config.page_sync_max_delay(),
            },
        }
    }
}

/// Serializable view of the controller for UI and CLI consumers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub current_word_index: Option<usize>,
    pub current_word: Option<String>,
    pub current_page: Option<u32>,
    pub pending_page: Option<u32>,
    pub word_count: usize,
    pub chunk_count: usize,
    pub queued_utterances: usize,
    pub progress_pct: f64,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub has_checkpoint: bool,
}

#[derive(Debug, Clone, Default)]
struct PlaybackSession {
    state: PlaybackState,
    current_word_idx: Option<usize>,
    char_base: usize,
    queue: Vec<Utterance>,
    completed: usize,
    checkpoint: Option<Checkpoint>,
    remaining_chunks: Vec<String>,
    chunks: Vec<String>,
    token: Option<AbortToken>,
}

impl PlaybackSession {
    fn pending_utterances(&self) -> usize {
        self.queue.len().saturating_sub(self.completed)
    }
}

pub struct PlaybackController<B: SpeechBackend> {
    backend: B,
    acquired: bool,
    events: mpsc::Receiver<SpeechEvent>,
    _sink: EventSink,
    config: ControllerConfig,
    voice: Option<String>,
    rate: f32,
    pitch: f32,
    document: Document,
    page_sync: PageSync,
    checkpoint_store: Option<CheckpointStore>,
    session: PlaybackSession,
    generation: u64,
}

impl<B: SpeechBackend> PlaybackController<B> {
    /// Acquire `backend` for a new session.
    pub fn new(mut backend: B, config: ControllerConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(tx);
        backend
            .acquire(sink.clone())
            .context("Acquiring speech backend")?;

        let voices = backend.voices();
        let voice = match &config.voice {
            Some(id) if voices.iter().any(|voice| &voice.id == id) => Some(id.clone()),
            Some(id) => {
                warn!(voice = %id, "Configured voice not available; using backend default");
                None
            }
            None => None,
        };
        info!(
            voices = voices.len(),
            voice = ?voice,
            rate = config.rate,
            pitch = config.pitch,
            "Acquired speech backend"
        );

        let document = Document::default();
        let page_sync = PageSync::new(None, document.density_factor(), config.page_sync);
        Ok(Self {
            backend,
            acquired: true,
            events: rx,
            _sink: sink,
            rate: clamp_rate(config.rate),
            pitch: clamp_pitch(config.pitch),
            config,
            voice,
            document,
            page_sync,
            checkpoint_store: None,
            session: PlaybackSession::default(),
            generation: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state
    }

    pub fn current_word_idx(&self) -> Option<usize> {
        self.session.current_word_idx
    }

    pub fn current_word(&self) -> Option<&str> {
        self.session
            .current_word_idx
            .and_then(|idx| self.document.index().word(idx))
    }

    pub fn current_page(&self) -> Option<u32> {
        self.page_sync.current_page()
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.session.checkpoint
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.backend.voices()
    }

    /// Swap in a new document. An active session is stopped first so no
    /// offsets from the old text survive. A stored checkpoint for the new
    /// document is restored as a paused session.
    pub fn load_document(&mut self, document: Document, store: Option<CheckpointStore>) {
        if self.session.state != PlaybackState::Idle {
            info!("Document changed during playback; stopping");
        }
        self.halt();
        self.page_sync = PageSync::new(
            document.page_range(),
            document.density_factor(),
            self.config.page_sync,
        );
        info!(
            key = document.key(),
            words = document.word_count(),
            density = document.density_factor(),
            "Loaded document"
        );
        self.document = document;
        self.checkpoint_store = store;
        self.restore_checkpoint();
    }

    /// Replace the document text, keeping its key, title and page range.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let document = Document::new(self.document.key().to_string(), text)
            .with_page_range(self.document.page_range())
            .with_title(self.document.title().map(str::to_string));
        let store = self.checkpoint_store.take();
        self.load_document(document, store);
    }

    pub fn set_voice(&mut self, voice_id: &str) -> bool {
        if !self.backend.voices().iter().any(|voice| voice.id == voice_id) {
            warn!(voice = voice_id, "Unknown voice; keeping current selection");
            return false;
        }
        info!(voice = voice_id, "Selected voice for upcoming utterances");
        self.voice = Some(voice_id.to_string());
        true
    }

    /// Returns the applied (clamped) rate.
    pub fn set_rate(&mut self, rate: f32) -> f32 {
        self.rate = clamp_rate(rate);
        debug!(rate = self.rate, "Updated speech rate");
        self.rate
    }

    /// Returns the applied (clamped) pitch.
    pub fn set_pitch(&mut self, pitch: f32) -> f32 {
        self.pitch = clamp_pitch(pitch);
        debug!(pitch = self.pitch, "Updated speech pitch");
        self.pitch
    }

    /// Start speaking. From `Paused` with a checkpoint this restarts the
    /// queue at the checkpoint word instead of resuming in place.
    pub fn play(&mut self) {
        if self.document.is_empty() {
            debug!("Nothing to speak; ignoring play");
            return;
        }
        if self.backend.voices().is_empty() {
            warn!("Speech backend has no voices; ignoring play");
            return;
        }
        match self.session.state {
            PlaybackState::Playing => debug!("Already playing; ignoring play"),
            PlaybackState::Paused if self.session.checkpoint.is_some() => {
                self.restart_from_checkpoint()
            }
            _ => self.start_from_beginning(),
        }
    }

    pub fn pause(&mut self) {
        if self.session.state != PlaybackState::Playing {
            debug!(state = ?self.session.state, "Ignoring pause; not playing");
            return;
        }
        if !self.backend.is_speaking() || self.backend.is_paused() {
            debug!("Ignoring pause; backend is not actively speaking");
            return;
        }

        let checkpoint = Checkpoint {
            char_base: self.session.char_base,
            word_idx: self.session.current_word_idx,
        };
        self.session.remaining_chunks =
            remaining_chunks_from(&self.session.chunks, checkpoint.char_base);
        self.session.checkpoint = Some(checkpoint);
        self.backend.pause();
        self.session.state = PlaybackState::Paused;
        info!(
            char_base = checkpoint.char_base,
            word_idx = ?checkpoint.word_idx,
            remaining_chunks = self.session.remaining_chunks.len(),
            "Paused playback"
        );
        if let Some(store) = &self.checkpoint_store {
            store.save(checkpoint, self.document.plain_text());
        }
    }

    /// Continue the paused utterance in place. Falls back to restarting from
    /// the checkpoint when the backend has nothing paused.
    pub fn resume(&mut self) {
        if self.session.state != PlaybackState::Paused {
            debug!(state = ?self.session.state, "Ignoring resume; not paused");
            return;
        }
        if self.backend.is_paused() {
            self.backend.resume();
            self.session.state = PlaybackState::Playing;
            info!("Resumed playback in place");
        } else {
            debug!("Backend cannot resume in place; restarting from checkpoint");
            self.play();
        }
    }

    /// Abort everything and forget the session, including the stored
    /// checkpoint.
    pub fn stop(&mut self) {
        self.halt();
        if let Some(store) = &self.checkpoint_store {
            store.clear();
        }
    }

    /// End the session and hand the backend back. The stored checkpoint is
    /// kept so the next session can pick it up.
    pub fn teardown(&mut self) {
        self.halt();
        if self.acquired {
            self.backend.release();
            self.acquired = false;
            info!("Released speech backend");
        }
    }

    /// Navigate the page view; returns the clamped page to show, or `None`
    /// when the document has no page range.
    pub fn go_to_page(&mut self, page: u32) -> Option<u32> {
        let page = self.page_sync.go_to_page(page)?;
        if self.session.state == PlaybackState::Idle {
            self.session.current_word_idx = self
                .page_sync
                .word_index_for_page(page, self.document.word_count());
        }
        debug!(page, "Requested page navigation");
        Some(page)
    }

    /// Page-changed notification from the page view.
    pub fn on_page_changed(&mut self, page: u32) -> PageChangeOrigin {
        let origin = self.page_sync.on_page_changed(page);
        if origin == PageChangeOrigin::External {
            if self.session.state == PlaybackState::Idle {
                self.session.current_word_idx = self
                    .page_sync
                    .word_index_for_page(page, self.document.word_count());
                debug!(
                    page,
                    word_idx = ?self.session.current_word_idx,
                    "Synced word index to page"
                );
            } else {
                debug!(page, "Playback active; keeping word index on external page change");
            }
        }
        origin
    }

    /// Page the view should move to now, if a debounced update is due.
    pub fn poll_page_sync(&mut self, now: Instant) -> Option<u32> {
        self.page_sync.poll(now)
    }

    pub fn pending_page(&self) -> Option<u32> {
        self.page_sync.pending().map(|pending| pending.page)
    }

    /// Drain queued backend events without blocking.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event, Instant::now());
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for the next event, then drain the rest.
    pub fn wait_for_events(&mut self, timeout: Duration) -> usize {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event, Instant::now());
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    pub fn handle_event(&mut self, event: SpeechEvent, now: Instant) {
        if event.token.is_aborted() {
            trace!(
                generation = event.token.generation(),
                "Dropping event from aborted submission"
            );
            return;
        }
        let current = self.session.token.as_ref().map(AbortToken::generation);
        if current != Some(event.token.generation()) {
            debug!(
                generation = event.token.generation(),
                current = ?current,
                "Dropping event from superseded submission"
            );
            return;
        }
        if event.utterance_idx != self.session.completed {
            warn!(
                expected = self.session.completed,
                got = event.utterance_idx,
                "Dropping out-of-order speech event"
            );
            return;
        }

        match event.kind {
            SpeechEventKind::Progress { char_index } => {
                let global = self.session.char_base + char_index;
                let word_idx = word_index_for_char(&self.document.index().offsets, global);
                self.publish_word(word_idx, now);
            }
            SpeechEventKind::Finished => {
                let Some(utterance) = self.session.queue.get(event.utterance_idx) else {
                    return;
                };
                self.session.char_base += utterance.text.chars().count() + 1;
                self.session.completed += 1;
                trace!(
                    utterance = event.utterance_idx,
                    char_base = self.session.char_base,
                    "Utterance finished"
                );
                if self.session.completed >= self.session.queue.len() {
                    self.finish_playback();
                }
            }
            SpeechEventKind::Failed => {
                warn!(
                    generation = event.token.generation(),
                    utterance = event.utterance_idx,
                    word_idx = ?self.session.current_word_idx,
                    "Speech backend failed; stopping playback"
                );
                self.halt();
            }
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let word_count = self.document.word_count();
        let progress_pct = match (self.session.current_word_idx, word_count) {
            (Some(idx), count) if count > 0 => {
                ((idx + 1) as f64 / count as f64 * 1000.0).round() / 10.0
            }
            _ => 0.0,
        };
        PlaybackSnapshot {
            state: self.session.state,
            current_word_index: self.session.current_word_idx,
            current_word: self.current_word().map(str::to_string),
            current_page: self.page_sync.current_page(),
            pending_page: self.pending_page(),
            word_count,
            chunk_count: self.session.chunks.len(),
            queued_utterances: self.session.pending_utterances(),
            progress_pct,
            voice: self.voice.clone(),
            rate: self.rate,
            pitch: self.pitch,
            has_checkpoint: self.session.checkpoint.is_some(),
        }
    }

    fn start_from_beginning(&mut self) {
        if self.session.state != PlaybackState::Idle {
            self.abort_submission();
            self.backend.cancel();
        }
        let chunks = chunk_text(self.document.plain_text(), self.config.max_chunk_chars);
        info!(
            chunks = chunks.len(),
            words = self.document.word_count(),
            "Starting playback from the beginning"
        );
        self.session = PlaybackSession {
            remaining_chunks: chunks.clone(),
            chunks: chunks.clone(),
            ..PlaybackSession::default()
        };
        self.submit(chunks);
    }

    fn restart_from_checkpoint(&mut self) {
        let Some(checkpoint) = self.session.checkpoint.take() else {
            return;
        };
        self.abort_submission();
        self.backend.cancel();

        if self.session.chunks.is_empty() {
            self.session.chunks =
                chunk_text(self.document.plain_text(), self.config.max_chunk_chars);
        }
        let mut remaining = std::mem::take(&mut self.session.remaining_chunks);
        if remaining.is_empty() || remaining.len() > self.session.chunks.len() {
            remaining = remaining_chunks_from(&self.session.chunks, checkpoint.char_base);
        }
        let first_idx = self.session.chunks.len() - remaining.len();
        let chunk_start = chunk_starts(&self.session.chunks)
            .get(first_idx)
            .copied()
            .unwrap_or(0);
        self.session.remaining_chunks = remaining.clone();

        if remaining.is_empty() {
            info!("Checkpoint is at the end of the document");
            self.finish_playback();
            return;
        }

        // Re-speak the interrupted chunk from the checkpoint word, not from
        // the chunk start.
        let mut char_base = chunk_start;
        let word_offset = checkpoint
            .word_idx
            .and_then(|idx| self.document.index().offsets.get(idx).copied());
        if let (Some(word_offset), Some(first)) = (word_offset, remaining.first_mut()) {
            let skip = word_offset.saturating_sub(chunk_start);
            if word_offset > chunk_start && skip < first.chars().count() {
                let byte = byte_offset_for_char(first, skip);
                *first = first[byte..].to_string();
                char_base = word_offset;
            }
        }

        info!(
            char_base,
            word_idx = ?checkpoint.word_idx,
            chunks = remaining.len(),
            "Restarting playback from checkpoint"
        );
        self.session.char_base = char_base;
        self.session.current_word_idx = checkpoint.word_idx;
        self.submit(remaining);
        if let Some(word_idx) = checkpoint.word_idx {
            self.page_sync
                .on_word_index(word_idx, self.document.word_count(), Instant::now());
        }
    }

    fn submit(&mut self, texts: Vec<String>) {
        self.generation = self.generation.wrapping_add(1);
        let token = AbortToken::new(self.generation);
        let utterances: Vec<Utterance> = texts
            .into_iter()
            .map(|text| Utterance {
                text,
                voice: self.voice.clone(),
                rate: self.rate,
                pitch: self.pitch,
            })
            .collect();
        debug!(
            generation = self.generation,
            utterances = utterances.len(),
            char_base = self.session.char_base,
            "Submitting utterance batch"
        );
        self.session.queue = utterances.clone();
        self.session.completed = 0;
        self.session.token = Some(token.clone());
        self.session.state = PlaybackState::Playing;
        self.backend.submit(UtteranceBatch { token, utterances });
    }

    fn publish_word(&mut self, word_idx: usize, now: Instant) {
        if self.session.current_word_idx == Some(word_idx) {
            return;
        }
        trace!(word_idx, "Current word");
        self.session.current_word_idx = Some(word_idx);
        self.page_sync
            .on_word_index(word_idx, self.document.word_count(), now);
    }

    /// Natural end of the queue. The session is reset exactly like `stop`,
    /// so the word index goes back to `None`.
    fn finish_playback(&mut self) {
        info!(
            generation = self.generation,
            "Playback reached the end of the document"
        );
        self.abort_submission();
        self.session = PlaybackSession::default();
        self.page_sync.cancel_pending();
        if let Some(store) = &self.checkpoint_store {
            store.clear();
        }
    }

    fn abort_submission(&mut self) {
        if let Some(token) = self.session.token.take() {
            token.abort();
        }
    }

    /// Shared body of stop/teardown/document switch.
    fn halt(&mut self) {
        let live = self.session.token.is_some() || self.session.state != PlaybackState::Idle;
        self.abort_submission();
        if live {
            self.backend.cancel();
        }
        if self.session.state != PlaybackState::Idle {
            info!("Stopped playback");
        }
        self.session = PlaybackSession::default();
        self.page_sync.cancel_pending();
    }

    fn restore_checkpoint(&mut self) {
        let Some(store) = &self.checkpoint_store else {
            return;
        };
        let Some(checkpoint) = store.load(self.document.plain_text()) else {
            return;
        };
        let index = self.document.index();
        let word_out_of_range = checkpoint
            .word_idx
            .is_some_and(|idx| idx >= index.word_count());
        if index.is_empty() || checkpoint.char_base >= index.char_len() || word_out_of_range {
            warn!(?checkpoint, "Ignoring checkpoint outside the document");
            return;
        }

        let chunks = chunk_text(self.document.plain_text(), self.config.max_chunk_chars);
        self.session = PlaybackSession {
            state: PlaybackState::Paused,
            current_word_idx: checkpoint.word_idx,
            char_base: checkpoint.char_base,
            checkpoint: Some(checkpoint),
            remaining_chunks: remaining_chunks_from(&chunks, checkpoint.char_base),
            chunks,
            ..PlaybackSession::default()
        };
        if let Some(word_idx) = checkpoint.word_idx {
            self.page_sync
                .on_word_index(word_idx, self.document.word_count(), Instant::now());
        }
        info!(?checkpoint, "Restored saved checkpoint");
    }
}

impl<B: SpeechBackend> Drop for PlaybackController<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// The chunk containing `char_base` and every chunk after it.
fn remaining_chunks_from(chunks: &[String], char_base: usize) -> Vec<String> {
    let starts = chunk_starts(chunks);
    let first = starts
        .partition_point(|start| *start <= char_base)
        .saturating_sub(1);
    chunks.get(first..).map(<[String]>::to_vec).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PageRange;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    const THREE_SENTENCES: &str = "Alpha beta. Gamma delta. Epsilon zeta.";

    #[derive(Default)]
    struct ScriptedBackend {
        sink: Option<EventSink>,
        voices: Vec<Voice>,
        batches: Vec<UtteranceBatch>,
        speaking: bool,
        paused: bool,
        cancels: usize,
        released: bool,
    }

    impl ScriptedBackend {
        fn with_voice() -> Self {
            Self {
                voices: vec![
                    Voice {
                        id: "test".to_string(),
                        name: "Test".to_string(),
                        locale: Some("en-US".to_string()),
                    },
                    Voice {
                        id: "other".to_string(),
                        name: "Other".to_string(),
                        locale: None,
                    },
                ],
                ..Self::default()
            }
        }

        fn last_batch(&self) -> &UtteranceBatch {
            self.batches.last().expect("no batch submitted")
        }

        fn event(&self, batch: usize, utterance_idx: usize, kind: SpeechEventKind) -> SpeechEvent {
            SpeechEvent {
                token: self.batches[batch].token.clone(),
                utterance_idx,
                kind,
            }
        }

        fn progress(&self, utterance_idx: usize, char_index: usize) {
            let sink = self.sink.as_ref().unwrap();
            sink.progress(&self.last_batch().token, utterance_idx, char_index);
        }

        fn finish(&self, utterance_idx: usize) {
            let sink = self.sink.as_ref().unwrap();
            sink.finished(&self.last_batch().token, utterance_idx);
        }

        fn fail(&mut self, utterance_idx: usize) {
            let sink = self.sink.as_ref().unwrap();
            sink.failed(&self.last_batch().token, utterance_idx);
            self.speaking = false;
        }
    }

    impl SpeechBackend for ScriptedBackend {
        fn acquire(&mut self, events: EventSink) -> Result<()> {
            self.sink = Some(events);
            Ok(())
        }

        fn release(&mut self) {
            self.released = true;
        }

        fn voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }

        fn submit(&mut self, batch: UtteranceBatch) {
            self.batches.push(batch);
            self.speaking = true;
            self.paused = false;
        }

        fn pause(&mut self) {
            if self.speaking {
                self.paused = true;
            }
        }

        fn resume(&mut self) {
            self.paused = false;
        }

        fn cancel(&mut self) {
            self.speaking = false;
            self.paused = false;
            self.cancels += 1;
        }

        fn is_speaking(&self) -> bool {
            self.speaking
        }

        fn is_paused(&self) -> bool {
            self.paused
        }
    }

    fn config(max_chunk_chars: usize) -> ControllerConfig {
        ControllerConfig {
            max_chunk_chars,
            voice: Some("test".to_string()),
            ..ControllerConfig::default()
        }
    }

    fn controller_for(
        text: &str,
        max_chunk_chars: usize,
    ) -> PlaybackController<ScriptedBackend> {
        let mut controller =
            PlaybackController::new(ScriptedBackend::with_voice(), config(max_chunk_chars))
                .unwrap();
        controller.load_document(Document::new("doc", text), None);
        controller
    }

    fn texts(batch: &UtteranceBatch) -> Vec<&str> {
        batch
            .utterances
            .iter()
            .map(|utterance| utterance.text.as_str())
            .collect()
    }

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("narrator-{name}-{}-{nanos}", std::process::id()))
    }

    /// Plays the three-sentence text up to "delta." inside the second chunk.
    fn play_to_delta(controller: &mut PlaybackController<ScriptedBackend>) {
        controller.play();
        controller.backend().progress(0, 6);
        controller.backend().finish(0);
        controller.backend().progress(1, 6);
        controller.pump();
    }

    #[test]
    fn play_submits_one_utterance_per_chunk() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.set_rate(1.5);

        controller.play();

        assert_eq!(controller.state(), PlaybackState::Playing);
        let batch = controller.backend().last_batch();
        assert_eq!(texts(batch), vec!["Alpha beta.", "Gamma delta.", "Epsilon zeta."]);
        assert!(batch.utterances.iter().all(|u| u.voice.as_deref() == Some("test")));
        assert!(batch.utterances.iter().all(|u| (u.rate - 1.5).abs() < f32::EPSILON));
        assert_eq!(controller.snapshot().queued_utterances, 3);
    }

    #[test]
    fn progress_maps_to_global_word_across_chunks() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.play();

        controller.backend().progress(0, 6);
        controller.pump();
        assert_eq!(controller.current_word_idx(), Some(1));

        controller.backend().finish(0);
        controller.backend().progress(1, 0);
        controller.pump();
        assert_eq!(controller.current_word(), Some("Gamma"));

        controller.backend().progress(1, 6);
        controller.backend().finish(1);
        controller.backend().progress(2, 8);
        controller.pump();
        assert_eq!(controller.current_word_idx(), Some(5));
        assert_eq!(controller.current_word(), Some("zeta."));
    }

    #[test]
    fn finishing_last_utterance_resets_session() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.play();
        for idx in 0..3 {
            controller.backend().progress(idx, 0);
            controller.backend().finish(idx);
        }
        controller.pump();

        assert_eq!(controller.state(), PlaybackState::Idle);
        assert_eq!(controller.current_word_idx(), None);
        assert_eq!(controller.checkpoint(), None);
        assert_eq!(controller.snapshot().queued_utterances, 0);
    }

    #[test]
    fn pause_is_ignored_when_backend_is_not_speaking() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.play();
        controller.backend_mut().speaking = false;

        controller.pause();

        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(controller.checkpoint(), None);
        assert!(!controller.backend().paused);
    }

    #[test]
    fn pause_captures_checkpoint_and_remaining_chunks() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);

        controller.pause();

        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(
            controller.checkpoint(),
            Some(Checkpoint {
                char_base: 12,
                word_idx: Some(3),
            })
        );
        assert_eq!(
            controller.session.remaining_chunks,
            vec!["Gamma delta.".to_string(), "Epsilon zeta.".to_string()]
        );
        assert!(controller.backend().paused);
    }

    #[test]
    fn resume_unpauses_in_place() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        controller.pause();

        controller.resume();

        assert_eq!(controller.state(), PlaybackState::Playing);
        assert!(!controller.backend().paused);
        assert_eq!(controller.backend().batches.len(), 1);
        assert_eq!(controller.backend().cancels, 0);

        controller.backend().finish(1);
        controller.backend().progress(2, 0);
        controller.pump();
        assert_eq!(controller.current_word(), Some("Epsilon"));
    }

    #[test]
    fn play_while_paused_restarts_from_checkpoint_word() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        controller.pause();

        controller.play();

        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(controller.current_word_idx(), Some(3));
        assert_eq!(controller.checkpoint(), None);
        assert_eq!(controller.backend().cancels, 1);
        assert_eq!(
            texts(controller.backend().last_batch()),
            vec!["delta.", "Epsilon zeta."]
        );

        controller.backend().progress(0, 0);
        controller.backend().finish(0);
        controller.backend().progress(1, 8);
        controller.pump();
        assert_eq!(controller.current_word(), Some("zeta."));
    }

    #[test]
    fn events_from_superseded_batch_are_ignored() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        controller.pause();
        controller.play();

        let stale = controller
            .backend()
            .event(0, 1, SpeechEventKind::Progress { char_index: 0 });
        controller.handle_event(stale, Instant::now());
        let stale_finish = controller.backend().event(0, 0, SpeechEventKind::Finished);
        controller.handle_event(stale_finish, Instant::now());

        assert_eq!(controller.current_word_idx(), Some(3));
        assert_eq!(controller.session.char_base, 18);
    }

    #[test]
    fn callbacks_after_stop_are_no_ops() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.play();
        let token = controller.backend().last_batch().token.clone();

        controller.stop();
        assert!(token.is_aborted());
        controller.backend().progress(0, 6);
        controller.backend().finish(0);
        controller.pump();

        assert_eq!(controller.state(), PlaybackState::Idle);
        assert_eq!(controller.current_word_idx(), None);
    }

    #[test]
    fn stop_twice_matches_stop_once() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        controller.pause();

        controller.stop();
        let once = controller.snapshot();
        controller.stop();
        let twice = controller.snapshot();

        assert_eq!(once, twice);
        assert_eq!(twice.state, PlaybackState::Idle);
        assert_eq!(twice.current_word_index, None);
        assert_eq!(twice.queued_utterances, 0);
        assert!(!twice.has_checkpoint);
        assert_eq!(controller.session.char_base, 0);
        assert!(controller.session.remaining_chunks.is_empty());
    }

    #[test]
    fn backend_failure_returns_session_to_idle() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.play();
        controller.backend().progress(0, 6);
        controller.backend().finish(0);
        controller.backend_mut().fail(1);
        let token = controller.backend().last_batch().token.clone();

        controller.pump();

        assert!(token.is_aborted());
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert_eq!(controller.current_word_idx(), None);
        assert_eq!(controller.snapshot().queued_utterances, 0);

        controller.pause();
        assert_eq!(controller.state(), PlaybackState::Idle);
        controller.play();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(controller.backend().batches.len(), 2);
    }

    #[test]
    fn failure_from_superseded_batch_is_ignored() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        controller.pause();
        controller.play();

        let stale = controller.backend().event(0, 1, SpeechEventKind::Failed);
        controller.handle_event(stale, Instant::now());

        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(controller.current_word_idx(), Some(3));
    }

    #[test]
    fn loading_a_document_while_idle_does_not_cancel_backend() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.load_document(Document::new("next", "Other text."), None);
        assert_eq!(controller.backend().cancels, 0);

        controller.play();
        controller.stop();
        assert_eq!(controller.backend().cancels, 1);
        controller.stop();
        assert_eq!(controller.backend().cancels, 1);
    }

    #[test]
    fn out_of_order_events_are_dropped() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        controller.play();

        controller.backend().progress(1, 6);
        controller.backend().finish(1);
        controller.pump();

        assert_eq!(controller.current_word_idx(), None);
        assert_eq!(controller.session.completed, 0);
    }

    #[test]
    fn empty_document_play_is_a_no_op() {
        let mut controller = controller_for(" \n\n ", 12);
        controller.play();
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.backend().batches.is_empty());
    }

    #[test]
    fn play_without_voices_is_a_no_op() {
        let mut controller =
            PlaybackController::new(ScriptedBackend::default(), ControllerConfig::default())
                .unwrap();
        controller.load_document(Document::new("doc", THREE_SENTENCES), None);

        controller.play();

        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.backend().batches.is_empty());
    }

    #[test]
    fn loading_new_document_stops_active_session() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        let token = controller.backend().last_batch().token.clone();

        controller.load_document(Document::new("next", "Different text."), None);

        assert!(token.is_aborted());
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert_eq!(controller.current_word_idx(), None);
        assert_eq!(controller.document().word_count(), 2);
    }

    #[test]
    fn set_text_stops_and_reindexes() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        let token = controller.backend().last_batch().token.clone();

        controller.set_text("Fresh words only.");

        assert!(token.is_aborted());
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert_eq!(controller.document().key(), "doc");
        assert_eq!(controller.document().word_count(), 3);

        controller.play();
        assert_eq!(
            texts(controller.backend().last_batch()),
            vec!["Fresh words only."]
        );
    }

    #[test]
    fn voice_rate_and_pitch_are_validated() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        assert!(!controller.set_voice("missing"));
        assert!(controller.set_voice("other"));
        assert!((controller.set_rate(99.0) - 10.0).abs() < f32::EPSILON);
        assert!((controller.set_pitch(-1.0) - 0.0).abs() < f32::EPSILON);

        controller.play();

        let utterance = &controller.backend().last_batch().utterances[0];
        assert_eq!(utterance.voice.as_deref(), Some("other"));
        assert!((utterance.pitch - 0.0).abs() < f32::EPSILON);
    }

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|idx| format!("w{idx}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn paged_controller() -> PlaybackController<ScriptedBackend> {
        let mut controller =
            PlaybackController::new(ScriptedBackend::with_voice(), config(1200)).unwrap();
        let document = Document::new("paged", numbered_words(100))
            .with_page_range(PageRange::new(1, 101));
        controller.load_document(document, None);
        controller
    }

    #[test]
    fn word_progress_commits_page_after_debounce() {
        let mut controller = paged_controller();
        controller.play();
        let offset = controller.document().index().offsets[25];
        let t0 = Instant::now();

        let event = controller.backend().event(
            0,
            0,
            SpeechEventKind::Progress {
                char_index: offset,
            },
        );
        controller.handle_event(event, t0);

        assert_eq!(controller.current_word_idx(), Some(25));
        assert_eq!(controller.pending_page(), Some(51));
        assert_eq!(controller.poll_page_sync(t0 + Duration::from_millis(10)), None);
        assert_eq!(controller.poll_page_sync(t0 + Duration::from_secs(1)), Some(51));
        assert_eq!(controller.current_page(), Some(51));
        assert_eq!(
            controller.on_page_changed(51),
            PageChangeOrigin::SelfInitiated
        );
    }

    #[test]
    fn external_page_change_resyncs_word_only_when_idle() {
        let mut controller = paged_controller();

        assert_eq!(controller.on_page_changed(51), PageChangeOrigin::External);
        assert_eq!(controller.current_word_idx(), Some(24));

        controller.play();
        controller.backend().progress(0, 0);
        controller.pump();
        assert_eq!(controller.on_page_changed(90), PageChangeOrigin::External);
        assert_eq!(controller.current_word_idx(), Some(0));
        assert_eq!(controller.current_page(), Some(90));
    }

    #[test]
    fn go_to_page_clamps_and_moves_idle_highlight() {
        let mut controller = paged_controller();
        assert_eq!(controller.go_to_page(0), Some(1));
        assert_eq!(controller.current_word_idx(), Some(0));
        assert_eq!(controller.go_to_page(51), Some(51));
        assert_eq!(controller.current_word_idx(), Some(24));

        let mut unpaged = controller_for(THREE_SENTENCES, 12);
        assert_eq!(unpaged.go_to_page(3), None);
        assert_eq!(unpaged.current_page(), None);
    }

    #[test]
    fn snapshot_serializes_for_consumers() {
        let mut controller = controller_for(THREE_SENTENCES, 12);
        play_to_delta(&mut controller);
        controller.pause();

        let value = serde_json::to_value(controller.snapshot()).unwrap();

        assert_eq!(value["state"], "paused");
        assert_eq!(value["current_word"], "delta.");
        assert_eq!(value["word_count"], 6);
        assert_eq!(value["has_checkpoint"], true);
    }

    #[test]
    fn pause_persists_checkpoint_for_next_session() {
        let dir = unique_temp_dir("controller-checkpoint");
        let store = CheckpointStore::for_document(&dir, "doc");

        let mut first = controller_for(THREE_SENTENCES, 12);
        first.load_document(Document::new("doc", THREE_SENTENCES), Some(store.clone()));
        play_to_delta(&mut first);
        first.pause();
        first.teardown();
        assert!(first.backend().released);

        let mut second = controller_for(THREE_SENTENCES, 12);
        second.load_document(Document::new("doc", THREE_SENTENCES), Some(store.clone()));
        assert_eq!(second.state(), PlaybackState::Paused);
        assert_eq!(second.current_word(), Some("delta."));

        second.resume();
        assert_eq!(second.state(), PlaybackState::Playing);
        assert_eq!(
            texts(second.backend().last_batch()),
            vec!["delta.", "Epsilon zeta."]
        );

        second.stop();
        assert!(store.load(second.document().plain_text()).is_none());
        let _ = std::fs::remove_dir_all(dir);
    }
}
