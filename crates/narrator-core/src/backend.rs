//! Speech backend seam.
//!
//! A backend is the process-wide speech engine. The controller acquires it
//! once per reading session, submits ordered batches of utterances, and gets
//! progress back as [`SpeechEvent`]s through the [`EventSink`] handed over at
//! acquisition time. Backends must report events for a batch in submission
//! order and exactly one `Finished` per utterance. A backend that cannot
//! speak an utterance reports `Failed` for it instead and drops the rest of
//! the batch.

use crate::cancellation::AbortToken;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

/// Voice exposed by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub locale: Option<String>,
}

/// One unit of speakable text plus voice parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone)]
pub struct UtteranceBatch {
    pub token: AbortToken,
    pub utterances: Vec<Utterance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEventKind {
    /// Speech reached `char_index` (in chars) of the utterance text.
    Progress { char_index: usize },
    Finished,
    /// The utterance could not be spoken; no further events follow.
    Failed,
}

#[derive(Debug, Clone)]
pub struct SpeechEvent {
    pub token: AbortToken,
    pub utterance_idx: usize,
    pub kind: SpeechEventKind,
}

/// Sending half of the controller's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SpeechEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SpeechEvent>) -> Self {
        Self { tx }
    }

    pub fn progress(&self, token: &AbortToken, utterance_idx: usize, char_index: usize) -> bool {
        self.send(SpeechEvent {
            token: token.clone(),
            utterance_idx,
            kind: SpeechEventKind::Progress { char_index },
        })
    }

    pub fn finished(&self, token: &AbortToken, utterance_idx: usize) -> bool {
        self.send(SpeechEvent {
            token: token.clone(),
            utterance_idx,
            kind: SpeechEventKind::Finished,
        })
    }

    pub fn failed(&self, token: &AbortToken, utterance_idx: usize) -> bool {
        self.send(SpeechEvent {
            token: token.clone(),
            utterance_idx,
            kind: SpeechEventKind::Failed,
        })
    }

    /// Returns `false` once the controller side is gone.
    fn send(&self, event: SpeechEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

pub trait SpeechBackend {
    /// Take ownership of the engine for one session.
    fn acquire(&mut self, events: EventSink) -> Result<()>;
    fn release(&mut self);
    fn voices(&self) -> Vec<Voice>;
    /// Queue a batch; utterances play strictly one after another.
    fn submit(&mut self, batch: UtteranceBatch);
    /// Suspend the in-flight utterance in place.
    fn pause(&mut self);
    /// Continue the utterance suspended by [`SpeechBackend::pause`].
    fn resume(&mut self);
    /// Abandon all queued and in-flight utterances.
    fn cancel(&mut self);
    fn is_speaking(&self) -> bool;
    fn is_paused(&self) -> bool;
}

impl<B: SpeechBackend + ?Sized> SpeechBackend for Box<B> {
    fn acquire(&mut self, events: EventSink) -> Result<()> {
        (**self).acquire(events)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn voices(&self) -> Vec<Voice> {
        (**self).voices()
    }

    fn submit(&mut self, batch: UtteranceBatch) {
        (**self).submit(batch)
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn resume(&mut self) {
        (**self).resume()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }

    fn is_speaking(&self) -> bool {
        (**self).is_speaking()
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }
}

/// Char index where each whitespace-delimited word of `text` starts.
///
/// Backends without native word-boundary callbacks use this to report
/// progress at word granularity.
pub fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (idx, ch) in text.chars().enumerate() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            starts.push(idx);
            in_word = true;
        }
    }
    starts
}

/// Weight of each word for proportional timing: its char length plus one
/// separator, normalised to sum to 1.
pub fn word_timing_weights(text: &str) -> Vec<f64> {
    let lengths: Vec<usize> = text
        .split_whitespace()
        .map(|word| word.chars().count() + 1)
        .collect();
    let total: usize = lengths.iter().sum();
    if total == 0 {
        return Vec::new();
    }
    lengths
        .into_iter()
        .map(|len| len as f64 / total as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_starts_are_char_indices() {
        assert_eq!(word_starts("alpha beta  gamma"), vec![0, 6, 12]);
        assert_eq!(word_starts(" é ü"), vec![1, 3]);
        assert!(word_starts("   ").is_empty());
    }

    #[test]
    fn timing_weights_sum_to_one() {
        let weights = word_timing_weights("a bbb cc");
        assert_eq!(weights.len(), 3);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights[1] > weights[2]);
        assert!(word_timing_weights("").is_empty());
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(tx);
        let token = AbortToken::new(1);
        assert!(sink.progress(&token, 0, 4));
        let event = rx.recv().unwrap();
        assert_eq!(event.kind, SpeechEventKind::Progress { char_index: 4 });
        drop(rx);
        assert!(!sink.finished(&token, 0));
    }
}
