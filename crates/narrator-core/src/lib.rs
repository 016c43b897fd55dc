//! Read-aloud core: text indexing, chunking, word/page position mapping and
//! the playback controller that drives a speech backend.

pub mod backend;
pub mod cache;
pub mod cancellation;
pub mod chunker;
pub mod config;
pub mod controller;
pub mod density;
pub mod document;
pub mod page_sync;
pub mod position;
pub mod text_utils;

pub use backend::{EventSink, SpeechBackend, SpeechEvent, SpeechEventKind, Utterance, Voice};
pub use config::{AppConfig, LogLevel};
pub use controller::{ControllerConfig, PlaybackController, PlaybackSnapshot, PlaybackState};
pub use document::{Document, load_chapter};
