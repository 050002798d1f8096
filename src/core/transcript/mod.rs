//! # Transcript
//!
//! Result-consumer boundary: accumulation of streaming token batches into
//! per-speaker, per-role transcript state with interim/final semantics.

mod assembler;

pub use assembler::{TranscriptAssembler, TranscriptTrack, TranscriptUpdate};
