//! Token accumulation into per-speaker transcript state

use tracing::debug;

use crate::core::soniox::{Token, TranslationStatus};

/// One line of the live transcript: a speaker/role pair with its stable
/// text and the current unstable tail.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptTrack {
    /// Upstream speaker id, or None when diarization is disabled
    pub speaker: Option<u32>,
    /// Original-language text or translation
    pub role: TranslationStatus,
    /// Final text, append-only
    pub committed: String,
    /// Current interim tail, replaced on every batch
    pub interim: String,
}

impl TranscriptTrack {
    fn new(speaker: Option<u32>, role: TranslationStatus) -> Self {
        Self {
            speaker,
            role,
            committed: String::new(),
            interim: String::new(),
        }
    }

    /// Stable text followed by the current interim tail
    pub fn live_text(&self) -> String {
        format!("{}{}", self.committed, self.interim)
    }
}

/// Accumulation event handed to the consumer when a batch is ingested
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptUpdate {
    pub speaker: Option<u32>,
    pub role: TranslationStatus,
    pub text: String,
    pub is_final: bool,
}

/// Accumulates streaming token batches into per-speaker, per-role tracks.
///
/// Final tokens append permanently to their track. Non-final tokens are a
/// complete replacement of the previous unstable tail: upstream re-sends
/// the whole tail in every result message until its tokens harden into
/// finals. Token text carries its own spacing, so accumulation is plain
/// concatenation.
///
/// A speaker id of 0 means diarization has not attributed the token yet.
/// Such tokens are never added to a track: interim ones will reappear in a
/// later tail (usually with a real speaker), final ones are held in a
/// pending list the consumer can inspect.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    tracks: Vec<TranscriptTrack>,
    pending: Vec<Token>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one result batch and return the accumulation events it
    /// produced: one per run of consecutive final tokens sharing a track,
    /// then one per track with a non-empty interim tail.
    pub fn ingest(&mut self, tokens: &[Token]) -> Vec<TranscriptUpdate> {
        let mut updates: Vec<TranscriptUpdate> = Vec::new();

        for track in &mut self.tracks {
            track.interim.clear();
        }

        for token in tokens {
            if token.speaker_pending() {
                if token.is_final {
                    debug!("Holding final token without speaker attribution: {:?}", token.text);
                    self.pending.push(token.clone());
                }
                continue;
            }

            let role = token.role();
            if token.is_final {
                let index = self.track_index(token.speaker, role);
                self.tracks[index].committed.push_str(&token.text);

                match updates.last_mut() {
                    Some(last)
                        if last.is_final && last.speaker == token.speaker && last.role == role =>
                    {
                        last.text.push_str(&token.text);
                    }
                    _ => updates.push(TranscriptUpdate {
                        speaker: token.speaker,
                        role,
                        text: token.text.clone(),
                        is_final: true,
                    }),
                }
            } else {
                let index = self.track_index(token.speaker, role);
                self.tracks[index].interim.push_str(&token.text);
            }
        }

        for track in &self.tracks {
            if !track.interim.is_empty() {
                updates.push(TranscriptUpdate {
                    speaker: track.speaker,
                    role: track.role,
                    text: track.interim.clone(),
                    is_final: false,
                });
            }
        }

        updates
    }

    /// All tracks in the order they first produced text
    pub fn tracks(&self) -> &[TranscriptTrack] {
        &self.tracks
    }

    /// Final tokens still waiting for speaker attribution
    pub fn pending_tokens(&self) -> &[Token] {
        &self.pending
    }

    /// Concatenated final text of every track with the given role
    pub fn committed_text(&self, role: TranslationStatus) -> String {
        self.tracks
            .iter()
            .filter(|track| track.role == role)
            .map(|track| track.committed.as_str())
            .collect()
    }

    /// Discard all accumulated state
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.pending.clear();
    }

    fn track_index(&mut self, speaker: Option<u32>, role: TranslationStatus) -> usize {
        match self
            .tracks
            .iter()
            .position(|track| track.speaker == speaker && track.role == role)
        {
            Some(index) => index,
            None => {
                self.tracks.push(TranscriptTrack::new(speaker, role));
                self.tracks.len() - 1
            }
        }
    }
}
