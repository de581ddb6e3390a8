//! # Session Transcript
//!
//! Append-only ordered log of what was said during a live session. Tutor
//! turns are built incrementally from streamed text fragments bracketed by
//! `stream_start` / `stream_end` markers; user text inputs are logged as
//! their own turns.
//!
//! A fragment arriving before any `stream_start` opens an implicit tutor
//! turn rather than being dropped; losing tutor output to a missed boundary
//! marker is worse than a merged turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Tutor,
    Student,
}

/// One contiguous utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub text: String,
    pub started_at: DateTime<Utc>,
    /// Set when the turn's end marker arrived (tutor turns only; student
    /// turns are complete on creation).
    pub ended_at: Option<DateTime<Utc>>,
}

/// The running transcript of one session.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<TranscriptTurn>,
    /// Index of the tutor turn currently receiving fragments, if any.
    open_tutor_turn: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new tutor turn (`stream_start`).
    ///
    /// An already-open turn is closed first; the server signalling a new
    /// stream implies the previous one is done even if its end marker was
    /// lost.
    pub fn begin_tutor_turn(&mut self) {
        self.end_tutor_turn();
        self.turns.push(TranscriptTurn {
            speaker: Speaker::Tutor,
            text: String::new(),
            started_at: Utc::now(),
            ended_at: None,
        });
        self.open_tutor_turn = Some(self.turns.len() - 1);
    }

    /// Append a streamed fragment (`text`) onto the open tutor turn,
    /// opening an implicit turn if none is open.
    pub fn append_fragment(&mut self, fragment: &str) {
        let index = match self.open_tutor_turn {
            Some(index) => index,
            None => {
                self.begin_tutor_turn();
                self.open_tutor_turn.expect("turn just opened")
            }
        };
        self.turns[index].text.push_str(fragment);
    }

    /// Close the open tutor turn (`stream_end`). No-op when none is open.
    pub fn end_tutor_turn(&mut self) {
        if let Some(index) = self.open_tutor_turn.take() {
            self.turns[index].ended_at = Some(Utc::now());
        }
    }

    /// Record a user text input as a complete student turn.
    pub fn record_student_input(&mut self, text: &str) {
        let now = Utc::now();
        self.turns.push(TranscriptTurn {
            speaker: Speaker::Student,
            text: text.to_string(),
            started_at: now,
            ended_at: Some(now),
        });
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    /// Text of the most recent tutor turn, complete or not.
    pub fn latest_tutor_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.speaker == Speaker::Tutor)
            .map(|turn| turn.text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_accumulate_into_one_turn() {
        let mut transcript = Transcript::new();
        transcript.begin_tutor_turn();
        transcript.append_fragment("Let's look ");
        transcript.append_fragment("at question 2.");
        transcript.end_tutor_turn();

        assert_eq!(transcript.turns().len(), 1);
        assert_eq!(
            transcript.latest_tutor_text(),
            Some("Let's look at question 2.")
        );
        assert!(transcript.turns()[0].ended_at.is_some());
    }

    #[test]
    fn test_new_turn_starts_only_on_stream_start() {
        let mut transcript = Transcript::new();
        transcript.begin_tutor_turn();
        transcript.append_fragment("first");
        transcript.end_tutor_turn();

        transcript.begin_tutor_turn();
        transcript.append_fragment("second");

        assert_eq!(transcript.turns().len(), 2);
        assert_eq!(transcript.latest_tutor_text(), Some("second"));
    }

    #[test]
    fn test_orphan_fragment_opens_implicit_turn() {
        let mut transcript = Transcript::new();
        transcript.append_fragment("no marker preceded this");
        assert_eq!(transcript.turns().len(), 1);
        assert_eq!(
            transcript.latest_tutor_text(),
            Some("no marker preceded this")
        );
    }

    #[test]
    fn test_missing_end_marker_closed_by_next_start() {
        let mut transcript = Transcript::new();
        transcript.begin_tutor_turn();
        transcript.append_fragment("lost ending");
        // stream_end never arrives; the next stream_start closes it.
        transcript.begin_tutor_turn();

        assert!(transcript.turns()[0].ended_at.is_some());
        assert_eq!(transcript.turns().len(), 2);
    }

    #[test]
    fn test_student_turns_interleave() {
        let mut transcript = Transcript::new();
        transcript.record_student_input("What is 3/4 + 1/8?");
        transcript.begin_tutor_turn();
        transcript.append_fragment("Find a common denominator.");
        transcript.end_tutor_turn();

        assert_eq!(transcript.turns().len(), 2);
        assert_eq!(transcript.turns()[0].speaker, Speaker::Student);
        assert_eq!(transcript.turns()[1].speaker, Speaker::Tutor);
    }
}
