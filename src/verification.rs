//! # Verification State Machine
//!
//! The sequence of steps a student passes through before, during and after a
//! live session. Exactly one state is active at a time; transitions are
//! driven by user action, the face-capture callback, the recognition
//! service's response, fixed timers, transport failure and explicit reset.
//!
//! ## State Flow:
//! 1. **Idle**: waiting for the student to start
//! 2. **FaceScanning**: face presence gate armed
//! 3. **Verifying**: captured face sent to the recognition service
//! 4. **VerifiedSuccess**: identity confirmed (pauses briefly)
//! 5. **ShowingInstruction**: "show your work" screen (pauses)
//! 6. **InteractiveSession**: the live transport is open
//! 7. **Analyzing**: session ended, homework being scored
//! 8. **Done**: terminal success; exits only via reset
//! 9. **Failed**: terminal failure; exits only via reset
//!
//! Entering/leaving `InteractiveSession` is the sole trigger for opening and
//! closing the session transport; that wiring lives in the session
//! controller, which consults this table for every move.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};

/// Current step of the verification flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Idle,
    FaceScanning,
    Verifying,
    VerifiedSuccess,
    ShowingInstruction,
    InteractiveSession,
    Failed,
    Analyzing,
    Done,
}

impl VerificationState {
    /// Stable lowercase names for logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationState::Idle => "idle",
            VerificationState::FaceScanning => "face_scanning",
            VerificationState::Verifying => "verifying",
            VerificationState::VerifiedSuccess => "verified_success",
            VerificationState::ShowingInstruction => "showing_instruction",
            VerificationState::InteractiveSession => "interactive_session",
            VerificationState::Failed => "failed",
            VerificationState::Analyzing => "analyzing",
            VerificationState::Done => "done",
        }
    }

    /// Whether the live transport should exist in this state.
    pub fn is_interactive(&self) -> bool {
        matches!(self, VerificationState::InteractiveSession)
    }

    /// Terminal states that only an explicit reset leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VerificationState::Failed | VerificationState::Done)
    }
}

/// Everything that can move the verification flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationEvent {
    /// The student pressed start (identity task fields already checked by
    /// the caller; an incomplete identity never produces this event).
    StartRequested,
    /// The face presence gate completed its dwell and captured a frame.
    FaceCaptured,
    /// The recognition service confirmed the student's identity.
    VerificationPassed,
    /// The recognition service rejected the face or errored.
    VerificationRejected,
    /// The post-success pause elapsed.
    SuccessPauseElapsed,
    /// The instruction pause elapsed.
    InstructionPauseElapsed,
    /// The student (or the harness) ended the live session.
    SessionEnded,
    /// The homework analysis result arrived (or analysis was skipped).
    AnalysisComplete,
    /// The transport failed while it was load-bearing.
    TransportFailed,
    /// Explicit user-initiated reset.
    Reset,
}

/// Apply one event to a state.
///
/// ## Returns:
/// - **Ok(next)**: the transition is in the table
/// - **Err(State)**: the event is not legal in this state; callers log and
///   ignore (stale timers and late callbacks are expected)
pub fn apply(
    state: VerificationState,
    event: VerificationEvent,
) -> SessionResult<VerificationState> {
    use VerificationEvent as E;
    use VerificationState as S;

    let next = match (state, event) {
        (S::Idle, E::StartRequested) => S::FaceScanning,
        (S::FaceScanning, E::FaceCaptured) => S::Verifying,
        (S::Verifying, E::VerificationPassed) => S::VerifiedSuccess,
        (S::Verifying, E::VerificationRejected) => S::Failed,
        (S::VerifiedSuccess, E::SuccessPauseElapsed) => S::ShowingInstruction,
        (S::ShowingInstruction, E::InstructionPauseElapsed) => S::InteractiveSession,
        (S::InteractiveSession, E::SessionEnded) => S::Analyzing,
        (S::Analyzing, E::AnalysisComplete) => S::Done,

        // Transport loss fails the flow wherever the connection (or the
        // pending verification call) was load-bearing.
        (S::Verifying, E::TransportFailed) => S::Failed,
        (S::InteractiveSession, E::TransportFailed) => S::Failed,

        // Terminal states exit only via explicit reset.
        (S::Failed, E::Reset) => S::Idle,
        (S::Done, E::Reset) => S::Idle,
        // Reset from any non-terminal state abandons the flow the same way.
        (_, E::Reset) => S::Idle,

        (state, event) => {
            return Err(SessionError::State(format!(
                "event {:?} is not valid in state {}",
                event,
                state.as_str()
            )))
        }
    };
    Ok(next)
}
