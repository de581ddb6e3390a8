//! # Session Identity
//!
//! The tuple of fields identifying which student/subject/chapter a live
//! session concerns. Immutable once the session starts: it is used only to
//! build the connection target, never mutated mid-session.
//!
//! ## Lifecycle:
//! The task fields (grade, subject, chapter) are supplied up front; the
//! student fields (roll number, name) are filled in by the recognition
//! service after face verification. A transport connection may only be
//! constructed once every field is non-empty.

use crate::error::{SessionError, SessionResult};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Characters left bare in a connection-target path segment.
///
/// Everything else is percent-encoded, matching what browsers produce for
/// per-segment encoding (unreserved marks stay literal).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Identity of one checker session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub roll_number: String,
    pub student_name: String,
    pub grade: String,
    pub subject: String,
    pub chapter: String,
}

impl SessionIdentity {
    /// Create an identity with only the task fields populated.
    ///
    /// The student fields stay empty until recognition fills them; the
    /// identity is not `validate()`-clean until then.
    pub fn for_task(grade: &str, subject: &str, chapter: &str) -> Self {
        Self {
            roll_number: String::new(),
            student_name: String::new(),
            grade: grade.to_string(),
            subject: subject.to_string(),
            chapter: chapter.to_string(),
        }
    }

    /// Fill in the student fields from a recognition result.
    pub fn with_student(mut self, name: &str, roll_number: &str) -> Self {
        self.student_name = name.to_string();
        self.roll_number = roll_number.to_string();
        self
    }

    /// Check that every field is non-empty.
    ///
    /// ## Returns:
    /// - **Ok(())**: the identity may be used to build a connection target
    /// - **Err(InvalidIdentity)**: names the first missing field; no
    ///   connection attempt may be made
    pub fn validate(&self) -> SessionResult<()> {
        for (field, value) in [
            ("roll_number", &self.roll_number),
            ("student_name", &self.student_name),
            ("grade", &self.grade),
            ("subject", &self.subject),
            ("chapter", &self.chapter),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::InvalidIdentity(field.to_string()));
            }
        }
        Ok(())
    }

    /// Whether the task fields needed to *start* verification are present.
    ///
    /// The student fields are allowed to be empty here; they arrive later
    /// from the recognition service.
    pub fn task_fields_present(&self) -> bool {
        !self.grade.trim().is_empty()
            && !self.subject.trim().is_empty()
            && !self.chapter.trim().is_empty()
    }

    /// Build the WebSocket connection target for this identity.
    ///
    /// ## Format:
    /// `{base}/{roll}/{name}/{grade}/{subject}/{chapter}` with each segment
    /// percent-encoded. Refuses (does not attempt) when any field is empty.
    pub fn socket_target(&self, base: &str) -> SessionResult<String> {
        self.validate()?;

        let mut target = base.trim_end_matches('/').to_string();
        for segment in [
            &self.roll_number,
            &self.student_name,
            &self.grade,
            &self.subject,
            &self.chapter,
        ] {
            target.push('/');
            target.push_str(&utf8_percent_encode(segment, PATH_SEGMENT).to_string());
        }
        Ok(target)
    }
}
