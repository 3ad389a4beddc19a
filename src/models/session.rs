// src/models/session.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'sessions' table: one practice attempt over a selected
/// set of questions. The four counters are derived by the scoring service
/// from current answer rows, never accumulated.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub submitter_id: i64,
    pub exam_id: i64,
    pub correct_answer_count: i64,
    pub incorrect_answer_count: i64,
    pub skipped_answer_count: i64,
    pub unused_question_count: i64,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'answers' table. `choice_id` NULL means the question was
/// skipped. `is_first` marks the user's earliest real attempt at the
/// question across all of their sessions.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub session_id: i64,
    pub question_id: i64,
    pub choice_id: Option<i64>,
    pub is_first: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for opening a new session on an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    /// How many questions to draw; clamped to the configured cap.
    #[validate(range(min = 1, max = 200))]
    pub question_count: Option<i64>,
    /// Restrict the draw to these subjects when present.
    pub subject_ids: Option<Vec<i64>>,
}

/// DTO for answering one question inside a session.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    /// None records a skip.
    pub choice_id: Option<i64>,
}

/// Session payload with its assigned question ids.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub exam_id: i64,
    pub question_ids: Vec<i64>,
}

/// The settled counters for a session.
#[derive(Debug, Serialize)]
pub struct SessionResults {
    pub correct_answer_count: i64,
    pub incorrect_answer_count: i64,
    pub skipped_answer_count: i64,
    pub unused_question_count: i64,
    pub total_questions: i64,
}
