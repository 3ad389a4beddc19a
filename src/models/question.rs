// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'questions' table.
///
/// `is_deleted`, `is_approved` and `best_revision_id` are derived columns;
/// they are written exclusively by the consistency engine after every
/// revision or choice mutation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: i64,
    pub subject_id: Option<i64>,
    pub source_id: Option<i64>,
    /// Optional link to the question this one is a variant of.
    pub parent_question_id: Option<i64>,
    pub is_deleted: bool,
    pub is_approved: bool,
    pub best_revision_id: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'revisions' table: one versioned submission of a
/// question's text and choices. Rows are soft-deleted, never removed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Revision {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub explanation: Option<String>,
    /// Opaque reference into the media store; never inspected here.
    pub figure_reference: Option<String>,
    pub submitter_id: i64,
    pub is_first: bool,
    pub is_last: bool,
    pub is_approved: bool,
    pub is_deleted: bool,
    pub approved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'choices' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub revision_id: i64,
    pub text: String,
    pub is_right: bool,
}

/// Represents the 'question_issues' table. Open blockers veto approval of
/// the question they are filed against.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionIssue {
    pub id: i64,
    pub question_id: i64,
    pub reporter_id: i64,
    pub body: String,
    pub is_blocker: bool,
    pub is_open: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One choice in a submitted revision.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChoiceInput {
    pub text: String,
    #[serde(default)]
    pub is_right: bool,
}

/// Shared validation for submitted choice sets: bounded sizes and at most
/// one right answer. Fewer than `MIN_CHOICE_COUNT` choices is accepted (the
/// revision simply stays ineligible for approval).
pub fn validate_choices(choices: &[ChoiceInput]) -> Result<(), validator::ValidationError> {
    if choices.len() > 10 {
        return Err(validator::ValidationError::new("too_many_choices"));
    }
    for choice in choices {
        if choice.text.is_empty() || choice.text.len() > 500 {
            return Err(validator::ValidationError::new("choice_text_length"));
        }
    }
    if choices.iter().filter(|c| c.is_right).count() > 1 {
        return Err(validator::ValidationError::new("multiple_right_answers"));
    }
    Ok(())
}

/// DTO for creating a question together with its first revision.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub subject_id: Option<i64>,
    pub source_id: Option<i64>,
    pub parent_question_id: Option<i64>,
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[validate(length(max = 5000))]
    pub explanation: Option<String>,
    #[validate(length(max = 500))]
    pub figure_reference: Option<String>,
    #[validate(custom(function = validate_choices))]
    pub choices: Vec<ChoiceInput>,
}

/// DTO for contributing a new revision to an existing question.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRevisionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[validate(length(max = 5000))]
    pub explanation: Option<String>,
    #[validate(length(max = 500))]
    pub figure_reference: Option<String>,
    #[validate(custom(function = validate_choices))]
    pub choices: Vec<ChoiceInput>,
}

/// DTO for reporting an issue on a question.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateIssueRequest {
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
    #[serde(default)]
    pub is_blocker: bool,
}

/// A revision as shown to readers, with its choices attached.
#[derive(Debug, Serialize)]
pub struct RevisionView {
    pub id: i64,
    pub text: String,
    pub explanation: Option<String>,
    pub figure_reference: Option<String>,
    pub is_approved: bool,
    pub choices: Vec<Choice>,
}

/// Full question payload: metadata plus the best revision.
#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub id: i64,
    pub exam_id: i64,
    pub subject_id: Option<i64>,
    pub source_id: Option<i64>,
    pub parent_question_id: Option<i64>,
    pub is_approved: bool,
    pub is_deleted: bool,
    pub best_revision: Option<RevisionView>,
}
