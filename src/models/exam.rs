// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'exams' table. An exam scopes questions and sessions and
/// lives under one category node.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
}

/// Represents the 'subjects' table (question metadata within an exam).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub exam_id: i64,
    pub name: String,
}

/// Represents the 'sources' table (where a question was transcribed from).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub exam_id: i64,
    pub name: String,
}

/// DTO for creating an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    pub category_id: i64,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

/// DTO for creating a subject under an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubjectRequest {
    pub exam_id: i64,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}
