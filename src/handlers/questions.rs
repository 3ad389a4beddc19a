// src/handlers/questions.rs
//
// Contribution endpoints: creating questions, revising them, approving
// revisions, and reporting issues. Every mutation settles the owning
// question through the consistency engine inside the same transaction.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::question::{
        Choice, ChoiceInput, CreateIssueRequest, CreateQuestionRequest, CreateRevisionRequest,
        Question, QuestionIssue, QuestionResponse, Revision, RevisionView,
    },
    services::{
        access::{CategoryArena, UserAccess},
        consistency,
    },
    utils::{jwt::Claims, markup::sanitize_markup},
};

async fn load_access(
    pool: &PgPool,
    claims: &Claims,
) -> Result<(CategoryArena, UserAccess), AppError> {
    let arena = CategoryArena::load(pool).await?;
    let user = UserAccess::load(pool, claims.user_id()).await?;
    Ok((arena, user))
}

/// The category an exam hangs under, or 404.
async fn exam_category(pool: &PgPool, exam_id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar("SELECT category_id FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
}

/// Fetches a live (non-deleted) question, or 404.
async fn live_question(pool: &PgPool, question_id: i64) -> Result<Question, AppError> {
    let question = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, exam_id, subject_id, source_id, parent_question_id,
               is_deleted, is_approved, best_revision_id, created_at
        FROM questions
        WHERE id = $1
        "#,
    )
    .bind(question_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    if question.is_deleted {
        return Err(AppError::NotFound("Question not found".to_string()));
    }
    Ok(question)
}

async fn insert_revision(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    question_id: i64,
    submitter_id: i64,
    text: &str,
    explanation: Option<&str>,
    figure_reference: Option<&str>,
    choices: &[ChoiceInput],
) -> Result<i64, AppError> {
    let revision_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO revisions (question_id, text, explanation, figure_reference, submitter_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(question_id)
    .bind(text)
    .bind(explanation)
    .bind(figure_reference)
    .bind(submitter_id)
    .fetch_one(&mut **tx)
    .await?;

    for choice in choices {
        sqlx::query("INSERT INTO choices (revision_id, text, is_right) VALUES ($1, $2, $3)")
            .bind(revision_id)
            .bind(sanitize_markup(&choice.text))
            .bind(choice.is_right)
            .execute(&mut **tx)
            .await?;
    }

    Ok(revision_id)
}

/// Creates a question under an exam together with its first revision and
/// choices.
pub async fn create_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let category_id = exam_category(&pool, exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;
    if !arena.can_access(&user, category_id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to contribute here".to_string(),
        ));
    }

    if let Some(subject_id) = payload.subject_id {
        sqlx::query("SELECT id FROM subjects WHERE id = $1 AND exam_id = $2")
            .bind(subject_id)
            .bind(exam_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| AppError::BadRequest("Subject does not belong to exam".to_string()))?;
    }
    if let Some(source_id) = payload.source_id {
        sqlx::query("SELECT id FROM sources WHERE id = $1 AND exam_id = $2")
            .bind(source_id)
            .bind(exam_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| AppError::BadRequest("Source does not belong to exam".to_string()))?;
    }
    if let Some(parent_id) = payload.parent_question_id {
        sqlx::query("SELECT id FROM questions WHERE id = $1 AND exam_id = $2")
            .bind(parent_id)
            .bind(exam_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| AppError::BadRequest("Parent question not found".to_string()))?;
    }

    let mut tx = pool.begin().await?;

    let question_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO questions (exam_id, subject_id, source_id, parent_question_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(exam_id)
    .bind(payload.subject_id)
    .bind(payload.source_id)
    .bind(payload.parent_question_id)
    .fetch_one(&mut *tx)
    .await?;

    let explanation = payload.explanation.as_deref().map(sanitize_markup);
    let revision_id = insert_revision(
        &mut tx,
        question_id,
        claims.user_id(),
        &sanitize_markup(&payload.text),
        explanation.as_deref(),
        payload.figure_reference.as_deref(),
        &payload.choices,
    )
    .await?;

    consistency::on_revision_changed(&mut tx, question_id).await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "question_id": question_id, "revision_id": revision_id })),
    ))
}

/// Contributes a new revision to an existing question.
pub async fn create_revision(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<i64>,
    Json(payload): Json<CreateRevisionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let question = live_question(&pool, question_id).await?;
    let category_id = exam_category(&pool, question.exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;
    if !arena.can_access(&user, category_id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to contribute here".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let explanation = payload.explanation.as_deref().map(sanitize_markup);
    let revision_id = insert_revision(
        &mut tx,
        question_id,
        claims.user_id(),
        &sanitize_markup(&payload.text),
        explanation.as_deref(),
        payload.figure_reference.as_deref(),
        &payload.choices,
    )
    .await?;

    consistency::on_choice_changed(&mut tx, revision_id).await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "revision_id": revision_id })),
    ))
}

/// Returns a question with its best revision and choices.
pub async fn get_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let question = live_question(&pool, question_id).await?;
    let category_id = exam_category(&pool, question.exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;
    if !arena.can_access(&user, category_id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to view this question".to_string(),
        ));
    }

    let best_revision = match question.best_revision_id {
        Some(revision_id) => {
            let revision = sqlx::query_as::<_, Revision>(
                r#"
                SELECT id, question_id, text, explanation, figure_reference, submitter_id,
                       is_first, is_last, is_approved, is_deleted, approved_at, created_at
                FROM revisions
                WHERE id = $1
                "#,
            )
            .bind(revision_id)
            .fetch_one(&pool)
            .await?;

            let choices = sqlx::query_as::<_, Choice>(
                "SELECT id, revision_id, text, is_right FROM choices WHERE revision_id = $1 ORDER BY id",
            )
            .bind(revision_id)
            .fetch_all(&pool)
            .await?;

            Some(RevisionView {
                id: revision.id,
                text: revision.text,
                explanation: revision.explanation,
                figure_reference: revision.figure_reference,
                is_approved: revision.is_approved,
                choices,
            })
        }
        None => None,
    };

    Ok(Json(QuestionResponse {
        id: question.id,
        exam_id: question.exam_id,
        subject_id: question.subject_id,
        source_id: question.source_id,
        parent_question_id: question.parent_question_id,
        is_approved: question.is_approved,
        is_deleted: question.is_deleted,
        best_revision,
    }))
}

/// Soft-deletes a revision. Allowed for its submitter and for editors of
/// the owning category. Deleting the last live revision tombstones the
/// question.
pub async fn delete_revision(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(revision_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let revision = sqlx::query_as::<_, Revision>(
        r#"
        SELECT id, question_id, text, explanation, figure_reference, submitter_id,
               is_first, is_last, is_approved, is_deleted, approved_at, created_at
        FROM revisions
        WHERE id = $1
        "#,
    )
    .bind(revision_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Revision not found".to_string()))?;

    if revision.is_deleted {
        return Err(AppError::NotFound("Revision not found".to_string()));
    }

    let question = live_question(&pool, revision.question_id).await?;
    let category_id = exam_category(&pool, question.exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;

    let is_submitter = revision.submitter_id == claims.user_id();
    if !is_submitter && !arena.can_edit(&user, category_id) {
        return Err(AppError::Forbidden(
            "Only the submitter or an editor may delete a revision".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE revisions SET is_deleted = TRUE WHERE id = $1")
        .bind(revision_id)
        .execute(&mut *tx)
        .await?;

    consistency::on_revision_changed(&mut tx, revision.question_id).await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Approves a revision (editors only). The revision must be eligible: at
/// least two choices with exactly one right answer.
pub async fn approve_revision(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(revision_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let revision = sqlx::query_as::<_, Revision>(
        r#"
        SELECT id, question_id, text, explanation, figure_reference, submitter_id,
               is_first, is_last, is_approved, is_deleted, approved_at, created_at
        FROM revisions
        WHERE id = $1
        "#,
    )
    .bind(revision_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Revision not found".to_string()))?;

    if revision.is_deleted {
        return Err(AppError::NotFound("Revision not found".to_string()));
    }

    let question = live_question(&pool, revision.question_id).await?;
    let category_id = exam_category(&pool, question.exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;
    if !arena.can_edit(&user, category_id) {
        return Err(AppError::Forbidden(
            "Only editors may approve revisions".to_string(),
        ));
    }

    let (choice_count, right_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(*) FILTER (WHERE is_right)
        FROM choices
        WHERE revision_id = $1
        "#,
    )
    .bind(revision_id)
    .fetch_one(&pool)
    .await?;

    if choice_count < crate::config::MIN_CHOICE_COUNT as i64 || right_count != 1 {
        return Err(AppError::BadRequest(
            "Revision needs at least two choices and exactly one right answer".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE revisions SET is_approved = TRUE, approved_at = NOW() WHERE id = $1")
        .bind(revision_id)
        .execute(&mut *tx)
        .await?;

    consistency::on_revision_changed(&mut tx, revision.question_id).await?;

    tx.commit().await?;

    Ok(StatusCode::OK)
}

/// Reports an issue against a question. Blocking issues veto the
/// question's approved state until closed.
pub async fn create_issue(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<i64>,
    Json(payload): Json<CreateIssueRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let question = live_question(&pool, question_id).await?;
    let category_id = exam_category(&pool, question.exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;
    if !arena.can_access(&user, category_id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to view this question".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let issue_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO question_issues (question_id, reporter_id, body, is_blocker)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(question_id)
    .bind(claims.user_id())
    .bind(sanitize_markup(&payload.body))
    .bind(payload.is_blocker)
    .fetch_one(&mut *tx)
    .await?;

    consistency::on_revision_changed(&mut tx, question_id).await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": issue_id })),
    ))
}

/// Closes an issue (editors only) and re-settles the question's approval.
pub async fn close_issue(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(issue_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let issue = sqlx::query_as::<_, QuestionIssue>(
        r#"
        SELECT id, question_id, reporter_id, body, is_blocker, is_open, created_at
        FROM question_issues
        WHERE id = $1
        "#,
    )
    .bind(issue_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Issue not found".to_string()))?;

    if !issue.is_open {
        return Err(AppError::Conflict("Issue is already closed".to_string()));
    }

    let question = live_question(&pool, issue.question_id).await?;
    let category_id = exam_category(&pool, question.exam_id).await?;
    let (arena, user) = load_access(&pool, &claims).await?;
    if !arena.can_edit(&user, category_id) {
        return Err(AppError::Forbidden(
            "Only editors may close issues".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE question_issues SET is_open = FALSE WHERE id = $1")
        .bind(issue_id)
        .execute(&mut *tx)
        .await?;

    consistency::on_revision_changed(&mut tx, issue.question_id).await?;

    tx.commit().await?;

    Ok(StatusCode::OK)
}
