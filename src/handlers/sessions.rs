// src/handlers/sessions.rs
//
// Practice sessions: draw a question set from an exam, collect answers,
// report counters. The scoring service settles counters and first-attempt
// flags inside every answer transaction.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    config::{DEFAULT_SESSION_QUESTIONS, MAX_SESSION_QUESTIONS},
    error::AppError,
    models::session::{
        CreateSessionRequest, Session, SessionResponse, SessionResults, SubmitAnswerRequest,
    },
    services::{
        access::{CategoryArena, UserAccess},
        scoring,
    },
    utils::jwt::Claims,
};

/// Fetches a session owned by the current user, or 404/403.
async fn owned_session(
    pool: &PgPool,
    session_id: i64,
    claims: &Claims,
) -> Result<Session, AppError> {
    let session = sqlx::query_as::<_, Session>(
        r#"
        SELECT id, submitter_id, exam_id, correct_answer_count, incorrect_answer_count,
               skipped_answer_count, unused_question_count, created_at
        FROM sessions
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

    if session.submitter_id != claims.user_id() && !claims.su {
        return Err(AppError::Forbidden("Not your session".to_string()));
    }
    Ok(session)
}

async fn assigned_question_ids(pool: &PgPool, session_id: i64) -> Result<Vec<i64>, AppError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT question_id FROM session_questions WHERE session_id = $1 ORDER BY question_id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Opens a session on an exam: draws random approved questions (optionally
/// restricted by subject) and initializes the counters.
pub async fn create_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let category_id: i64 = sqlx::query_scalar("SELECT category_id FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    let arena = CategoryArena::load(&pool).await?;
    let user = UserAccess::load(&pool, claims.user_id()).await?;
    if !arena.can_access(&user, category_id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to practice this exam".to_string(),
        ));
    }

    let count = payload
        .question_count
        .unwrap_or(DEFAULT_SESSION_QUESTIONS)
        .min(MAX_SESSION_QUESTIONS);

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT id FROM questions WHERE exam_id = ",
    );
    builder.push_bind(exam_id);
    builder.push(" AND is_approved AND NOT is_deleted");
    if let Some(subject_ids) = payload.subject_ids.as_ref().filter(|ids| !ids.is_empty()) {
        builder.push(" AND subject_id IN (");
        let mut separated = builder.separated(",");
        for subject_id in subject_ids {
            separated.push_bind(*subject_id);
        }
        separated.push_unseparated(")");
    }
    builder.push(" ORDER BY RANDOM() LIMIT ");
    builder.push_bind(count);

    let question_ids: Vec<i64> = builder
        .build_query_scalar()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to draw session questions: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if question_ids.is_empty() {
        return Err(AppError::BadRequest(
            "No approved questions match the requested filters".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let session_id: i64 = sqlx::query_scalar(
        "INSERT INTO sessions (submitter_id, exam_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(claims.user_id())
    .bind(exam_id)
    .fetch_one(&mut *tx)
    .await?;

    for question_id in &question_ids {
        sqlx::query("INSERT INTO session_questions (session_id, question_id) VALUES ($1, $2)")
            .bind(session_id)
            .bind(question_id)
            .execute(&mut *tx)
            .await?;
    }

    // Settle the counters from the rows just written (everything starts
    // unused).
    scoring::on_answer_changed(&mut tx, session_id).await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            id: session_id,
            exam_id,
            question_ids,
        }),
    ))
}

/// Returns a session with its assigned question ids.
pub async fn get_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = owned_session(&pool, session_id, &claims).await?;
    let question_ids = assigned_question_ids(&pool, session_id).await?;

    Ok(Json(SessionResponse {
        id: session.id,
        exam_id: session.exam_id,
        question_ids,
    }))
}

/// Records (or overwrites) one answer in a session. A null choice records
/// a skip. Counters and the cross-session first-attempt flag settle in the
/// same transaction.
pub async fn submit_answer(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = owned_session(&pool, session_id, &claims).await?;

    sqlx::query("SELECT 1 FROM session_questions WHERE session_id = $1 AND question_id = $2")
        .bind(session_id)
        .bind(payload.question_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| {
            AppError::BadRequest("Question is not part of this session".to_string())
        })?;

    // A submitted choice must belong to the question being answered.
    let is_right = match payload.choice_id {
        Some(choice_id) => {
            let right: Option<(bool,)> = sqlx::query_as(
                r#"
                SELECT c.is_right
                FROM choices c
                JOIN revisions r ON r.id = c.revision_id
                WHERE c.id = $1 AND r.question_id = $2
                "#,
            )
            .bind(choice_id)
            .bind(payload.question_id)
            .fetch_optional(&pool)
            .await?;

            Some(
                right
                    .ok_or_else(|| {
                        AppError::BadRequest("Choice does not belong to question".to_string())
                    })?
                    .0,
            )
        }
        None => None,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO answers (session_id, question_id, choice_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (session_id, question_id)
        DO UPDATE SET choice_id = EXCLUDED.choice_id
        "#,
    )
    .bind(session_id)
    .bind(payload.question_id)
    .bind(payload.choice_id)
    .execute(&mut *tx)
    .await?;

    scoring::on_answer_changed(&mut tx, session_id).await?;
    scoring::mark_first_attempt(&mut tx, session.submitter_id, payload.question_id).await?;

    tx.commit().await?;

    Ok(Json(serde_json::json!({ "is_right": is_right })))
}

/// Returns the settled counters for a session.
pub async fn get_results(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = owned_session(&pool, session_id, &claims).await?;

    let total_questions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM session_questions WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&pool)
            .await?;

    Ok(Json(SessionResults {
        correct_answer_count: session.correct_answer_count,
        incorrect_answer_count: session.incorrect_answer_count,
        skipped_answer_count: session.skipped_answer_count,
        unused_question_count: session.unused_question_count,
        total_questions,
    }))
}
