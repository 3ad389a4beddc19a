// src/services/scoring.rs
//
// Maintains a session's counters whenever one of its answers changes, and
// the cross-session `is_first` flag on answers. Counters are always
// re-derived from current rows inside the caller's transaction; a settle
// replay after a crash converges to the same values.

use sqlx::{Postgres, Transaction};

use crate::error::AppError;

/// One answer row joined with its chosen choice (if any).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnswerState {
    pub id: i64,
    pub choice_id: Option<i64>,
    /// NULL when the answer is a skip.
    pub is_right: Option<bool>,
}

/// The four derived counters of a session.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionCounters {
    pub correct_answer_count: i64,
    pub incorrect_answer_count: i64,
    pub skipped_answer_count: i64,
    pub unused_question_count: i64,
}

/// Tallies the counters from scratch. `assigned_count` is the number of
/// questions selected into the session; every assigned question is exactly
/// one of correct, incorrect, skipped, or unused.
pub fn tally(assigned_count: i64, answers: &[AnswerState]) -> SessionCounters {
    let mut counters = SessionCounters {
        correct_answer_count: 0,
        incorrect_answer_count: 0,
        skipped_answer_count: 0,
        unused_question_count: assigned_count - answers.len() as i64,
    };

    for answer in answers {
        match (answer.choice_id, answer.is_right) {
            (None, _) => counters.skipped_answer_count += 1,
            (Some(_), Some(true)) => counters.correct_answer_count += 1,
            (Some(_), _) => counters.incorrect_answer_count += 1,
        }
    }

    counters
}

/// Re-derives and stores the owning session's counters. Locks the session
/// row so concurrent submissions to the same session serialize.
pub async fn on_answer_changed(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
) -> Result<(), AppError> {
    let current = sqlx::query_as::<_, SessionCounters>(
        r#"
        SELECT correct_answer_count, incorrect_answer_count,
               skipped_answer_count, unused_question_count
        FROM sessions
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(session_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

    let assigned: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM session_questions WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&mut **tx)
            .await?;

    let answers = sqlx::query_as::<_, AnswerState>(
        r#"
        SELECT a.id, a.choice_id, c.is_right
        FROM answers a
        LEFT JOIN choices c ON c.id = a.choice_id
        WHERE a.session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_all(&mut **tx)
    .await?;

    let counters = tally(assigned, &answers);
    if counters != current {
        sqlx::query(
            r#"
            UPDATE sessions
            SET correct_answer_count = $1, incorrect_answer_count = $2,
                skipped_answer_count = $3, unused_question_count = $4
            WHERE id = $5
            "#,
        )
        .bind(counters.correct_answer_count)
        .bind(counters.incorrect_answer_count)
        .bind(counters.skipped_answer_count)
        .bind(counters.unused_question_count)
        .bind(session_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// One attempt at a question by one user, across sessions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttemptState {
    pub id: i64,
    pub is_first: bool,
    pub has_choice: bool,
}

/// Plans `is_first` flags over a user's attempts at one question, ordered
/// by submission. The earliest attempt with a real choice carries the flag;
/// skips never do. Returns only the rows whose flag changes.
pub fn plan_first_attempt(attempts: &[AttemptState]) -> Vec<(i64, bool)> {
    let first_id = attempts.iter().find(|a| a.has_choice).map(|a| a.id);

    attempts
        .iter()
        .filter_map(|a| {
            let want = Some(a.id) == first_id;
            (a.is_first != want).then_some((a.id, want))
        })
        .collect()
}

/// Settles the `is_first` flag for a (user, question) pair. Diff-only
/// writes keep this a fixed point; it never re-triggers counter
/// recomputation.
pub async fn mark_first_attempt(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    question_id: i64,
) -> Result<(), AppError> {
    let attempts = sqlx::query_as::<_, AttemptState>(
        r#"
        SELECT a.id, a.is_first, a.choice_id IS NOT NULL AS has_choice
        FROM answers a
        JOIN sessions s ON s.id = a.session_id
        WHERE s.submitter_id = $1 AND a.question_id = $2
        ORDER BY a.created_at, a.id
        "#,
    )
    .bind(user_id)
    .bind(question_id)
    .fetch_all(&mut **tx)
    .await?;

    for (answer_id, is_first) in plan_first_attempt(&attempts) {
        sqlx::query("UPDATE answers SET is_first = $1 WHERE id = $2")
            .bind(is_first)
            .bind(answer_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}
