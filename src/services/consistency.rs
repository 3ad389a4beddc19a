// src/services/consistency.rs
//
// Keeps a question's derived state (`is_deleted`, `is_approved`,
// `best_revision_id`, and the `is_first`/`is_last` flags on its revisions)
// in line with its revision set. Write paths call `on_revision_changed` /
// `on_choice_changed` inside the same transaction as the triggering write;
// the question row is locked for the whole read-modify-write sequence, so
// concurrent submissions to the same question serialize.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use crate::config::MIN_CHOICE_COUNT;
use crate::error::AppError;

/// The derived columns of one question row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct QuestionState {
    pub id: i64,
    pub is_deleted: bool,
    pub is_approved: bool,
    pub best_revision_id: Option<i64>,
}

/// One revision with its choice tallies, as read inside the settle
/// transaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RevisionState {
    pub id: i64,
    pub is_first: bool,
    pub is_last: bool,
    pub is_approved: bool,
    pub is_deleted: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub choice_count: i64,
    pub right_choice_count: i64,
}

/// A revision can be approved only with a full choice set and a single
/// right answer.
pub fn is_eligible(rev: &RevisionState) -> bool {
    rev.choice_count >= MIN_CHOICE_COUNT as i64 && rev.right_choice_count == 1
}

/// Flag changes for one revision row.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionFlagUpdate {
    pub id: i64,
    pub is_first: bool,
    pub is_last: bool,
}

/// The writes needed to bring a question to its fixed point. Both fields
/// carry only rows whose values actually change, so an empty plan means the
/// question is already settled.
#[derive(Debug, Default, PartialEq)]
pub struct SettlePlan {
    pub question: Option<QuestionState>,
    pub revision_flags: Vec<RevisionFlagUpdate>,
}

impl SettlePlan {
    pub fn is_empty(&self) -> bool {
        self.question.is_none() && self.revision_flags.is_empty()
    }
}

/// Computes the settle plan for a question from a snapshot of its revisions
/// and open-blocker count. Pure and deterministic: ordering ties break on
/// id, and planning an already-settled question yields an empty plan.
pub fn plan_settle(
    question: &QuestionState,
    revisions: &[RevisionState],
    open_blockers: i64,
) -> SettlePlan {
    let mut live: Vec<&RevisionState> = revisions.iter().filter(|r| !r.is_deleted).collect();
    live.sort_by_key(|r| (r.created_at, r.id));

    let first_id = live.first().map(|r| r.id);
    let last_id = live.last().map(|r| r.id);

    let mut revision_flags = Vec::new();
    for rev in revisions {
        let want_first = !rev.is_deleted && Some(rev.id) == first_id;
        let want_last = !rev.is_deleted && Some(rev.id) == last_id;
        if rev.is_first != want_first || rev.is_last != want_last {
            revision_flags.push(RevisionFlagUpdate {
                id: rev.id,
                is_first: want_first,
                is_last: want_last,
            });
        }
    }

    let desired = match live.last() {
        // No live revision left: the question is tombstoned. This is a
        // terminal, expected state, not a fault.
        None => QuestionState {
            id: question.id,
            is_deleted: true,
            is_approved: false,
            best_revision_id: None,
        },
        Some(last) => {
            // Best: latest approved eligible revision by approval date,
            // falling back to the latest live revision.
            let best = live
                .iter()
                .filter(|r| r.is_approved && is_eligible(r))
                .max_by_key(|r| (r.approved_at, r.id))
                .map(|r| r.id)
                .unwrap_or(last.id);

            let approved = last.is_approved && is_eligible(last) && open_blockers == 0;

            QuestionState {
                id: question.id,
                is_deleted: false,
                is_approved: approved,
                best_revision_id: Some(best),
            }
        }
    };

    SettlePlan {
        question: (desired != *question).then_some(desired),
        revision_flags,
    }
}

/// Recomputes the owning question's derived state after a revision was
/// created, updated, or soft-deleted. Must run inside the transaction that
/// performed the triggering write.
pub async fn on_revision_changed(
    tx: &mut Transaction<'_, Postgres>,
    question_id: i64,
) -> Result<(), AppError> {
    let question = lock_question(tx, question_id).await?;

    let revisions = sqlx::query_as::<_, RevisionState>(
        r#"
        SELECT
            r.id, r.is_first, r.is_last, r.is_approved, r.is_deleted,
            r.approved_at, r.created_at,
            COUNT(c.id) AS choice_count,
            COUNT(c.id) FILTER (WHERE c.is_right) AS right_choice_count
        FROM revisions r
        LEFT JOIN choices c ON c.revision_id = r.id
        WHERE r.question_id = $1
        GROUP BY r.id
        ORDER BY r.created_at, r.id
        "#,
    )
    .bind(question_id)
    .fetch_all(&mut **tx)
    .await?;

    let open_blockers: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM question_issues WHERE question_id = $1 AND is_open AND is_blocker",
    )
    .bind(question_id)
    .fetch_one(&mut **tx)
    .await?;

    let plan = plan_settle(&question, &revisions, open_blockers);
    apply_plan(tx, plan).await?;
    verify_single_latest(tx, question_id).await
}

/// Choice mutations settle through the owning question.
pub async fn on_choice_changed(
    tx: &mut Transaction<'_, Postgres>,
    revision_id: i64,
) -> Result<(), AppError> {
    let question_id: i64 = sqlx::query_scalar("SELECT question_id FROM revisions WHERE id = $1")
        .bind(revision_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Revision not found".to_string()))?;

    on_revision_changed(tx, question_id).await
}

/// Locks the question row for the rest of the transaction and returns its
/// current derived state.
async fn lock_question(
    tx: &mut Transaction<'_, Postgres>,
    question_id: i64,
) -> Result<QuestionState, AppError> {
    sqlx::query_as::<_, QuestionState>(
        "SELECT id, is_deleted, is_approved, best_revision_id FROM questions WHERE id = $1 FOR UPDATE",
    )
    .bind(question_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found".to_string()))
}

async fn apply_plan(tx: &mut Transaction<'_, Postgres>, plan: SettlePlan) -> Result<(), AppError> {
    for update in &plan.revision_flags {
        sqlx::query("UPDATE revisions SET is_first = $1, is_last = $2 WHERE id = $3")
            .bind(update.is_first)
            .bind(update.is_last)
            .bind(update.id)
            .execute(&mut **tx)
            .await?;
    }

    if let Some(q) = &plan.question {
        if q.is_deleted {
            tracing::info!("Question {} has no live revisions left, tombstoning", q.id);
        }
        sqlx::query(
            "UPDATE questions SET is_deleted = $1, is_approved = $2, best_revision_id = $3 WHERE id = $4",
        )
        .bind(q.is_deleted)
        .bind(q.is_approved)
        .bind(q.best_revision_id)
        .bind(q.id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Post-settle invariant check: a question with live revisions has exactly
/// one `is_last`, a tombstoned one has none. A breach aborts the
/// transaction; it indicates a locking or recomputation defect.
async fn verify_single_latest(
    tx: &mut Transaction<'_, Postgres>,
    question_id: i64,
) -> Result<(), AppError> {
    let (live, latest): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE NOT is_deleted),
            COUNT(*) FILTER (WHERE NOT is_deleted AND is_last)
        FROM revisions
        WHERE question_id = $1
        "#,
    )
    .bind(question_id)
    .fetch_one(&mut **tx)
    .await?;

    let expected = if live > 0 { 1 } else { 0 };
    if latest != expected {
        return Err(AppError::Consistency(format!(
            "question {}: {} live revisions but {} marked latest",
            question_id, live, latest
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, n, 12, 0, 0).unwrap()
    }

    fn rev(id: i64, created: u32, approved: bool, choices: i64, rights: i64) -> RevisionState {
        RevisionState {
            id,
            is_first: false,
            is_last: false,
            is_approved: approved,
            is_deleted: false,
            approved_at: approved.then(|| day(created)),
            created_at: day(created),
            choice_count: choices,
            right_choice_count: rights,
        }
    }

    fn question(id: i64) -> QuestionState {
        QuestionState {
            id,
            is_deleted: false,
            is_approved: false,
            best_revision_id: None,
        }
    }

    /// Applies a plan to the in-memory snapshot, mirroring what the UPDATE
    /// statements do. Used to assert the fixed point.
    fn apply_in_memory(
        question: &mut QuestionState,
        revisions: &mut [RevisionState],
        plan: &SettlePlan,
    ) {
        if let Some(q) = &plan.question {
            *question = q.clone();
        }
        for update in &plan.revision_flags {
            let rev = revisions.iter_mut().find(|r| r.id == update.id).unwrap();
            rev.is_first = update.is_first;
            rev.is_last = update.is_last;
        }
    }

    #[test]
    fn exactly_one_latest_among_live_revisions() {
        let q = question(1);
        let revisions = vec![
            rev(10, 1, true, 4, 1),
            rev(11, 2, false, 4, 1),
            rev(12, 3, false, 4, 1),
        ];

        let plan = plan_settle(&q, &revisions, 0);

        let latest: Vec<i64> = plan
            .revision_flags
            .iter()
            .filter(|u| u.is_last)
            .map(|u| u.id)
            .collect();
        assert_eq!(latest, vec![12]);

        let first: Vec<i64> = plan
            .revision_flags
            .iter()
            .filter(|u| u.is_first)
            .map(|u| u.id)
            .collect();
        assert_eq!(first, vec![10]);
    }

    #[test]
    fn deleting_every_revision_tombstones_the_question() {
        let q = question(1);
        let mut revisions = vec![rev(10, 1, true, 4, 1)];
        revisions[0].is_deleted = true;
        revisions[0].is_last = true;

        let plan = plan_settle(&q, &revisions, 0);

        let settled = plan.question.expect("question state must change");
        assert!(settled.is_deleted);
        assert!(!settled.is_approved);
        assert_eq!(settled.best_revision_id, None);
        // The stale is_last on the deleted revision is cleared.
        assert_eq!(
            plan.revision_flags,
            vec![RevisionFlagUpdate {
                id: 10,
                is_first: false,
                is_last: false
            }]
        );
    }

    #[test]
    fn settling_twice_plans_no_further_writes() {
        let mut q = question(1);
        let mut revisions = vec![
            rev(10, 1, true, 4, 1),
            rev(11, 2, false, 1, 0),
            rev(12, 3, false, 5, 1),
        ];

        let plan = plan_settle(&q, &revisions, 0);
        assert!(!plan.is_empty());
        apply_in_memory(&mut q, &mut revisions, &plan);

        let second = plan_settle(&q, &revisions, 0);
        assert!(second.is_empty(), "fixed point must plan zero writes");
    }

    #[test]
    fn unapproved_latest_revision_blocks_question_approval() {
        // R1 submitted day 1 and approved; R2 submitted day 2, not
        // approved, only one choice. R2 becomes latest and the question is
        // not approved even though R1 was.
        let q = question(1);
        let r1 = rev(10, 1, true, 4, 1);
        let mut r2 = rev(11, 2, false, 1, 0);
        r2.approved_at = None;

        let plan = plan_settle(&q, &[r1, r2], 0);

        let last: Vec<i64> = plan
            .revision_flags
            .iter()
            .filter(|u| u.is_last)
            .map(|u| u.id)
            .collect();
        assert_eq!(last, vec![11]);

        let settled = plan.question.expect("question state must change");
        assert!(!settled.is_approved);
        // The approved eligible R1 still backs display.
        assert_eq!(settled.best_revision_id, Some(10));
    }

    #[test]
    fn approved_eligible_latest_revision_approves_question() {
        let q = question(1);
        let plan = plan_settle(&q, &[rev(10, 1, true, 4, 1), rev(11, 2, true, 4, 1)], 0);

        let settled = plan.question.expect("question state must change");
        assert!(settled.is_approved);
        // Latest approval date wins the best pick.
        assert_eq!(settled.best_revision_id, Some(11));
    }

    #[test]
    fn open_blocking_issue_vetoes_approval() {
        let q = question(1);
        let revisions = vec![rev(10, 1, true, 4, 1)];

        let blocked = plan_settle(&q, &revisions, 1);
        assert!(!blocked.question.as_ref().unwrap().is_approved);

        let clear = plan_settle(&q, &revisions, 0);
        assert!(clear.question.as_ref().unwrap().is_approved);
    }

    #[test]
    fn best_falls_back_to_latest_when_nothing_is_approved() {
        let q = question(1);
        let plan = plan_settle(&q, &[rev(10, 1, false, 4, 1), rev(11, 2, false, 4, 1)], 0);

        let settled = plan.question.expect("question state must change");
        assert!(!settled.is_approved);
        assert_eq!(settled.best_revision_id, Some(11));
    }

    #[test]
    fn two_right_answers_are_not_eligible() {
        let mut r = rev(10, 1, true, 4, 2);
        assert!(!is_eligible(&r));
        r.right_choice_count = 1;
        assert!(is_eligible(&r));
        r.choice_count = 1;
        assert!(!is_eligible(&r));
    }

    #[test]
    fn creation_order_ties_break_on_id() {
        let q = question(1);
        // Same timestamp; higher id is the later submission.
        let plan = plan_settle(&q, &[rev(10, 1, false, 2, 1), rev(11, 1, false, 2, 1)], 0);

        let last: Vec<i64> = plan
            .revision_flags
            .iter()
            .filter(|u| u.is_last)
            .map(|u| u.id)
            .collect();
        assert_eq!(last, vec![11]);
    }
}
