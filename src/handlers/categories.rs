// src/handlers/categories.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        category::{CategoryResponse, ChildCategory},
        exam::{Exam, Source, Subject},
    },
    services::access::{CategoryArena, UserAccess},
    utils::jwt::Claims,
};

/// Lists the root categories the current user may see, with their
/// canonical paths.
pub async fn list_roots(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let arena = CategoryArena::load(&pool).await?;
    let user = UserAccess::load(&pool, claims.user_id()).await?;

    let roots: Vec<ChildCategory> = arena
        .accessible_roots(&user)
        .into_iter()
        .map(|node| ChildCategory {
            id: node.id,
            slug: node.slug.clone(),
            name: node.name.clone(),
        })
        .collect();

    Ok(Json(roots))
}

/// Resolves a slug path like `ksau-hs/com` and returns the node with its
/// accessible children and exams.
///
/// A node with exactly one accessible child and no exams of its own gets a
/// `redirect_to` hint so clients can skip the intermediate page.
pub async fn browse(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(slugs): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let arena = CategoryArena::load(&pool).await?;
    let user = UserAccess::load(&pool, claims.user_id()).await?;

    let category = arena
        .resolve(slugs.trim_matches('/'))
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))?;

    if !arena.can_access(&user, category.id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to view this category".to_string(),
        ));
    }

    let exams = sqlx::query_as::<_, Exam>(
        "SELECT id, category_id, name FROM exams WHERE category_id = $1 ORDER BY name",
    )
    .bind(category.id)
    .fetch_all(&pool)
    .await?;

    let children = arena.accessible_children(&user, category.id);

    let redirect_to = if children.len() == 1 && exams.is_empty() {
        arena.slug_path(children[0].id)
    } else {
        None
    };

    let subcategories = children
        .into_iter()
        .map(|node| ChildCategory {
            id: node.id,
            slug: node.slug.clone(),
            name: node.name.clone(),
        })
        .collect();

    Ok(Json(CategoryResponse {
        id: category.id,
        name: category.name.clone(),
        slug_path: arena
            .slug_path(category.id)
            .unwrap_or_else(|| category.slug.clone()),
        can_edit: arena.can_edit(&user, category.id),
        subcategories,
        exams,
        redirect_to,
    }))
}

/// Exam detail: its subjects and sources, for building filtered practice
/// sessions.
pub async fn get_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = sqlx::query_as::<_, Exam>("SELECT id, category_id, name FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    let arena = CategoryArena::load(&pool).await?;
    let user = UserAccess::load(&pool, claims.user_id()).await?;
    if !arena.can_access(&user, exam.category_id) {
        return Err(AppError::Forbidden(
            "Your college is not allowed to view this exam".to_string(),
        ));
    }

    let subjects = sqlx::query_as::<_, Subject>(
        "SELECT id, exam_id, name FROM subjects WHERE exam_id = $1 ORDER BY name",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    let sources = sqlx::query_as::<_, Source>(
        "SELECT id, exam_id, name FROM sources WHERE exam_id = $1 ORDER BY name",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "exam": exam,
        "subjects": subjects,
        "sources": sources,
        "can_edit": arena.can_edit(&user, exam.category_id),
    })))
}
