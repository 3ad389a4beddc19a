// src/handlers/admin.rs
//
// Superuser administration: accounts, colleges, teams, and the category /
// exam taxonomy. All routes here sit behind the superuser middleware.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        category::CreateCategoryRequest,
        exam::{CreateExamRequest, CreateSubjectRequest},
        team::{AddTeamMemberRequest, CreateTeamRequest, Team},
        user::User,
    },
    utils::{hash::hash_password, jwt::Claims},
};

/// Lists all users in the system.
pub async fn list_users(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, college_id, is_superuser, created_at
        FROM users
        ORDER BY id DESC
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(users))
}

/// DTO for a superuser creating a user directly.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminCreateUserRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(length(min = 4, max = 128))]
    pub password: String,
    pub college_id: Option<i64>,
    #[serde(default)]
    pub is_superuser: bool,
}

pub async fn create_user(
    State(pool): State<PgPool>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO users (username, password, college_id, is_superuser)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(&payload.username)
    .bind(&hashed_password)
    .bind(payload.college_id)
    .bind(payload.is_superuser)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict(format!("Username '{}' already exists", payload.username))
        } else {
            tracing::error!("Failed to create user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({"id": id}))))
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub username: Option<String>,
    pub college_id: Option<i64>,
    pub is_superuser: Option<bool>,
    pub password: Option<String>,
}

pub async fn update_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query("SELECT id FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if let Some(new_username) = payload.username {
        sqlx::query("UPDATE users SET username = $1 WHERE id = $2")
            .bind(new_username)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(college_id) = payload.college_id {
        sqlx::query("UPDATE users SET college_id = $1 WHERE id = $2")
            .bind(college_id)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(is_superuser) = payload.is_superuser {
        sqlx::query("UPDATE users SET is_superuser = $1 WHERE id = $2")
            .bind(is_superuser)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(new_password) = payload.password {
        let hashed = hash_password(&new_password)?;
        sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
            .bind(hashed)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    Ok(StatusCode::OK)
}

/// Deletes a user by ID. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id() {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// DTO for creating a college.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCollegeRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

pub async fn create_college(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateCollegeRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let id: i64 = sqlx::query_scalar("INSERT INTO colleges (name) VALUES ($1) RETURNING id")
        .bind(&payload.name)
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
                AppError::Conflict(format!("College '{}' already exists", payload.name))
            } else {
                AppError::from(e)
            }
        })?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({"id": id}))))
}

pub async fn list_teams(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let teams = sqlx::query_as::<_, Team>("SELECT id, name FROM teams ORDER BY name")
        .fetch_all(&pool)
        .await?;

    Ok(Json(teams))
}

pub async fn create_team(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateTeamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let id: i64 = sqlx::query_scalar("INSERT INTO teams (name) VALUES ($1) RETURNING id")
        .bind(&payload.name)
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
                AppError::Conflict(format!("Team '{}' already exists", payload.name))
            } else {
                AppError::from(e)
            }
        })?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({"id": id}))))
}

pub async fn add_team_member(
    State(pool): State<PgPool>,
    Path(team_id): Path<i64>,
    Json(payload): Json<AddTeamMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query("SELECT id FROM teams WHERE id = $1")
        .bind(team_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Team not found".to_string()))?;

    sqlx::query("SELECT id FROM users WHERE id = $1")
        .bind(payload.user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO team_members (team_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(team_id)
    .bind(payload.user_id)
    .execute(&pool)
    .await?;

    Ok(StatusCode::CREATED)
}

/// Creates a category node with its optional college restriction.
pub async fn create_category(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if let Some(parent_id) = payload.parent_id {
        sqlx::query("SELECT id FROM categories WHERE id = $1")
            .bind(parent_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Parent category not found".to_string()))?;
    }

    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO categories (parent_id, slug, name, team_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(payload.parent_id)
    .bind(&payload.slug)
    .bind(&payload.name)
    .bind(payload.team_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique") || e.to_string().contains("23505") {
            AppError::Conflict(format!(
                "Slug '{}' is already used by a sibling category",
                payload.slug
            ))
        } else {
            AppError::from(e)
        }
    })?;

    for college_id in &payload.college_limit {
        sqlx::query(
            "INSERT INTO category_college_limits (category_id, college_id) VALUES ($1, $2)",
        )
        .bind(id)
        .bind(college_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({"id": id}))))
}

pub async fn create_exam(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    sqlx::query("SELECT id FROM categories WHERE id = $1")
        .bind(payload.category_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))?;

    let id: i64 =
        sqlx::query_scalar("INSERT INTO exams (category_id, name) VALUES ($1, $2) RETURNING id")
            .bind(payload.category_id)
            .bind(&payload.name)
            .fetch_one(&pool)
            .await?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({"id": id}))))
}

pub async fn create_subject(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateSubjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    sqlx::query("SELECT id FROM exams WHERE id = $1")
        .bind(payload.exam_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    let id: i64 =
        sqlx::query_scalar("INSERT INTO subjects (exam_id, name) VALUES ($1, $2) RETURNING id")
            .bind(payload.exam_id)
            .bind(&payload.name)
            .fetch_one(&pool)
            .await?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({"id": id}))))
}
