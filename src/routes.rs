// src/routes.rs

use std::sync::Arc;

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, post, put},
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, categories, questions, sessions},
    state::AppState,
    utils::jwt::{auth_middleware, superuser_middleware},
};

/// Assembles the main application router.
///
/// * Auth endpoints are rate limited (requires serving with connect info).
/// * Everything else requires a bearer token; /api/admin additionally
///   requires the superuser bit.
/// * Applies global middleware (Trace, CORS) and injects the app state.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .unwrap(),
    );

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(GovernorLayer::new(governor_conf));

    let api_routes = Router::new()
        .route("/users/me", get(auth::me))
        .route("/categories", get(categories::list_roots))
        .route("/categories/{*slugs}", get(categories::browse))
        .route("/exams/{exam_id}", get(categories::get_exam))
        .route("/exams/{exam_id}/questions", post(questions::create_question))
        .route("/exams/{exam_id}/sessions", post(sessions::create_session))
        .route("/questions/{question_id}", get(questions::get_question))
        .route(
            "/questions/{question_id}/revisions",
            post(questions::create_revision),
        )
        .route(
            "/questions/{question_id}/issues",
            post(questions::create_issue),
        )
        .route("/revisions/{revision_id}", delete(questions::delete_revision))
        .route(
            "/revisions/{revision_id}/approve",
            post(questions::approve_revision),
        )
        .route("/issues/{issue_id}/close", post(questions::close_issue))
        .route("/sessions/{session_id}", get(sessions::get_session))
        .route("/sessions/{session_id}/answers", post(sessions::submit_answer))
        .route("/sessions/{session_id}/results", get(sessions::get_results))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/{id}",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/colleges", post(admin::create_college))
        .route("/teams", get(admin::list_teams).post(admin::create_team))
        .route("/teams/{team_id}/members", post(admin::add_team_member))
        .route("/categories", post(admin::create_category))
        .route("/exams", post(admin::create_exam))
        .route("/subjects", post(admin::create_subject))
        // Double middleware protection: Auth first, then superuser check
        .layer(middleware::from_fn(superuser_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api", api_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
