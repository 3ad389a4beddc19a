// tests/api_tests.rs
//
// End-to-end tests against a live PostgreSQL. They are ignored by default;
// run them with `cargo test -- --ignored` and DATABASE_URL pointing at a
// migrated-or-empty database.

use fudul::{config::Config, routes, state::AppState, utils::hash::hash_password};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345") and a pool for
/// seeding.
async fn spawn_app() -> (String, PgPool) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (address, pool)
}

fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().to_string()[..8])
}

/// Seeds a superuser directly and returns a login token for it.
async fn superuser_token(address: &str, pool: &PgPool, client: &reqwest::Client) -> String {
    let username = unique_name("su");
    let hashed = hash_password("password123").unwrap();

    sqlx::query("INSERT INTO users (username, password, is_superuser) VALUES ($1, $2, TRUE)")
        .bind(&username)
        .bind(&hashed)
        .execute(pool)
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .expect("Login failed")
        .json::<serde_json::Value>()
        .await
        .unwrap();

    resp["token"].as_str().expect("Token not found").to_string()
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn health_check_404() {
    // Arrange
    let (address, _pool) = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn register_fails_validation() {
    let (address, _pool) = spawn_app().await;
    let client = reqwest::Client::new();

    // Username too short
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": "yo",
            "password": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn contribution_and_practice_flow() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let su_token = superuser_token(&address, &pool, &client).await;
    let auth = |token: &str| format!("Bearer {}", token);

    // 1. Superuser builds the taxonomy: college, root category, child
    //    category restricted to that college, exam.
    let college_id = client
        .post(format!("{}/api/admin/colleges", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({ "name": unique_name("College of Medicine") }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let root_slug = unique_name("uni");
    let root_id = client
        .post(format!("{}/api/admin/categories", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({ "slug": root_slug, "name": "University" }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let child_id = client
        .post(format!("{}/api/admin/categories", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({
            "parent_id": root_id,
            "slug": "com",
            "name": "College of Medicine",
            "college_limit": [college_id]
        }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let exam_id = client
        .post(format!("{}/api/admin/exams", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({ "category_id": child_id, "name": "Final 2025" }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    // 2. A member of the college registers and logs in.
    let username = unique_name("u");
    let resp = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": username,
            "password": "password123",
            "college_id": college_id
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);

    let login = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    let token = login["token"].as_str().unwrap().to_string();

    // 3. Browsing resolves the slug path; the restricted child is visible
    //    to this user.
    let browse = client
        .get(format!("{}/api/categories/{}/com", address, root_slug))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap();
    assert_eq!(browse.status().as_u16(), 200);
    let browse = browse.json::<serde_json::Value>().await.unwrap();
    assert_eq!(browse["id"].as_i64().unwrap(), child_id);
    assert_eq!(
        browse["slug_path"].as_str().unwrap(),
        format!("{}/com", root_slug)
    );

    // A bare non-root slug must not resolve.
    let bad = client
        .get(format!("{}/api/categories/com", address))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status().as_u16(), 404);

    // 4. Contribute a question with one right choice out of four.
    let created = client
        .post(format!("{}/api/exams/{}/questions", address, exam_id))
        .header("Authorization", auth(&token))
        .json(&serde_json::json!({
            "text": "Most likely diagnosis?",
            "explanation": "Classic presentation.",
            "choices": [
                { "text": "Option A", "is_right": true },
                { "text": "Option B" },
                { "text": "Option C" },
                { "text": "Option D" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status().as_u16(), 201);
    let created = created.json::<serde_json::Value>().await.unwrap();
    let question_id = created["question_id"].as_i64().unwrap();
    let revision_id = created["revision_id"].as_i64().unwrap();

    // Not approved yet, but the best revision already backs display.
    let question = client
        .get(format!("{}/api/questions/{}", address, question_id))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(question["is_approved"], false);
    assert_eq!(question["best_revision"]["id"].as_i64().unwrap(), revision_id);

    // 5. A plain contributor cannot approve; the superuser can.
    let denied = client
        .post(format!("{}/api/revisions/{}/approve", address, revision_id))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 403);

    let approved = client
        .post(format!("{}/api/revisions/{}/approve", address, revision_id))
        .header("Authorization", auth(&su_token))
        .send()
        .await
        .unwrap();
    assert_eq!(approved.status().as_u16(), 200);

    let question = client
        .get(format!("{}/api/questions/{}", address, question_id))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(question["is_approved"], true);

    let right_choice = question["best_revision"]["choices"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["is_right"] == true)
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    // 6. Practice: one-question session, answer it right, check counters.
    let session = client
        .post(format!("{}/api/exams/{}/sessions", address, exam_id))
        .header("Authorization", auth(&token))
        .json(&serde_json::json!({ "question_count": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(session.status().as_u16(), 201);
    let session = session.json::<serde_json::Value>().await.unwrap();
    let session_id = session["id"].as_i64().unwrap();
    assert_eq!(session["question_ids"].as_array().unwrap().len(), 1);

    let answer = client
        .post(format!("{}/api/sessions/{}/answers", address, session_id))
        .header("Authorization", auth(&token))
        .json(&serde_json::json!({
            "question_id": question_id,
            "choice_id": right_choice
        }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(answer["is_right"], true);

    let results = client
        .get(format!("{}/api/sessions/{}/results", address, session_id))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(results["correct_answer_count"].as_i64().unwrap(), 1);
    assert_eq!(results["incorrect_answer_count"].as_i64().unwrap(), 0);
    assert_eq!(results["skipped_answer_count"].as_i64().unwrap(), 0);
    assert_eq!(results["unused_question_count"].as_i64().unwrap(), 0);

    // 7. A later unapproved one-choice revision takes over as latest and
    //    un-approves the question.
    let stub = client
        .post(format!("{}/api/questions/{}/revisions", address, question_id))
        .header("Authorization", auth(&token))
        .json(&serde_json::json!({
            "text": "Reworded stem, still a draft",
            "choices": [{ "text": "Only option" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(stub.status().as_u16(), 201);

    let question = client
        .get(format!("{}/api/questions/{}", address, question_id))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(question["is_approved"], false);
    // Display still falls back to the approved revision.
    assert_eq!(question["best_revision"]["id"].as_i64().unwrap(), revision_id);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn college_limit_denies_outsiders() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let su_token = superuser_token(&address, &pool, &client).await;
    let auth = |token: &str| format!("Bearer {}", token);

    let college_a = client
        .post(format!("{}/api/admin/colleges", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({ "name": unique_name("CollegeA") }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let root_slug = unique_name("ksau-hs");
    let root_id = client
        .post(format!("{}/api/admin/categories", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({ "slug": root_slug, "name": "KSAU-HS" }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    client
        .post(format!("{}/api/admin/categories", address))
        .header("Authorization", auth(&su_token))
        .json(&serde_json::json!({
            "parent_id": root_id,
            "slug": "com",
            "name": "Restricted",
            "college_limit": [college_a]
        }))
        .send()
        .await
        .unwrap();

    // A user with no college is denied on the restricted child.
    let username = unique_name("u");
    client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap();
    let token = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap()["token"]
        .as_str()
        .unwrap()
        .to_string();

    let denied = client
        .get(format!("{}/api/categories/{}/com", address, root_slug))
        .header("Authorization", auth(&token))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 403);

    // The superuser sees it regardless.
    let allowed = client
        .get(format!("{}/api/categories/{}/com", address, root_slug))
        .header("Authorization", auth(&su_token))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status().as_u16(), 200);
}
