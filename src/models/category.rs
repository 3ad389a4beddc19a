// src/models/category.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'categories' table: a self-referential tree node.
/// Slugs are unique among siblings; `team_id` grants edit rights over the
/// subtree; college limits live in `category_college_limits`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub slug: String,
    pub name: String,
    pub team_id: Option<i64>,
}

/// DTO for creating a category node.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCategoryRequest {
    pub parent_id: Option<i64>,
    #[validate(length(min = 1, max = 50), custom(function = validate_slug))]
    pub slug: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub team_id: Option<i64>,
    /// Colleges allowed to see this subtree. Empty means unrestricted.
    #[serde(default)]
    pub college_limit: Vec<i64>,
}

/// Slugs appear in URL paths, so they must not contain separators or
/// whitespace.
fn validate_slug(slug: &str) -> Result<(), validator::ValidationError> {
    let ok = slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        return Err(validator::ValidationError::new("invalid_slug"));
    }
    Ok(())
}

/// A child node in a category listing.
#[derive(Debug, Serialize)]
pub struct ChildCategory {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

/// Full browse payload for one category node.
#[derive(Debug, Serialize)]
pub struct CategoryResponse {
    pub id: i64,
    pub name: String,
    pub slug_path: String,
    pub can_edit: bool,
    pub subcategories: Vec<ChildCategory>,
    pub exams: Vec<crate::models::exam::Exam>,
    /// Set when the node has exactly one accessible child and no exams of
    /// its own; clients are expected to navigate there directly.
    pub redirect_to: Option<String>,
}
