use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'teams' table. A team attached to a category grants its
/// members edit rights over that category's subtree.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
}

/// DTO for creating a team.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

/// DTO for adding a member to a team.
#[derive(Debug, Deserialize)]
pub struct AddTeamMemberRequest {
    pub user_id: i64,
}
