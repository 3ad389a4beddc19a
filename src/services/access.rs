// src/services/access.rs
//
// Resolves hierarchical slug paths to category nodes and answers
// view/edit-permission questions against the node and its ancestors. The
// tree is loaded into an arena keyed by id with parent links as optional
// ids; all walks are iterative and cycle-guarded.

use std::collections::{HashMap, HashSet};

use sqlx::PgPool;

use crate::error::AppError;

/// One category node in the arena.
#[derive(Debug, Clone)]
pub struct CategoryNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub slug: String,
    pub name: String,
    pub team_id: Option<i64>,
    /// Colleges allowed to see this subtree; empty means unrestricted at
    /// this node.
    pub college_limit: Vec<i64>,
}

/// What the resolver needs to know about the requesting user.
#[derive(Debug, Clone)]
pub struct UserAccess {
    pub user_id: i64,
    pub is_superuser: bool,
    pub college_id: Option<i64>,
    pub team_ids: HashSet<i64>,
}

impl UserAccess {
    /// Loads the user's authority from the store. Team memberships and
    /// college are read fresh per request rather than trusted from the
    /// token.
    pub async fn load(pool: &PgPool, user_id: i64) -> Result<Self, AppError> {
        let row: Option<(bool, Option<i64>)> =
            sqlx::query_as("SELECT is_superuser, college_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
        let (is_superuser, college_id) =
            row.ok_or_else(|| AppError::AuthError("Unknown user".to_string()))?;

        let teams: Vec<(i64,)> =
            sqlx::query_as("SELECT team_id FROM team_members WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(pool)
                .await?;

        Ok(Self {
            user_id,
            is_superuser,
            college_id,
            team_ids: teams.into_iter().map(|(id,)| id).collect(),
        })
    }
}

/// The whole category tree, loaded once per request that needs it.
#[derive(Debug, Default)]
pub struct CategoryArena {
    nodes: HashMap<i64, CategoryNode>,
    children: HashMap<Option<i64>, Vec<i64>>,
}

impl CategoryArena {
    pub fn from_nodes(nodes: Vec<CategoryNode>) -> Self {
        let mut arena = Self::default();
        for node in nodes {
            arena.children.entry(node.parent_id).or_default().push(node.id);
            arena.nodes.insert(node.id, node);
        }
        // Deterministic listing order.
        for ids in arena.children.values_mut() {
            ids.sort();
        }
        arena
    }

    pub async fn load(pool: &PgPool) -> Result<Self, AppError> {
        let rows: Vec<(i64, Option<i64>, String, String, Option<i64>)> =
            sqlx::query_as("SELECT id, parent_id, slug, name, team_id FROM categories")
                .fetch_all(pool)
                .await?;

        let limits: Vec<(i64, i64)> =
            sqlx::query_as("SELECT category_id, college_id FROM category_college_limits")
                .fetch_all(pool)
                .await?;

        let mut limit_map: HashMap<i64, Vec<i64>> = HashMap::new();
        for (category_id, college_id) in limits {
            limit_map.entry(category_id).or_default().push(college_id);
        }

        let nodes = rows
            .into_iter()
            .map(|(id, parent_id, slug, name, team_id)| CategoryNode {
                id,
                parent_id,
                slug,
                name,
                team_id,
                college_limit: limit_map.remove(&id).unwrap_or_default(),
            })
            .collect();

        Ok(Self::from_nodes(nodes))
    }

    pub fn get(&self, id: i64) -> Option<&CategoryNode> {
        self.nodes.get(&id)
    }

    pub fn children_of(&self, parent: Option<i64>) -> impl Iterator<Item = &CategoryNode> {
        self.children
            .get(&parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Resolves a `/`-separated slug path anchored at a root category.
    /// Ambiguous or malformed paths (empty segments, chains that do not
    /// start at a true root, unknown slugs) are not-found, never errors.
    pub fn resolve(&self, slug_path: &str) -> Option<&CategoryNode> {
        let mut segments = slug_path.split('/');
        let root_slug = segments.next()?;
        if root_slug.is_empty() {
            return None;
        }

        let mut current = self
            .children_of(None)
            .find(|node| node.slug == root_slug)?;

        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            current = self
                .children_of(Some(current.id))
                .find(|node| node.slug == segment)?;
        }

        Some(current)
    }

    /// The node and every ancestor up to the root, leaf first. Stops (and
    /// returns None) if the parent chain is cyclic or dangling.
    fn chain(&self, id: i64) -> Option<Vec<&CategoryNode>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                tracing::error!("Category {} has a cyclic parent chain", current);
                return None;
            }
            let node = self.nodes.get(&current)?;
            chain.push(node);
            cursor = node.parent_id;
        }

        Some(chain)
    }

    /// Canonical slash-joined path from root to the node; the inverse of
    /// `resolve`.
    pub fn slug_path(&self, id: i64) -> Option<String> {
        let chain = self.chain(id)?;
        let mut slugs: Vec<&str> = chain.iter().map(|node| node.slug.as_str()).collect();
        slugs.reverse();
        Some(slugs.join("/"))
    }

    /// A superuser may view anything. Anyone else must pass every college
    /// restriction on the node and its ancestors; a user without a known
    /// college fails wherever a restriction applies.
    pub fn can_access(&self, user: &UserAccess, id: i64) -> bool {
        if user.is_superuser {
            return true;
        }
        let Some(chain) = self.chain(id) else {
            return false;
        };
        chain.iter().all(|node| {
            node.college_limit.is_empty()
                || user
                    .college_id
                    .is_some_and(|college| node.college_limit.contains(&college))
        })
    }

    /// A superuser may edit anything; otherwise edit rights come from a
    /// team attached to the node or any ancestor.
    pub fn can_edit(&self, user: &UserAccess, id: i64) -> bool {
        if user.is_superuser {
            return true;
        }
        let Some(chain) = self.chain(id) else {
            return false;
        };
        chain.iter().any(|node| {
            node.team_id
                .is_some_and(|team| user.team_ids.contains(&team))
        })
    }

    /// Children of the node the user may view. Feeds the auto-descend
    /// redirect decision made by the browse handler.
    pub fn accessible_children(&self, user: &UserAccess, id: i64) -> Vec<&CategoryNode> {
        self.children_of(Some(id))
            .filter(|child| self.can_access(user, child.id))
            .collect()
    }

    /// Root categories the user may view.
    pub fn accessible_roots(&self, user: &UserAccess) -> Vec<&CategoryNode> {
        self.children_of(None)
            .filter(|root| self.can_access(user, root.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent_id: Option<i64>, slug: &str) -> CategoryNode {
        CategoryNode {
            id,
            parent_id,
            slug: slug.to_string(),
            name: slug.to_uppercase(),
            team_id: None,
            college_limit: Vec::new(),
        }
    }

    fn user(college_id: Option<i64>) -> UserAccess {
        UserAccess {
            user_id: 7,
            is_superuser: false,
            college_id,
            team_ids: HashSet::new(),
        }
    }

    /// ksau-hs (root) -> com -> med, plus an unrelated root.
    fn arena() -> CategoryArena {
        CategoryArena::from_nodes(vec![
            node(1, None, "ksau-hs"),
            node(2, Some(1), "com"),
            node(3, Some(2), "med"),
            node(4, None, "other-uni"),
        ])
    }

    #[test]
    fn resolves_full_paths_from_the_root() {
        let arena = arena();
        assert_eq!(arena.resolve("ksau-hs").unwrap().id, 1);
        assert_eq!(arena.resolve("ksau-hs/com").unwrap().id, 2);
        assert_eq!(arena.resolve("ksau-hs/com/med").unwrap().id, 3);
    }

    #[test]
    fn partial_or_malformed_paths_are_not_found() {
        let arena = arena();
        // "com" is real but not a root, so the bare slug must not resolve.
        assert!(arena.resolve("com").is_none());
        assert!(arena.resolve("ksau-hs/med").is_none());
        assert!(arena.resolve("ksau-hs//com").is_none());
        assert!(arena.resolve("").is_none());
    }

    #[test]
    fn slug_path_is_the_inverse_of_resolve() {
        let arena = arena();
        let id = arena.resolve("ksau-hs/com/med").unwrap().id;
        assert_eq!(arena.slug_path(id).unwrap(), "ksau-hs/com/med");
    }

    #[test]
    fn college_limit_applies_to_the_whole_subtree() {
        let mut nodes = vec![node(1, None, "ksau-hs"), node(2, Some(1), "com")];
        nodes[1].college_limit = vec![10]; // CollegeA only
        let arena = CategoryArena::from_nodes(nodes);

        // CollegeB is turned away, CollegeA gets in.
        assert!(!arena.can_access(&user(Some(20)), 2));
        assert!(arena.can_access(&user(Some(10)), 2));
        // No known college: denied wherever a limit applies.
        assert!(!arena.can_access(&user(None), 2));
        // The unrestricted parent stays open.
        assert!(arena.can_access(&user(Some(20)), 1));
    }

    #[test]
    fn ancestor_limit_restricts_descendants() {
        let mut nodes = vec![node(1, None, "ksau-hs"), node(2, Some(1), "com")];
        nodes[0].college_limit = vec![10];
        let arena = CategoryArena::from_nodes(nodes);

        assert!(!arena.can_access(&user(Some(20)), 2));
        assert!(arena.can_access(&user(Some(10)), 2));
    }

    #[test]
    fn superuser_bypasses_every_restriction() {
        let mut nodes = vec![node(1, None, "ksau-hs")];
        nodes[0].college_limit = vec![10];
        let arena = CategoryArena::from_nodes(nodes);

        let su = UserAccess {
            user_id: 1,
            is_superuser: true,
            college_id: None,
            team_ids: HashSet::new(),
        };
        assert!(arena.can_access(&su, 1));
        assert!(arena.can_edit(&su, 1));
    }

    #[test]
    fn team_on_an_ancestor_grants_edit() {
        let mut nodes = vec![node(1, None, "ksau-hs"), node(2, Some(1), "com")];
        nodes[0].team_id = Some(5);
        let arena = CategoryArena::from_nodes(nodes);

        let mut editor = user(Some(10));
        editor.team_ids.insert(5);
        assert!(arena.can_edit(&editor, 2));

        let outsider = user(Some(10));
        assert!(!arena.can_edit(&outsider, 2));
    }

    #[test]
    fn accessible_children_feed_auto_descend() {
        let mut nodes = vec![
            node(1, None, "ksau-hs"),
            node(2, Some(1), "com"),
            node(3, Some(1), "con"),
        ];
        nodes[2].college_limit = vec![10];
        let arena = CategoryArena::from_nodes(nodes);

        // CollegeB sees a single child: the browse layer may auto-descend.
        let children = arena.accessible_children(&user(Some(20)), 1);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, 2);

        let children = arena.accessible_children(&user(Some(10)), 1);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn cyclic_parent_chains_deny_rather_than_hang() {
        let arena = CategoryArena::from_nodes(vec![
            node(1, Some(2), "a"),
            node(2, Some(1), "b"),
        ]);
        assert!(!arena.can_access(&user(Some(10)), 1));
        assert!(arena.slug_path(1).is_none());
    }
}
