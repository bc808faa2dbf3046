//! Cache keys and the mutation → invalidation table.

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Key of a cached query: the operation plus its parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub enum QueryKey {
    RecentPosts,
    PostById(String),
    /// The paginated feed. The feed controller owns the page list itself and
    /// uses this key purely as its invalidation channel.
    Posts,
    SearchPosts(String),
    CurrentUser,
    UserById(String),
    Users { limit: Option<usize> },
    UserPosts(String),
}

/// The process-wide cache all consumers share. Values are stored as JSON so
/// one cache covers every result type.
pub type LoupeCache = pantry::QueryCache<QueryKey, serde_json::Value, RemoteError>;

pub(crate) fn encode_cached<T: Serialize>(value: T) -> Result<serde_json::Value, RemoteError> {
    serde_json::to_value(value)
        .map_err(|e| RemoteError::server(format!("failed to encode cached value: {e}")))
}

// The table: which queries each mutation makes stale.

pub fn like_post_invalidates(post_id: &str) -> Vec<QueryKey> {
    vec![
        QueryKey::PostById(post_id.to_string()),
        QueryKey::RecentPosts,
        QueryKey::Posts,
        QueryKey::CurrentUser,
    ]
}

pub fn save_post_invalidates() -> Vec<QueryKey> {
    vec![QueryKey::RecentPosts, QueryKey::Posts, QueryKey::CurrentUser]
}

pub fn follow_user_invalidates(following_id: &str) -> Vec<QueryKey> {
    vec![
        QueryKey::UserById(following_id.to_string()),
        QueryKey::CurrentUser,
    ]
}

pub fn create_post_invalidates() -> Vec<QueryKey> {
    vec![QueryKey::RecentPosts]
}

pub fn update_post_invalidates(post_id: &str) -> Vec<QueryKey> {
    vec![QueryKey::PostById(post_id.to_string())]
}

pub fn delete_post_invalidates() -> Vec<QueryKey> {
    vec![QueryKey::RecentPosts, QueryKey::Posts]
}

pub fn update_user_invalidates(user_id: &str) -> Vec<QueryKey> {
    vec![
        QueryKey::UserById(user_id.to_string()),
        QueryKey::CurrentUser,
    ]
}
