//! Domain documents as they live in the store, plus the payload types the UI
//! hands to the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection names in the document store.
pub mod collections {
    pub const POSTS: &str = "posts";
    pub const USERS: &str = "users";
    pub const SAVES: &str = "saves";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    /// Id of the user that created the post.
    pub creator: String,
    pub caption: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_url: String,
    pub image_id: String,
    /// Ids of the users that liked the post, in like order.
    #[serde(default)]
    pub likes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Id of the auth account this user document belongs to.
    pub account_id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub bio: String,
    pub image_url: String,
    #[serde(default)]
    pub image_id: String,
    /// Ids of the user's posts.
    #[serde(default)]
    pub posts: Vec<String>,
    /// Ids of the users following this user.
    #[serde(default)]
    pub follower: Vec<String>,
    /// Ids of the users this user follows.
    #[serde(default)]
    pub following: Vec<String>,
    /// Ids of this user's save records.
    #[serde(default)]
    pub saves: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Join entity created when a user saves a post and deleted on unsave.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    pub id: String,
    pub user: String,
    pub post: String,
}

/// One result set from the store's list endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct DocumentPage<T> {
    pub total: usize,
    pub documents: Vec<T>,
}

/// A file picked in the UI, handed over as raw bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Reference to an uploaded file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct FileRef {
    pub id: String,
}

/// An auth account (not the user document).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A session created by the backend; the secret authorizes later requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct BackendSession {
    pub id: String,
    pub secret: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub creator: String,
    pub caption: String,
    pub location: String,
    /// Comma-separated tag string as typed in the form.
    pub tags: String,
    pub file: NewFile,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePost {
    pub post_id: String,
    pub caption: String,
    pub location: String,
    pub tags: String,
    /// The post's current image, kept when no new file is supplied.
    pub image_url: String,
    pub image_id: String,
    pub file: Option<NewFile>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub user_id: String,
    pub name: String,
    pub username: String,
    pub bio: String,
    pub image_url: String,
    pub image_id: String,
    pub file: Option<NewFile>,
}
