//! One function per domain operation, translating it into document-store
//! calls. No retries, no local state: a failed call surfaces immediately as a
//! [`RemoteError`] and side effects stay on the backend.

use serde_json::json;

use crate::backend::{Backend, Query};
use crate::error::RemoteError;
use crate::models::collections::{POSTS, SAVES, USERS};
use crate::models::{
    BackendSession, DocumentPage, NewPost, NewUser, Post, SaveRecord, UpdatePost, UpdateUser, User,
};

/// How many posts the home feed shows.
pub const RECENT_POSTS_LIMIT: usize = 20;

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, RemoteError> {
    serde_json::from_value(value)
        .map_err(|e| RemoteError::server(format!("unexpected document shape: {e}")))
}

fn require_id(id: &str, what: &str) -> Result<(), RemoteError> {
    if id.is_empty() {
        Err(RemoteError::validation(format!("{what} id is required")))
    } else {
        Ok(())
    }
}

/// Split a caption-form tag string: spaces dropped, commas separate, order
/// kept.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.replace(' ', "")
        .split(',')
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

// ---- account & session ----

pub async fn create_user_account(
    backend: &impl Backend,
    new_user: &NewUser,
) -> Result<User, RemoteError> {
    let account = backend
        .create_account(&new_user.email, &new_user.password, &new_user.name)
        .await?;
    let avatar_url = backend.initials_avatar_url(&account.name);

    let fields = json!({
        "accountId": account.id,
        "name": account.name,
        "email": account.email,
        "username": new_user.username,
        "imageUrl": avatar_url,
        "imageId": "",
        "bio": "",
        "posts": [],
        "follower": [],
        "following": [],
        "saves": [],
    });
    decode(backend.create_document(USERS, fields).await?)
}

pub async fn sign_in(
    backend: &impl Backend,
    email: &str,
    password: &str,
) -> Result<BackendSession, RemoteError> {
    backend.create_session(email, password).await
}

pub async fn sign_out(backend: &impl Backend) -> Result<(), RemoteError> {
    backend.delete_session().await
}

/// The user document of the signed-in account: account lookup, then an
/// equality query on the account id.
pub async fn get_current_user(backend: &impl Backend) -> Result<User, RemoteError> {
    let account = backend.current_account().await?;
    let page: DocumentPage<User> = decode(
        backend
            .query_documents(USERS, &[Query::equal("accountId", &account.id)])
            .await?,
    )?;
    page.documents
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::not_found("no user document for the signed-in account"))
}

// ---- posts ----

/// Create a post with its image. The file goes up first; if the document
/// write then fails the upload is deleted so nothing is left orphaned.
pub async fn create_post(backend: &impl Backend, new_post: &NewPost) -> Result<Post, RemoteError> {
    let uploaded = backend
        .upload_file(&new_post.file.name, &new_post.file.mime, &new_post.file.bytes)
        .await?;
    let image_url = backend.file_view_url(&uploaded.id);

    let fields = json!({
        "creator": new_post.creator,
        "caption": new_post.caption,
        "imageUrl": image_url,
        "imageId": uploaded.id,
        "location": new_post.location,
        "tags": parse_tags(&new_post.tags),
        "likes": [],
    });
    match backend.create_document(POSTS, fields).await {
        Ok(document) => decode(document),
        Err(error) => {
            if let Err(cleanup) = backend.delete_file(&uploaded.id).await {
                log::warn!("failed to delete orphaned upload {}: {cleanup}", uploaded.id);
            }
            Err(error)
        }
    }
}

/// Update a post, optionally replacing its image. A new file is uploaded
/// before the write and deleted again if the write fails; the old file is
/// deleted only after the write succeeded, never before.
pub async fn update_post(backend: &impl Backend, update: &UpdatePost) -> Result<Post, RemoteError> {
    require_id(&update.post_id, "post")?;

    let mut image_url = update.image_url.clone();
    let mut image_id = update.image_id.clone();
    let mut uploaded_id = None;
    if let Some(file) = &update.file {
        let uploaded = backend
            .upload_file(&file.name, &file.mime, &file.bytes)
            .await?;
        image_url = backend.file_view_url(&uploaded.id);
        image_id = uploaded.id.clone();
        uploaded_id = Some(uploaded.id);
    }

    let fields = json!({
        "caption": update.caption,
        "imageUrl": image_url,
        "imageId": image_id,
        "location": update.location,
        "tags": parse_tags(&update.tags),
    });
    match backend.update_document(POSTS, &update.post_id, fields).await {
        Ok(document) => {
            if uploaded_id.is_some()
                && !update.image_id.is_empty()
                && let Err(cleanup) = backend.delete_file(&update.image_id).await
            {
                log::warn!("failed to delete replaced image {}: {cleanup}", update.image_id);
            }
            decode(document)
        }
        Err(error) => {
            if let Some(id) = uploaded_id
                && let Err(cleanup) = backend.delete_file(&id).await
            {
                log::warn!("failed to delete orphaned upload {id}: {cleanup}");
            }
            Err(error)
        }
    }
}

pub async fn delete_post(
    backend: &impl Backend,
    post_id: &str,
    image_id: &str,
) -> Result<(), RemoteError> {
    require_id(post_id, "post")?;
    require_id(image_id, "image")?;
    backend.delete_document(POSTS, post_id).await?;
    backend.delete_file(image_id).await
}

pub async fn get_recent_posts(backend: &impl Backend) -> Result<DocumentPage<Post>, RemoteError> {
    decode(
        backend
            .query_documents(
                POSTS,
                &[Query::order_desc("createdAt"), Query::limit(RECENT_POSTS_LIMIT)],
            )
            .await?,
    )
}

pub async fn get_post_by_id(backend: &impl Backend, post_id: &str) -> Result<Post, RemoteError> {
    require_id(post_id, "post")?;
    decode(backend.get_document(POSTS, post_id).await?)
}

/// One feed page, newest activity first. `cursor` is the id of the last
/// document of the previous page; `None` fetches the first page.
pub async fn get_posts_page(
    backend: &impl Backend,
    cursor: Option<&str>,
    page_size: usize,
) -> Result<DocumentPage<Post>, RemoteError> {
    let mut queries = vec![Query::order_desc("updatedAt"), Query::limit(page_size)];
    if let Some(cursor) = cursor {
        queries.push(Query::cursor_after(cursor));
    }
    decode(backend.query_documents(POSTS, &queries).await?)
}

pub async fn search_posts(
    backend: &impl Backend,
    term: &str,
) -> Result<DocumentPage<Post>, RemoteError> {
    decode(
        backend
            .query_documents(POSTS, &[Query::search("caption", term)])
            .await?,
    )
}

/// Replace the post's likes array wholesale. The caller computed the array
/// with the membership toggle; overlapping replacements race and the last
/// response to land wins.
pub async fn like_post(
    backend: &impl Backend,
    post_id: &str,
    likes: &[String],
) -> Result<Post, RemoteError> {
    require_id(post_id, "post")?;
    decode(
        backend
            .update_document(POSTS, post_id, json!({ "likes": likes }))
            .await?,
    )
}

// ---- saves ----

pub async fn save_post(
    backend: &impl Backend,
    user_id: &str,
    post_id: &str,
) -> Result<SaveRecord, RemoteError> {
    require_id(user_id, "user")?;
    require_id(post_id, "post")?;
    decode(
        backend
            .create_document(SAVES, json!({ "user": user_id, "post": post_id }))
            .await?,
    )
}

pub async fn delete_saved_post(backend: &impl Backend, record_id: &str) -> Result<(), RemoteError> {
    require_id(record_id, "save record")?;
    backend.delete_document(SAVES, record_id).await
}

// ---- users ----

pub async fn get_users(
    backend: &impl Backend,
    limit: Option<usize>,
) -> Result<DocumentPage<User>, RemoteError> {
    let mut queries = vec![Query::order_desc("createdAt")];
    if let Some(limit) = limit {
        queries.push(Query::limit(limit));
    }
    decode(backend.query_documents(USERS, &queries).await?)
}

pub async fn get_user_by_id(backend: &impl Backend, user_id: &str) -> Result<User, RemoteError> {
    require_id(user_id, "user")?;
    decode(backend.get_document(USERS, user_id).await?)
}

pub async fn get_user_posts(
    backend: &impl Backend,
    user_id: &str,
) -> Result<DocumentPage<Post>, RemoteError> {
    require_id(user_id, "user")?;
    decode(
        backend
            .query_documents(
                POSTS,
                &[Query::equal("creator", user_id), Query::order_desc("createdAt")],
            )
            .await?,
    )
}

/// Same compound image policy as [`update_post`].
pub async fn update_user(backend: &impl Backend, update: &UpdateUser) -> Result<User, RemoteError> {
    require_id(&update.user_id, "user")?;

    let mut image_url = update.image_url.clone();
    let mut image_id = update.image_id.clone();
    let mut uploaded_id = None;
    if let Some(file) = &update.file {
        let uploaded = backend
            .upload_file(&file.name, &file.mime, &file.bytes)
            .await?;
        image_url = backend.file_view_url(&uploaded.id);
        image_id = uploaded.id.clone();
        uploaded_id = Some(uploaded.id);
    }

    let fields = json!({
        "name": update.name,
        "bio": update.bio,
        "imageUrl": image_url,
        "imageId": image_id,
        "username": update.username,
    });
    match backend.update_document(USERS, &update.user_id, fields).await {
        Ok(document) => {
            if uploaded_id.is_some()
                && !update.image_id.is_empty()
                && let Err(cleanup) = backend.delete_file(&update.image_id).await
            {
                log::warn!("failed to delete replaced avatar {}: {cleanup}", update.image_id);
            }
            decode(document)
        }
        Err(error) => {
            if let Some(id) = uploaded_id
                && let Err(cleanup) = backend.delete_file(&id).await
            {
                log::warn!("failed to delete orphaned upload {id}: {cleanup}");
            }
            Err(error)
        }
    }
}

// ---- follows ----

/// Write both sides of a follow toggle: the followed user's `follower` array
/// first, then the follower's `following` array. Two independent writes, no
/// atomicity across them; a partial failure leaves a one-sided pair that
/// [`reconcile_follow_links`] can repair.
pub async fn follow_user(
    backend: &impl Backend,
    follower_id: &str,
    following_id: &str,
    follower_array: &[String],
    following_array: &[String],
) -> Result<(), RemoteError> {
    require_id(follower_id, "follower")?;
    require_id(following_id, "following")?;

    backend
        .update_document(USERS, following_id, json!({ "follower": follower_array }))
        .await?;
    backend
        .update_document(USERS, follower_id, json!({ "following": following_array }))
        .await?;
    Ok(())
}

/// Check the pair invariant (`follower_id` in `followed.follower` iff
/// `following_id` in `follower.following`) and repair a one-sided link.
///
/// The followed side is written first by [`follow_user`], so on mismatch it
/// is taken as the source of truth and the follower's `following` array is
/// brought in line with it. Returns whether a repair was written.
pub async fn reconcile_follow_links(
    backend: &impl Backend,
    follower_id: &str,
    following_id: &str,
) -> Result<bool, RemoteError> {
    let followed = get_user_by_id(backend, following_id).await?;
    let follower = get_user_by_id(backend, follower_id).await?;

    let linked = followed.follower.iter().any(|id| id == follower_id);
    let mirrored = follower.following.iter().any(|id| id == following_id);
    if linked == mirrored {
        return Ok(false);
    }

    log::warn!("one-sided follow between {follower_id} and {following_id}, repairing");
    let repaired = crate::interactions::toggle_membership(&follower.following, following_id);
    backend
        .update_document(USERS, follower_id, json!({ "following": repaired }))
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags_strips_spaces_and_splits() {
        assert_eq!(parse_tags("art, street photo"), vec!["art", "streetphoto"]);
        assert_eq!(parse_tags("one"), vec!["one"]);
        assert_eq!(parse_tags(""), Vec::<String>::new());
        assert_eq!(parse_tags("a,,b,"), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_tags_keeps_order() {
        assert_eq!(parse_tags("c, b, a"), vec!["c", "b", "a"]);
    }
}
