//! The document-store backend: what the data layer needs from it, and the
//! REST client that talks to the hosted one.

use std::cell::RefCell;

use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

use crate::config::BackendConfig;
use crate::error::RemoteError;
use crate::models::{Account, BackendSession, FileRef};

/// Query primitives understood by the store's list endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    Equal { field: String, value: String },
    OrderDesc { field: String },
    Limit { count: usize },
    CursorAfter { id: String },
    Search { field: String, term: String },
}

impl Query {
    pub fn equal(field: &str, value: &str) -> Self {
        Query::Equal {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn order_desc(field: &str) -> Self {
        Query::OrderDesc {
            field: field.to_string(),
        }
    }

    pub fn limit(count: usize) -> Self {
        Query::Limit { count }
    }

    pub fn cursor_after(id: &str) -> Self {
        Query::CursorAfter { id: id.to_string() }
    }

    pub fn search(field: &str, term: &str) -> Self {
        Query::Search {
            field: field.to_string(),
            term: term.to_string(),
        }
    }
}

/// Everything the gateway needs from the hosted backend: documents, files,
/// and the account/session endpoints. The one production implementation is
/// [`RestBackend`]; tests swap in an in-memory store.
#[allow(async_fn_in_trait)] // single-threaded client, futures are deliberately not Send
pub trait Backend {
    async fn create_document(&self, collection: &str, fields: Value) -> Result<Value, RemoteError>;
    async fn get_document(&self, collection: &str, id: &str) -> Result<Value, RemoteError>;
    async fn query_documents(
        &self,
        collection: &str,
        queries: &[Query],
    ) -> Result<Value, RemoteError>;
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<Value, RemoteError>;
    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    async fn upload_file(
        &self,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<FileRef, RemoteError>;
    /// URL serving the file; built locally, no request involved.
    fn file_view_url(&self, file_id: &str) -> String;
    async fn delete_file(&self, file_id: &str) -> Result<(), RemoteError>;

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Account, RemoteError>;
    async fn create_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<BackendSession, RemoteError>;
    async fn current_account(&self) -> Result<Account, RemoteError>;
    async fn delete_session(&self) -> Result<(), RemoteError>;
    /// URL of a generated initials avatar for `name`; built locally.
    fn initials_avatar_url(&self, name: &str) -> String;
}

pub struct RestBackend {
    config: BackendConfig,
    session_secret: RefCell<Option<String>>,
}

impl RestBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            session_secret: RefCell::new(None),
        }
    }

    /// Restore a session secret persisted by the UI (or drop the current one).
    pub fn set_session_secret(&self, secret: Option<String>) {
        *self.session_secret.borrow_mut() = secret;
    }

    pub fn session_secret(&self) -> Option<String> {
        self.session_secret.borrow().clone()
    }

    async fn send(
        &self,
        method: fetch_happen::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<fetch_happen::Response, RemoteError> {
        let client = fetch_happen::Client;
        let url = format!("{}{path}", self.config.base_url);

        let mut request = match method {
            fetch_happen::Method::GET => client.get(&url),
            fetch_happen::Method::POST => client.post(&url),
            fetch_happen::Method::PATCH => client.patch(&url),
            fetch_happen::Method::DELETE => client.delete(&url),
            _ => client.get(&url),
        };
        request = request.header("X-Loupe-Project", &self.config.project_key);
        if let Some(secret) = self.session_secret.borrow().as_ref() {
            request = request.header("Authorization", format!("Bearer {secret}"));
        }
        if let Some(body) = body {
            request = request
                .json(body)
                .map_err(|e| RemoteError::validation(format!("failed to encode request body: {e:?}")))?;
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("{e:?}")))?;

        if !response.ok() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(RemoteError::from_status(status, message));
        }
        Ok(response)
    }

    async fn send_json(
        &self,
        method: fetch_happen::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let response = self.send(method, path, body).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::server(format!("malformed response body: {e:?}")))
    }
}

impl Backend for RestBackend {
    async fn create_document(&self, collection: &str, fields: Value) -> Result<Value, RemoteError> {
        self.send_json(
            fetch_happen::Method::POST,
            &format!("/collections/{collection}/documents"),
            Some(&fields),
        )
        .await
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Value, RemoteError> {
        self.send_json(
            fetch_happen::Method::GET,
            &format!("/collections/{collection}/documents/{id}"),
            None,
        )
        .await
    }

    async fn query_documents(
        &self,
        collection: &str,
        queries: &[Query],
    ) -> Result<Value, RemoteError> {
        let body = serde_json::json!({ "queries": queries });
        self.send_json(
            fetch_happen::Method::POST,
            &format!("/collections/{collection}/documents/query"),
            Some(&body),
        )
        .await
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<Value, RemoteError> {
        self.send_json(
            fetch_happen::Method::PATCH,
            &format!("/collections/{collection}/documents/{id}"),
            Some(&fields),
        )
        .await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.send(
            fetch_happen::Method::DELETE,
            &format!("/collections/{collection}/documents/{id}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<FileRef, RemoteError> {
        let body = serde_json::json!({
            "name": name,
            "mime": mime,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        });
        let value = self
            .send_json(fetch_happen::Method::POST, "/files", Some(&body))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::server(format!("unexpected upload response: {e}")))
    }

    fn file_view_url(&self, file_id: &str) -> String {
        format!("{}/files/{file_id}/view", self.config.base_url)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), RemoteError> {
        self.send(fetch_happen::Method::DELETE, &format!("/files/{file_id}"), None)
            .await?;
        Ok(())
    }

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Account, RemoteError> {
        let body = serde_json::json!({ "email": email, "password": password, "name": name });
        let value = self
            .send_json(fetch_happen::Method::POST, "/account", Some(&body))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::server(format!("unexpected account response: {e}")))
    }

    async fn create_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<BackendSession, RemoteError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let value = self
            .send_json(fetch_happen::Method::POST, "/account/sessions", Some(&body))
            .await?;
        let session: BackendSession = serde_json::from_value(value)
            .map_err(|e| RemoteError::server(format!("unexpected session response: {e}")))?;
        // Later requests run as this session.
        *self.session_secret.borrow_mut() = Some(session.secret.clone());
        Ok(session)
    }

    async fn current_account(&self) -> Result<Account, RemoteError> {
        let value = self
            .send_json(fetch_happen::Method::GET, "/account", None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::server(format!("unexpected account response: {e}")))
    }

    async fn delete_session(&self) -> Result<(), RemoteError> {
        self.send(fetch_happen::Method::DELETE, "/account/sessions/current", None)
            .await?;
        *self.session_secret.borrow_mut() = None;
        Ok(())
    }

    fn initials_avatar_url(&self, name: &str) -> String {
        format!(
            "{}/avatars/initials?name={}",
            self.config.base_url,
            urlencoding::encode(name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::backend_config;

    #[test]
    fn test_query_wire_shape() {
        let queries = vec![
            Query::equal("creator", "u1"),
            Query::order_desc("createdAt"),
            Query::limit(20),
            Query::cursor_after("p9"),
            Query::search("caption", "sunset"),
        ];
        let value = serde_json::to_value(&queries).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                { "equal": { "field": "creator", "value": "u1" } },
                { "order_desc": { "field": "createdAt" } },
                { "limit": { "count": 20 } },
                { "cursor_after": { "id": "p9" } },
                { "search": { "field": "caption", "term": "sunset" } },
            ])
        );
    }

    #[test]
    fn test_local_urls() {
        let backend = RestBackend::new(backend_config());
        let base = backend_config().base_url;
        assert_eq!(backend.file_view_url("f1"), format!("{base}/files/f1/view"));
        assert_eq!(
            backend.initials_avatar_url("Ada Lovelace"),
            format!("{base}/avatars/initials?name=Ada%20Lovelace")
        );
    }

    #[test]
    fn test_session_secret_round_trip() {
        let backend = RestBackend::new(backend_config());
        assert_eq!(backend.session_secret(), None);
        backend.set_session_secret(Some("s3cret".to_string()));
        assert_eq!(backend.session_secret(), Some("s3cret".to_string()));
        backend.set_session_secret(None);
        assert_eq!(backend.session_secret(), None);
    }
}
