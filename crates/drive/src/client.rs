//! Google Drive client implementation
//!
//! Talks to the Drive v3 REST API over reqwest and implements the
//! RemoteStore trait from dc-core. This is the only place where HTTP status
//! codes and Drive error reasons are turned into [`Error`] variants.

use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::json;
use url::Url;

use dc_core::{Error, ListOptions, ListPage, NodeKind, RemoteNode, RemoteStore, Result};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3/";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut";

/// Fields requested for every file resource
const FILE_FIELDS: &str = "id,name,mimeType,parents,size,modifiedTime";

/// 403 reasons Drive uses for quota throttling
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "sharingRateLimitExceeded",
];

/// 403 reasons meaning the caller may not copy or share the file
const RESTRICTED_REASONS: &[&str] = &["cannotCopyFile", "insufficientFilePermissions"];

/// Drive v3 client
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    /// Create a client for the public Drive endpoint
    ///
    /// `access_token` must already be valid; obtaining and refreshing it is
    /// left to the caller.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, access_token)
    }

    /// Create a client for a custom endpoint, e.g. a test server
    pub fn with_base_url(base_url: &str, access_token: impl Into<String>) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| Error::Config(format!("invalid base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid base url: {base_url}")));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            token: access_token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("invalid base url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(transport_error);
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_api_error(status, &body);
        tracing::debug!(status = %status, error = %error, "Drive request failed");
        Err(error)
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list_children(&self, query: &str, options: ListOptions) -> Result<ListPage> {
        let url = self.endpoint(&["files"])?;
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let page_size = options.page_size.to_string();

        let mut params = vec![
            ("q", query),
            ("pageSize", page_size.as_str()),
            ("fields", fields.as_str()),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = options.page_token.as_deref() {
            params.push(("pageToken", token));
        }

        tracing::debug!(query = %query, page_token = ?options.page_token, "Listing files");
        let list: FileList = self.send(self.http.get(url).query(&params)).await?;

        Ok(ListPage {
            items: list.files.into_iter().map(RemoteNode::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn get_node(&self, id: &str) -> Result<RemoteNode> {
        let url = self.endpoint(&["files", id])?;
        let request = self
            .http
            .get(url)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]);

        let file: DriveFile = self.send(request).await?;
        Ok(file.into())
    }

    async fn copy_node(
        &self,
        id: &str,
        destination_parent_id: &str,
        name: &str,
    ) -> Result<RemoteNode> {
        let url = self.endpoint(&["files", id, "copy"])?;
        let request = self
            .http
            .post(url)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "parents": [destination_parent_id],
            }));

        let file: DriveFile = self.send(request).await?;
        Ok(file.into())
    }

    async fn create_folder(&self, name: &str, destination_parent_id: &str) -> Result<RemoteNode> {
        let url = self.endpoint(&["files"])?;
        let request = self
            .http
            .post(url)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [destination_parent_id],
            }));

        let file: DriveFile = self.send(request).await?;
        Ok(file.into())
    }

    async fn transfer_ownership(&self, id: &str, new_owner: &str) -> Result<()> {
        let url = self.endpoint(&["files", id, "permissions"])?;
        let request = self
            .http
            .post(url)
            .query(&[("transferOwnership", "true"), ("supportsAllDrives", "true")])
            .json(&json!({
                "role": "owner",
                "type": "user",
                "emailAddress": new_owner,
            }));

        let _: IgnoredAny = self.send(request).await?;
        Ok(())
    }
}

/// A file resource as returned by Drive
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    parents: Vec<String>,
    /// Decimal string; absent for folders and native documents
    size: Option<String>,
    modified_time: Option<Timestamp>,
}

impl From<DriveFile> for RemoteNode {
    fn from(file: DriveFile) -> Self {
        let kind = match file.mime_type.as_str() {
            FOLDER_MIME_TYPE => NodeKind::Folder,
            SHORTCUT_MIME_TYPE => NodeKind::Shortcut,
            _ => NodeKind::Object,
        };
        RemoteNode {
            id: file.id,
            name: file.name,
            kind,
            parents: file.parents,
            size: file.size.and_then(|s| s.parse().ok()),
            modified: file.modified_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Map a failed Drive response onto the engine's error taxonomy
fn classify_api_error(status: StatusCode, body: &str) -> Error {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let reason = parsed
        .error
        .errors
        .first()
        .map(|d| d.reason.as_str())
        .unwrap_or_default();
    let message = if parsed.error.message.is_empty() {
        body.trim()
    } else {
        parsed.error.message.as_str()
    };
    let detail = if reason.is_empty() {
        format!("{status}: {message}")
    } else {
        format!("{status} {reason}: {message}")
    };

    match status {
        StatusCode::NOT_FOUND => Error::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(detail),
        StatusCode::FORBIDDEN if RATE_LIMIT_REASONS.contains(&reason) => Error::RateLimited(detail),
        StatusCode::FORBIDDEN if RESTRICTED_REASONS.contains(&reason) => {
            Error::PermissionRestricted(detail)
        }
        s if s.is_server_error() => Error::ServerTransient(detail),
        _ => Error::Unclassified(detail),
    }
}

/// Map a reqwest failure that never produced an API error body
fn transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        Error::Network(error.to_string())
    } else {
        Error::Unclassified(error.to_string())
    }
}
