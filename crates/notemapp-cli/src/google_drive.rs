//! RemoteDrive over the Google Drive v3 REST API.
//!
//! Every file lives in the `appDataFolder` space, which is private to the
//! application. The client is handed an already-issued bearer token; token
//! acquisition and refresh happen elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use note_sync::drive::{
    DriveError, DriveFile, DriveFileMeta, JSON_MIME_TYPE, Properties, RemoteDrive, Result,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

const APP_DATA_FOLDER: &str = "appDataFolder";
const FILE_FIELDS: &str = "id,name,mimeType,appProperties";
const META_FIELDS: &str = "id,name,mimeType,createdTime,modifiedTime,appProperties";
const PAGE_SIZE: &str = "1000";

/// A file resource as returned by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    app_properties: Option<Properties>,
}

impl FileResource {
    fn into_file(self) -> DriveFile {
        DriveFile {
            id: self.id,
            name: self.name,
            mime_type: self.mime_type,
            app_properties: self.app_properties.unwrap_or_default(),
        }
    }

    fn into_meta(self) -> Result<DriveFileMeta> {
        let modified_on = self
            .modified_time
            .ok_or_else(|| {
                DriveError::InvalidResponse(format!("file {} has no modifiedTime", self.id))
            })?;
        Ok(DriveFileMeta {
            created_on: self.created_time.unwrap_or(modified_on),
            modified_on,
            id: self.id,
            name: self.name,
            mime_type: self.mime_type,
            app_properties: self.app_properties.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<FileResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Drive client scoped to the app data folder.
pub struct GoogleDrive {
    client: Client,
    token: String,
    base_url: String,
}

impl GoogleDrive {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Point the client at another API host (used by tests and proxies).
    pub fn with_base_url(token: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.base_url)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/drive/v3/files/{}", self.base_url, id)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| DriveError::Network(e.to_string()))?;
        check_status(response).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))
    }

    async fn list(&self, query: Option<String>) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);

        loop {
            let mut params = vec![
                ("spaces", APP_DATA_FOLDER.to_string()),
                ("fields", fields.clone()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            if let Some(q) = &query {
                params.push(("q", q.clone()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: FileList = self
                .send_json(self.client.get(self.files_url()).query(&params))
                .await?;
            files.extend(page.files.into_iter().map(FileResource::into_file));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = files.len(), "listed drive files");
        Ok(files)
    }
}

#[async_trait]
impl RemoteDrive for GoogleDrive {
    async fn list_files(&self) -> Result<Vec<DriveFile>> {
        self.list(None).await
    }

    async fn get_file_by_name(&self, name: &str) -> Result<Option<DriveFile>> {
        let query = format!("name = '{}' and trashed = false", escape_query(name));
        Ok(self.list(Some(query)).await?.into_iter().next())
    }

    async fn get_file_content_by_id(&self, id: &str) -> Result<String> {
        self.send(self.client.get(self.file_url(id)).query(&[("alt", "media")]))
            .await?
            .text()
            .await
            .map_err(|e| DriveError::Network(e.to_string()))
    }

    async fn get_file_meta_by_id(&self, id: &str) -> Result<DriveFileMeta> {
        let resource: FileResource = self
            .send_json(self.client.get(self.file_url(id)).query(&[("fields", META_FIELDS)]))
            .await?;
        resource.into_meta()
    }

    async fn create_file(
        &self,
        name: &str,
        content: &str,
        properties: &Properties,
    ) -> Result<DriveFile> {
        let metadata = json!({
            "name": name,
            "mimeType": JSON_MIME_TYPE,
            "parents": [APP_DATA_FOLDER],
            "appProperties": properties,
        });
        let form = multipart_body(&metadata, content, JSON_MIME_TYPE)?;
        let resource: FileResource = self
            .send_json(
                self.client
                    .post(self.upload_url())
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .multipart(form),
            )
            .await?;
        debug!(name, id = %resource.id, "created drive file");
        Ok(resource.into_file())
    }

    async fn update_file_by_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        mime_type: &str,
    ) -> Result<DriveFile> {
        let metadata = json!({ "name": name, "mimeType": mime_type });
        let form = multipart_body(&metadata, content, mime_type)?;
        let resource: FileResource = self
            .send_json(
                self.client
                    .patch(format!("{}/{}", self.upload_url(), id))
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .multipart(form),
            )
            .await?;
        debug!(name, id, "updated drive file");
        Ok(resource.into_file())
    }

    async fn update_file_properties(&self, id: &str, properties: &Properties) -> Result<DriveFile> {
        let resource: FileResource = self
            .send_json(
                self.client
                    .patch(self.file_url(id))
                    .query(&[("fields", FILE_FIELDS)])
                    .json(&json!({ "appProperties": properties })),
            )
            .await?;
        Ok(resource.into_file())
    }

    async fn delete_file_by_id(&self, id: &str) -> Result<()> {
        self.send(self.client.delete(self.file_url(id))).await?;
        debug!(id, "deleted drive file");
        Ok(())
    }
}

/// Metadata part followed by the media part.
fn multipart_body(metadata: &serde_json::Value, content: &str, mime_type: &str) -> Result<Form> {
    let metadata = Part::text(metadata.to_string())
        .mime_str("application/json; charset=UTF-8")
        .map_err(|e| DriveError::Other(e.to_string()))?;
    let media = Part::text(content.to_string())
        .mime_str(mime_type)
        .map_err(|e| DriveError::Other(e.to_string()))?;
    Ok(Form::new().part("metadata", metadata).part("file", media))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> DriveError {
    let message = api_error_message(body).unwrap_or_else(|| body.trim().to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DriveError::Unauthorized(message),
        StatusCode::NOT_FOUND => DriveError::NotFound(message),
        _ => DriveError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

/// Extract `error.message` from a Google API error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// Escape a literal for use inside a single-quoted Drive query string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
