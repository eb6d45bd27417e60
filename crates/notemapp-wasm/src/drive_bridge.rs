//! JavaScript drive bridge for WASM.
//!
//! Implements the `RemoteDrive` trait by calling fetch-based JavaScript
//! callbacks that talk to the Google Drive API with the signed-in user's
//! token. Results use the Drive API's own JSON shapes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use note_sync::drive::{DriveError, DriveFile, DriveFileMeta, Properties, RemoteDrive, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use wasm_bindgen::prelude::*;

use crate::js::{call_js_async, js_error_message};

/// JavaScript drive bridge.
///
/// # Example (TypeScript side)
///
/// ```typescript
/// const drive = new JsRemoteDrive(
///   () => listFiles(),
///   (id) => getFileContentById(id),
///   (id) => getFileMetaById(id),
///   (name, content, props) => createFile(name, content, props),
///   (id, name, content, mimeType) => updateFileById(id, name, content, mimeType),
///   (id, props) => updateFileProperties(id, props),
///   (id) => deleteFileById(id),
/// );
/// drive.setFindByName((name) => getFileByName(name));
/// ```
#[wasm_bindgen]
pub struct JsRemoteDrive {
    list_fn: js_sys::Function,
    content_fn: js_sys::Function,
    meta_fn: js_sys::Function,
    create_fn: js_sys::Function,
    update_fn: js_sys::Function,
    update_props_fn: js_sys::Function,
    delete_fn: js_sys::Function,
    /// Optional name query; without it lookups filter the full listing
    find_by_name_fn: Option<js_sys::Function>,
}

#[wasm_bindgen]
impl JsRemoteDrive {
    /// Create a new drive bridge with JS callback functions.
    ///
    /// All callbacks should be async functions (returning Promises).
    #[wasm_bindgen(constructor)]
    pub fn new(
        list_fn: js_sys::Function,
        content_fn: js_sys::Function,
        meta_fn: js_sys::Function,
        create_fn: js_sys::Function,
        update_fn: js_sys::Function,
        update_props_fn: js_sys::Function,
        delete_fn: js_sys::Function,
    ) -> Self {
        Self {
            list_fn,
            content_fn,
            meta_fn,
            create_fn,
            update_fn,
            update_props_fn,
            delete_fn,
            find_by_name_fn: None,
        }
    }

    /// Use a server-side name query for `getFileByName`.
    #[wasm_bindgen(js_name = setFindByName)]
    pub fn set_find_by_name(&mut self, find_fn: js_sys::Function) {
        self.find_by_name_fn = Some(find_fn);
    }
}

/// Map a rejected fetch to a drive error, keeping HTTP status hints.
fn js_err_to_drive_err(err: JsValue) -> DriveError {
    let status = js_sys::Reflect::get(&err, &"status".into())
        .ok()
        .and_then(|v| v.as_f64())
        .map(|s| s as u16);
    let message = js_error_message(&err);

    match status {
        Some(401) | Some(403) => DriveError::Unauthorized(message),
        Some(404) => DriveError::NotFound(message),
        Some(status) => DriveError::Http { status, message },
        None => DriveError::Network(message),
    }
}

/// File resource as returned by the Drive API.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsFile {
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

impl JsFile {
    fn into_file(self) -> DriveFile {
        DriveFile {
            id: self.id,
            name: self.name,
            mime_type: self.mime_type,
            app_properties: self.app_properties.unwrap_or_default(),
        }
    }
}

fn parse<T: DeserializeOwned>(value: JsValue, what: &str) -> Result<T> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| DriveError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
}

fn properties_to_js(properties: &Properties) -> Result<JsValue> {
    use serde::Serialize;
    properties
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| DriveError::Other(e.to_string()))
}

#[async_trait(?Send)]
impl RemoteDrive for JsRemoteDrive {
    async fn list_files(&self) -> Result<Vec<DriveFile>> {
        let result = call_js_async(&self.list_fn, &[])
            .await
            .map_err(js_err_to_drive_err)?;
        let files: Vec<JsFile> = parse(result, "file list")?;
        Ok(files.into_iter().map(JsFile::into_file).collect())
    }

    async fn get_file_by_name(&self, name: &str) -> Result<Option<DriveFile>> {
        let Some(find_fn) = &self.find_by_name_fn else {
            return Ok(self
                .list_files()
                .await?
                .into_iter()
                .find(|file| file.name == name));
        };

        let result = call_js_async(find_fn, &[name.into()])
            .await
            .map_err(js_err_to_drive_err)?;
        if result.is_undefined() || result.is_null() {
            return Ok(None);
        }
        Ok(Some(parse::<JsFile>(result, "file")?.into_file()))
    }

    async fn get_file_content_by_id(&self, id: &str) -> Result<String> {
        let result = call_js_async(&self.content_fn, &[id.into()])
            .await
            .map_err(js_err_to_drive_err)?;
        result
            .as_string()
            .ok_or_else(|| DriveError::InvalidResponse(format!("content of {} is not text", id)))
    }

    async fn get_file_meta_by_id(&self, id: &str) -> Result<DriveFileMeta> {
        let result = call_js_async(&self.meta_fn, &[id.into()])
            .await
            .map_err(js_err_to_drive_err)?;
        let file: JsFile = parse(result, "file metadata")?;

        let modified_on = file
            .modified_time
            .ok_or_else(|| {
                DriveError::InvalidResponse(format!("file {} has no modifiedTime", id))
            })?;
        Ok(DriveFileMeta {
            created_on: file.created_time.unwrap_or(modified_on),
            modified_on,
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            app_properties: file.app_properties.unwrap_or_default(),
        })
    }

    async fn create_file(
        &self,
        name: &str,
        content: &str,
        properties: &Properties,
    ) -> Result<DriveFile> {
        let props = properties_to_js(properties)?;
        let result = call_js_async(&self.create_fn, &[name.into(), content.into(), props])
            .await
            .map_err(js_err_to_drive_err)?;
        Ok(parse::<JsFile>(result, "created file")?.into_file())
    }

    async fn update_file_by_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        mime_type: &str,
    ) -> Result<DriveFile> {
        let result = call_js_async(
            &self.update_fn,
            &[id.into(), name.into(), content.into(), mime_type.into()],
        )
        .await
        .map_err(js_err_to_drive_err)?;
        Ok(parse::<JsFile>(result, "updated file")?.into_file())
    }

    async fn update_file_properties(&self, id: &str, properties: &Properties) -> Result<DriveFile> {
        let props = properties_to_js(properties)?;
        let result = call_js_async(&self.update_props_fn, &[id.into(), props])
            .await
            .map_err(js_err_to_drive_err)?;
        Ok(parse::<JsFile>(result, "updated file")?.into_file())
    }

    async fn delete_file_by_id(&self, id: &str) -> Result<()> {
        call_js_async(&self.delete_fn, &[id.into()])
            .await
            .map_err(js_err_to_drive_err)?;
        Ok(())
    }
}
