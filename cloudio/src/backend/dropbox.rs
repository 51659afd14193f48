//! Dropbox adapter.
//!
//! Dropbox has real folders, so no key-space emulation is needed. It is,
//! however, case-insensitive while every other backend is case-sensitive:
//! whenever an exact name is matched, the stored casing is compared with the
//! requested one and a mismatch is reported as [`StorageError::CaseConflict`].

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use cloudio_common::{BackendKind, Metadata, StorageError, StoragePath, StorageResult};

use super::{http_client, PathStatus, StorageBackend};

pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com/2";
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com/2";

#[derive(Clone)]
pub struct DropboxConfig {
    pub token: String,
    /// Address the team root namespace instead of the user's home.
    pub root: bool,
    pub api_url: String,
    pub content_url: String,
}

impl std::fmt::Debug for DropboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxConfig")
            .field("token", &"<redacted>")
            .field("root", &self.root)
            .field("api_url", &self.api_url)
            .field("content_url", &self.content_url)
            .finish()
    }
}

pub struct DropboxBackend {
    config: DropboxConfig,
    client: Client,
    namespace: OnceCell<Option<String>>,
}

/// File or folder metadata as returned by the files endpoints.
#[derive(Debug, Clone, Deserialize)]
struct EntryMetadata {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    path_lower: Option<String>,
}

impl EntryMetadata {
    fn is_file(&self) -> bool {
        self.tag == "file"
    }

    fn is_folder(&self) -> bool {
        self.tag == "folder"
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<EntryMetadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Account {
    root_info: RootInfo,
}

#[derive(Debug, Deserialize)]
struct RootInfo {
    root_namespace_id: String,
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'static str,
    autorename: bool,
    mute: bool,
}

impl DropboxBackend {
    pub fn new(config: DropboxConfig) -> StorageResult<Self> {
        Ok(Self {
            config,
            client: http_client()?,
            namespace: OnceCell::new(),
        })
    }

    /// Root namespace id, fetched once when root mode is enabled.
    async fn namespace(&self) -> anyhow::Result<Option<&str>> {
        let namespace = self
            .namespace
            .get_or_try_init(|| async {
                if !self.config.root {
                    return Ok::<_, anyhow::Error>(None);
                }
                let resp = self
                    .client
                    .post(format!("{}/users/get_current_account", self.config.api_url))
                    .bearer_auth(&self.config.token)
                    .header("Content-Type", "application/json")
                    .body("null")
                    .send()
                    .await
                    .context("Dropbox account request failed")?;
                let account: Account = check(resp, "users/get_current_account")
                    .await?
                    .json()
                    .await
                    .context("Failed to parse Dropbox account")?;
                info!(namespace = %account.root_info.root_namespace_id, "Using Dropbox root namespace");
                Ok(Some(account.root_info.root_namespace_id))
            })
            .await?;
        Ok(namespace.as_deref())
    }

    async fn authorized(&self, req: RequestBuilder) -> anyhow::Result<RequestBuilder> {
        let mut req = req.bearer_auth(&self.config.token);
        if let Some(id) = self.namespace().await? {
            let root = json!({".tag": "namespace_id", "namespace_id": id});
            req = req.header("Dropbox-API-Path-Root", root.to_string());
        }
        Ok(req)
    }

    async fn rpc(&self, endpoint: &str, body: serde_json::Value) -> anyhow::Result<Response> {
        let req = self
            .client
            .post(format!("{}/{}", self.config.api_url, endpoint))
            .json(&body);
        self.authorized(req)
            .await?
            .send()
            .await
            .with_context(|| format!("Dropbox {} request failed", endpoint))
    }

    /// Metadata for `path`, or `None` when nothing exists there.
    async fn get_metadata(&self, path: &str) -> anyhow::Result<Option<EntryMetadata>> {
        let resp = self.rpc("files/get_metadata", json!({ "path": path })).await?;
        // 409 carries the path/not_found error.
        if resp.status().as_u16() == 409 {
            return Ok(None);
        }
        let metadata = check(resp, "files/get_metadata")
            .await?
            .json()
            .await
            .context("Failed to parse Dropbox metadata")?;
        Ok(Some(metadata))
    }

    async fn analyse(&self, path: &StoragePath) -> StorageResult<PathStatus> {
        let dbx_path = path.dropbox_path();
        if dbx_path.is_empty() {
            return Ok(PathStatus {
                is_file: false,
                is_dir: true,
            });
        }
        let status = match self.get_metadata(&dbx_path).await? {
            Some(metadata) => {
                check_case(&dbx_path, &metadata)?;
                PathStatus {
                    is_file: metadata.is_file(),
                    is_dir: metadata.is_folder(),
                }
            }
            None => PathStatus::default(),
        };
        debug!(path = %path, is_file = status.is_file, is_dir = status.is_dir, "Analysed path");
        Ok(status)
    }

    async fn list_folder(&self, path: &str, recursive: bool) -> anyhow::Result<Vec<EntryMetadata>> {
        let resp = self
            .rpc(
                "files/list_folder",
                json!({ "path": path, "recursive": recursive }),
            )
            .await?;
        let mut page: ListFolderResult = check(resp, "files/list_folder")
            .await?
            .json()
            .await
            .context("Failed to parse Dropbox folder listing")?;

        let mut entries = std::mem::take(&mut page.entries);
        while page.has_more {
            let resp = self
                .rpc("files/list_folder/continue", json!({ "cursor": page.cursor }))
                .await?;
            page = check(resp, "files/list_folder/continue")
                .await?
                .json()
                .await
                .context("Failed to parse Dropbox folder listing")?;
            entries.append(&mut page.entries);
        }
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let resp = self.rpc("files/delete_v2", json!({ "path": path })).await?;
        check(resp, "files/delete_v2").await?;
        Ok(())
    }

    async fn upload(&self, path: &str, data: Bytes, overwrite: bool) -> anyhow::Result<EntryMetadata> {
        let arg = api_arg(&UploadArg {
            path,
            mode: if overwrite { "overwrite" } else { "add" },
            autorename: false,
            mute: true,
        })?;
        let req = self
            .client
            .post(format!("{}/files/upload", self.config.content_url))
            .header("Dropbox-API-Arg", arg)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        let resp = self
            .authorized(req)
            .await?
            .send()
            .await
            .context("Dropbox upload request failed")?;
        check(resp, "files/upload")
            .await?
            .json()
            .await
            .context("Failed to parse Dropbox upload result")
    }
}

#[async_trait]
impl StorageBackend for DropboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dropbox
    }

    async fn stat(&self, path: &StoragePath) -> StorageResult<PathStatus> {
        self.analyse(path).await
    }

    async fn listdir(
        &self,
        path: &StoragePath,
        recursive: bool,
        exclude_folders: bool,
    ) -> StorageResult<Vec<String>> {
        let status = self.analyse(path).await?;
        if !status.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !status.is_dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }

        let dbx_path = path.dropbox_path();
        let mut listing: Vec<String> = self
            .list_folder(&dbx_path, recursive)
            .await?
            .iter()
            .filter(|entry| !(exclude_folders && entry.is_folder()))
            .filter_map(|entry| {
                let relative = relative_name(&dbx_path, entry)?;
                Some(if entry.is_folder() {
                    format!("{}/", relative)
                } else {
                    relative
                })
            })
            .collect();
        listing.sort();
        Ok(listing)
    }

    async fn remove(&self, path: &StoragePath) -> StorageResult<()> {
        let dbx_path = path.dropbox_path();
        if dbx_path.is_empty() {
            return Err(StorageError::Unsupported(
                "refusing to remove the Dropbox root folder".to_string(),
            ));
        }
        if !self.analyse(path).await?.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        self.delete(&dbx_path).await?;
        info!(path = %path, "Removed");
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes> {
        let arg = api_arg(&json!({ "path": path.dropbox_path() }))?;
        let req = self
            .client
            .post(format!("{}/files/download", self.config.content_url))
            .header("Dropbox-API-Arg", arg);
        let resp = self
            .authorized(req)
            .await?
            .send()
            .await
            .context("Dropbox download request failed")?;
        let data = check(resp, "files/download")
            .await?
            .bytes()
            .await
            .context("Failed to read Dropbox download body")?;
        Ok(data)
    }

    async fn write(&self, path: &StoragePath, data: Bytes, metadata: &Metadata) -> StorageResult<()> {
        let dbx_path = path.dropbox_path();
        let existed = self.analyse(path).await?.is_file;
        if existed {
            info!(path = %path, "Overwriting file");
        }
        if !metadata.is_empty() {
            warn!(path = %path, "Dropbox does not store user metadata; ignoring it");
        }

        let stored = self.upload(&dbx_path, data, existed).await?;
        if let Err(conflict) = check_case(&dbx_path, &stored) {
            if !existed {
                let created = stored.path_display.as_deref().unwrap_or(&dbx_path);
                self.delete(created).await?;
            }
            return Err(conflict);
        }
        debug!(path = %path, "Dropbox upload complete");
        Ok(())
    }
}

async fn check(resp: Response, endpoint: &str) -> anyhow::Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    bail!("Dropbox {} failed: HTTP {} - {}", endpoint, status, body)
}

/// Compare the stored name with the requested one.
///
/// Only the final component of `path_display` is guaranteed to carry the
/// stored casing, so `name` is what gets compared.
fn check_case(requested: &str, stored: &EntryMetadata) -> StorageResult<()> {
    let requested_name = requested.rsplit('/').next().unwrap_or(requested);
    if stored.name != requested_name && stored.name.to_lowercase() == requested_name.to_lowercase() {
        let parent = requested.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        return Err(StorageError::CaseConflict {
            requested: requested.to_string(),
            existing: format!("{}/{}", parent, stored.name),
        });
    }
    Ok(())
}

/// Name of `entry` relative to the listed folder, matched case-insensitively.
fn relative_name(folder: &str, entry: &EntryMetadata) -> Option<String> {
    let display = entry.path_display.as_deref()?;
    let lower = entry.path_lower.clone().unwrap_or_else(|| display.to_lowercase());
    let folder_lower = folder.to_lowercase();
    if !lower.starts_with(&folder_lower) {
        return None;
    }
    let relative: String = display
        .chars()
        .skip(folder.chars().count())
        .collect::<String>()
        .trim_start_matches('/')
        .to_string();
    if relative.is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// JSON for the `Dropbox-API-Arg` header. HTTP headers must be ASCII, so
/// everything else is written as `\uXXXX` escapes.
fn api_arg<T: Serialize>(arg: &T) -> anyhow::Result<String> {
    let raw = serde_json::to_string(arg).context("Failed to encode Dropbox argument")?;
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() && c != '\u{7f}' {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}
