//! An in-process Dropbox HTTP service for exercising the Dropbox adapter.
//!
//! Paths are matched case-insensitively and keep the casing they were
//! created with, like the real service. Listings are paged two entries at a
//! time so cursor continuation is always taken.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use cloudio::backend::dropbox::DropboxConfig;

const PAGE_SIZE: usize = 2;
pub const NAMESPACE_ID: &str = "ns-1234";

struct Entry {
    display: String,
    /// `None` for folders.
    content: Option<Bytes>,
}

#[derive(Default)]
struct Store {
    /// Keyed by lower-cased path.
    entries: BTreeMap<String, Entry>,
    cursors: HashMap<String, Vec<Value>>,
    next_cursor: u64,
    /// Display path a concurrent writer creates when the next upload lands.
    racing: Option<String>,
    path_roots: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeDropbox {
    store: Arc<Mutex<Store>>,
}

impl FakeDropbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }

    pub fn insert_file(&self, display: &str, content: &[u8]) {
        let mut store = self.store();
        store.create_parents(display);
        store.entries.insert(
            display.to_lowercase(),
            Entry {
                display: display.to_string(),
                content: Some(Bytes::copy_from_slice(content)),
            },
        );
    }

    /// The next upload to a path matching `display` case-insensitively is
    /// stored under `display`, as if another client had just created it.
    pub fn create_on_next_upload(&self, display: &str) {
        self.store().racing = Some(display.to_string());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.store().entries.contains_key(&path.to_lowercase())
    }

    pub fn display(&self, path: &str) -> Option<String> {
        self.store()
            .entries
            .get(&path.to_lowercase())
            .map(|e| e.display.clone())
    }

    pub fn content(&self, path: &str) -> Option<Bytes> {
        self.store()
            .entries
            .get(&path.to_lowercase())
            .and_then(|e| e.content.clone())
    }

    pub fn file_count(&self) -> usize {
        self.store()
            .entries
            .values()
            .filter(|e| e.content.is_some())
            .count()
    }

    /// Every `Dropbox-API-Path-Root` header received so far.
    pub fn path_roots(&self) -> Vec<String> {
        self.store().path_roots.clone()
    }

    pub fn config(addr: SocketAddr, root: bool) -> DropboxConfig {
        DropboxConfig {
            token: "test-token".to_string(),
            root,
            api_url: format!("http://{}", addr),
            content_url: format!("http://{}", addr),
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/users/get_current_account", post(current_account))
            .route("/files/get_metadata", post(get_metadata))
            .route("/files/list_folder", post(list_folder))
            .route("/files/list_folder/continue", post(list_folder_continue))
            .route("/files/delete_v2", post(delete))
            .route("/files/upload", post(upload))
            .route("/files/download", post(download))
            .with_state(self.clone())
    }

    /// Serve on the current runtime.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Serve from a thread of its own, for callers without a runtime.
    pub fn serve_in_background(&self) -> SocketAddr {
        let (tx, rx) = std::sync::mpsc::channel();
        let app = self.router();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        rx.recv().unwrap()
    }
}

impl Store {
    fn create_parents(&mut self, display: &str) {
        let mut parent = String::new();
        let segments: Vec<&str> = display.trim_start_matches('/').split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            parent = format!("{}/{}", parent, segment);
            self.entries
                .entry(parent.to_lowercase())
                .or_insert_with(|| Entry {
                    display: parent.clone(),
                    content: None,
                });
        }
    }

    fn metadata(entry: &Entry) -> Value {
        let name = entry.display.rsplit('/').next().unwrap_or_default();
        json!({
            ".tag": if entry.content.is_some() { "file" } else { "folder" },
            "name": name,
            "path_display": entry.display,
            "path_lower": entry.display.to_lowercase(),
            "id": format!("id:{}", entry.display.to_lowercase()),
        })
    }

    fn page(&mut self, mut entries: Vec<Value>) -> Value {
        let rest = entries.split_off(entries.len().min(PAGE_SIZE));
        self.next_cursor += 1;
        let cursor = format!("cursor-{}", self.next_cursor);
        let has_more = !rest.is_empty();
        if has_more {
            self.cursors.insert(cursor.clone(), rest);
        }
        json!({ "entries": entries, "cursor": cursor, "has_more": has_more })
    }
}

fn conflict(summary: &str) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({ "error_summary": summary })),
    )
        .into_response()
}

fn arg_path(arg: &Value) -> String {
    arg["path"].as_str().unwrap_or_default().to_string()
}

fn header_arg(headers: &HeaderMap) -> Value {
    headers
        .get("Dropbox-API-Arg")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_str(v).ok())
        .unwrap_or(Value::Null)
}

fn record_root(fake: &FakeDropbox, headers: &HeaderMap) {
    if let Some(root) = headers
        .get("Dropbox-API-Path-Root")
        .and_then(|v| v.to_str().ok())
    {
        fake.store().path_roots.push(root.to_string());
    }
}

async fn current_account() -> Response {
    Json(json!({ "root_info": { "root_namespace_id": NAMESPACE_ID } })).into_response()
}

async fn get_metadata(
    State(fake): State<FakeDropbox>,
    headers: HeaderMap,
    Json(arg): Json<Value>,
) -> Response {
    record_root(&fake, &headers);
    let store = fake.store();
    match store.entries.get(&arg_path(&arg).to_lowercase()) {
        Some(entry) => Json(Store::metadata(entry)).into_response(),
        None => conflict("path/not_found/"),
    }
}

async fn list_folder(
    State(fake): State<FakeDropbox>,
    headers: HeaderMap,
    Json(arg): Json<Value>,
) -> Response {
    record_root(&fake, &headers);
    let folder = arg_path(&arg).to_lowercase();
    let recursive = arg["recursive"].as_bool().unwrap_or(false);
    let mut store = fake.store();
    if !folder.is_empty() && !store.entries.contains_key(&folder) {
        return conflict("path/not_found/");
    }
    let prefix = format!("{}/", folder);
    let entries: Vec<Value> = store
        .entries
        .iter()
        .filter(|(lower, _)| {
            lower
                .strip_prefix(&prefix)
                .is_some_and(|rest| recursive || !rest.contains('/'))
        })
        .map(|(_, entry)| Store::metadata(entry))
        .collect();
    Json(store.page(entries)).into_response()
}

async fn list_folder_continue(
    State(fake): State<FakeDropbox>,
    Json(arg): Json<Value>,
) -> Response {
    let cursor = arg["cursor"].as_str().unwrap_or_default().to_string();
    let mut store = fake.store();
    match store.cursors.remove(&cursor) {
        Some(rest) => Json(store.page(rest)).into_response(),
        None => conflict("reset/"),
    }
}

async fn delete(State(fake): State<FakeDropbox>, Json(arg): Json<Value>) -> Response {
    let path = arg_path(&arg).to_lowercase();
    let mut store = fake.store();
    let Some(entry) = store.entries.remove(&path) else {
        return conflict("path_lookup/not_found/");
    };
    let prefix = format!("{}/", path);
    store.entries.retain(|lower, _| !lower.starts_with(&prefix));
    Json(json!({ "metadata": Store::metadata(&entry) })).into_response()
}

async fn upload(State(fake): State<FakeDropbox>, headers: HeaderMap, body: Bytes) -> Response {
    record_root(&fake, &headers);
    let arg = header_arg(&headers);
    let requested = arg_path(&arg);
    let lower = requested.to_lowercase();
    let mut store = fake.store();

    let display = match store.racing.take() {
        Some(racing) if racing.to_lowercase() == lower => racing,
        other => {
            store.racing = other;
            match store.entries.get(&lower) {
                Some(_) if arg["mode"] == "add" => return conflict("path/conflict/file/"),
                Some(existing) => existing.display.clone(),
                None => requested,
            }
        }
    };
    store.create_parents(&display);
    let entry = Entry {
        display,
        content: Some(body),
    };
    let metadata = Store::metadata(&entry);
    store.entries.insert(lower, entry);
    Json(metadata).into_response()
}

async fn download(State(fake): State<FakeDropbox>, headers: HeaderMap) -> Response {
    let path = arg_path(&header_arg(&headers)).to_lowercase();
    match fake.content(&path) {
        Some(content) => content.into_response(),
        None => conflict("path/not_found/"),
    }
}
