//! Google Cloud Storage object client.
//!
//! Uses the GCS JSON API with an OAuth bearer token. The endpoint can be
//! pointed at an emulator.

use std::path::Path;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

use cloudio_common::{Metadata, ObjectClient, StorageResult};

use super::{content_type, http_client};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Clone)]
pub struct GcsConfig {
    pub token: String,
    pub endpoint: String,
}

impl std::fmt::Debug for GcsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsConfig")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

pub struct GcsClient {
    config: GcsConfig,
    client: Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

impl GcsClient {
    pub fn new(config: GcsConfig) -> StorageResult<Self> {
        Ok(Self {
            config,
            client: http_client()?,
        })
    }

    fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    fn objects_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o",
            self.endpoint(),
            urlencoding::encode(bucket)
        )
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", self.objects_url(bucket), urlencoding::encode(key))
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint(),
            urlencoding::encode(bucket)
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.config.token)
    }
}

async fn check(resp: Response, what: &str) -> anyhow::Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    bail!("GCS {} failed: HTTP {} - {}", what, status, body)
}

#[async_trait]
impl ObjectClient for GcsClient {
    async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("prefix", prefix.to_string()),
                ("fields", "items(name),nextPageToken".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let resp = self
                .authorized(self.client.get(self.objects_url(bucket)).query(&query))
                .send()
                .await
                .context("GCS LIST request failed")?;
            let page: ObjectList = check(resp, "LIST")
                .await?
                .json()
                .await
                .context("Failed to parse GCS list response")?;

            keys.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!(bucket = %bucket, prefix = %prefix, count = keys.len(), "GCS list complete");
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Bytes> {
        let resp = self
            .authorized(
                self.client
                    .get(self.object_url(bucket, key))
                    .query(&[("alt", "media")]),
            )
            .send()
            .await
            .context("GCS GET request failed")?;
        check(resp, &format!("GET {}/{}", bucket, key))
            .await?
            .bytes()
            .await
            .context("Failed to read GCS response body")
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &Metadata,
    ) -> anyhow::Result<()> {
        let mime = content_type(key);
        let req = if metadata.is_empty() {
            self.client
                .post(self.upload_url(bucket))
                .query(&[("uploadType", "media"), ("name", key)])
                .header("Content-Type", mime)
                .body(data)
        } else {
            let boundary = format!("cloudio-{}", uuid::Uuid::new_v4().simple());
            let body = multipart_related(&boundary, key, &mime, metadata, &data)?;
            self.client
                .post(self.upload_url(bucket))
                .query(&[("uploadType", "multipart")])
                .header(
                    "Content-Type",
                    format!("multipart/related; boundary={}", boundary),
                )
                .body(body)
        };

        let resp = self
            .authorized(req)
            .send()
            .await
            .context("GCS upload request failed")?;
        check(resp, &format!("upload {}/{}", bucket, key)).await?;

        debug!(bucket = %bucket, key = %key, "GCS upload complete");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        let resp = self
            .authorized(self.client.delete(self.object_url(bucket, key)))
            .send()
            .await
            .context("GCS DELETE request failed")?;
        if resp.status().as_u16() != 404 {
            check(resp, &format!("DELETE {}/{}", bucket, key)).await?;
        }
        debug!(bucket = %bucket, key = %key, "GCS delete complete");
        Ok(())
    }

    async fn put_file(&self, bucket: &str, key: &str, local: &Path) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("Failed to open {}", local.display()))?;
        let size = file.metadata().await?.len();

        let resp = self
            .authorized(
                self.client
                    .post(self.upload_url(bucket))
                    .query(&[("uploadType", "media"), ("name", key)])
                    .header("Content-Type", content_type(key))
                    .header("Content-Length", size)
                    .body(Body::wrap_stream(ReaderStream::new(file))),
            )
            .send()
            .await
            .context("GCS upload request failed")?;
        check(resp, &format!("upload {}/{}", bucket, key)).await?;

        debug!(bucket = %bucket, key = %key, bytes = size, "GCS streamed upload complete");
        Ok(())
    }
}

/// Build a `multipart/related` upload body: JSON object resource, then data.
fn multipart_related(
    boundary: &str,
    key: &str,
    mime: &str,
    metadata: &Metadata,
    data: &[u8],
) -> anyhow::Result<Bytes> {
    let resource = serde_json::json!({
        "name": key,
        "contentType": mime,
        "metadata": metadata,
    });
    let resource = serde_json::to_vec(&resource).context("Failed to encode GCS metadata")?;

    let mut body = BytesMut::with_capacity(data.len() + resource.len() + 256);
    body.put_slice(format!("--{}\r\n", boundary).as_bytes());
    body.put_slice(&b"Content-Type: application/json; charset=UTF-8\r\n\r\n"[..]);
    body.put_slice(&resource[..]);
    body.put_slice(format!("\r\n--{}\r\nContent-Type: {}\r\n\r\n", boundary, mime).as_bytes());
    body.put_slice(data);
    body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    Ok(body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> GcsClient {
        GcsClient::new(GcsConfig {
            token: "ya29.secret".to_string(),
            endpoint: endpoint.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client("http://localhost:4443/");
        assert_eq!(
            client.object_url("bucket", "dir/file 1.txt"),
            "http://localhost:4443/storage/v1/b/bucket/o/dir%2Ffile%201.txt"
        );
        assert_eq!(
            client.upload_url("bucket"),
            "http://localhost:4443/upload/storage/v1/b/bucket/o"
        );
    }

    #[test]
    fn test_parse_object_list() {
        let json = r#"{"items":[{"name":"dir/a.txt"},{"name":"dir/b/c.txt"}],"nextPageToken":"CgVkaXIvYg=="}"#;
        let page: ObjectList = serde_json::from_str(json).unwrap();
        let names: Vec<_> = page.items.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["dir/a.txt", "dir/b/c.txt"]);
        assert_eq!(page.next_page_token.as_deref(), Some("CgVkaXIvYg=="));

        let empty: ObjectList = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.next_page_token.is_none());
    }

    #[test]
    fn test_multipart_related_layout() {
        let mut metadata = Metadata::new();
        metadata.insert("origin".to_string(), "test".to_string());
        let body = multipart_related("XYZ", "k.txt", "text/plain", &metadata, b"hello").unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.starts_with("--XYZ\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{"));
        assert!(text.contains(r#""origin":"test""#));
        assert!(text.contains("\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\nhello\r\n--XYZ--\r\n"));
    }

    #[test]
    fn test_debug_redacts_token() {
        assert!(!format!("{:?}", client(DEFAULT_ENDPOINT).config).contains("ya29"));
    }
}
