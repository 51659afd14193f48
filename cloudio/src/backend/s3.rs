//! S3-compatible object client.
//!
//! Talks to AWS S3 or any S3-compatible endpoint (MinIO, B2) with reqwest
//! and manual AWS Signature V4 signing. Requests use path-style URLs so a
//! single client serves every bucket.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Body, Client, Method, Response};
use sha2::{Digest, Sha256};
use tokio_util::io::ReaderStream;
use tracing::debug;

use cloudio_common::{Metadata, ObjectClient, StorageResult};

use super::{content_type, http_client};

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

#[derive(Clone)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

pub struct S3Client {
    config: S3Config,
    client: Client,
}

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    keys: Vec<String>,
    next_token: Option<String>,
}

impl S3Client {
    pub fn new(config: S3Config) -> StorageResult<Self> {
        Ok(Self {
            config,
            client: http_client()?,
        })
    }

    fn base_url(&self) -> String {
        match &self.config.endpoint {
            Some(ep) => ep.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.config.region),
        }
    }

    /// Compute the Authorization header value for a request.
    fn sign(
        &self,
        method: &str,
        canonical_uri: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        date_time: &str,
        date: &str,
    ) -> anyhow::Result<String> {
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, query, canonical_headers, signed_headers, payload_hash
        );

        let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time, credential_scope, cr_hash
        );

        let signing_key =
            derive_signing_key(&self.config.secret_access_key, date, &self.config.region)?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        ))
    }

    /// Sign and send one request. `extra` headers are signed too.
    async fn send(
        &self,
        method: Method,
        canonical_uri: &str,
        params: &[(&str, &str)],
        extra: BTreeMap<String, String>,
        body: Body,
        payload_hash: &str,
    ) -> anyhow::Result<Response> {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let base = self.base_url();
        let query = canonical_query(params);

        let mut headers = extra;
        headers.insert("host".to_string(), url_host(&base));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers.insert("x-amz-date".to_string(), date_time.clone());

        let auth = self.sign(
            method.as_str(),
            canonical_uri,
            &query,
            &headers,
            payload_hash,
            &date_time,
            &date,
        )?;

        let url = if query.is_empty() {
            format!("{}{}", base, canonical_uri)
        } else {
            format!("{}{}?{}", base, canonical_uri, query)
        };

        let mut req = self.client.request(method.clone(), &url);
        for (name, value) in headers.iter().filter(|(name, _)| *name != "host") {
            req = req.header(name.as_str(), value.as_str());
        }
        req.header("Authorization", auth)
            .body(body)
            .send()
            .await
            .with_context(|| format!("S3 {} request failed", method))
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> anyhow::Result<ListPage> {
        let empty_hash = body_hash(b"");
        let mut params = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = token {
            params.push(("continuation-token", token));
        }

        let resp = self
            .send(
                Method::GET,
                &format!("/{}", bucket),
                &params,
                BTreeMap::new(),
                Body::from(Vec::<u8>::new()),
                &empty_hash,
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("S3 LIST failed: HTTP {} - {}", status, body);
        }

        let body = resp.text().await.context("Failed to read S3 list response")?;
        Ok(parse_list_page(&body))
    }
}

#[async_trait]
impl ObjectClient for S3Client {
    async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(bucket, prefix, token.as_deref()).await?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(bucket = %bucket, prefix = %prefix, count = keys.len(), "S3 list complete");
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Bytes> {
        let empty_hash = body_hash(b"");
        let resp = self
            .send(
                Method::GET,
                &object_uri(bucket, key),
                &[],
                BTreeMap::new(),
                Body::from(Vec::<u8>::new()),
                &empty_hash,
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("S3 GET {}/{} failed: HTTP {} - {}", bucket, key, status, body);
        }

        resp.bytes().await.context("Failed to read S3 response body")
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &Metadata,
    ) -> anyhow::Result<()> {
        let payload_hash = body_hash(&data);
        let mut headers = metadata_headers(metadata);
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert("content-type".to_string(), content_type(key));

        let resp = self
            .send(
                Method::PUT,
                &object_uri(bucket, key),
                &[],
                headers,
                Body::from(data),
                &payload_hash,
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("S3 PUT {}/{} failed: HTTP {} - {}", bucket, key, status, body);
        }

        debug!(bucket = %bucket, key = %key, "S3 upload complete");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        let empty_hash = body_hash(b"");
        let resp = self
            .send(
                Method::DELETE,
                &object_uri(bucket, key),
                &[],
                BTreeMap::new(),
                Body::from(Vec::<u8>::new()),
                &empty_hash,
            )
            .await?;

        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("S3 DELETE {}/{} failed: HTTP {} - {}", bucket, key, status, body);
        }

        debug!(bucket = %bucket, key = %key, "S3 delete complete");
        Ok(())
    }

    async fn put_file(&self, bucket: &str, key: &str, local: &Path) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("Failed to open {}", local.display()))?;
        let size = file.metadata().await?.len();

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), size.to_string());
        headers.insert("content-type".to_string(), content_type(key));

        let resp = self
            .send(
                Method::PUT,
                &object_uri(bucket, key),
                &[],
                headers,
                Body::wrap_stream(ReaderStream::new(file)),
                UNSIGNED_PAYLOAD,
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("S3 PUT {}/{} failed: HTTP {} - {}", bucket, key, status, body);
        }

        debug!(bucket = %bucket, key = %key, bytes = size, "S3 streamed upload complete");
        Ok(())
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> anyhow::Result<Vec<u8>> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, b"s3")?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).context("Invalid HMAC key")?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn body_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Path-style URI for an object; each key segment is percent-encoded.
fn object_uri(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(|s| urlencoding::encode(s)).collect();
    format!("/{}/{}", bucket, encoded.join("/"))
}

/// Query string in SigV4 canonical form: encoded and sorted by name.
fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn metadata_headers(metadata: &Metadata) -> BTreeMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| (format!("x-amz-meta-{}", k.to_lowercase()), v.clone()))
        .collect()
}

fn parse_list_page(xml: &str) -> ListPage {
    let keys = tag_values(xml, "Key");
    let truncated = tag_values(xml, "IsTruncated")
        .first()
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = if truncated {
        tag_values(xml, "NextContinuationToken").into_iter().next()
    } else {
        None
    };
    ListPage { keys, next_token }
}

/// Extract the text of every `<tag>…</tag>` element, unescaped.
fn tag_values(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        remaining = &remaining[start + open.len()..];
        if let Some(end) = remaining.find(&close) {
            values.push(unescape_xml(&remaining[..end]));
            remaining = &remaining[end + close.len()..];
        }
    }
    values
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extract the host part from a URL for use in signing.
fn url_host(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: Option<&str>) -> S3Client {
        S3Client::new(S3Config {
            region: "eu-west-1".to_string(),
            endpoint: endpoint.map(String::from),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_list_page_truncated() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>dir/file1.txt</Key></Contents>
  <Contents><Key>dir/a &amp; b.txt</Key></Contents>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
</ListBucketResult>"#;
        let page = parse_list_page(xml);
        assert_eq!(page.keys, vec!["dir/file1.txt", "dir/a & b.txt"]);
        assert_eq!(
            page.next_token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
    }

    #[test]
    fn test_parse_list_page_last() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated>\
                   <Contents><Key>only</Key></Contents></ListBucketResult>";
        let page = parse_list_page(xml);
        assert_eq!(page.keys, vec!["only"]);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://s3.us-east-1.amazonaws.com"), "s3.us-east-1.amazonaws.com");
        assert_eq!(url_host("https://s3.us-east-1.amazonaws.com/bucket/key/path"), "s3.us-east-1.amazonaws.com");
        assert_eq!(url_host("http://localhost:9000"), "localhost:9000");
    }

    #[test]
    fn test_object_uri_encodes_segments() {
        assert_eq!(object_uri("bucket", "dir/my file.txt"), "/bucket/dir/my%20file.txt");
        assert_eq!(object_uri("bucket", "a+b/c"), "/bucket/a%2Bb/c");
    }

    #[test]
    fn test_canonical_query_sorted() {
        let query = canonical_query(&[("prefix", "dir/sub"), ("list-type", "2")]);
        assert_eq!(query, "list-type=2&prefix=dir%2Fsub");
        assert_eq!(canonical_query(&[]), "");
    }

    #[test]
    fn test_base_url() {
        assert_eq!(client(None).base_url(), "https://s3.eu-west-1.amazonaws.com");
        assert_eq!(client(Some("http://localhost:9000/")).base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_metadata_headers_lowercased() {
        let mut metadata = Metadata::new();
        metadata.insert("Source".to_string(), "import".to_string());
        let headers = metadata_headers(&metadata);
        assert_eq!(headers["x-amz-meta-source"], "import");
    }

    #[test]
    fn test_signing_key_length() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
        )
        .unwrap();
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let client = client(None);
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), "s3.eu-west-1.amazonaws.com".to_string());
        headers.insert("x-amz-date".to_string(), "20240101T000000Z".to_string());
        let hash = body_hash(b"");

        let a = client
            .sign("GET", "/bucket/key", "", &headers, &hash, "20240101T000000Z", "20240101")
            .unwrap();
        let b = client
            .sign("GET", "/bucket/key", "", &headers, &hash, "20240101T000000Z", "20240101")
            .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/eu-west-1/s3/aws4_request,SignedHeaders=host;x-amz-date,Signature="
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = client(None).config;
        assert!(!format!("{:?}", config).contains("EXAMPLEKEY"));
    }
}
