use serde::Deserialize;
use std::path::{Path, PathBuf};

use cloudio_common::{StorageError, StorageResult};

use crate::backend::dropbox::{DropboxConfig, DEFAULT_API_URL, DEFAULT_CONTENT_URL};
use crate::backend::gcs::{GcsConfig, DEFAULT_ENDPOINT as GCS_DEFAULT_ENDPOINT};
use crate::backend::s3::S3Config;

const DEFAULT_S3_REGION: &str = "us-east-1";
const CACHE_DIR_NAME: &str = "cloudio-cache";

/// Connection settings for every backend.
///
/// Every field is optional; anything left out is looked up in the
/// environment when the backend is first constructed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
    pub s3: S3Settings,
    pub gcs: GcsSettings,
    pub dropbox: DropboxSettings,
    pub cache: CacheSettings,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3Settings {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// S3-compatible endpoint such as MinIO, e.g. `http://localhost:9000`.
    pub endpoint: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcsSettings {
    /// OAuth 2.0 access token.
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropboxSettings {
    pub token: Option<String>,
    /// Resolve paths from the team root namespace instead of the user's home.
    pub root: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub dir: Option<PathBuf>,
}

impl CloudConfig {
    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: CloudConfig = toml::from_str(&content).map_err(|e| {
            StorageError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> StorageResult<()> {
        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3.access_key_id and s3.secret_access_key must be given together".to_string(),
            ));
        }
        for (name, endpoint) in [
            ("s3.endpoint", &self.s3.endpoint),
            ("gcs.endpoint", &self.gcs.endpoint),
        ] {
            if let Some(ep) = endpoint {
                if !ep.starts_with("http://") && !ep.starts_with("https://") {
                    return Err(StorageError::Config(format!(
                        "{} must be an http(s) URL: {}",
                        name, ep
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(CACHE_DIR_NAME))
    }
}

/// First non-empty value among the explicit setting and the named variables.
fn lookup<E>(explicit: &Option<String>, vars: &[&str], env: &E) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
{
    explicit
        .iter()
        .cloned()
        .chain(vars.iter().filter_map(|v| env(v)))
        .find(|v| !v.trim().is_empty())
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn str2bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "yes" | "true" | "1")
}

impl S3Settings {
    pub fn resolve(&self) -> StorageResult<S3Config> {
        self.resolve_with(&process_env)
    }

    pub fn resolve_with<E>(&self, env: &E) -> StorageResult<S3Config>
    where
        E: Fn(&str) -> Option<String>,
    {
        let access_key_id = lookup(&self.access_key_id, &["AWS_ACCESS_KEY", "AWS_ACCESS_KEY_ID"], env);
        let secret_access_key = lookup(&self.secret_access_key, &["AWS_SECRET_ACCESS_KEY"], env);

        let (access_key_id, secret_access_key) = match (access_key_id, secret_access_key) {
            (Some(id), Some(secret)) => (id, secret),
            (None, None) => {
                return Err(StorageError::MissingCredentials {
                    backend: "s3",
                    hint: "set s3.access_key_id and s3.secret_access_key, or AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY".to_string(),
                })
            }
            _ => {
                return Err(StorageError::MissingCredentials {
                    backend: "s3",
                    hint: "provide both the access key id and the secret access key".to_string(),
                })
            }
        };

        let region = lookup(&self.region, &["AWS_REGION_NAME", "AWS_REGION"], env)
            .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());
        let endpoint = lookup(&self.endpoint, &["AWS_ENDPOINT_URL"], env);

        Ok(S3Config {
            region,
            endpoint,
            access_key_id,
            secret_access_key,
        })
    }
}

impl GcsSettings {
    pub fn resolve(&self) -> StorageResult<GcsConfig> {
        self.resolve_with(&process_env)
    }

    pub fn resolve_with<E>(&self, env: &E) -> StorageResult<GcsConfig>
    where
        E: Fn(&str) -> Option<String>,
    {
        let token = lookup(&self.token, &["GOOGLE_CLOUD_TOKEN"], env).ok_or_else(|| {
            StorageError::MissingCredentials {
                backend: "gcs",
                hint: "set gcs.token or GOOGLE_CLOUD_TOKEN to an OAuth access token".to_string(),
            }
        })?;
        let endpoint = lookup(&self.endpoint, &["GOOGLE_CLOUD_ENDPOINT"], env)
            .unwrap_or_else(|| GCS_DEFAULT_ENDPOINT.to_string());

        Ok(GcsConfig { token, endpoint })
    }
}

impl DropboxSettings {
    pub fn resolve(&self) -> StorageResult<DropboxConfig> {
        self.resolve_with(&process_env)
    }

    pub fn resolve_with<E>(&self, env: &E) -> StorageResult<DropboxConfig>
    where
        E: Fn(&str) -> Option<String>,
    {
        let token = lookup(&self.token, &["DROPBOX_TOKEN"], env).ok_or_else(|| {
            StorageError::MissingCredentials {
                backend: "dropbox",
                hint: "set dropbox.token or DROPBOX_TOKEN to an app access token".to_string(),
            }
        })?;
        let root = match self.root {
            Some(root) => root,
            None => env("DROPBOX_ROOT").map(|v| str2bool(&v)).unwrap_or(false),
        };

        Ok(DropboxConfig {
            token,
            root,
            api_url: DEFAULT_API_URL.to_string(),
            content_url: DEFAULT_CONTENT_URL.to_string(),
        })
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl std::fmt::Debug for GcsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsSettings")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl std::fmt::Debug for DropboxSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxSettings")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_valid_config() {
        let toml_str = r#"
[s3]
region = "eu-west-1"
access_key_id = "AKIDEXAMPLE"
secret_access_key = "secret"
endpoint = "http://localhost:9000"

[dropbox]
token = "sl.abc"
root = true

[cache]
dir = "/tmp/listings"
"#;
        let config: CloudConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.s3.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.dropbox.root, Some(true));
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/listings"));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config: CloudConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert!(config.cache_dir().ends_with(CACHE_DIR_NAME));
    }

    #[test]
    fn test_half_key_pair_rejected() {
        let toml_str = r#"
[s3]
access_key_id = "AKIDEXAMPLE"
"#;
        let config: CloudConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        let toml_str = r#"
[gcs]
endpoint = "storage.googleapis.com"
"#;
        let config: CloudConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(toml::from_str::<CloudConfig>("[azure]\nkey = \"x\"\n").is_err());
    }

    #[test]
    fn test_s3_resolve_prefers_explicit_values() {
        let settings = S3Settings {
            region: Some("ap-south-1".to_string()),
            access_key_id: Some("EXPLICIT".to_string()),
            secret_access_key: Some("explicit-secret".to_string()),
            endpoint: None,
        };
        let env = env_from(&[("AWS_ACCESS_KEY_ID", "FROM_ENV"), ("AWS_REGION_NAME", "us-west-2")]);
        let resolved = settings.resolve_with(&env).unwrap();
        assert_eq!(resolved.access_key_id, "EXPLICIT");
        assert_eq!(resolved.region, "ap-south-1");
    }

    #[test]
    fn test_s3_resolve_falls_back_to_env() {
        let env = env_from(&[
            ("AWS_ACCESS_KEY_ID", "FROM_ENV"),
            ("AWS_SECRET_ACCESS_KEY", "env-secret"),
        ]);
        let resolved = S3Settings::default().resolve_with(&env).unwrap();
        assert_eq!(resolved.access_key_id, "FROM_ENV");
        assert_eq!(resolved.secret_access_key, "env-secret");
        assert_eq!(resolved.region, DEFAULT_S3_REGION);
        assert!(resolved.endpoint.is_none());
    }

    #[test]
    fn test_s3_missing_credentials() {
        let err = S3Settings::default().resolve_with(&env_from(&[])).unwrap_err();
        assert!(matches!(err, StorageError::MissingCredentials { backend: "s3", .. }));

        let env = env_from(&[("AWS_ACCESS_KEY", "ONLY_ID")]);
        let err = S3Settings::default().resolve_with(&env).unwrap_err();
        assert!(matches!(err, StorageError::MissingCredentials { backend: "s3", .. }));
    }

    #[test]
    fn test_dropbox_resolve_root_from_env() {
        let env = env_from(&[("DROPBOX_TOKEN", "sl.env"), ("DROPBOX_ROOT", "Yes")]);
        let resolved = DropboxSettings::default().resolve_with(&env).unwrap();
        assert_eq!(resolved.token, "sl.env");
        assert!(resolved.root);

        let err = DropboxSettings::default().resolve_with(&env_from(&[])).unwrap_err();
        assert!(matches!(err, StorageError::MissingCredentials { backend: "dropbox", .. }));
    }

    #[test]
    fn test_gcs_resolve_default_endpoint() {
        let env = env_from(&[("GOOGLE_CLOUD_TOKEN", "ya29.token")]);
        let resolved = GcsSettings::default().resolve_with(&env).unwrap();
        assert_eq!(resolved.endpoint, GCS_DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let settings = S3Settings {
            secret_access_key: Some("very-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", settings).contains("very-secret"));
    }
}
