use std::future::Future;

use aws_sdk_s3::primitives::{AggregatedBytes, ByteStream};

use crate::{BlobStore, StoreError};

/// One S3 bucket behind the [`BlobStore`] contract.
///
/// S3 `PutObject` replaces whole objects atomically, which is what the
/// aggregate writers rely on.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Ambient AWS credentials plus the [`S3Settings`] overrides.
    pub fn from_env(bucket: &str) -> Result<Self, StoreError> {
        let bucket = bucket.trim().trim_matches('/');
        if bucket.is_empty() || bucket.contains('/') {
            return Err(StoreError::InvalidKey(format!("invalid s3 bucket: {bucket:?}")));
        }
        let settings = S3Settings::from_lookup(|name| std::env::var(name).ok())?;
        let client = block_on(settings.client())?;
        Ok(Self::new(client, bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if !prefix.is_empty() {
                req = req.prefix(prefix);
            }
            if let Some(t) = token.as_deref() {
                req = req.continuation_token(t);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| self.runtime_err("list", prefix, e))?;
            for obj in resp.contents() {
                if let Some(k) = obj.key() {
                    keys.push(k.to_string());
                }
            }
            if resp.is_truncated().unwrap_or(false) {
                token = resp.next_continuation_token().map(str::to_string);
                if token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn read_object_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.get_err(key, e))?;
        let bytes: AggregatedBytes = out
            .body
            .collect()
            .await
            .map_err(|e| self.runtime_err("read body of", key, e))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn write_object(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| self.runtime_err("put", key, e))?;
        Ok(())
    }

    fn runtime_err(&self, op: &str, key: &str, err: impl std::fmt::Debug) -> StoreError {
        StoreError::Runtime(format!("s3 {op} s3://{}/{key}: {err:?}", self.bucket))
    }

    fn get_err(
        &self,
        key: &str,
        err: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>,
    ) -> StoreError {
        let missing = matches!(
            &err,
            aws_sdk_s3::error::SdkError::ServiceError(se) if se.err().is_no_such_key()
        );
        if missing {
            StoreError::NotFound(format!("s3://{}/{key}", self.bucket))
        } else {
            self.runtime_err("get", key, err)
        }
    }
}

impl BlobStore for S3BlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        block_on(self.list_all(prefix))?
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        block_on(self.read_object_bytes(key))?
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        block_on(self.write_object(key, bytes.to_vec()))?
    }
}

pub const ENDPOINT_URL_VAR: &str = "EMVIZ_S3_ENDPOINT_URL";
pub const FORCE_PATH_STYLE_VAR: &str = "EMVIZ_S3_FORCE_PATH_STYLE";

/// Client overrides read from `EMVIZ_S3_*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Settings {
    /// Path-style addressing defaults on whenever a custom endpoint is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let endpoint_url = lookup(ENDPOINT_URL_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let force_path_style = match lookup(FORCE_PATH_STYLE_VAR) {
            Some(raw) => parse_flag(FORCE_PATH_STYLE_VAR, &raw)?,
            None => endpoint_url.is_some(),
        };
        Ok(Self {
            endpoint_url,
            force_path_style,
        })
    }

    async fn client(self) -> aws_sdk_s3::Client {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut conf = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(url) = self.endpoint_url {
            conf = conf.endpoint_url(url);
        }
        if self.force_path_style {
            conf = conf.force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(conf.build())
    }
}

fn parse_flag(var: &str, raw: &str) -> Result<bool, StoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(StoreError::Runtime(format!(
            "{var}={raw:?} is not a boolean (use 1/0, true/false, yes/no, on/off)"
        ))),
    }
}

// Store calls are synchronous; reuse the caller's runtime if there is one.
fn block_on<Fut: Future>(fut: Fut) -> Result<Fut::Output, StoreError> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return Ok(tokio::task::block_in_place(|| handle.block_on(fut)));
    }
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map(|rt| rt.block_on(fut))
        .map_err(|e| StoreError::Runtime(format!("start tokio runtime for s3: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<S3Settings, StoreError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        S3Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn endpoint_implies_path_style_unless_overridden() -> anyhow::Result<()> {
        assert_eq!(settings(&[])?, S3Settings::default());

        let minio = settings(&[(ENDPOINT_URL_VAR, "http://127.0.0.1:9000")])?;
        assert_eq!(minio.endpoint_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert!(minio.force_path_style);

        let vhost = settings(&[
            (ENDPOINT_URL_VAR, "http://127.0.0.1:9000"),
            (FORCE_PATH_STYLE_VAR, " Off "),
        ])?;
        assert!(!vhost.force_path_style);

        assert!(settings(&[(ENDPOINT_URL_VAR, "  ")])?.endpoint_url.is_none());
        Ok(())
    }

    #[test]
    fn bad_flag_names_the_variable() {
        let err = match settings(&[(FORCE_PATH_STYLE_VAR, "maybe")]) {
            Err(e) => e.to_string(),
            Ok(s) => panic!("accepted {s:?}"),
        };
        assert!(err.contains(FORCE_PATH_STYLE_VAR), "{err}");
        assert!(err.contains("maybe"), "{err}");
    }
}
