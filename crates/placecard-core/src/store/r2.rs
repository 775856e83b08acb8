//! Cloudflare R2 photo store.

use std::env;
use std::fmt;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use crate::models::AssetRef;
use crate::util::{is_http_url, non_blank};
use crate::{Error, Result};

use super::{photo_key, FileStore, StoreError, StoreResult};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
const ENV_PUBLIC_BASE_URL: &str = "R2_PUBLIC_BASE_URL";

/// Error codes R2 answers with when the request is worth retrying.
const TRANSIENT_CODES: [&str; 4] = [
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "RequestTimeout",
];

/// Bucket and credentials for the photo store.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    pub account_id: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// When set, records store public URLs instead of bare object keys.
    pub public_base_url: Option<String>,
}

impl fmt::Debug for R2Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl R2Config {
    /// Reads the `R2_*` variables. `Ok(None)` means photos stay in memory;
    /// a partial set is a configuration error.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }

    fn client(&self) -> Client {
        let credentials = Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            None,
            None,
            "placecard-photos",
        );
        let conf = aws_sdk_s3::config::Builder::new()
            .region(Region::new("auto"))
            .endpoint_url(self.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Client::from_conf(conf)
    }
}

/// Photo store backed by an R2 bucket. Objects are keyed by content hash,
/// so uploads are idempotent.
#[derive(Clone, Debug)]
pub struct R2FileStore {
    config: R2Config,
    client: Client,
}

impl R2FileStore {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = config.client();
        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }

    /// Fails unless the bucket answers with the configured credentials.
    pub async fn ping(&self) -> StoreResult<()> {
        let bucket = &self.config.bucket;
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|error| sdk_error("head_bucket", bucket, None, &error))?;
        Ok(())
    }

    pub async fn contains(&self, object_key: &str) -> StoreResult<bool> {
        let bucket = &self.config.bucket;
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service)) if service.err().is_not_found() => Ok(false),
            Err(error) => Err(sdk_error("head_object", bucket, Some(object_key), &error)),
        }
    }

    /// Reference stored in the record for an object key.
    fn asset_ref(&self, object_key: &str) -> StoreResult<AssetRef> {
        let reference = self.config.public_base_url.as_ref().map_or_else(
            || object_key.to_string(),
            |base| format!("{base}/{object_key}"),
        );
        AssetRef::from_canonical(reference)
            .map_err(|reason| StoreError::Malformed(format!("{reason}: {object_key}")))
    }

    /// Object key behind a reference produced by [`Self::asset_ref`].
    fn object_key(&self, asset: &AssetRef) -> StoreResult<String> {
        let raw = asset.as_str();
        let key = match &self.config.public_base_url {
            Some(base) if is_http_url(raw) => raw.strip_prefix(base.as_str()).ok_or_else(|| {
                StoreError::Rejected(format!("{raw} is not stored in this bucket"))
            })?,
            _ => raw,
        };
        clean_key(key)
    }
}

#[async_trait]
impl FileStore for R2FileStore {
    async fn put(&self, bytes: &[u8], hash: &str, content_type: &str) -> StoreResult<AssetRef> {
        let key = clean_key(&photo_key(hash, content_type))?;
        if self.contains(&key).await? {
            tracing::debug!(%key, "Photo already stored");
            return self.asset_ref(&key);
        }

        let bucket = &self.config.bucket;
        let body = ByteStream::from(bytes.to_vec());
        let request = self.client.put_object().bucket(bucket).key(&key);
        request
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|error| sdk_error("put_object", bucket, Some(&key), &error))?;

        tracing::info!(%key, size = bytes.len(), "Uploaded photo");
        self.asset_ref(&key)
    }

    async fn delete(&self, asset: &AssetRef) -> StoreResult<()> {
        let key = self.object_key(asset)?;
        let bucket = &self.config.bucket;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(&key)
            .send()
            .await
            .map_err(|error| sdk_error("delete_object", bucket, Some(&key), &error))?;
        tracing::debug!(%key, "Deleted photo");
        Ok(())
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let value = |key: &str| non_blank(lookup(key));
    let account_id = value(ENV_ACCOUNT_ID);
    let bucket = value(ENV_BUCKET);
    let access_key_id = value(ENV_ACCESS_KEY_ID);
    let secret_access_key = value(ENV_SECRET_ACCESS_KEY);
    let public_base_url = value(ENV_PUBLIC_BASE_URL);

    if account_id.is_none()
        && bucket.is_none()
        && access_key_id.is_none()
        && secret_access_key.is_none()
        && public_base_url.is_none()
    {
        return Ok(None);
    }

    let (Some(account_id), Some(bucket), Some(access_key_id), Some(secret_access_key)) =
        (account_id.clone(), bucket.clone(), access_key_id.clone(), secret_access_key.clone())
    else {
        let missing: Vec<&str> = [
            (ENV_ACCOUNT_ID, account_id.is_none()),
            (ENV_BUCKET, bucket.is_none()),
            (ENV_ACCESS_KEY_ID, access_key_id.is_none()),
            (ENV_SECRET_ACCESS_KEY, secret_access_key.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, absent)| absent.then_some(key))
        .collect();
        return Err(Error::Config(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    };

    let public_base_url = match public_base_url {
        Some(url) if !is_http_url(&url) => {
            return Err(Error::Config(format!(
                "{ENV_PUBLIC_BASE_URL} must start with http:// or https://"
            )));
        }
        other => other.map(|url| url.trim_end_matches('/').to_string()),
    };

    Ok(Some(R2Config {
        account_id,
        bucket,
        access_key_id,
        secret_access_key,
        public_base_url,
    }))
}

/// Service errors outside [`TRANSIENT_CODES`] are final; everything else,
/// including dispatch and timeout failures, is worth another attempt.
fn sdk_error<E, R>(
    operation: &str,
    bucket: &str,
    object_key: Option<&str>,
    error: &SdkError<E, R>,
) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    let path = match object_key {
        Some(key) => format!("{bucket}/{key}"),
        None => bucket.to_string(),
    };
    let message = format!("{operation} on {path}: {}", DisplayErrorContext(error));
    let transient = error.code().is_some_and(|code| TRANSIENT_CODES.contains(&code));
    if matches!(error, SdkError::ServiceError(_)) && !transient {
        StoreError::Rejected(message)
    } else {
        StoreError::Unavailable(message)
    }
}

fn clean_key(raw: &str) -> StoreResult<String> {
    match raw.trim().trim_matches('/') {
        "" => Err(StoreError::Rejected("Empty photo object key".to_string())),
        key => Ok(key.to_string()),
    }
}
