//! Amazon S3 [`Store`].
//!
//! Each index is a "directory" of objects under `<prefix><sanitized key>/`;
//! the state lives in `state.json` inside it. Requests go straight to the
//! S3 REST API with AWS Signature V4 authentication, so any S3-compatible
//! service (MinIO, LocalStack) works via `endpoint_url`.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! type = "s3"
//! bucket = "acme-indexes"
//! prefix = "context-connectors/"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (for temporary credentials / IAM roles)
//!
//! # Listing
//!
//! [`Store::list`] uses `ListObjectsV2` with `delimiter=/` and derives keys
//! from `CommonPrefixes`, following `NextContinuationToken` until the
//! listing is exhausted.

use std::fmt;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{sanitize_key, Store, STATE_FILE};
use crate::config::S3StoreConfig;
use crate::http::{ensure_success, is_not_found, uri_encode, uri_encode_path};
use crate::models::IndexState;

type HmacSha256 = Hmac<Sha256>;

// ============ AWS Credentials ============

/// AWS credentials. `Debug` output is redacted.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============ Store ============

pub struct S3Store {
    config: S3StoreConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Store {
    pub fn new(config: S3StoreConfig, creds: AwsCredentials) -> Self {
        Self {
            config,
            creds,
            client: reqwest::Client::new(),
        }
    }

    fn object_key(&self, key: &str) -> Result<String> {
        Ok(format!(
            "{}{}/{}",
            self.config.prefix,
            sanitize_key(key)?,
            STATE_FILE
        ))
    }

    /// Base URL (scheme + host) and canonical URI for an object key.
    ///
    /// Custom endpoints use path-style addressing; AWS uses virtual-hosted.
    fn locate(&self, object_key: &str) -> (String, String) {
        let encoded = uri_encode_path(object_key);
        match &self.config.endpoint_url {
            Some(endpoint) => (
                endpoint.trim_end_matches('/').to_string(),
                format!("/{}/{}", self.config.bucket, encoded),
            ),
            None => (
                format!(
                    "https://{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                format!("/{}", encoded),
            ),
        }
    }

    /// Send a SigV4-signed request.
    async fn send(
        &self,
        method: Method,
        object_key: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let (base, canonical_uri) = self.locate(object_key);
        let host = base
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();

        let mut sorted_params = query.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload = body.unwrap_or_default();
        let payload_hash = hex_sha256(&payload);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = if canonical_querystring.is_empty() {
            format!("{}{}", base, canonical_uri)
        } else {
            format!("{}{}?{}", base, canonical_uri, canonical_querystring)
        };

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !payload.is_empty() {
            req = req.header("content-type", "application/json").body(payload);
        }

        req.send()
            .await
            .with_context(|| format!("S3 request to s3://{}/{} failed", self.config.bucket, object_key))
    }
}

#[async_trait]
impl Store for S3Store {
    async fn load(&self, key: &str) -> Result<Option<IndexState>> {
        let object_key = self.object_key(key)?;
        let resp = self.send(Method::GET, &object_key, &[], None).await?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        let resp = ensure_success(resp, "S3 GetObject").await?;
        let bytes = resp.bytes().await?;
        let state = serde_json::from_slice(&bytes)
            .with_context(|| format!("Malformed index state at s3://{}/{}", self.config.bucket, object_key))?;
        Ok(Some(state))
    }

    async fn save(&self, key: &str, state: &IndexState) -> Result<()> {
        let object_key = self.object_key(key)?;
        let body = serde_json::to_vec_pretty(state)?;
        let resp = self.send(Method::PUT, &object_key, &[], Some(body)).await?;
        ensure_success(resp, "S3 PutObject").await?;
        debug!(key, object_key, "saved index state");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object_key = self.object_key(key)?;
        let resp = self.send(Method::DELETE, &object_key, &[], None).await?;
        if is_not_found(resp.status()) {
            return Ok(());
        }
        ensure_success(resp, "S3 DeleteObject").await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("delimiter".to_string(), "/".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.config.prefix.is_empty() {
                query.push(("prefix".to_string(), self.config.prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.send(Method::GET, "", &query, None).await?;
            let resp = ensure_success(resp, "S3 ListObjectsV2").await?;
            let xml = resp.text().await?;

            for prefix in parse_common_prefixes(&xml) {
                let name = prefix
                    .strip_prefix(&self.config.prefix)
                    .unwrap_or(&prefix)
                    .trim_end_matches('/');
                if !name.is_empty() {
                    keys.push(name.to_string());
                }
            }

            let is_truncated = extract_xml_value(&xml, "IsTruncated")
                .map(|v| v == "true")
                .unwrap_or(false);
            if !is_truncated {
                break;
            }
            continuation_token = extract_xml_value(&xml, "NextContinuationToken");
            if continuation_token.is_none() {
                bail!("S3 listing truncated without a continuation token");
            }
        }

        keys.sort();
        Ok(keys)
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

// ============ XML Parsing (minimal) ============

/// Collect every `<Prefix>` inside `<CommonPrefixes>` blocks.
fn parse_common_prefixes(xml: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<CommonPrefixes>") {
        let block_start = start + "<CommonPrefixes>".len();
        let Some(end) = remaining[block_start..].find("</CommonPrefixes>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(prefix) = extract_xml_value(block, "Prefix") {
            prefixes.push(prefix);
        }
        remaining = &remaining[block_start + end + "</CommonPrefixes>".len()..];
    }
    prefixes
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}
