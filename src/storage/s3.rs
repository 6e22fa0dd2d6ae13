//! S3-compatible object storage (Garage, `MinIO`, AWS) with Signature V4

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use url::Url;

use super::DocumentStore;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Default request timeout for object storage calls
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL, e.g. `http://localhost:3900`
    pub endpoint: String,
    /// Bucket name (addressed path-style)
    pub bucket: String,
    /// Signing region (`garage` for Garage)
    pub region: String,
    /// Access key id
    pub access_key: String,
    /// Secret access key
    pub secret_key: SecretString,
}

/// Document store on an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Store {
    client: reqwest::Client,
    endpoint: Url,
    config: S3Config,
}

impl S3Store {
    /// Create a store for the configured bucket
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a valid URL or the bucket is empty
    pub fn new(config: S3Config) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| {
                Error::Config(format!("invalid storage endpoint {}: {e}", config.endpoint))
            })?;
        if endpoint.host_str().is_none() {
            return Err(Error::Config(format!("storage endpoint has no host: {}", config.endpoint)));
        }
        if config.bucket.is_empty() {
            return Err(Error::Config("storage bucket required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    /// Host header value, including a non-default port
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Canonical (encoded) path of an object
    fn object_path(&self, key: &str) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        let key_path = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("{base}/{}/{key_path}", uri_encode(&self.config.bucket))
    }

    /// Build a signed request for `method` on `key`
    fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> reqwest::RequestBuilder {
        let path = self.object_path(key);
        let host = self.host();
        let payload_hash = hex::encode(Sha256::digest(&body));
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let authorization = authorization_header(&SigningInput {
            method: method.as_str(),
            path: &path,
            host: &host,
            payload_hash: &payload_hash,
            amz_date: &amz_date,
            region: &self.config.region,
            access_key: &self.config.access_key,
            secret_key: self.config.secret_key.expose_secret(),
        });

        let url = format!(
            "{}://{host}{path}",
            self.endpoint.scheme()
        );

        self.client
            .request(method, url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization)
            .body(body)
    }
}

#[async_trait]
impl DocumentStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .signed_request(reqwest::Method::GET, key, Vec::new(), Utc::now())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("GET {key} failed with {status}: {body}")));
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .signed_request(reqwest::Method::PUT, key, body, Utc::now())
            .header("content-type", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("PUT {key} failed with {status}: {body}")));
        }

        tracing::debug!(key, bucket = %self.config.bucket, "document stored");
        Ok(())
    }
}

/// Everything that goes into a Signature V4 `Authorization` header
struct SigningInput<'a> {
    method: &'a str,
    path: &'a str,
    host: &'a str,
    payload_hash: &'a str,
    amz_date: &'a str,
    region: &'a str,
    access_key: &'a str,
    secret_key: &'a str,
}

const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

fn authorization_header(input: &SigningInput<'_>) -> String {
    let date = &input.amz_date[..8];
    let scope = format!("{date}/{}/s3/aws4_request", input.region);

    let canonical_request = format!(
        "{}\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{SIGNED_HEADERS}\n{}",
        input.method, input.path, input.host, input.payload_hash, input.amz_date, input.payload_hash
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
        input.amz_date,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(input.secret_key, date, input.region, "s3");
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, \
         SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        input.access_key
    )
}

/// Derive the Signature V4 signing key for a date/region/service scope
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).unwrap_or_else(|_| unreachable!());
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode a path segment per RFC 3986 unreserved set
fn uri_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> S3Store {
        S3Store::new(S3Config {
            endpoint: endpoint.to_string(),
            bucket: "voice-commands".to_string(),
            region: "garage".to_string(),
            access_key: "GK123".to_string(),
            secret_key: SecretString::from("secret".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn test_signing_key_matches_aws_reference() {
        // Reference vector from the AWS Signature V4 documentation
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("tool_cache.json"), "tool_cache.json");
        assert_eq!(uri_encode("a b+c"), "a%20b%2Bc");
        assert_eq!(uri_encode("küche"), "k%C3%BCche");
    }

    #[test]
    fn test_host_keeps_custom_port() {
        assert_eq!(store("http://localhost:3900").host(), "localhost:3900");
        assert_eq!(store("https://s3.example.com").host(), "s3.example.com");
    }

    #[test]
    fn test_object_path_is_path_style() {
        assert_eq!(
            store("http://localhost:3900").object_path("routes.json"),
            "/voice-commands/routes.json"
        );
        assert_eq!(
            store("http://localhost:3900/storage/").object_path("routes.json"),
            "/storage/voice-commands/routes.json"
        );
    }

    #[test]
    fn test_authorization_header_shape() {
        let header = authorization_header(&SigningInput {
            method: "GET",
            path: "/voice-commands/routes.json",
            host: "localhost:3900",
            payload_hash: &hex::encode(Sha256::digest(b"")),
            amz_date: "20240101T120000Z",
            region: "garage",
            access_key: "GK123",
            secret_key: "secret",
        });

        assert!(header.starts_with(
            "AWS4-HMAC-SHA256 Credential=GK123/20240101/garage/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        let signature = header.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = S3Store::new(S3Config {
            endpoint: "not a url".to_string(),
            bucket: "b".to_string(),
            region: "garage".to_string(),
            access_key: String::new(),
            secret_key: SecretString::from(String::new()),
        });
        assert!(result.is_err());
    }
}
