//! AWS Signature Version 4 signing for outgoing backend requests.
//!
//! Only bodiless requests (`GET`, `HEAD`) are signed, so the payload hash is
//! always the SHA-256 of the empty string.
//!
//! ```text
//! StringToSign = "AWS4-HMAC-SHA256\n" + timestamp + "\n" + scope + "\n" + hex(sha256(canonical))
//! Signature    = hex(HMAC(SigningKey, StringToSign))
//! ```

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::canonical::{build_canonical_request, build_signed_headers_string};
use crate::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty payload, as sent in `x-amz-content-sha256`.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything besides the request itself that goes into a signature.
#[derive(Debug, Clone, Copy)]
pub struct SigningParams<'a> {
    /// Key pair to sign with.
    pub credentials: &'a Credentials,
    /// Region of the bucket.
    pub region: &'a str,
    /// Service name, `s3` for object storage.
    pub service: &'a str,
    /// Request time; must be close to the backend's clock.
    pub timestamp: DateTime<Utc>,
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// `x-amz-date` value (`YYYYMMDD'T'HHMMSS'Z'`).
    pub amz_date: String,
    /// `x-amz-content-sha256` value.
    pub content_sha256: String,
    /// `Authorization` value.
    pub authorization: String,
}

impl SignedHeaders {
    /// The headers as `(name, value)` pairs.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("x-amz-date", self.amz_date.as_str()),
            ("x-amz-content-sha256", self.content_sha256.as_str()),
            ("authorization", self.authorization.as_str()),
        ]
    }
}

/// Sign a bodiless request.
///
/// `canonical_uri` is the already-encoded path (see
/// [`encode_uri_path`](crate::canonical::encode_uri_path)). `headers` are the
/// extra headers that will be sent and signed, such as `range`; `host`,
/// `x-amz-date` and `x-amz-content-sha256` are added here.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use s3proxy_auth::{Credentials, SigningParams, sign_request};
///
/// let creds = Credentials::new("AKID", "secret");
/// let params = SigningParams {
///     credentials: &creds,
///     region: "us-east-1",
///     service: "s3",
///     timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
/// };
/// let signed = sign_request("HEAD", "localhost:9000", "/bucket/key", &[], &params);
/// assert_eq!(signed.amz_date, "20240102T030405Z");
/// assert!(signed.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKID/20240102/"));
/// ```
#[must_use]
pub fn sign_request(
    method: &str,
    host: &str,
    canonical_uri: &str,
    headers: &[(&str, &str)],
    params: &SigningParams<'_>,
) -> SignedHeaders {
    let amz_date = params.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.timestamp.format("%Y%m%d").to_string();

    let mut all_headers: Vec<(&str, &str)> = Vec::with_capacity(headers.len() + 3);
    all_headers.push(("host", host));
    all_headers.extend_from_slice(headers);
    all_headers.push(("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256));
    all_headers.push(("x-amz-date", amz_date.as_str()));

    let lowered: Vec<String> = all_headers.iter().map(|(k, _)| k.to_lowercase()).collect();
    let mut signed: Vec<&str> = lowered.iter().map(String::as_str).collect();
    signed.sort_unstable();
    signed.dedup();

    let canonical_request = build_canonical_request(
        method,
        canonical_uri,
        &all_headers,
        &signed,
        EMPTY_PAYLOAD_SHA256,
    );
    trace!(canonical_request = %canonical_request, "built canonical request");

    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign = build_string_to_sign(&amz_date, &scope, &canonical_hash);
    let signing_key = derive_signing_key(
        params.credentials.secret_key(),
        &date,
        params.region,
        params.service,
    );
    let signature = compute_signature(&signing_key, &string_to_sign);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope},SignedHeaders={},Signature={signature}",
        params.credentials.access_key(),
        build_signed_headers_string(&signed),
    );

    SignedHeaders {
        amz_date,
        content_sha256: EMPTY_PAYLOAD_SHA256.to_owned(),
        authorization,
    }
}

/// Build the string to sign from its three variable parts.
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key using the HMAC-SHA256 chain.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

/// Hex-encoded HMAC-SHA256 of `data` under `signing_key`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
