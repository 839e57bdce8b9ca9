use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

use crate::domain::{SignedHeaders, StoreCredentials};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const REQUEST_TYPE: &str = "aws4_request";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SIGNED_HEADER_LIST: &str = "content-type;host;x-amz-content-sha256;x-amz-date";
const CONTENT_TYPE: &str = "text/csv";

/// Unreserved characters stay literal in a canonical path segment;
/// everything else is percent-encoded. Slashes separate segments and are
/// never encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Produces the header set authorizing a single PUT of an object under the
/// configured bucket and region. Pure: the same credentials, key and
/// instant always yield the same headers. Nothing is cached; callers sign
/// per request.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: StoreCredentials,
}

impl RequestSigner {
    pub fn new(credentials: StoreCredentials) -> Self {
        Self { credentials }
    }

    pub fn sign(&self, key: &str, now: DateTime<Utc>) -> SignedHeaders {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_request = self.canonical_request(key, &amz_date);
        let request_digest = hex::encode(Sha256::digest(canonical_request.as_bytes()));

        let credential_scope = format!(
            "{}/{}/{}/{}",
            date_stamp, self.credentials.region, SERVICE, REQUEST_TYPE
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, amz_date, credential_scope, request_digest
        );

        let signing_key = self.signing_key(&date_stamp);
        let signature = hex::encode(hmac_bytes(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, credential_scope, SIGNED_HEADER_LIST, signature
        );

        SignedHeaders {
            authorization,
            content_type: CONTENT_TYPE.to_string(),
            content_sha256: UNSIGNED_PAYLOAD.to_string(),
            amz_date,
        }
    }

    fn host(&self) -> String {
        format!(
            "{}.s3.{}.amazonaws.com",
            self.credentials.bucket, self.credentials.region
        )
    }

    /// Field order and byte layout must match the store's canonical form
    /// exactly; any deviation produces a signature mismatch.
    fn canonical_request(&self, key: &str, amz_date: &str) -> String {
        format!(
            "PUT\n/{}\n\ncontent-type:{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            encode_key_path(key),
            CONTENT_TYPE,
            self.host(),
            UNSIGNED_PAYLOAD,
            amz_date,
            SIGNED_HEADER_LIST,
            UNSIGNED_PAYLOAD,
        )
    }

    /// Four chained HMAC operations seeded with `"AWS4" + secret`, folded
    /// with date, region, service and request type.
    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let seed = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_bytes(seed.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_bytes(&k_date, self.credentials.region.as_bytes());
        let k_service = hmac_bytes(&k_region, SERVICE.as_bytes());
        hmac_bytes(&k_service, REQUEST_TYPE.as_bytes())
    }
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
