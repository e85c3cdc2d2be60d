//! Presigned upload-part URLs
//!
//! A URL grants one `PUT` of one part of one upload until it expires. The
//! canonical request covers the method, the object path, every query
//! parameter and the expiry, and is signed with Ed25519.

use async_trait::async_trait;
use ed25519_dalek::Signature;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{constant_time_key_id_compare, KeyId, KeyPair};
use crate::{ObjectKey, PartNumber, Result, UploadError, UploadId};

/// Path prefix under which part uploads are accepted
pub const PARTS_PATH_PREFIX: &str = "/parts/";

/// The single part a permission is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTarget {
    pub key: ObjectKey,
    pub upload_id: UploadId,
    pub part_number: PartNumber,
}

/// Issues short-lived write permissions for individual parts
#[async_trait]
pub trait PartUrlSigner: Send + Sync {
    /// Produce a URL authorizing a single upload of `target`, valid for `expires_in`
    async fn presign_upload_part(
        &self,
        target: &PartTarget,
        expires_in: Duration,
    ) -> Result<String>;
}

/// Signs and verifies part URLs with a local Ed25519 key
#[derive(Debug, Clone)]
pub struct Ed25519UrlSigner {
    keypair: KeyPair,
    base_url: String,
}

impl Ed25519UrlSigner {
    /// `base_url` is the public origin part uploads are sent to
    pub fn new(keypair: KeyPair, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ed25519UrlSigner { keypair, base_url }
    }

    pub fn key_id(&self) -> KeyId {
        self.keypair.key_id()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign a URL for `target` that expires at `expires_at` (unix seconds)
    pub fn sign_until(&self, target: &PartTarget, expires_at: u64) -> String {
        let key_id = self.keypair.key_id();
        let canonical = canonical_string(
            &target.key,
            &target.upload_id,
            target.part_number,
            expires_at,
            &key_id,
        );
        let signature = self.keypair.sign(canonical.as_bytes());

        format!(
            "{}{}?{}&signature={}",
            self.base_url,
            part_path(&target.key),
            canonical_query(&target.upload_id, target.part_number, expires_at, &key_id),
            crate::hex::encode(signature.to_bytes())
        )
    }

    /// Verify a grant against the current time
    pub fn verify(&self, grant: &PartGrant) -> Result<()> {
        self.verify_at(grant, unix_now()?)
    }

    /// Verify a grant as of `now` (unix seconds)
    pub fn verify_at(&self, grant: &PartGrant, now: u64) -> Result<()> {
        if now > grant.expires_at {
            return Err(UploadError::PermissionDenied("presigned URL expired".to_string()));
        }

        if !constant_time_key_id_compare(&grant.key_id, &self.keypair.key_id()) {
            return Err(UploadError::PermissionDenied("unknown signing key".to_string()));
        }

        let signature_bytes: [u8; 64] = crate::hex::decode(&grant.signature)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| UploadError::PermissionDenied("malformed signature".to_string()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        let canonical = canonical_string(
            &grant.key,
            &grant.upload_id,
            grant.part_number,
            grant.expires_at,
            &grant.key_id,
        );
        self.keypair.verify(canonical.as_bytes(), &signature)
    }
}

#[async_trait]
impl PartUrlSigner for Ed25519UrlSigner {
    async fn presign_upload_part(
        &self,
        target: &PartTarget,
        expires_in: Duration,
    ) -> Result<String> {
        let expires_at = unix_now()?
            .checked_add(expires_in.as_secs())
            .ok_or_else(|| UploadError::Signing("expiry overflows".to_string()))?;
        Ok(self.sign_until(target, expires_at))
    }
}

/// The permission carried by an inbound part upload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartGrant {
    pub key: ObjectKey,
    pub upload_id: UploadId,
    pub part_number: PartNumber,
    pub expires_at: u64,
    pub key_id: KeyId,
    pub signature: String,
}

impl PartGrant {
    /// Parse the path and query of a presigned `PUT`
    pub fn from_request(path: &str, query: Option<&str>) -> Result<Self> {
        let encoded_key = path
            .strip_prefix(PARTS_PATH_PREFIX)
            .ok_or_else(|| UploadError::MissingInput("part upload path".to_string()))?;
        let key = uri_decode(encoded_key)
            .ok_or_else(|| UploadError::MissingInput("key encoding".to_string()))?;
        let key = ObjectKey::new(&key)?;

        let params = parse_query(query.unwrap_or(""))?;
        let field = |name: &str| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| UploadError::MissingInput(name.to_string()))
        };
        let number = |name: &str| -> Result<u64> {
            field(name)?
                .parse()
                .map_err(|_| UploadError::MissingInput(format!("{} must be a number", name)))
        };

        let part_number = u32::try_from(number("partNumber")?)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| UploadError::MissingInput("partNumber out of range".to_string()))?;

        Ok(PartGrant {
            key,
            upload_id: UploadId::new(&field("uploadId")?)?,
            part_number,
            expires_at: number("expires")?,
            key_id: KeyId::from_string(field("keyId")?),
            signature: field("signature")?,
        })
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| UploadError::Signing(format!("system clock before epoch: {}", e)))
}

fn part_path(key: &ObjectKey) -> String {
    format!("{}{}", PARTS_PATH_PREFIX, uri_encode(key.as_str()))
}

fn canonical_query(
    upload_id: &UploadId,
    part_number: PartNumber,
    expires_at: u64,
    key_id: &KeyId,
) -> String {
    let mut params = BTreeMap::new();
    params.insert("expires", expires_at.to_string());
    params.insert("keyId", key_id.to_string());
    params.insert("partNumber", part_number.to_string());
    params.insert("uploadId", upload_id.to_string());

    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_string(
    key: &ObjectKey,
    upload_id: &UploadId,
    part_number: PartNumber,
    expires_at: u64,
    key_id: &KeyId,
) -> String {
    let mut canonical = String::new();
    canonical.push_str("PUT\n");
    canonical.push_str(&part_path(key));
    canonical.push('\n');
    canonical.push_str(&canonical_query(upload_id, part_number, expires_at, key_id));
    canonical.push('\n');
    canonical.push_str("UNSIGNED-PAYLOAD");
    canonical
}

fn parse_query(query: &str) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = uri_decode(name)
            .ok_or_else(|| UploadError::MissingInput("query encoding".to_string()))?;
        let value = uri_decode(value)
            .ok_or_else(|| UploadError::MissingInput("query encoding".to_string()))?;
        params.insert(name, value);
    }
    Ok(params)
}

/// URI encode function (RFC 3986)
pub fn uri_encode(input: &str) -> String {
    let mut result = String::new();
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Reverse of [`uri_encode`]; None on malformed escapes or non UTF-8 output
pub fn uri_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(key: &str, part_number: PartNumber) -> PartTarget {
        PartTarget {
            key: ObjectKey::new(key).unwrap(),
            upload_id: UploadId::new("upload-1").unwrap(),
            part_number,
        }
    }

    fn grant_from_url(url: &str) -> PartGrant {
        let rest = url.strip_prefix("http://store.test").unwrap();
        let (path, query) = rest.split_once('?').unwrap();
        PartGrant::from_request(path, Some(query)).unwrap()
    }

    #[test]
    fn signed_url_verifies() {
        let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://store.test/");
        let url = signer.sign_until(&target("videos/my clip.mp4", 3), 1_000);

        assert!(url.starts_with("http://store.test/parts/videos%2Fmy%20clip.mp4?"));
        let grant = grant_from_url(&url);
        assert_eq!(grant.key.as_str(), "videos/my clip.mp4");
        assert_eq!(grant.part_number, 3);
        assert!(signer.verify_at(&grant, 999).is_ok());
    }

    #[test]
    fn expired_url_is_rejected() {
        let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://store.test");
        let grant = grant_from_url(&signer.sign_until(&target("k", 1), 1_000));

        let err = signer.verify_at(&grant, 1_001).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PermissionDenied);
    }

    #[test]
    fn url_is_bound_to_its_part() {
        let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://store.test");
        let mut grant = grant_from_url(&signer.sign_until(&target("k", 1), 1_000));

        grant.part_number = 2;
        assert!(signer.verify_at(&grant, 0).is_err());
    }

    #[test]
    fn url_from_another_key_is_rejected() {
        let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://store.test");
        let other = Ed25519UrlSigner::new(KeyPair::generate(), "http://store.test");
        let grant = grant_from_url(&other.sign_until(&target("k", 1), 1_000));

        assert!(signer.verify_at(&grant, 0).is_err());
    }

    #[test]
    fn url_carries_no_key_material() {
        let keypair = KeyPair::generate();
        let secret = keypair.signing_key_hex();
        let signer = Ed25519UrlSigner::new(keypair, "http://store.test");

        let url = signer.sign_until(&target("k", 1), 1_000);
        assert!(!url.contains(&secret));
        assert!(url.contains(&format!("keyId={}", signer.key_id())));
    }

    #[test]
    fn malformed_requests_are_missing_input() {
        assert!(PartGrant::from_request("/objects/k", Some("")).is_err());
        let err = PartGrant::from_request("/parts/k", Some("uploadId=u&partNumber=0")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingInput);
        let err = PartGrant::from_request("/parts/k", None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingInput);
    }

    #[tokio::test]
    async fn presign_sets_future_expiry() {
        let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://store.test");
        let url = signer
            .presign_upload_part(&target("k", 9), Duration::from_secs(60))
            .await
            .unwrap();

        let grant = grant_from_url(&url);
        assert!(signer.verify(&grant).is_ok());
        assert!(signer.verify_at(&grant, grant.expires_at + 1).is_err());
    }

    #[test]
    fn uri_codec_roundtrip() {
        let raw = "a b/ü?&=%";
        assert_eq!(uri_decode(&uri_encode(raw)).as_deref(), Some(raw));
        assert_eq!(uri_decode("%zz"), None);
        assert_eq!(uri_decode("%4"), None);
    }
}
