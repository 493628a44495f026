//! HTTP Signatures
//!
//! Outgoing deliveries are signed with the sending user's key; incoming
//! inbox posts are verified against the key published on the remote
//! actor document. Uses the draft-cavage scheme with RSA-SHA256, which
//! is what other fediverse software expects.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Maximum clock skew accepted on the Date header
const MAX_DATE_SKEW_SECS: i64 = 300;

/// Key material and identity used to sign outgoing requests
#[derive(Debug, Clone)]
pub struct SigningActor {
    /// Actor URI, used as the activity's `actor`
    pub actor_uri: String,
    /// `{actor_uri}#main-key`
    pub key_id: String,
    pub private_key_pem: String,
}

/// PEM-encoded RSA key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key_pem: String,
    pub public_key_pem: String,
}

/// Generate an RSA key pair for a local user
///
/// Runs on the blocking pool since large keys take a while.
pub async fn generate_key_pair(bits: usize) -> Result<KeyPair, AppError> {
    tokio::task::spawn_blocking(move || {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("key generation failed: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("private key encoding: {e}")))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("public key encoding: {e}")))?;

        Ok(KeyPair {
            private_key_pem,
            public_key_pem,
        })
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub signature: String,
    /// RFC 2616 date
    pub date: String,
    pub digest: Option<String>,
}

/// Sign an HTTP request
///
/// Signs `(request-target)`, `host` and `date`, plus `digest` when a body
/// is present.
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    signer: &SigningActor,
) -> Result<SignatureHeaders, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(AppError::Validation("Missing host in URL".to_string())),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let digest = body.map(generate_digest);

    let mut signing_parts = vec![
        format!("(request-target): {} {}", method.to_lowercase(), path_and_query),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    let private_key = RsaPrivateKey::from_pkcs8_pem(&signer.private_key_pem)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid private key: {e}")))?;
    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());

    Ok(SignatureHeaders {
        signature: format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            signer.key_id,
            headers_list.join(" "),
            BASE64.encode(signature.to_bytes())
        ),
        date,
        digest,
    })
}

/// Verify an HTTP request signature
///
/// `path` is the request path including any query string.
///
/// # Errors
/// - `Validation` when required headers are missing or malformed
/// - `InvalidSignature` when the digest or signature does not match
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<(), AppError> {
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;

    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::Validation(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::Validation(format!(
                "Signed headers must include: {}",
                required
            )));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(AppError::Validation(
            "Signed headers must include: digest".to_string(),
        ));
    }

    let date = DateTime::parse_from_rfc2822(header_str(headers, "date")?)
        .map_err(|_| AppError::Validation("Invalid Date format".to_string()))?;
    if (Utc::now().timestamp() - date.timestamp()).abs() > MAX_DATE_SKEW_SECS {
        return Err(AppError::Validation(
            "Date header too old or in future".to_string(),
        ));
    }

    if let Some(body_data) = body {
        if header_str(headers, "digest")? != generate_digest(body_data) {
            return Err(AppError::InvalidSignature);
        }
    }

    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            "host" | "date" | "digest" | "content-type" => {
                header_str(headers, header_name)?.to_string()
            }
            _ => {
                return Err(AppError::Validation(format!(
                    "Unsupported header in signature: {}",
                    header_name
                )));
            }
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }
    let signing_string = signing_parts.join("\n");

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::Validation("Invalid signature encoding".to_string()))?;
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AppError::Federation(format!("Invalid public key: {}", e)))?;
    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key);
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| AppError::InvalidSignature)?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::InvalidSignature)
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::Validation(format!("Missing {} header", capitalize(name))))?
        .to_str()
        .map_err(|_| AppError::Validation(format!("Invalid {} header", capitalize(name))))
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// keyId from the Signature header
pub fn extract_signature_key_id(headers: &http::HeaderMap) -> Result<String, AppError> {
    Ok(parse_signature_header(header_str(headers, "signature")?)?.key_id)
}

/// Whether a keyId belongs to the given actor
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    pub key_id: String,
    pub algorithm: String,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse a Signature header value
///
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?,
        // Mastodon omits algorithm on some requests
        algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature
            .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?,
    })
}

/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    fn generate_test_keypair() -> KeyPair {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_key = RsaPublicKey::from(&private_key);

        KeyPair {
            private_key_pem: private_key
                .to_pkcs8_pem(LineEnding::LF)
                .expect("private key pem")
                .to_string(),
            public_key_pem: public_key
                .to_public_key_pem(LineEnding::LF)
                .expect("public key pem"),
        }
    }

    fn signer(keys: &KeyPair) -> SigningActor {
        SigningActor {
            actor_uri: "https://remote.example/user/rat".to_string(),
            key_id: "https://remote.example/user/rat#main-key".to_string(),
            private_key_pem: keys.private_key_pem.clone(),
        }
    }

    fn build_signed_header_map(
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        keys: &KeyPair,
    ) -> (HeaderMap, String) {
        let signed = sign_request(method, url, body, &signer(keys)).expect("signed");
        let parsed_url = url::Url::parse(url).expect("valid test url");
        let host = parsed_url.host_str().expect("host");
        let path = match parsed_url.query() {
            Some(query) => format!("{}?{}", parsed_url.path(), query),
            None => parsed_url.path().to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(host).expect("host header"));
        headers.insert(
            "date",
            HeaderValue::from_str(&signed.date).expect("date header"),
        );
        if let Some(digest) = signed.digest {
            headers.insert(
                "digest",
                HeaderValue::from_str(&digest).expect("digest header"),
            );
        }
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature header"),
        );

        (headers, path)
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let keys = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/user/mouse/inbox?foo=bar",
            Some(body),
            &keys,
        );

        let result = verify_signature("POST", &path, &headers, Some(body), &keys.public_key_pem);
        assert!(result.is_ok(), "valid signature should verify: {result:?}");
    }

    #[test]
    fn verify_signature_rejects_other_key() {
        let keys = generate_test_keypair();
        let other = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &keys,
        );

        assert!(matches!(
            verify_signature("POST", &path, &headers, Some(body), &other.public_key_pem),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_tampered_body() {
        let keys = generate_test_keypair();
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(br#"{"type":"Follow"}"#),
            &keys,
        );

        assert!(matches!(
            verify_signature(
                "POST",
                &path,
                &headers,
                Some(br#"{"type":"Block"}"#),
                &keys.public_key_pem
            ),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_missing_date_header() {
        let keys = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) =
            build_signed_header_map("POST", "https://local.example/inbox", Some(body), &keys);
        headers.remove("date");

        match verify_signature("POST", &path, &headers, Some(body), &keys.public_key_pem) {
            Err(AppError::Validation(msg)) => assert!(msg.contains("Missing Date header")),
            other => panic!("expected missing Date header error, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_rejects_when_date_not_in_signed_headers() {
        let keys = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) =
            build_signed_header_map("POST", "https://local.example/inbox", Some(body), &keys);

        let parsed = parse_signature_header(
            headers
                .get("signature")
                .expect("signature")
                .to_str()
                .expect("signature str"),
        )
        .expect("parsed signature");
        let tampered = format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"(request-target) host digest\",signature=\"{}\"",
            parsed.key_id, parsed.algorithm, parsed.signature
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&tampered).expect("tampered signature"),
        );

        match verify_signature("POST", &path, &headers, Some(body), &keys.public_key_pem) {
            Err(AppError::Validation(msg)) => {
                assert!(msg.contains("Signed headers must include: date"))
            }
            other => panic!("expected missing signed date error, got: {other:?}"),
        }
    }

    #[test]
    fn extract_signature_key_id_reads_key_id() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "signature",
            HeaderValue::from_static(
                "keyId=\"https://remote.example/user/rat#main-key\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date\",signature=\"ZmFrZQ==\"",
            ),
        );

        let key_id = extract_signature_key_id(&headers).expect("keyId should be parsed");
        assert_eq!(key_id, "https://remote.example/user/rat#main-key");
    }

    #[test]
    fn key_id_matches_actor_compares_without_fragment() {
        assert!(key_id_matches_actor(
            "https://remote.example/user/rat#main-key",
            "https://remote.example/user/rat",
        ));
        assert!(!key_id_matches_actor(
            "https://remote.example/user/nutria#main-key",
            "https://remote.example/user/rat",
        ));
    }

    #[test]
    fn digest_is_prefixed_base64_sha256() {
        assert_eq!(
            generate_digest(b""),
            "SHA-256=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[tokio::test]
    async fn generated_key_pair_signs_and_verifies() {
        let keys = generate_key_pair(1024).await.expect("keys");
        let (headers, path) =
            build_signed_header_map("GET", "https://local.example/user/mouse", None, &keys);
        assert!(verify_signature("GET", &path, &headers, None, &keys.public_key_pem).is_ok());
    }
}
