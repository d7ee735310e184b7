//! HTTP Signatures for ActivityPub
//!
//! Parses the `Signature` header and rebuilds the exact signing string per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! The signing string must be byte-identical to what the sender signed, so
//! reconstruction is kept free of any normalization beyond what the
//! draft-cavage format prescribes (lowercased names, trimmed values).

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use http::HeaderMap;
use sha2::{Digest, Sha256};
use url::Url;

use super::crypto::CryptoProvider;
use crate::error::AppError;

/// Pseudo-header carrying the lowercased method and the path.
pub const REQUEST_TARGET: &str = "(request-target)";

/// The parts of an inbound request that a signature can cover.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    /// HTTP method (any case)
    pub method: &'a str,
    /// Path including the query string, e.g. `/inbox?x=1`
    pub path_and_query: &'a str,
    pub headers: &'a HeaderMap,
}

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: Url,
    /// Algorithm (usually rsa-sha256 or hs2019)
    pub algorithm: String,
    /// Signed header names, lowercased, in signing order
    pub signed_headers: Vec<String>,
    /// Reconstructed string the sender signed
    pub signing_string: String,
    /// Base64-encoded signature
    pub signature: String,
}

impl ParsedSignature {
    /// Whether `name` (case-insensitive) is covered by the signature.
    pub fn covers(&self, name: &str) -> bool {
        self.signed_headers
            .iter()
            .any(|signed| signed.eq_ignore_ascii_case(name))
    }
}

fn malformed(reason: impl Into<String>) -> AppError {
    AppError::MalformedSignatureHeader(reason.into())
}

/// Parse a Signature header value against the request it arrived on.
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// All four fields are mandatory; their order is not significant.
/// Unknown fields are ignored except `created`/`expires`, which back the
/// `(created)`/`(expires)` pseudo-headers.
pub fn parse_signature(
    raw_header_value: &str,
    request: SignedRequest<'_>,
) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;
    let mut created = None;
    let mut expires = None;

    for (name, value) in split_fields(raw_header_value)? {
        let slot = match name {
            "keyId" => &mut key_id,
            "algorithm" => &mut algorithm,
            "headers" => &mut headers,
            "signature" => &mut signature,
            "created" => &mut created,
            "expires" => &mut expires,
            _ => continue,
        };

        if slot.replace(value).is_some() {
            return Err(malformed(format!("duplicate field: {}", name)));
        }
    }

    let key_id = key_id.ok_or_else(|| malformed("missing keyId"))?;
    let algorithm = algorithm.ok_or_else(|| malformed("missing algorithm"))?;
    let headers = headers.ok_or_else(|| malformed("missing headers"))?;
    let signature = signature.ok_or_else(|| malformed("missing signature"))?;

    let key_id = Url::parse(key_id).map_err(|e| malformed(format!("invalid keyId: {}", e)))?;
    if !matches!(key_id.scheme(), "http" | "https") {
        return Err(malformed(format!(
            "keyId must be an http(s) URI, got scheme {}",
            key_id.scheme()
        )));
    }

    if signature.trim().is_empty() {
        return Err(malformed("empty signature"));
    }

    let signed_headers: Vec<String> = headers
        .split_whitespace()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    if signed_headers.is_empty() {
        return Err(malformed("headers lists no header names"));
    }

    let pseudo = PseudoHeaders { created, expires };
    let signing_string = build_signing_string(&signed_headers, request, &pseudo)?;

    Ok(ParsedSignature {
        key_id,
        algorithm: algorithm.to_string(),
        signed_headers,
        signing_string,
        signature: signature.to_string(),
    })
}

/// Values for the `(created)` and `(expires)` pseudo-headers.
#[derive(Debug, Default)]
struct PseudoHeaders<'a> {
    created: Option<&'a str>,
    expires: Option<&'a str>,
}

/// Split `name=value` pairs; values may be quoted (quotes are stripped).
///
/// Commas inside quoted values do not separate fields.
fn split_fields(raw: &str) -> Result<Vec<(&str, &str)>, AppError> {
    let mut fields = Vec::new();
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let (name, after_name) = rest
            .split_once('=')
            .ok_or_else(|| malformed("expected name=value"))?;
        let name = name.trim();
        if name.is_empty() || name.contains(|c: char| c == ',' || c == '"' || c.is_whitespace()) {
            return Err(malformed(format!("invalid field name: {:?}", name)));
        }

        let after_name = after_name.trim_start();
        let (value, remainder) = if let Some(quoted) = after_name.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| malformed("unterminated quoted value"))?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after_name.find(',') {
                Some(end) => (after_name[..end].trim_end(), &after_name[end..]),
                None => (after_name.trim_end(), ""),
            }
        };

        fields.push((name, value));

        let remainder = remainder.trim_start();
        rest = match remainder.strip_prefix(',') {
            Some(next) => next.trim_start(),
            None if remainder.is_empty() => "",
            None => return Err(malformed("expected ',' between fields")),
        };
    }

    Ok(fields)
}

/// Rebuild the signing string for `signed_headers`, in order.
fn build_signing_string(
    signed_headers: &[String],
    request: SignedRequest<'_>,
    pseudo: &PseudoHeaders<'_>,
) -> Result<String, AppError> {
    let mut lines = Vec::with_capacity(signed_headers.len());

    for name in signed_headers {
        let value = match name.as_str() {
            REQUEST_TARGET => format!(
                "{} {}",
                request.method.to_ascii_lowercase(),
                request.path_and_query
            ),
            "(created)" => pseudo
                .created
                .ok_or_else(|| malformed("(created) signed without created field"))?
                .to_string(),
            "(expires)" => pseudo
                .expires
                .ok_or_else(|| malformed("(expires) signed without expires field"))?
                .to_string(),
            _ => header_value(request.headers, name)?,
        };

        lines.push(format!("{}: {}", name, value));
    }

    Ok(lines.join("\n"))
}

/// All values of `name`, trimmed and joined with `", "`.
fn header_value(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        let value = value
            .to_str()
            .map_err(|_| malformed(format!("non-ASCII value in signed header {}", name)))?;
        values.push(value.trim());
    }

    if values.is_empty() {
        return Err(malformed(format!("signed header missing from request: {}", name)));
    }

    Ok(values.join(", "))
}

/// Read and parse the Signature header of a request.
pub fn signature_from_request(request: SignedRequest<'_>) -> Result<ParsedSignature, AppError> {
    let header = request
        .headers
        .get("signature")
        .ok_or_else(|| malformed("missing Signature header"))?
        .to_str()
        .map_err(|_| malformed("Signature header is not ASCII"))?;

    parse_signature(header, request)
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Check a `Digest` header against the body.
///
/// The header may list several algorithms; the SHA-256 entry must match.
pub fn digest_matches(digest_header: &str, body: &[u8]) -> bool {
    let expected = generate_digest(body);
    let expected_value = &expected["SHA-256=".len()..];

    digest_header.split(',').any(|entry| {
        entry
            .trim()
            .split_once('=')
            .is_some_and(|(algorithm, value)| {
                algorithm.eq_ignore_ascii_case("sha-256") && value == expected_value
            })
    })
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Host header value the signature covers
    pub host: String,
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an HTTP request
///
/// Creates HTTP Signature header for outgoing requests over
/// `(request-target) host date [digest]`.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
/// * `crypto` - Signing capability
///
/// # Example
/// ```ignore
/// let headers = sign_request(
///     "POST",
///     "https://remote.server/inbox",
///     Some(&body),
///     &private_key,
///     "https://my.server/ap/users/me#main-key",
///     &RsaCrypto,
/// )?;
/// ```
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
    crypto: &dyn CryptoProvider,
) -> Result<SignatureHeaders, AppError> {
    let date = chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    sign_request_at(method, url, body, private_key_pem, key_id, &date, crypto)
}

/// [`sign_request`] with an explicit Date header value.
pub fn sign_request_at(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
    date: &str,
    crypto: &dyn CryptoProvider,
) -> Result<SignatureHeaders, AppError> {
    // 1. Parse URL to get host and path
    let parsed_url =
        Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;
    let host = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    // 2. Generate Digest if body present
    let digest = body.map(generate_digest);

    // 3. Build signing string
    let mut signing_parts = vec![
        format!(
            "{}: {} {}",
            REQUEST_TARGET,
            method.to_ascii_lowercase(),
            path_and_query
        ),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec![REQUEST_TARGET, "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    // 4. Sign with RSA-SHA256
    let signature = crypto.sign(private_key_pem, signing_string.as_bytes())?;

    // 5. Build Signature header
    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        BASE64.encode(signature)
    );

    Ok(SignatureHeaders {
        host,
        signature: signature_header,
        date: date.to_string(),
        digest,
    })
}
