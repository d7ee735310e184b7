//! Signature verification
//!
//! RSASSA-PKCS1-v1.5 with SHA-256 over the raw signing string. The public
//! contract is a boolean; the reason for a `false` is reported separately
//! so anti-abuse tooling can tell a malformed request from a forged one.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use super::crypto::{CryptoProvider, ImportedKey};
use super::signature::ParsedSignature;
use crate::metrics::SIGNATURE_VERIFICATIONS_TOTAL;

/// Algorithm names that select RSASSA-PKCS1-v1.5/SHA-256 for an RSA key.
const ACCEPTED_ALGORITHMS: [&str; 2] = ["rsa-sha256", "hs2019"];

/// Why a verification did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `algorithm` names something other than the fixed RSA algorithm
    UnsupportedAlgorithm,
    /// `signature` is not valid base64
    BadSignatureEncoding,
    /// Cryptographic mismatch: wrong key or tampered request
    Mismatch,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::UnsupportedAlgorithm => "unsupported_algorithm",
            RejectReason::BadSignatureEncoding => "bad_signature_encoding",
            RejectReason::Mismatch => "mismatch",
        }
    }
}

/// Result of checking one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Rejected(RejectReason),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }

    fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Verified => "verified",
            VerificationOutcome::Rejected(reason) => reason.as_str(),
        }
    }
}

/// Check a parsed signature and report the outcome with a reason code.
pub fn check(
    parsed: &ParsedSignature,
    key: &ImportedKey,
    crypto: &dyn CryptoProvider,
) -> VerificationOutcome {
    let outcome = evaluate(parsed, key, crypto);

    SIGNATURE_VERIFICATIONS_TOTAL
        .with_label_values(&[outcome.label()])
        .inc();

    match outcome {
        VerificationOutcome::Verified => {
            tracing::debug!(key_id = %parsed.key_id, "Signature verified");
        }
        VerificationOutcome::Rejected(RejectReason::Mismatch) => {
            tracing::warn!(
                key_id = %parsed.key_id,
                reason = outcome.label(),
                "Signature mismatch; possible spoofing"
            );
        }
        VerificationOutcome::Rejected(_) => {
            tracing::info!(
                key_id = %parsed.key_id,
                algorithm = %parsed.algorithm,
                reason = outcome.label(),
                "Signature rejected"
            );
        }
    }

    outcome
}

/// Verify a parsed signature. Any failure, internal or cryptographic, is `false`.
pub fn verify(parsed: &ParsedSignature, key: &ImportedKey, crypto: &dyn CryptoProvider) -> bool {
    check(parsed, key, crypto).is_verified()
}

fn evaluate(
    parsed: &ParsedSignature,
    key: &ImportedKey,
    crypto: &dyn CryptoProvider,
) -> VerificationOutcome {
    let algorithm = parsed.algorithm.to_ascii_lowercase();
    if !ACCEPTED_ALGORITHMS.contains(&algorithm.as_str()) {
        return VerificationOutcome::Rejected(RejectReason::UnsupportedAlgorithm);
    }

    let Ok(signature_bytes) = BASE64.decode(parsed.signature.trim()) else {
        return VerificationOutcome::Rejected(RejectReason::BadSignatureEncoding);
    };

    if crypto.verify(key, parsed.signing_string.as_bytes(), &signature_bytes) {
        VerificationOutcome::Verified
    } else {
        VerificationOutcome::Rejected(RejectReason::Mismatch)
    }
}
