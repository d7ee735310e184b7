//! ActivityPub federation module
//!
//! Handles:
//! - HTTP Signatures (parsing, signing, digests)
//! - Remote public key fetching
//! - Public key caching
//! - Signature verification
//! - Inbound request authentication

mod authenticator;
mod crypto;
mod key_cache;
mod key_fetch;
mod signature;
mod verifier;

pub use authenticator::{AuthenticatedActor, Authenticator, VerifiedSigner};
pub use crypto::{CryptoProvider, ImportedKey, RsaCrypto};
pub use key_cache::{CachedKey, KeyCache, MemoryKeyCache};
pub use key_fetch::{
    FetchResponse, HttpFetch, KeyResolver, KeySource, PublicKeyRecord, ReqwestFetcher,
    extract_actor_domain, federation_user_agent,
};
pub use signature::{
    ParsedSignature, REQUEST_TARGET, SignatureHeaders, SignedRequest, digest_matches,
    generate_digest, key_id_matches_actor, parse_signature, sign_request, sign_request_at,
    signature_from_request,
};
pub use verifier::{RejectReason, VerificationOutcome, check, verify};
