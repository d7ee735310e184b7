//! Snowflake-style local identifiers
//!
//! Layout: the top 48 bits hold a millisecond timestamp, the bottom 16 bits a
//! tail mixed from the seed text, a unique token and OS randomness. Ids are
//! roughly time-ordered but not strictly monotonic within one millisecond.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::AppError;
use crate::federation::CryptoProvider;

const TAIL_BITS: u32 = 16;
const TAIL_MASK: u64 = 0xFFFF;

/// Numeric client-facing account id. Serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalId(u64);

impl LocalId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Millisecond timestamp encoded in the top 48 bits.
    pub fn timestamp_millis(&self) -> u64 {
        self.0 >> TAIL_BITS
    }

    /// The low 16 bits.
    pub fn tail(&self) -> u16 {
        (self.0 & TAIL_MASK) as u16
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::UnknownIdentifier(s.to_string()));
        }
        s.parse::<u64>()
            .map(LocalId)
            .map_err(|_| AppError::UnknownIdentifier(s.to_string()))
    }
}

impl TryFrom<String> for LocalId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocalId> for String {
    fn from(id: LocalId) -> Self {
        id.to_string()
    }
}

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Allocates [`LocalId`]s without any coordination between processes.
#[derive(Clone)]
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    crypto: Arc<dyn CryptoProvider>,
}

impl IdGenerator {
    pub fn new(clock: Arc<dyn Clock>, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { clock, crypto }
    }

    /// Create a new id for an entity described by `seed`.
    pub fn create_id(&self, seed: &str) -> LocalId {
        let millis = self.clock.now_millis();
        let time_part = millis << TAIL_BITS;

        let mut token_bytes = [0u8; 16];
        self.crypto.fill_random(&mut token_bytes);
        let token = Ulid::from_parts(millis, u128::from_be_bytes(token_bytes));

        let sequence_base = sequence_base(&format!("{}{}{}", seed, token, time_part));
        let tail = sequence_base.wrapping_add(self.crypto.random_u64()) & TAIL_MASK;

        LocalId(time_part | tail)
    }
}

/// First four hex digits of the material's UTF-16 code units, each written
/// in lowercase hex without zero padding and concatenated.
///
/// For printable ASCII that is the first two characters' byte values.
fn sequence_base(material: &str) -> u64 {
    let mut hex = String::with_capacity(8);
    for unit in material.encode_utf16() {
        if hex.len() >= 4 {
            break;
        }
        hex.push_str(&format!("{:x}", unit));
    }
    hex.truncate(4);

    u64::from_str_radix(&hex, 16).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::{ImportedKey, RsaCrypto};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0
        }
    }

    /// Advances one millisecond per call.
    struct SteppingClock(AtomicU64);

    impl Clock for SteppingClock {
        fn now_millis(&self) -> u64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    /// Randomness that is always zero.
    struct ZeroRandom;

    impl CryptoProvider for ZeroRandom {
        fn import_public_key(&self, pem: &str) -> Result<ImportedKey, AppError> {
            RsaCrypto.import_public_key(pem)
        }

        fn verify(&self, _key: &ImportedKey, _message: &[u8], _signature: &[u8]) -> bool {
            false
        }

        fn sign(&self, _private_key_pem: &str, _message: &[u8]) -> Result<Vec<u8>, AppError> {
            Err(AppError::Internal(anyhow::anyhow!("signing not supported")))
        }

        fn fill_random(&self, dest: &mut [u8]) {
            dest.fill(0);
        }
    }

    const MILLIS: u64 = 1_700_000_000_000;

    #[test]
    fn deterministic_with_fixed_clock_and_randomness() {
        let generator = IdGenerator::new(Arc::new(FixedClock(MILLIS)), Arc::new(ZeroRandom));

        let id = generator.create_id("abc");
        assert_eq!(id.timestamp_millis(), MILLIS);
        assert_eq!(id.tail(), 0x6162);
        assert_eq!(id.value(), (MILLIS << 16) | 0x6162);
        assert_eq!(generator.create_id("abc"), id);
    }

    #[test]
    fn empty_seed_uses_token_prefix() {
        let generator = IdGenerator::new(Arc::new(FixedClock(MILLIS)), Arc::new(ZeroRandom));
        let token = Ulid::from_parts(MILLIS, 0).to_string();
        let expected = sequence_base(&token);

        assert_eq!(generator.create_id("").tail() as u64, expected);
    }

    #[test]
    fn sequence_base_reads_utf16_code_units() {
        assert_eq!(sequence_base("ab-seed"), 0x6162);
        // U+65E5 U+672C: one code unit already yields four digits.
        assert_eq!(sequence_base("日本"), 0x65e5);
        // U+00E9 is two digits, like ASCII, not its two UTF-8 bytes.
        assert_eq!(sequence_base("éx"), 0xe978);
        // Units below 0x10 contribute a single digit.
        assert_eq!(sequence_base("\u{1}AB"), 0x1414);
        // Astral characters are written as their surrogate pair.
        assert_eq!(sequence_base("😀"), 0xd83d);
    }

    #[test]
    fn tail_collisions_match_birthday_bound() {
        let generator = IdGenerator::new(Arc::new(FixedClock(MILLIS)), Arc::new(RsaCrypto));
        let samples = 10_000;

        let distinct: HashSet<LocalId> = (0..samples)
            .map(|_| generator.create_id("https://remote.example/users/alice"))
            .collect();

        // Expected distinct values among n uniform draws from 2^16 slots.
        let slots = 65_536f64;
        let expected = slots * (1.0 - (1.0 - 1.0 / slots).powi(samples));
        let observed = distinct.len() as f64;
        assert!(
            (observed - expected).abs() < 200.0,
            "observed {observed} distinct ids, expected about {expected:.0}"
        );
    }

    #[test]
    fn top_bits_are_non_decreasing_across_milliseconds() {
        let generator = IdGenerator::new(
            Arc::new(SteppingClock(AtomicU64::new(MILLIS))),
            Arc::new(RsaCrypto),
        );

        let ids: Vec<LocalId> = (0..1_000).map(|_| generator.create_id("seed")).collect();
        for pair in ids.windows(2) {
            assert!(pair[0].timestamp_millis() <= pair[1].timestamp_millis());
            assert!(pair[0] < pair[1], "ids from later milliseconds sort after");
        }
    }

    #[test]
    fn system_clock_ids_carry_current_time() {
        let generator = IdGenerator::new(Arc::new(SystemClock), Arc::new(RsaCrypto));
        let before = SystemClock.now_millis();
        let id = generator.create_id("seed");
        let after = SystemClock.now_millis();

        assert!((before..=after).contains(&id.timestamp_millis()));
    }

    #[test]
    fn serializes_as_decimal_string() {
        let id = LocalId::new(109_876_543_210_123_456);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"109876543210123456\"");

        let back: LocalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parse_rejects_non_numeric_input() {
        assert!("12ab".parse::<LocalId>().is_err());
        assert!("".parse::<LocalId>().is_err());
        assert!("-1".parse::<LocalId>().is_err());
        assert!("99999999999999999999999".parse::<LocalId>().is_err());
        assert_eq!("42".parse::<LocalId>().unwrap(), LocalId::new(42));
    }
}
