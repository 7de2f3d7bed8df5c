use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const GENERATED_LEN: usize = 8;
const MAX_LEN: usize = 64;
/// Byte offsets of the v4 version and variant bits.
const UUID_FIXED_BYTES: [usize; 2] = [6, 8];

/// Short shareable room identifier.
///
/// Generated ids are 8 lowercase alphanumeric characters drawn from the random
/// bits of a v4 UUID. Good enough for ad-hoc sharing, not a secret.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid room id '{0}'")]
pub struct InvalidRoomId(pub String);

impl RoomId {
    pub fn generate() -> Self {
        // 112 random bits; 8 base-36 digits use about 42 of them, so the
        // modulo bias is negligible.
        let mut bits = Uuid::new_v4()
            .into_bytes()
            .iter()
            .enumerate()
            .filter(|(i, _)| !UUID_FIXED_BYTES.contains(i))
            .fold(0u128, |acc, (_, b)| (acc << 8) | u128::from(*b));

        let radix = ALPHABET.len() as u128;
        let id = (0..GENERATED_LEN)
            .map(|_| {
                let digit = (bits % radix) as usize;
                bits /= radix;
                ALPHABET[digit] as char
            })
            .collect();
        Self(id)
    }

    /// Accepts 1..=64 ASCII alphanumeric characters.
    pub fn parse(s: &str) -> Result<Self, InvalidRoomId> {
        let valid = !s.is_empty()
            && s.len() <= MAX_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric());
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidRoomId(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidRoomId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
