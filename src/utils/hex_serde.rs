//! Serde adapter that writes byte fields as lowercase hex strings.
//!
//! Used with `#[serde(with = "crate::utils::hex_serde")]` so keys and
//! signatures stay readable in the JSON wire format.

use data_encoding::HEXLOWER;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S, T>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&HEXLOWER.encode(bytes.as_ref()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    HEXLOWER
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
