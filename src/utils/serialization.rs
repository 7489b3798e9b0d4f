// bincode 2 encoding for on-disk records (the key store file)
use crate::error::{PeerError, Result};

/// Records on disk are tiny; anything larger is not one of ours
const MAX_RECORD_LEN: usize = 64 * 1024;

pub fn to_bytes<T: bincode::Encode>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::encode_to_vec(record, bincode::config::standard())?)
}

/// Decode exactly one record. Trailing bytes are an error.
pub fn from_bytes<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let config = bincode::config::standard().with_limit::<MAX_RECORD_LEN>();
    let (record, read) = bincode::decode_from_slice(bytes, config)?;
    if read != bytes.len() {
        return Err(PeerError::Serialization(format!(
            "{} unexpected bytes after record",
            bytes.len() - read
        )));
    }
    Ok(record)
}
