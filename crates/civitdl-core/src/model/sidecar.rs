//! Hash sidecar written next to each model (`hash_name, hash_id` rows).

use crate::error::{CivitdlError, Result};
use std::collections::BTreeMap;
use std::path::Path;

const HEADER: &str = "hash_name, hash_id";

pub fn encode_hash_csv(hashes: &BTreeMap<String, String>) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (name, value) in hashes {
        out.push_str(&format!("{}, {}\n", name, value));
    }
    out.trim_end().to_string()
}

pub fn decode_hash_csv(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != HEADER)
        .filter_map(|line| line.split_once(','))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .collect()
}

pub fn read_hash_sidecar(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path).map_err(|e| CivitdlError::io_with_path(e, path))?;
    Ok(decode_hash_csv(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let hashes = BTreeMap::from([
            ("SHA256".to_string(), "AA".to_string()),
            ("BLAKE3".to_string(), "BB".to_string()),
        ]);
        assert_eq!(
            encode_hash_csv(&hashes),
            "hash_name, hash_id\nBLAKE3, BB\nSHA256, AA"
        );
        assert_eq!(encode_hash_csv(&BTreeMap::new()), "hash_name, hash_id");
    }

    #[test]
    fn test_decode_skips_header_and_junk() {
        let hashes = decode_hash_csv("hash_name, hash_id\r\nSHA256, AA\n\nnonsense\nCRC32,  ff ");
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes["SHA256"], "AA");
        assert_eq!(hashes["CRC32"], "ff");
    }
}
