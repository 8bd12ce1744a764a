//! CSV encoding of a cache shard.

use super::CacheRecord;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

pub(super) const HEADER: [&str; 4] = ["volume_id", "model_filepath", "SHA256", "BLAKE3"];

/// Records of one shard, ordered by version id.
pub(super) type Shard = BTreeMap<u64, CacheRecord>;

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn encode_row(fields: &[&str]) -> String {
    let quoted: Vec<String> = fields.iter().map(|f| quote(f)).collect();
    quoted.join(",")
}

/// Split CSV text into rows of fields, honoring double-quoted fields.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

pub(super) fn encode(shard: &Shard) -> String {
    let mut out = encode_row(&HEADER);
    out.push('\n');
    for record in shard.values() {
        let version_id = record.version_id.to_string();
        let path = record.model_filepath.to_string_lossy();
        out.push_str(&encode_row(&[
            version_id.as_str(),
            path.as_ref(),
            record.sha256.as_str(),
            record.blake3.as_str(),
        ]));
        out.push('\n');
    }
    out
}

/// Parse shard text. Empty rows are skipped; malformed rows are dropped with
/// a warning.
pub(super) fn decode(text: &str) -> Shard {
    let mut shard = Shard::new();
    for (index, row) in parse_rows(text).into_iter().enumerate() {
        if row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        if index == 0 && row.first().map(|f| f.trim()) == Some(HEADER[0]) {
            continue;
        }
        let Some(version_id) = row.first().and_then(|f| f.trim().parse::<u64>().ok()) else {
            warn!("Skipping malformed cache row: {:?}", row);
            continue;
        };
        let field = |i: usize| row.get(i).cloned().unwrap_or_default();
        shard.insert(
            version_id,
            CacheRecord {
                version_id,
                model_filepath: PathBuf::from(field(1)),
                sha256: field(2),
                blake3: field(3),
            },
        );
    }
    shard
}
