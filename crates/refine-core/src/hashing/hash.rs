//! blake3 sobre el JSON canónico, en hex (64 caracteres).

use serde_json::Value;

use super::to_canonical_json;

/// Hash del JSON canónico de `value`.
pub fn hash_value(value: &Value) -> String {
    blake3::hash(to_canonical_json(value).as_bytes()).to_hex().to_string()
}
