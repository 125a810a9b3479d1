//! FC-014: BLAKE3 fingerprints for definitions and generated artifacts.

use crate::core::types::TestDefinition;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Fingerprint of a definition: the hash of its canonical JSON form.
/// Two documents that parse to the same IR share a fingerprint, whatever
/// their source format.
pub fn fingerprint(definition: &TestDefinition) -> Result<String, String> {
    let canonical =
        serde_json::to_string(definition).map_err(|e| format!("JSON serialize error: {}", e))?;
    Ok(hash_string(&canonical))
}
