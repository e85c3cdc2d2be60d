//! Constant-time comparisons

use subtle::ConstantTimeEq;

/// Constant-time byte comparison
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Constant-time key ID comparison
pub fn constant_time_key_id_compare(key_id1: &super::KeyId, key_id2: &super::KeyId) -> bool {
    constant_time_eq(key_id1.as_str().as_bytes(), key_id2.as_str().as_bytes())
}
