// KBKDF known-answer vectors

use serde::{Deserialize, Serialize};

/// One single-shot counter KDF vector (counter starting at 0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyCounterVector {
    pub key: Vec<u8>,
    pub context: Vec<u8>,
    pub bits: u32,
    pub expected_hex: String,
}

pub fn legacy_counter_vectors() -> Vec<LegacyCounterVector> {
    vec![LegacyCounterVector {
        key: (1..=16).collect(),
        context: b"the quick brown fox".to_vec(),
        bits: 256,
        expected_hex: "db19ee06b9ecb440f898fb994f058dde42c8428f280365ddcea3665058ea579d".to_string(),
    }]
}
