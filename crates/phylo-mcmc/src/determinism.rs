use phylo_core::derive_substream_seed;
use sha2::{Digest, Sha256};

/// Derives the deterministic seed used for a specific run.
pub fn run_seed(master_seed: u64, run_index: usize) -> u64 {
    derive_substream_seed(master_seed, run_index as u64)
}

/// Mixes an optional seed label into the master seed.
///
/// Unlabelled policies use the master seed unchanged.
pub fn labelled_master_seed(master_seed: u64, label: Option<&str>) -> u64 {
    match label {
        None => master_seed,
        Some(label) => {
            let digest = Sha256::digest(label.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            derive_substream_seed(master_seed, u64::from_le_bytes(bytes))
        }
    }
}

/// Hex-encoded SHA-256 of a serialized configuration.
pub fn config_hash(serialized: &str) -> String {
    Sha256::digest(serialized.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
