//! Property-based tests for relay payload compression.
//!
//! 1. `decompress(compress(s)) == s` for every string and every config.
//! 2. Untagged output is the input itself.
//! 3. Tagged output honors the minimum savings (unless the input collided
//!    with the tag).
//! 4. Payloads at or below the threshold are never compressed.

use pageforge_runtime::relay::compress::{
    COMPRESSED_PREFIX, CompressionConfig, compress, decompress, is_compressed,
};
use proptest::prelude::*;

fn config_strategy() -> impl Strategy<Value = CompressionConfig> {
    (any::<bool>(), 0usize..4096, 0.0f64..0.9).prop_map(|(enabled, threshold_bytes, min_savings)| {
        CompressionConfig {
            enabled,
            threshold_bytes,
            min_savings,
        }
    })
}

/// Strings ranging from random text to highly repetitive JSON-like text.
fn payload_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        ".{0,3000}",
        ("[a-z\"{}:,]{1,16}", 1usize..400).prop_map(|(unit, n)| unit.repeat(n)),
        ".{0,64}".prop_map(|s| format!("{COMPRESSED_PREFIX}{s}")),
    ]
}

proptest! {
    #[test]
    fn round_trip(s in payload_strategy(), config in config_strategy()) {
        let packed = compress(&s, &config).unwrap();
        prop_assert_eq!(decompress(&packed).unwrap(), s.as_str());
    }

    #[test]
    fn untagged_output_is_input(s in payload_strategy(), config in config_strategy()) {
        let packed = compress(&s, &config).unwrap();
        if !is_compressed(&packed) {
            prop_assert_eq!(packed.as_ref(), s.as_str());
        }
    }

    #[test]
    fn savings_are_honored(s in payload_strategy(), config in config_strategy()) {
        let packed = compress(&s, &config).unwrap();
        if is_compressed(&packed) && !is_compressed(&s) {
            let limit = s.len() as f64 * (1.0 - config.min_savings);
            prop_assert!((packed.len() as f64) <= limit);
        }
    }

    #[test]
    fn small_payloads_stay_plain(s in "[a-z]{0,512}") {
        let config = CompressionConfig::default();
        let packed = compress(&s, &config).unwrap();
        prop_assert!(!is_compressed(&packed));
    }
}
