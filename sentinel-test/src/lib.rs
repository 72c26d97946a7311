//! Shared test harness bits for the sentinel workspace.
//!
//! Mirrors `zebra_test::init()`: a one-time tracing subscriber install so
//! that `tracing` output from property tests and unit tests doesn't race on
//! stdout or get installed twice.

use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Install a tracing subscriber suitable for test output, once per process.
///
/// Call this at the top of any test that wants to see `tracing` events
/// (particularly proptest shrinking runs, where seeing the span trail
/// matters). Safe to call from every test; only the first call does work.
pub fn init() {
    INIT.get_or_init(|| {
        let _ = color_eyre::install();
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Build a fixed-size hash fixture from a short hex prefix, right-padded
/// with zero bytes. Handy for constructing readable test hashes like
/// `hash_fixture("aa")` instead of spelling out 32 bytes by hand.
pub fn hash_fixture(hex_prefix: &str) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let decoded = hex::decode(hex_prefix).expect("valid hex");
    assert!(decoded.len() <= 32, "hex_prefix too long for a 32-byte hash");
    bytes[..decoded.len()].copy_from_slice(&decoded);
    bytes
}
