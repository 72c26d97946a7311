//! Output-script address recognition (§4.1): a pure function from a script
//! to the address it pays, covering the standard pattern families. No
//! teacher source covers this (zcash addresses are encoded by
//! `zebra-chain::transparent`, not decoded from a raw script), so the
//! patterns below follow the target network's own canonical encoding rules;
//! non-standard scripts return `None` rather than an error, per §4.1.

use bech32::{self, ToBase32, Variant};

/// Mainnet version/HRP bytes. A different target network would supply
/// different constants here; the core only depends on the function shape.
mod mainnet {
    pub const P2PKH_VERSION: u8 = 0x00;
    pub const P2SH_VERSION: u8 = 0x05;
    pub const BECH32_HRP: &str = "bc";
}

const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_EQUAL: u8 = 0x87;
const OP_CHECKSIG: u8 = 0xac;

/// Recognizes a standard output script and returns the address it pays, or
/// `None` for anything non-standard (§4.1). The core treats this as a black
/// box and never inspects its internals.
pub fn extract_address(script: &[u8]) -> Option<String> {
    if let Some(hash160) = match_p2pkh(script) {
        return Some(base58check(mainnet::P2PKH_VERSION, hash160));
    }
    if let Some(hash160) = match_p2sh(script) {
        return Some(base58check(mainnet::P2SH_VERSION, hash160));
    }
    if let Some(program) = match_segwit(script) {
        return Some(segwit_address(program));
    }
    None
}

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`.
fn match_p2pkh(script: &[u8]) -> Option<&[u8]> {
    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        Some(&script[3..23])
    } else {
        None
    }
}

/// `OP_HASH160 <20> OP_EQUAL`.
fn match_p2sh(script: &[u8]) -> Option<&[u8]> {
    if script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL {
        Some(&script[2..22])
    } else {
        None
    }
}

/// A witness program: `<OP_0|OP_1..OP_16> <push of 2..40 bytes>`. Only
/// version 0 (P2WPKH/P2WSH) and version 1 (taproot) are standard today;
/// other versions are recognized as witness programs but have no defined
/// encoding yet, so they fall through to `None`.
struct WitnessProgram<'a> {
    version: u8,
    program: &'a [u8],
}

fn match_segwit(script: &[u8]) -> Option<WitnessProgram<'_>> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version_opcode = script[0];
    let version = match version_opcode {
        OP_0 => 0u8,
        OP_1..=0x60 => version_opcode - OP_1 + 1,
        _ => return None,
    };
    let push_len = script[1] as usize;
    if push_len < 2 || push_len > 40 || script.len() != 2 + push_len {
        return None;
    }
    Some(WitnessProgram {
        version,
        program: &script[2..],
    })
}

fn segwit_address(witness: WitnessProgram<'_>) -> String {
    let variant = if witness.version == 0 {
        Variant::Bech32
    } else {
        Variant::Bech32m
    };
    let mut data = vec![bech32::u5::try_from_u8(witness.version).expect("version fits in 5 bits")];
    data.extend(witness.program.to_base32());
    bech32::encode(mainnet::BECH32_HRP, data, variant).expect("hrp and data are always valid here")
}

fn base58check(version: u8, payload: &[u8]) -> String {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(version);
    buf.extend_from_slice(payload);
    bs58::encode(buf).with_check().into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_p2pkh() {
        let mut script = vec![OP_DUP, OP_HASH160, 0x14];
        script.extend_from_slice(&[0x11; 20]);
        script.push(OP_EQUALVERIFY);
        script.push(OP_CHECKSIG);
        let address = extract_address(&script).unwrap();
        assert!(address.starts_with('1'));
    }

    #[test]
    fn recognizes_p2sh() {
        let mut script = vec![OP_HASH160, 0x14];
        script.extend_from_slice(&[0x22; 20]);
        script.push(OP_EQUAL);
        let address = extract_address(&script).unwrap();
        assert!(address.starts_with('3'));
    }

    #[test]
    fn recognizes_p2wpkh() {
        let mut script = vec![OP_0, 0x14];
        script.extend_from_slice(&[0x33; 20]);
        let address = extract_address(&script).unwrap();
        assert!(address.starts_with("bc1q"));
    }

    #[test]
    fn recognizes_p2wsh() {
        let mut script = vec![OP_0, 0x20];
        script.extend_from_slice(&[0x44; 32]);
        let address = extract_address(&script).unwrap();
        assert!(address.starts_with("bc1q"));
    }

    #[test]
    fn recognizes_p2tr() {
        let mut script = vec![OP_1, 0x20];
        script.extend_from_slice(&[0x55; 32]);
        let address = extract_address(&script).unwrap();
        assert!(address.starts_with("bc1p"));
    }

    #[test]
    fn non_standard_script_returns_none() {
        let script = vec![0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef]; // OP_RETURN
        assert_eq!(extract_address(&script), None);
    }
}
