//! String and id conversions at the VST3 boundary

use std::ffi::c_char;
use vst3::Steinberg::{Vst::String128, TUID};

/// Convert a NUL-terminated C string field to a Rust String
pub fn c_str_to_string(c_str: &[c_char]) -> String {
    let end = c_str.iter().position(|&c| c == 0).unwrap_or(c_str.len());
    let bytes: Vec<u8> = c_str[..end].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Convert VST3 String128 (UTF-16) to Rust String
pub fn vst_string_to_string(vst_str: &String128) -> String {
    let utf16: Vec<u16> = vst_str
        .iter()
        .take_while(|&&ch| ch != 0)
        .map(|&ch| ch as u16)
        .collect();
    String::from_utf16_lossy(&utf16)
}

/// Convert Rust String to VST3 String128, truncating to 127 code units
pub fn string_to_vst_string(s: &str) -> String128 {
    let mut result: String128 = [0; 128];
    for (slot, ch) in result.iter_mut().zip(s.encode_utf16().take(127)) {
        *slot = ch as _;
    }
    result
}

/// Interface id as the `TUID` the factory expects
pub fn guid_to_tuid(guid: &[u8; 16]) -> TUID {
    let mut tuid: TUID = [0; 16];
    for (dst, &src) in tuid.iter_mut().zip(guid.iter()) {
        *dst = src as c_char;
    }
    tuid
}

pub fn tuid_to_bytes(tuid: &TUID) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    for (dst, &src) in bytes.iter_mut().zip(tuid.iter()) {
        *dst = src as u8;
    }
    bytes
}
