//! Pure transform functions (the Callable catalog).
//!
//! Each function takes the already-extracted string value of a field
//! and returns bytes ready to be spliced back into a JSON record — for
//! the scalar functions that means the bytes already include
//! surrounding quotes or brackets.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

const MIDDLE: &str = "<...>";

/// `ipToUint32`: IPv4 → `"n"` (u32, network-order interpreted as a
/// big-endian integer); IPv6 or unparseable → `"0"`.
pub fn ip_to_uint32(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    out.push(b'"');
    if value.contains(':') {
        out.push(b'0');
    } else if let Ok(std::net::IpAddr::V4(addr)) = value.parse::<std::net::IpAddr>() {
        out.extend_from_slice(u32::from(addr).to_string().as_bytes());
    } else {
        out.push(b'0');
    }
    out.push(b'"');
    out
}

/// `limitMaxLength`: pass through quoted if short enough or `max_length < 5`;
/// otherwise keep the first and last portions and splice `<...>` in the middle.
pub fn limit_max_length(value: &str, max_length: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    out.push(b'"');
    if max_length < 5 || (value.len() as i64) <= max_length {
        out.extend_from_slice(value.as_bytes());
    } else {
        let raw_max_len = (max_length - 5) as usize;
        let left_len = raw_max_len / 2;
        let right_len = raw_max_len - left_len;
        out.extend_from_slice(&value.as_bytes()[..left_len]);
        out.extend_from_slice(MIDDLE.as_bytes());
        out.extend_from_slice(&value.as_bytes()[value.len() - right_len..]);
    }
    out.push(b'"');
    out
}

/// `toArray`: whitespace-split, keep only tokens parseable as a 32-bit
/// float, emit a JSON array of the surviving tokens verbatim.
pub fn to_array(value: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'[');
    let mut need_comma = false;
    for token in value.split(' ') {
        if token.is_empty() {
            continue;
        }
        if token.parse::<f32>().is_ok() {
            if need_comma {
                out.push(b',');
            }
            out.extend_from_slice(token.as_bytes());
            need_comma = true;
        }
    }
    out.push(b']');
    out
}

/// `splitAndStore`: split by `delimiter`; for each `(field, index)` in
/// `store_to`, emit the part at that index (empty string if absent).
pub fn split_and_store(
    value: &str,
    delimiter: &str,
    store_to: &HashMap<String, usize>,
) -> Vec<(String, Vec<u8>)> {
    let parts: Vec<&str> = value.split(delimiter).collect();
    let mut results = Vec::with_capacity(store_to.len());
    for (field, &index) in store_to {
        let part = parts.get(index).copied().unwrap_or("");
        let mut out = Vec::with_capacity(part.len() + 2);
        out.push(b'"');
        out.extend_from_slice(part.as_bytes());
        out.push(b'"');
        results.push((field.clone(), out));
    }
    results
}

/// `calculateSHA1`: hex SHA-1 digest of the value, quoted.
pub fn calculate_sha1(value: &str) -> Vec<u8> {
    let digest = Sha1::digest(value.as_bytes());
    let mut out = Vec::with_capacity(42);
    out.push(b'"');
    for byte in digest {
        out.extend_from_slice(format!("{:02x}", byte).as_bytes());
    }
    out.push(b'"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_to_uint32_examples() {
        assert_eq!(ip_to_uint32("255.255.255.255"), b"\"4294967295\"");
        assert_eq!(ip_to_uint32("127.0.0.1"), b"\"2130706433\"");
        assert_eq!(ip_to_uint32("::1"), b"\"0\"");
        assert_eq!(ip_to_uint32("garbage"), b"\"0\"");
    }

    #[test]
    fn limit_max_length_short_circuit_below_five() {
        assert_eq!(limit_max_length("hello world", 4), b"\"hello world\"");
    }

    #[test]
    fn limit_max_length_passthrough_when_short_enough() {
        assert_eq!(limit_max_length("short", 100), b"\"short\"");
    }

    #[test]
    fn limit_max_length_truncates_with_middle_marker() {
        let out = limit_max_length("abcdefghijklmnopqrstuvwxyz", 15);
        let s = std::str::from_utf8(&out).unwrap();
        assert!(s.starts_with('"') && s.ends_with('"'));
        let inner = &s[1..s.len() - 1];
        assert!(inner.contains("<...>"));
        assert!(inner.len() <= 15);
    }

    #[test]
    fn to_array_keeps_only_numbers() {
        assert_eq!(to_array("200 3300  4000"), b"[200,3300,4000]");
        assert_eq!(to_array("200 abc 4000"), b"[200,4000]");
    }

    #[test]
    fn split_and_store_missing_index_is_empty() {
        let mut store_to = HashMap::new();
        store_to.insert("first".to_string(), 0usize);
        store_to.insert("missing".to_string(), 9usize);
        let results = split_and_store("a:b:c", ":", &store_to);
        let as_map: HashMap<_, _> = results.into_iter().collect();
        assert_eq!(as_map["first"], b"\"a\"");
        assert_eq!(as_map["missing"], b"\"\"");
    }

    #[test]
    fn calculate_sha1_is_hex_digest() {
        let out = calculate_sha1("abc");
        assert_eq!(
            out,
            b"\"a9993e364706816aba3e25717850c26c9cd0d89\"".to_vec()
        );
    }
}
