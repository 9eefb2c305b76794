// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! JCS-style canonical JSON encoding and SHA-256 content digests.
//!
//! Every digest and signature in this workspace is computed over the bytes
//! produced by [`canonicalize`], never over whatever a general-purpose
//! encoder happens to emit. Canonical form fixes three things a stock
//! `serde_json` serializer does not guarantee: object key order, number
//! formatting, and the complete absence of insignificant whitespace.

use std::cmp::Ordering;
use std::fmt::Write as _;

use gait_error::{ErrorCode, GaitError};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest as _, Sha256};

/// Serialize `value` to its canonical JSON byte form.
///
/// Object keys are sorted by their UTF-16 code-unit sequence (RFC 8785),
/// integers are emitted without a decimal point, finite floats use Rust's
/// shortest round-trip decimal form, and no insignificant whitespace is
/// written.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, GaitError> {
    let v = serde_json::to_value(value).map_err(|e| {
        GaitError::new(ErrorCode::SchemaInvalid, format!("failed to convert to JSON: {e}"))
    })?;
    let mut out = String::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

/// Serialize `value` to canonical JSON after removing `field` from its
/// top-level object (used to compute the signable image of a record whose
/// own `signature`/digest field must be excluded from the hash it signs).
pub fn canonicalize_without_field<T: Serialize>(
    value: &T,
    field: &str,
) -> Result<String, GaitError> {
    let mut v = serde_json::to_value(value).map_err(|e| {
        GaitError::new(ErrorCode::SchemaInvalid, format!("failed to convert to JSON: {e}"))
    })?;
    if let Value::Object(map) = &mut v {
        map.remove(field);
    }
    let mut out = String::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

/// SHA-256 digest of `bytes`, lowercase hex encoded.
#[must_use]
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

/// Digest of the canonical JSON form of `value`.
pub fn digest<T: Serialize>(value: &T) -> Result<String, GaitError> {
    Ok(sha256_hex(canonicalize(value)?))
}

/// Digest of the canonical JSON form of `value` with `field` removed first.
/// This is the digest used when `value` embeds its own signature or digest
/// under `field`.
pub fn digest_without_field<T: Serialize>(value: &T, field: &str) -> Result<String, GaitError> {
    Ok(sha256_hex(canonicalize_without_field(value, field)?))
}

fn key_order(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_value(value: &Value, out: &mut String) -> Result<(), GaitError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| key_order(a, b));
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &serde_json::Number, out: &mut String) -> Result<(), GaitError> {
    if let Some(i) = n.as_i64() {
        write!(out, "{i}").expect("writing to a String never fails");
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        write!(out, "{u}").expect("writing to a String never fails");
        return Ok(());
    }
    let f = n.as_f64().ok_or_else(|| {
        GaitError::new(ErrorCode::SchemaInvalid, "number is neither integral nor finite float")
    })?;
    if !f.is_finite() {
        return Err(GaitError::new(
            ErrorCode::SchemaInvalid,
            "NaN and infinite numbers have no canonical JSON form",
        ));
    }
    // Rust's Display for f64 already produces the shortest decimal string
    // that round-trips back to the same value, which is what the JSON
    // number grammar requires for floats.
    write!(out, "{f}").expect("writing to a String never fails");
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                write!(out, "\\u{:04x}", c as u32).expect("writing to a String never fails");
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let v = json!({"b": 1, "a": [1, 2]});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a":[1,2],"b":1}"#);
    }

    #[test]
    fn emits_no_insignificant_whitespace() {
        let v = json!({"a": 1, "b": {"c": 2}});
        let s = canonicalize(&v).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.contains('\n'));
    }

    #[test]
    fn integers_have_no_decimal_point() {
        let v = json!({"n": 5});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"n":5}"#);
    }

    #[test]
    fn floats_use_shortest_form() {
        let v = json!({"n": 1.5});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"n":1.5}"#);
    }

    #[test]
    fn escapes_control_characters_minimally() {
        let v = json!({"s": "a\tb\nc\"d\\e"});
        let s = canonicalize(&v).unwrap();
        assert_eq!(s, r#"{"s":"a\tb\nc\"d\\e"}"#);
    }

    #[test]
    fn unicode_outside_ascii_is_not_escaped() {
        let v = json!({"s": "caf\u{00e9}"});
        let s = canonicalize(&v).unwrap();
        assert!(s.contains('\u{00e9}'));
    }

    #[test]
    fn digest_is_stable_across_reparse() {
        let v = json!({"b": 2, "a": 1});
        let first = digest(&v).unwrap();
        let reparsed: Value = serde_json::from_str(&canonicalize(&v).unwrap()).unwrap();
        let second = digest(&reparsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn digest_without_field_ignores_that_field() {
        let a = json!({"payload": 1, "signature": "x"});
        let b = json!({"payload": 1, "signature": "y"});
        assert_eq!(
            digest_without_field(&a, "signature").unwrap(),
            digest_without_field(&b, "signature").unwrap()
        );
    }

    #[test]
    fn key_sort_uses_utf16_code_units() {
        // "\u{FFFF}" (BMP, code unit 0xFFFF) sorts after "\u{E000}" (private
        // use BMP) under UTF-16 code unit comparison, matching char order
        // here since both are single code units.
        let v = json!({"\u{FFFF}": 1, "\u{E000}": 2});
        let s = canonicalize(&v).unwrap();
        let first = s.find('1').unwrap();
        let second = s.find('2').unwrap();
        assert!(second < first);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonical_form_is_deterministic(a in 0i64..1000, b in 0i64..1000) {
            let v1 = json!({"a": a, "b": b});
            let v2 = json!({"b": b, "a": a});
            prop_assert_eq!(canonicalize(&v1).unwrap(), canonicalize(&v2).unwrap());
        }
    }
}
