//! Fractional ordering keys for sibling collections (steps, components,
//! quiz options).
//!
//! Keys are base-36 strings compared with ordinary lexicographic ordering.
//! Inserting or moving an item only ever mints a key for that item; sibling
//! keys are never rewritten. When two keys are adjacent the midpoint is
//! found by extending the key length, so key generation never fails and a
//! full-collection renumber is never required.
//!
//! Generated keys never end in the minimum digit `0`. That invariant is what
//! guarantees a strictly-between key always exists for any two generated
//! keys.

use crate::error::CoreError;

/// Digits in ascending lexicographic order.
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Radix of the key space.
const BASE: usize = 36;

/// The smallest digit. Keys must not end with it.
const MIN_DIGIT: u8 = b'0';

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Key for the first item of an empty collection, roughly in the middle of
/// the key space.
pub fn middle() -> String {
    midpoint("", None)
}

/// A key sorting strictly after `prev`.
pub fn next(prev: &str) -> Result<String, CoreError> {
    validate_key(prev)?;
    Ok(midpoint(prev, None))
}

/// A key sorting strictly before `next`.
pub fn before(next: &str) -> Result<String, CoreError> {
    validate_key(next)?;
    validate_upper(next)?;
    Ok(midpoint("", Some(next)))
}

/// A key sorting strictly between `lower` and `upper`.
pub fn between(lower: &str, upper: &str) -> Result<String, CoreError> {
    validate_key(lower)?;
    validate_key(upper)?;
    validate_upper(upper)?;
    if lower >= upper {
        return Err(CoreError::Validation(format!(
            "Rank lower bound '{lower}' must sort before upper bound '{upper}'"
        )));
    }
    Ok(midpoint(lower, Some(upper)))
}

/// Evenly pre-spaced keys for bulk seeding `n` siblings at once.
///
/// Keys are returned in ascending order and leave room for later inserts at
/// the front, the back, and between any two neighbours.
pub fn generate_default_ranks(n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    // Smallest key length whose space spreads n keys with headroom at both
    // ends.
    let mut len = 1usize;
    let mut space: u128 = BASE as u128;
    while space < (n as u128 + 2) {
        len += 1;
        space *= BASE as u128;
    }
    (1..=n as u128)
        .map(|i| encode_fixed(i * space / (n as u128 + 1), len))
        .collect()
}

// ---------------------------------------------------------------------------
// Midpoint construction
// ---------------------------------------------------------------------------

/// A key strictly between `a` and `b`, where an empty `a` is the lower
/// bound of the key space and `b = None` is the upper bound.
///
/// Precondition (upheld by the public wrappers): `a < b` and `b` does not
/// end with [`MIN_DIGIT`].
fn midpoint(a: &str, b: Option<&str>) -> String {
    if let Some(b) = b {
        // Strip the longest common prefix, treating `a` as padded with the
        // minimum digit. Because `b` never ends with the minimum digit the
        // loop cannot consume `b` entirely while `a < b`.
        let ab = a.as_bytes();
        let bb = b.as_bytes();
        let mut n = 0;
        while n < bb.len() && ab.get(n).copied().unwrap_or(MIN_DIGIT) == bb[n] {
            n += 1;
        }
        if n > 0 {
            let tail = midpoint(&a[n.min(a.len())..], Some(&b[n..]));
            return format!("{}{}", &b[..n], tail);
        }
    }

    let digit_a = a.as_bytes().first().map_or(0, |&c| digit_index(c));
    let digit_b = b
        .and_then(|b| b.as_bytes().first())
        .map_or(BASE, |&c| digit_index(c));

    if digit_b - digit_a > 1 {
        // Room at this position: emit the middle digit and stop.
        let mid = (digit_a + digit_b + 1) / 2;
        (ALPHABET[mid] as char).to_string()
    } else if b.is_some_and(|b| b.len() > 1) {
        // Consecutive first digits but `b` has a tail: `b`'s first digit
        // alone already sorts strictly between.
        b.unwrap_or_default()[..1].to_string()
    } else {
        // Consecutive first digits and no usable tail on `b`: keep `a`'s
        // digit and recurse into `a`'s tail with an open upper bound.
        let head = ALPHABET[digit_a] as char;
        let tail = midpoint(if a.is_empty() { "" } else { &a[1..] }, None);
        format!("{head}{tail}")
    }
}

/// Fixed-width base-36 encoding with trailing minimum digits stripped.
fn encode_fixed(mut value: u128, len: usize) -> String {
    let mut buf = vec![MIN_DIGIT; len];
    for slot in buf.iter_mut().rev() {
        *slot = ALPHABET[(value % BASE as u128) as usize];
        value /= BASE as u128;
    }
    while buf.len() > 1 && buf.last() == Some(&MIN_DIGIT) {
        buf.pop();
    }
    buf.into_iter().map(|b| b as char).collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Position of `c` in [`ALPHABET`]. Only called on validated keys.
fn digit_index(c: u8) -> usize {
    match c {
        b'0'..=b'9' => (c - b'0') as usize,
        b'a'..=b'z' => (c - b'a') as usize + 10,
        _ => 0,
    }
}

fn validate_key(key: &str) -> Result<(), CoreError> {
    if key.is_empty() {
        return Err(CoreError::Validation("Rank key must not be empty".into()));
    }
    match key
        .bytes()
        .find(|c| !c.is_ascii_digit() && !c.is_ascii_lowercase())
    {
        Some(c) => Err(CoreError::Validation(format!(
            "Rank key '{key}' contains invalid character '{}'",
            c as char
        ))),
        None => Ok(()),
    }
}

/// An upper bound ending in the minimum digit would admit no key strictly
/// below it with the same prefix; generated keys never do.
fn validate_upper(key: &str) -> Result<(), CoreError> {
    if key.as_bytes().last() == Some(&MIN_DIGIT) {
        return Err(CoreError::Validation(format!(
            "Rank key '{key}' must not end with the minimum digit"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
