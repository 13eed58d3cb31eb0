//! Generates the opaque, collision-resistant key names each primitive uses
//! when a caller doesn't supply their own.
//!
//! Mirrors the "give me a key if you don't care" ergonomics of the original:
//! a caller can always pass an explicit key of their own choosing, in which
//! case it's treated as theirs to manage; a generated key is instead owned
//! by the primitive instance that made it, and gets cleaned up on `Drop`.

use rand::distributions::Slice;
use rand::Rng;

const SUFFIX_LEN: usize = 16;

/// The 36-symbol alphabet random suffixes and tokens are drawn from,
/// uniformly and with replacement — digits then lowercase letters, matching
/// each symbol to exactly one draw rather than letting `Alphanumeric`'s
/// upper/lowercase pair both fold onto the same lowercase outcome.
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_suffix() -> String {
    let dist = Slice::new(ALPHABET).expect("ALPHABET is non-empty");
    rand::thread_rng()
        .sample_iter(dist)
        .take(SUFFIX_LEN)
        .map(|&b| b as char)
        .collect()
}

/// Build a full store key from a namespace prefix and a 16-character random
/// lowercase-alphanumeric suffix, e.g. `tmp:memlock:a3f9c01de7b2howa`.
pub fn generate(prefix: &str) -> String {
    format!("{prefix}{}", random_suffix())
}

/// A 16-character random lowercase-alphanumeric token, used by the Lock as
/// its per-instance ownership marker. Same alphabet and length as the key
/// suffix, but never combined with a prefix.
pub fn random_token() -> String {
    random_suffix()
}

/// Whether `key` looks like one this crate generated under `prefix`, i.e. it
/// is safe to delete automatically when the owning instance is dropped.
pub fn is_generated(prefix: &str, key: &str) -> bool {
    key.len() == prefix.len() + SUFFIX_LEN
        && key.starts_with(prefix)
        && key[prefix.len()..].chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_the_prefix_and_right_length() {
        let key = generate("bloom:");
        assert!(key.starts_with("bloom:"));
        assert_eq!(key.len(), "bloom:".len() + SUFFIX_LEN);
    }

    #[test]
    fn generated_keys_round_trip_through_is_generated() {
        let key = generate("tmp:memlock:");
        assert!(is_generated("tmp:memlock:", &key));
    }

    #[test]
    fn caller_supplied_keys_are_not_mistaken_for_generated() {
        assert!(!is_generated("bloom:", "my-own-filter"));
        assert!(!is_generated("bloom:", "bloom:TooShort"));
    }
}
