//! Signature Registry (C2).
//!
//! Canonicalizes human-readable event/function definitions into the
//! `name(type1,type2,...)` form Solidity hashes to derive topic0/selector,
//! and memoizes the result by the original definition string so repeated
//! lookups during dispatch-table construction don't re-hash.

use crate::codec::{keccak256, Bytes32};
use std::collections::HashMap;
use std::sync::Mutex;

/// Strips parameter names, `indexed` annotations and whitespace from a
/// human-readable signature, collapsing tuple types recursively.
///
/// `ProofSetCreated(uint256 indexed setId, address indexed owner)` becomes
/// `ProofSetCreated(uint256,address)`; a tuple parameter like
/// `(bytes cid, uint256 rawSize)[] rootData` collapses to
/// `(bytes,uint256)[]`.
pub fn canonicalize(definition: &str) -> String {
    let definition = definition.trim();
    let open = match definition.find('(') {
        Some(i) => i,
        None => return definition.to_string(),
    };
    let name = definition[..open].trim();
    let rest = definition[open..].trim();
    let close = matching_close(rest, 0);
    let inner = &rest[1..close];
    format!("{}({})", name, canonicalize_param_list(inner))
}

/// Canonicalizes a comma-separated parameter list (without the enclosing
/// parens) into a comma-separated list of bare types.
fn canonicalize_param_list(inner: &str) -> String {
    split_top_level_commas(inner)
        .iter()
        .map(|p| canonicalize_type(p))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Canonicalizes a single parameter (`"uint256 indexed setId"`,
/// `"(bytes,uint256)[] rootData"`, `"address owner"`, ...) to its bare type.
fn canonicalize_type(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if raw.starts_with('(') {
        let close = matching_close(raw, 0);
        let tuple_inner = &raw[1..close];
        let remainder = &raw[close + 1..];
        let suffix = array_suffix(remainder);
        format!("({}){}", canonicalize_param_list(tuple_inner), suffix)
    } else {
        // The type is always the first whitespace-separated token: any
        // `indexed` keyword and the parameter name (if present) follow it.
        raw.split_whitespace().next().unwrap_or("").to_string()
    }
}

/// Reads a leading run of array-bracket syntax (`[]`, `[3]`, `[][2]`, ...)
/// from the start of `s`, ignoring anything after (parameter name, indexed).
fn array_suffix(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars().peekable();
    loop {
        match chars.peek() {
            Some(c) if c.is_whitespace() && out.is_empty() => {
                chars.next();
            }
            Some('[') => {
                while let Some(&c) = chars.peek() {
                    out.push(c);
                    chars.next();
                    if c == ']' {
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    out
}

/// Splits `s` on commas that are not nested inside parens.
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    let tail = &s[start..];
    if !tail.trim().is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Returns the index of the `)` matching the `(` at `open_idx` within `s`.
/// Panics only if `s[open_idx]` is not `(` or the parens are unbalanced —
/// both are programmer errors (malformed config definitions are rejected by
/// startup validation, §4.3, before reaching this function).
fn matching_close(s: &str, open_idx: usize) -> usize {
    let bytes = s.as_bytes();
    assert_eq!(bytes[open_idx], b'(');
    let mut depth = 0i32;
    for (idx, b) in bytes.iter().enumerate().skip(open_idx) {
        match *b as char {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return idx;
                }
            }
            _ => {}
        }
    }
    bytes.len() - 1
}

/// Full 32-byte event topic0: `keccak256(canonical_signature)`.
pub fn event_topic0(definition: &str) -> Bytes32 {
    keccak256(canonicalize(definition).as_bytes())
}

/// 4-byte function selector: the first 4 bytes of
/// `keccak256(canonical_signature)`.
pub fn function_selector(definition: &str) -> [u8; 4] {
    let hash = keccak256(canonicalize(definition).as_bytes());
    [hash.0[0], hash.0[1], hash.0[2], hash.0[3]]
}

/// Memoizes canonicalization + hashing by the original (uncanonicalized)
/// definition string, since dispatch-table construction looks up the same
/// handful of definitions repeatedly across contracts.
#[derive(Default)]
pub struct SignatureRegistry {
    event_cache: Mutex<HashMap<String, Bytes32>>,
    function_cache: Mutex<HashMap<String, [u8; 4]>>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic0(&self, definition: &str) -> Bytes32 {
        let mut cache = self.event_cache.lock().expect("signature cache poisoned");
        *cache
            .entry(definition.to_string())
            .or_insert_with(|| event_topic0(definition))
    }

    pub fn selector(&self, definition: &str) -> [u8; 4] {
        let mut cache = self
            .function_cache
            .lock()
            .expect("signature cache poisoned");
        *cache
            .entry(definition.to_string())
            .or_insert_with(|| function_selector(definition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_drops_names_and_indexed() {
        assert_eq!(
            canonicalize("ProofSetCreated(uint256 indexed setId, address indexed owner)"),
            "ProofSetCreated(uint256,address)"
        );
    }

    #[test]
    fn canonicalize_is_whitespace_insensitive() {
        let a = canonicalize("Foo(uint256 indexed a,address b)");
        let b = canonicalize("Foo( uint256   indexed   a , address   b )");
        assert_eq!(a, b);
    }

    #[test]
    fn canonicalize_collapses_named_tuples() {
        assert_eq!(
            canonicalize("RootsAdded(uint256 setId, (bytes cid, uint256 rawSize)[] rootData)"),
            "RootsAdded(uint256,(bytes,uint256)[])"
        );
    }

    #[test]
    fn canonicalize_no_args() {
        assert_eq!(
            canonicalize("ProofSetEmpty(uint256 indexed setId)"),
            "ProofSetEmpty(uint256)"
        );
    }

    #[test]
    fn canonicalize_nested_tuple_array() {
        assert_eq!(
            canonicalize("PossessionProven(uint256 indexed setId, (uint256 rootId, uint256 offset)[] challenges)"),
            "PossessionProven(uint256,(uint256,uint256)[])"
        );
    }

    #[test]
    fn canonicalize_function_with_nested_dynamic_tuple() {
        assert_eq!(
            canonicalize(
                "addRoots(uint256 setId, (bytes cid, uint256 rawSize)[] rootData, bytes extraData)"
            ),
            "addRoots(uint256,(bytes,uint256)[],bytes)"
        );
    }

    #[test]
    fn topic0_and_selector_are_stable_under_renaming() {
        let a = event_topic0("Transfer(address indexed from, address indexed to, uint256 value)");
        let b = event_topic0("Transfer(address indexed x, address indexed y, uint256 z)");
        assert_eq!(a, b);

        let sel_a = function_selector("transfer(address to, uint256 amount)");
        let sel_b = function_selector("transfer(address,uint256)");
        assert_eq!(sel_a, sel_b);
    }

    #[test]
    fn registry_memoizes() {
        let registry = SignatureRegistry::new();
        let a = registry.topic0("Foo(uint256 indexed x)");
        let b = registry.topic0("Foo(uint256 indexed x)");
        assert_eq!(a, b);
    }

    #[test]
    fn known_transfer_selector_matches_erc20() {
        // transfer(address,uint256) -> 0xa9059cbb (well-known ERC-20 selector)
        let sel = function_selector("transfer(address,uint256)");
        assert_eq!(hex::encode(sel), "a9059cbb");
    }
}
