// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Graph name validation and resolution.
//!
//! Names are slash-separated paths. A leading `/` marks a global name, a
//! leading `~` marks a name private to the current node, anything else is
//! relative to the caller's namespace. Remappings are applied after
//! resolution, deepest scope first, and never chain.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A resolved-name to resolved-name substitution table.
pub type Remappings = HashMap<String, String>;

/// Validate a user-supplied (unresolved) name.
///
/// Rejects whitespace and unprintable characters anywhere, and segments
/// whose first character is a digit. The empty name is valid (it resolves
/// to the namespace itself).
pub fn validate(name: &str) -> Result<()> {
    for c in name.chars() {
        if c.is_whitespace() || c.is_control() {
            return Err(Error::NameInvalid(name.to_string()));
        }
    }
    for segment in name.split('/') {
        let mut chars = segment.chars();
        // Leading '~' is the private marker, the digit rule applies to what follows.
        let first = match chars.next() {
            Some('~') => chars.next(),
            c => c,
        };
        if let Some(c) = first {
            if c.is_ascii_digit() {
                return Err(Error::NameInvalid(name.to_string()));
            }
        }
    }
    Ok(())
}

/// Collapse repeated slashes and strip a trailing slash (the root name
/// `/` is preserved).
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_slash = false;
    for c in name.chars() {
        if c == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Join a namespace and a relative suffix, normalizing the result.
pub fn append(ns: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return normalize(ns);
    }
    normalize(&format!("{}/{}", ns, suffix))
}

/// Resolve `name` against a namespace and node name, then apply remappings.
///
/// Resolution is single-pass and deterministic:
/// - empty -> the namespace itself;
/// - leading `/` -> used as-is;
/// - leading `~` -> `<node_name>/<rest>`;
/// - otherwise -> `<ns>/<name>`.
///
/// `remappings` is an ordered chain, deepest scope first; the first table
/// holding the resolved name wins and the substitution is applied at most
/// once (remapped names are not looked up again).
pub fn resolve(ns: &str, node_name: &str, name: &str, remappings: &[&Remappings]) -> Result<String> {
    validate(name)?;

    let resolved = if name.is_empty() {
        normalize(ns)
    } else if let Some(rest) = name.strip_prefix('~') {
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        append(node_name, rest)
    } else if name.starts_with('/') {
        normalize(name)
    } else {
        append(ns, name)
    };

    for table in remappings {
        if let Some(target) = table.get(&resolved) {
            return Ok(target.clone());
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remaps(pairs: &[(&str, &str)]) -> Remappings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_relative_private_and_global() {
        assert_eq!(resolve("/a", "/a/node", "topic", &[]).unwrap(), "/a/topic");
        assert_eq!(resolve("/a", "/a/node", "/topic", &[]).unwrap(), "/topic");
        assert_eq!(
            resolve("/a", "/a/node", "~topic", &[]).unwrap(),
            "/a/node/topic"
        );
        assert_eq!(
            resolve("/a", "/a/node", "~/topic", &[]).unwrap(),
            "/a/node/topic"
        );
        assert_eq!(resolve("/a/b", "/a/node", "", &[]).unwrap(), "/a/b");
    }

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(
            resolve("/a", "/a/node", "x//y///z", &[]).unwrap(),
            "/a/x/y/z"
        );
        assert_eq!(normalize("//a//b/"), "/a/b");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn rejects_whitespace_and_digit_segments() {
        assert!(resolve("/", "/n", "bad name", &[]).is_err());
        assert!(resolve("/", "/n", "tab\tname", &[]).is_err());
        assert!(resolve("/", "/n", "9lives", &[]).is_err());
        assert!(resolve("/", "/n", "a/0b", &[]).is_err());
        // Digits are fine past the first character of a segment.
        assert!(resolve("/", "/n", "a0/b1", &[]).is_ok());
    }

    #[test]
    fn remapping_applies_once_deepest_first() {
        let child = remaps(&[("/a/topic", "/renamed")]);
        let parent = remaps(&[("/a/topic", "/parent_wins_not"), ("/renamed", "/chained")]);
        let chain: Vec<&Remappings> = vec![&child, &parent];

        // Child (deepest) table wins, and the result is not looked up again.
        assert_eq!(
            resolve("/a", "/a/node", "topic", &chain).unwrap(),
            "/renamed"
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let table = remaps(&[("/a/topic", "/other/place")]);
        let chain: Vec<&Remappings> = vec![&table];
        for name in ["topic", "/topic", "~topic", "x//y", ""] {
            let once = resolve("/a", "/a/node", name, &chain).unwrap();
            let twice = resolve("/a", "/a/node", &once, &chain).unwrap();
            // A resolved name that is not itself a remap key resolves to itself.
            if !table.contains_key(&once) {
                assert_eq!(once, twice);
            }
        }
    }
}
