//! Cache key layout.
//!
//! ```text
//! {prefix}|{instance id}|{instance id}|...|:{digest}
//! ```
//!
//! Instance ids are sorted and delimited by `|` on both sides so that all
//! entries depending on one instance can be found by pattern, whatever the
//! other instances of the request were. Ids are validated never to contain
//! `|`; the digest is lowercase hex.

use std::collections::BTreeSet;
use std::fmt;

/// Delimiter around instance ids.
pub const ID_SEPARATOR: char = '|';

/// A fully formed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<'a, I>(prefix: &str, instance_ids: I, digest: &str) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: BTreeSet<&str> = instance_ids.into_iter().collect();
        let mut key = String::with_capacity(prefix.len() + digest.len() + 16 * ids.len() + 2);
        key.push_str(prefix);
        key.push(ID_SEPARATOR);
        for id in ids {
            key.push_str(id);
            key.push(ID_SEPARATOR);
        }
        key.push(':');
        key.push_str(digest);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of keys to evict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key under the prefix.
    All { prefix: String },
    /// Every key under the prefix that depends on `instance_id`.
    Instance { prefix: String, instance_id: String },
}

impl KeyPattern {
    pub fn all(prefix: impl Into<String>) -> Self {
        KeyPattern::All { prefix: prefix.into() }
    }

    pub fn instance(prefix: impl Into<String>, instance_id: impl Into<String>) -> Self {
        KeyPattern::Instance {
            prefix: prefix.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        // The namespace ends at the first delimiter: `gw` must not match `gw2|...`
        let ids = match key
            .strip_prefix(self.prefix())
            .and_then(|rest| rest.strip_prefix(ID_SEPARATOR))
        {
            Some(ids) => ids,
            None => return false,
        };
        match self {
            KeyPattern::All { .. } => true,
            KeyPattern::Instance { instance_id, .. } => {
                let ids = ids.rsplit_once(':').map(|(ids, _)| ids).unwrap_or(ids);
                format!("{ID_SEPARATOR}{ids}").contains(&delimited(instance_id))
            }
        }
    }

    pub fn prefix(&self) -> &str {
        match self {
            KeyPattern::All { prefix } | KeyPattern::Instance { prefix, .. } => prefix,
        }
    }

    /// Redis `SCAN MATCH` glob selecting at least every key
    /// [`matches`](Self::matches) accepts. It can over-select (`|xa|` for
    /// instance `a`), so scanned keys must be filtered with `matches`.
    pub fn to_glob(&self) -> String {
        match self {
            KeyPattern::All { prefix } => format!("{}{ID_SEPARATOR}*", escape_glob(prefix)),
            KeyPattern::Instance { prefix, instance_id } => format!(
                "{}{ID_SEPARATOR}*{}{ID_SEPARATOR}*",
                escape_glob(prefix),
                escape_glob(instance_id)
            ),
        }
    }
}

fn delimited(instance_id: &str) -> String {
    format!("{ID_SEPARATOR}{instance_id}{ID_SEPARATOR}")
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
