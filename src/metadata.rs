//! Call metadata: a case-insensitive multimap of string keys to string values.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::status::Status;

/// Key→values map attached to a call.
///
/// Keys are normalised to lowercase on insert and matched case-insensitively
/// on lookup, so `TraceId`, `traceid` and `TRACEID` are the same key. A key
/// may carry several values; [`get`](Metadata::get) returns the first one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata(HeaderMap);

impl Metadata {
    pub fn new() -> Self {
        Self(HeaderMap::new())
    }

    /// Builds metadata from `(key, value)` pairs, keeping repeated keys.
    ///
    /// ```rust
    /// use conduit::Metadata;
    ///
    /// let md = Metadata::from_pairs([("user", "alice"), ("pass", "123")]).unwrap();
    /// assert_eq!(md.get("USER"), Some("alice"));
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, Status>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut md = Self::new();
        for (k, v) in pairs {
            md.append(k.as_ref(), v.as_ref())?;
        }
        Ok(md)
    }

    /// Adds a value under `key`, keeping any values already present.
    pub fn append(&mut self, key: &str, value: &str) -> Result<(), Status> {
        let (name, value) = entry(key, value)?;
        self.0.append(name, value);
        Ok(())
    }

    /// Sets `key` to exactly one value, dropping any previous values.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), Status> {
        let (name, value) = entry(key, value)?;
        self.0.insert(name, value);
        Ok(())
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(text)
    }

    /// Every value for `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0.get_all(key).iter().filter_map(text).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Distinct keys, lowercase.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(HeaderName::as_str)
    }

    /// Every `(key, value)` pair; a key with two values appears twice.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| text(v).map(|v| (k.as_str(), v)))
    }

    /// Number of values (not keys).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends every pair of `other` whose key passes `keep`.
    ///
    /// Entries already validated by `other`, so this cannot fail.
    pub(crate) fn copy_from(&mut self, other: &Metadata, mut keep: impl FnMut(&str) -> bool) {
        for (name, value) in other.0.iter() {
            if keep(name.as_str()) {
                self.0.append(name.clone(), value.clone());
            }
        }
    }
}

fn entry(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), Status> {
    let name = HeaderName::from_bytes(key.as_bytes())
        .map_err(|_| Status::invalid_argument(format!("invalid metadata key `{key}`")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| Status::invalid_argument(format!("invalid metadata value for `{key}`")))?;
    Ok((name, value))
}

// values only ever enter as `&str`, so they decode as UTF-8, non-ASCII included
fn text(value: &HeaderValue) -> Option<&str> {
    std::str::from_utf8(value.as_bytes()).ok()
}
