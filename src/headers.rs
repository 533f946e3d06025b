use serde::{Deserialize, Serialize};

pub(crate) const CACHE_CONTROL: &str = "cache-control";
pub(crate) const CONTENT_TYPE: &str = "content-type";
pub(crate) const ETAG: &str = "etag";
pub(crate) const EXPIRES: &str = "expires";
pub(crate) const IF_MODIFIED_SINCE: &str = "if-modified-since";
pub(crate) const IF_NONE_MATCH: &str = "if-none-match";
pub(crate) const LAST_MODIFIED: &str = "last-modified";

/// An ordered multimap of HTTP header names and values.
///
/// Lookups are case-insensitive per RFC 7230; iteration preserves insertion
/// order; duplicate names are allowed. Names keep the casing they were
/// inserted with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HttpHeaders {
    entries: Vec<(String, String)>,
}

impl HttpHeaders {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (name, value) pairs, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a (name, value) pair, keeping any existing values for the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with a single value.
    ///
    /// The new value takes the position of the first occurrence; when the
    /// name was absent it is appended at the end.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let mut replaced = false;
        self.entries.retain_mut(|(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                if replaced {
                    return false;
                }
                replaced = true;
                *v = value.clone();
            }
            true
        });
        if !replaced {
            self.entries.push((name.to_owned(), value));
        }
    }

    /// Returns the first value of `name`, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value of `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Checks whether any value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every value of `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterates over (name, value) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Merges `other` into `self`; names present in `other` overwrite.
    ///
    /// All values of an overwritten name are dropped before the incoming
    /// values are appended, so multi-valued names are replaced wholesale.
    pub fn merge_from(&mut self, other: &HttpHeaders) {
        for (name, _) in &other.entries {
            self.remove(name);
        }
        for (name, value) in &other.entries {
            self.entries.push((name.clone(), value.clone()));
        }
    }
}

impl FromIterator<(String, String)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        HttpHeaders { entries: iter.into_iter().collect() }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        HttpHeaders {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.to_owned(), v.to_owned()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HttpHeaders {
    type Item = (&'a String, &'a String);
    type IntoIter = HttpHeadersIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        HttpHeadersIter { inner: self.entries.iter() }
    }
}

/// Iterator over borrowed header pairs.
#[derive(Debug)]
pub struct HttpHeadersIter<'a> {
    inner: std::slice::Iter<'a, (String, String)>,
}

impl<'a> Iterator for HttpHeadersIter<'a> {
    type Item = (&'a String, &'a String);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(n, v)| (n, v))
    }
}
