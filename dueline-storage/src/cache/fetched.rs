//! Read results that carry where the value came from.

use std::fmt;

/// Origin of a value returned by [`CoalescingReadCache::fetch`].
///
/// [`CoalescingReadCache::fetch`]: super::CoalescingReadCache::fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchSource {
    /// Served from the cache store; no loader ran.
    Cache,
    /// This caller started the load.
    Loader,
    /// This caller joined a load another caller had already started.
    Coalesced,
}

impl FetchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchSource::Cache => "cache",
            FetchSource::Loader => "loader",
            FetchSource::Coalesced => "coalesced",
        }
    }
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value read through the cache, tagged with its [`FetchSource`].
///
/// Callers usually only need [`into_value`](Self::into_value); the source
/// exists so the service layer can record hit and miss metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    value: T,
    source: FetchSource,
}

impl<T> Fetched<T> {
    pub fn from_cache(value: T) -> Self {
        Self {
            value,
            source: FetchSource::Cache,
        }
    }

    pub fn from_loader(value: T) -> Self {
        Self {
            value,
            source: FetchSource::Loader,
        }
    }

    pub fn coalesced(value: T) -> Self {
        Self {
            value,
            source: FetchSource::Coalesced,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> FetchSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source == FetchSource::Cache
    }

    /// Transform the value, keeping the source.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            source: self.source,
        }
    }
}
