//! Owner-scoped cache keys for cached todo queries.
//!
//! Keys follow `todo:<owner>:<kind>[:<normalized param>]`. The owner is
//! always the first variable segment so every entry of one owner, or every
//! search entry of one owner, can be removed with a single prefix deletion.
//! `CacheKey` has a private inner struct: the only way to build one is
//! through constructors that demand an owner.

use std::fmt;

use dueline_core::OwnerId;

/// Leading segment of every key this crate writes.
pub const RESOURCE_KIND: &str = "todo";

const SEPARATOR: char = ':';

/// Read shape a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    List,
    Overdue,
    Search,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::List => "list",
            QueryKind::Overdue => "overdue",
            QueryKind::Search => "search",
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "list" => Some(QueryKind::List),
            "overdue" => Some(QueryKind::Overdue),
            "search" => Some(QueryKind::Search),
            _ => None,
        }
    }
}

/// Case-folded, whitespace-trimmed search text.
///
/// `"  Foo "` and `"foo"` normalize identically and therefore share a key.
pub fn normalize_query(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Cache key for one owner-scoped query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    owner_id: OwnerId,
    kind: QueryKind,
    /// Present only for `Search`, already normalized.
    param: Option<String>,
}

impl CacheKey {
    pub fn list(owner_id: OwnerId) -> Self {
        Self::from_parts(owner_id, QueryKind::List, None)
    }

    pub fn overdue(owner_id: OwnerId) -> Self {
        Self::from_parts(owner_id, QueryKind::Overdue, None)
    }

    /// Search key; `raw_query` is normalized here.
    pub fn search(owner_id: OwnerId, raw_query: &str) -> Self {
        Self::from_parts(owner_id, QueryKind::Search, Some(normalize_query(raw_query)))
    }

    fn from_parts(owner_id: OwnerId, kind: QueryKind, param: Option<String>) -> Self {
        Self {
            inner: CacheKeyInner {
                owner_id,
                kind,
                param,
            },
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.inner.owner_id
    }

    pub fn kind(&self) -> QueryKind {
        self.inner.kind
    }

    /// Normalized search text, `None` for parameterless kinds.
    pub fn param(&self) -> Option<&str> {
        self.inner.param.as_deref()
    }

    /// String form used as the `CacheStore` key.
    pub fn encode(&self) -> String {
        let mut encoded = format!(
            "{RESOURCE_KIND}{SEPARATOR}{}{SEPARATOR}{}",
            self.inner.owner_id,
            self.inner.kind.as_str()
        );
        if let Some(param) = &self.inner.param {
            encoded.push(SEPARATOR);
            encoded.push_str(param);
        }
        encoded
    }

    /// Parse an encoded key.
    ///
    /// Returns `None` for foreign resource kinds, unknown query kinds,
    /// non-numeric owners, a search key without its parameter segment,
    /// or a parameter attached to a parameterless kind. The search
    /// parameter itself may contain separators.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut segments = encoded.splitn(4, SEPARATOR);
        if segments.next()? != RESOURCE_KIND {
            return None;
        }
        let owner_id = segments.next()?.parse::<i64>().ok().map(OwnerId::new)?;
        let kind = QueryKind::parse(segments.next()?)?;
        let param = segments.next();

        match (kind, param) {
            (QueryKind::Search, Some(param)) => {
                Some(Self::from_parts(owner_id, kind, Some(param.to_string())))
            }
            (QueryKind::List | QueryKind::Overdue, None) => {
                Some(Self::from_parts(owner_id, kind, None))
            }
            _ => None,
        }
    }

    /// Prefix shared by every key of `owner_id`.
    ///
    /// Ends with the separator so owner `4` never matches owner `42`.
    pub fn owner_prefix(owner_id: OwnerId) -> String {
        format!("{RESOURCE_KIND}{SEPARATOR}{owner_id}{SEPARATOR}")
    }

    /// Prefix shared by every search key of `owner_id`.
    pub fn search_prefix(owner_id: OwnerId) -> String {
        format!(
            "{}{}{SEPARATOR}",
            Self::owner_prefix(owner_id),
            QueryKind::Search.as_str()
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
