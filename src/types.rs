//! Validated request types.
//!
//! Strongly-typed wrappers that cannot be constructed with invalid data,
//! used at the HTTP boundary so handlers never pass raw pagination or
//! query parameters down into the service layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CorpusDbError, Result};

/// A page-size limit that is guaranteed to be within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedLimit {
    inner: usize,
}

impl ValidatedLimit {
    pub const DEFAULT: usize = 100;
    pub const MAX: usize = 1000;

    /// Create a validated limit.
    ///
    /// # Invariants
    /// - `1 <= limit <= 1000`
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 || limit > Self::MAX {
            return Err(CorpusDbError::validation(format!(
                "limit must be between 1 and {}, got {limit}",
                Self::MAX
            )));
        }
        Ok(Self { inner: limit })
    }

    pub fn get(&self) -> usize {
        self.inner
    }
}

impl Default for ValidatedLimit {
    fn default() -> Self {
        Self {
            inner: Self::DEFAULT,
        }
    }
}

/// A skip/limit window for list endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub skip: usize,
    pub limit: ValidatedLimit,
}

impl Page {
    pub fn new(skip: Option<usize>, limit: Option<usize>) -> Result<Self> {
        Ok(Self {
            skip: skip.unwrap_or(0),
            limit: limit.map(ValidatedLimit::new).transpose()?.unwrap_or_default(),
        })
    }
}

/// A kNN search request with a non-empty query text and a bounded `k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSearchQuery {
    text: String,
    k: usize,
}

impl ValidatedSearchQuery {
    pub const DEFAULT_K: usize = 10;
    pub const MAX_K: usize = 1000;

    /// Create a validated search query.
    ///
    /// # Invariants
    /// - text is non-empty after trimming
    /// - `1 <= k <= 1000`
    pub fn new(text: impl Into<String>, k: usize) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CorpusDbError::validation("search query cannot be empty"));
        }
        if k == 0 || k > Self::MAX_K {
            return Err(CorpusDbError::validation(format!(
                "k must be between 1 and {}, got {k}",
                Self::MAX_K
            )));
        }
        Ok(Self {
            text: trimmed.to_string(),
            k,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl fmt::Display for ValidatedSearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (k={})", self.text, self.k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_bounds() {
        assert_eq!(ValidatedLimit::new(100).unwrap().get(), 100);
        assert_eq!(ValidatedLimit::new(1000).unwrap().get(), 1000);
        assert!(ValidatedLimit::new(0).is_err());
        assert!(ValidatedLimit::new(1001).is_err());
        assert_eq!(ValidatedLimit::default().get(), 100);
    }

    #[test]
    fn test_page_defaults() {
        let page = Page::new(None, None).unwrap();
        assert_eq!(page.skip, 0);
        assert_eq!(page.limit.get(), 100);

        let page = Page::new(Some(40), Some(20)).unwrap();
        assert_eq!(page.skip, 40);
        assert_eq!(page.limit.get(), 20);
    }

    #[test]
    fn test_search_query_validation() {
        let q = ValidatedSearchQuery::new("  attention is all you need ", 5).unwrap();
        assert_eq!(q.text(), "attention is all you need");
        assert_eq!(q.k(), 5);

        assert!(ValidatedSearchQuery::new("   ", 5).is_err());
        assert!(ValidatedSearchQuery::new("ok", 0).is_err());
        assert!(ValidatedSearchQuery::new("ok", 1001).is_err());
    }
}
