use serde::{Deserialize, Serialize};

/// Default page size of list endpoints
pub const DEFAULT_LIMIT: u32 = 100;

/// Largest page the server accepts
pub const MAX_LIMIT: u32 = 1000;

/// Default sort field of list endpoints
const DEFAULT_SORT: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Pagination, sorting and search for list endpoints.
///
/// Sorting is sent as a single `sort` parameter; a `-` prefix requests
/// descending order (`-created_at`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub skip: u32,
    pub limit: u32,
    pub sort_field: String,
    pub direction: SortDirection,
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_LIMIT,
            sort_field: DEFAULT_SORT.to_string(),
            direction: SortDirection::Asc,
            search: None,
        }
    }
}

impl ListQuery {
    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit.min(MAX_LIMIT);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_field = field.into();
        self.direction = direction;
        self
    }

    /// Empty or whitespace-only search terms are dropped.
    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.search = if term.trim().is_empty() {
            None
        } else {
            Some(term.trim().to_string())
        };
        self
    }

    pub fn sort_param(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.sort_field.clone(),
            SortDirection::Desc => format!("-{}", self.sort_field),
        }
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("skip".to_string(), self.skip.to_string()),
            ("limit".to_string(), self.limit.to_string()),
            ("sort".to_string(), self.sort_param()),
        ];
        if let Some(ref term) = self.search {
            pairs.push(("search".to_string(), term.clone()));
        }
        pairs
    }

    /// The query for the following page
    pub fn next_page(&self) -> Self {
        let mut next = self.clone();
        next.skip = self.skip.saturating_add(self.limit);
        next
    }
}

/// One page of a list endpoint, with the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Page<T> {
    pub data: Vec<T>,
    pub count: u64,
}

impl<T> Page<T> {
    /// Whether rows remain beyond this page for the given query
    pub fn has_more(&self, query: &ListQuery) -> bool {
        (query.skip as u64) + (self.data.len() as u64) < self.count
    }
}
