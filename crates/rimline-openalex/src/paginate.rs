//! Cursor pagination state for one query.
//!
//! A transient error halves the page size (floor 1) and retries the same
//! cursor; a successful page restores the default size. Each query gets a
//! fresh [`Paginator`], so a reduced size never leaks into the next query.

/// Cursor value that starts cursor pagination
pub const START_CURSOR: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: String,
    pub per_page: u32,
}

/// What the paginator decided after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry the same cursor; `attempt` counts from 1
    Retry { attempt: u32, per_page: u32 },
    /// Retry budget spent for this page
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct Paginator {
    default_per_page: u32,
    per_page: u32,
    cursor: Option<String>,
    retries: u32,
    max_retries: u32,
    pages: usize,
}

impl Paginator {
    pub fn new(default_per_page: u32, max_retries: u32) -> Self {
        let default_per_page = default_per_page.max(1);
        Self {
            default_per_page,
            per_page: default_per_page,
            cursor: Some(START_CURSOR.to_string()),
            retries: 0,
            max_retries,
            pages: 0,
        }
    }

    /// Next request to issue, or `None` once the query is drained.
    pub fn next_request(&self) -> Option<PageRequest> {
        self.cursor.as_ref().map(|cursor| PageRequest {
            cursor: cursor.clone(),
            per_page: self.per_page,
        })
    }

    /// Record a successful page.
    ///
    /// The query ends when the API stops returning a cursor or returns an
    /// empty page.
    pub fn on_page(&mut self, next_cursor: Option<String>, results: usize) {
        self.pages += 1;
        self.retries = 0;
        self.per_page = self.default_per_page;
        self.cursor = next_cursor.filter(|c| !c.is_empty() && results > 0);
    }

    /// Record a transient failure of the current request.
    pub fn on_transient(&mut self) -> Backoff {
        if self.retries >= self.max_retries {
            return Backoff::GiveUp;
        }
        self.retries += 1;
        self.per_page = (self.per_page / 2).max(1);
        Backoff::Retry {
            attempt: self.retries,
            per_page: self.per_page,
        }
    }

    /// The API signalled there is nothing more to page through.
    pub fn on_exhausted(&mut self) {
        self.cursor = None;
    }

    pub fn is_done(&self) -> bool {
        self.cursor.is_none()
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }
}
