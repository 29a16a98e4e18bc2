//! Cursor-driven listing
//!
//! Each call asks for `min(page_size, remaining)` items and passes the cursor
//! captured from the previous page. Iteration ends on an empty page, a page
//! without a cursor, or once the requested limit is reached.

use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::client::{ApiRequest, Client};
use super::response::Pagination;
use crate::headers::Headers;
use crate::transport::Method;
use crate::Result;

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Lazy iterator over a paginated GET endpoint
pub struct Paginator<'a, T> {
    client: &'a Client,
    path: Vec<String>,
    headers: Headers,
    params: Vec<(String, String)>,
    page_size: usize,
    limit: Option<usize>,
    retrieved: usize,
    pagination: Pagination,
    buffer: VecDeque<T>,
    done: bool,
}

impl<'a, T: DeserializeOwned> Paginator<'a, T> {
    pub fn new<S: AsRef<str>>(client: &'a Client, path: &[S]) -> Self {
        Self {
            client,
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            headers: Headers::json(),
            params: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            limit: None,
            retrieved: 0,
            pagination: Pagination::new(),
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Extra query parameter sent with every page
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stop after `limit` items; `None` lists everything
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Start from an existing cursor
    pub fn cursor(mut self, cursor: Option<String>) -> Self {
        self.pagination.cursor = cursor;
        self
    }

    fn remaining(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.retrieved))
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page_limit = match self.remaining() {
            Some(0) => {
                self.done = true;
                return Ok(());
            }
            Some(remaining) => Some(remaining.min(self.page_size)),
            None => None,
        };

        let mut request = ApiRequest::new().headers(&self.headers);
        for (key, value) in &self.params {
            request = request.param(key.clone(), value);
        }
        if let Some(limit) = page_limit {
            request = request.param("limit", limit);
        }
        if let Some(cursor) = &self.pagination.cursor {
            request = request.param("cursor", cursor);
        }

        let had_cursor = self.pagination.cursor.take();
        let items = self
            .client
            .dispatch_as::<T, _>(Method::Get, &self.path, request, Some(&mut self.pagination))?
            .into_vec();

        debug!(
            path = ?self.path,
            count = items.len(),
            cursor = ?self.pagination.cursor,
            "fetched page"
        );

        if items.is_empty() {
            self.done = true;
            return Ok(());
        }

        self.retrieved += items.len();
        self.buffer.extend(items);

        if self.pagination.cursor.is_none() || self.pagination.cursor == had_cursor {
            self.done = true;
        }
        Ok(())
    }
}

impl<'a, T: DeserializeOwned> Iterator for Paginator<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}
