//! Cursor-based key listing.
//!
//! Object stores list keys a page at a time, resuming after a marker key.
//! [`KeyCursor`] hides the paging behind an iterator that can be restarted
//! from the last key it yielded, and [`shard`] narrows a listing down to the
//! keys owned by one replica of a fanned-out workflow.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;

use crate::error::HandlerError;

/// Default number of keys requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    /// Keys in ascending order.
    pub keys: Vec<String>,
    /// Whether more keys follow the last one in this page.
    pub truncated: bool,
}

/// Lists keys of a container, one page at a time.
pub trait KeyLister: Send + Sync {
    /// Return up to `limit` keys starting with `prefix` that sort strictly
    /// after `marker`.
    fn list_page(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<KeyPage, HandlerError>;
}

/// Lazy, finite iterator over the keys of a container.
///
/// The first error ends the iteration.
pub struct KeyCursor<'a, L: KeyLister + ?Sized> {
    lister: &'a L,
    container: String,
    prefix: String,
    marker: Option<String>,
    page_size: usize,
    buffer: VecDeque<String>,
    done: bool,
}

impl<'a, L: KeyLister + ?Sized> KeyCursor<'a, L> {
    /// Start listing from the beginning of the container.
    pub fn new(lister: &'a L, container: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            lister,
            container: container.into(),
            prefix: prefix.into(),
            marker: None,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Resume a listing after `marker`.
    pub fn resume(
        lister: &'a L,
        container: impl Into<String>,
        prefix: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        let mut cursor = Self::new(lister, container, prefix);
        cursor.marker = Some(marker.into());
        cursor
    }

    /// Set the page size (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Last key yielded; pass it to [`KeyCursor::resume`] to continue later.
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    fn fetch(&mut self) -> Result<(), HandlerError> {
        let page = self.lister.list_page(
            &self.container,
            &self.prefix,
            self.marker.as_deref(),
            self.page_size,
        )?;

        if page.keys.is_empty() || !page.truncated {
            self.done = true;
        }
        self.buffer.extend(page.keys);
        Ok(())
    }
}

impl<L: KeyLister + ?Sized> Iterator for KeyCursor<'_, L> {
    type Item = Result<String, HandlerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fetch() {
                self.done = true;
                return Some(Err(e));
            }
        }

        let key = self.buffer.pop_front()?;
        self.marker = Some(key.clone());
        Some(Ok(key))
    }
}

/// Keep the items owned by replica `branch` out of `pool_size` replicas.
///
/// Ownership is positional: item `n` of the listing belongs to replica
/// `n % pool_size`. Every item is owned by exactly one replica as long as
/// all replicas see the same listing order.
pub fn shard<I>(items: I, branch: usize, pool_size: usize) -> impl Iterator<Item = I::Item>
where
    I: Iterator,
{
    items
        .enumerate()
        .filter(move |(n, _)| pool_size > 0 && n % pool_size == branch)
        .map(|(_, item)| item)
}

/// In-memory key store, used for tests and local dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLister {
    containers: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to a container, creating the container if needed.
    pub fn insert(&mut self, container: impl Into<String>, key: impl Into<String>) {
        self.containers
            .entry(container.into())
            .or_default()
            .insert(key.into());
    }
}

impl KeyLister for MemoryLister {
    fn list_page(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<KeyPage, HandlerError> {
        let keys = self
            .containers
            .get(container)
            .ok_or_else(|| HandlerError::NotFound(format!("container {}", container)))?;

        let lower = match marker {
            Some(m) => Bound::Excluded(m.to_string()),
            None => Bound::Unbounded,
        };

        let mut matching = keys
            .range((lower, Bound::Unbounded))
            .filter(|k| k.starts_with(prefix))
            .take(limit + 1)
            .cloned()
            .collect::<Vec<_>>();

        let truncated = matching.len() > limit;
        matching.truncate(limit);

        Ok(KeyPage {
            keys: matching,
            truncated,
        })
    }
}
