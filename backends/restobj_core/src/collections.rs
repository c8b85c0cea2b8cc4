//! Paginated collections.
//!
//! A paged resource carries its position in the full collection
//! (`count`, `limit`, `per_page`, `num_pages`, `start_index`, `end_index`),
//! links to its neighbours (`next_page`, `previous_page`) and the URI of
//! the whole collection (`full_collection`). [`PagedCollection`] stitches
//! such pages into one indexable sequence, fetching pages only when an
//! index lands on one it has not seen yet.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::document::{read_node, Input, Node};
use crate::errors::{RobjError, RobjResult};
use crate::proxy::{AttrValue, ResourceProxy};

/// Paging fields of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMeta {
    pub count: usize,
    pub limit: usize,
    pub per_page: usize,
    pub num_pages: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub next_page: Option<String>,
    pub previous_page: Option<String>,
    pub full_collection: String,
}

impl PageMeta {
    /// Reads the paging fields, or `None` when any is missing.
    #[must_use]
    pub fn read(node: &Node) -> Option<Self> {
        let number = |name: &str| node.scalar(name)?.trim().parse::<usize>().ok();
        let link = |name: &str| {
            node.scalar(name)
                .map(|link| link.trim().to_string())
                .filter(|link| !link.is_empty())
        };

        // links may be empty on the first and last page, but must be present
        node.scalar("next_page")?;
        node.scalar("previous_page")?;

        Some(Self {
            count: number("count")?,
            limit: number("limit")?,
            per_page: number("per_page")?,
            num_pages: number("num_pages")?,
            start_index: number("start_index")?,
            end_index: number("end_index")?,
            next_page: link("next_page"),
            previous_page: link("previous_page"),
            full_collection: link("full_collection")?,
        })
    }

    /// Zero based page number; `end_index` is the index of the page's last
    /// item.
    #[must_use]
    pub fn index(&self) -> usize {
        self.end_index.checked_div(self.per_page).unwrap_or_default()
    }
}

/// One fetched page and the neighbours reached from it so far.
#[derive(Debug, Clone)]
pub struct Page {
    proxy: ResourceProxy,
    meta: PageMeta,
    next: Option<usize>,
    previous: Option<usize>,
}

impl Page {
    /// # Errors
    ///
    /// [`RobjError::NotACollection`] when `proxy` is not a paged resource.
    pub fn new(proxy: ResourceProxy) -> RobjResult<Self> {
        let meta = {
            let root = proxy.root_node()?;
            let node = read_node(&root);
            PageMeta::read(&node)
        };
        let meta = meta.ok_or_else(|| RobjError::NotACollection {
            uri: proxy.uri().to_string(),
            tag: proxy.tag().unwrap_or_default(),
        })?;
        Ok(Self {
            proxy,
            meta,
            next: None,
            previous: None,
        })
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.meta.index()
    }

    #[must_use]
    pub fn meta(&self) -> &PageMeta {
        &self.meta
    }

    #[must_use]
    pub fn proxy(&self) -> &ResourceProxy {
        &self.proxy
    }
}

/// Sparse map of fetched pages by page number.
#[derive(Debug, Default)]
pub struct Pages {
    pages: BTreeMap<usize, Page>,
    last: Option<usize>,
}

impl Pages {
    /// Stores `page` and returns its number.
    pub fn insert(&mut self, page: Page) -> usize {
        let index = page.index();
        self.pages.insert(index, page);
        self.last = Some(index);
        index
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Page> {
        self.pages.get(&index)
    }

    /// The most recently fetched page.
    #[must_use]
    pub fn last(&self) -> Option<&Page> {
        self.pages.get(&self.last?)
    }

    /// The fetched page numerically closest to `target`.
    #[must_use]
    pub fn nearest(&self, target: usize) -> Option<usize> {
        self.pages
            .keys()
            .copied()
            .min_by_key(|index| index.abs_diff(target))
    }

    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.pages.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn link(&mut self, from: usize, to: usize) {
        if let Some(page) = self.pages.get_mut(&from) {
            if to > from {
                page.next = Some(to);
            } else {
                page.previous = Some(to);
            }
        }
    }
}

/// A flat, indexable view over the pages of one collection.
pub struct PagedCollection {
    id: String,
    pages: Mutex<Pages>,

    /// Uncached proxy that new items are appended through.
    writer: ResourceProxy,
    appended: Mutex<Vec<AttrValue>>,
}

impl core::fmt::Debug for PagedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedCollection")
            .field("id", &self.id)
            .field("pages", &self.pages().indices())
            .finish_non_exhaustive()
    }
}

impl core::fmt::Display for PagedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<restobj::PagedCollection({})>", self.id)
    }
}

impl PagedCollection {
    /// Starts from any page of the collection.
    ///
    /// # Errors
    ///
    /// [`RobjError::NotACollection`] when `first` is not paged,
    /// [`RobjError::ClientClosed`] without a client.
    pub fn new(first: ResourceProxy) -> RobjResult<Self> {
        let page = Page::new(first)?;
        let client = page.proxy.client()?;
        let id = client.normalize(&page.meta.full_collection)?;

        let tag = page.proxy.tag().unwrap_or_default();
        let writer = ResourceProxy::new(&client, &id, Node::new(tag).into_handle(), None);

        let mut pages = Pages::default();
        pages.insert(page);
        Ok(Self {
            id,
            pages: Mutex::new(pages),
            writer,
            appended: Mutex::new(Vec::new()),
        })
    }

    fn pages(&self) -> MutexGuard<'_, Pages> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Normalized URI of the whole collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Total item count as last reported by the server.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages().last().map_or(0, |page| page.meta.count)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numbers of the pages fetched so far.
    #[must_use]
    pub fn fetched_pages(&self) -> Vec<usize> {
        self.pages().indices()
    }

    /// Page `number`, walking next or previous links from the closest
    /// fetched page and keeping every page visited on the way.
    ///
    /// # Errors
    ///
    /// [`RobjError::IndexOutOfRange`] past the last page, request failures
    /// while walking, [`RobjError::InvalidUri`] when a link does not move
    /// towards the target.
    pub fn page(&self, number: usize) -> RobjResult<Page> {
        let mut pages = self.pages();
        if let Some(page) = pages.get(number) {
            return Ok(page.clone());
        }

        let num_pages = pages.last().map_or(0, |page| page.meta.num_pages);
        let out_of_range = RobjError::IndexOutOfRange {
            index: number,
            len: num_pages,
        };
        if number >= num_pages {
            return Err(out_of_range);
        }
        let mut current = pages.nearest(number).ok_or(out_of_range)?;

        while current != number {
            let forward = number > current;
            let Some(page) = pages.get(current) else {
                break;
            };
            let memoized = if forward { page.next } else { page.previous };
            let next = match memoized.filter(|index| pages.get(*index).is_some()) {
                Some(index) => index,
                None => {
                    let link = if forward {
                        page.meta.next_page.clone()
                    } else {
                        page.meta.previous_page.clone()
                    };
                    let link = link.ok_or(RobjError::IndexOutOfRange {
                        index: number,
                        len: num_pages,
                    })?;

                    restobj_logs::debug!("Fetching page towards {} from {}", number, link);
                    let client = page.proxy.client()?;
                    let fetched = Page::new(client.do_get(&link)?)?;
                    let index = fetched.index();
                    let moves_towards = if forward { index > current } else { index < current };
                    if !moves_towards {
                        return Err(RobjError::InvalidUri {
                            uri: link,
                            reason: format!("page {index} does not lead from {current} to {number}"),
                        });
                    }
                    pages.insert(fetched);
                    index
                }
            };
            pages.link(current, next);
            current = next;
        }

        pages.get(number).cloned().ok_or(RobjError::IndexOutOfRange {
            index: number,
            len: num_pages,
        })
    }

    fn locate(&self, index: usize) -> RobjResult<(Page, usize)> {
        let limit = self.pages().last().map_or(0, |page| page.meta.limit);
        if limit == 0 {
            return Err(RobjError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok((self.page(index / limit)?, index % limit))
    }

    /// # Errors
    ///
    /// See [`PagedCollection::page`] and [`ResourceProxy::item`].
    pub fn get(&self, index: usize) -> RobjResult<AttrValue> {
        let (page, offset) = self.locate(index)?;
        page.proxy.item(offset)
    }

    /// # Errors
    ///
    /// See [`PagedCollection::page`] and [`ResourceProxy::set_item`].
    pub fn set(&self, index: usize, input: impl Into<Input>) -> RobjResult<()> {
        let (page, offset) = self.locate(index)?;
        page.proxy.set_item(offset, input)
    }

    /// # Errors
    ///
    /// See [`PagedCollection::page`] and [`ResourceProxy::delete_item`].
    pub fn delete(&self, index: usize) -> RobjResult<()> {
        let (page, offset) = self.locate(index)?;
        page.proxy.delete_item(offset)
    }

    /// Every item on every page. Items that moved between pages while
    /// walking are only returned once.
    ///
    /// # Errors
    ///
    /// See [`PagedCollection::page`].
    pub fn iter(&self) -> RobjResult<Vec<AttrValue>> {
        let num_pages = self.pages().last().map_or(0, |page| page.meta.num_pages);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for number in 0..num_pages {
            let page = self.page(number)?;
            for item in page.proxy.iter()? {
                if let AttrValue::Proxy(proxy) = &item {
                    if proxy.uri() != page.proxy.uri() && !seen.insert(proxy.uri().to_string()) {
                        continue;
                    }
                }
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Adds an item to the collection; see [`ResourceProxy::append`].
    ///
    /// # Errors
    ///
    /// As [`ResourceProxy::append`].
    pub fn append(
        &self,
        input: impl Into<Input>,
        post: bool,
        tag: Option<&str>,
    ) -> RobjResult<AttrValue> {
        let item = self.writer.append(input, post, tag)?;
        self.appended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item.clone());
        Ok(item)
    }

    /// Items appended through this collection.
    #[must_use]
    pub fn appended(&self) -> Vec<AttrValue> {
        self.appended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when `proxy` carries every paging field.
    #[must_use]
    pub fn is_paged(proxy: &ResourceProxy) -> bool {
        meta_of(proxy).is_some()
    }

    /// True when both proxies are pages of the same collection.
    #[must_use]
    pub fn is_sibling(a: &ResourceProxy, b: &ResourceProxy) -> bool {
        match (meta_of(a), meta_of(b)) {
            (Some(a), Some(b)) => a.full_collection == b.full_collection,
            _ => false,
        }
    }
}

fn meta_of(proxy: &ResourceProxy) -> Option<PageMeta> {
    let root = proxy.root_node().ok()?;
    let node = read_node(&root);
    PageMeta::read(&node)
}
