//! Shared test utilities for the pbase-mirror test suite.
//!
//! Provides an in-memory [`MockSite`] standing in for PBase, plus small
//! constructors for URLs, gallery refs and item pages.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = MockSite::new()
//!     .with_gallery("alice/root", Some("Home"), &["alice/trip"], &[])
//!     .with_gallery("alice/trip", Some("Trip 2024"), &[], &["alice/image/1"])
//!     .with_item(
//!         "alice/image/1",
//!         item_page(Some("Sunset"), &[(SizeLabel::Medium, "alice/image/1/medium")], None),
//!     )
//!     .with_binary("alice/image/1/medium", Some("o6/img0012.jpg"));
//!
//! assert_eq!(site.gallery_fetches(), Vec::<String>::new());
//! ```
//!
//! All paths are relative to [`BASE`]. Every call the mirror makes is
//! recorded as a [`RecordedOp`] so tests can assert what was (not) fetched.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Mutex;
use url::Url;

use crate::cancel::CancelFlag;
use crate::gallery::{GalleryRef, ImageItem, identity_key};
use crate::resolve::SizeLabel;
use crate::site::{DownloadError, FetchError, GalleryPage, ItemPage, Site, SizeLink};

pub const BASE: &str = "https://pbase.com/";

// =========================================================================
// Constructors
// =========================================================================

pub fn base_url() -> Url {
    Url::parse(BASE).unwrap()
}

/// Absolute URL for a path under [`BASE`].
pub fn page_url(path: &str) -> Url {
    base_url().join(path).unwrap()
}

pub fn gallery_ref(path: &str) -> GalleryRef {
    GalleryRef::parse(path, &base_url())
        .unwrap_or_else(|e| panic!("bad gallery path '{path}': {e}"))
}

/// Item page with an optional caption, labelled size links and an inline
/// image, all given as paths under [`BASE`].
pub fn item_page(
    caption: Option<&str>,
    links: &[(SizeLabel, &str)],
    displayed: Option<&str>,
) -> ItemPage {
    ItemPage {
        caption: caption.map(str::to_string),
        size_links: links
            .iter()
            .map(|(label, path)| SizeLink {
                label: *label,
                url: page_url(path),
            })
            .collect(),
        displayed: displayed.map(page_url),
    }
}

// =========================================================================
// MockSite
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    /// Gallery identity key.
    Gallery(String),
    /// Item page URL.
    Item(String),
    /// Size link URL.
    BinaryUrl(String),
    /// Binary URL.
    Download(String),
}

/// In-memory site: galleries, item pages, size pages and binaries keyed by
/// identity, with opt-in failures.
#[derive(Default)]
pub struct MockSite {
    galleries: HashMap<String, GalleryPage>,
    failing_galleries: HashSet<String>,
    items: HashMap<String, ItemPage>,
    binaries: HashMap<String, Option<Url>>,
    failing_binaries: HashSet<String>,
    payloads: HashMap<String, Vec<u8>>,
    failing_downloads: HashSet<String>,
    panicking_downloads: HashSet<String>,
    pub operations: Mutex<Vec<RecordedOp>>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gallery(
        mut self,
        path: &str,
        title: Option<&str>,
        children: &[&str],
        items: &[&str],
    ) -> Self {
        let page = GalleryPage {
            title: title.map(str::to_string),
            sub_galleries: children.iter().map(|c| gallery_ref(c)).collect(),
            items: items.iter().map(|i| ImageItem::new(page_url(i))).collect(),
        };
        self.galleries.insert(gallery_ref(path).key().to_string(), page);
        self
    }

    /// Set the caption shown next to an already-registered gallery item.
    pub fn with_listing_caption(mut self, gallery: &str, item: &str, caption: &str) -> Self {
        self.listed_item(gallery, item).caption = Some(caption.to_string());
        self
    }

    /// Set the filename an already-registered gallery item is listed with.
    pub fn with_listing_filename(mut self, gallery: &str, item: &str, filename: &str) -> Self {
        self.listed_item(gallery, item).original_filename = Some(filename.to_string());
        self
    }

    fn listed_item(&mut self, gallery: &str, item: &str) -> &mut ImageItem {
        let key = gallery_ref(gallery).key().to_string();
        let item_key = identity_key(&page_url(item));
        self.galleries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("gallery '{gallery}' not registered"))
            .items
            .iter_mut()
            .find(|i| i.key() == item_key)
            .unwrap_or_else(|| panic!("item '{item}' not listed in '{gallery}'"))
    }

    pub fn with_failing_gallery(mut self, path: &str) -> Self {
        self.failing_galleries.insert(gallery_ref(path).key().to_string());
        self
    }

    pub fn with_item(mut self, path: &str, page: ItemPage) -> Self {
        self.items.insert(identity_key(&page_url(path)), page);
        self
    }

    /// Size link `link` leads to `binary`, or to a page without an image.
    /// Unregistered links are treated as direct binaries.
    pub fn with_binary(mut self, link: &str, binary: Option<&str>) -> Self {
        self.binaries
            .insert(identity_key(&page_url(link)), binary.map(page_url));
        self
    }

    pub fn with_failing_binary(mut self, link: &str) -> Self {
        self.failing_binaries.insert(identity_key(&page_url(link)));
        self
    }

    pub fn with_payload(mut self, binary: &str, bytes: &[u8]) -> Self {
        self.payloads
            .insert(identity_key(&page_url(binary)), bytes.to_vec());
        self
    }

    pub fn with_failing_download(mut self, binary: &str) -> Self {
        self.failing_downloads.insert(identity_key(&page_url(binary)));
        self
    }

    /// Downloading `binary` panics, as a crashing worker would.
    pub fn with_panicking_download(mut self, binary: &str) -> Self {
        self.panicking_downloads.insert(identity_key(&page_url(binary)));
        self
    }

    pub fn ops(&self) -> Vec<RecordedOp> {
        self.operations.lock().unwrap().clone()
    }

    /// Gallery keys in fetch order.
    pub fn gallery_fetches(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Gallery(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Binary URLs in download order.
    pub fn downloads(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Download(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: RecordedOp) {
        self.operations.lock().unwrap().push(op);
    }
}

fn not_found(url: &Url) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: 404,
    }
}

impl Site for MockSite {
    fn gallery(&self, gallery: &GalleryRef) -> Result<GalleryPage, FetchError> {
        self.record(RecordedOp::Gallery(gallery.key().to_string()));
        if self.failing_galleries.contains(gallery.key()) {
            return Err(FetchError::Status {
                url: gallery.url().to_string(),
                status: 500,
            });
        }
        self.galleries
            .get(gallery.key())
            .cloned()
            .ok_or_else(|| not_found(gallery.url()))
    }

    fn item(&self, page: &Url) -> Result<ItemPage, FetchError> {
        self.record(RecordedOp::Item(page.to_string()));
        self.items
            .get(&identity_key(page))
            .cloned()
            .ok_or_else(|| not_found(page))
    }

    fn binary_url(&self, link: &Url, _referer: &Url) -> Result<Option<Url>, FetchError> {
        self.record(RecordedOp::BinaryUrl(link.to_string()));
        let key = identity_key(link);
        if self.failing_binaries.contains(&key) {
            return Err(FetchError::Transport {
                url: link.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .binaries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Some(link.clone())))
    }

    fn download(
        &self,
        url: &Url,
        _referer: &Url,
        sink: &mut dyn Write,
        cancel: &CancelFlag,
    ) -> Result<u64, DownloadError> {
        self.record(RecordedOp::Download(url.to_string()));
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let key = identity_key(url);
        if self.panicking_downloads.contains(&key) {
            panic!("worker crashed while downloading {url}");
        }
        let payload = self
            .payloads
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("bytes of {url}").into_bytes());
        if self.failing_downloads.contains(&key) {
            sink.write_all(&payload[..payload.len() / 2])?;
            return Err(FetchError::Transport {
                url: url.to_string(),
                message: "connection reset mid-body".to_string(),
            }
            .into());
        }
        sink.write_all(&payload)?;
        Ok(payload.len() as u64)
    }
}
