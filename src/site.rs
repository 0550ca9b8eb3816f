//! The boundary between the mirror engine and the network.
//!
//! Traversal, size resolution and the download driver only ever talk to a
//! [`Site`]. The production implementation is
//! [`PbaseClient`](crate::client::PbaseClient); tests use an in-memory
//! `MockSite` that records every call.

use crate::cancel::CancelFlag;
use crate::gallery::{GalleryRef, ImageItem};
use crate::resolve::SizeLabel;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// A gallery page reduced to what traversal needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalleryPage {
    pub title: Option<String>,
    /// Child galleries in document order, without duplicates.
    pub sub_galleries: Vec<GalleryRef>,
    /// Image entries in document order, without duplicates.
    pub items: Vec<ImageItem>,
}

/// A link on an item page offering one size of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeLink {
    pub label: SizeLabel,
    pub url: Url,
}

/// An item page reduced to what size resolution needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub caption: Option<String>,
    /// At most one link per label, highest priority first.
    pub size_links: Vec<SizeLink>,
    /// The image rendered inline on the page.
    pub displayed: Option<Url>,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not read response from {url}: {message}")]
    Body { url: String, message: String },
    #[error("could not parse {url}: {message}")]
    Parse { url: String, message: String },
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} returned an empty body")]
    Empty(String),
    #[error("refusing to overwrite {}", .0.display())]
    Exists(PathBuf),
    #[error("download cancelled")]
    Cancelled,
}

/// Everything the mirror needs from the remote site.
///
/// Implementations must be shareable across worker threads; they own their
/// own rate limiting.
pub trait Site: Sync {
    /// Fetch and parse one gallery page.
    fn gallery(&self, gallery: &GalleryRef) -> Result<GalleryPage, FetchError>;

    /// Fetch and parse one item page.
    fn item(&self, page: &Url) -> Result<ItemPage, FetchError>;

    /// Follow a size link to the binary it offers. `Ok(None)` means the
    /// target page shows no usable image.
    fn binary_url(&self, link: &Url, referer: &Url) -> Result<Option<Url>, FetchError>;

    /// Stream the body of `url` into `sink`, polling `cancel` between
    /// chunks. Returns the number of bytes written.
    fn download(
        &self,
        url: &Url,
        referer: &Url,
        sink: &mut dyn Write,
        cancel: &CancelFlag,
    ) -> Result<u64, DownloadError>;
}
