//! Gallery and item identity.
//!
//! PBase addresses everything by path: `/<owner>/<gallery>/<sub-gallery>` for
//! galleries and `/<owner>/image/<id>` for single images. The same gallery is
//! routinely linked under several spellings, so every URL goes through
//! [`normalize_url`] before it is compared or stored:
//!
//! ```text
//! https://www.PBase.com/alice/trip/           ─┐
//! http://pbase.com/alice/trip&view=slideshow   ├─→ pbase.com/alice/trip
//! https://pbase.com/alice//trip?page=2#top    ─┘
//! ```
//!
//! Normalization drops query strings, fragments, empty segments, trailing
//! slashes and the `&view=…` / `;…` suffixes PBase appends to path segments.
//! Identity additionally ignores the scheme and a leading `www.`.

use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GalleryRefError {
    #[error("empty gallery reference")]
    Empty,
    #[error("invalid gallery URL {0}: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("unsupported URL scheme: {0}")]
    Scheme(String),
    #[error("gallery reference has no owner segment: {0}")]
    NoOwner(String),
}

/// Second path segments that belong to site features rather than galleries.
const RESERVED_SECTIONS: &[&str] = &[
    "forum",
    "search",
    "logout",
    "login",
    "profile",
    "guestbook",
    "help",
    "recent",
    "slideshow",
    "upload",
    "edit",
    "view",
    "galleries",
    "statistics",
    "usage",
    "payment",
    "popular",
    "random",
];

/// Path fragments marking owner-only image actions.
const IMAGE_ACTIONS: &[&str] = &["/edit", "/delete", "/upload"];

/// Normalized reference to one gallery.
///
/// Equality, hashing and ordering use the identity key only, so two refs
/// built from different spellings of the same gallery are interchangeable.
#[derive(Debug, Clone)]
pub struct GalleryRef {
    url: Url,
    key: String,
}

impl GalleryRef {
    /// Parse a start point: an absolute URL, a scheme-relative `//host/…`
    /// URL, or a path such as `alice/root` resolved against `base`.
    pub fn parse(input: &str, base: &Url) -> Result<Self, GalleryRefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(GalleryRefError::Empty);
        }

        let url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Url::parse(trimmed)
        } else if let Some(rest) = trimmed.strip_prefix("//") {
            Url::parse(&format!("{}://{}", base.scheme(), rest))
        } else if trimmed.contains("://") {
            return Err(GalleryRefError::Scheme(trimmed.to_string()));
        } else {
            site_root(base).join(trimmed.trim_start_matches('/'))
        }
        .map_err(|e| GalleryRefError::InvalidUrl(trimmed.to_string(), e))?;

        Self::from_url(&url).ok_or_else(|| GalleryRefError::NoOwner(trimmed.to_string()))
    }

    /// Build a ref from an already-absolute URL. Returns `None` for non-HTTP
    /// schemes and for the bare site root, which has no owner.
    pub fn from_url(url: &Url) -> Option<Self> {
        if !is_http(url) {
            return None;
        }
        let url = normalize_url(url);
        if url.path() == "/" {
            return None;
        }
        let key = identity_key(&url);
        Some(Self { url, key })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Non-empty path segments, owner first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
    }

    /// Account that owns the gallery (first path segment).
    pub fn owner(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }
}

impl PartialEq for GalleryRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for GalleryRef {}

impl Hash for GalleryRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for GalleryRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GalleryRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for GalleryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// One image entry discovered on a gallery page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    /// Normalized URL of the image's own page (holds the size links).
    pub page: Url,
    /// Caption shown next to the thumbnail, if any.
    pub caption: Option<String>,
    /// Uploaded filename, when the listing exposes it.
    pub original_filename: Option<String>,
}

impl ImageItem {
    pub fn new(page: Url) -> Self {
        Self {
            page: normalize_url(&page),
            caption: None,
            original_filename: None,
        }
    }

    /// Identity key of the item page, stable across URL spellings.
    pub fn key(&self) -> String {
        identity_key(&self.page)
    }
}

/// Host boundary of a mirror run: links outside it are never followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteScope {
    host: String,
}

impl SiteScope {
    pub fn new(base: &Url) -> Self {
        let host = base.host_str().unwrap_or_default().to_ascii_lowercase();
        Self {
            host: strip_www(&host).to_string(),
        }
    }

    /// True for the base host itself and any of its subdomains.
    pub fn contains(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                host == self.host || host.ends_with(&format!(".{}", self.host))
            }
            None => false,
        }
    }
}

/// What a link on a gallery page points to.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkKind {
    Gallery(GalleryRef),
    Image(Url),
}

/// Classify an absolute link found on a gallery owned by `owner`.
///
/// Image pages are recognised by an `/image/` path component (edit, delete
/// and upload actions excluded). Galleries must belong to the same owner,
/// contain no `image` segment, and not sit under a reserved site section
/// such as `/alice/profile` or `/alice/slideshow`.
pub fn classify_link(url: &Url, owner: &str) -> Option<LinkKind> {
    if !is_http(url) {
        return None;
    }
    let normalized = normalize_url(url);
    let path = normalized.path().to_ascii_lowercase();

    if path.contains("/image/") {
        if IMAGE_ACTIONS.iter().any(|action| path.contains(action)) {
            return None;
        }
        return Some(LinkKind::Image(normalized));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let (first, rest) = segments.split_first()?;
    if !first.eq_ignore_ascii_case(owner) {
        return None;
    }
    if rest.contains(&"image") {
        return None;
    }
    if let Some(section) = rest.first()
        && RESERVED_SECTIONS.contains(section)
    {
        return None;
    }

    GalleryRef::from_url(&normalized).map(LinkKind::Gallery)
}

/// Title for a gallery whose page carries none.
///
/// Uses the last path segment with underscores turned into spaces
/// (`/alice/summer_2019` → "summer 2019"), skipping a trailing `gallery`
/// segment. The account root and empty slugs inherit the parent's title.
pub fn fallback_title(gallery: &GalleryRef, parent_title: Option<&str>) -> Option<String> {
    let inherited = || parent_title.map(str::to_string);
    let segments: Vec<&str> = gallery.segments().collect();
    let slug = match segments.as_slice() {
        [.., parent, last]
            if last.eq_ignore_ascii_case("gallery") || last.eq_ignore_ascii_case("galleries") =>
        {
            *parent
        }
        [.., last] => *last,
        [] => return inherited(),
    };
    if slug.eq_ignore_ascii_case("root") {
        return inherited();
    }
    let title = slug.replace('_', " ").trim().to_string();
    if title.is_empty() {
        inherited()
    } else {
        Some(title)
    }
}

/// Canonical form of a gallery or item URL.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_query(None);
    normalized.set_fragment(None);
    let path = strip_view_suffix(url.path());
    normalized.set_path(&path);
    normalized
}

/// Identity used for visit-once bookkeeping: host (without `www.`), port
/// when non-default, and normalized path. The scheme is ignored.
pub fn identity_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = strip_www(&host);
    let path = strip_view_suffix(url.path());
    match url.port() {
        Some(port) => format!("{host}:{port}{path}"),
        None => format!("{host}{path}"),
    }
}

/// Host root of `base` (scheme, host and port only); relative paths join
/// onto it.
pub fn site_root(base: &Url) -> Url {
    let mut root = base.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
}

fn strip_view_suffix(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| segment.split(['&', ';']).next().unwrap_or_default())
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
