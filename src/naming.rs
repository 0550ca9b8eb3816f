//! Output filenames for mirrored images.
//!
//! Every saved image gets a human-readable name built from what PBase shows
//! about it, rather than the opaque id in its URL:
//!
//! - caption + gallery title: `Sunset` in "Trip 2024" → `Trip 2024 - Sunset.jpg`
//! - caption already naming the gallery: `Trip 2024 day one` → `Trip 2024 day one.jpg`
//! - no caption: `DSC_001.JPG` in an untitled gallery → `DSC_001.JPG`
//! - collision with an existing file → `Trip 2024 - Sunset_1.jpg`
//!
//! ## Filesystem safety
//!
//! Names must be valid on every common filesystem, so [`sanitize`] replaces
//! reserved characters (`< > : " / \ | ? *`) and control characters with `_`,
//! collapses whitespace, trims leading/trailing spaces and dots, and guards
//! Windows device names (`CON` → `CON_`). Dot-trimming also keeps mirrored
//! files from ever being hidden, which matters because dotfiles in the output
//! directory belong to the mirror itself (ledger, partial downloads).
//!
//! ## Collisions
//!
//! [`ExistingNames`] is the set of names already taken in the output
//! directory, compared case-insensitively so a mirror copied to a
//! case-insensitive filesystem stays intact. [`derive_name`] is pure;
//! [`ExistingNames::claim`] derives and registers in one step.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use url::Url;

/// Default and upper bound for the base-name length, in characters.
pub const MAX_BASE_LEN: usize = 200;

/// Smallest accepted `max_base_len` setting.
pub const MIN_BASE_LEN: usize = 16;

/// Byte ceiling for a sanitized base name. Leaves room under the common
/// 255-byte `NAME_MAX` for a `_N` suffix, a 5-byte extension and the
/// `.<name>.part` wrapping used while downloading.
pub const MAX_BASE_BYTES: usize = 200;

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const PLACEHOLDER_PREFIX: &str = "m_pbase";
const PLACEHOLDER_NAMES: &[&str] = &["pixel.gif", "blank.gif"];

/// Stem used when neither caption nor filename leave anything printable.
const FALLBACK_STEM: &str = "image";

/// Site chrome served in place of a real photo.
///
/// - `m_pbase_missing.gif` → true
/// - `pixel.gif`, `BLANK.GIF` → true
/// - `sunset.jpg` → false
pub fn is_placeholder(filename: &str) -> bool {
    let lower = filename.trim().to_ascii_lowercase();
    lower.starts_with(PLACEHOLDER_PREFIX) || PLACEHOLDER_NAMES.contains(&lower.as_str())
}

/// Last non-empty path segment of a URL.
pub fn url_filename(url: &Url) -> Option<&str> {
    url.path_segments()?.rev().find(|segment| !segment.is_empty())
}

/// Split `name.ext` into stem and extension.
///
/// Only a short alphanumeric suffix counts as an extension, so captions such
/// as `Dr. Smith` stay whole:
/// - `"IMG_001.JPG"` → `("IMG_001", Some("JPG"))`
/// - `"archive.tar.gz"` → `("archive.tar", Some("gz"))`
/// - `"Dr. Smith"` → `("Dr. Smith", None)`
/// - `".hidden"` → `(".hidden", None)`
pub fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (filename, None),
    }
}

/// Make `raw` safe as a base filename, at most `max_len` characters and
/// [`MAX_BASE_BYTES`] bytes long.
pub fn sanitize(raw: &str, max_len: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut replaced = String::with_capacity(collapsed.len().min(MAX_BASE_BYTES));
    let chars = collapsed.chars().map(|c| {
        if c.is_control() || RESERVED_CHARS.contains(&c) {
            '_'
        } else {
            c
        }
    });
    for c in chars.take(max_len) {
        if replaced.len() + c.len_utf8() > MAX_BASE_BYTES {
            break;
        }
        replaced.push(c);
    }
    let trimmed = replaced.trim_matches(|c: char| c == ' ' || c == '.');

    let device_stem = trimmed.split('.').next().unwrap_or_default();
    if DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(device_stem))
    {
        format!("{trimmed}_")
    } else {
        trimmed.to_string()
    }
}

/// Everything that goes into an image's filename.
#[derive(Debug, Clone)]
pub struct NameRequest<'a> {
    pub gallery_title: Option<&'a str>,
    pub caption: Option<&'a str>,
    pub original_filename: &'a str,
    pub resolved_url: Option<&'a Url>,
    pub max_base_len: usize,
}

impl<'a> NameRequest<'a> {
    pub fn new(original_filename: &'a str) -> Self {
        Self {
            gallery_title: None,
            caption: None,
            original_filename,
            resolved_url: None,
            max_base_len: MAX_BASE_LEN,
        }
    }

    pub fn gallery_title(mut self, title: Option<&'a str>) -> Self {
        self.gallery_title = title;
        self
    }

    pub fn caption(mut self, caption: Option<&'a str>) -> Self {
        self.caption = caption;
        self
    }

    pub fn resolved_url(mut self, url: &'a Url) -> Self {
        self.resolved_url = Some(url);
        self
    }

    pub fn max_base_len(mut self, max_base_len: usize) -> Self {
        self.max_base_len = max_base_len.clamp(MIN_BASE_LEN, MAX_BASE_LEN);
        self
    }

    /// True when either the listed filename or the resolved binary is site
    /// chrome; such images are never saved.
    pub fn is_placeholder(&self) -> bool {
        is_placeholder(self.original_filename)
            || self
                .resolved_url
                .and_then(url_filename)
                .is_some_and(is_placeholder)
    }

    fn extension(&self) -> Option<&'a str> {
        split_extension(self.original_filename).1.or_else(|| {
            self.resolved_url
                .and_then(url_filename)
                .and_then(|name| split_extension(name).1)
        })
    }
}

/// Pick a free filename for `request`, or `None` for placeholder images.
///
/// Does not register the name; see [`ExistingNames::claim`].
pub fn derive_name(request: &NameRequest<'_>, existing: &ExistingNames) -> Option<String> {
    if request.is_placeholder() {
        return None;
    }

    let extension = request.extension();
    let (original_stem, _) = split_extension(request.original_filename);
    let caption = request.caption.map(str::trim).filter(|c| !c.is_empty());

    let mut base = match caption {
        Some(caption) => strip_suffix_extension(caption, extension).to_string(),
        None => original_stem.to_string(),
    };
    if let Some(title) = request.gallery_title.map(str::trim).filter(|t| !t.is_empty())
        && !base.to_lowercase().starts_with(&title.to_lowercase())
    {
        base = format!("{title} - {base}");
    }

    let mut stem = sanitize(&base, request.max_base_len);
    if stem.is_empty() {
        stem = sanitize(original_stem, request.max_base_len);
    }
    if stem.is_empty() {
        stem = FALLBACK_STEM.to_string();
    }

    Some(existing.free_name(&stem, extension))
}

fn strip_suffix_extension<'c>(caption: &'c str, extension: Option<&str>) -> &'c str {
    let Some(extension) = extension else {
        return caption;
    };
    let suffix_len = extension.len() + 1;
    if caption.len() > suffix_len && caption.is_char_boundary(caption.len() - suffix_len) {
        let (head, tail) = caption.split_at(caption.len() - suffix_len);
        if tail.eq_ignore_ascii_case(&format!(".{extension}")) {
            return head;
        }
    }
    caption
}

fn compose(stem: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

/// Names already taken in an output directory.
#[derive(Debug, Clone, Default)]
pub struct ExistingNames {
    folded: HashSet<String>,
}

impl ExistingNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names present in `dir`, ignoring dotfiles. A missing directory is
    /// empty.
    pub fn scan(dir: &Path) -> io::Result<Self> {
        let mut names = Self::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with('.') {
                names.register(&name);
            }
        }
        Ok(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.folded.contains(&name.to_lowercase())
    }

    /// Returns false if the name was already taken.
    pub fn register(&mut self, name: &str) -> bool {
        self.folded.insert(name.to_lowercase())
    }

    /// Give a name back after its download failed.
    pub fn release(&mut self, name: &str) -> bool {
        self.folded.remove(&name.to_lowercase())
    }

    /// Derive and register in one step.
    pub fn claim(&mut self, request: &NameRequest<'_>) -> Option<String> {
        let name = derive_name(request, self)?;
        self.register(&name);
        Some(name)
    }

    pub fn len(&self) -> usize {
        self.folded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }

    fn free_name(&self, stem: &str, extension: Option<&str>) -> String {
        let candidate = compose(stem, extension);
        if !self.contains(&candidate) {
            return candidate;
        }
        let mut counter = 1usize;
        loop {
            let candidate = compose(&format!("{stem}_{counter}"), extension);
            if !self.contains(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}
