//! HTML extraction for PBase pages.
//!
//! Pure functions from page text to the structures in [`crate::site`]; no
//! network access happens here, which keeps every heuristic testable against
//! saved pages in `fixtures/pages/`.
//!
//! PBase markup has drifted over the years, so each lookup tries a short list
//! of selectors in priority order and falls back to the document `<title>`.

use crate::gallery::{GalleryRef, ImageItem, LinkKind, SiteScope, classify_link};
use crate::naming::{is_placeholder, url_filename};
use crate::resolve::SizeLabel;
use crate::site::{GalleryPage, ItemPage, SizeLink};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use url::Url;

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static IMAGES: LazyLock<Selector> = LazyLock::new(|| selector("img[src]"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static FORMS: LazyLock<Selector> = LazyLock::new(|| selector("form"));
static INPUTS: LazyLock<Selector> = LazyLock::new(|| selector("input"));

static GALLERY_TITLE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "h1#gallerytitle",
        "h1.gallerytitle",
        "div#gallerytitle",
        "div.gallerytitle",
        "h1",
        "h2",
    ])
});

static CAPTION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "div#imagecaption",
        "div.imagecaption",
        "div.caption",
        "div#caption",
        "span.caption",
        "h1",
        "h2",
    ])
});

static SITE_SUFFIXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\s*photo\s*-\s*[^|]*photos at pbase\.com.*$",
        r"(?i)\s*\|\s*pbase\.com.*$",
        r"(?i)\s*-\s*pbase\.com.*$",
        r"\s*\|\s*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static regex is valid"))
    .collect()
});

static STYLE_WIDTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[;\s])width\s*:\s*(\d+)").expect("static regex is valid")
});
static STYLE_HEIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[;\s])height\s*:\s*(\d+)").expect("static regex is valid")
});

/// Image sources that are site chrome rather than photos.
const IGNORED_IMAGE_TOKENS: &[&str] = &["m_pbase", "logo", "pixel.gif", "blank.gif"];
const PHOTO_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];
const EXTENSION_BONUS: u64 = 10_000_000;
const IMAGE_PATH_BONUS: u64 = 5_000_000;

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

fn selectors(list: &[&'static str]) -> Vec<Selector> {
    list.iter().copied().map(selector).collect()
}

/// Strip PBase branding from a title or caption and collapse whitespace.
///
/// `"Sunset photo - alice photos at pbase.com"` → `"Sunset"`.
pub fn clean_label(raw: &str) -> String {
    let mut label = collapse_whitespace(raw);
    for pattern in SITE_SUFFIXES.iter() {
        label = pattern.replace(&label, "").into_owned();
    }
    label
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—'))
        .to_string()
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first element matched by the first selector that yields any
/// text, falling back to the part of `<title>` before the first `|`.
fn first_label(document: &Html, candidates: &[Selector]) -> Option<String> {
    for candidate in candidates {
        if let Some(element) = document.select(candidate).next() {
            let text = clean_label(&element_text(element));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    let title = document.select(&TITLE).next().map(element_text)?;
    let head = title.split('|').next().unwrap_or_default();
    Some(clean_label(head)).filter(|t| !t.is_empty())
}

/// Resolve an `href`/`src` against the page it appeared on.
fn absolute_link(reference: &str, base: &Url) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }
    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    base.join(reference).ok()
}

// ============================================================================
// Gallery pages
// ============================================================================

/// Extract title, sub-galleries and image items from a gallery page.
///
/// Only links inside `scope` are considered; sub-galleries must share the
/// gallery's owner. A link back to the gallery itself is dropped.
pub fn parse_gallery(html: &str, gallery: &GalleryRef, scope: &SiteScope) -> GalleryPage {
    let document = Html::parse_document(html);
    let title = first_label(&document, &GALLERY_TITLE);

    let mut sub_galleries = Vec::new();
    let mut seen_galleries = HashSet::new();
    let mut items: Vec<ImageItem> = Vec::new();
    let mut item_index: HashMap<String, usize> = HashMap::new();

    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(link) = absolute_link(href, gallery.url()) else {
            continue;
        };
        if !scope.contains(&link) {
            continue;
        }

        match classify_link(&link, gallery.owner()) {
            Some(LinkKind::Image(page)) => {
                let item = ImageItem::new(page);
                let caption = anchor_caption(anchor);
                let original_filename = anchor_filename(anchor, gallery.url());
                match item_index.get(&item.key()).copied() {
                    // Thumbnails and text links point at the same page; keep
                    // the first position but take details from either.
                    Some(index) => {
                        let listed = &mut items[index];
                        if listed.caption.is_none() {
                            listed.caption = caption;
                        }
                        if listed.original_filename.is_none() {
                            listed.original_filename = original_filename;
                        }
                    }
                    None => {
                        item_index.insert(item.key(), items.len());
                        items.push(ImageItem {
                            caption,
                            original_filename,
                            ..item
                        });
                    }
                }
            }
            Some(LinkKind::Gallery(child)) => {
                if child != *gallery && seen_galleries.insert(child.key().to_string()) {
                    sub_galleries.push(child);
                }
            }
            None => {}
        }
    }

    GalleryPage {
        title,
        sub_galleries,
        items,
    }
}

fn anchor_caption(anchor: ElementRef<'_>) -> Option<String> {
    let text = clean_label(&element_text(anchor));
    if !text.is_empty() {
        return Some(text);
    }
    let image = anchor.select(&IMAGES).next()?;
    let alt = image
        .value()
        .attr("alt")
        .or_else(|| image.value().attr("title"))?;
    Some(clean_label(alt)).filter(|c| !c.is_empty())
}

/// Filename of the thumbnail inside an item anchor, which PBase serves under
/// the uploaded image's name.
fn anchor_filename(anchor: ElementRef<'_>, base: &Url) -> Option<String> {
    let src = anchor.select(&IMAGES).next()?.value().attr("src")?;
    let thumb = base.join(src.trim()).ok()?;
    let name = url_filename(&thumb)?;
    (!is_placeholder(name)).then(|| name.to_string())
}

// ============================================================================
// Item pages
// ============================================================================

/// Extract caption, size links and the inline image from an item page.
///
/// A size link is any anchor whose text mentions a size label ("original",
/// "large", "medium"); the first anchor per label wins.
pub fn parse_item(html: &str, page: &Url) -> ItemPage {
    let document = Html::parse_document(html);
    let caption = first_label(&document, &CAPTION);

    let mut size_links: Vec<SizeLink> = Vec::new();
    for anchor in document.select(&ANCHORS) {
        let text = element_text(anchor).to_lowercase();
        if text.is_empty() {
            continue;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        for label in SizeLabel::LINKED {
            if !text.contains(label.as_str()) || size_links.iter().any(|l| l.label == label) {
                continue;
            }
            if let Some(url) = absolute_link(href, page) {
                size_links.push(SizeLink { label, url });
            }
        }
    }
    size_links.sort_by_key(|link| link.label);

    ItemPage {
        caption,
        size_links,
        displayed: display_image(&document, page),
    }
}

/// The photo rendered on a page, parsed from raw HTML.
pub fn display_image_in(html: &str, page: &Url) -> Option<Url> {
    display_image(&Html::parse_document(html), page)
}

/// Pick the image most likely to be the photo rather than chrome.
///
/// Score is pixel area (from `width`/`height` attributes or inline style)
/// plus bonuses for a photo extension and an `/image/` path. Ties go to
/// the earliest image in the document.
pub fn display_image(document: &Html, page: &Url) -> Option<Url> {
    let mut best: Option<(u64, Url)> = None;
    for image in document.select(&IMAGES) {
        let Some(src) = image.value().attr("src") else {
            continue;
        };
        let lower = src.trim().to_ascii_lowercase();
        if lower.is_empty() || IGNORED_IMAGE_TOKENS.iter().any(|t| lower.contains(t)) {
            continue;
        }
        let Some(url) = absolute_link(src, page) else {
            continue;
        };
        let score = display_score(image, &lower);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, url));
        }
    }
    best.map(|(_, url)| url)
}

fn display_score(image: ElementRef<'_>, lower_src: &str) -> u64 {
    let style = image.value().attr("style").unwrap_or_default();
    let width = dimension(image.value().attr("width"), style, &STYLE_WIDTH);
    let height = dimension(image.value().attr("height"), style, &STYLE_HEIGHT);

    let path = lower_src.split(['?', '#']).next().unwrap_or_default();
    let mut score = width.saturating_mul(height);
    if PHOTO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        score = score.saturating_add(EXTENSION_BONUS);
    }
    if lower_src.contains("/image/") {
        score = score.saturating_add(IMAGE_PATH_BONUS);
    }
    score
}

fn dimension(attribute: Option<&str>, style: &str, pattern: &Regex) -> u64 {
    let from_attribute = attribute.and_then(|value| {
        let digits: String = value
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    });
    from_attribute
        .or_else(|| {
            pattern
                .captures(style)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .unwrap_or(0)
}

// ============================================================================
// Login
// ============================================================================

/// The site's login form with its hidden fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: Option<String>,
    /// Every named input with its default value, in document order.
    pub fields: Vec<(String, String)>,
    pub username_field: Option<String>,
    pub password_field: String,
}

impl LoginForm {
    /// Form fields with the credentials filled in.
    pub fn payload(&self, username: &str, password: &str) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(name, value)| {
                let value = if Some(name) == self.username_field.as_ref() {
                    username.to_string()
                } else if *name == self.password_field {
                    password.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }
}

/// First POST form containing a password input.
///
/// The username field is the first text or email input whose name mentions
/// "user", else the first text input.
pub fn login_form(html: &str) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let form = document.select(&FORMS).find(|form| {
        form.value()
            .attr("method")
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("post"))
            && form.select(&INPUTS).any(|input| input_type(input) == "password")
    })?;

    let mut fields = Vec::new();
    let mut username_field = None;
    let mut first_text = None;
    let mut password_field = None;

    for input in form.select(&INPUTS) {
        let Some(name) = input.value().attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        match input_type(input).as_str() {
            "password" => {
                password_field.get_or_insert_with(|| name.to_string());
            }
            "text" | "email" => {
                first_text.get_or_insert_with(|| name.to_string());
                if username_field.is_none() && name.to_ascii_lowercase().contains("user") {
                    username_field = Some(name.to_string());
                }
            }
            _ => {}
        }
        let value = input.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }

    Some(LoginForm {
        action: form.value().attr("action").map(str::to_string),
        fields,
        username_field: username_field.or(first_text),
        password_field: password_field?,
    })
}

fn input_type(input: ElementRef<'_>) -> String {
    input
        .value()
        .attr("type")
        .unwrap_or("text")
        .trim()
        .to_ascii_lowercase()
}

/// A page served to a logged-in session offers "logout" and no "login".
pub fn looks_authenticated(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("logout") && !lower.contains("login")
}
