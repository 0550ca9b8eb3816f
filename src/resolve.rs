//! Size resolution: pick the largest downloadable variant of an image.
//!
//! An item page offers up to three labelled size links plus the image it
//! renders inline. Candidates are tried in strict priority order:
//!
//! | Priority | Label       | Source                             |
//! |----------|-------------|------------------------------------|
//! | 1        | `original`  | size link                          |
//! | 2        | `large`     | size link                          |
//! | 3        | `medium`    | size link                          |
//! | 4        | `displayed` | inline `<img>` on the item page    |
//!
//! A size link may point straight at the binary or at another page that
//! shows it; [`Site::binary_url`] settles which. Candidates that lead
//! nowhere or only to a placeholder asset fall through to the next label.
//! A candidate whose page cannot be fetched fails the item: falling back to
//! a smaller size on a transient error would silently mirror the wrong file.

use crate::naming::{is_placeholder, url_filename};
use crate::site::{FetchError, ItemPage, Site};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeLabel {
    Original,
    Large,
    Medium,
    Displayed,
}

impl SizeLabel {
    /// All labels, most preferred first.
    pub const PRIORITY: [SizeLabel; 4] = [
        SizeLabel::Original,
        SizeLabel::Large,
        SizeLabel::Medium,
        SizeLabel::Displayed,
    ];

    /// Labels offered as links on an item page.
    pub const LINKED: [SizeLabel; 3] = [SizeLabel::Original, SizeLabel::Large, SizeLabel::Medium];

    pub fn as_str(self) -> &'static str {
        match self {
            SizeLabel::Original => "original",
            SizeLabel::Large => "large",
            SizeLabel::Medium => "medium",
            SizeLabel::Displayed => "displayed",
        }
    }
}

impl fmt::Display for SizeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeCandidate {
    pub label: SizeLabel,
    pub url: Url,
}

/// The binary chosen for download.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub label: SizeLabel,
    pub url: Url,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no size link or displayed image found")]
    NotFound,
    #[error("only placeholder images available")]
    Placeholder,
    #[error("{label} size could not be fetched: {source}")]
    Fetch {
        label: SizeLabel,
        #[source]
        source: FetchError,
    },
}

/// Every candidate the page offers, highest priority first.
pub fn candidates(page: &ItemPage) -> Vec<SizeCandidate> {
    let linked = SizeLabel::LINKED.into_iter().filter_map(|label| {
        page.size_links
            .iter()
            .find(|link| link.label == label)
            .map(|link| SizeCandidate {
                label,
                url: link.url.clone(),
            })
    });
    let displayed = page.displayed.iter().map(|url| SizeCandidate {
        label: SizeLabel::Displayed,
        url: url.clone(),
    });
    linked.chain(displayed).collect()
}

/// Highest-priority candidate, without consulting the network.
pub fn best(page: &ItemPage) -> Option<SizeCandidate> {
    candidates(page).into_iter().next()
}

/// Walk the candidates in priority order until one yields a real image.
pub fn resolve<S: Site + ?Sized>(
    site: &S,
    page: &ItemPage,
    referer: &Url,
) -> Result<Resolved, ResolveError> {
    let mut saw_placeholder = false;

    for candidate in candidates(page) {
        let binary = match candidate.label {
            SizeLabel::Displayed => Some(candidate.url),
            label => site
                .binary_url(&candidate.url, referer)
                .map_err(|source| ResolveError::Fetch { label, source })?,
        };
        let Some(url) = binary else {
            debug!(label = %candidate.label, "size page shows no image");
            continue;
        };
        if url_filename(&url).is_some_and(is_placeholder) {
            debug!(label = %candidate.label, url = %url, "skipping placeholder");
            saw_placeholder = true;
            continue;
        }
        return Ok(Resolved {
            label: candidate.label,
            url,
        });
    }

    Err(if saw_placeholder {
        ResolveError::Placeholder
    } else {
        ResolveError::NotFound
    })
}
