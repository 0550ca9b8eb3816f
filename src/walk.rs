//! Depth-first gallery traversal.
//!
//! [`GalleryWalker`] turns a set of start galleries into a lazy stream of
//! [`WalkEvent`]s: one `Entered` per visited gallery followed by its image
//! items, then its sub-galleries, depth first in document order.
//!
//! ```text
//! alice/root            Entered(root)
//! ├── image 1           Item(1)
//! ├── trip              Entered(trip)
//! │   ├── image 2       Item(2)
//! │   └── fjords        Entered(fjords) ...
//! └── cities            Entered(cities) ...
//! ```
//!
//! An explicit stack replaces recursion, so gallery depth is bounded only by
//! memory. A [`VisitedSet`] guarantees each gallery is fetched at most once,
//! which also makes cycles and galleries linked from two parents harmless.
//! Items linked from several galleries are yielded once, under the first
//! gallery that lists them.

use crate::cancel::CancelFlag;
use crate::gallery::{GalleryRef, ImageItem, fallback_title};
use crate::site::{FetchError, Site};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to do when a gallery page cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log it, skip that subtree, keep walking.
    #[default]
    Continue,
    /// Stop the walk after reporting the failure.
    Abort,
}

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("gallery {gallery} could not be fetched: {source}")]
    Gallery {
        gallery: GalleryRef,
        #[source]
        source: FetchError,
    },
}

/// A gallery that was fetched successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryVisit {
    pub gallery: GalleryRef,
    /// Page title, or the fallback derived from the URL and parent.
    pub title: Option<String>,
    pub depth: usize,
    /// Items this gallery contributes (already-seen items excluded).
    pub items: usize,
    pub sub_galleries: usize,
}

/// One image to mirror, with the context its filename needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkItem {
    pub item: ImageItem,
    pub gallery: GalleryRef,
    pub gallery_title: Option<String>,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalkEvent {
    Entered(GalleryVisit),
    Item(WalkItem),
}

/// Galleries visited so far, in visit order.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    seen: HashSet<GalleryRef>,
    order: Vec<GalleryRef>,
}

impl VisitedSet {
    /// Returns false if the gallery was already visited.
    pub fn insert(&mut self, gallery: &GalleryRef) -> bool {
        if !self.seen.insert(gallery.clone()) {
            return false;
        }
        self.order.push(gallery.clone());
        true
    }

    pub fn contains(&self, gallery: &GalleryRef) -> bool {
        self.seen.contains(gallery)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GalleryRef> {
        self.order.iter()
    }
}

struct Pending {
    gallery: GalleryRef,
    parent_title: Option<String>,
    depth: usize,
}

pub struct GalleryWalker<'s, S: Site + ?Sized> {
    site: &'s S,
    stack: Vec<Pending>,
    visited: VisitedSet,
    seen_items: HashSet<String>,
    buffer: VecDeque<WalkEvent>,
    policy: FailurePolicy,
    cancel: CancelFlag,
    halted: bool,
}

impl<'s, S: Site + ?Sized> GalleryWalker<'s, S> {
    /// Start points are walked in the given order; duplicates are visited
    /// once.
    pub fn new(
        site: &'s S,
        start_points: impl IntoIterator<Item = GalleryRef>,
        policy: FailurePolicy,
        cancel: CancelFlag,
    ) -> Self {
        let stack = start_points
            .into_iter()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|gallery| Pending {
                gallery,
                parent_title: None,
                depth: 0,
            })
            .collect();
        Self {
            site,
            stack,
            visited: VisitedSet::default(),
            seen_items: HashSet::new(),
            buffer: VecDeque::new(),
            policy,
            cancel,
            halted: false,
        }
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    /// Fetch the next unvisited gallery and queue its events. `None` once
    /// the stack is exhausted.
    fn visit_next(&mut self) -> Option<Result<(), WalkError>> {
        while let Some(pending) = self.stack.pop() {
            if !self.visited.insert(&pending.gallery) {
                debug!(gallery = %pending.gallery, "already visited");
                continue;
            }

            let page = match self.site.gallery(&pending.gallery) {
                Ok(page) => page,
                Err(source) => {
                    warn!(gallery = %pending.gallery, error = %source, "gallery fetch failed");
                    return Some(Err(WalkError::Gallery {
                        gallery: pending.gallery,
                        source,
                    }));
                }
            };

            let title = page
                .title
                .clone()
                .or_else(|| fallback_title(&pending.gallery, pending.parent_title.as_deref()));
            let items: Vec<ImageItem> = page
                .items
                .into_iter()
                .filter(|item| self.seen_items.insert(item.key()))
                .collect();
            info!(
                gallery = %pending.gallery,
                title = title.as_deref().unwrap_or("(untitled)"),
                items = items.len(),
                sub_galleries = page.sub_galleries.len(),
                "entered gallery"
            );

            self.buffer.push_back(WalkEvent::Entered(GalleryVisit {
                gallery: pending.gallery.clone(),
                title: title.clone(),
                depth: pending.depth,
                items: items.len(),
                sub_galleries: page.sub_galleries.len(),
            }));
            for item in items {
                self.buffer.push_back(WalkEvent::Item(WalkItem {
                    item,
                    gallery: pending.gallery.clone(),
                    gallery_title: title.clone(),
                    depth: pending.depth,
                }));
            }

            for child in page.sub_galleries.into_iter().rev() {
                if !self.visited.contains(&child) {
                    self.stack.push(Pending {
                        gallery: child,
                        parent_title: title.clone(),
                        depth: pending.depth + 1,
                    });
                }
            }
            return Some(Ok(()));
        }
        None
    }
}

impl<S: Site + ?Sized> Iterator for GalleryWalker<'_, S> {
    type Item = Result<WalkEvent, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.halted {
                return None;
            }
            if self.cancel.is_cancelled() {
                debug!(pending = self.stack.len(), "walk cancelled");
                self.halted = true;
                return None;
            }
            if let Some(event) = self.buffer.pop_front() {
                return Some(Ok(event));
            }
            match self.visit_next()? {
                Ok(()) => continue,
                Err(error) => {
                    if self.policy == FailurePolicy::Abort {
                        self.halted = true;
                    }
                    return Some(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockSite, gallery_ref};

    fn keys(events: &[WalkEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                WalkEvent::Entered(visit) => format!("G {}", visit.gallery.key()),
                WalkEvent::Item(item) => format!("I {}", item.item.key()),
            })
            .collect()
    }

    fn walk_all(
        site: &MockSite,
        starts: &[&str],
        policy: FailurePolicy,
    ) -> (Vec<WalkEvent>, Vec<WalkError>) {
        let walker = GalleryWalker::new(
            site,
            starts.iter().map(|s| gallery_ref(s)),
            policy,
            CancelFlag::new(),
        );
        let mut events = Vec::new();
        let mut errors = Vec::new();
        for step in walker {
            match step {
                Ok(event) => events.push(event),
                Err(error) => errors.push(error),
            }
        }
        (events, errors)
    }

    // =========================================================================
    // Order
    // =========================================================================

    #[test]
    fn depth_first_document_order() {
        let site = MockSite::new()
            .with_gallery(
                "alice/root",
                Some("Home"),
                &["alice/trip", "alice/cities"],
                &["alice/image/1"],
            )
            .with_gallery("alice/trip", Some("Trip"), &["alice/fjords"], &["alice/image/2"])
            .with_gallery("alice/fjords", None, &[], &["alice/image/3"])
            .with_gallery("alice/cities", Some("Cities"), &[], &["alice/image/4"]);

        let (events, errors) = walk_all(&site, &["alice/root"], FailurePolicy::Continue);
        assert!(errors.is_empty());
        assert_eq!(
            keys(&events),
            vec![
                "G pbase.com/alice/root",
                "I pbase.com/alice/image/1",
                "G pbase.com/alice/trip",
                "I pbase.com/alice/image/2",
                "G pbase.com/alice/fjords",
                "I pbase.com/alice/image/3",
                "G pbase.com/alice/cities",
                "I pbase.com/alice/image/4",
            ]
        );
    }

    #[test]
    fn depth_and_titles_propagate() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/summer_2019"], &[])
            .with_gallery("alice/summer_2019", None, &["alice/best"], &[])
            .with_gallery("alice/best", Some("Best of"), &[], &["alice/image/9"]);

        let (events, _) = walk_all(&site, &["alice/root"], FailurePolicy::Continue);
        let visits: Vec<(usize, Option<String>)> = events
            .iter()
            .filter_map(|e| match e {
                WalkEvent::Entered(v) => Some((v.depth, v.title.clone())),
                WalkEvent::Item(_) => None,
            })
            .collect();
        assert_eq!(
            visits,
            vec![
                (0, None),
                (1, Some("summer 2019".to_string())),
                (2, Some("Best of".to_string())),
            ]
        );
        let WalkEvent::Item(item) = events.last().unwrap() else {
            panic!("last event should be an item");
        };
        assert_eq!(item.gallery_title.as_deref(), Some("Best of"));
        assert_eq!(item.depth, 2);
    }

    // =========================================================================
    // Visit-once
    // =========================================================================

    #[test]
    fn cycles_and_shared_children_are_fetched_once() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/a", "alice/b"], &[])
            .with_gallery("alice/a", None, &["alice/shared", "alice/root"], &[])
            .with_gallery("alice/b", None, &["alice/shared", "alice/a"], &[])
            .with_gallery("alice/shared", None, &["alice/b"], &["alice/image/1"]);

        let walker = GalleryWalker::new(
            &site,
            [gallery_ref("alice/root")],
            FailurePolicy::Continue,
            CancelFlag::new(),
        );
        let count = walker.count();
        assert_eq!(count, 5);

        let fetched = site.gallery_fetches();
        let unique: HashSet<&String> = fetched.iter().collect();
        assert_eq!(fetched.len(), 4);
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn duplicate_start_points_visit_once() {
        let site = MockSite::new().with_gallery("alice/root", None, &[], &["alice/image/1"]);
        let (events, _) = walk_all(
            &site,
            &["alice/root", "https://www.pbase.com/alice/root/"],
            FailurePolicy::Continue,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(site.gallery_fetches().len(), 1);
    }

    #[test]
    fn item_in_two_galleries_is_yielded_once() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/a", "alice/b"], &[])
            .with_gallery("alice/a", Some("A"), &[], &["alice/image/7"])
            .with_gallery("alice/b", Some("B"), &[], &["alice/image/7", "alice/image/8"]);

        let (events, _) = walk_all(&site, &["alice/root"], FailurePolicy::Continue);
        let items: Vec<(String, Option<String>)> = events
            .iter()
            .filter_map(|e| match e {
                WalkEvent::Item(i) => Some((i.item.key(), i.gallery_title.clone())),
                WalkEvent::Entered(_) => None,
            })
            .collect();
        assert_eq!(
            items,
            vec![
                ("pbase.com/alice/image/7".to_string(), Some("A".to_string())),
                ("pbase.com/alice/image/8".to_string(), Some("B".to_string())),
            ]
        );
    }

    #[test]
    fn visited_set_records_order() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/a"], &[])
            .with_gallery("alice/a", None, &[], &[]);
        let mut walker = GalleryWalker::new(
            &site,
            [gallery_ref("alice/root")],
            FailurePolicy::Continue,
            CancelFlag::new(),
        );
        while walker.next().is_some() {}
        let order: Vec<&str> = walker.visited().iter().map(|g| g.key()).collect();
        assert_eq!(order, vec!["pbase.com/alice/root", "pbase.com/alice/a"]);
    }

    // =========================================================================
    // Failure policy and cancellation
    // =========================================================================

    #[test]
    fn continue_policy_skips_failed_subtree() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/broken", "alice/ok"], &[])
            .with_failing_gallery("alice/broken")
            .with_gallery("alice/ok", None, &[], &["alice/image/1"]);

        let (events, errors) = walk_all(&site, &["alice/root"], FailurePolicy::Continue);
        assert_eq!(errors.len(), 1);
        let WalkError::Gallery { gallery, .. } = &errors[0];
        assert_eq!(gallery.key(), "pbase.com/alice/broken");
        assert!(keys(&events).contains(&"I pbase.com/alice/image/1".to_string()));
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/broken", "alice/ok"], &[])
            .with_failing_gallery("alice/broken")
            .with_gallery("alice/ok", None, &[], &["alice/image/1"]);

        let (events, errors) = walk_all(&site, &["alice/root"], FailurePolicy::Abort);
        assert_eq!(errors.len(), 1);
        assert_eq!(keys(&events), vec!["G pbase.com/alice/root"]);
        assert!(!site.gallery_fetches().contains(&"pbase.com/alice/ok".to_string()));
    }

    #[test]
    fn failing_start_point_under_continue_moves_on() {
        let site = MockSite::new()
            .with_failing_gallery("alice/gone")
            .with_gallery("alice/root", None, &[], &["alice/image/1"]);
        let (events, errors) =
            walk_all(&site, &["alice/gone", "alice/root"], FailurePolicy::Continue);
        assert_eq!(errors.len(), 1);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn cancelled_walk_yields_nothing() {
        let site = MockSite::new().with_gallery("alice/root", None, &[], &["alice/image/1"]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let walker = GalleryWalker::new(
            &site,
            [gallery_ref("alice/root")],
            FailurePolicy::Continue,
            cancel,
        );
        assert_eq!(walker.count(), 0);
        assert!(site.ops().is_empty());
    }

    #[test]
    fn cancel_mid_walk_stops_fetching() {
        let site = MockSite::new()
            .with_gallery("alice/root", None, &["alice/a"], &["alice/image/1"])
            .with_gallery("alice/a", None, &[], &["alice/image/2"]);
        let cancel = CancelFlag::new();
        let mut walker = GalleryWalker::new(
            &site,
            [gallery_ref("alice/root")],
            FailurePolicy::Continue,
            cancel.clone(),
        );
        assert!(matches!(walker.next(), Some(Ok(WalkEvent::Entered(_)))));
        cancel.cancel();
        assert!(walker.next().is_none());
        assert_eq!(site.gallery_fetches(), vec!["pbase.com/alice/root".to_string()]);
    }
}
