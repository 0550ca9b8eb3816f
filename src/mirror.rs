//! The mirror run: walk, resolve, name, download, record.
//!
//! [`run`] drives a [`GalleryWalker`] over the start galleries and turns each
//! yielded item into a file in the output directory:
//!
//! ```text
//! ledger hit? ──yes──→ Existing
//!     │no
//! item page ──→ resolve size ──→ claim name ──→ download ──→ ledger
//!     │              │                │              │
//!   Failed      NotFound /       Placeholder       Failed / Cancelled
//!               Placeholder / Failed              (name released)
//! ```
//!
//! Per-item problems never stop the run; they are counted in the
//! [`RunReport`]. Gallery failures follow the [`FailurePolicy`].
//!
//! ## Parallelism
//!
//! With `workers > 1`, items are processed on a rayon pool fed by the walker
//! through `par_bridge`. The walker itself stays single-threaded. Name
//! claiming and ledger updates happen under mutexes, and the site's throttle
//! is global, so parallel runs are never faster than `delay` allows. Name
//! assignment order is no longer deterministic when items collide.

use crate::cancel::CancelFlag;
use crate::download;
use crate::gallery::GalleryRef;
use crate::ledger::{Ledger, LedgerEntry};
use crate::naming::{ExistingNames, NameRequest, url_filename};
use crate::resolve::{self, ResolveError, SizeLabel};
use crate::site::{DownloadError, Site};
use crate::walk::{FailurePolicy, GalleryWalker, WalkError, WalkEvent, WalkItem};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Filename used when neither the listing nor the binary URL name the file.
const FALLBACK_FILENAME: &str = "image.jpg";

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("run aborted: {0}")]
    GalleryAborted(#[source] WalkError),
    #[error("could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub output_dir: PathBuf,
    pub start_points: Vec<GalleryRef>,
    pub policy: FailurePolicy,
    pub workers: usize,
    pub max_base_len: usize,
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Saved {
        filename: String,
        label: SizeLabel,
        bytes: u64,
    },
    Existing {
        filename: String,
    },
    Placeholder,
    NotFound,
    Failed {
        reason: String,
    },
    Cancelled,
}

/// Progress notifications for the CLI printer.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    GalleryEntered {
        index: usize,
        depth: usize,
        title: Option<String>,
        url: String,
        items: usize,
    },
    GalleryFailed {
        url: String,
        reason: String,
    },
    ItemFinished {
        depth: usize,
        page: String,
        caption: Option<String>,
        outcome: ItemOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub target: String,
    pub reason: String,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub galleries_visited: usize,
    pub galleries_failed: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub placeholders: usize,
    pub not_found: usize,
    pub failed: usize,
    pub bytes: u64,
    pub cancelled: bool,
    pub failures: Vec<Failure>,
}

impl RunReport {
    fn record_item(&mut self, page: &str, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Saved { bytes, .. } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            ItemOutcome::Existing { .. } => self.already_present += 1,
            ItemOutcome::Placeholder => self.placeholders += 1,
            ItemOutcome::NotFound => self.not_found += 1,
            ItemOutcome::Failed { reason } => {
                self.failed += 1;
                self.failures.push(Failure {
                    target: page.to_string(),
                    reason: reason.clone(),
                });
            }
            ItemOutcome::Cancelled => {}
        }
    }

    pub fn items_seen(&self) -> usize {
        self.downloaded + self.already_present + self.placeholders + self.not_found + self.failed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} already mirrored, {} failed ({} galleries)",
            self.downloaded, self.already_present, self.failed, self.galleries_visited
        )?;
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        Ok(())
    }
}

/// Mirror every gallery reachable from `options.start_points` into
/// `options.output_dir`.
pub fn run<S: Site + ?Sized>(
    site: &S,
    options: &MirrorOptions,
    cancel: &CancelFlag,
    events: Option<Sender<MirrorEvent>>,
) -> Result<RunReport, MirrorError> {
    std::fs::create_dir_all(&options.output_dir)?;
    let names = ExistingNames::scan(&options.output_dir)?;
    let ledger = Ledger::load(&options.output_dir);
    info!(
        output = %options.output_dir.display(),
        existing_files = names.len(),
        ledger_entries = ledger.len(),
        workers = options.workers,
        "starting mirror"
    );

    let mirror = Mirror {
        site,
        options,
        cancel,
        events: events.map(Mutex::new),
        names: Mutex::new(names),
        ledger: Mutex::new(ledger),
        report: Mutex::new(RunReport::default()),
    };
    let walker = GalleryWalker::new(
        site,
        options.start_points.iter().cloned(),
        options.policy,
        cancel.clone(),
    );

    let outcome = if options.workers <= 1 {
        mirror.drive(walker)
    } else {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .build()
        {
            Ok(pool) => pool.install(|| mirror.drive_parallel(walker)),
            Err(e) => Err(e.into()),
        }
    };

    mirror.flush_ledger();
    let mut report = mirror
        .report
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    report.cancelled = cancel.is_cancelled();
    outcome?;

    info!(%report, "mirror finished");
    Ok(report)
}

struct Mirror<'a, S: Site + ?Sized> {
    site: &'a S,
    options: &'a MirrorOptions,
    cancel: &'a CancelFlag,
    events: Option<Mutex<Sender<MirrorEvent>>>,
    names: Mutex<ExistingNames>,
    ledger: Mutex<Ledger>,
    report: Mutex<RunReport>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: Site + ?Sized> Mirror<'_, S> {
    fn drive<I>(&self, walk: I) -> Result<(), MirrorError>
    where
        I: Iterator<Item = Result<WalkEvent, WalkError>>,
    {
        for step in walk {
            self.handle(step)?;
        }
        Ok(())
    }

    fn drive_parallel<I>(&self, walk: I) -> Result<(), MirrorError>
    where
        I: Iterator<Item = Result<WalkEvent, WalkError>> + Send,
    {
        walk.par_bridge().try_for_each(|step| self.handle(step))
    }

    fn handle(&self, step: Result<WalkEvent, WalkError>) -> Result<(), MirrorError> {
        match step {
            Ok(WalkEvent::Entered(visit)) => {
                let index = {
                    let mut report = lock(&self.report);
                    report.galleries_visited += 1;
                    report.galleries_visited
                };
                self.emit(MirrorEvent::GalleryEntered {
                    index,
                    depth: visit.depth,
                    title: visit.title,
                    url: visit.gallery.url().to_string(),
                    items: visit.items,
                });
                Ok(())
            }
            Ok(WalkEvent::Item(item)) => {
                let outcome = self.process(&item);
                self.finish(&item, outcome);
                Ok(())
            }
            Err(error) => {
                let WalkError::Gallery { gallery, source } = &error;
                {
                    let mut report = lock(&self.report);
                    report.galleries_failed += 1;
                    report.failures.push(Failure {
                        target: gallery.url().to_string(),
                        reason: source.to_string(),
                    });
                }
                self.emit(MirrorEvent::GalleryFailed {
                    url: gallery.url().to_string(),
                    reason: source.to_string(),
                });
                match self.options.policy {
                    FailurePolicy::Continue => Ok(()),
                    FailurePolicy::Abort => Err(MirrorError::GalleryAborted(error)),
                }
            }
        }
    }

    fn process(&self, walk_item: &WalkItem) -> ItemOutcome {
        if self.cancel.is_cancelled() {
            return ItemOutcome::Cancelled;
        }
        let dir = &self.options.output_dir;
        let key = walk_item.item.key();
        if let Some(entry) = lock(&self.ledger).find(&key, dir) {
            return ItemOutcome::Existing {
                filename: entry.filename.clone(),
            };
        }

        let page_url = &walk_item.item.page;
        let page = match self.site.item(page_url) {
            Ok(page) => page,
            Err(e) => {
                return ItemOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let resolved = match resolve::resolve(self.site, &page, page_url) {
            Ok(resolved) => resolved,
            Err(ResolveError::NotFound) => return ItemOutcome::NotFound,
            Err(ResolveError::Placeholder) => return ItemOutcome::Placeholder,
            Err(e @ ResolveError::Fetch { .. }) => {
                return ItemOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        debug!(page = %page_url, label = %resolved.label, url = %resolved.url, "resolved");

        let original = walk_item
            .item
            .original_filename
            .clone()
            .or_else(|| url_filename(&resolved.url).map(str::to_string))
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
        let caption = page.caption.as_deref().or(walk_item.item.caption.as_deref());
        let request = NameRequest::new(&original)
            .gallery_title(walk_item.gallery_title.as_deref())
            .caption(caption)
            .resolved_url(&resolved.url)
            .max_base_len(self.options.max_base_len);

        let Some(filename) = lock(&self.names).claim(&request) else {
            return ItemOutcome::Placeholder;
        };

        match download::save(self.site, &resolved.url, page_url, dir, &filename, self.cancel) {
            Ok(saved) => {
                self.record(
                    key,
                    LedgerEntry {
                        filename: filename.clone(),
                        source_url: resolved.url.to_string(),
                        label: resolved.label,
                        bytes: saved.bytes,
                        sha256: saved.sha256,
                    },
                );
                ItemOutcome::Saved {
                    filename,
                    label: resolved.label,
                    bytes: saved.bytes,
                }
            }
            Err(error) => {
                lock(&self.names).release(&filename);
                match error {
                    DownloadError::Cancelled => ItemOutcome::Cancelled,
                    other => ItemOutcome::Failed {
                        reason: other.to_string(),
                    },
                }
            }
        }
    }

    /// Record a saved file and write the ledger at once, so every file on
    /// disk is in the ledger even if the process dies mid-run.
    fn record(&self, key: String, entry: LedgerEntry) {
        let mut ledger = lock(&self.ledger);
        ledger.record(key, entry);
        if let Err(e) = ledger.save(&self.options.output_dir) {
            warn!(error = %e, "could not save ledger");
        }
    }

    fn flush_ledger(&self) {
        let mut ledger = lock(&self.ledger);
        if ledger.unsaved() == 0 {
            return;
        }
        if let Err(e) = ledger.save(&self.options.output_dir) {
            warn!(error = %e, "could not save ledger");
        }
    }

    fn finish(&self, walk_item: &WalkItem, outcome: ItemOutcome) {
        let page = walk_item.item.page.as_str();
        match &outcome {
            ItemOutcome::Saved { filename, label, bytes } => {
                info!(file = %filename, %label, bytes, "downloaded");
            }
            ItemOutcome::Existing { filename } => debug!(file = %filename, "already mirrored"),
            ItemOutcome::Placeholder => debug!(page, "placeholder image skipped"),
            ItemOutcome::NotFound => warn!(page, "no downloadable size found"),
            ItemOutcome::Failed { reason } => warn!(page, reason = %reason, "item failed"),
            ItemOutcome::Cancelled => debug!(page, "cancelled"),
        }

        lock(&self.report).record_item(page, &outcome);
        self.emit(MirrorEvent::ItemFinished {
            depth: walk_item.depth,
            page: page.to_string(),
            caption: walk_item.item.caption.clone(),
            outcome,
        });
    }

    fn emit(&self, event: MirrorEvent) {
        if let Some(events) = &self.events {
            // A closed receiver only means nobody is printing progress.
            let _ = lock(events).send(event);
        }
    }
}
