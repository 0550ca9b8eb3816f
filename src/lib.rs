//! # PBase Mirror
//!
//! Mirrors a PBase photo account to a local directory. Starting from one or
//! more galleries, it walks every reachable sub-gallery, picks the largest
//! size each image offers, and saves it under a readable, collision-free
//! filename built from the gallery title and image caption.
//!
//! # Architecture
//!
//! ```text
//! client (login, throttled GETs)
//!    │ implements Site
//!    ▼
//! walk ──items──→ mirror ──→ resolve ──→ naming ──→ download ──→ ledger
//!  (galleries,     (driver,    (largest    (sanitize,   (.part +    (what was
//!   depth-first)    workers)    size)       dedupe)      rename)     saved)
//! ```
//!
//! Everything past the client talks to the [`site::Site`] trait, so the whole
//! pipeline runs against an in-memory site in tests.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`gallery`] | URL identity, gallery/image link classification, title fallback |
//! | [`html`] | Scraping gallery, item, size and login pages |
//! | [`site`] | The `Site` trait and the page types it returns |
//! | [`client`] | Authenticated `ureq` session implementing `Site` |
//! | [`walk`] | Depth-first gallery traversal with a visited set |
//! | [`resolve`] | Picks the largest available size of an image |
//! | [`naming`] | Filename sanitizing and collision suffixes |
//! | [`download`] | Atomic, hashed download of one binary |
//! | [`ledger`] | Per-directory record of mirrored items, for reruns |
//! | [`mirror`] | The run driver and its report |
//! | [`config`] | `pbase-mirror.toml` loading, merging and validation |
//! | [`cancel`] | Ctrl-C / deadline cancellation flag |
//! | [`output`] | CLI progress and summary formatting |
//!
//! # Design Decisions
//!
//! ## Reruns Are Cheap
//!
//! A rerun into the same directory must neither download an image twice nor
//! overwrite anything. The directory listing alone cannot tell "my earlier
//! download" from "someone else's file with the same name", so each output
//! directory keeps a hidden ledger mapping item identity to the file it
//! became. Items in the ledger whose file still exists are skipped before any
//! request is made.
//!
//! ## One Session, One Pace
//!
//! All requests share one cookie-carrying agent and one throttle. Extra
//! workers overlap parsing and disk writes, never request rate.

pub mod cancel;
pub mod client;
pub mod config;
pub mod download;
pub mod gallery;
pub mod html;
pub mod ledger;
pub mod mirror;
pub mod naming;
pub mod output;
pub mod resolve;
pub mod site;
pub mod walk;

#[cfg(test)]
pub(crate) mod test_helpers;
