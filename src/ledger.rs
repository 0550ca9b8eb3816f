//! Record of items already mirrored into an output directory.
//!
//! Filenames are derived from captions and deduplicated against whatever is
//! already on disk, so the directory listing alone cannot tell "this image
//! was saved by a previous run" from "an unrelated file happens to have the
//! same name". The ledger settles that: it maps each item page to the file
//! it was saved as.
//!
//! # Design
//!
//! - **Key**: identity key of the item page (`pbase.com/alice/image/123`),
//!   so reruns match regardless of scheme or `www.`.
//! - **Hit**: an entry exists **and** its file is still on disk. Deleting a
//!   mirrored file makes the next run fetch it again.
//! - **Storage**: `<output_dir>/.pbase-mirror.json`. It travels with the
//!   mirror, and the leading dot keeps it out of [`ExistingNames`].
//! - **Writes** go to a temporary file that is renamed over the ledger, so an
//!   interrupted save never leaves a truncated ledger behind.
//!
//! An unreadable or version-mismatched ledger loads as empty. The only cost
//! is that previously mirrored images get downloaded again under `_N` names.
//!
//! [`ExistingNames`]: crate::naming::ExistingNames

use crate::resolve::SizeLabel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the ledger file within the output directory.
const LEDGER_FILENAME: &str = ".pbase-mirror.json";

/// Bump to discard ledgers written by incompatible versions.
const LEDGER_VERSION: u32 = 1;

/// One mirrored image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub filename: String,
    pub source_url: String,
    pub label: SizeLabel,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    pub entries: BTreeMap<String, LedgerEntry>,
    /// Entries recorded since the last save. Never serialized.
    #[serde(skip)]
    unsaved: usize,
}

impl Ledger {
    pub fn empty() -> Self {
        Self {
            version: LEDGER_VERSION,
            entries: BTreeMap::new(),
            unsaved: 0,
        }
    }

    /// Load from the output directory. Returns an empty ledger if the file
    /// doesn't exist or can't be parsed.
    pub fn load(output_dir: &Path) -> Self {
        let content = match fs::read_to_string(ledger_path(output_dir)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let ledger: Self = match serde_json::from_str(&content) {
            Ok(l) => l,
            Err(_) => return Self::empty(),
        };
        if ledger.version != LEDGER_VERSION {
            return Self::empty();
        }
        ledger
    }

    pub fn save(&mut self, output_dir: &Path) -> io::Result<()> {
        let path = ledger_path(output_dir);
        let tmp = output_dir.join(format!("{LEDGER_FILENAME}.tmp"));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        self.unsaved = 0;
        Ok(())
    }

    /// The entry for `item_key`, if its file is still present in
    /// `output_dir`.
    pub fn find(&self, item_key: &str, output_dir: &Path) -> Option<&LedgerEntry> {
        self.entries
            .get(item_key)
            .filter(|entry| output_dir.join(&entry.filename).is_file())
    }

    pub fn record(&mut self, item_key: String, entry: LedgerEntry) {
        self.entries.insert(item_key, entry);
        self.unsaved += 1;
    }

    pub fn unsaved(&self) -> usize {
        self.unsaved
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve the ledger path for an output directory.
pub fn ledger_path(output_dir: &Path) -> PathBuf {
    output_dir.join(LEDGER_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(filename: &str) -> LedgerEntry {
        LedgerEntry {
            filename: filename.to_string(),
            source_url: format!("https://i.pbase.com/o6/{filename}"),
            label: SizeLabel::Original,
            bytes: 4,
            sha256: "ab".repeat(32),
        }
    }

    // =========================================================================
    // Ledger basics
    // =========================================================================

    #[test]
    fn empty_ledger_has_no_entries() {
        let l = Ledger::empty();
        assert_eq!(l.version, LEDGER_VERSION);
        assert!(l.is_empty());
        assert_eq!(l.unsaved(), 0);
    }

    #[test]
    fn find_hit_when_file_present() {
        let tmp = TempDir::new().unwrap();
        let mut l = Ledger::empty();
        l.record("pbase.com/alice/image/1".into(), entry("Sunset.jpg"));
        fs::write(tmp.path().join("Sunset.jpg"), "data").unwrap();

        assert_eq!(
            l.find("pbase.com/alice/image/1", tmp.path()),
            Some(&entry("Sunset.jpg"))
        );
    }

    #[test]
    fn find_miss_when_file_deleted() {
        let tmp = TempDir::new().unwrap();
        let mut l = Ledger::empty();
        l.record("pbase.com/alice/image/1".into(), entry("gone.jpg"));
        assert_eq!(l.find("pbase.com/alice/image/1", tmp.path()), None);
    }

    #[test]
    fn find_miss_no_entry() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(Ledger::empty().find("pbase.com/alice/image/1", tmp.path()), None);
    }

    #[test]
    fn record_counts_unsaved() {
        let tmp = TempDir::new().unwrap();
        let mut l = Ledger::empty();
        l.record("a".into(), entry("a.jpg"));
        l.record("b".into(), entry("b.jpg"));
        assert_eq!(l.unsaved(), 2);
        l.save(tmp.path()).unwrap();
        assert_eq!(l.unsaved(), 0);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut l = Ledger::empty();
        l.record("pbase.com/alice/image/1".into(), entry("Sunset.jpg"));
        l.save(tmp.path()).unwrap();

        let loaded = Ledger::load(tmp.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries["pbase.com/alice/image/1"], entry("Sunset.jpg"));
        assert!(!tmp.path().join(".pbase-mirror.json.tmp").exists());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(Ledger::load(tmp.path()).is_empty());
    }

    #[test]
    fn load_corrupt_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(ledger_path(tmp.path()), "not json {{{").unwrap();
        assert!(Ledger::load(tmp.path()).is_empty());
    }

    #[test]
    fn load_wrong_version_is_empty() {
        let tmp = TempDir::new().unwrap();
        let json = r#"{"version": 999, "entries": {}}"#;
        fs::write(ledger_path(tmp.path()), json).unwrap();
        assert!(Ledger::load(tmp.path()).is_empty());
    }

    #[test]
    fn ledger_file_is_hidden() {
        let name = ledger_path(Path::new("out"))
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with('.'));
    }
}
