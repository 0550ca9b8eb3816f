//! Stream one binary to disk without ever exposing a partial file.
//!
//! Bytes go to `.<name>.part` through a hashing writer; only a complete,
//! non-empty body is renamed to `<name>`. Any failure, including
//! cancellation mid-stream, removes the partial file.

use crate::cancel::CancelFlag;
use crate::site::{DownloadError, Site};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the saved bytes.
    pub sha256: String,
}

/// Hidden sibling the body is streamed into.
pub fn partial_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{name}.part"))
}

/// Download `url` into `dir/name`. Refuses to overwrite an existing file.
pub fn save<S: Site + ?Sized>(
    site: &S,
    url: &Url,
    referer: &Url,
    dir: &Path,
    name: &str,
    cancel: &CancelFlag,
) -> Result<Saved, DownloadError> {
    let target = dir.join(name);
    if target.exists() {
        return Err(DownloadError::Exists(target));
    }
    let partial = partial_path(dir, name);

    let (bytes, sha256) = match stream_to(site, url, referer, &partial, cancel) {
        Ok(done) => done,
        Err(e) => {
            discard(&partial);
            return Err(e);
        }
    };

    // Another writer may have created the target while we streamed.
    if target.exists() {
        discard(&partial);
        return Err(DownloadError::Exists(target));
    }
    if let Err(e) = fs::rename(&partial, &target) {
        discard(&partial);
        return Err(e.into());
    }

    debug!(file = %target.display(), bytes, "saved");
    Ok(Saved {
        path: target,
        bytes,
        sha256,
    })
}

fn stream_to<S: Site + ?Sized>(
    site: &S,
    url: &Url,
    referer: &Url,
    partial: &Path,
    cancel: &CancelFlag,
) -> Result<(u64, String), DownloadError> {
    let file = File::create(partial)?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    site.download(url, referer, &mut writer, cancel)?;
    writer.flush()?;

    let HashingWriter {
        inner,
        hasher,
        bytes,
    } = writer;
    if bytes == 0 {
        return Err(DownloadError::Empty(url.to_string()));
    }
    let file = inner.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok((bytes, format!("{:x}", hasher.finalize())))
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(file = %partial.display(), error = %e, "could not remove partial download");
    }
}

/// Counts and hashes everything written through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
