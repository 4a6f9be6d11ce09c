//! Per-pack pipeline.
//!
//! A worker takes one [`PackJob`] through these stages:
//!
//! 1. Obtain the decompressed pack in an anonymous staging file, either from
//!    the local cache or from the transport with retries. The digest of the
//!    decompressed bytes is computed as they stream through and must match
//!    the pack hash.
//! 2. Extract each needed blob by offset into `<file>.incoming`, hashing as
//!    it copies, and rename it into place once the hash matches.
//!
//! The staging file has no name on disk and disappears when dropped,
//! whatever the outcome.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::PackCache;
use super::plan::PackJob;
use super::progress::FetchCounters;
use super::transport::PackTransport;
use crate::error::{SyncError, SyncResult};
use crate::fsutil::IncomingFile;
use crate::hash::{ContentHash, ContentHasher};
use crate::manifest::Blob;

/// Buffer size for decompression and extraction (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Which counter bytes read from a pack source are credited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Network,
    Cache,
}

/// Result of processing one pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackOutcome {
    pub from_cache: bool,
    pub files: usize,
}

/// Everything a worker needs to process packs. Shared by reference across
/// the worker threads of one fetch.
pub(crate) struct PackWorker<'a> {
    pub transport: &'a dyn PackTransport,
    pub cache: Option<&'a PackCache>,
    pub counters: &'a FetchCounters,
    pub cancel: &'a CancellationToken,
    pub root: &'a Path,
    pub staging_dir: &'a Path,
    pub base_url: &'a str,
    pub max_retries: u32,
}

impl PackWorker<'_> {
    /// Fetch one pack and write every file it serves.
    pub fn run(&self, job: &PackJob) -> SyncResult<PackOutcome> {
        let (mut staged, from_cache) = match self.from_cache(job)? {
            Some(staged) => (staged, true),
            None => (self.download(job)?, false),
        };
        let files = self.extract(job, &mut staged)?;
        Ok(PackOutcome { from_cache, files })
    }

    /// Decode the cached copy of a pack, if there is a valid one.
    ///
    /// A cached pack that fails to decode or verify is evicted and treated
    /// as a miss.
    fn from_cache(&self, job: &PackJob) -> SyncResult<Option<File>> {
        let Some(cache) = self.cache else {
            return Ok(None);
        };
        let pack = &job.source.pack;
        let Some(file) = cache.open(&pack.hash, pack.compressed_size) else {
            return Ok(None);
        };

        let origin = cache.entry_path(&pack.hash).display().to_string();
        let counted = Cell::new(0);
        match self.decode(file, &origin, &pack.hash, Tally::Cache, &counted) {
            Ok(staged) => {
                debug!(pack = %pack.hash, "Using cached pack");
                Ok(Some(staged))
            }
            Err(e) if e.is_retryable() || e.is_integrity() => {
                warn!(pack = %pack.hash, error = %e, "Discarding corrupt cached pack");
                self.counters.rollback_cached(counted.get());
                cache.evict(&pack.hash)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Download and decode a pack, retrying transient failures.
    fn download(&self, job: &PackJob) -> SyncResult<File> {
        let url = job.source.url(self.base_url);
        let mut attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            attempts += 1;

            let counted = Cell::new(0);
            match self.download_once(job, &url, &counted) {
                Ok(staged) => {
                    debug!(url = %url, attempts, "Downloaded pack");
                    return Ok(staged);
                }
                Err(e) => {
                    self.counters.rollback_read(counted.get());
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempts > self.max_retries {
                        return Err(SyncError::DownloadFailed {
                            url,
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    warn!(url = %url, attempt = attempts, error = %e, "Pack download failed, retrying");
                }
            }
        }
    }

    fn download_once(&self, job: &PackJob, url: &str, counted: &Cell<u64>) -> SyncResult<File> {
        let hash = &job.source.pack.hash;
        let stream = self.transport.open(url, job.source.ignore_proxy)?;

        let sink = match self.cache {
            Some(cache) => match cache.begin(hash) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    warn!(pack = %hash, error = %e, "Cannot write to pack cache");
                    None
                }
            },
            None => None,
        };

        let mut tee = TeeReader { inner: stream, sink };
        let staged = self.decode(&mut tee, url, hash, Tally::Network, counted)?;
        tee.commit();
        Ok(staged)
    }

    /// Decompress `source` into a staging file and check its digest.
    ///
    /// Returns the staging file rewound to the start.
    fn decode<R: Read>(
        &self,
        source: R,
        origin: &str,
        expected: &ContentHash,
        tally: Tally,
        counted: &Cell<u64>,
    ) -> SyncResult<File> {
        let staging_error = |e: io::Error| SyncError::WriteFailed {
            path: self.staging_dir.to_path_buf(),
            source: e,
        };

        let reader = CountingReader {
            inner: source,
            counters: self.counters,
            cancel: self.cancel,
            tally,
            counted,
        };
        let mut decoder = GzDecoder::new(reader);
        let mut staged = tempfile::tempfile_in(self.staging_dir).map_err(staging_error)?;
        let mut hasher = ContentHasher::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let n = match decoder.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.stream_error(origin, e)),
            };
            hasher.update(&buffer[..n]);
            staged.write_all(&buffer[..n]).map_err(staging_error)?;
        }

        // Read past the gzip trailer so the whole stream reaches the cache.
        io::copy(decoder.get_mut(), &mut io::sink()).map_err(|e| self.stream_error(origin, e))?;

        let actual = hasher.finish();
        if &actual != expected {
            return Err(SyncError::PackHashMismatch {
                url: origin.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        staged.seek(SeekFrom::Start(0)).map_err(staging_error)?;
        Ok(staged)
    }

    fn stream_error(&self, origin: &str, e: io::Error) -> SyncError {
        if self.cancel.is_cancelled() {
            SyncError::Cancelled
        } else {
            SyncError::StreamCorrupt {
                url: origin.to_string(),
                source: e,
            }
        }
    }

    /// Write every file served by the pack, in offset order.
    fn extract(&self, job: &PackJob, staged: &mut File) -> SyncResult<usize> {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0;

        for blob_job in &job.blobs {
            for file in &blob_job.files {
                if self.cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                let dest = self.root.join(&file.name);
                self.extract_blob(&job.source.pack.hash, &blob_job.blob, &dest, staged, &mut buffer)?;
                self.counters.file_done();
                written += 1;
            }
        }

        Ok(written)
    }

    fn extract_blob(
        &self,
        pack: &ContentHash,
        blob: &Blob,
        dest: &Path,
        staged: &mut File,
        buffer: &mut [u8],
    ) -> SyncResult<()> {
        let staging_error = |e: io::Error| SyncError::ReadFailed {
            path: self.staging_dir.to_path_buf(),
            source: e,
        };
        staged
            .seek(SeekFrom::Start(blob.pack_offset))
            .map_err(staging_error)?;

        let mut incoming = IncomingFile::create(dest)?;
        let incoming_path = incoming.incoming_path().to_path_buf();
        let mut hasher = ContentHasher::new();
        let mut remaining = blob.size;

        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            let n = staged.read(&mut buffer[..want]).map_err(staging_error)?;
            if n == 0 {
                return Err(SyncError::BlobOutOfRange {
                    pack: pack.to_string(),
                    blob: blob.hash.to_string(),
                    offset: blob.pack_offset,
                    size: blob.size,
                });
            }
            hasher.update(&buffer[..n]);
            incoming
                .write_all(&buffer[..n])
                .map_err(|e| SyncError::WriteFailed {
                    path: incoming_path.clone(),
                    source: e,
                })?;
            remaining -= n as u64;
        }

        let actual = hasher.finish();
        if actual != blob.hash {
            return Err(SyncError::BlobHashMismatch {
                path: dest.to_path_buf(),
                expected: blob.hash.to_string(),
                actual: actual.to_string(),
            });
        }

        incoming.commit()?;
        debug!(file = %dest.display(), "Extracted file");
        Ok(())
    }
}

/// Reader that credits every byte to the progress counters and fails once
/// the run is cancelled.
struct CountingReader<'a, R> {
    inner: R,
    counters: &'a FetchCounters,
    cancel: &'a CancellationToken,
    tally: Tally,
    /// Bytes credited so far, for rollback on failure.
    counted: &'a Cell<u64>,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "cancelled"));
        }
        let n = self.inner.read(buf)?;
        match self.tally {
            Tally::Network => self.counters.add_read(n as u64),
            Tally::Cache => self.counters.add_cached(n as u64),
        }
        self.counted.set(self.counted.get() + n as u64);
        Ok(n)
    }
}

/// Reader that copies everything it reads into a pending cache entry.
///
/// A failed cache write drops the entry and reading carries on.
struct TeeReader<R> {
    inner: R,
    sink: Option<IncomingFile>,
}

impl<R> TeeReader<R> {
    /// Move the cache entry into place.
    fn commit(self) {
        let Some(sink) = self.sink else {
            return;
        };
        let path = sink.final_path().to_path_buf();
        match sink.commit() {
            Ok(()) => debug!(path = %path.display(), "Cached pack"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to cache pack"),
        }
    }
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let failed = match &mut self.sink {
            Some(sink) => match sink.write_all(&buf[..n]) {
                Ok(()) => false,
                Err(e) => {
                    warn!(path = %sink.incoming_path().display(), error = %e, "Failed to write pack to cache");
                    true
                }
            },
            None => false,
        };
        if failed {
            self.sink = None;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_counting_reader_tallies_bytes() {
        let counters = FetchCounters::new(1, 100);
        let cancel = CancellationToken::new();
        let counted = Cell::new(0);
        let mut reader = CountingReader {
            inner: &b"hello world"[..],
            counters: &counters,
            cancel: &cancel,
            tally: Tally::Network,
            counted: &counted,
        };

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(counters.bytes_read(), 11);
        assert_eq!(counters.bytes_cached(), 0);
        assert_eq!(counted.get(), 11);
    }

    #[test]
    fn test_counting_reader_stops_when_cancelled() {
        let counters = FetchCounters::new(1, 100);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counted = Cell::new(0);
        let mut reader = CountingReader {
            inner: &b"data"[..],
            counters: &counters,
            cancel: &cancel,
            tally: Tally::Cache,
            counted: &counted,
        };

        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
        assert_eq!(counters.bytes_cached(), 0);
    }

    #[test]
    fn test_tee_reader_copies_into_cache_entry() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("ab/abcdef");
        let sink = IncomingFile::create(&dest).unwrap();
        let mut tee = TeeReader {
            inner: &b"compressed bytes"[..],
            sink: Some(sink),
        };

        let mut out = Vec::new();
        tee.read_to_end(&mut out).unwrap();
        tee.commit();

        assert_eq!(out, b"compressed bytes");
        assert_eq!(fs::read(&dest).unwrap(), b"compressed bytes");
    }

    #[test]
    fn test_tee_reader_dropped_discards_entry() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("entry");
        {
            let mut tee = TeeReader {
                inner: &b"partial"[..],
                sink: Some(IncomingFile::create(&dest).unwrap()),
            };
            let mut buf = [0u8; 3];
            tee.read_exact(&mut buf).unwrap();
        }

        assert!(!dest.exists());
        assert!(!crate::fsutil::incoming_path(&dest).exists());
    }
}
