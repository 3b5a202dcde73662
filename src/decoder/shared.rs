use crate::decoder::{DecoderStatistics, StreamDecoder};
use crate::error::Result;
use crate::media::StreamMetadata;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Clonable handle sharing one decoder between threads.
///
/// Decoders are unsynchronised by default; wrap one in a `SharedDecoder` only
/// when several caller-managed threads need it. Every call holds the lock for
/// its whole duration.
pub struct SharedDecoder<D> {
    inner: Arc<Mutex<D>>,
}

impl<D> Clone for SharedDecoder<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: StreamDecoder> SharedDecoder<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(decoder)),
        }
    }

    /// Exclusive access for a sequence of calls.
    pub fn lock(&self) -> MutexGuard<'_, D> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, path: &Path) -> Result<()> {
        self.lock().open(path)
    }

    pub fn read_next(&self) -> Result<Option<D::Frame>> {
        self.lock().read_next()
    }

    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.lock().seek(seconds)
    }

    pub fn close(&self) {
        self.lock().close()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.lock().metadata().cloned()
    }

    pub fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    pub fn statistics(&self) -> DecoderStatistics {
        self.lock().statistics()
    }
}
