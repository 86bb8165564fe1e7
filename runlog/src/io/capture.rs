//! Shared live capture stream between drain threads and the polling loop.
//!
//! One [`CaptureStream`] exists per top-level run. Pipe drain threads and
//! function-unit sinks push raw bytes into it; the polling loop reads
//! snapshots without pausing capture. Nested runs receive a clone of the
//! parent's handle so their output lands in the parent's record.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::core::decode::LineDecoder;

/// Cloneable handle to one run's captured output.
#[derive(Clone)]
pub struct CaptureStream {
    inner: Arc<Mutex<LineDecoder>>,
}

impl CaptureStream {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LineDecoder::new(limit))),
        }
    }

    /// Feed raw bytes; the lock is held only for the decode.
    pub fn push_bytes(&self, chunk: &[u8]) {
        if let Ok(mut decoder) = self.inner.lock() {
            decoder.push(chunk);
        }
    }

    /// Clone of the current lines; never waits on the monitored unit.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|decoder| decoder.snapshot())
            .unwrap_or_default()
    }

    /// Flush held bytes and return the final lines.
    pub fn finish(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(mut decoder) => {
                decoder.finish();
                decoder.snapshot()
            }
            Err(_) => Vec::new(),
        }
    }

    /// `Write` adapter handed to function units as their output sink.
    pub fn writer(&self) -> CaptureWriter {
        CaptureWriter {
            stream: self.clone(),
        }
    }
}

/// Byte sink feeding a [`CaptureStream`].
pub struct CaptureWriter {
    stream: CaptureStream,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.push_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
