//! Bounded in-memory byte pipe connecting two pipeline stages.
//!
//! Bytes travel as chunks over a bounded crossbeam channel. Each end also
//! owns a close signal, a channel whose only sender is dropped on close, so
//! a third thread may close either end while the owning stage is blocked
//! on it.

use crate::stream::Stream;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use std::io::{self, ErrorKind};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default pipe capacity in bytes.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Largest chunk sent through the channel in one message.
const MAX_CHUNK: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disconnects every clone of `closed` once [`CloseSignal::close`] runs.
struct CloseSignal {
    trigger: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl CloseSignal {
    fn new() -> Self {
        let (trigger, closed) = bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            closed,
        }
    }

    fn close(&self) {
        lock(&self.trigger).take();
    }

    fn is_closed(&self) -> bool {
        is_disconnected(&self.closed)
    }
}

fn is_disconnected(signal: &Receiver<()>) -> bool {
    matches!(signal.try_recv(), Err(TryRecvError::Disconnected))
}

/// Reading end of a [`pipe`].
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Mutex<Vec<u8>>,
    closed: CloseSignal,
}

/// Writing end of a [`pipe`].
pub struct PipeWriter {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    chunk: usize,
    closed: CloseSignal,
    reader_closed: Receiver<()>,
}

/// Create a pipe with the default capacity.
pub fn pipe() -> (PipeReader, PipeWriter) {
    pipe_with_capacity(PIPE_CAPACITY)
}

/// Create a pipe holding at most `capacity` unread bytes in its channel.
pub fn pipe_with_capacity(capacity: usize) -> (PipeReader, PipeWriter) {
    let chunk = capacity.clamp(1, MAX_CHUNK);
    let (tx, rx) = bounded((capacity / chunk).max(1));
    let reader = PipeReader {
        rx,
        pending: Mutex::new(Vec::new()),
        closed: CloseSignal::new(),
    };
    let writer = PipeWriter {
        tx: Mutex::new(Some(tx)),
        chunk,
        closed: CloseSignal::new(),
        reader_closed: reader.closed.closed.clone(),
    };
    (reader, writer)
}

fn reader_closed() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "pipe reader closed")
}

fn writer_closed() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "pipe writer closed")
}

impl Stream for PipeReader {
    fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.closed.is_closed() {
            return Err(reader_closed());
        }
        let mut pending = lock(&self.pending);
        if pending.is_empty() {
            select! {
                recv(self.rx) -> chunk => match chunk {
                    Ok(chunk) => *pending = chunk,
                    // every sender is gone: the writer closed
                    Err(_) => return Ok(0),
                },
                recv(self.closed.closed) -> _ => return Err(reader_closed()),
            }
        }
        let n = out.len().min(pending.len());
        out[..n].copy_from_slice(&pending[..n]);
        pending.drain(..n);
        Ok(n)
    }

    fn close(&self) -> io::Result<()> {
        self.closed.close();
        Ok(())
    }
}

impl Stream for PipeWriter {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.closed.is_closed() {
            return Err(writer_closed());
        }
        if is_disconnected(&self.reader_closed) {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }
        // a clone keeps the channel connected until this write returns
        let tx = lock(&self.tx).clone().ok_or_else(writer_closed)?;
        let n = data.len().min(self.chunk);
        select! {
            send(tx, data[..n].to_vec()) -> sent => match sent {
                Ok(()) => Ok(n),
                Err(_) => Err(io::Error::from(ErrorKind::BrokenPipe)),
            },
            recv(self.closed.closed) -> _ => Err(writer_closed()),
            recv(self.reader_closed) -> _ => Err(io::Error::from(ErrorKind::BrokenPipe)),
        }
    }

    fn close(&self) -> io::Result<()> {
        self.closed.close();
        lock(&self.tx).take();
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let _ = Stream::close(self);
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let _ = Stream::close(self);
    }
}
