//! Shareable streams and the thread-scoped [`StreamProxy`].
//!
//! Every stream is used through `&self` so that one handle can be shared
//! between the stage that owns it and the thread that may have to close it.

use log::debug;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, IsTerminal, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

/// A byte stream shareable between threads.
///
/// Implementors override only the operations they support; the rest fail
/// with [`ErrorKind::Unsupported`].
pub trait Stream: Send + Sync {
    fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("read"))
    }

    fn write(&self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("write"))
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Close the stream. Closing twice must succeed.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }

    fn isatty(&self) -> bool {
        false
    }

    fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Reference-counted handle to any [`Stream`].
pub type SharedStream = Arc<dyn Stream>;

fn unsupported(op: &str) -> io::Error {
    io::Error::new(ErrorKind::Unsupported, format!("stream does not support {op}"))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Which of the process standard streams a [`StdStream`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdKind {
    Stdin,
    Stdout,
    Stderr,
}

/// One of the process standard streams. Closing it is a no-op.
pub struct StdStream(StdKind);

impl StdStream {
    pub fn new(kind: StdKind) -> Self {
        Self(kind)
    }
}

impl Stream for StdStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0 {
            StdKind::Stdin => io::stdin().read(buf),
            _ => Err(unsupported("read")),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match self.0 {
            StdKind::Stdout => io::stdout().write(buf),
            StdKind::Stderr => io::stderr().write(buf),
            StdKind::Stdin => Err(unsupported("write")),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self.0 {
            StdKind::Stdout => io::stdout().flush(),
            StdKind::Stderr => io::stderr().flush(),
            StdKind::Stdin => Ok(()),
        }
    }

    fn isatty(&self) -> bool {
        match self.0 {
            StdKind::Stdin => io::stdin().is_terminal(),
            StdKind::Stdout => io::stdout().is_terminal(),
            StdKind::Stderr => io::stderr().is_terminal(),
        }
    }
}

/// Memory-backed stream.
///
/// Writes append to the buffer and reads consume it from the front. Closing
/// leaves the contents readable through [`MemoryStream::contents`].
pub struct MemoryStream {
    inner: Mutex<(Vec<u8>, usize)>,
    atty: bool,
}

impl MemoryStream {
    pub fn new(atty: bool) -> Self {
        Self {
            inner: Mutex::new((Vec::new(), 0)),
            atty,
        }
    }

    /// A stream that will yield `input` when read.
    pub fn from_bytes(input: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Mutex::new((input.into(), 0)),
            atty: false,
        }
    }

    /// Everything written so far, including bytes already read.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.inner).0.clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&lock(&self.inner).0).into_owned()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Stream for MemoryStream {
    fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        let mut guard = lock(&self.inner);
        let (buf, pos) = &mut *guard;
        let n = out.len().min(buf.len() - *pos);
        out[..n].copy_from_slice(&buf[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        lock(&self.inner).0.extend_from_slice(data);
        Ok(data.len())
    }

    fn isatty(&self) -> bool {
        self.atty
    }
}

/// A file opened for a redirect. Closing flushes and releases the handle.
pub struct FileStream {
    file: Mutex<Option<File>>,
}

impl FileStream {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::from_file(File::open(path)?))
    }

    pub fn create(path: &Path, append: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            file: Mutex::new(Some(file)),
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        match lock(&self.file).as_mut() {
            Some(file) => f(file),
            None => Err(io::Error::new(ErrorKind::NotConnected, "file closed")),
        }
    }
}

impl Stream for FileStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_file(|f| f.read(buf))
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|f| f.write(buf))
    }

    fn flush(&self) -> io::Result<()> {
        self.with_file(|f| f.flush())
    }

    fn close(&self) -> io::Result<()> {
        match lock(&self.file).take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Destination seen by one thread: the stream plus its declared width and
/// tty flag.
#[derive(Clone)]
pub struct StreamTarget {
    pub stream: SharedStream,
    pub width: Option<usize>,
    pub isatty: Option<bool>,
}

impl StreamTarget {
    pub fn new(stream: SharedStream) -> Self {
        Self {
            stream,
            width: None,
            isatty: None,
        }
    }

    pub fn with_width(mut self, width: Option<usize>) -> Self {
        self.width = width;
        self
    }

    pub fn with_isatty(mut self, isatty: Option<bool>) -> Self {
        self.isatty = isatty;
        self
    }
}

/// Thread-scoped indirection over one canonical stream.
///
/// Each thread may install its own override; reads and writes through the
/// proxy go to the calling thread's override if one exists and to the
/// canonical target otherwise. A thread only ever installs or removes its
/// own entry, and an override must never point back at a proxy.
pub struct StreamProxy {
    canonical: StreamTarget,
    overrides: RwLock<HashMap<ThreadId, StreamTarget>>,
}

impl StreamProxy {
    pub fn new(canonical: StreamTarget) -> Self {
        Self {
            canonical,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// The calling thread's override, or the canonical target.
    pub fn effective_target(&self) -> StreamTarget {
        let id = thread::current().id();
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| self.canonical.clone())
    }

    pub fn stream(&self) -> SharedStream {
        self.effective_target().stream
    }

    pub fn width(&self) -> Option<usize> {
        self.effective_target().width
    }

    pub fn isatty(&self) -> bool {
        let target = self.effective_target();
        target.isatty.unwrap_or_else(|| target.stream.isatty())
    }

    pub fn install_override(&self, thread: ThreadId, target: StreamTarget) {
        debug!("stream override installed for {thread:?}");
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(thread, target);
    }

    /// Install an override for the calling thread.
    pub fn proxy(&self, target: StreamTarget) {
        self.install_override(thread::current().id(), target);
    }

    /// Remove the override of `thread`, or of the calling thread when `None`.
    pub fn remove_override(&self, thread: Option<ThreadId>) {
        let id = thread.unwrap_or_else(|| thread::current().id());
        let removed = self
            .overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            debug!("stream override removed for {id:?}");
        }
    }

    pub fn has_override(&self, thread: ThreadId) -> bool {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&thread)
    }
}

impl Stream for StreamProxy {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream().read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.stream().write(buf)
    }

    fn flush(&self) -> io::Result<()> {
        self.stream().flush()
    }

    fn close(&self) -> io::Result<()> {
        self.stream().close()
    }

    fn isatty(&self) -> bool {
        StreamProxy::isatty(self)
    }
}

impl Read for &StreamProxy {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Stream::read(*self, buf)
    }
}

impl Write for &StreamProxy {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Stream::flush(*self)
    }
}

/// The shell-wide stdin, stdout and stderr proxies.
#[derive(Clone)]
pub struct ShellStreams {
    pub stdin: Arc<StreamProxy>,
    pub stdout: Arc<StreamProxy>,
    pub stderr: Arc<StreamProxy>,
}

impl ShellStreams {
    pub fn new(stdin: StreamTarget, stdout: StreamTarget, stderr: StreamTarget) -> Self {
        Self {
            stdin: Arc::new(StreamProxy::new(stdin)),
            stdout: Arc::new(StreamProxy::new(stdout)),
            stderr: Arc::new(StreamProxy::new(stderr)),
        }
    }

    /// Proxies over the process standard streams.
    pub fn process(width: Option<usize>) -> Self {
        let target = |kind| StreamTarget::new(Arc::new(StdStream::new(kind))).with_width(width);
        Self::new(
            target(StdKind::Stdin),
            target(StdKind::Stdout),
            target(StdKind::Stderr),
        )
    }

    /// Proxies over in-memory streams, handy for embedding and tests.
    pub fn memory(
        stdin: Arc<MemoryStream>,
        stdout: Arc<MemoryStream>,
        stderr: Arc<MemoryStream>,
    ) -> Self {
        Self::new(
            StreamTarget::new(stdin),
            StreamTarget::new(stdout),
            StreamTarget::new(stderr),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_proxy() -> (Arc<MemoryStream>, StreamProxy) {
        let canonical = Arc::new(MemoryStream::new(false));
        let proxy = StreamProxy::new(StreamTarget::new(canonical.clone()));
        (canonical, proxy)
    }

    #[test]
    fn test_writes_reach_canonical_without_override() {
        let (canonical, proxy) = memory_proxy();
        let mut out = &proxy;
        write!(out, "hello").unwrap();
        assert_eq!(canonical.contents_lossy(), "hello");
    }

    #[test]
    fn test_override_is_scoped_to_installing_thread() {
        let (canonical, proxy) = memory_proxy();
        let proxy = Arc::new(proxy);
        let redirected = Arc::new(MemoryStream::new(false));

        let worker_proxy = proxy.clone();
        let worker_target = redirected.clone();
        thread::spawn(move || {
            worker_proxy.proxy(StreamTarget::new(worker_target));
            worker_proxy.write_all(b"from worker").unwrap();
            worker_proxy.remove_override(None);
        })
        .join()
        .unwrap();

        proxy.write_all(b"from main").unwrap();
        assert_eq!(redirected.contents_lossy(), "from worker");
        assert_eq!(canonical.contents_lossy(), "from main");
    }

    #[test]
    fn test_isatty_prefers_declared_flag() {
        let canonical = Arc::new(MemoryStream::new(true));
        let proxy = StreamProxy::new(StreamTarget::new(canonical.clone()));
        assert!(proxy.isatty());

        proxy.proxy(StreamTarget::new(canonical).with_isatty(Some(false)).with_width(Some(80)));
        assert!(!proxy.isatty());
        assert_eq!(proxy.width(), Some(80));

        proxy.remove_override(None);
        assert!(proxy.isatty());
        assert_eq!(proxy.width(), None);
    }

    #[test]
    fn test_remove_missing_override_is_noop() {
        let (_, proxy) = memory_proxy();
        proxy.remove_override(None);
        assert!(!proxy.has_override(thread::current().id()));
    }

    #[test]
    fn test_memory_stream_reads_what_was_given() {
        let stream = MemoryStream::from_bytes("abc");
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_stream_rejects_io_after_close() {
        let mut path = std::env::temp_dir();
        path.push(format!("stream_close_test_{}", std::process::id()));
        let file = FileStream::create(&path, false).unwrap();
        file.write_all(b"data").unwrap();
        file.close().unwrap();
        file.close().unwrap();
        assert!(file.write(b"more").is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        let _ = std::fs::remove_file(path);
    }
}
