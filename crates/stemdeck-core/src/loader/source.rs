//! Track sources
//!
//! A source turns a locator string into a byte stream plus its declared
//! length (when known up front). The loader only ever sees [`AssetSource`];
//! [`SchemeSource`] routes locators to the concrete backend by scheme.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{bounded, Receiver, Sender};
use thiserror::Error;

/// Errors raised while opening or reading a track source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unsupported locator scheme: {0}")]
    UnsupportedScheme(String),
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

/// An open byte stream for one track
pub struct AssetStream {
    /// Total byte count when the source declares it ahead of the body
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

impl AssetStream {
    pub fn new(content_length: Option<u64>, reader: impl Read + Send + 'static) -> Self {
        Self {
            content_length,
            reader: Box::new(reader),
        }
    }
}

/// Opens track locators as byte streams
///
/// Implementations are shared across loader worker threads.
pub trait AssetSource: Send + Sync {
    fn open(&self, locator: &str) -> Result<AssetStream, FetchError>;
}

/// File extension of a locator, ignoring query strings and fragments
pub fn extension_hint(locator: &str) -> Option<String> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ─────────────────────────────────────────────────────────────────────────────
// Local files
// ─────────────────────────────────────────────────────────────────────────────

/// Plain paths and `file://` locators
#[derive(Debug, Default, Clone)]
pub struct FileSource;

impl AssetSource for FileSource {
    fn open(&self, locator: &str) -> Result<AssetStream, FetchError> {
        let path = Path::new(locator.strip_prefix("file://").unwrap_or(locator));
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
            _ => FetchError::Io(format!("{}: {}", path.display(), e)),
        })?;
        let content_length = file.metadata().ok().map(|m| m.len());
        Ok(AssetStream::new(content_length, io::BufReader::new(file)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// `http://` and `https://` locators via a blocking client
///
/// Runs inside loader worker threads, so blocking is fine here.
#[cfg(feature = "http")]
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(timeout: std::time::Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl AssetSource for HttpSource {
    fn open(&self, locator: &str) -> Result<AssetStream, FetchError> {
        let response = self
            .client
            .get(locator)
            .send()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: locator.to_string(),
            });
        }

        // A zero declared length is treated the same as an absent header
        let content_length = response.content_length().filter(|&len| len > 0);
        Ok(AssetStream::new(content_length, response))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory blobs
// ─────────────────────────────────────────────────────────────────────────────

/// Blocks readers of a gated entry until released
#[derive(Clone)]
pub struct SourceGate {
    release: Arc<Mutex<Option<Sender<()>>>>,
    wait: Receiver<()>,
}

impl SourceGate {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            release: Arc::new(Mutex::new(Some(tx))),
            wait: rx,
        }
    }

    /// Let every reader blocked on this gate continue
    pub fn release(&self) {
        if let Ok(mut guard) = self.release.lock() {
            guard.take();
        }
    }
}

impl Default for SourceGate {
    fn default() -> Self {
        Self::new()
    }
}

struct GatedReader {
    gate: Option<Receiver<()>>,
    inner: Cursor<Arc<[u8]>>,
}

impl Read for GatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(gate) = self.gate.take() {
            // Returns once the sender side is dropped
            let _ = gate.recv();
        }
        self.inner.read(buf)
    }
}

#[derive(Clone)]
struct MemoryEntry {
    bytes: Arc<[u8]>,
    declare_length: bool,
    failure: Option<FetchError>,
    gate: Option<SourceGate>,
}

/// Blobs held in memory, keyed by full locator (e.g. `mem://drums`)
///
/// Used for embedding and in tests, where entries can be made to fail,
/// to hide their length, or to block until a gate is released.
#[derive(Default)]
pub struct MemorySource {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, locator: &str, entry: MemoryEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(locator.to_string(), entry);
        }
    }

    /// Register a blob with a declared length
    pub fn insert(&self, locator: &str, bytes: Vec<u8>) {
        self.put(
            locator,
            MemoryEntry {
                bytes: Arc::from(bytes),
                declare_length: true,
                failure: None,
                gate: None,
            },
        );
    }

    /// Register a blob whose length is unknown until the stream ends
    pub fn insert_unsized(&self, locator: &str, bytes: Vec<u8>) {
        self.put(
            locator,
            MemoryEntry {
                bytes: Arc::from(bytes),
                declare_length: false,
                failure: None,
                gate: None,
            },
        );
    }

    /// Register a blob that blocks on first read until `gate` is released
    pub fn insert_gated(&self, locator: &str, bytes: Vec<u8>, gate: SourceGate) {
        self.put(
            locator,
            MemoryEntry {
                bytes: Arc::from(bytes),
                declare_length: true,
                failure: None,
                gate: Some(gate),
            },
        );
    }

    /// Make opening `locator` fail with `error`
    pub fn insert_failure(&self, locator: &str, error: FetchError) {
        self.put(
            locator,
            MemoryEntry {
                bytes: Arc::from(Vec::new()),
                declare_length: false,
                failure: Some(error),
                gate: None,
            },
        );
    }
}

impl AssetSource for MemorySource {
    fn open(&self, locator: &str) -> Result<AssetStream, FetchError> {
        let entry = self
            .entries
            .lock()
            .map_err(|_| FetchError::Io("memory source poisoned".to_string()))?
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(locator.to_string()))?;

        if let Some(err) = entry.failure {
            return Err(err);
        }

        let content_length = entry.declare_length.then(|| entry.bytes.len() as u64);
        let reader = GatedReader {
            gate: entry.gate.map(|g| g.wait),
            inner: Cursor::new(entry.bytes),
        };
        Ok(AssetStream::new(content_length, reader))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheme routing
// ─────────────────────────────────────────────────────────────────────────────

/// Routes locators to a backend by scheme
///
/// - no scheme or `file://` → [`FileSource`]
/// - `http://`, `https://` → [`HttpSource`] (with the `http` feature)
/// - `mem://` → the attached [`MemorySource`], if any
pub struct SchemeSource {
    file: FileSource,
    #[cfg(feature = "http")]
    http: Option<HttpSource>,
    memory: Option<Arc<MemorySource>>,
}

impl SchemeSource {
    /// Local files only
    pub fn local() -> Self {
        Self {
            file: FileSource,
            #[cfg(feature = "http")]
            http: None,
            memory: None,
        }
    }

    /// Local files plus HTTP with the given request timeout
    ///
    /// Without the `http` feature this is the same as [`SchemeSource::local`].
    pub fn with_http(timeout: std::time::Duration) -> Self {
        #[cfg(feature = "http")]
        {
            let http = match HttpSource::new(timeout) {
                Ok(source) => Some(source),
                Err(e) => {
                    log::warn!("HTTP track source unavailable: {}", e);
                    None
                }
            };
            Self {
                file: FileSource,
                http,
                memory: None,
            }
        }

        #[cfg(not(feature = "http"))]
        {
            let _ = timeout;
            Self::local()
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemorySource>) -> Self {
        self.memory = Some(memory);
        self
    }
}

impl AssetSource for SchemeSource {
    fn open(&self, locator: &str) -> Result<AssetStream, FetchError> {
        let scheme = locator.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase());
        match scheme.as_deref() {
            None | Some("file") => self.file.open(locator),
            #[cfg(feature = "http")]
            Some("http") | Some("https") => match &self.http {
                Some(http) => http.open(locator),
                None => Err(FetchError::UnsupportedScheme(locator.to_string())),
            },
            Some("mem") => match &self.memory {
                Some(memory) => memory.open(locator),
                None => Err(FetchError::UnsupportedScheme(locator.to_string())),
            },
            Some(_) => Err(FetchError::UnsupportedScheme(locator.to_string())),
        }
    }
}
