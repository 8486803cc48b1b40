//! Request payloads and response sinks.
//!
//! # Responsibilities
//! - Describe where an upload comes from (nothing, memory, file, reader)
//! - Open a fresh reader for every attempt so retries re-read files
//! - Describe where downloaded bytes go when not buffered in the response

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Reader handed to a backend for the request body.
pub type ContentReader = Box<dyn Read + Send>;

/// Caller-supplied destination for streamed response content.
pub type ResponseSink = Box<dyn Write + Send>;

/// Source of the request body.
#[derive(Clone, Default)]
pub enum ContentSource {
    #[default]
    None,
    /// Owned bytes, shared between attempts.
    Bytes(Arc<[u8]>),
    /// A file opened at the start of every attempt.
    File(PathBuf),
    /// A one-shot reader; the first attempt consumes it.
    Reader(Arc<Mutex<Option<ContentReader>>>),
}

impl ContentSource {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        ContentSource::Bytes(Arc::from(data.into()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ContentSource::File(path.into())
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        ContentSource::Reader(Arc::new(Mutex::new(Some(Box::new(reader)))))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ContentSource::None)
    }

    /// Body length if it is known without reading.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            ContentSource::None => Some(0),
            ContentSource::Bytes(data) => Some(data.len() as u64),
            ContentSource::File(path) => std::fs::metadata(path).ok().map(|m| m.len()),
            ContentSource::Reader(_) => None,
        }
    }

    /// Open a reader over the body for one attempt.
    pub fn open(&self) -> io::Result<ContentReader> {
        match self {
            ContentSource::None => Ok(Box::new(io::empty())),
            ContentSource::Bytes(data) => Ok(Box::new(Cursor::new(data.clone()))),
            ContentSource::File(path) => Ok(Box::new(File::open(path)?)),
            ContentSource::Reader(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "streaming content already consumed")
                }),
        }
    }

    /// Read the whole body into memory.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len_hint().unwrap_or(0) as usize);
        self.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::None => f.write_str("None"),
            ContentSource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            ContentSource::File(path) => f.debug_tuple("File").field(path).finish(),
            ContentSource::Reader(_) => f.write_str("Reader"),
        }
    }
}
