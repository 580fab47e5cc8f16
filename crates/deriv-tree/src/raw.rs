//! Raw (not yet uploaded) artifact sources
//!
//! A [`RawArtifact`] is consumed exactly once by an upload. Sources backed
//! by an OS resource expose the [`Closeable`] capability so the uploader can
//! release the handle and, when asked, remove the backing file.

use crate::artifact::Metadata;
use serde_json::Value;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Capability of sources holding an OS resource
pub trait Closeable {
    /// Release the underlying handle
    ///
    /// # Errors
    /// Returns error if the handle could not be released
    fn close(&mut self) -> io::Result<()>;

    /// File that may be removed once the source is consumed
    ///
    /// Sources reading content they do not own return `None`.
    fn backing_path(&self) -> Option<&Path> {
        None
    }
}

/// Readable source of raw derivative content
pub trait RawSource: Read + Send + fmt::Debug {
    /// Closeable capability, if the source holds an OS resource
    fn closeable(&mut self) -> Option<&mut dyn Closeable> {
        None
    }

    /// Local file holding the content, for processors that need a path
    fn local_path(&self) -> Option<&Path> {
        None
    }
}

/// In-memory content
#[derive(Debug)]
pub struct BytesSource(Cursor<Vec<u8>>);

impl BytesSource {
    /// Wrap bytes
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Cursor::new(bytes.into()))
    }
}

impl Read for BytesSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl RawSource for BytesSource {}

/// File-backed content
///
/// Opened files are only closed on release; temporary files are also
/// removable.
#[derive(Debug)]
pub struct FileSource {
    file: Option<File>,
    path: PathBuf,
    removable: bool,
}

impl FileSource {
    /// Open a file that must survive the upload
    ///
    /// # Errors
    /// Returns error if the file cannot be opened
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_removal(path.into(), false)
    }

    /// Open a scratch file the upload may delete
    ///
    /// # Errors
    /// Returns error if the file cannot be opened
    pub fn temporary(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_removal(path.into(), true)
    }

    fn with_removal(path: PathBuf, removable: bool) -> io::Result<Self> {
        let file = File::open(&path)?;
        Ok(Self {
            file: Some(file),
            path,
            removable,
        })
    }

    /// Path of the file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(closed_error()),
        }
    }
}

impl Closeable for FileSource {
    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }

    fn backing_path(&self) -> Option<&Path> {
        self.removable.then_some(self.path.as_path())
    }
}

impl RawSource for FileSource {
    fn closeable(&mut self) -> Option<&mut dyn Closeable> {
        Some(self)
    }

    fn local_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|_| self.path.as_path())
    }
}

/// Local copy of stored content, removed when closed
#[derive(Debug)]
pub struct DownloadedSource(Option<NamedTempFile>);

impl DownloadedSource {
    /// Copy a reader into a fresh temporary file, rewound for reading
    ///
    /// # Errors
    /// Returns error if the temporary file cannot be created or written
    pub fn copy_from(reader: &mut dyn Read) -> io::Result<Self> {
        let mut file = NamedTempFile::new()?;
        io::copy(reader, &mut file)?;
        file.as_file_mut().seek(SeekFrom::Start(0))?;
        Ok(Self(Some(file)))
    }

    /// Path of the temporary copy, while it exists
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.0.as_ref().map(NamedTempFile::path)
    }
}

impl Read for DownloadedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.as_mut() {
            Some(file) => file.read(buf),
            None => Err(closed_error()),
        }
    }
}

impl Closeable for DownloadedSource {
    fn close(&mut self) -> io::Result<()> {
        match self.0.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

impl RawSource for DownloadedSource {
    fn closeable(&mut self) -> Option<&mut dyn Closeable> {
        Some(self)
    }

    fn local_path(&self) -> Option<&Path> {
        self.path()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "raw source already closed")
}

/// Not-yet-uploaded derivative
///
/// Carries metadata hints (`filename`, `mime_type`, ...) that the uploader
/// copies onto the resulting artifact.
#[derive(Debug)]
pub struct RawArtifact {
    source: Box<dyn RawSource>,
    metadata: Metadata,
    released: bool,
}

impl RawArtifact {
    /// Wrap any raw source
    #[must_use]
    pub fn new(source: impl RawSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    /// Wrap an already boxed source
    #[must_use]
    pub fn from_boxed(source: Box<dyn RawSource>) -> Self {
        Self {
            source,
            metadata: Metadata::new(),
            released: false,
        }
    }

    /// In-memory content
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(BytesSource::new(bytes))
    }

    /// Existing file that must be kept after upload
    ///
    /// # Errors
    /// Returns error if the file cannot be opened
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let filename = file_name(&path);
        Ok(Self::new(FileSource::open(path)?).with_optional_filename(filename))
    }

    /// Scratch file removed after upload (unless the upload opts out)
    ///
    /// # Errors
    /// Returns error if the file cannot be opened
    pub fn temporary(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let filename = file_name(&path);
        Ok(Self::new(FileSource::temporary(path)?).with_optional_filename(filename))
    }

    /// Set a metadata hint
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy every entry of `metadata` into the hints
    #[must_use]
    pub fn with_metadata_from(mut self, metadata: &Metadata) -> Self {
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Set the `filename` hint
    #[must_use]
    pub fn with_filename(self, filename: impl Into<String>) -> Self {
        self.with_metadata("filename", filename.into())
    }

    fn with_optional_filename(self, filename: Option<String>) -> Self {
        match filename {
            Some(name) => self.with_filename(name),
            None => self,
        }
    }

    /// Metadata hints
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// `filename` hint, if any
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get("filename").and_then(Value::as_str)
    }

    /// Local file holding the content, while the source is open
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        self.source.local_path()
    }

    /// Whether the source exposes the closeable capability
    #[must_use]
    pub fn is_closeable(&mut self) -> bool {
        self.source.closeable().is_some()
    }

    /// Whether [`release`](Self::release) already ran
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the underlying resource
    ///
    /// Closes closeable sources and, when `delete` is set, removes the
    /// backing file. A file that is already gone counts as removed. Calling
    /// this more than once is a no-op.
    ///
    /// # Errors
    /// Returns error if closing fails or removal fails for a reason other
    /// than the file being absent
    pub fn release(&mut self, delete: bool) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let Some(closeable) = self.source.closeable() else {
            return Ok(());
        };
        closeable.close()?;

        if !delete {
            return Ok(());
        }
        if let Some(path) = closeable.backing_path() {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Read for RawArtifact {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(contents: &[u8]) -> PathBuf {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.into_temp_path().keep().unwrap()
    }

    #[test]
    fn bytes_source_is_not_closeable() {
        let mut raw = RawArtifact::from_bytes(b"abc".to_vec());
        assert!(!raw.is_closeable());
        let mut out = String::new();
        raw.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
        raw.release(true).unwrap();
        assert!(raw.is_released());
    }

    #[test]
    fn temporary_file_removed_on_release() {
        let path = scratch_file(b"tmp");
        let mut raw = RawArtifact::temporary(&path).unwrap();
        assert!(raw.is_closeable());
        assert!(raw.filename().is_some());

        raw.release(true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn temporary_file_kept_without_delete() {
        let path = scratch_file(b"tmp");
        let mut raw = RawArtifact::temporary(&path).unwrap();
        raw.release(false).unwrap();
        assert!(path.exists());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn release_tolerates_already_removed_file() {
        let path = scratch_file(b"gone");
        let mut raw = RawArtifact::temporary(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(raw.release(true).is_ok());
    }

    #[test]
    fn opened_file_never_removed() {
        let path = scratch_file(b"keep");
        let mut raw = RawArtifact::open(&path).unwrap();
        raw.release(true).unwrap();
        assert!(path.exists());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn closed_source_refuses_reads() {
        let path = scratch_file(b"x");
        let mut raw = RawArtifact::temporary(&path).unwrap();
        raw.release(true).unwrap();
        let mut buf = [0u8; 1];
        assert!(raw.read(&mut buf).is_err());
    }

    #[test]
    fn downloaded_copy_removed_on_release() {
        let mut source = DownloadedSource::copy_from(&mut &b"stored"[..]).unwrap();
        let path = source.path().unwrap().to_path_buf();
        let mut out = String::new();
        source.read_to_string(&mut out).unwrap();
        assert_eq!(out, "stored");

        let mut raw = RawArtifact::new(source);
        assert_eq!(raw.local_path(), Some(path.as_path()));
        raw.release(false).unwrap();
        assert!(!path.exists());
        assert_eq!(raw.local_path(), None);
    }

    #[test]
    fn local_path_follows_source_kind() {
        assert_eq!(RawArtifact::from_bytes(b"x".to_vec()).local_path(), None);

        let path = scratch_file(b"kept");
        let mut raw = RawArtifact::open(&path).unwrap();
        assert_eq!(raw.local_path(), Some(path.as_path()));
        raw.release(false).unwrap();
        assert_eq!(raw.local_path(), None);
        fs::remove_file(path).unwrap();
    }
}
