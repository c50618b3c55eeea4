//! Temporary response files.
//!
//! Query output is written to a [`SpoolWriter`] and handed around as a
//! [`SpoolFile`]. Both own the file on disk: dropping either one deletes it,
//! so a failure at any point between creation and delivery cannot leak it.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::{NamedTempFile, TempPath};

const SPOOL_PREFIX: &str = "tsdb";
const SPOOL_SUFFIX: &str = ".json";

/// A spool file still being written.
#[derive(Debug)]
pub struct SpoolWriter {
    out: BufWriter<NamedTempFile>,
}

impl SpoolWriter {
    /// Create a uniquely named spool file in `dir`.
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .suffix(SPOOL_SUFFIX)
            .tempfile_in(dir)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        self.out.get_ref().path()
    }

    /// Flush and close the file, keeping it on disk as a [`SpoolFile`].
    pub fn finish(self) -> io::Result<SpoolFile> {
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        Ok(SpoolFile {
            path: file.into_temp_path(),
        })
    }
}

impl Write for SpoolWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// A completed spool file. Deleted when dropped.
#[derive(Debug)]
pub struct SpoolFile {
    path: TempPath,
}

impl SpoolFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a new spool next to this one, for plugins that derive a
    /// replacement file.
    pub fn sibling(&self) -> io::Result<SpoolWriter> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        SpoolWriter::create_in(dir)
    }

    /// Release the deletion guard to a new owner, e.g. a streaming body.
    pub fn into_temp_path(self) -> TempPath {
        self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_spool_keeps_contents_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpoolWriter::create_in(dir.path()).unwrap();
        writer.write_all(b"[1,2,3]").unwrap();
        let spool = writer.finish().unwrap();

        let path = spool.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1,2,3]");
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("tsdb"));

        drop(spool);
        assert!(!path.exists());
    }

    #[test]
    fn abandoned_writer_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpoolWriter::create_in(dir.path()).unwrap();
        writer.write_all(b"partial").unwrap();
        let path = writer.path().to_path_buf();
        assert!(path.exists());

        drop(writer);
        assert!(!path.exists());
    }

    #[test]
    fn sibling_lands_in_same_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolWriter::create_in(dir.path()).unwrap().finish().unwrap();
        let sibling = spool.sibling().unwrap();
        assert_eq!(sibling.path().parent(), spool.path().parent());
        assert_ne!(sibling.path(), spool.path());
    }
}
