//! Destinations for downloaded pictures.

use {
    crate::error::{Error, Result},
    log::{debug, info},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Receives completed pictures and diagnostic dumps.
pub trait PictureSink {
    /// Persist `bytes` under `name`, returning where it ended up.
    fn write_whole_file(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Writes pictures into a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Sink writing into `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for FileSink {
    fn default() -> Self {
        Self::new(".")
    }
}

impl PictureSink for FileSink {
    fn write_whole_file(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        // Camera-supplied names must not escape the output directory.
        let file_name = Path::new(name)
            .file_name()
            .filter(|n| *n == std::ffi::OsStr::new(name))
            .ok_or_else(|| Error::InvalidArgument(format!("invalid picture file name: {name:?}")))?;

        if !self.dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.dir)?;
        }
        let path = self.dir.join(file_name);
        debug!("Writing {} bytes to {}", bytes.len(), path.display());
        fs::write(&path, bytes)?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}

/// Keeps pictures in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Files written so far, in order.
    pub files: Vec<(String, Vec<u8>)>,
}

impl PictureSink for MemorySink {
    fn write_whole_file(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.files.push((name.to_string(), bytes.to_vec()));
        Ok(PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_into_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(tmp.path().join("pics"));
        let path = sink.write_whole_file("DCP00001.JPG", b"\xFF\xD8jpeg").unwrap();
        assert_eq!(path, tmp.path().join("pics").join("DCP00001.JPG"));
        assert_eq!(fs::read(path).unwrap(), b"\xFF\xD8jpeg");
    }

    #[test]
    fn test_file_sink_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(tmp.path());
        sink.write_whole_file("picture.jpg", b"first").unwrap();
        let path = sink.write_whole_file("picture.jpg", b"second").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn test_file_sink_rejects_path_names() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(tmp.path());
        for name in ["../escape.jpg", "a/b.jpg", "", ".."] {
            assert!(
                matches!(
                    sink.write_whole_file(name, b"x"),
                    Err(Error::InvalidArgument(_))
                ),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_file_sink_reports_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let mut sink = FileSink::new(&blocker);
        assert!(matches!(
            sink.write_whole_file("picture.jpg", b"x"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_memory_sink_records_order() {
        let mut sink = MemorySink::default();
        sink.write_whole_file("a.jpg", &[1]).unwrap();
        sink.write_whole_file("b.jpg", &[2, 3]).unwrap();
        assert_eq!(sink.files.len(), 2);
        assert_eq!(sink.files[1], ("b.jpg".to_string(), vec![2, 3]));
    }
}
