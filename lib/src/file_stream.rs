//! Uniform read/write access over either a memory-mapped read-only file or a
//! buffered read-write file handle, so [`crate::index_store`] and
//! [`crate::data_table`] can share one access path regardless of whether a
//! table was opened for reading or for appending.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use memmap2::Mmap;

use crate::error::StoreError;

/// Either a read-only mmap'd view of a file, or a writable buffered stream
/// over it. Both sides support random-access `seek_and_read`; only the
/// writable side supports `write`/`append`.
pub enum FileStream {
    ReadOnly { path: PathBuf, mmap: Option<Mmap> },
    ReadWrite { path: PathBuf, file: File },
}

impl FileStream {
    /// Opens `path` read-only and maps it into memory. An empty or
    /// nonexistent file is represented with no mapping (`len() == 0`);
    /// `memmap2::Mmap::map` rejects zero-length files.
    pub fn open_ro(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::ReadOnly { path, mmap: None });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let len = file
            .metadata()
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: the file is not concurrently truncated by another
            // writer during the lifetime of this run; this crate opens
            // each store with a single owner per run and no file locking.
            Some(unsafe { Mmap::map(&file) }.map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?)
        };
        Ok(Self::ReadOnly { path, mmap })
    }

    /// Opens `path` for reading and appending, creating it if absent.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mut perms = file
                .metadata()
                .map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?
                .permissions();
            perms.set_mode(0o644);
            let _ = file.set_permissions(perms);
        }
        Ok(Self::ReadWrite { path, file })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::ReadOnly { path, .. } | Self::ReadWrite { path, .. } => path,
        }
    }

    pub fn len(&self) -> Result<u64, StoreError> {
        match self {
            Self::ReadOnly { mmap, .. } => Ok(mmap.as_ref().map_or(0, |m| m.len() as u64)),
            Self::ReadWrite { path, file } => file.metadata().map(|m| m.len()).map_err(|source| {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }),
        }
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        match self {
            Self::ReadOnly { path, mmap } => {
                let mmap = mmap.as_ref().ok_or_else(|| StoreError::InvalidSize {
                    path: path.clone(),
                    size: 0,
                    record_size: buf.len() as u64,
                })?;
                let start = offset as usize;
                let end = start + buf.len();
                let slice = mmap.get(start..end).ok_or_else(|| StoreError::InvalidSize {
                    path: path.clone(),
                    size: mmap.len() as u64,
                    record_size: end as u64,
                })?;
                buf.copy_from_slice(slice);
                Ok(())
            }
            Self::ReadWrite { path, file } => {
                file.seek(SeekFrom::Start(offset))
                    .and_then(|_| file.read_exact(buf))
                    .map_err(|source| StoreError::Io {
                        path: path.clone(),
                        source,
                    })
            }
        }
    }

    /// Appends `buf` to the end of a read-write stream, returning the byte
    /// offset at which it was written.
    pub fn append(&mut self, buf: &[u8]) -> Result<u64, StoreError> {
        match self {
            Self::ReadOnly { path, .. } => Err(StoreError::Io {
                path: path.clone(),
                source: io::Error::other("stream opened read-only"),
            }),
            Self::ReadWrite { path, file } => {
                let offset = file.seek(SeekFrom::End(0)).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                file.write_all(buf).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(offset)
            }
        }
    }

    /// Overwrites `buf.len()` bytes at `offset` in a read-write stream.
    /// Used for in-place terminal-entry updates during index collision
    /// resolution.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        match self {
            Self::ReadOnly { path, .. } => Err(StoreError::Io {
                path: path.clone(),
                source: io::Error::other("stream opened read-only"),
            }),
            Self::ReadWrite { path, file } => file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(buf))
                .map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                }),
        }
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        match self {
            Self::ReadOnly { .. } => Ok(()),
            Self::ReadWrite { path, file } => file.flush().map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut stream = FileStream::open_rw(&path).unwrap();
        let off1 = stream.append(b"hello").unwrap();
        let off2 = stream.append(b"world").unwrap();
        assert_eq!(off1, 0);
        assert_eq!(off2, 5);
        let mut buf = [0u8; 5];
        stream.read_at(off2, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_write_at_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut stream = FileStream::open_rw(&path).unwrap();
        stream.append(b"AAAAA").unwrap();
        stream.write_at(1, b"BBB").unwrap();
        let mut buf = [0u8; 5];
        stream.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"ABBBA");
    }

    #[test]
    fn test_readonly_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        let stream = FileStream::open_ro(&path).unwrap();
        assert!(stream.is_empty().unwrap());
    }

    #[test]
    fn test_readonly_mmap_reads_back_rw_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut rw = FileStream::open_rw(&path).unwrap();
        rw.append(b"content").unwrap();
        rw.flush().unwrap();
        drop(rw);
        let mut ro = FileStream::open_ro(&path).unwrap();
        let mut buf = [0u8; 7];
        ro.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"content");
    }
}
