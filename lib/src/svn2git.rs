//! Dense svn-revision -> mono-commit map: a flat file of 20-byte SHA-1
//! slots at offset `20 * revision`, one per source directory. Revisions
//! below the source's first tracked revision, or never translated, read
//! back as [`Sha1Bytes::ABSENT`].

use std::path::Path;

use crate::error::StoreError;
use crate::file_stream::FileStream;
use crate::sha1::Sha1Bytes;

const SLOT_SIZE: u64 = 20;

pub struct Svn2Git {
    stream: FileStream,
}

impl Svn2Git {
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            stream: FileStream::open_rw(path)?,
        })
    }

    pub fn open_ro(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            stream: FileStream::open_ro(path)?,
        })
    }

    /// Returns the mono commit recorded for `revision`, or `ABSENT` if the
    /// file is too short to cover it or the slot was never written.
    pub fn get(&mut self, revision: u32) -> Result<Sha1Bytes, StoreError> {
        let offset = u64::from(revision) * SLOT_SIZE;
        let len = self.stream.len()?;
        if offset + SLOT_SIZE > len {
            return Ok(Sha1Bytes::ABSENT);
        }
        let mut buf = [0u8; 20];
        self.stream.read_at(offset, &mut buf)?;
        Ok(Sha1Bytes(buf))
    }

    /// Records `mono` at `revision`'s slot. Any gap between the current
    /// end of file and `revision` is filled with absent (all-zero) slots,
    /// since svn revisions are not necessarily contiguous per source.
    pub fn set(&mut self, revision: u32, mono: Sha1Bytes) -> Result<(), StoreError> {
        let offset = u64::from(revision) * SLOT_SIZE;
        let len = self.stream.len()?;
        if offset >= len {
            let gap = offset - len;
            if gap > 0 {
                self.stream.append(&vec![0u8; gap as usize])?;
            }
            self.stream.append(&mono.0)?;
        } else {
            self.stream.write_at(offset, &mono.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_revision_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Svn2Git::open_rw(dir.path().join("svn2git")).unwrap();
        assert_eq!(table.get(5).unwrap(), Sha1Bytes::ABSENT);
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Svn2Git::open_rw(dir.path().join("svn2git")).unwrap();
        let mono = Sha1Bytes::from_hex(&"ab".repeat(20)).unwrap();
        table.set(12, mono).unwrap();
        assert_eq!(table.get(12).unwrap(), mono);
        assert_eq!(table.get(11).unwrap(), Sha1Bytes::ABSENT);
        assert_eq!(table.get(13).unwrap(), Sha1Bytes::ABSENT);
    }

    #[test]
    fn test_out_of_order_writes_fill_gaps_with_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Svn2Git::open_rw(dir.path().join("svn2git")).unwrap();
        let a = Sha1Bytes::from_hex(&"11".repeat(20)).unwrap();
        let b = Sha1Bytes::from_hex(&"22".repeat(20)).unwrap();
        table.set(3, a).unwrap();
        table.set(0, b).unwrap();
        assert_eq!(table.get(0).unwrap(), b);
        assert_eq!(table.get(3).unwrap(), a);
        assert_eq!(table.get(1).unwrap(), Sha1Bytes::ABSENT);
    }

    #[test]
    fn test_overwrite_existing_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Svn2Git::open_rw(dir.path().join("svn2git")).unwrap();
        let a = Sha1Bytes::from_hex(&"aa".repeat(20)).unwrap();
        let b = Sha1Bytes::from_hex(&"bb".repeat(20)).unwrap();
        table.set(2, a).unwrap();
        table.set(2, b).unwrap();
        assert_eq!(table.get(2).unwrap(), b);
    }
}
