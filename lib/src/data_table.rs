//! Append-only `(key ‖ value)` record tables, keyed by a 20-byte SHA-1 and
//! located by a paired [`crate::index_store::IndexFile`]. Two concrete
//! tables are defined: `commits` (mono commit metadata) and `svnbase`
//! (the svn-revision carried by a merged commit, if any).

use std::path::Path;
use std::path::PathBuf;

use crate::error::StoreError;
use crate::file_stream::FileStream;
use crate::index_store::IndexEntry;
use crate::index_store::IndexFile;
use crate::index_store::Level;
use crate::index_store::ROOT_BITS;
use crate::index_store::SUBTRIE_BITS;
use crate::sha1::Sha1Bytes;

/// A table's fixed shape: its magic bytes (so unrelated files are never
/// opened by mistake) and the byte layout of one value past the 20-byte key.
pub trait TableSpec {
    const MAGIC: [u8; 8];
    const INDEX_MAGIC: [u8; 8];
    const VALUE_SIZE: usize;
    const NAME: &'static str;
}

pub struct CommitsTable;

impl TableSpec for CommitsTable {
    const MAGIC: [u8; 8] = [0x73, 0x02, 0x6D, 0x0C, 0x00, 0x6D, 0x74, 0x73];
    const INDEX_MAGIC: [u8; 8] = [0x73, 0x02, 0x6D, 0x01, 0x6E, 0x0D, 0x0E, 0x78];
    const VALUE_SIZE: usize = 20;
    const NAME: &'static str = "commits";
}

pub struct SvnBaseTable;

// svnbase has no independently documented index magic; this follows the
// commits table's pattern of a related-but-different byte string rather
// than reusing the data magic for both files.
impl TableSpec for SvnBaseTable {
    const MAGIC: [u8; 8] = [0x73, 0x02, 0x6D, 0x0B, 0x0A, 0x05, 0x0E, 0x72];
    const INDEX_MAGIC: [u8; 8] = [0x73, 0x02, 0x6D, 0x0B, 0x0A, 0x05, 0x0E, 0x78];
    const VALUE_SIZE: usize = 4;
    const NAME: &'static str = "svnbase";
}

const KEY_SIZE: u64 = 20;

/// An append-only, trie-indexed table of `(Sha1Bytes, [u8; N])` records.
pub struct Table<S: TableSpec> {
    data: FileStream,
    index: IndexFile,
    _spec: std::marker::PhantomData<S>,
}

impl<S: TableSpec> Table<S> {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let data = FileStream::open_rw(data_path(dir, S::NAME))?;
        if data.is_empty()? {
            let mut data = data;
            data.append(&S::MAGIC)?;
            return Self::finish_open(dir, data);
        }
        Self::finish_open(dir, data)
    }

    fn finish_open(dir: &Path, mut data: FileStream) -> Result<Self, StoreError> {
        let mut found = [0u8; 8];
        data.read_at(0, &mut found)?;
        if found != S::MAGIC {
            return Err(StoreError::MagicMismatch {
                path: data.path().to_path_buf(),
                expected: S::MAGIC,
                found,
            });
        }
        let record_size = KEY_SIZE + S::VALUE_SIZE as u64;
        let len = data.len()?;
        if (len - 8) % record_size != 0 {
            return Err(StoreError::InvalidSize {
                path: data.path().to_path_buf(),
                size: len,
                record_size,
            });
        }
        let index = IndexFile::open(index_path(dir, S::NAME), S::INDEX_MAGIC)?;
        Ok(Self {
            data,
            index,
            _spec: std::marker::PhantomData,
        })
    }

    fn record_size(&self) -> u64 {
        KEY_SIZE + S::VALUE_SIZE as u64
    }

    /// Looks up `key`'s value, walking the index trie and confirming the
    /// candidate record's stored key actually matches (collisions share a
    /// path prefix but are disambiguated once fully expanded).
    pub fn lookup(&mut self, key: &Sha1Bytes) -> Result<Option<Vec<u8>>, StoreError> {
        match self.walk(key)? {
            Walk::Found(record_idx) => Ok(Some(self.read_value(record_idx)?)),
            Walk::Empty { .. } | Walk::Collision { .. } => Ok(None),
        }
    }

    /// Inserts `(key, value)`, appending a new record and threading it into
    /// the index. Returns an error if `key` is already mapped.
    pub fn insert(&mut self, key: &Sha1Bytes, value: &[u8]) -> Result<(), StoreError> {
        assert_eq!(value.len(), S::VALUE_SIZE, "value size mismatch for table {}", S::NAME);
        match self.walk(key)? {
            Walk::Found(_) => Err(StoreError::AlreadyMapped { table: S::NAME }),
            Walk::Empty { level, slot } => {
                let record_idx = self.append_record(key, value)?;
                self.index.commit_entry(level, slot, IndexEntry::Terminal(record_idx))?;
                Ok(())
            }
            Walk::Collision { level, slot, next_depth, existing_record } => {
                let new_idx = self.append_record(key, value)?;
                self.resolve_collision(level, slot, next_depth, existing_record, new_idx)?;
                Ok(())
            }
        }
    }

    /// Expands a one-slot collision into a chain of freshly allocated
    /// subtries until the two keys' bit paths diverge, writing the deepest
    /// subtrie first and the redirect to it last: this reverse-chain order
    /// keeps every intermediate state either "old" or "new", never torn.
    ///
    /// `start_depth` is the bit depth already consumed to reach
    /// `top_level`/`top_slot` (the first bit of the new chain's first
    /// subtrie).
    fn resolve_collision(
        &mut self,
        top_level: Level,
        top_slot: usize,
        start_depth: u32,
        existing_record: u32,
        new_record: u32,
    ) -> Result<(), StoreError> {
        let existing_key = self.read_key(existing_record)?;
        let new_key = self.read_key(new_record)?;
        if existing_key == new_key {
            return Err(StoreError::AlreadyMapped { table: S::NAME });
        }
        let mismatch_bit = existing_key.first_mismatch(&new_key);

        let mut depth = start_depth;
        let mut chain: Vec<u32> = Vec::new();
        loop {
            chain.push(self.index.alloc_subtrie()?);
            if depth + SUBTRIE_BITS > mismatch_bit {
                break;
            }
            depth += SUBTRIE_BITS;
        }

        // Fill the deepest subtrie with both leaves first, then link each
        // shallower subtrie to its child, and finally redirect the
        // original slot to the top of the chain.
        let deepest = *chain.last().expect("at least one subtrie allocated");
        let old_bit = existing_key.bits(depth, SUBTRIE_BITS) as usize;
        let new_bit = new_key.bits(depth, SUBTRIE_BITS) as usize;
        self.index
            .commit_entry(Level::Subtrie(deepest), old_bit, IndexEntry::Terminal(existing_record))?;
        self.index
            .commit_entry(Level::Subtrie(deepest), new_bit, IndexEntry::Terminal(new_record))?;

        for i in (0..chain.len() - 1).rev() {
            let this_depth = start_depth + SUBTRIE_BITS * i as u32;
            let bit = existing_key.bits(this_depth, SUBTRIE_BITS) as usize;
            self.index
                .commit_entry(Level::Subtrie(chain[i]), bit, IndexEntry::Subtrie(chain[i + 1]))?;
        }

        self.index.redirect_entry(top_level, top_slot, IndexEntry::Subtrie(chain[0]))?;
        Ok(())
    }

    fn walk(&mut self, key: &Sha1Bytes) -> Result<Walk, StoreError> {
        let mut depth = 0u32;
        let mut bits_n = ROOT_BITS;
        let mut level = Level::Root;
        loop {
            let slot = key.bits(depth, bits_n) as usize;
            let next_depth = depth + bits_n;
            match self.index.probe(level, slot)? {
                crate::index_store::Probe::Empty { level, slot } => {
                    return Ok(Walk::Empty { level, slot });
                }
                crate::index_store::Probe::Entry(IndexEntry::Terminal(record_idx)) => {
                    let candidate = self.read_key(record_idx)?;
                    return Ok(if candidate == *key {
                        Walk::Found(record_idx)
                    } else {
                        Walk::Collision { level, slot, next_depth, existing_record: record_idx }
                    });
                }
                crate::index_store::Probe::Entry(IndexEntry::Subtrie(sub)) => {
                    level = Level::Subtrie(sub);
                    depth = next_depth;
                    bits_n = SUBTRIE_BITS;
                }
            }
        }
    }

    fn append_record(&mut self, key: &Sha1Bytes, value: &[u8]) -> Result<u32, StoreError> {
        let len = self.data.len()?;
        let record_size = self.record_size();
        debug_assert_eq!((len - 8) % record_size, 0);
        let record_idx = ((len - 8) / record_size) as u32;
        let mut buf = Vec::with_capacity(record_size as usize);
        buf.extend_from_slice(&key.0);
        buf.extend_from_slice(value);
        self.data.append(&buf)?;
        Ok(record_idx)
    }

    fn record_offset(&self, record_idx: u32) -> u64 {
        8 + u64::from(record_idx) * self.record_size()
    }

    fn read_key(&mut self, record_idx: u32) -> Result<Sha1Bytes, StoreError> {
        let mut buf = [0u8; 20];
        self.data.read_at(self.record_offset(record_idx), &mut buf)?;
        Ok(Sha1Bytes(buf))
    }

    fn read_value(&mut self, record_idx: u32) -> Result<Vec<u8>, StoreError> {
        let mut buf = vec![0u8; S::VALUE_SIZE];
        self.data
            .read_at(self.record_offset(record_idx) + KEY_SIZE, &mut buf)?;
        Ok(buf)
    }

    pub fn len(&self) -> Result<u64, StoreError> {
        Ok((self.data.len()? - 8) / self.record_size())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

enum Walk {
    Found(u32),
    Empty { level: Level, slot: usize },
    Collision { level: Level, slot: usize, next_depth: u32, existing_record: u32 },
}

fn data_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

fn index_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.index"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte0: u8) -> Sha1Bytes {
        let mut bytes = [0x42; 20];
        bytes[0] = byte0;
        Sha1Bytes(bytes)
    }

    #[test]
    fn test_insert_and_lookup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut table: Table<CommitsTable> = Table::open(dir.path()).unwrap();
        let k = key(1);
        let v = [0xAAu8; 20];
        table.insert(&k, &v).unwrap();
        assert_eq!(table.lookup(&k).unwrap(), Some(v.to_vec()));
    }

    #[test]
    fn test_lookup_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut table: Table<SvnBaseTable> = Table::open(dir.path()).unwrap();
        assert_eq!(table.lookup(&key(9)).unwrap(), None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut table: Table<SvnBaseTable> = Table::open(dir.path()).unwrap();
        let k = key(3);
        table.insert(&k, &[1, 2, 3, 4]).unwrap();
        let err = table.insert(&k, &[5, 6, 7, 8]).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyMapped { .. }));
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let k = key(7);
        {
            let mut table: Table<CommitsTable> = Table::open(dir.path()).unwrap();
            table.insert(&k, &[9u8; 20]).unwrap();
        }
        let mut reopened: Table<CommitsTable> = Table::open(dir.path()).unwrap();
        assert_eq!(reopened.lookup(&k).unwrap(), Some(vec![9u8; 20]));
    }

    #[test]
    fn test_many_keys_with_shared_prefix_collide_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let mut table: Table<CommitsTable> = Table::open(dir.path()).unwrap();
        let mut keys = Vec::new();
        for i in 0u8..64 {
            let mut bytes = [0u8; 20];
            bytes[0] = 0; // shared root slot for every key
            bytes[19] = i;
            let k = Sha1Bytes(bytes);
            table.insert(&k, &[i; 20]).unwrap();
            keys.push(k);
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.lookup(k).unwrap(), Some(vec![i as u8; 20]));
        }
    }
}
