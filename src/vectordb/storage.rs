use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};

use crate::vectordb::types::Cell;

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct StoredRow {
    pub seq: u64,
    pub cells: Vec<Option<Cell>>,
}

/// One entry of an entity's segment log. A whole batch is one entry, so a
/// batch is either replayed completely or not at all.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum LogRecord {
    /// Inserts rows; a row whose `seq` already exists replaces it in place.
    Upsert(Vec<StoredRow>),
    Delete(Vec<u64>),
    Truncate,
}

/// Append-only segment file: `[len u32 LE][rkyv bytes]` per record.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    file: File,
    offset: u64,
    strict: bool,
}

impl Segment {
    pub fn open(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).append(true).create(true).open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
            strict,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn append(&mut self, record: &LogRecord) -> io::Result<u64> {
        let bytes = rkyv::to_bytes::<_, 4096>(record).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        // Prefix and body go out in one write so a crash leaves at most a short tail.
        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        frame.extend_from_slice(&bytes);
        self.file.write_all(&frame)?;
        if self.strict {
            self.file.sync_data()?;
        }

        let start = self.offset;
        self.offset += frame.len() as u64;
        Ok(start)
    }

    /// Reads every complete record. A torn final frame is ignored; a frame that
    /// fails validation is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<LogRecord>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Vec::new());
        }
        // Safety: the segment is only appended to by this process while it is open.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= mmap.len() {
            let mut len_buf = [0u8; 4];
            len_buf.copy_from_slice(&mmap[pos..pos + 4]);
            let len = u32::from_le_bytes(len_buf) as usize;
            let start = pos + 4;
            if start + len > mmap.len() {
                tracing::warn!(segment = %path.display(), offset = pos, "ignoring torn tail record");
                break;
            }

            let mut aligned = rkyv::AlignedVec::with_capacity(len);
            aligned.extend_from_slice(&mmap[start..start + len]);
            let archived = rkyv::check_archived_root::<LogRecord>(&aligned).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt record at offset {pos} of {}: {e:?}", path.display()),
                )
            })?;
            let record: LogRecord = match archived.deserialize(&mut rkyv::Infallible) {
                Ok(record) => record,
                Err(never) => match never {},
            };
            records.push(record);
            pos = start + len;
        }
        Ok(records)
    }

    /// Writes `records` to `<segment>.compacted`, then swaps it in for this segment.
    pub fn rewrite(&mut self, records: &[LogRecord]) -> io::Result<()> {
        let new_path = self.path.with_extension("compacted");
        if new_path.exists() {
            fs::remove_file(&new_path)?;
        }
        let mut compacted = Segment::open(&new_path, false)?;
        for record in records {
            compacted.append(record)?;
        }
        compacted.file.sync_all()?;
        drop(compacted);

        fs::rename(&new_path, &self.path)?;
        *self = Segment::open(&self.path, self.strict)?;
        Ok(())
    }
}
