use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

/// What [`JsonlFile::rewrite`] does with one line.
pub enum Rewrite {
    Keep,
    Replace(String),
    Drop,
}

/// One append-only `.jsonl` file. Mutations are serialized through `lock`;
/// readers never lock and ignore a trailing line that is still being written.
#[derive(Debug)]
pub struct JsonlFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Creates the file (and its directory) unless it already exists.
    pub fn create(&self) -> io::Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    pub fn remove(&self) -> io::Result<()> {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn truncate(&self) -> io::Result<()> {
        let _guard = self.lock.lock();
        if self.path.exists() {
            File::create(&self.path)?;
        }
        Ok(())
    }

    /// Appends `bytes` (one or more complete lines) with a single write, unless
    /// `conflicts` matches an existing line. Returns whether anything was written.
    pub fn append_unless(&self, bytes: &[u8], conflicts: impl Fn(&str) -> bool) -> io::Result<bool> {
        let _guard = self.lock.lock();
        if !self.path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not initialized", self.path.display()),
            ));
        }
        for line in self.lines()? {
            if conflicts(&line?.1) {
                return Ok(false);
            }
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let end = self.complete_length(&file)?;
        if let Err(e) = file.write_all(bytes).and_then(|_| file.flush()) {
            file.set_len(end)?;
            return Err(e);
        }
        Ok(true)
    }

    /// Length of the file up to its last complete line. A torn tail left by an
    /// interrupted append is cut off here so the next append starts a fresh line.
    fn complete_length(&self, file: &File) -> io::Result<u64> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(0);
        }
        let contents = fs::read(&self.path)?;
        if contents.last() == Some(&b'\n') {
            return Ok(len);
        }
        let end = contents.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1) as u64;
        file.set_len(end)?;
        Ok(end)
    }

    /// Lazily iterates `(line number, line)` pairs, skipping blank lines.
    pub fn lines(&self) -> io::Result<Lines> {
        let file = File::open(&self.path)?;
        Ok(Lines {
            reader: BufReader::new(file),
            line_no: 0,
            buf: Vec::new(),
        })
    }

    pub fn count(&self) -> io::Result<u64> {
        let mut count = 0;
        for line in self.lines()? {
            line?;
            count += 1;
        }
        Ok(count)
    }

    /// Rewrites the file line by line into `<file>.compacted` and swaps it in.
    /// Returns the number of lines replaced or dropped; nothing is written when
    /// that number is zero.
    pub fn rewrite(&self, mut decide: impl FnMut(&str) -> Rewrite) -> io::Result<usize> {
        let _guard = self.lock.lock();
        let lines = self.lines()?;
        let new_path = self.path.with_extension("compacted");
        match copy_lines(&new_path, lines, &mut decide) {
            Ok(0) => {
                fs::remove_file(&new_path)?;
                Ok(0)
            }
            Ok(changed) => {
                fs::rename(&new_path, &self.path)?;
                Ok(changed)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&new_path) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!(path = %new_path.display(), error = %cleanup, "could not remove partial rewrite");
                    }
                }
                Err(e)
            }
        }
    }
}

fn copy_lines(to: &Path, lines: Lines, decide: &mut impl FnMut(&str) -> Rewrite) -> io::Result<usize> {
    let mut out = BufWriter::new(File::create(to)?);
    let mut changed = 0;
    for line in lines {
        let (_, line) = line?;
        match decide(&line) {
            Rewrite::Keep => writeln!(out, "{line}")?,
            Rewrite::Replace(replacement) => {
                changed += 1;
                writeln!(out, "{replacement}")?;
            }
            Rewrite::Drop => changed += 1,
        }
    }
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(changed)
}

pub struct Lines {
    reader: BufReader<File>,
    line_no: usize,
    buf: Vec<u8>,
}

impl Iterator for Lines {
    type Item = io::Result<(usize, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                // A line without its newline is an append in flight.
                Ok(_) if self.buf.last() != Some(&b'\n') => return None,
                Ok(_) => {
                    self.line_no += 1;
                    self.buf.pop();
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let line = String::from_utf8(std::mem::take(&mut self.buf))
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                    return Some(line.map(|l| (self.line_no, l)));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_scan() {
        let dir = TempDir::new().unwrap();
        let file = JsonlFile::new(dir.path().join("s").join("f.jsonl"));
        assert!(file.append_unless(b"{}\n", |_| false).is_err());

        file.create().unwrap();
        file.create().unwrap();
        assert!(file.append_unless(b"a\nb\n", |_| false).unwrap());
        assert!(!file.append_unless(b"c\n", |l| l == "b").unwrap());
        assert_eq!(file.count().unwrap(), 2);
    }

    #[test]
    fn test_partial_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.jsonl");
        fs::write(&path, "first\n\nsecond\nthird-in-flight").unwrap();
        let file = JsonlFile::new(path);
        let lines: Vec<_> = file.lines().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec![(1, "first".to_string()), (3, "second".to_string())]);
    }

    #[test]
    fn test_rewrite_swaps_in_compacted_file() {
        let dir = TempDir::new().unwrap();
        let file = JsonlFile::new(dir.path().join("f.jsonl"));
        file.create().unwrap();
        file.append_unless(b"keep\ndrop\nchange\n", |_| false).unwrap();

        let changed = file
            .rewrite(|line| match line {
                "drop" => Rewrite::Drop,
                "change" => Rewrite::Replace("changed".into()),
                _ => Rewrite::Keep,
            })
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "keep\nchanged\n");
        assert!(!file.path().with_extension("compacted").exists());

        assert_eq!(file.rewrite(|_| Rewrite::Keep).unwrap(), 0);
    }

    #[test]
    fn test_failed_rewrite_leaves_no_temporary_file() {
        let dir = TempDir::new().unwrap();
        let file = JsonlFile::new(dir.path().join("missing.jsonl"));
        assert!(file.rewrite(|_| Rewrite::Drop).is_err());
        assert!(!file.path().with_extension("compacted").exists());

        let path = dir.path().join("binary.jsonl");
        fs::write(&path, b"fine\n\xff\xfe\n").unwrap();
        let file = JsonlFile::new(path);
        assert!(file.rewrite(|_| Rewrite::Drop).is_err());
        assert!(!file.path().with_extension("compacted").exists());
        assert_eq!(fs::read(file.path()).unwrap(), b"fine\n\xff\xfe\n");
    }

    #[test]
    fn test_append_after_torn_tail_starts_a_new_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.jsonl");
        fs::write(&path, "first\n{\"half\":").unwrap();
        let file = JsonlFile::new(path);
        assert!(file.append_unless(b"second\n", |_| false).unwrap());
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "first\nsecond\n");

        fs::write(file.path(), "torn").unwrap();
        assert!(file.append_unless(b"only\n", |_| false).unwrap());
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "only\n");
    }
}
