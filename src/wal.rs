use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Longest commit record replay will accept. Anything larger is a corrupt length.
const MAX_RECORD_LEN: usize = 256 * 1024 * 1024;

/// Serialize one commit as `[u32 len][bincode Vec<Event>][u32 crc32]` onto `out`.
/// `out` is untouched when encoding fails.
fn encode_commit(out: &mut Vec<u8>, events: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "commit record too large"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Read the next intact commit, or `None` at end of log or at the first torn
/// or corrupt record.
fn decode_commit(reader: &mut impl Read) -> io::Result<Option<(Vec<Event>, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Vec<Event>>(&payload) {
        Ok(events) => Ok(Some((events, 8 + len as u64))),
        Err(_) => Ok(None),
    }
}

/// `false` when the log ends before `buf` is filled.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Durable log of committed transactions, one record per commit.
///
/// The checksum covers a whole commit, so after a crash replay sees either
/// every row image a transaction wrote or none of them. The file is kept cut
/// at the last durable record: a torn tail is dropped on recovery and a failed
/// write is truncated away before the next one.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Length of the file up to the last fsynced record.
    durable_len: u64,
    /// Set when a failed write could not be cut back; later writes are refused.
    wedged: bool,
    commits_since_compact: u64,
}

impl Wal {
    /// Open the log at `path`, returning it with every intact commit in order.
    /// Bytes past the last intact commit are discarded.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Vec<Event>>)> {
        let (commits, durable_len) = Self::read_commits(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > durable_len {
            warn!(
                "dropping {} bytes of incomplete WAL tail in {}",
                on_disk - durable_len,
                path.display()
            );
            file.set_len(durable_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            durable_len,
            wedged: false,
            commits_since_compact: commits.len() as u64,
        };
        Ok((wal, commits))
    }

    /// Every intact commit in `path` and the byte length they occupy.
    pub fn read_commits(path: &Path) -> io::Result<(Vec<Vec<Event>>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut commits = Vec::new();
        let mut len = 0;
        while let Some((events, record_len)) = decode_commit(&mut reader)? {
            commits.push(events);
            len += record_len;
        }
        Ok((commits, len))
    }

    /// Write a group of commits with a single fsync, returning one result per commit.
    ///
    /// A commit that cannot be encoded fails alone. A write or fsync failure
    /// fails the whole group and cuts the file back, so none of its commits
    /// can reappear on replay.
    pub fn write_commits<'a>(
        &mut self,
        commits: impl IntoIterator<Item = &'a [Event]>,
    ) -> Vec<io::Result<()>> {
        let mut buf = Vec::new();
        let mut results: Vec<io::Result<()>> = commits
            .into_iter()
            .map(|events| encode_commit(&mut buf, events))
            .collect();
        let encoded = results.iter().filter(|r| r.is_ok()).count() as u64;
        if encoded == 0 {
            return results;
        }
        match self.write_durable(&buf) {
            Ok(()) => self.commits_since_compact += encoded,
            Err(e) => {
                for r in results.iter_mut().filter(|r| r.is_ok()) {
                    *r = Err(io::Error::new(e.kind(), e.to_string()));
                }
            }
        }
        results
    }

    fn write_durable(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.wedged {
            return Err(io::Error::other("WAL left inconsistent by an earlier failed write"));
        }
        let written = self.file.write_all(buf).and_then(|()| self.file.sync_data());
        match written {
            Ok(()) => {
                self.durable_len += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.file.set_len(self.durable_len).and_then(|()| self.file.sync_all()) {
                    error!("could not truncate {} after failed write: {cut}", self.path.display());
                    self.wedged = true;
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.write_commits([events]).remove(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current rows as a single commit to a sibling temp file and fsync it.
    pub fn write_snapshot(path: &Path, rows: &[Event]) -> io::Result<()> {
        let mut buf = Vec::new();
        encode_commit(&mut buf, rows)?;
        let mut file = File::create(path.with_extension("wal.tmp"))?;
        file.write_all(&buf)?;
        file.sync_all()
    }

    /// Replace the log with the snapshot written by [`Wal::write_snapshot`].
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.file = file;
        self.wedged = false;
        self.commits_since_compact = 0;
        Ok(())
    }

    pub fn commits_since_compact(&self) -> u64 {
        self.commits_since_compact
    }
}
