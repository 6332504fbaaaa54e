//! Crash-safe store on a plain directory.
//!
//! Layout:
//! - `oplog` - one operation per line, `"<crc32 hex> <json>\n"`, append only
//! - `segment.<generation>` - a snapshot as JSON, written once via rename
//! - `superblock_a` / `superblock_b` - generation, version, seq, length and
//!   checksum of the segment they point at; each is replaced via rename
//!
//! A snapshot save writes a fresh segment, then points A and then B at it.
//! The previous segment is removed only once both superblocks have moved, so
//! a crash at any step leaves at least one superblock naming an intact
//! segment. Loading takes the newest superblock that validates.
//!
//! A final oplog line that fails its checksum is a torn write and is cut off
//! when the store is opened. A bad line anywhere else is corruption.

use super::{OpStore, StoreError};
use crate::op::Operation;
use crate::tree::Snapshot;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SUPERBLOCK_A: &str = "superblock_a";
const SUPERBLOCK_B: &str = "superblock_b";
const SEGMENT_PREFIX: &str = "segment.";
const OPLOG_FILE: &str = "oplog";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct Superblock {
    version: u32,
    generation: u64,
    seq_after: u64,
    segment_checksum: u32,
    segment_len: u64,
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    oplog: File,
}

struct LogScan {
    ops: Vec<Operation>,
    valid_len: u64,
    torn: bool,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let path = root.join(OPLOG_FILE);

        let scan = scan_log(&path)?;
        if scan.torn {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                "cutting torn write off the end of the oplog"
            );
            OpenOptions::new()
                .write(true)
                .open(&path)?
                .set_len(scan.valid_len)?;
        }

        let oplog = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { root, oplog })
    }

    /// True when `root` already holds a store.
    pub fn exists(root: impl AsRef<Path>) -> bool {
        root.as_ref().join(OPLOG_FILE).is_file()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rewrites the oplog without the operations the current snapshot
    /// already accounts for. Returns how many were dropped.
    pub fn compact(&mut self) -> Result<usize, StoreError> {
        let Some(snapshot) = self.load_snapshot()? else {
            return Ok(0);
        };
        let path = self.root.join(OPLOG_FILE);
        let scan = scan_log(&path)?;
        let total = scan.ops.len();
        let kept: Vec<&Operation> = scan
            .ops
            .iter()
            .filter(|op| op.seq > snapshot.seq_after)
            .collect();

        let mut text = String::new();
        for op in &kept {
            text.push_str(&encode_line(op)?);
        }
        write_atomic(&self.root.join("oplog.tmp"), &path, text.as_bytes())?;
        self.oplog = OpenOptions::new().append(true).open(&path)?;

        let dropped = total - kept.len();
        info!(dropped, kept = kept.len(), "compacted oplog");
        Ok(dropped)
    }

    fn segment_path(&self, generation: u64) -> PathBuf {
        self.root.join(format!("{SEGMENT_PREFIX}{generation}"))
    }

    /// Reads one superblock and the segment it names. `Ok(None)` when the
    /// superblock file does not exist.
    fn read_superblock(&self, name: &str) -> Result<Option<(Superblock, Snapshot)>, StoreError> {
        let bytes = match fs::read(self.root.join(name)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let superblock: Superblock = serde_json::from_slice(&bytes)
            .map_err(|_| StoreError::Corrupt("superblock decode"))?;
        if superblock.version != VERSION {
            return Err(StoreError::Corrupt("version"));
        }
        let segment = match fs::read(self.segment_path(superblock.generation)) {
            Ok(segment) => segment,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Corrupt("missing segment"));
            }
            Err(err) => return Err(err.into()),
        };
        if segment.len() as u64 != superblock.segment_len {
            return Err(StoreError::Corrupt("length mismatch"));
        }
        if checksum_bytes(&segment) != superblock.segment_checksum {
            return Err(StoreError::Corrupt("checksum mismatch"));
        }
        let snapshot: Snapshot = serde_json::from_slice(&segment)
            .map_err(|_| StoreError::Corrupt("segment decode"))?;
        if snapshot.seq_after != superblock.seq_after {
            return Err(StoreError::Corrupt("seq mismatch"));
        }
        Ok(Some((superblock, snapshot)))
    }

    /// Highest generation named by any superblock that still decodes.
    fn last_generation(&self) -> u64 {
        [SUPERBLOCK_A, SUPERBLOCK_B]
            .iter()
            .filter_map(|name| fs::read(self.root.join(name)).ok())
            .filter_map(|bytes| serde_json::from_slice::<Superblock>(&bytes).ok())
            .map(|superblock| superblock.generation)
            .max()
            .unwrap_or(0)
    }

    fn remove_stale_segments(&self, current: u64) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(generation) = name
                .to_str()
                .and_then(|name| name.strip_prefix(SEGMENT_PREFIX))
                .and_then(|rest| rest.parse::<u64>().ok())
            else {
                continue;
            };
            if generation != current
                && let Err(err) = fs::remove_file(entry.path())
            {
                warn!(generation, error = %err, "could not remove stale snapshot segment");
            }
        }
    }
}

impl OpStore for FileStore {
    fn append_op(&mut self, op: &Operation) -> Result<(), StoreError> {
        let line = encode_line(op)?;
        self.oplog.write_all(line.as_bytes())?;
        self.oplog.sync_data()?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let mut best: Option<(Superblock, Snapshot)> = None;
        let mut first_error = None;

        for name in [SUPERBLOCK_A, SUPERBLOCK_B] {
            match self.read_superblock(name) {
                Ok(Some((superblock, snapshot))) => {
                    if best
                        .as_ref()
                        .is_none_or(|(held, _)| superblock.generation > held.generation)
                    {
                        best = Some((superblock, snapshot));
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(superblock = name, error = %err, "superblock rejected");
                    first_error.get_or_insert(err);
                }
            }
        }

        match (best, first_error) {
            (Some((_, snapshot)), _) => Ok(Some(snapshot)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }

    fn load_ops_since(&self, seq: u64) -> Result<Vec<Operation>, StoreError> {
        let scan = scan_log(&self.root.join(OPLOG_FILE))?;
        if scan.torn {
            warn!("ignoring torn write at the end of the oplog");
        }
        let mut ops: Vec<Operation> = scan.ops.into_iter().filter(|op| op.seq > seq).collect();
        ops.sort_by_key(|op| op.seq);
        Ok(ops)
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(snapshot)?;
        let generation = self.last_generation() + 1;
        let segment_path = self.segment_path(generation);
        write_atomic(&segment_path.with_extension("tmp"), &segment_path, &payload)?;

        let superblock = Superblock {
            version: VERSION,
            generation,
            seq_after: snapshot.seq_after,
            segment_checksum: checksum_bytes(&payload),
            segment_len: payload.len() as u64,
        };
        let encoded = serde_json::to_vec(&superblock)?;
        for name in [SUPERBLOCK_A, SUPERBLOCK_B] {
            let path = self.root.join(name);
            write_atomic(&path.with_extension("tmp"), &path, &encoded)?;
        }
        self.remove_stale_segments(generation);

        info!(
            generation,
            seq_after = snapshot.seq_after,
            bytes = payload.len(),
            "saved snapshot"
        );
        Ok(())
    }
}

/// Writes `bytes` to `temp`, syncs it and renames it over `path`.
fn write_atomic(temp: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(temp, path)?;
    Ok(())
}

fn encode_line(op: &Operation) -> Result<String, StoreError> {
    let json = serde_json::to_string(op)?;
    Ok(format!("{:08x} {json}\n", checksum_bytes(json.as_bytes())))
}

fn decode_line(line: &str) -> Option<Operation> {
    let (crc, json) = line.split_once(' ')?;
    let crc = u32::from_str_radix(crc, 16).ok()?;
    if checksum_bytes(json.as_bytes()) != crc {
        return None;
    }
    serde_json::from_str(json).ok()
}

fn scan_log(path: &Path) -> Result<LogScan, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };

    let mut ops = Vec::new();
    let mut valid_len = 0;
    let mut start = 0;
    while start < bytes.len() {
        let (end, complete) = match bytes[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => (start + offset, true),
            None => (bytes.len(), false),
        };
        let decoded = std::str::from_utf8(&bytes[start..end])
            .ok()
            .and_then(decode_line);
        match decoded {
            Some(op) if complete => {
                ops.push(op);
                valid_len = end + 1;
            }
            // Only the final line may be damaged.
            _ if end + 1 >= bytes.len() => break,
            _ => return Err(StoreError::Corrupt("oplog checksum")),
        }
        start = end + 1;
    }

    Ok(LogScan {
        ops,
        valid_len: valid_len as u64,
        torn: valid_len < bytes.len(),
    })
}

fn checksum_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
