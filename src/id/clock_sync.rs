//! Durable clock synchronizer for the time-based UUID strategy.
//!
//! A pair of small files persists the upper bound of the timestamp window
//! already handed out, written alternately so a torn write leaves the other
//! file intact. On startup the maximum of both files floors the clock, so a
//! restart (or a wall clock that jumped backwards while the process was
//! down) never re-issues a window. Both files are held under exclusive
//! region locks for the process lifetime to keep a second process off the
//! same pair.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TernError};

/// Timestamps are 100ns ticks since the Unix epoch.
const TICKS_PER_MS: i64 = 10_000;

/// Window reserved ahead of the last issued timestamp before the boundary
/// is persisted again.
const WINDOW_TICKS: i64 = 10_000 * TICKS_PER_MS; // 10 seconds

const FILE_NAMES: [&str; 2] = ["clock-sync-a", "clock-sync-b"];

struct SyncState {
    last_ts: i64,
    boundary: i64,
    /// Index of the file the next boundary write goes to.
    next_file: usize,
    files: Option<[File; 2]>,
}

/// Process-exclusive, restart-durable source of strictly increasing
/// timestamps.
pub struct ClockSync {
    paths: [PathBuf; 2],
    state: Mutex<SyncState>,
}

impl ClockSync {
    /// Opens (creating if absent) the synchronizer pair under `dir` and
    /// locks both files. Fails if another process already holds them.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let paths = [dir.join(FILE_NAMES[0]), dir.join(FILE_NAMES[1])];
        let mut files = Vec::with_capacity(2);
        let mut floor = 0i64;
        for path in &paths {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            if !lock_file(&file)? {
                return Err(TernError::Invalid(format!(
                    "clock synchronizer {} is locked by another process",
                    path.display()
                )));
            }
            floor = floor.max(read_boundary(&mut file)?);
            files.push(file);
        }
        let files: [File; 2] = match files.try_into() {
            Ok(f) => f,
            Err(_) => unreachable!("two paths, two files"),
        };
        debug!(floor, "clock_sync.opened");
        Ok(Self {
            paths,
            state: Mutex::new(SyncState {
                last_ts: floor,
                boundary: floor,
                next_file: 0,
                files: Some(files),
            }),
        })
    }

    /// Returns a timestamp strictly above every timestamp this pair has
    /// ever returned, persisting a new window boundary when the current one
    /// is consumed.
    pub fn next_timestamp(&self) -> Result<i64> {
        let mut state = self.state.lock();
        if state.files.is_none() {
            return Err(TernError::Invalid(
                "clock synchronizer already released".into(),
            ));
        }
        let now = current_ticks();
        let ts = now.max(state.last_ts + 1);
        if ts >= state.boundary {
            let boundary = ts + WINDOW_TICKS;
            let idx = state.next_file;
            if let Some(files) = state.files.as_mut() {
                write_boundary(&mut files[idx], boundary)?;
            }
            state.boundary = boundary;
            state.next_file = (idx + 1) % 2;
        }
        state.last_ts = ts;
        Ok(ts)
    }

    /// Unlocks and drops both files. Idempotent; `next_timestamp` fails
    /// afterwards.
    pub fn release(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(files) = state.files.take() {
            for (file, path) in files.iter().zip(&self.paths) {
                unlock_file(file)?;
                debug!(path = %path.display(), "clock_sync.released");
            }
        }
        Ok(())
    }
}

impl Drop for ClockSync {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn current_ticks() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_nanos() / 100) as i64)
        .unwrap_or(0)
}

fn read_boundary(file: &mut File) -> Result<i64> {
    if file.metadata()?.len() < 8 {
        return Ok(0);
    }
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn write_boundary(file: &mut File, boundary: i64) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&boundary.to_be_bytes())?;
    file.sync_data()?;
    Ok(())
}

#[cfg(unix)]
fn lock_file(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;
    let mut flock = libc::flock {
        l_type: libc::F_WRLCK as _,
        l_whence: libc::SEEK_SET as _,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    let res = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut flock) };
    if res == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EACCES) => Ok(false),
        _ => Err(err.into()),
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    let mut flock = libc::flock {
        l_type: libc::F_UNLCK as _,
        l_whence: libc::SEEK_SET as _,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    let res = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut flock) };
    if res == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().into())
    }
}

#[cfg(not(unix))]
fn lock_file(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> Result<()> {
    Ok(())
}
