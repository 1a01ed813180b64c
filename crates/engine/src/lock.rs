use crate::Result;
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "shadowscan.lock";

/// Process-wide run lock. Exactly one run may hold it per store directory;
/// a failed acquisition is not an error, it prevents a double-run.
pub struct RunLock {
    file: std::fs::File,
    path: PathBuf,
}

pub enum LockAttempt {
    Acquired(RunLock),
    /// Another process holds the lock; `holder` is its recorded identity.
    Held { holder: String },
}

impl RunLock {
    pub fn try_acquire(store_dir: &Path) -> Result<LockAttempt> {
        std::fs::create_dir_all(store_dir)?;
        let path = store_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                writeln!(file, "pid={}", std::process::id())?;
                file.flush()?;
                Ok(LockAttempt::Acquired(RunLock { file, path }))
            }
            Err(_) => {
                let mut holder = String::new();
                let _ = file.read_to_string(&mut holder);
                let holder = holder.trim().to_string();
                Ok(LockAttempt::Held {
                    holder: if holder.is_empty() {
                        "unknown".to_string()
                    } else {
                        holder
                    },
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::{LockAttempt, RunLock};

    #[test]
    fn second_acquisition_reports_holder() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = RunLock::try_acquire(dir.path()).unwrap();
        let LockAttempt::Acquired(lock) = first else {
            panic!("first acquisition must succeed");
        };

        match RunLock::try_acquire(dir.path()).unwrap() {
            LockAttempt::Held { holder } => {
                assert!(holder.contains("pid="), "holder was {holder:?}");
            }
            LockAttempt::Acquired(_) => panic!("lock must be held"),
        }
        drop(lock);

        // Released lock can be re-acquired.
        match RunLock::try_acquire(dir.path()).unwrap() {
            LockAttempt::Acquired(_) => {}
            LockAttempt::Held { .. } => panic!("lock must be free again"),
        }
    }
}
