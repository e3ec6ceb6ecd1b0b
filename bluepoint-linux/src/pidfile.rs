//! Pid file: one running daemon per pid file, and how `stop` finds it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Held by the running daemon; removes the file on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path` for this process. Fails if another live process holds it;
    /// a file left by a dead process is taken over.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(pid) = read(path)? {
            if is_running(pid) && pid != std::process::id() {
                anyhow::bail!("already running (pid {pid}, {})", path.display());
            }
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, format!("{}\n", std::process::id()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Pid recorded in `path`, if the file exists and holds one.
pub fn read(path: &Path) -> io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn is_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
