use std::io;
use std::path::{Path, PathBuf};

use crate::spec::OutputTarget;

pub const CONFIG_FILE: &str = "config.yml";

/// Per-user data directory (`~/.procsup`), created if missing.
pub fn user_data_dir() -> io::Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
    ensure_dir(home.join(".procsup"))
}

/// System-wide data directory used in service mode, created if missing.
pub fn system_data_dir() -> io::Result<PathBuf> {
    ensure_dir(PathBuf::from("/etc/procsup"))
}

fn ensure_dir(dir: PathBuf) -> io::Result<PathBuf> {
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/*
    @@@
    @resolve_output();
    . No output configured maps to the discard sink.
    . Relative paths land in the data directory, absolute paths are kept as they are.
*/
pub fn resolve_output(data_dir: &Path, output: Option<&str>) -> OutputTarget {
    match output {
        None => OutputTarget::Discard,
        Some(path) if path.trim().is_empty() => OutputTarget::Discard,
        Some(path) => OutputTarget::File(data_dir.join(path)),
    }
}
