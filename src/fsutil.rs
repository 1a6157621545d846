use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "poac.yml";
pub const LOCK_FILE: &str = "poac.lock";
pub const DEPS_DIR: &str = "deps";

pub fn default_cache_root() -> PathBuf {
    let mut root = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    root.push(".poac");
    root.push("cache");
    root
}

pub fn ensure_dir(p: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(p)
}

/// Join a single directory name under `base`, refusing anything that could escape it.
pub fn safe_join(base: &Path, rel: &str) -> Option<PathBuf> {
    if rel.is_empty() || rel.contains("..") || rel.contains('/') || rel.contains('\\') {
        return None;
    }
    let mut p = base.to_path_buf();
    p.push(rel);
    Some(p)
}

/// Hidden names are reserved for in-flight temp directories and lock files.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
