use std::path::{Path, PathBuf};

pub fn out_sizes(work_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    PathBuf::from(work_dir.as_ref()).join(format!("{name}.sizes.json"))
}

pub fn out_spice(work_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    PathBuf::from(work_dir.as_ref()).join(format!("{name}.spice"))
}

/// One cache file per key prefix and technology.
pub fn cache_file(cache_dir: impl AsRef<Path>, prefix: &str, tech: &str) -> PathBuf {
    PathBuf::from(cache_dir.as_ref()).join(format!("{prefix}_{tech}.json"))
}
