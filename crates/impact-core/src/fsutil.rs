use std::fs;
use std::io::{self, Write};
use std::path::Path;

const STAGING_PREFIX: &str = ".impact-staged-";

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Stages `bytes` in a temp file beside `path` and persists it over `path`,
/// so a reader never sees a half-written file.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp() {
        let dir = std::env::temp_dir().join(format!(
            "impact_fsutil_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let path = dir.join("nested").join("out.txt");
        atomic_write_bytes(&path, b"one").expect("first write");
        atomic_write_bytes(&path, b"two").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        let entries = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(entries, 1);
        let _ = fs::remove_dir_all(dir);
    }
}
