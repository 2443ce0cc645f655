//! One-shot directory listing used by the startup sweep and the poller.

use std::path::{Path, PathBuf};

use super::source::CandidateFilter;

/// List candidate files directly inside `dir`, sorted by name
pub async fn scan_directory(
    dir: &Path,
    filter: &CandidateFilter,
) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        if !filter.accepts(&path) {
            continue;
        }

        // Entries can vanish between listing and stat
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => continue,
        };

        if metadata.is_file() {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}

/// Number of candidate files in `dir`; zero if it cannot be read
pub async fn count_candidates(dir: &Path, filter: &CandidateFilter) -> usize {
    scan_directory(dir, filter)
        .await
        .map(|files| files.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scan_skips_hidden_sentinel_and_directories() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        tokio::fs::write(dir.join("b.pdf"), b"b").await.unwrap();
        tokio::fs::write(dir.join("a.txt"), b"a").await.unwrap();
        tokio::fs::write(dir.join(".hidden"), b"h").await.unwrap();
        tokio::fs::write(dir.join("queue.md"), b"q").await.unwrap();
        tokio::fs::create_dir(dir.join("subdir")).await.unwrap();

        let found = scan_directory(dir, &CandidateFilter::default()).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["a.txt", "b.pdf"]);
        assert_eq!(count_candidates(dir, &CandidateFilter::default()).await, 2);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");

        assert!(scan_directory(&missing, &CandidateFilter::default()).await.is_err());
        assert_eq!(count_candidates(&missing, &CandidateFilter::default()).await, 0);
    }
}
