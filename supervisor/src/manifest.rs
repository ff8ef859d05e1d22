//! Module-path manifest generation
//!
//! The launcher never puts the raw path list on the child's command line;
//! it writes a manifest file into the working directory before spawn and
//! passes that single path instead. Elements that do not exist are dropped
//! with a warning rather than failing the launch.

use std::path::{Path, PathBuf};

use url::Url;
use uuid::Uuid;

use shared::modpath;
use shared::{process_warn, ProcessTag};

use crate::error::SupervisorResult;

/// Write the manifest for `module_path` (a platform path-list string) into
/// `working_dir` and return the file's path.
pub async fn write_module_path_manifest(
    module_path: &str,
    working_dir: &Path,
) -> SupervisorResult<PathBuf> {
    let mut urls = Vec::new();
    for element in std::env::split_paths(module_path) {
        if element.as_os_str().is_empty() {
            continue;
        }
        if !element.exists() {
            process_warn!(
                ProcessTag::Supervisor,
                "Module path element [{}] doesn't exist, ignoring",
                element.display()
            );
            continue;
        }
        let absolute = tokio::fs::canonicalize(&element).await?;
        match Url::from_file_path(&absolute) {
            Ok(url) => urls.push(url),
            Err(()) => {
                process_warn!(
                    ProcessTag::Supervisor,
                    "Module path element [{}] is not expressible as a file URL, ignoring",
                    absolute.display()
                );
            }
        }
    }

    let file_name = format!("module-path-{}.mf", Uuid::new_v4());
    let path = working_dir.join(file_name);
    tokio::fs::write(&path, modpath::render_manifest(&urls)).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_elements_are_dropped() {
        let workdir = tempfile::tempdir().unwrap();
        let existing = workdir.path().join("present");
        tokio::fs::create_dir(&existing).await.unwrap();
        let missing = workdir.path().join("absent");

        let module_path = std::env::join_paths([existing.clone(), missing])
            .unwrap()
            .into_string()
            .unwrap();

        let manifest = write_module_path_manifest(&module_path, workdir.path())
            .await
            .unwrap();
        assert_eq!(manifest.parent(), Some(workdir.path()));

        let contents = tokio::fs::read_to_string(&manifest).await.unwrap();
        let elements = modpath::parse_manifest(&contents).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(
            elements[0],
            tokio::fs::canonicalize(&existing).await.unwrap()
        );
    }

    #[tokio::test]
    async fn empty_module_path_still_writes_a_manifest() {
        let workdir = tempfile::tempdir().unwrap();
        let manifest = write_module_path_manifest("", workdir.path()).await.unwrap();
        let contents = tokio::fs::read_to_string(&manifest).await.unwrap();
        assert!(modpath::parse_manifest(&contents).unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_launch_gets_its_own_manifest() {
        let workdir = tempfile::tempdir().unwrap();
        let first = write_module_path_manifest("", workdir.path()).await.unwrap();
        let second = write_module_path_manifest("", workdir.path()).await.unwrap();
        assert_ne!(first, second);
    }
}
