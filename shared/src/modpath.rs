//! Module-path manifest format
//!
//! Long path lists blow past OS command-line limits, so the launcher hands
//! the child a single manifest file instead of the list itself. The file
//! carries one attribute line whose value enumerates every path element as a
//! `file:` URL. This module owns the format; the launcher decides what goes
//! in and the bootstrap turns it back into a path list.

use std::path::PathBuf;

use url::Url;

use crate::errors::{SharedError, SharedResult};

/// The manifest's single attribute name.
pub const MANIFEST_ATTRIBUTE: &str = "Module-Path";

/// Render a manifest from already-validated `file:` URLs.
pub fn render_manifest(urls: &[Url]) -> String {
    let joined = urls
        .iter()
        .map(Url::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    format!("{MANIFEST_ATTRIBUTE}: {joined}\n")
}

/// Parse manifest contents back into filesystem paths.
pub fn parse_manifest(contents: &str) -> SharedResult<Vec<PathBuf>> {
    let prefix = format!("{MANIFEST_ATTRIBUTE}:");
    for line in contents.lines() {
        let Some(value) = line.strip_prefix(&prefix) else {
            continue;
        };
        let mut elements = Vec::new();
        for token in value.split_whitespace() {
            let url = Url::parse(token).map_err(|err| SharedError::MalformedManifest {
                detail: format!("{token}: {err}"),
            })?;
            let path = url
                .to_file_path()
                .map_err(|_| SharedError::MalformedManifest {
                    detail: format!("not a file URL: {token}"),
                })?;
            elements.push(path);
        }
        return Ok(elements);
    }
    Err(SharedError::MalformedManifest {
        detail: format!("missing {MANIFEST_ATTRIBUTE} attribute"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn renders_and_parses_round_trip() {
        let urls = vec![
            Url::from_file_path("/tmp/lib-a").unwrap(),
            Url::from_file_path("/tmp/lib b").unwrap(),
        ];
        let manifest = render_manifest(&urls);
        assert!(manifest.starts_with("Module-Path: file://"));

        let elements = parse_manifest(&manifest).unwrap();
        assert_eq!(
            elements,
            vec![PathBuf::from("/tmp/lib-a"), PathBuf::from("/tmp/lib b")]
        );
    }

    #[test]
    fn empty_value_yields_no_elements() {
        let elements = parse_manifest("Module-Path: \n").unwrap();
        assert!(elements.is_empty());
    }

    #[test]
    fn missing_attribute_is_malformed() {
        let err = parse_manifest("Nothing: here\n").unwrap_err();
        assert!(matches!(err, SharedError::MalformedManifest { .. }));
    }

    #[test]
    fn non_file_urls_are_rejected() {
        let err = parse_manifest("Module-Path: https://example.com/x\n").unwrap_err();
        assert!(matches!(err, SharedError::MalformedManifest { .. }));
    }
}
