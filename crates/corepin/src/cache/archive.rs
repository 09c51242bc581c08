//! Artifact unpacking

use flate2::read::GzDecoder;
use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tar::Archive;

use super::InstallError;

/// Whether `url` points at a gzip tarball
pub fn is_tarball(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.ends_with(".tgz") || path.ends_with(".tar.gz")
}

/// Last path segment of a URL
pub fn url_basename(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// Place a downloaded artifact into `dest`
///
/// Tarballs are unpacked with their leading directory stripped; anything else
/// is written as a single executable file named after the URL.
pub fn unpack(content: &[u8], dest: &Path, url: &str) -> Result<(), InstallError> {
    if is_tarball(url) {
        extract_tarball(content, dest)
    } else {
        let target = dest.join(url_basename(url));
        fs::write(&target, content)?;
        make_executable(&target)?;
        Ok(())
    }
}

/// Extract a `.tgz` into `dest`, dropping the first path component
pub fn extract_tarball(content: &[u8], dest: &Path) -> Result<(), InstallError> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(content)));

    let entries = archive
        .entries()
        .map_err(|e| InstallError::ExtractionError(format!("Failed to read tar entries: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| InstallError::ExtractionError(format!("Failed to read entry: {}", e)))?;

        let entry_path = entry
            .path()
            .map_err(|e| InstallError::ExtractionError(format!("Invalid entry path: {}", e)))?
            .into_owned();

        let Some(relative) = strip_first(&entry_path)? else {
            continue;
        };
        let dest_path = dest.join(relative);

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if kind.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest_path).map_err(|e| {
                InstallError::ExtractionError(format!(
                    "Failed to extract {}: {}",
                    dest_path.display(),
                    e
                ))
            })?;
        }
        // Links and special files are never needed to run a package manager
    }

    Ok(())
}

/// Drop the archive root; `None` for the root itself
fn strip_first(path: &Path) -> Result<Option<PathBuf>, InstallError> {
    let mut components = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir));
    components.next();

    let mut rest = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => rest.push(part),
            _ => {
                return Err(InstallError::ExtractionError(format!(
                    "Entry escapes the install directory: {}",
                    path.display()
                )))
            }
        }
    }

    Ok(if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    })
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_strips_root() {
        let temp = TempDir::new().unwrap();
        let bytes = tarball(&[
            ("package/package.json", "{}"),
            ("package/bin/yarn.js", "console.log(1)"),
        ]);

        extract_tarball(&bytes, temp.path()).unwrap();
        assert!(temp.path().join("package.json").is_file());
        assert!(temp.path().join("bin/yarn.js").is_file());
        assert!(!temp.path().join("package").exists());
    }

    #[test]
    fn test_strip_first_rejects_escape() {
        assert!(strip_first(Path::new("package/../../etc/passwd")).is_err());
        assert_eq!(strip_first(Path::new("package/")).unwrap(), None);
        assert_eq!(
            strip_first(Path::new("./package/a/b")).unwrap(),
            Some(PathBuf::from("a/b"))
        );
    }

    #[test]
    fn test_single_file_artifact() {
        let temp = TempDir::new().unwrap();
        unpack(
            b"#!/usr/bin/env node",
            temp.path(),
            "https://repo.yarnpkg.com/4.0.0/packages/yarnpkg-cli/bin/yarn.js",
        )
        .unwrap();
        assert!(temp.path().join("yarn.js").is_file());
    }

    #[test]
    fn test_url_helpers() {
        assert!(is_tarball("https://registry.npmjs.org/pnpm/-/pnpm-9.1.0.tgz"));
        assert!(is_tarball("https://example.com/pm.tar.gz?token=1"));
        assert!(!is_tarball("https://example.com/yarn.js"));
        assert_eq!(url_basename("https://example.com/a/yarn.js?x=1"), "yarn.js");
    }
}
