use ghostwire_core::ServiceMapping;
use std::{
    fmt::Write as _,
    fs,
    io::{self, Write as _},
    os::unix::fs::OpenOptionsExt,
    path::{Component, Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit path {path:?} contains a parent-directory component")]
    Traversal { path: PathBuf },

    #[error("write audit map {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read audit map {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Serializes the mapping set to the shared audit file, one record per
/// line after a two-line header, mode 0644. An existing file is truncated.
pub fn write_audit(path: &Path, mappings: &[ServiceMapping]) -> Result<(), AuditError> {
    reject_traversal(path)?;

    let mut contents = String::new();
    contents.push_str("# ghostwire dnat map\n");
    contents.push_str("# <service>:<port>/<protocol> <active-ip> -> <preview-ip>\n");
    for mapping in mappings {
        let _ = writeln!(&mut contents, "{mapping}");
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|source| AuditError::Write {
            path: path.to_owned(),
            source,
        })?;
    file.write_all(contents.as_bytes())
        .map_err(|source| AuditError::Write {
            path: path.to_owned(),
            source,
        })
}

/// Counts mapping records in the audit file. Blank lines and `#` comments
/// are ignored; a missing file counts as zero.
pub fn count_audit_lines(path: &Path) -> Result<usize, AuditError> {
    reject_traversal(path)?;

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(AuditError::Read {
                path: path.to_owned(),
                source,
            })
        }
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count())
}

fn reject_traversal(path: &Path) -> Result<(), AuditError> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(AuditError::Traversal {
            path: path.to_owned(),
        });
    }
    Ok(())
}
