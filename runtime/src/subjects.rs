//! Subject list input.
//!
//! A list file holds one subject per line, optionally followed by a
//! sealine code (`DXB500681500 MSCU` or `DXB500681500,MSCU`). Blank lines
//! and `#` comments are skipped; order is kept.

use crate::settings::DEFAULT_SEALINE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One tracking subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub number: String,
    pub sealine: String,
}

impl Subject {
    pub fn new(number: impl Into<String>, sealine: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            sealine: sealine.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SubjectListError {
    #[error("subject list {path} not found")]
    Missing { path: PathBuf },

    #[error("failed to read subject list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("subject list {path} has no subjects")]
    Empty { path: PathBuf },
}

/// Parse list text; `default_sealine` applies to lines without one.
pub fn parse_subject_list(text: &str, default_sealine: &str) -> Vec<Subject> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty());
            let number = parts.next()?;
            let sealine = parts.next().unwrap_or(default_sealine);
            Some(Subject::new(number, sealine.to_ascii_uppercase()))
        })
        .collect()
}

/// Load a list file. A missing or empty file is an error, never a default.
pub fn load_subject_file(path: &Path, default_sealine: &str) -> Result<Vec<Subject>, SubjectListError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SubjectListError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            SubjectListError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let subjects = parse_subject_list(&text, default_sealine);
    if subjects.is_empty() {
        return Err(SubjectListError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(subjects)
}

/// Subjects from CLI arguments, which share one sealine.
pub fn from_args(numbers: &[String], sealine: Option<&str>) -> Vec<Subject> {
    let sealine = sealine.unwrap_or(DEFAULT_SEALINE).to_ascii_uppercase();
    numbers
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(|n| Subject::new(n, sealine.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let text = "# bills of lading\nDXB500681500\n\n  MEDUJ1234567 mscu \n# DISABLED\nCOSU6001,COSU\n";
        let subjects = parse_subject_list(text, "AUTO");
        assert_eq!(
            subjects,
            vec![
                Subject::new("DXB500681500", "AUTO"),
                Subject::new("MEDUJ1234567", "MSCU"),
                Subject::new("COSU6001", "COSU"),
            ]
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_subject_file(&dir.path().join("bol_list.txt"), "AUTO").unwrap_err();
        assert!(matches!(err, SubjectListError::Missing { .. }));
    }

    #[test]
    fn test_comment_only_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bol_list.txt");
        std::fs::write(&path, "# nothing yet\n\n").unwrap();
        assert!(matches!(
            load_subject_file(&path, "AUTO"),
            Err(SubjectListError::Empty { .. })
        ));
    }

    #[test]
    fn test_from_args() {
        let subjects = from_args(&["A1".into(), " ".into()], Some("msc"));
        assert_eq!(subjects, vec![Subject::new("A1", "MSC")]);
    }
}
