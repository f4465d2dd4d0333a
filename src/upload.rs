//! Upload storage: raw video bytes in, a readable file path out.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::RngCore;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{AnalysisError, AnalysisResult};

const FALLBACK_NAME: &str = "video";
const MAX_BASENAME_LEN: usize = 128;

fn user_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"))
}

/// Reject identifiers that cannot safely appear in a file name.
pub fn validate_user_id(user: &str) -> AnalysisResult<()> {
    if user_id_pattern().is_match(user) {
        Ok(())
    } else {
        Err(AnalysisError::InvalidUser(
            "expected 1-64 characters from [A-Za-z0-9_-]".into(),
        ))
    }
}

/// Reduce a client-supplied file name to a safe basename.
pub fn sanitize_file_name(file_name: &str) -> String {
    let basename = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_BASENAME_LEN)
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

#[derive(Clone, Debug)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Write `bytes` to `{user}_{random hex}_{basename}` inside the upload dir.
    pub fn save(&self, user: &str, file_name: &str, bytes: &[u8]) -> AnalysisResult<PathBuf> {
        validate_user_id(user)?;
        if bytes.len() > self.max_bytes {
            return Err(AnalysisError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        let name = format!(
            "{}_{}_{}",
            user,
            hex::encode(nonce),
            sanitize_file_name(file_name)
        );
        let path = self.dir.join(name);

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create upload dir {}", self.dir.display()))
            .and_then(|_| {
                std::fs::write(&path, bytes)
                    .with_context(|| format!("write upload {}", path.display()))
            })
            .map_err(|e| AnalysisError::storage("upload", e))?;
        Ok(path)
    }

    /// Delete an upload nothing can reach any more. Failures are logged only.
    pub fn discard(&self, path: &Path) {
        if !path.starts_with(&self.dir) {
            log::warn!("refusing to delete {} outside the upload dir", path.display());
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("deleted upload {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("could not delete upload {}: {}", path.display(), err),
        }
    }
}
