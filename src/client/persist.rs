//! Response classifier and persister.
//!
//! The server body is a plain run of PEM blocks. Certificates and private
//! keys are split into two buckets and written to their own files; anything
//! else is counted and dropped.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pem::{EncodeConfig, LineEnding, Pem};
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;
use tracing::{debug, warn};

/// PEM label of certificate blocks.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// PEM labels accepted as private keys.
pub const KEY_LABELS: [&str; 3] = ["PRIVATE KEY", "RSA PRIVATE KEY", "EC PRIVATE KEY"];

/// Failure to turn a response body into files on disk.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The body contains no PEM block at all.
    #[error("no PEM data found in response")]
    NoPemData,

    /// A PEM block is malformed.
    #[error("malformed PEM data: {0}")]
    Parse(#[from] pem::PemError),

    /// An output file could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

/// PEM blocks of a response, sorted by kind.
#[derive(Debug, Default)]
pub struct PemBundle {
    /// Certificate blocks, in response order
    pub certificates: Vec<Pem>,
    /// Private key blocks, in response order
    pub keys: Vec<Pem>,
    /// Number of blocks with any other label
    pub ignored: usize,
}

impl PemBundle {
    /// Split `body` into certificate and key blocks.
    pub fn classify(body: &[u8]) -> Result<Self, PersistenceError> {
        let blocks = pem::parse_many(body)?;
        if blocks.is_empty() {
            return Err(PersistenceError::NoPemData);
        }

        let mut bundle = Self::default();
        for block in blocks {
            match block.tag() {
                CERTIFICATE_LABEL => bundle.certificates.push(block),
                tag if KEY_LABELS.contains(&tag) => bundle.keys.push(block),
                tag => {
                    debug!(label = tag, "Skipping PEM block");
                    bundle.ignored += 1;
                }
            }
        }

        if bundle.ignored > 0 {
            warn!(count = bundle.ignored, "Ignored PEM blocks of unknown type");
        }
        Ok(bundle)
    }

    /// Write certificates to `cert_path` and keys to `key_path`, owner
    /// read/write only.
    ///
    /// Both files are staged next to their destination first and renamed
    /// into place only once both have been written. If the key cannot be
    /// put in place, the previous certificate is restored (or the new one
    /// removed when there was none), so on error neither file has changed.
    pub fn persist(&self, cert_path: &Path, key_path: &Path) -> Result<(), PersistenceError> {
        if self.certificates.is_empty() {
            warn!(path = %cert_path.display(), "Response contained no certificate");
        }
        if self.keys.is_empty() {
            warn!(path = %key_path.display(), "Response contained no private key");
        }

        let cert_file = stage(cert_path, &self.certificates)?;
        let key_file = stage(key_path, &self.keys)?;

        let backup = set_aside(cert_path)?;
        if let Err(e) = commit(cert_file, cert_path) {
            // Nothing new landed; only a set-aside certificate needs restoring.
            if backup.is_some() {
                roll_back(cert_path, backup);
            }
            return Err(e);
        }
        if let Err(e) = commit(key_file, key_path) {
            roll_back(cert_path, backup);
            return Err(e);
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn stage(path: &Path, blocks: &[Pem]) -> Result<NamedTempFile, PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(".certsync-")
        .tempfile_in(parent_dir(path))
        .map_err(write_err)?;
    restrict_permissions(file.as_file()).map_err(write_err)?;

    let encoded = pem::encode_many_config(blocks, EncodeConfig::new().set_line_ending(LineEnding::LF));
    file.write_all(encoded.as_bytes()).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;
    Ok(file)
}

fn commit(file: NamedTempFile, path: &Path) -> Result<(), PersistenceError> {
    file.persist(path).map_err(|e| PersistenceError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    debug!(path = %path.display(), "Written");
    Ok(())
}

/// Move an existing file at `path` to a sibling temp path. The backup is
/// deleted when the returned handle is dropped.
fn set_aside(path: &Path) -> Result<Option<TempPath>, PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_file() {
        return Ok(None);
    }

    let backup = tempfile::Builder::new()
        .prefix(".certsync-old-")
        .tempfile_in(parent_dir(path))
        .map_err(write_err)?
        .into_temp_path();
    fs::rename(path, &backup).map_err(write_err)?;
    Ok(Some(backup))
}

/// Put `path` back the way [`set_aside`] found it.
fn roll_back(path: &Path, backup: Option<TempPath>) {
    let restored = match &backup {
        Some(old) => fs::rename(old, path),
        None => match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };
    match restored {
        Ok(()) => debug!(path = %path.display(), "Rolled back"),
        Err(e) => warn!(path = %path.display(), error = %e, "Rollback failed"),
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}
