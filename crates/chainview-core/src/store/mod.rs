//! Append-only bulk header files with a JSON metadata index.
//!
//! Headers are persisted as flat binary files of
//! `headers_per_file x 80` bytes (the last file may be short), named
//! `{network}Net_{seq}.headers`, beside a per-network metadata document
//! `{network}NetBlockHeaders.json`. The metadata is a pure summary used
//! to discover files and skip re-fetching; it is not authoritative -
//! cross-header linkage is validated by the chain manager on insertion.
//!
//! Writes go to a temp file first and are renamed into place, so a
//! crash never leaves a half-written file under the final name.
//! Everything is written with mode 0600.

use crate::{
    codec::{BlockHash, HEADER_SIZE},
    errors::ChainError,
    work::ChainWork,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Production file size; deployments and tests may configure smaller.
pub const DEFAULT_HEADERS_PER_FILE: u32 = 100_000;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store metadata error: {0}")]
    Json(#[from] serde_json::Error),

    /// A header file whose size is not a multiple of 80 bytes. Load is
    /// aborted; operator intervention required.
    #[error("invalid file size: {0} bytes")]
    InvalidFileSize(u64),

    /// Persisted data failed header validation on replay.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Summary of one persisted header file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub chain: String,
    pub file_name: String,
    pub first_height: u32,
    pub count: u32,
    pub last_hash: BlockHash,
    pub last_chain_work: ChainWork,
    pub file_hash: String,
}

/// The per-network metadata document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    pub root_folder: String,
    pub json_filename: String,
    pub headers_per_file: u32,
    pub files: Vec<FileEntry>,
}

/// One header file read back from disk.
#[derive(Debug)]
pub struct LoadedFile {
    pub first_height: u32,
    /// Concatenated 80-byte headers; length is a multiple of 80.
    pub raw: Vec<u8>,
}

/// Filesystem-backed bulk header storage for one network.
pub struct HeaderStore {
    root: PathBuf,
    network: String,
    headers_per_file: u32,
}

impl HeaderStore {
    /// Opens (and creates if needed) the storage directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directory cannot be created.
    pub fn new(
        root: impl Into<PathBuf>,
        network: impl Into<String>,
        headers_per_file: u32,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        // A zero file size would make every span computation divide by
        // zero; one header per file is the degenerate minimum.
        let headers_per_file = headers_per_file.max(1);
        Ok(Self { root, network: network.into(), headers_per_file })
    }

    #[must_use]
    pub fn headers_per_file(&self) -> u32 {
        self.headers_per_file
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the metadata document for this network.
    #[must_use]
    pub fn metadata_file_name(&self) -> String {
        format!("{}NetBlockHeaders.json", self.network)
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join(self.metadata_file_name())
    }

    /// Name of the header file with the given sequence number.
    #[must_use]
    pub fn header_file_name(&self, seq: u32) -> String {
        format!("{}Net_{}.headers", self.network, seq)
    }

    /// Reads the metadata document, if present.
    ///
    /// # Errors
    ///
    /// I/O failures other than absence, and malformed JSON.
    pub fn read_metadata(&self) -> Result<Option<StoreMetadata>, StoreError> {
        let path = self.metadata_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Writes the metadata document atomically with mode 0600.
    ///
    /// # Errors
    ///
    /// I/O and serialization failures.
    pub fn write_metadata(&self, metadata: &StoreMetadata) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(metadata)?;
        self.write_atomic(&self.metadata_path(), &data)?;
        debug!(network = %self.network, files = metadata.files.len(), "store metadata written");
        Ok(())
    }

    /// Inserts or replaces one file entry in the metadata document.
    ///
    /// # Errors
    ///
    /// I/O and serialization failures.
    pub fn upsert_metadata(&self, entry: FileEntry) -> Result<(), StoreError> {
        let mut metadata = self.read_metadata()?.unwrap_or_else(|| StoreMetadata {
            root_folder: "headers".to_string(),
            json_filename: self.metadata_file_name(),
            headers_per_file: self.headers_per_file,
            files: Vec::new(),
        });

        match metadata.files.iter_mut().find(|f| f.file_name == entry.file_name) {
            Some(existing) => *existing = entry,
            None => metadata.files.push(entry),
        }
        metadata.files.sort_by_key(|f| f.first_height);
        self.write_metadata(&metadata)
    }

    /// Reads every header file named by the metadata, in height order.
    ///
    /// A file listed in the metadata but missing on disk ends the load
    /// early (the metadata is only a summary); a file whose size is not
    /// a multiple of 80 bytes aborts it.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidFileSize`] on corrupt files, plus I/O
    /// failures.
    pub fn load(&self) -> Result<Vec<LoadedFile>, StoreError> {
        let Some(metadata) = self.read_metadata()? else {
            return Ok(Vec::new());
        };

        let mut entries = metadata.files;
        entries.sort_by_key(|f| f.first_height);

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = self.root.join(&entry.file_name);
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(file = %entry.file_name, "header file named by metadata is missing");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            if raw.len() % HEADER_SIZE != 0 {
                return Err(StoreError::InvalidFileSize(raw.len() as u64));
            }
            if raw.len() / HEADER_SIZE != entry.count as usize {
                warn!(
                    file = %entry.file_name,
                    expected = entry.count,
                    found = raw.len() / HEADER_SIZE,
                    "header file count differs from metadata"
                );
            }
            out.push(LoadedFile { first_height: entry.first_height, raw });
        }
        Ok(out)
    }

    /// Writes one file-sized span of headers and returns its summary
    /// entry. An existing file with the same sequence number is
    /// replaced atomically.
    ///
    /// # Errors
    ///
    /// [`ChainError::InvalidHeaderDataLength`] when `raw` is not a whole
    /// number of headers, plus I/O failures.
    pub fn append_checkpoint(
        &self,
        first_height: u32,
        raw: &[u8],
        last_hash: BlockHash,
        last_chain_work: &ChainWork,
    ) -> Result<FileEntry, StoreError> {
        if raw.is_empty() || raw.len() % HEADER_SIZE != 0 {
            return Err(StoreError::Chain(ChainError::InvalidHeaderDataLength(raw.len())));
        }

        let seq = first_height / self.headers_per_file;
        let file_name = self.header_file_name(seq);
        self.write_atomic(&self.root.join(&file_name), raw)?;

        let count = u32::try_from(raw.len() / HEADER_SIZE)
            .map_err(|_| StoreError::Chain(ChainError::IntegerOverflow))?;
        debug!(file = %file_name, first_height, count, "header file written");

        Ok(FileEntry {
            chain: self.network.clone(),
            file_name,
            first_height,
            count,
            last_hash,
            last_chain_work: last_chain_work.clone(),
            file_hash: hex::encode(Sha256::digest(raw)),
        })
    }

    /// Temp-file-then-rename write discipline, mode 0600.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
