//! Object key conventions.
//!
//! | Purpose | Layout |
//! |---|---|
//! | temporary upload | `uploads/{owner}/{file}` |
//! | permanent receipt | `receipts/{owner}/{file}` |
//! | migrated batch receipt | `receipts/{yyyy}/{mm}/{dd}/{owner}/{file}` |
//! | batch result file | `batch-output/{job_id}/{file}` |
//!
//! The image identifier is always the stem of `{file}`.

use jiff::civil::Date;

/// Prefix of temporary uploads.
pub const UPLOADS_PREFIX: &str = "uploads/";

/// Prefix of permanent receipt images.
pub const RECEIPTS_PREFIX: &str = "receipts/";

/// Prefix of batch extraction result files.
pub const BATCH_OUTPUT_PREFIX: &str = "batch-output/";

/// Suffixes of batch result files; other objects under the prefix are
/// manifests or logs.
const RESULT_FILE_SUFFIXES: &[&str] = &[".jsonl", ".jsonl.out"];

/// A parsed `uploads/{owner}/{file}` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadKey {
    owner_id: String,
    file_name: String,
}

impl UploadKey {
    /// Parses a temporary key; returns `None` when it does not follow the
    /// convention or the file has no stem.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(UPLOADS_PREFIX)?;
        let (owner_id, file_name) = rest.split_once('/')?;

        if owner_id.is_empty() || file_name.contains('/') || file_stem(file_name).is_empty() {
            return None;
        }

        Some(Self {
            owner_id: owner_id.to_owned(),
            file_name: file_name.to_owned(),
        })
    }

    /// Owner segment.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// File segment.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Image identifier (file stem).
    pub fn image_id(&self) -> &str {
        file_stem(&self.file_name)
    }

    /// Renders the temporary key back.
    pub fn key(&self) -> String {
        format!("{UPLOADS_PREFIX}{}/{}", self.owner_id, self.file_name)
    }

    /// Permanent key used by the single-image path.
    pub fn permanent_key(&self) -> String {
        format!("{RECEIPTS_PREFIX}{}/{}", self.owner_id, self.file_name)
    }

    /// Dated permanent key used by batch migration.
    pub fn dated_key(&self, date: Date) -> String {
        format!(
            "{RECEIPTS_PREFIX}{:04}/{:02}/{:02}/{}/{}",
            date.year(),
            date.month(),
            date.day(),
            self.owner_id,
            self.file_name
        )
    }
}

/// A parsed `batch-output/{job_id}/{file}` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutputKey {
    job_id: String,
    file_name: String,
}

impl BatchOutputKey {
    /// Parses a batch result key. The file part may contain further
    /// segments.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(BATCH_OUTPUT_PREFIX)?;
        let (job_id, file_name) = rest.split_once('/')?;

        if job_id.is_empty() || file_name.is_empty() || file_name.ends_with('/') {
            return None;
        }

        Some(Self {
            job_id: job_id.to_owned(),
            file_name: file_name.to_owned(),
        })
    }

    /// Job identifier encoded in the path.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// File part of the key.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Renders the key back.
    pub fn key(&self) -> String {
        format!("{BATCH_OUTPUT_PREFIX}{}/{}", self.job_id, self.file_name)
    }

    /// Returns whether the file is a line-delimited result file.
    pub fn is_result_file(&self) -> bool {
        RESULT_FILE_SUFFIXES
            .iter()
            .any(|suffix| self.file_name.ends_with(suffix))
    }
}

/// A parsed permanent key, flat or dated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptKey {
    owner_id: String,
    file_name: String,
    date: Option<Date>,
}

impl ReceiptKey {
    /// Parses `receipts/{owner}/{file}` or
    /// `receipts/{yyyy}/{mm}/{dd}/{owner}/{file}`.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(RECEIPTS_PREFIX)?;
        let segments: Vec<&str> = rest.split('/').collect();

        let (date, owner_id, file_name) = match segments.as_slice() {
            [owner, file] => (None, *owner, *file),
            [y, m, d, owner, file] => {
                let date = Date::new(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?).ok()?;
                (Some(date), *owner, *file)
            }
            _ => return None,
        };

        if owner_id.is_empty() || file_stem(file_name).is_empty() {
            return None;
        }

        Some(Self {
            owner_id: owner_id.to_owned(),
            file_name: file_name.to_owned(),
            date,
        })
    }

    /// Owner segment.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Image identifier (file stem).
    pub fn image_id(&self) -> &str {
        file_stem(&self.file_name)
    }

    /// Date segment of a migrated batch receipt.
    pub fn date(&self) -> Option<Date> {
        self.date
    }
}

/// Returns the file name up to its last `.`.
fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    }
}
