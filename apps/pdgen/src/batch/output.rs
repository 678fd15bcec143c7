//! Output writers — per-product JSON documents and the combined summary CSV.
//!
//! Every file is written to a temp file in the target directory and renamed
//! into place, so a crash mid-write never leaves a truncated output behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::errors::AppError;
use crate::generation::features::ProductInput;
use crate::generation::GenerationResult;
use crate::seo::SeoReport;

const MAX_SLUG_CHARS: usize = 60;

/// Directory layout under the `--out` folder.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    descriptions: PathBuf,
    combined: PathBuf,
}

impl OutputLayout {
    /// Creates `descriptions/` and `combined/` under `root`.
    pub fn create(root: &Path) -> Result<Self, AppError> {
        let layout = Self {
            root: root.to_path_buf(),
            descriptions: root.join("descriptions"),
            combined: root.join("combined"),
        };
        for dir in [&layout.descriptions, &layout.combined] {
            std::fs::create_dir_all(dir).map_err(|e| {
                AppError::Config(format!("cannot create output dir {}: {e}", dir.display()))
            })?;
        }
        Ok(layout)
    }

    pub fn description_path(&self, stem: &str) -> PathBuf {
        self.descriptions.join(format!("{stem}.json"))
    }

    pub fn combined_csv(&self) -> PathBuf {
        self.combined.join("combined.csv")
    }

    /// `path` relative to the output root, with `/` separators.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// What lands in `descriptions/*.json`: the generated copy plus its SEO report.
#[derive(Debug, Serialize)]
pub struct ProductDocument<'a> {
    #[serde(flatten)]
    pub result: &'a GenerationResult,
    pub seo_report: &'a SeoReport,
}

/// `{index:03}_{slug}_{hash6}`, unique per product even when names repeat.
pub fn file_stem(product: &ProductInput) -> String {
    let slug = match slugify(&product.name) {
        s if s.is_empty() => format!("item-{}", product.index),
        s => s,
    };
    let digest = Sha256::digest(format!("{}{}", product.name, product.feature_text()).as_bytes());
    let hash = format!("{digest:x}");
    format!("{:03}_{}_{}", product.index, slug, &hash[..6])
}

/// Lowercase, filesystem-safe slug of at most 60 chars.
pub fn slugify(text: &str) -> String {
    let safe: String = text
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c.is_whitespace() {
                c
            } else {
                '-'
            }
        })
        .collect();
    safe.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect()
}

/// Pretty-printed JSON, written atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let mut tmp = new_temp_beside(path)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

fn new_temp_beside(path: &Path) -> Result<NamedTempFile, AppError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(NamedTempFile::new_in(dir)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAILED")]
    Failed,
}

/// One line of `combined/combined.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub index: usize,
    pub name: String,
    pub category: String,
    pub audience: String,
    pub keywords: String,
    pub features: String,
    pub description_file: String,
    pub title: String,
    pub meta_description: String,
    pub short_description: String,
    pub status: RowStatus,
    pub attempts: u32,
    pub error: String,
}

impl SummaryRow {
    pub fn succeeded(
        product: &ProductInput,
        description_file: String,
        result: &GenerationResult,
        attempts: u32,
    ) -> Self {
        Self {
            description_file,
            title: result.title.clone(),
            meta_description: result.meta_description.clone(),
            short_description: result.short_description.clone(),
            ..Self::base(product, RowStatus::Ok, attempts, String::new())
        }
    }

    /// Rebuilds an `OK` line from a description file written by an earlier run.
    /// The attempt count of that run is not stored, so it is recorded as 0.
    pub fn from_description_file(
        product: &ProductInput,
        layout: &OutputLayout,
        path: &Path,
    ) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        let result: GenerationResult = serde_json::from_str(&text)?;
        Ok(Self::succeeded(product, layout.relative(path), &result, 0))
    }

    pub fn failed(product: &ProductInput, attempts: u32, error: String) -> Self {
        Self {
            description_file: "FAILED".to_string(),
            ..Self::base(product, RowStatus::Failed, attempts, error)
        }
    }

    fn base(product: &ProductInput, status: RowStatus, attempts: u32, error: String) -> Self {
        Self {
            index: product.index,
            name: product.name.clone(),
            category: product.category.clone(),
            audience: product.audience.clone(),
            keywords: product.keywords.join(", "),
            features: product.feature_text(),
            description_file: String::new(),
            title: String::new(),
            meta_description: String::new(),
            short_description: String::new(),
            status,
            attempts,
            error,
        }
    }
}

/// The combined summary, keyed by row index and rebuilt on every `write`.
#[derive(Debug)]
pub struct CombinedSummary {
    path: PathBuf,
    rows: BTreeMap<usize, SummaryRow>,
}

impl CombinedSummary {
    /// Loads rows from a previous run, if the file exists. Unreadable lines are
    /// dropped with a warning; they get rewritten when their row is processed.
    pub fn load(path: PathBuf) -> Result<Self, AppError> {
        let mut rows = BTreeMap::new();
        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)?;
            for record in reader.deserialize::<SummaryRow>() {
                match record {
                    Ok(row) => {
                        rows.insert(row.index, row);
                    }
                    Err(e) => warn!("Ignoring unreadable line in {}: {e}", path.display()),
                }
            }
        }
        Ok(Self { path, rows })
    }

    pub fn contains(&self, index: usize) -> bool {
        self.rows.contains_key(&index)
    }

    pub fn upsert(&mut self, row: SummaryRow) {
        self.rows.insert(row.index, row);
    }

    pub fn rows(&self) -> impl Iterator<Item = &SummaryRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rewrites the whole CSV atomically.
    pub fn write(&self) -> Result<(), AppError> {
        let mut tmp = new_temp_beside(&self.path)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for row in self.rows.values() {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    }
}
