//! The read-only dataset snippets run against.
//!
//! A [`DatasetHandle`] is loaded once per process, checked against its
//! declared column schema and then shared (behind an `Arc`) by every
//! execution. Nothing downstream can mutate it.

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Storage format of the dataset file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatasetFormat {
    #[default]
    Csv,
    Excel { sheet: String },
}

/// Broad type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Identifier,
    Text,
    Numeric,
    Timestamp,
}

impl ColumnKind {
    fn label(&self) -> &'static str {
        match self {
            ColumnKind::Identifier => "Nominal",
            ColumnKind::Text => "Text",
            ColumnKind::Numeric => "Numeric",
            ColumnKind::Timestamp => "Timestamp",
        }
    }
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub description: String,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            description: String::new(),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Where the dataset lives and what it looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: DatasetFormat,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_summary")]
    pub summary: String,
    #[serde(default = "online_retail_columns")]
    pub columns: Vec<Column>,
}

fn default_name() -> String {
    "Online Retail II".to_string()
}

fn default_summary() -> String {
    "All the transactions of a UK-based, registered, non-store online retailer \
    between 01/12/2009 and 09/12/2011. The company mainly sells unique \
    all-occasion gift-ware; many customers are wholesalers."
        .to_string()
}

impl DatasetConfig {
    /// Online Retail II layout at `path`.
    pub fn new(path: impl Into<PathBuf>, format: DatasetFormat) -> Self {
        Self {
            path: path.into(),
            format,
            name: default_name(),
            summary: default_summary(),
            columns: online_retail_columns(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>, summary: impl Into<String>) -> Self {
        self.name = name.into();
        self.summary = summary.into();
        self
    }
}

/// Column schema of the Online Retail II dataset.
pub fn online_retail_columns() -> Vec<Column> {
    vec![
        Column::new("Invoice", ColumnKind::Identifier).describe(
            "Invoice number. A 6-digit integral number uniquely assigned to each transaction. \
            If this code starts with the letter 'c', it indicates a cancellation.",
        ),
        Column::new("StockCode", ColumnKind::Identifier).describe(
            "Product (item) code. A 5-digit integral number uniquely assigned to each \
            distinct product.",
        ),
        Column::new("Description", ColumnKind::Text).nullable().describe(
            "Product (item) name. Some values are missing; such products can still be \
            identified by StockCode.",
        ),
        Column::new("Quantity", ColumnKind::Numeric).describe(
            "The quantities of each product (item) per transaction. May include negative values.",
        ),
        Column::new("InvoiceDate", ColumnKind::Timestamp)
            .describe("The day and time when a transaction was generated."),
        Column::new("Price", ColumnKind::Numeric).describe(
            "Unit price, product price per unit in sterling. May include negative values.",
        ),
        Column::new("Customer ID", ColumnKind::Identifier).nullable().describe(
            "Customer number. A 5-digit integral number uniquely assigned to each customer. \
            Missing values likely represent guest purchases.",
        ),
        Column::new("Country", ColumnKind::Text)
            .describe("The name of the country where a customer resides."),
    ]
}

/// Loaded, validated, read-only dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetHandle {
    path: PathBuf,
    format: DatasetFormat,
    name: String,
    summary: String,
    columns: Vec<Column>,
    row_count: Option<u64>,
}

impl DatasetHandle {
    /// Check the dataset and build its handle.
    ///
    /// CSV files are read once: the header must contain every declared
    /// column and the rows are counted. Excel workbooks are only checked for
    /// existence; the interpreter reads them.
    pub fn load(config: DatasetConfig) -> Result<Self, SandboxError> {
        if !config.path.is_file() {
            return Err(SandboxError::DatasetNotFound(config.path));
        }
        let path = config.path.canonicalize()?;

        let row_count = match &config.format {
            DatasetFormat::Csv => Some(Self::check_csv(&path, &config.columns)?),
            DatasetFormat::Excel { .. } => None,
        };

        tracing::info!(
            "loaded dataset {} from {} ({} columns, {} rows)",
            config.name,
            path.display(),
            config.columns.len(),
            row_count.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        Ok(Self {
            path,
            format: config.format,
            name: config.name,
            summary: config.summary,
            columns: config.columns,
            row_count,
        })
    }

    fn check_csv(path: &Path, columns: &[Column]) -> Result<u64, SandboxError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let missing: Vec<String> = columns
            .iter()
            .filter(|column| !headers.iter().any(|h| h.trim() == column.name))
            .map(|column| column.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(SandboxError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            });
        }

        let mut rows = 0u64;
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            rows += 1;
        }
        Ok(rows)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &DatasetFormat {
        &self.format
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    /// Names of timestamp columns, parsed as dates by the pandas preamble.
    pub fn timestamp_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Timestamp)
            .map(|c| c.name.as_str())
    }

    /// Human readable description used in planning prompts.
    pub fn describe(&self) -> String {
        let mut out = format!("{}: {}\n\nColumns:\n", self.name, self.summary);
        for column in &self.columns {
            let _ = write!(out, "- {}: {}.", column.name, column.kind.label());
            if column.nullable {
                out.push_str(" Nullable.");
            }
            if !column.description.is_empty() {
                let _ = write!(out, " {}", column.description);
            }
            out.push('\n');
        }
        if let Some(rows) = self.row_count {
            let _ = write!(out, "\nThe dataset has {rows} rows.\n");
        }
        out
    }
}
