//! Interpreter selection and the fixed script preamble.

use crate::dataset::{DatasetFormat, DatasetHandle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Language the generated snippets are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Python with pandas; the dataset is bound to `df`.
    Pandas,
    /// POSIX shell; the dataset path is bound to `DATASET`.
    Shell,
}

/// How to start the interpreter for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub dialect: Dialect,
    /// Wall-clock limit for a single execution. `None` waits forever.
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
}

impl InterpreterConfig {
    /// `python3 -` reading the script from stdin.
    pub fn pandas() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-".to_string()],
            dialect: Dialect::Pandas,
            timeout: None,
        }
    }

    /// `sh -s` reading the script from stdin.
    pub fn shell() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-s".to_string()],
            dialect: Dialect::Shell,
            timeout: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Lines placed before every snippet.
    ///
    /// Snippets are appended after this text and cannot replace it.
    pub fn preamble(&self, dataset: &DatasetHandle) -> String {
        match self.dialect {
            Dialect::Pandas => pandas_preamble(dataset),
            Dialect::Shell => shell_preamble(dataset),
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self::pandas()
    }
}

fn python_str(value: &str) -> String {
    // A JSON string literal is a valid Python string literal.
    serde_json::Value::String(value.to_string()).to_string()
}

fn pandas_preamble(dataset: &DatasetHandle) -> String {
    let path = python_str(&dataset.path().to_string_lossy());
    let load = match dataset.format() {
        DatasetFormat::Csv => {
            let dates: Vec<String> = dataset.timestamp_columns().map(python_str).collect();
            if dates.is_empty() {
                format!("df = pd.read_csv({path})")
            } else {
                format!("df = pd.read_csv({path}, parse_dates=[{}])", dates.join(", "))
            }
        }
        DatasetFormat::Excel { sheet } => {
            format!("df = pd.read_excel({path}, sheet_name={})", python_str(sheet))
        }
    };

    format!(
        "import pandas as pd\n\
         import numpy as np\n\
         pd.set_option('display.max_rows', 100)\n\
         pd.set_option('display.max_columns', 30)\n\
         pd.set_option('display.max_colwidth', 400)\n\
         {load}\n"
    )
}

fn shell_preamble(dataset: &DatasetHandle) -> String {
    let path = dataset.path().to_string_lossy().replace('\'', r"'\''");
    format!("set -e\nDATASET='{path}'\nexport DATASET\n")
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) if s.is_finite() && s > 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(_) => Err(serde::de::Error::custom(
                "timeout must be a positive number of seconds",
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnKind, DatasetConfig};
    use std::io::Write;

    fn dataset(format: DatasetFormat) -> (tempfile::NamedTempFile, DatasetHandle) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,when\n1,2010-01-01\n").unwrap();
        let config = DatasetConfig::new(file.path(), format).with_columns(vec![
            Column::new("id", ColumnKind::Identifier),
            Column::new("when", ColumnKind::Timestamp),
        ]);
        let handle = DatasetHandle::load(config).unwrap();
        (file, handle)
    }

    #[test]
    fn test_pandas_preamble_reads_csv() {
        let (_file, handle) = dataset(DatasetFormat::Csv);
        let preamble = InterpreterConfig::pandas().preamble(&handle);

        assert!(preamble.starts_with("import pandas as pd\nimport numpy as np\n"));
        assert!(preamble.contains("pd.set_option('display.max_rows', 100)"));
        assert!(preamble.contains("pd.set_option('display.max_columns', 30)"));
        assert!(preamble.contains("pd.set_option('display.max_colwidth', 400)"));
        let expected = format!(
            "df = pd.read_csv(\"{}\", parse_dates=[\"when\"])",
            handle.path().display()
        );
        assert!(preamble.contains(&expected), "{preamble}");
    }

    #[test]
    fn test_pandas_preamble_reads_excel_sheet() {
        let (_file, handle) = dataset(DatasetFormat::Excel {
            sheet: "Year 2009-2010".to_string(),
        });
        let preamble = InterpreterConfig::pandas().preamble(&handle);
        assert!(preamble.contains("pd.read_excel("));
        assert!(preamble.contains("sheet_name=\"Year 2009-2010\""));
    }

    #[test]
    fn test_shell_preamble_binds_dataset() {
        let (_file, handle) = dataset(DatasetFormat::Csv);
        let preamble = InterpreterConfig::shell().preamble(&handle);
        assert_eq!(
            preamble,
            format!("set -e\nDATASET='{}'\nexport DATASET\n", handle.path().display())
        );
    }

    #[test]
    fn test_timeout_from_toml_seconds() {
        let config: InterpreterConfig = toml::from_str(
            "program = \"sh\"\nargs = [\"-s\"]\ndialect = \"shell\"\ntimeout = 1.5\n",
        )
        .unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.dialect, Dialect::Shell);
    }
}
