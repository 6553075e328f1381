use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Value};
use tracing::info;

use crate::analysis::Analysis;
use crate::api::{
    client::{ObjectStorage, Record, Warehouse},
    error::AnalysisError,
    log::{LogLevel, LogRecord},
};

const CONTENT_TYPE: &str = "application/json";

impl Analysis {
    /// Uploads this experiment's ERROR and CRITICAL rows of the log table as
    /// one JSON document named after `table`. Returns whether anything was
    /// written.
    pub fn export_errors(
        &self,
        warehouse: &mut dyn Warehouse,
        storage: &mut dyn ObjectStorage,
        table: &str,
    ) -> Result<bool, AnalysisError> {
        let log_config = self
            .log_config
            .as_ref()
            .ok_or(AnalysisError::MissingLogConfiguration)?;

        let rows = warehouse
            .table_to_records(&log_config.log_table())
            .map_err(AnalysisError::Warehouse)?;
        let slug = self.config.experiment.log_slug();
        let errors = error_records(rows, slug)?;
        if errors.is_empty() {
            info!(experiment = slug, table, "No errors to export");
            return Ok(false);
        }

        let data = render(&errors)?;
        let blob = self.export_config.blob_for(table);
        storage
            .upload_from_string(&self.export_config.bucket, &blob, &data, CONTENT_TYPE)
            .map_err(AnalysisError::Storage)?;
        info!(
            bucket = %self.export_config.bucket,
            blob = %blob,
            count = errors.len(),
            "Exported errors"
        );
        Ok(true)
    }
}

/// `experiment`'s rows at ERROR or above, in their original order.
///
/// Rows are selected on their raw `experiment` and `log_level` columns, so
/// malformed rows of other experiments or levels are never parsed.
pub fn error_records(rows: Vec<Record>, experiment: &str) -> Result<Vec<LogRecord>, AnalysisError> {
    let mut errors = Vec::new();
    for row in rows {
        if !is_error_row(&row, experiment) {
            continue;
        }
        let record = serde_json::from_value::<LogRecord>(Value::Object(row))
            .map_err(|e| AnalysisError::Serialization("log record", e))?;
        errors.push(record);
    }
    Ok(errors)
}

fn is_error_row(row: &Record, experiment: &str) -> bool {
    if row.get("experiment").and_then(Value::as_str) != Some(experiment) {
        return false;
    }
    row.get("log_level")
        .and_then(|level| LogLevel::deserialize(level).ok())
        .map_or(false, LogLevel::is_error)
}

/// A JSON array indented by four spaces.
pub fn render(records: &[LogRecord]) -> Result<String, AnalysisError> {
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    records
        .serialize(&mut serializer)
        .map_err(|e| AnalysisError::Serialization("exported errors", e))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(json: &str) -> Vec<Record> {
        match serde_json::from_str::<Value>(json).unwrap() {
            Value::Array(rows) => rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(row) => row,
                    _ => panic!("not a row"),
                })
                .collect(),
            _ => panic!("not an array"),
        }
    }

    #[test]
    fn warnings_and_other_experiments_are_filtered_out() {
        let rows = rows(
            r#"[
            {"timestamp": "2022-07-26 05:37:27", "experiment": "b", "log_level": "WARNING", "message": "w"},
            {"timestamp": "2022-07-26 05:03:24", "experiment": "b", "log_level": "ERROR", "message": "e"},
            {"timestamp": "2022-07-26 05:04:24", "experiment": "a", "log_level": "ERROR", "message": "a"},
            {"timestamp": "2022-07-26 04:39:49", "experiment": "b", "log_level": "INFO", "message": "i"},
            {"timestamp": "2022-07-26 04:42:49", "experiment": "b", "log_level": "CRITICAL", "message": "c"}
        ]"#,
        );
        let errors = error_records(rows, "b").unwrap();
        let levels: Vec<_> = errors.iter().map(|r| r.log_level).collect();
        assert_eq!(levels, vec![LogLevel::Error, LogLevel::Critical]);
    }

    #[test]
    fn unrelated_malformed_rows_are_ignored() {
        let rows = rows(
            r#"[
            {"timestamp": "2022-07-26 05:03:24", "experiment": "b", "log_level": "ERROR", "message": "e"},
            {"timestamp": null, "experiment": "a", "log_level": "ERROR", "message": null},
            {"timestamp": "2022-07-26 05:03:24", "experiment": "b", "log_level": "WARNING", "message": null},
            {"timestamp": "2022-07-26 05:03:24", "experiment": "b", "log_level": "FATAL", "message": "?"},
            {"timestamp": "2022-07-26 05:03:24", "experiment": null, "log_level": "ERROR"}
        ]"#,
        );
        let errors = error_records(rows, "b").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "e");
    }

    #[test]
    fn malformed_rows_of_the_experiment_are_reported() {
        let rows = rows(r#"[{"timestamp": "never", "experiment": "b", "log_level": "ERROR", "message": "e"}]"#);
        assert!(matches!(
            error_records(rows, "b"),
            Err(AnalysisError::Serialization("log record", _))
        ));
    }

    #[test]
    fn render_uses_four_spaces() {
        let rows = rows(
            r#"[{"timestamp": "2022-07-26 04:41:49", "experiment": "x", "metric": null,
                 "statistic": null, "log_level": "ERROR", "exception_type": null, "message": "m"}]"#,
        );
        let rendered = render(&error_records(rows, "x").unwrap()).unwrap();
        let expected = r#"[
    {
        "experiment": "x",
        "timestamp": "2022-07-26T04:41:49.000Z",
        "metric": null,
        "statistic": null,
        "log_level": "ERROR",
        "exception_type": null,
        "message": "m"
    }
]"#;
        assert_eq!(rendered, expected);
    }
}
