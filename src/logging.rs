//! Structured logging.
//!
//! Everything logs through `tracing`. Warnings and errors are also collected
//! as `LogRecord`s so they can be appended to the warehouse log table, which
//! is what `Analysis::export_errors` later reads back.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{field::Field, Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, prelude::*, EnvFilter, Layer};

use crate::{
    api::{
        client::Warehouse,
        error::WarehouseError,
        log::{LogLevel, LogRecord},
    },
    timestamp,
};

/// Where log records are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfiguration {
    pub log_project_id: String,
    pub log_dataset_id: String,
    pub log_table_id: String,
    #[serde(default = "default_log_to_bigquery")]
    pub log_to_bigquery: bool,
}

fn default_log_to_bigquery() -> bool {
    true
}

impl LogConfiguration {
    pub fn new(
        log_project_id: impl Into<String>,
        log_dataset_id: impl Into<String>,
        log_table_id: impl Into<String>,
    ) -> Self {
        LogConfiguration {
            log_project_id: log_project_id.into(),
            log_dataset_id: log_dataset_id.into(),
            log_table_id: log_table_id.into(),
            log_to_bigquery: true,
        }
    }

    /// Fully qualified `project.dataset.table`.
    pub fn log_table(&self) -> String {
        format!(
            "{}.{}.{}",
            self.log_project_id, self.log_dataset_id, self.log_table_id
        )
    }
}

/// Installs the global subscriber: human readable output filtered by
/// `RUST_LOG` (or `default_filter` when unset), plus a collector.
pub fn init(default_filter: &str) -> Result<LogCollector, anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    let collector = LogCollector::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(collector.clone())
        .try_init()?;
    Ok(collector)
}

/// A `Layer` keeping every warning and error as a `LogRecord`.
///
/// Errors carrying `severity = "CRITICAL"` are recorded as critical.
#[derive(Debug, Clone, Default)]
pub struct LogCollector {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCollector {
    pub fn new() -> Self {
        LogCollector::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn drain(&self) -> Vec<LogRecord> {
        self.records().drain(..).collect()
    }

    /// Appends the collected records to the log table and returns how many
    /// were written. Records are kept if the insert fails.
    pub fn flush(
        &self,
        warehouse: &mut dyn Warehouse,
        config: &LogConfiguration,
    ) -> Result<usize, WarehouseError> {
        if !config.log_to_bigquery {
            return Ok(0);
        }
        let records = self.drain();
        if records.is_empty() {
            return Ok(0);
        }
        let statement = insert_statement(&config.log_table(), &records);
        let written = records.len();
        if let Err(error) = warehouse.execute(&statement, None) {
            let mut kept = self.records();
            let newer = std::mem::replace(&mut *kept, records);
            kept.extend(newer);
            return Err(error);
        }
        Ok(written)
    }
}

fn insert_statement(table: &str, records: &[LogRecord]) -> String {
    let rows: Vec<String> = records
        .iter()
        .map(|record| {
            format!(
                "\n({}, TIMESTAMP {}, {}, {}, {}, {}, {})",
                literal(record.experiment.as_deref()),
                literal(Some(
                    record
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Millis, true)
                        .as_str()
                )),
                literal(record.metric.as_deref()),
                literal(record.statistic.as_deref()),
                literal(Some(record.log_level.as_str())),
                literal(record.exception_type.as_deref()),
                literal(Some(record.message.as_str())),
            )
        })
        .collect();
    format!(
        "INSERT INTO `{}` (experiment, timestamp, metric, statistic, log_level, exception_type, message) VALUES{}",
        table,
        rows.join(",")
    )
}

/// A single-quoted string literal; quoted strings may not span lines.
fn literal(value: Option<&str>) -> String {
    let value = match value {
        Some(value) => value,
        None => return "NULL".to_string(),
    };
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

#[derive(Default)]
struct RecordVisitor {
    experiment: Option<String>,
    metric: Option<String>,
    statistic: Option<String>,
    exception_type: Option<String>,
    severity: Option<String>,
    message: String,
}

impl RecordVisitor {
    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            "experiment" => self.experiment = Some(value),
            "metric" => self.metric = Some(value),
            "statistic" => self.statistic = Some(value),
            "exception_type" => self.exception_type = Some(value),
            "severity" => self.severity = Some(value),
            "message" => self.message = value,
            _ => {}
        }
    }
}

impl tracing::field::Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for LogCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level != Level::WARN && level != Level::ERROR {
            return;
        }
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let log_level = if level == Level::WARN {
            LogLevel::Warning
        } else if visitor.severity.as_deref() == Some("CRITICAL") {
            LogLevel::Critical
        } else {
            LogLevel::Error
        };
        self.records().push(LogRecord {
            experiment: visitor.experiment,
            timestamp: timestamp(),
            metric: visitor.metric,
            statistic: visitor.statistic,
            log_level,
            exception_type: visitor.exception_type,
            message: visitor.message,
        });
    }
}
