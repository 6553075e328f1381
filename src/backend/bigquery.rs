//! `Warehouse` over the BigQuery v2 REST API.

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::{thread, time::Duration};
use tracing::debug;

use crate::api::{
    client::{Record, Warehouse},
    error::WarehouseError,
};
use crate::backend::rest::{json_body, with_query, Endpoint, Server};

pub const BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

pub struct BigQueryClient {
    server: Server,
    project: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl BigQueryClient {
    /// Jobs are billed to `project`.
    pub fn new(server: Server, project: impl Into<String>) -> Self {
        BigQueryClient {
            server,
            project: project.into(),
            poll_interval: Duration::from_secs(2),
            max_polls: 900,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls;
        self
    }

    fn query(&mut self, query: &str, dry_run: bool) -> Result<QueryResponse, Error> {
        let request = Query {
            project: &self.project,
            body: QueryRequest {
                query,
                use_legacy_sql: false,
                dry_run,
            },
        };
        self.server.execute(request, Error::from)
    }

    fn results(&mut self, job: &JobReference, page_token: Option<&str>) -> Result<QueryResponse, Error> {
        let request = GetQueryResults {
            project: &job.project_id,
            job_id: &job.job_id,
            params: GetQueryResultsParams {
                location: job.location.as_deref(),
                page_token,
                timeout_ms: 10_000,
            },
        };
        self.server.execute(request, Error::from)
    }

    /// Runs `query` and waits for it; the first page of results is returned.
    fn run(&mut self, query: &str) -> Result<QueryResponse, Error> {
        let mut response = self.query(query, false)?;
        let mut polls = 0;
        while !response.job_complete {
            let job = response
                .job_reference
                .clone()
                .ok_or_else(|| anyhow!("incomplete query returned no job reference"))?;
            if polls == self.max_polls {
                return Err(anyhow!("job {} did not complete", job.job_id));
            }
            polls += 1;
            thread::sleep(self.poll_interval);
            debug!(job_id = %job.job_id, polls, "Waiting for query job");
            response = self.results(&job, None)?;
        }
        Ok(response)
    }
}

impl Warehouse for BigQueryClient {
    fn execute(&mut self, query: &str, destination: Option<&str>) -> Result<(), WarehouseError> {
        let statement = match destination {
            Some(table) => format!("CREATE OR REPLACE TABLE `{}` AS\n{}", table, query),
            None => query.to_string(),
        };
        self.run(&statement)?;
        Ok(())
    }

    fn dry_run(&mut self, query: &str) -> Result<(), WarehouseError> {
        let response = self.query(query, true)?;
        debug!(
            bytes = response.total_bytes_processed.as_deref().unwrap_or("0"),
            "Dry run passed"
        );
        Ok(())
    }

    fn table_to_records(&mut self, table: &str) -> Result<Vec<Record>, WarehouseError> {
        let mut response = self.run(&format!("SELECT * FROM `{}`", table))?;
        let schema = response
            .schema
            .take()
            .ok_or_else(|| anyhow!("query on {} returned no schema", table))?;

        let mut records = Vec::new();
        loop {
            for row in &response.rows {
                records.push(to_record(&schema, row));
            }
            let job = match (&response.page_token, &response.job_reference) {
                (Some(_), Some(job)) => job.clone(),
                _ => break,
            };
            let page_token = response.page_token.take();
            response = self.results(&job, page_token.as_deref())?;
        }
        Ok(records)
    }
}

fn to_record(schema: &TableSchema, row: &TableRow) -> Record {
    schema
        .fields
        .iter()
        .zip(&row.f)
        .map(|(field, cell)| (field.name.clone(), typed(&field.field_type, &cell.v)))
        .collect::<Map<_, _>>()
}

// BigQuery sends every scalar as a string
fn typed(field_type: &str, value: &Value) -> Value {
    let text = match value {
        Value::String(text) => text,
        other => return other.clone(),
    };
    match field_type {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        "BOOLEAN" | "BOOL" => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableFieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableCell {
    v: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
}

struct Query<'a> {
    project: &'a str,
    body: QueryRequest<'a>,
}
impl Endpoint for Query<'_> {
    const METHOD: fn(&str) -> ureq::Request = ureq::post;
    type Response = QueryResponse;
    type Value = QueryResponse;

    fn path(&self) -> Result<String, Error> {
        Ok(format!("projects/{}/queries", self.project))
    }

    fn body(&self) -> Result<Option<String>, Error> {
        json_body(&self.body)
    }

    fn extract(response: Self::Response) -> Self::Value {
        response
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetQueryResultsParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    timeout_ms: u64,
}

struct GetQueryResults<'a> {
    project: &'a str,
    job_id: &'a str,
    params: GetQueryResultsParams<'a>,
}
impl Endpoint for GetQueryResults<'_> {
    const METHOD: fn(&str) -> ureq::Request = ureq::get;
    type Response = QueryResponse;
    type Value = QueryResponse;

    fn path(&self) -> Result<String, Error> {
        with_query(&format!("projects/{}/queries/{}", self.project, self.job_id), &self.params)
    }

    fn body(&self) -> Result<Option<String>, Error> {
        Ok(None)
    }

    fn extract(response: Self::Response) -> Self::Value {
        response
    }
}
