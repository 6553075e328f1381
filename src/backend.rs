pub mod bigquery;
pub mod experimenter;
pub mod gcs;
pub mod rest;
