//! `ObjectStorage` over the Cloud Storage JSON API.

use anyhow::Error;
use serde::{Deserialize, Serialize};

use crate::api::{client::ObjectStorage, error::StorageError};
use crate::backend::rest::{with_query, Endpoint, Server};

pub const STORAGE_UPLOAD_API_URL: &str = "https://storage.googleapis.com/upload/storage/v1";

pub struct StorageClient {
    server: Server,
}

impl StorageClient {
    pub fn new(server: Server) -> Self {
        StorageClient { server }
    }
}

impl ObjectStorage for StorageClient {
    fn upload_from_string(&mut self, bucket: &str, blob: &str, data: &str, content_type: &str) -> Result<(), StorageError> {
        let request = MediaUpload {
            bucket,
            params: UploadParams {
                upload_type: "media",
                name: blob,
            },
            data,
            content_type,
        };
        self.server.execute(request, Error::from)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadParams<'a> {
    upload_type: &'a str,
    name: &'a str,
}

struct MediaUpload<'a> {
    bucket: &'a str,
    params: UploadParams<'a>,
    data: &'a str,
    content_type: &'a str,
}
#[derive(Deserialize)]
struct MediaUploadResponse {}
impl Endpoint for MediaUpload<'_> {
    const METHOD: fn(&str) -> ureq::Request = ureq::post;
    type Response = MediaUploadResponse;
    type Value = ();

    fn path(&self) -> Result<String, Error> {
        with_query(&format!("b/{}/o", self.bucket), &self.params)
    }

    fn body(&self) -> Result<Option<String>, Error> {
        Ok(Some(self.data.to_string()))
    }

    fn extract(_response: Self::Response) -> Self::Value {}

    fn content_type(&self) -> &str {
        self.content_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_targets_the_blob() {
        let request = MediaUpload {
            bucket: "mozanalysis",
            params: UploadParams {
                upload_type: "media",
                name: "errors/logs.json",
            },
            data: "[]",
            content_type: "application/json",
        };
        assert_eq!(
            request.path().unwrap(),
            "b/mozanalysis/o?uploadType=media&name=errors%2Flogs.json"
        );
        assert_eq!(request.body().unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn upload_response_is_ignored() {
        let response = r#"{"kind": "storage#object", "name": "errors/logs.json", "bucket": "mozanalysis"}"#;
        assert!(serde_json::from_str::<MediaUploadResponse>(response).is_ok());
    }
}
