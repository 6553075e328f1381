use anyhow::{Context, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Display;

#[derive(Deserialize)]
struct RestErrorResponse {
    error: RestErrorBody,
}
#[derive(Deserialize)]
struct RestErrorBody {
    message: String,
    #[serde(default)]
    status: Option<RestErrorCode>,
}
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    #[error("{status} {code}: {message}")]
    Known { status: u16, code: RestErrorCode, message: String },
    #[error("Unknown {status} error:\n{body}")]
    Unknown { status: u16, body: String },
}
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "&str")]
pub enum RestErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    PermissionDenied,
    Unknown(String),
}
impl From<&str> for RestErrorCode {
    fn from(value: &str) -> Self {
        match value {
            "NOT_FOUND" => RestErrorCode::NotFound,
            "ALREADY_EXISTS" => RestErrorCode::AlreadyExists,
            "INVALID_ARGUMENT" => RestErrorCode::InvalidArgument,
            "PERMISSION_DENIED" => RestErrorCode::PermissionDenied,
            _ => return RestErrorCode::Unknown(value.to_owned()),
        }
    }
}
impl Display for RestErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A JSON API below `api_url`, optionally authenticated with a bearer token.
pub struct Server {
    api_url: String,
    token: Option<String>,
}

fn parse_error(response: ureq::Response) -> RestError {
    let status = response.status();
    let body = response
        .into_string()
        .unwrap_or_else(|_| "Could not turn error body into String.".to_string());

    let response = serde_json::from_str::<RestErrorResponse>(&body).ok();
    match response {
        Some(RestErrorResponse {
            error:
                RestErrorBody {
                    message,
                    status: Some(code),
                },
        }) => RestError::Known { status, code, message },
        _ => RestError::Unknown { status, body },
    }
}

impl Server {
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Server {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub(crate) fn execute<Ep, Val, Hand, Err>(&mut self, request: Ep, error_handler: Hand) -> Result<Val, Err>
    where
        Ep: Endpoint<Value = Val> + EndpointExt,
        Hand: FnOnce(RestError) -> Err,
        Err: From<anyhow::Error>,
    {
        let url = format!("{}/{}", self.api_url, request.path().context("building request path failed")?);
        let body = request.body().context("serializing request failed")?;

        let mut http_request = Ep::METHOD(&url);
        if let Some(token) = &self.token {
            http_request.set("Authorization", &format!("Bearer {}", token));
        }
        let http_response = match &body {
            Some(body) => http_request
                .set("Content-Type", request.content_type())
                .send_string(body),
            None => http_request.call(),
        };

        if http_response.error() {
            let error = parse_error(http_response);
            Err(error_handler(error))
        } else {
            let response_string = http_response.into_string().context("failed to turn response into string")?;
            let response = Ep::read_response_string(&response_string)
                .with_context(|| format!("deserializing response failed:\n{}", &response_string))?;
            let value = Ep::extract(response);
            Ok(value)
        }
    }
}

pub(crate) trait Endpoint {
    const METHOD: fn(&str) -> ureq::Request;

    type Response;
    type Value;

    /// Relative to the server's `api_url`, including any query string.
    fn path(&self) -> Result<String, Error>;
    /// `None` sends no body at all.
    fn body(&self) -> Result<Option<String>, Error>;
    fn extract(response: Self::Response) -> Self::Value;

    fn content_type(&self) -> &str {
        "application/json"
    }
}
pub(crate) trait EndpointExt: Endpoint {
    fn read_response_string(response: &str) -> Result<Self::Response, Error>;
}
impl<P, R, V> EndpointExt for P
where
    R: DeserializeOwned,
    P: Endpoint<Response = R, Value = V>,
{
    fn read_response_string(response: &str) -> Result<Self::Response, Error> {
        let response = serde_json::from_str::<'_, R>(response)?;
        Ok(response)
    }
}

pub(crate) fn json_body<T: Serialize>(request: &T) -> Result<Option<String>, Error> {
    Ok(Some(serde_json::to_string(request)?))
}

/// `path` followed by the url encoded `params`, if there are any.
pub(crate) fn with_query<T: Serialize>(path: &str, params: &T) -> Result<String, Error> {
    let query = serde_qs::to_string(params)?;
    if query.is_empty() {
        Ok(path.to_string())
    } else {
        Ok(format!("{}?{}", path, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_google_error_response() {
        let body = r#"
        {
            "error": {
                "code": 404,
                "message": "Not found: Table moz-fx-data-experiments:mozanalysis.logs",
                "errors": [{"reason": "notFound"}],
                "status": "NOT_FOUND"
            }
        }
        "#;
        let parsed = serde_json::from_str::<RestErrorResponse>(body).unwrap();
        assert_eq!(parsed.error.status, Some(RestErrorCode::NotFound));
        assert!(parsed.error.message.starts_with("Not found"));
    }

    #[test]
    fn unknown_codes_are_kept() {
        assert_eq!(
            RestErrorCode::from("RESOURCE_EXHAUSTED"),
            RestErrorCode::Unknown("RESOURCE_EXHAUSTED".to_string())
        );
    }

    #[derive(Serialize)]
    struct Params<'a> {
        #[serde(rename = "uploadType")]
        upload_type: &'a str,
        name: &'a str,
        #[serde(rename = "pageToken", skip_serializing_if = "Option::is_none")]
        page_token: Option<&'a str>,
    }

    #[test]
    fn query_strings_are_encoded() {
        let params = Params {
            upload_type: "media",
            name: "errors/logs table.json",
            page_token: None,
        };
        assert_eq!(
            with_query("b/mozanalysis/o", &params).unwrap(),
            "b/mozanalysis/o?uploadType=media&name=errors%2Flogs+table.json"
        );
    }
}
