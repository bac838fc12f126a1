use super::{StoreError, TargetRow, TargetStore, filter_text, validate_identifier};
use crate::config::StoreConfig;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REST_PREFIX: &str = "rest/v1";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

/// Client for a hosted PostgREST-style data API.
#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| StoreError::Config("FLEET_STORE_URL is required for the rest backend".into()))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let apikey = HeaderValue::from_str(key)
                .map_err(|_| StoreError::Config("FLEET_STORE_API_KEY is not a valid header value".into()))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| StoreError::Config("FLEET_STORE_API_KEY is not a valid header value".into()))?;
            headers.insert("apikey", apikey);
            headers.insert(AUTHORIZATION, bearer);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("fleet-import/0.1")
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> Result<String, StoreError> {
        Ok(format!(
            "{}/{}/{}",
            self.base_url,
            REST_PREFIX,
            validate_identifier(table)?
        ))
    }

    async fn send_rows(&self, request: RequestBuilder) -> Result<Vec<TargetRow>, StoreError> {
        let response = request
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let response = check_status(response).await?;
        parse_rows(&response.bytes().await?)
    }
}

/// Rows from a `return=representation` body: an array of objects, a single
/// object, or nothing at all.
fn parse_rows(body: &[u8]) -> Result<Vec<TargetRow>, StoreError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(StoreError::UnexpectedResponse(format!(
                    "expected an object row, got {other}"
                ))),
            })
            .collect(),
        Ok(Value::Object(row)) => Ok(vec![row]),
        Ok(other) => Err(StoreError::UnexpectedResponse(format!(
            "expected a row array, got {other}"
        ))),
        Err(err) => Err(StoreError::UnexpectedResponse(err.to_string())),
    }
}

/// The most specific message in an error body, or the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.message.or(parsed.error).or(parsed.details))
        .unwrap_or(body)
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message: error_message(body),
    })
}

fn eq_filter(column: &str, value: &Value) -> Result<(String, String), StoreError> {
    Ok((
        validate_identifier(column)?.to_string(),
        format!("eq.{}", filter_text(value)),
    ))
}

#[async_trait]
impl TargetStore for RestStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn insert(&self, table: &str, rows: Vec<TargetRow>) -> Result<Vec<TargetRow>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        for column in rows.iter().flat_map(|row| row.keys()) {
            validate_identifier(column)?;
        }

        let url = self.table_url(table)?;
        log::trace!("POST {} ({} rows)", url, rows.len());
        self.send_rows(self.http.post(url).json(&rows)).await
    }

    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: TargetRow,
    ) -> Result<Vec<TargetRow>, StoreError> {
        for column in patch.keys() {
            validate_identifier(column)?;
        }

        let url = self.table_url(table)?;
        let filter = eq_filter(key_column, &Value::String(key.to_string()))?;
        self.send_rows(self.http.patch(url).query(&[filter]).json(&patch))
            .await
    }

    async fn select(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<TargetRow>, StoreError> {
        let url = self.table_url(table)?;
        let query = filters
            .iter()
            .map(|(column, value)| eq_filter(column, value))
            .collect::<Result<Vec<_>, _>>()?;

        let response = self.http.get(url).query(&query).send().await?;
        parse_rows(&check_status(response).await?.bytes().await?)
    }

    async fn healthcheck(&self) -> Result<(), StoreError> {
        let response = self
            .http
            .get(format!("{}/{}/", self.base_url, REST_PREFIX))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requires_a_base_url() {
        let config = StoreConfig::default();
        assert!(matches!(RestStore::new(&config), Err(StoreError::Config(_))));
    }

    #[test]
    fn builds_table_urls_and_filters() {
        let config = StoreConfig {
            url: Some("https://fleet.example.com/".into()),
            api_key: Some("anon-key".into()),
            ..StoreConfig::default()
        };
        let store = RestStore::new(&config).unwrap();

        assert_eq!(
            store.table_url("vehicles").unwrap(),
            "https://fleet.example.com/rest/v1/vehicles"
        );
        assert!(store.table_url("vehicles?select=*").is_err());
        assert_eq!(
            eq_filter("id", &json!("veh-1")).unwrap(),
            ("id".to_string(), "eq.veh-1".to_string())
        );
        assert_eq!(
            eq_filter("year", &json!(2020)).unwrap(),
            ("year".to_string(), "eq.2020".to_string())
        );
    }

    #[test]
    fn parses_representation_bodies() {
        let rows = parse_rows(br#"[{"id": "veh-1", "make": "Kia"}, {"id": "veh-2"}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["make"], json!("Kia"));
        assert_eq!(rows[1]["id"], json!("veh-2"));

        let single = parse_rows(br#"{"id": "veh-3"}"#).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0]["id"], json!("veh-3"));

        assert!(parse_rows(b"").unwrap().is_empty());
        assert!(parse_rows(b"  \n").unwrap().is_empty());
        assert!(parse_rows(b"[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_representation_bodies() {
        let bodies: [&[u8]; 3] = [br#"[{"id": 1}, 7]"#, b"\"ok\"", b"{not json"];
        for body in bodies {
            assert!(
                matches!(parse_rows(body), Err(StoreError::UnexpectedResponse(_))),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn surfaces_the_most_specific_error_message() {
        assert_eq!(
            error_message(
                r#"{"message": "null value in column \"vehicle_id\"", "details": "Failing row"}"#.into()
            ),
            "null value in column \"vehicle_id\""
        );
        assert_eq!(
            error_message(r#"{"error": "invalid JWT", "details": "expired"}"#.into()),
            "invalid JWT"
        );
        assert_eq!(
            error_message(r#"{"code": "42P01", "details": "relation missing"}"#.into()),
            "relation missing"
        );
        assert_eq!(error_message(r#"{"code": "42P01"}"#.into()), r#"{"code": "42P01"}"#);
        assert_eq!(error_message("Bad Gateway".into()), "Bad Gateway");
    }
}
