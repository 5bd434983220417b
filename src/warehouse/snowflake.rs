//! Snowflake SQL API v2 client.
//!
//! `POST /api/v2/statements` submits one statement. Short statements answer
//! `200` with the result; long ones answer `202` with a statement handle that
//! is polled on `GET /api/v2/statements/{handle}` until it leaves the running
//! state. Polling is bounded by `max_polls`, so a stuck statement surfaces as
//! a warehouse error instead of hanging the run.

use super::{QueryOutcome, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::{PipelineError, Result};
use crate::retry::{RetryPolicy, with_backoff_if};
use crate::utils::{one_line, truncate_for_log};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument};

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    warehouse: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    num_rows: u64,
}

/// Shared shape of success, pending and error bodies.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    statement_handle: Option<String>,
    #[serde(default)]
    message: String,
    code: Option<String>,
    sql_state: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
}

impl StatementResponse {
    fn into_outcome(self) -> QueryOutcome {
        QueryOutcome {
            num_rows: self.result_set_meta_data.map(|m| m.num_rows).unwrap_or(0),
            statement_handle: self.statement_handle,
            message: self.message,
        }
    }
}

/// Only transport-level failures are retried per request; SQL errors surface
/// to the caller on the first attempt.
fn is_transient(err: &PipelineError) -> bool {
    matches!(err, PipelineError::TransientNetwork(_))
}

enum Poll {
    Done(QueryOutcome),
    Pending(String),
}

pub struct SnowflakeWarehouse {
    client: reqwest::Client,
    base_url: String,
    token: String,
    user: String,
    database: String,
    schema: String,
    warehouse: String,
    role: Option<String>,
    statement_timeout: Duration,
    poll_interval: Duration,
    max_polls: u32,
    retry: RetryPolicy,
}

impl fmt::Debug for SnowflakeWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeWarehouse")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("warehouse", &self.warehouse)
            .finish()
    }
}

/// Map a non-success status and its body into the taxonomy.
fn classify(status: StatusCode, body: &str) -> PipelineError {
    let parsed: StatementResponse = serde_json::from_str(body).unwrap_or_default();
    let detail = if parsed.message.is_empty() {
        truncate_for_log(body, 300)
    } else {
        format!(
            "{} (code {}, sqlState {})",
            parsed.message,
            parsed.code.as_deref().unwrap_or("-"),
            parsed.sql_state.as_deref().unwrap_or("-")
        )
    };
    match status.as_u16() {
        401 | 403 => PipelineError::Auth(format!("snowflake HTTP {status}: {detail}")),
        408 | 429 | 500..=599 => {
            PipelineError::TransientNetwork(format!("snowflake HTTP {status}: {detail}"))
        }
        _ => PipelineError::Warehouse(detail),
    }
}

impl SnowflakeWarehouse {
    pub fn new(config: &WarehouseConfig, token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("https://{}.snowflakecomputing.com", config.account),
            token,
            user: config.user.clone(),
            database: config.database.clone(),
            schema: config.schema.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            statement_timeout: config.statement_timeout,
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
            retry: config.retry.clone(),
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn read(resp: reqwest::Response) -> Result<Poll> {
        let status = resp.status();
        let body = resp.text().await?;
        match status {
            StatusCode::OK => {
                let parsed: StatementResponse = serde_json::from_str(&body)?;
                Ok(Poll::Done(parsed.into_outcome()))
            }
            StatusCode::ACCEPTED => {
                let parsed: StatementResponse = serde_json::from_str(&body)?;
                parsed.statement_handle.map(Poll::Pending).ok_or_else(|| {
                    PipelineError::Warehouse("202 without a statement handle".to_string())
                })
            }
            _ => Err(classify(status, &body)),
        }
    }

    async fn submit(&self, sql: &str) -> Result<Poll> {
        let body = StatementRequest {
            statement: sql,
            timeout: self.statement_timeout.as_secs(),
            database: &self.database,
            schema: &self.schema,
            warehouse: &self.warehouse,
            role: self.role.as_deref(),
        };
        let resp = self
            .authorized(self.client.post(format!("{}/api/v2/statements", self.base_url)))
            .json(&body)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn poll(&self, handle: &str) -> Result<Poll> {
        let resp = self
            .authorized(self.client.get(format!(
                "{}/api/v2/statements/{}",
                self.base_url,
                urlencoding::encode(handle)
            )))
            .send()
            .await?;
        Self::read(resp).await
    }
}

#[cfg(test)]
impl SnowflakeWarehouse {
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

impl Warehouse for SnowflakeWarehouse {
    #[instrument(level = "info", skip_all, fields(user = %self.user, warehouse = %self.warehouse))]
    async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
        let t0 = Instant::now();
        debug!(sql = %one_line(sql), "Submitting statement");

        let mut state =
            with_backoff_if(&self.retry, "snowflake_submit", is_transient, |_| self.submit(sql)).await?;
        let mut polls = 0u32;
        loop {
            match state {
                Poll::Done(outcome) => {
                    info!(
                        handle = outcome.statement_handle.as_deref().unwrap_or("-"),
                        num_rows = outcome.num_rows,
                        polls,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Statement completed"
                    );
                    return Ok(outcome);
                }
                Poll::Pending(handle) => {
                    if polls >= self.max_polls {
                        return Err(PipelineError::Warehouse(format!(
                            "statement {handle} still running after {polls} polls"
                        )));
                    }
                    polls += 1;
                    sleep(self.poll_interval).await;
                    state = with_backoff_if(&self.retry, "snowflake_poll", is_transient, |_| {
                        self.poll(&handle)
                    })
                    .await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::local_config;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    const HANDLE: &str = "01b0-abc";

    fn warehouse(server: &ServerGuard, max_polls: u32) -> SnowflakeWarehouse {
        let mut config = local_config().warehouse;
        config.account = "acme".into();
        config.user = "LOADER".into();
        config.poll_interval = Duration::ZERO;
        config.max_polls = max_polls;
        config.retry = RetryPolicy::fixed(2, Duration::ZERO);
        SnowflakeWarehouse::new(&config, "tok".into())
            .unwrap()
            .with_base_url(&server.url())
    }

    fn pending_body() -> String {
        json!({
            "statementHandle": HANDLE,
            "message": "Asynchronous execution in progress.",
        })
        .to_string()
    }

    #[test]
    fn test_default_base_url_uses_account() {
        let mut config = local_config().warehouse;
        config.account = "acme".into();
        let warehouse = SnowflakeWarehouse::new(&config, "tok".into()).unwrap();
        assert_eq!(warehouse.base_url, "https://acme.snowflakecomputing.com");
    }

    #[tokio::test]
    async fn test_execute_polls_accepted_statement_until_done() {
        let mut server = Server::new_async().await;
        let submit = server
            .mock("POST", "/api/v2/statements")
            .match_header("authorization", "Bearer tok")
            .match_header("x-snowflake-authorization-token-type", "OAUTH")
            .match_body(Matcher::PartialJson(json!({ "statement": "SELECT 1" })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(pending_body())
            .expect(1)
            .create_async()
            .await;
        let poll = server
            .mock("GET", format!("/api/v2/statements/{HANDLE}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "statementHandle": HANDLE,
                    "message": "Statement executed successfully.",
                    "resultSetMetaData": { "numRows": 1 },
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let outcome = warehouse(&server, 5).execute("SELECT 1").await.unwrap();
        submit.assert_async().await;
        poll.assert_async().await;
        assert_eq!(outcome.statement_handle.as_deref(), Some(HANDLE));
        assert_eq!(outcome.num_rows, 1);
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_max_polls() {
        let mut server = Server::new_async().await;
        let _submit = server
            .mock("POST", "/api/v2/statements")
            .with_status(202)
            .with_body(pending_body())
            .create_async()
            .await;
        let poll = server
            .mock("GET", format!("/api/v2/statements/{HANDLE}").as_str())
            .with_status(202)
            .with_body(pending_body())
            .expect(2)
            .create_async()
            .await;

        let result = warehouse(&server, 2).execute("COPY INTO t").await;
        match result {
            Err(PipelineError::Warehouse(msg)) => assert!(msg.contains("still running"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_sql_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let submit = server
            .mock("POST", "/api/v2/statements")
            .with_status(422)
            .with_body(
                json!({
                    "code": "002003",
                    "sqlState": "02000",
                    "message": "SQL compilation error: Table 'X' does not exist",
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let result = warehouse(&server, 5).execute("SELECT * FROM X").await;
        assert!(matches!(result, Err(PipelineError::Warehouse(_))), "{result:?}");
        submit.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_retries_unavailable_submit() {
        let mut server = Server::new_async().await;
        let submit = server
            .mock("POST", "/api/v2/statements")
            .with_status(503)
            .with_body("upstream unavailable")
            .expect(2)
            .create_async()
            .await;

        let result = warehouse(&server, 5).execute("SELECT 1").await;
        assert!(matches!(result, Err(PipelineError::TransientNetwork(_))), "{result:?}");
        submit.assert_async().await;
    }

    #[test]
    fn test_classify_sql_error() {
        let body = r#"{"code":"002003","sqlState":"02000","message":"SQL compilation error: Table 'X' does not exist","statementHandle":"01b0"}"#;
        match classify(StatusCode::UNPROCESSABLE_ENTITY, body) {
            PipelineError::Warehouse(msg) => {
                assert!(msg.contains("does not exist"));
                assert!(msg.contains("002003"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_auth_and_transient() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "{}"),
            PipelineError::Auth(_)
        ));
        assert!(classify(StatusCode::SERVICE_UNAVAILABLE, "oops").is_retryable());
    }

    #[test]
    fn test_outcome_from_success_body() {
        let body = r#"{"statementHandle":"01b0-abc","message":"Statement executed successfully.","resultSetMetaData":{"numRows":1,"format":"jsonv2"},"data":[["x"]]}"#;
        let parsed: StatementResponse = serde_json::from_str(body).unwrap();
        let outcome = parsed.into_outcome();
        assert_eq!(outcome.statement_handle.as_deref(), Some("01b0-abc"));
        assert_eq!(outcome.num_rows, 1);
    }

    #[test]
    fn test_request_body_shape() {
        let req = StatementRequest {
            statement: "SELECT 1",
            timeout: 600,
            database: "news_api",
            schema: "PUBLIC",
            warehouse: "COMPUTE_WH",
            role: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["statement"], "SELECT 1");
        assert!(value.get("role").is_none());
    }
}
