use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use ynamazon_core::{BudgetSource, BudgetTransaction, Payee, SourceError, TransactionUpdate};

use crate::models::{Envelope, ErrorEnvelope, PayeesData, PutTransactionWrapper, TransactionsData};

pub const DEFAULT_BASE_URL: &str = "https://api.ynab.com/v1";

#[derive(Debug, Clone)]
pub struct YnabConfig {
    pub api_key: String,
    pub budget_id: String,
    pub base_url: String,
}

impl YnabConfig {
    pub fn new(api_key: &str, budget_id: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            budget_id: budget_id.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Thin client over the YNAB REST API, scoped to one budget.
pub struct YnabClient {
    http: reqwest::Client,
    config: YnabConfig,
}

impl YnabClient {
    pub fn new(config: YnabConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("ynamazon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/budgets/{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.budget_id,
            path
        )
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(read_error(status, &body, &self.config.budget_id));
        }

        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("{url}: {e}")))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl BudgetSource for YnabClient {
    async fn payees(&self) -> Result<Vec<Payee>, SourceError> {
        let data: PayeesData = self.get_data("/payees").await?;
        Ok(data.payees.into_iter().map(Payee::from).collect())
    }

    async fn transactions_by_payee(&self, payee_id: &str) -> Result<Vec<BudgetTransaction>, SourceError> {
        let data: TransactionsData = self
            .get_data(&format!("/payees/{payee_id}/transactions"))
            .await?;
        Ok(data
            .transactions
            .into_iter()
            .filter(|t| !t.deleted)
            .map(BudgetTransaction::from)
            .collect())
    }

    async fn update_transaction(&self, update: &TransactionUpdate) -> Result<(), SourceError> {
        let url = self.url(&format!("/transactions/{}", update.transaction_id));
        tracing::debug!("PUT {url}");
        let rejected = |reason: String| SourceError::RemoteUpdate {
            transaction_id: update.transaction_id.clone(),
            reason,
        };

        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.config.api_key)
            .json(&PutTransactionWrapper::from(update))
            .send()
            .await
            .map_err(|e| rejected(format!("network error: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        match read_error(status, &body, &self.config.budget_id) {
            auth @ SourceError::Authentication(_) => Err(auth),
            other => Err(rejected(other.to_string())),
        }
    }
}

/// Maps a non-success response onto the error taxonomy.
fn read_error(status: StatusCode, body: &str, budget_id: &str) -> SourceError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.detail)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::Authentication(format!("YNAB rejected the API key ({status}): {detail}"))
        }
        StatusCode::NOT_FOUND => SourceError::NotFound(format!("budget {budget_id}: {detail}")),
        _ => SourceError::Network(format!("YNAB returned {status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    const KEY: &str = "good-key";

    type Captured = Arc<Mutex<Vec<(String, Value)>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {KEY}"))
    }

    fn unauthorized() -> (AxumStatus, Json<Value>) {
        (
            AxumStatus::UNAUTHORIZED,
            Json(json!({"error": {"id": "401", "name": "unauthorized", "detail": "Unauthorized"}})),
        )
    }

    async fn payees(Path(budget): Path<String>, headers: HeaderMap) -> (AxumStatus, Json<Value>) {
        if !authorized(&headers) {
            return unauthorized();
        }
        if budget != "budget-1" {
            return (
                AxumStatus::NOT_FOUND,
                Json(json!({"error": {"id": "404.2", "name": "resource_not_found", "detail": "Resource not found"}})),
            );
        }
        (
            AxumStatus::OK,
            Json(json!({"data": {"payees": [
                {"id": "p-needs", "name": "Amazon - Needs Memo", "deleted": false},
                {"id": "p-done", "name": "Amazon", "deleted": false}
            ], "server_knowledge": 7}})),
        )
    }

    async fn payee_transactions(
        Path((_budget, payee)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> (AxumStatus, Json<Value>) {
        if !authorized(&headers) {
            return unauthorized();
        }
        assert_eq!(payee, "p-needs");
        (
            AxumStatus::OK,
            Json(json!({"data": {"transactions": [
                {"id": "t-1", "date": "2024-06-03", "amount": -42000, "memo": null,
                 "account_id": "acct-1", "payee_id": "p-needs", "payee_name": "Amazon - Needs Memo",
                 "deleted": false, "type": "transaction"},
                {"id": "t-2", "date": "2024-06-04", "amount": -1000, "memo": null,
                 "account_id": "acct-1", "payee_id": "p-needs", "payee_name": "Amazon - Needs Memo",
                 "deleted": true, "type": "transaction"}
            ]}})),
        )
    }

    async fn update(
        State(captured): State<Captured>,
        Path((_budget, id)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> (AxumStatus, Json<Value>) {
        if id == "t-conflict" {
            return (
                AxumStatus::CONFLICT,
                Json(json!({"error": {"id": "409", "name": "conflict", "detail": "transaction was modified"}})),
            );
        }
        captured.lock().unwrap().push((id, body.clone()));
        (AxumStatus::OK, Json(json!({"data": {"transaction": body["transaction"]}})))
    }

    async fn serve() -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/budgets/{budget}/payees", get(payees))
            .route("/budgets/{budget}/payees/{payee}/transactions", get(payee_transactions))
            .route("/budgets/{budget}/transactions/{id}", put(update))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{addr}"), captured)
    }

    fn client(base_url: &str, key: &str, budget: &str) -> YnabClient {
        YnabClient::new(YnabConfig {
            api_key: key.to_string(),
            budget_id: budget.to_string(),
            base_url: base_url.to_string(),
        })
        .unwrap()
    }

    fn sample_update(id: &str) -> TransactionUpdate {
        TransactionUpdate {
            transaction_id: id.to_string(),
            account_id: "acct-1".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            amount_milliunits: -42_000,
            payee_id: "p-done".to_string(),
            memo: "- Lamp".to_string(),
        }
    }

    #[tokio::test]
    async fn lists_payees_and_live_transactions() {
        let (base, _) = serve().await;
        let ynab = client(&base, KEY, "budget-1");

        let payees = ynab.payees().await.unwrap();
        assert_eq!(payees.len(), 2);
        assert_eq!(payees[1].name, "Amazon");

        let txs = ynab.transactions_by_payee("p-needs").await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, "t-1");
        assert_eq!(txs[0].amount_milliunits, -42_000);
    }

    #[tokio::test]
    async fn bad_key_is_authentication_error() {
        let (base, _) = serve().await;
        let err = client(&base, "wrong", "budget-1").payees().await.unwrap_err();
        assert!(matches!(err, SourceError::Authentication(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unknown_budget_is_not_found() {
        let (base, _) = serve().await;
        let err = client(&base, KEY, "nope").payees().await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(ref msg) if msg.contains("nope")), "{err:?}");
    }

    #[tokio::test]
    async fn update_sends_memo_and_payee() {
        let (base, captured) = serve().await;
        client(&base, KEY, "budget-1")
            .update_transaction(&sample_update("t-1"))
            .await
            .unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "t-1");
        assert_eq!(captured[0].1["transaction"]["memo"], "- Lamp");
        assert_eq!(captured[0].1["transaction"]["payee_id"], "p-done");
    }

    #[tokio::test]
    async fn rejected_update_is_remote_update_error() {
        let (base, _) = serve().await;
        let err = client(&base, KEY, "budget-1")
            .update_transaction(&sample_update("t-conflict"))
            .await
            .unwrap_err();
        match err {
            SourceError::RemoteUpdate { transaction_id, reason } => {
                assert_eq!(transaction_id, "t-conflict");
                assert!(reason.contains("transaction was modified"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let err = client("http://127.0.0.1:9", KEY, "budget-1").payees().await.unwrap_err();
        assert!(matches!(err, SourceError::Network(_)), "{err:?}");
    }
}
