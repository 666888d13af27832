//! Challenge Gateway Server
//!
//! Architecture:
//! ```text
//! Browser ──POST /──────────────► Gateway ──sui_getTransactionBlock──► Full node
//!         ──POST /start_challenge► Gateway ──sui client publish──────► Sui CLI
//! ```
//!
//! Endpoints:
//! - `GET  /`                - Challenge page with deployment status
//! - `POST /`                - Verify a transaction digest and contract flag
//! - `POST /start_challenge` - Publish the challenge contract (contract mode)
//! - `GET  /health`          - Liveness probe

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{ChallengeMode, GatewayConfig};
use crate::credentials::Credentials;
use crate::ledger::LedgerClient;
use crate::publisher::{ContractPublisher, DeployOutcome, Deployment};
use crate::validator::{flag_matches, validate_transaction, CheckContext, Rejection, Verdict};

const INDEX_TEMPLATE: &str = "index";

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

// ============================================================================
// SERVER STATE
// ============================================================================

pub struct AppState {
    pub config: GatewayConfig,
    pub credentials: Credentials,
    pub ledger: LedgerClient,
    /// Present only in contract mode
    pub deployment: Option<Arc<Deployment>>,
    templates: Handlebars<'static>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        credentials: Credentials,
        publisher: Arc<dyn ContractPublisher>,
    ) -> anyhow::Result<Self> {
        let ledger = LedgerClient::new(config.rpc_endpoint.clone(), config.rpc_timeout)?;

        let deployment = config.mode.requires_contract().then(|| {
            Arc::new(Deployment::new(publisher, config.contract_path.clone(), config.gas_budget))
        });

        let mut templates = Handlebars::new();
        templates.register_template_string(INDEX_TEMPLATE, include_str!("templates/index.html"))?;

        Ok(Self {
            config,
            credentials,
            ledger,
            deployment,
            templates,
        })
    }

    /// Check a submission against the ledger and the configured flag
    pub async fn judge(&self, tx_digest: &str, contract_flag: &str) -> Verdict {
        let flag_ok = flag_matches(contract_flag, &self.config.contract_flag);

        let deployed = self.deployment.as_ref().and_then(|d| d.current());
        if self.config.mode.requires_contract() && deployed.is_none() {
            warn!("Submission for {} before the contract was deployed", tx_digest);
            return Verdict::new(Err(Rejection::NotDeployed), flag_ok);
        }

        let chain = match self.ledger.get_transaction(tx_digest).await {
            Ok(record) => {
                let ctx = CheckContext {
                    participant_id: &self.credentials.participant_id,
                    package_id: deployed.as_ref().map(|c| c.package_id.as_str()),
                };
                validate_transaction(self.config.mode, &record, &ctx)
            }
            Err(e) => Err(e.into()),
        };

        if let Err(reason) = &chain {
            warn!("Transaction {} rejected: {}", tx_digest, reason);
        }

        Verdict::new(chain, flag_ok)
    }
}

// ============================================================================
// PAGE RENDERING
// ============================================================================

#[derive(Debug, Default, Serialize)]
struct PageView {
    participant_id: String,
    mode: String,
    contract_mode: bool,
    package_id: String,
    publish_digest: String,
    tx_digest: String,
    result_message: Option<String>,
    passed: bool,
    reward_token: Option<String>,
}

impl PageView {
    fn for_state(state: &AppState) -> Self {
        let deployed = state.deployment.as_ref().and_then(|d| d.current());
        Self {
            participant_id: state.credentials.participant_id.clone(),
            mode: state.config.mode.to_string(),
            contract_mode: state.config.mode == ChallengeMode::Contract,
            package_id: deployed
                .as_ref()
                .map(|c| c.package_id.clone())
                .unwrap_or_else(|| "not deployed".to_string()),
            publish_digest: deployed
                .map(|c| c.transaction_digest)
                .unwrap_or_else(|| "none".to_string()),
            ..Default::default()
        }
    }
}

fn render(state: &AppState, view: &PageView) -> Response {
    match state.templates.render(INDEX_TEMPLATE, view) {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            error!("Failed to render page: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
        }
    }
}

// ============================================================================
// / ENDPOINT
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub tx_digest: String,
    #[serde(default)]
    pub contract_flag_input: String,
}

/// GET / - Challenge page
pub async fn show_form(State(state): State<Arc<AppState>>) -> Response {
    render(&state, &PageView::for_state(&state))
}

/// POST / - Verify a submission and release the reward token on success
pub async fn submit_form(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SubmitForm>,
) -> Response {
    let tx_digest = form.tx_digest.trim();
    let contract_flag = form.contract_flag_input.trim();
    let mut view = PageView::for_state(&state);
    view.tx_digest = tx_digest.to_string();

    if tx_digest.is_empty() {
        warn!("Rejected submission with empty transaction digest");
        view.result_message = Some("Error: the transaction digest must not be empty.".to_string());
        return render(&state, &view);
    }

    let verdict = state.judge(tx_digest, contract_flag).await;
    view.passed = verdict.passed();
    view.result_message = Some(verdict.message());

    if verdict.passed() {
        info!(
            "Challenge solved by {} with transaction {}",
            state.credentials.participant_id, tx_digest
        );
        view.reward_token = Some(state.credentials.reward_token.clone());
    } else {
        warn!(
            "Challenge attempt failed for {} with transaction {}: {}",
            state.credentials.participant_id,
            tx_digest,
            verdict.message()
        );
    }

    render(&state, &view)
}

// ============================================================================
// /start_challenge ENDPOINT
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StartChallengeResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// POST /start_challenge - Publish the challenge contract once
///
/// Mounted only when the mode has a deployment to drive.
pub async fn start_challenge(
    deployment: Arc<Deployment>,
) -> (StatusCode, Json<StartChallengeResponse>) {
    info!("Received start challenge request");

    match deployment.ensure_deployed().await {
        Ok(outcome) => {
            let message = match &outcome {
                DeployOutcome::Published(_) => "contract deployed",
                DeployOutcome::AlreadyDeployed(_) => "contract already deployed",
            };
            let contract = outcome.contract();
            (
                StatusCode::OK,
                Json(StartChallengeResponse {
                    status: "success".to_string(),
                    message: message.to_string(),
                    package_id: Some(contract.package_id.clone()),
                    transaction_hash: Some(contract.transaction_digest.clone()),
                    details: None,
                }),
            )
        }
        Err(e) => {
            error!("Contract deployment failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StartChallengeResponse {
                    status: "error".to_string(),
                    message: format!("contract deployment failed: {}", e),
                    package_id: None,
                    transaction_hash: None,
                    details: Some(e.details()),
                }),
            )
        }
    }
}

// ============================================================================
// /health ENDPOINT
// ============================================================================

pub async fn health_check() -> &'static str {
    "OK"
}

// ============================================================================
// SERVER STARTUP
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(show_form).post(submit_form))
        .route("/health", get(health_check));

    if let Some(deployment) = state.deployment.clone() {
        app = app.route("/start_challenge", post(move || start_challenge(deployment.clone())));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn run_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let mode = state.config.mode;
    let rpc_endpoint = state.config.rpc_endpoint.clone();
    let app = router(Arc::new(state));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║              Move CTF Flag Gateway                           ║");
    info!("╠══════════════════════════════════════════════════════════════╣");
    info!("║  Mode:         {:46}║", mode.to_string());
    info!("║  Ledger RPC:   {:46}║", rpc_endpoint);
    info!("║  Listening on: {:46}║", addr);
    info!("╠══════════════════════════════════════════════════════════════╣");
    info!("║  Endpoints:                                                  ║");
    info!("║    GET  /                - Challenge page                    ║");
    info!("║    POST /                - Submit transaction + flag         ║");
    if mode.requires_contract() {
        info!("║    POST /start_challenge - Publish challenge contract        ║");
    }
    info!("║    GET  /health          - Health check                      ║");
    info!("╚══════════════════════════════════════════════════════════════╝");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::tests::FakePublisher;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use tower::util::ServiceExt;

    const TOKEN: &str = "flag{reward_token_42}";
    const FLAG: &str = "CTF{MoveCTF-Task2}";
    const FLAG_FORM: &str = "CTF%7BMoveCTF-Task2%7D";
    const PACKAGE: &str = "0xpkg";

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
    }

    impl TestApp {
        fn new(mode: ChallengeMode, rpc_endpoint: String, publisher: Arc<FakePublisher>) -> Self {
            let config = GatewayConfig {
                mode,
                rpc_endpoint,
                rpc_timeout: Duration::from_millis(500),
                contract_flag: FLAG.to_string(),
                ..GatewayConfig::default()
            };
            let state = Arc::new(
                AppState::new(config, Credentials::new(TOKEN, "octocat"), publisher).unwrap(),
            );
            Self {
                router: router(state.clone()),
                state,
            }
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, String) {
            let res = self.router.clone().oneshot(req).await.expect("request failed");
            let status = res.status();
            let bytes = res
                .into_body()
                .collect()
                .await
                .expect("failed to read response body")
                .to_bytes();
            (status, String::from_utf8_lossy(&bytes).to_string())
        }

        async fn get(&self, path: &str) -> (StatusCode, String) {
            let req = Request::builder()
                .method(Method::GET)
                .uri(path)
                .body(Body::empty())
                .unwrap();
            self.send(req).await
        }

        async fn submit(&self, form: &str) -> (StatusCode, String) {
            let req = Request::builder()
                .method(Method::POST)
                .uri("/")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap();
            self.send(req).await
        }

        async fn start_challenge(&self) -> (StatusCode, StartChallengeResponse) {
            let req = Request::builder()
                .method(Method::POST)
                .uri("/start_challenge")
                .body(Body::empty())
                .unwrap();
            let (status, body) = self.send(req).await;
            (status, serde_json::from_str(&body).unwrap())
        }
    }

    fn transaction(status: &str, github_id: &str) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "transaction": {"data": {"transaction": {"kind": "ProgrammableTransaction"}}},
                "effects": {"status": {"status": status}},
                "events": [{
                    "type": format!("{}::flag::FlagEvent", PACKAGE),
                    "parsedJson": {"github_id": github_id, "flag": FLAG}
                }]
            }
        })
    }

    fn mock_ledger(server: &MockServer, body: serde_json::Value) {
        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(body);
        });
    }

    async fn deployed_app(server: &MockServer) -> TestApp {
        let app = TestApp::new(
            ChallengeMode::Contract,
            server.url("/"),
            Arc::new(FakePublisher::succeeding(PACKAGE, "publishdigest")),
        );
        let (status, _) = app.start_challenge().await;
        assert_eq!(status, StatusCode::OK);
        app
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new(
            ChallengeMode::Basic,
            "http://127.0.0.1:65534".to_string(),
            Arc::new(FakePublisher::succeeding(PACKAGE, "d")),
        );
        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_show_form_before_deploy() {
        let app = TestApp::new(
            ChallengeMode::Contract,
            "http://127.0.0.1:65534".to_string(),
            Arc::new(FakePublisher::succeeding(PACKAGE, "d")),
        );
        let (status, body) = app.get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("octocat"));
        assert!(body.contains("not deployed"));
        assert!(body.contains("Start challenge"));
        assert!(!body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_scenario_a_full_success_discloses_token() {
        let server = MockServer::start();
        mock_ledger(&server, transaction("success", "octocat"));
        let app = deployed_app(&server).await;

        let (status, body) = app
            .submit(&format!("tx_digest=9xQfTk1&contract_flag_input={}", FLAG_FORM))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("All checks passed"));
        assert!(body.contains(TOKEN));
        assert!(body.contains(PACKAGE));
    }

    #[tokio::test]
    async fn test_scenario_b_failed_execution_hides_token() {
        let server = MockServer::start();
        mock_ledger(&server, transaction("failure", "octocat"));
        let app = deployed_app(&server).await;

        let (_, body) = app
            .submit(&format!("tx_digest=9xQfTk1&contract_flag_input={}", FLAG_FORM))
            .await;
        assert!(body.contains("did not succeed"));
        assert!(!body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_scenario_c_rpc_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(transaction("success", "octocat"));
        });
        let app = deployed_app(&server).await;

        let (status, body) = app
            .submit(&format!("tx_digest=9xQfTk1&contract_flag_input={}", FLAG_FORM))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("could not fetch transaction details"));
        assert!(!body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_rpc_error_envelope_is_rejected() {
        let server = MockServer::start();
        mock_ledger(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "bad digest"}}),
        );
        let app = deployed_app(&server).await;

        let (_, body) = app
            .submit(&format!("tx_digest=bogus&contract_flag_input={}", FLAG_FORM))
            .await;
        assert!(body.contains("could not fetch transaction details"));
        assert!(!body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_participant_mismatch_hides_token() {
        let server = MockServer::start();
        mock_ledger(&server, transaction("success", "someone-else"));
        let app = deployed_app(&server).await;

        let (_, body) = app
            .submit(&format!("tx_digest=9xQfTk1&contract_flag_input={}", FLAG_FORM))
            .await;
        assert!(body.contains("participant id mismatch"));
        assert!(body.contains("someone-else"));
        assert!(!body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_wrong_flag_with_valid_transaction() {
        let server = MockServer::start();
        mock_ledger(&server, transaction("success", "octocat"));
        let app = deployed_app(&server).await;

        let (_, body) = app
            .submit("tx_digest=9xQfTk1&contract_flag_input=CTF%7Bwrong%7D")
            .await;
        assert!(
            body.contains("Transaction verified, but the submitted contract flag is incorrect")
        );
        assert!(!body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_empty_digest_makes_no_rpc_call() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).json_body(transaction("success", "octocat"));
        });
        let app = deployed_app(&server).await;

        let (status, body) = app
            .submit(&format!("tx_digest=%20%20&contract_flag_input={}", FLAG_FORM))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("must not be empty"));
        assert!(!body.contains(TOKEN));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn test_submission_before_deploy_makes_no_rpc_call() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).json_body(transaction("success", "octocat"));
        });
        let app = TestApp::new(
            ChallengeMode::Contract,
            server.url("/"),
            Arc::new(FakePublisher::succeeding(PACKAGE, "d")),
        );

        let (_, body) = app
            .submit(&format!("tx_digest=9xQfTk1&contract_flag_input={}", FLAG_FORM))
            .await;
        assert!(body.contains("has not been deployed"));
        assert!(!body.contains(TOKEN));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn test_basic_mode_success_without_contract() {
        let server = MockServer::start();
        mock_ledger(
            &server,
            json!({"result": {
                "effects": {"status": {"status": "success"}},
                "events": [{"type": "0x1::week1::Solved", "parsedJson": {"github_id": "octocat"}}]
            }}),
        );
        let app = TestApp::new(
            ChallengeMode::Basic,
            server.url("/"),
            Arc::new(FakePublisher::succeeding(PACKAGE, "d")),
        );

        let (_, body) = app
            .submit(&format!("tx_digest=9xQfTk1&contract_flag_input={}", FLAG_FORM))
            .await;
        assert!(body.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_basic_mode_has_no_start_challenge_route() {
        let app = TestApp::new(
            ChallengeMode::Basic,
            "http://127.0.0.1:65534".to_string(),
            Arc::new(FakePublisher::succeeding(PACKAGE, "d")),
        );
        let req = Request::builder()
            .method(Method::POST)
            .uri("/start_challenge")
            .body(Body::empty())
            .unwrap();
        let (status, _) = app.send(req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(app.state.deployment.is_none());
    }

    #[tokio::test]
    async fn test_scenario_d_second_start_uses_cache() {
        let publisher = Arc::new(FakePublisher::succeeding(PACKAGE, "publishdigest"));
        let app = TestApp::new(
            ChallengeMode::Contract,
            "http://127.0.0.1:65534".to_string(),
            publisher.clone(),
        );

        let (status, first) = app.start_challenge().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first.status, "success");
        assert_eq!(first.message, "contract deployed");

        let (status, second) = app.start_challenge().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second.message, "contract already deployed");
        assert_eq!(second.package_id.as_deref(), Some(PACKAGE));
        assert_eq!(second.transaction_hash.as_deref(), Some("publishdigest"));
        assert_eq!(publisher.calls(), 1);

        let (_, page) = app.get("/").await;
        assert!(page.contains("publishdigest"));
    }

    #[tokio::test]
    async fn test_scenario_e_tool_failure_returns_error() {
        let publisher = Arc::new(FakePublisher::failing("Error: insufficient gas"));
        let app = TestApp::new(
            ChallengeMode::Contract,
            "http://127.0.0.1:65534".to_string(),
            publisher,
        );

        let (status, body) = app.start_challenge().await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.status, "error");
        assert!(body.message.contains("insufficient gas"));
        assert_eq!(body.details.as_deref(), Some("Error: insufficient gas"));
        assert!(body.package_id.is_none());
    }
}
