//! Gateway server: REST surface over the registry, dispatcher,
//! orchestrator, workflow engine, and observability stores.

use crate::auth::ResolvedAuth;
use crate::rate::RateGuard;
use agentmesh_core::{
    AgentKind, AgentStatus, AlertState, Caller, Error, ErrorKind, IoSchema, Result, WorkflowKind,
};
use agentmesh_observability::{AlertEngine, MetricStore, TraceRecorder};
use agentmesh_registry::{
    AgentDraft, AgentUpdate, CapabilityEngine, IntegrationFacade, Registry, SecretVault,
    SnapshotFormat, TemplateStore, WorkflowStep,
};
use agentmesh_runtime::{
    Dispatcher, HealthMonitor, InvokeParams, Orchestrator, WorkflowEngine,
};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

pub struct AppState {
    pub auth: ResolvedAuth,
    pub rate: RateGuard,
    pub registry: Arc<Registry>,
    pub templates: Arc<TemplateStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub workflows: Arc<WorkflowEngine>,
    pub orchestrator: Arc<Orchestrator>,
    pub capabilities: Arc<CapabilityEngine>,
    pub health: Arc<HealthMonitor>,
    pub traces: Arc<TraceRecorder>,
    pub metrics: Arc<MetricStore>,
    pub alerts: Arc<AlertEngine>,
    pub integration: Arc<IntegrationFacade>,
    /// None when no master secret is configured.
    pub secrets: Option<Arc<SecretVault>>,
    pub started_at: std::time::Instant,
}

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

pub async fn start_gateway(state: Arc<AppState>, settings: GatewaySettings) -> anyhow::Result<()> {
    let app = router(state);

    let bind_addr: SocketAddr = format!("{}:{}", settings.bind, settings.port).parse()?;
    info!("agentmesh gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  listening on: {bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/agents", post(create_agent).get(list_agents))
        .route(
            "/agents/:id",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route("/agents/:id/invoke", post(invoke_agent))
        .route("/agents/:id/deploy", post(deploy_agent))
        .route("/agents/:id/stop", post(stop_agent))
        .route("/agents/:id/scale", post(scale_agent))
        .route("/agents/:id/revert", post(revert_agent))
        .route("/agents/:id/versions", get(agent_versions))
        .route("/agents/:id/capabilities", get(agent_capabilities))
        .route("/agents/:id/health", get(agent_health))
        .route("/agents/:id/logs", get(agent_logs))
        .route("/agents/:id/traces", get(agent_traces))
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/:id/execute", post(execute_workflow))
        .route("/executions/:id", get(get_execution))
        .route("/executions/:id/cancel", post(cancel_execution))
        .route("/traces/:id", get(get_trace))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/silence", post(silence_alert))
        .route("/secrets", post(create_secret).get(list_secrets))
        .route("/secrets/:id", axum::routing::delete(delete_secret))
        .route("/export", get(export_snapshot))
        .route("/import", post(import_snapshot))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

// ----------------------------------------------------------------------
// Error mapping

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::BadInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict | ErrorKind::InUse => StatusCode::CONFLICT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::External => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Rate guard, bearer check, and caller resolution for every request.
fn authorize(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> Result<Caller> {
    if !state.rate.check(addr.ip()) {
        return Err(Error::Overloaded("rate limit exceeded".to_string()));
    }
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    state.auth.verify_token(bearer)?;
    let user = headers.get("x-user-id").and_then(|v| v.to_str().ok());
    state.auth.caller_from_header(user)
}

// ----------------------------------------------------------------------
// Request bodies

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    kind: Option<AgentKind>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    configuration: BTreeMap<String, Value>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    skills: Vec<Uuid>,
    #[serde(default)]
    tools: Vec<Uuid>,
    #[serde(default)]
    constraints: Vec<Uuid>,
    #[serde(default)]
    input_schema: Option<IoSchema>,
    #[serde(default)]
    output_schema: Option<IoSchema>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    template_id: Option<Uuid>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    probe_url: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateAgentRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    configuration: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
    #[serde(default)]
    skills: Option<Vec<Uuid>>,
    #[serde(default)]
    tools: Option<Vec<Uuid>>,
    #[serde(default)]
    constraints: Option<Vec<Uuid>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    changelog: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    input: Value,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    trace_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    replicas: u32,
}

#[derive(Debug, Deserialize)]
struct RevertRequest {
    version: String,
}

#[derive(Debug, Deserialize)]
struct CreateWorkflowRequest {
    name: String,
    kind: WorkflowKind,
    steps: Vec<WorkflowStep>,
}

#[derive(Debug, Deserialize)]
struct ExecuteWorkflowRequest {
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct SilenceRequest {
    /// Minutes from now.
    duration_min: i64,
}

#[derive(Debug, Deserialize)]
struct ListAgentsQuery {
    #[serde(default)]
    status: Option<AgentStatus>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    all: bool,
}

#[derive(Debug, Deserialize)]
struct FormatQuery {
    #[serde(default)]
    format: Option<String>,
}

fn snapshot_format(query: &FormatQuery) -> Result<SnapshotFormat> {
    match query.format.as_deref() {
        None | Some("json") => Ok(SnapshotFormat::Json),
        Some("yaml") | Some("yml") => Ok(SnapshotFormat::Yaml),
        Some(other) => Err(Error::bad_input(format!("unknown format '{other}'"))),
    }
}

// ----------------------------------------------------------------------
// Handlers

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state
        .registry
        .list_agents(None, Some(AgentStatus::Active), None)
        .len();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_agents": active,
        "active_alerts": state.alerts.alerts(Some(AlertState::Active)).len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.create_agent(
        caller.user_id,
        AgentDraft {
            name: body.name,
            display_name: body.display_name,
            description: body.description,
            kind: body.kind,
            model: body.model,
            system_prompt: body.system_prompt,
            configuration: body.configuration,
            capabilities: body.capabilities,
            skills: body.skills,
            tools: body.tools,
            constraints: body.constraints,
            input_schema: body.input_schema,
            output_schema: body.output_schema,
            tags: body.tags,
            template_id: body.template_id,
            endpoint: body.endpoint,
            probe_url: body.probe_url,
            auth_token: body.auth_token,
        },
    )?;
    Ok((StatusCode::CREATED, Json(agent)).into_response())
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let owner = if query.all && caller.admin {
        None
    } else {
        Some(caller.user_id)
    };
    let agents = state
        .registry
        .list_agents(owner, query.status, query.tag.as_deref());
    Ok(Json(agents).into_response())
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    Ok(Json(agent).into_response())
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAgentRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let (agent, warnings) = state.registry.update_agent(
        id,
        AgentUpdate {
            name: body.name,
            display_name: body.display_name,
            description: body.description,
            model: body.model,
            system_prompt: body.system_prompt,
            configuration: body.configuration,
            capabilities: body.capabilities,
            skills: body.skills,
            tools: body.tools,
            constraints: body.constraints,
            tags: body.tags,
            changelog: body.changelog,
            ..Default::default()
        },
        &caller,
    )?;
    Ok(Json(json!({"agent": agent, "warnings": warnings})).into_response())
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    state.orchestrator.stop(id).await.ok();
    state.registry.delete_agent(id, &caller)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn invoke_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<InvokeRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let response = state
        .dispatcher
        .invoke(
            id,
            InvokeParams {
                input: body.input,
                session_id: body.session_id,
                trace_id: body.trace_id,
            },
            &caller,
            CancellationToken::new(),
        )
        .await?;
    Ok(Json(response).into_response())
}

async fn deploy_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    state.orchestrator.deploy(id).await?;
    Ok(Json(state.registry.get_agent(id)?).into_response())
}

async fn stop_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    state.orchestrator.stop(id).await?;
    Ok(Json(state.registry.get_agent(id)?).into_response())
}

async fn scale_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ScaleRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    state.orchestrator.scale(id, body.replicas).await?;
    Ok(Json(json!({
        "agent_id": id,
        "desired_replicas": body.replicas,
        "ready_replicas": state.orchestrator.replica_count(id),
    }))
    .into_response())
}

async fn revert_agent(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RevertRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.revert_agent(id, &body.version, &caller)?;
    Ok(Json(agent).into_response())
}

async fn agent_versions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    Ok(Json(state.registry.versions(id)).into_response())
}

async fn agent_capabilities(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    authorize(&state, &headers, addr)?;
    let capabilities = state.capabilities.discover(id)?;
    Ok(Json(capabilities).into_response())
}

async fn agent_health(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    Ok(Json(json!({
        "agent_id": id,
        "status": agent.status,
        "consecutive_failures": state.health.consecutive_failures(id),
        "history": state.health.health_history(id, 50),
        "deployment": state.orchestrator.deployment_status(id),
    }))
    .into_response())
}

async fn agent_logs(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    Ok(Json(state.orchestrator.worker_logs(id, 100)).into_response())
}

async fn agent_traces(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let agent = state.registry.get_agent(id)?;
    if !caller.may_act_on(agent.owner) {
        return Err(Error::forbidden("not your agent").into());
    }
    Ok(Json(state.traces.list_recent(&id.to_string(), 50)).into_response())
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateWorkflowRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let workflow =
        state
            .registry
            .create_workflow(caller.user_id, body.name, body.kind, body.steps)?;
    Ok((StatusCode::CREATED, Json(workflow)).into_response())
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let owner = if caller.admin {
        None
    } else {
        Some(caller.user_id)
    };
    Ok(Json(state.registry.list_workflows(owner)).into_response())
}

async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecuteWorkflowRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let execution_id = state.workflows.execute(id, body.input, caller)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"execution_id": execution_id})),
    )
        .into_response())
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    authorize(&state, &headers, addr)?;
    let execution = state
        .workflows
        .get(id)
        .ok_or_else(|| Error::not_found(format!("execution {id}")))?;
    Ok(Json(execution).into_response())
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    state.workflows.stop(id, &caller)?;
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn get_trace(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let trace = state
        .traces
        .get(id)
        .ok_or_else(|| Error::not_found(format!("trace {id}")))?;
    // Traces carry raw payloads; only the owning agent's owner (or an
    // admin) may read them. An entity that is not a known agent id is
    // not served to non-admins.
    if !caller.admin {
        let owner = trace
            .entity
            .parse::<Uuid>()
            .ok()
            .and_then(|agent_id| state.registry.get_agent(agent_id).ok())
            .map(|agent| agent.owner)
            .ok_or_else(|| Error::forbidden("trace entity is not readable"))?;
        if !caller.may_act_on(owner) {
            return Err(Error::forbidden("not your trace").into());
        }
    }
    Ok(Json(trace).into_response())
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    authorize(&state, &headers, addr)?;
    Ok(Json(state.alerts.alerts(None)).into_response())
}

async fn silence_alert(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<SilenceRequest>,
) -> ApiResult<Response> {
    authorize(&state, &headers, addr)?;
    let until = Utc::now() + chrono::Duration::minutes(body.duration_min);
    state.alerts.silence(id, until)?;
    Ok(Json(json!({"silenced_until": until})).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateSecretRequest {
    name: String,
    value: String,
}

fn vault(state: &AppState) -> Result<&Arc<SecretVault>> {
    state
        .secrets
        .as_ref()
        .ok_or_else(|| Error::unavailable("secret storage is not configured"))
}

/// Stores the sealed value; the plaintext is never persisted or echoed.
async fn create_secret(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateSecretRequest>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let id = vault(&state)?.put(caller.user_id, body.name, &body.value)?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))).into_response())
}

async fn list_secrets(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let entries: Vec<Value> = vault(&state)?
        .list(caller.user_id)
        .into_iter()
        .map(|(id, name)| json!({"id": id, "name": name}))
        .collect();
    Ok(Json(entries).into_response())
}

async fn delete_secret(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    vault(&state)?.delete(id, &caller)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn export_snapshot(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<FormatQuery>,
) -> ApiResult<Response> {
    authorize(&state, &headers, addr)?;
    let format = snapshot_format(&query)?;
    let text = state.integration.export_to_string(format)?;
    let content_type = match format {
        SnapshotFormat::Json => "application/json",
        SnapshotFormat::Yaml => "application/yaml",
    };
    Ok(([(axum::http::header::CONTENT_TYPE, content_type)], text).into_response())
}

async fn import_snapshot(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<FormatQuery>,
    body: String,
) -> ApiResult<Response> {
    let caller = authorize(&state, &headers, addr)?;
    let format = snapshot_format(&query)?;
    let snapshot = IntegrationFacade::parse_snapshot(&body, format)?;
    let report = state.integration.import(caller.user_id, snapshot);
    Ok(Json(report).into_response())
}
