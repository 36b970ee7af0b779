use std::sync::Arc;
use std::time::Duration;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use crate::config::AgentConfig;
use crate::errors::WardenError;
use crate::llm::{ChatMessage, ContentBlock, LLMProvider, ToolSchema};
use crate::pipeline::{ScanEngine, ScanRequest, ScanService};
use crate::session::{Authenticator, SessionStore};
use crate::utils::truncation::truncate_chars;
use super::session::{AgentReport, AgentSession};
use super::tools::{tool_schemas, AgentTool};

const STDOUT_CHARS: usize = 5000;
const STDERR_CHARS: usize = 1000;

const SYSTEM_PROMPT: &str = "You are an autonomous penetration testing assistant working against \
targets the operator is authorized to test.

Rules:
1. Call exactly one tool per response.
2. Log in before starting or inspecting platform scans.
3. After three to five tool calls, call task_complete with a summary of what you found.
4. Keep explanations short; act through the tools.

Start by finding exposed services, then look for known vulnerabilities and weak credentials.";

const NUDGE: &str = "No tool was selected. Choose one of the available tools, \
or call task_complete if the task is finished.";

/// LLM-directed tool loop. Every command it runs goes through the same
/// registry, process executor and safety gate as scan tools.
pub struct AgentLoop {
    provider: Arc<dyn LLMProvider>,
    engine: Arc<ScanEngine>,
    service: Arc<ScanService>,
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<dyn SessionStore>,
    config: AgentConfig,
    scan_id: Option<String>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        engine: Arc<ScanEngine>,
        service: Arc<ScanService>,
        authenticator: Arc<dyn Authenticator>,
        sessions: Arc<dyn SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self { provider, engine, service, authenticator, sessions, config, scan_id: None }
    }

    /// Fold results of the named security tools into this scan.
    pub fn with_scan(mut self, scan_id: &str) -> Self {
        self.scan_id = Some(scan_id.to_string());
        self
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    pub async fn run(&self, task: &str) -> Result<AgentReport, WardenError> {
        if self.config.max_iterations == 0 {
            return Err(WardenError::Config("agent.max_iterations must be at least 1".into()));
        }
        let schemas: Vec<ToolSchema> = tool_schemas();
        let mut session = AgentSession::new(task);
        info!(
            provider = self.provider.provider_name(),
            model = self.provider.model_name(),
            max_iterations = self.config.max_iterations,
            "Agent session started"
        );

        while !session.is_terminated() && session.iterations < self.config.max_iterations {
            session.iterations += 1;
            self.step(&mut session, &schemas).await;
        }

        let report = session.into_report(self.provider.provider_name(), self.provider.model_name());
        info!(
            complete = report.complete,
            termination = ?report.termination,
            iterations = report.iterations,
            tool_calls = report.tool_calls.len(),
            "Agent session finished"
        );
        if let Some(audit) = self.engine.audit() {
            match serde_json::to_value(&report) {
                Ok(data) => audit.record("agent_session", data).await,
                Err(e) => warn!(error = %e, "Could not serialize agent report for audit"),
            }
        }
        Ok(report)
    }

    /// One provider call and at most one tool execution.
    async fn step(&self, session: &mut AgentSession, schemas: &[ToolSchema]) {
        let iteration = session.iterations;
        let response = match self.provider.chat_with_tools(&session.messages, schemas, SYSTEM_PROMPT).await {
            Ok(response) => response,
            Err(e) => {
                warn!(iteration, error = %e, "Agent provider call failed");
                session.fail(&e.to_string());
                return;
            }
        };

        let text = response.text.trim().to_string();
        if !text.is_empty() {
            session.last_text = Some(text.clone());
        }

        let Some(call) = response.tool_calls.first().cloned() else {
            debug!(iteration, "Text-only reply, nudging for a tool call");
            let reply = if text.is_empty() { "(no response)".to_string() } else { text };
            session.messages.push(ChatMessage::assistant(vec![ContentBlock::Text { text: reply }]));
            session.messages.push(ChatMessage::user(NUDGE));
            return;
        };
        if response.tool_calls.len() > 1 {
            warn!(iteration, ignored = response.tool_calls.len() - 1, "Only the first tool call per reply is executed");
        }

        let mut blocks = Vec::new();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
        blocks.push(ContentBlock::ToolUse { id: call.id.clone(), name: call.name.clone(), input: call.arguments.clone() });
        session.messages.push(ChatMessage::assistant(blocks));

        info!(iteration, tool = %call.name, "Agent selected tool");
        let (output, is_error) = match AgentTool::parse(&call) {
            Ok(AgentTool::TaskComplete { summary, findings_count, critical_findings }) => {
                session.log_call(&call.name, &redacted(&call.arguments), &summary, false);
                session.complete(&summary, findings_count, critical_findings);
                return;
            }
            Ok(tool) => match self.dispatch(session, tool).await {
                Ok(value) => (value, false),
                Err(e) => {
                    warn!(iteration, tool = %call.name, error = %e, "Agent tool failed");
                    (json!({"error": e.to_string()}), true)
                }
            },
            Err(e) => (json!({"error": e.to_string()}), true),
        };

        let rendered = output.to_string();
        session.log_call(&call.name, &redacted(&call.arguments), &rendered, is_error);
        session.messages.push(ChatMessage::tool_result(&call.id, &rendered));
    }

    async fn dispatch(&self, session: &mut AgentSession, tool: AgentTool) -> Result<Value, WardenError> {
        if let Some(invocation) = tool.runner_invocation() {
            let (runner, target, options) = invocation?;
            return self.run_named(runner, target, options).await;
        }

        match tool {
            AgentTool::Login { username, password } => {
                let principal = self.authenticator.authenticate(&username, &password).await?;
                let login = self.sessions.create(&principal).await?;
                session.login_token = Some(login.token);
                info!(principal = %principal, "Agent logged in");
                Ok(json!({
                    "status": "authenticated",
                    "principal": principal,
                    "expires_at": login.expires_at.to_rfc3339(),
                }))
            }
            AgentTool::StartAutomatedScan { name, targets, scan_type } => {
                let principal = self.principal(session).await?;
                let scan = self.service.submit(ScanRequest::new(&name, targets, scan_type), &principal).await?;
                Ok(json!({
                    "scan_id": scan.id,
                    "name": scan.name,
                    "status": scan.status,
                    "targets": scan.targets,
                }))
            }
            AgentTool::GetScanStatus { scan_id } => {
                let principal = self.principal(session).await?;
                let summary = self.service.status(&scan_id).await?;
                if summary.scan.principal != principal {
                    return Err(WardenError::Permission(format!("scan {} belongs to another principal", scan_id)));
                }
                let findings: Vec<Value> = summary.findings.iter()
                    .take(20)
                    .map(|f| json!({"title": f.title, "severity": f.severity, "target": f.target, "status": f.status}))
                    .collect();
                Ok(json!({
                    "scan_id": summary.scan.id,
                    "status": summary.scan.status,
                    "progress": summary.scan.progress_percent,
                    "counts": summary.counts(),
                    "error": summary.scan.error_message,
                    "findings": findings,
                }))
            }
            AgentTool::ShellCommand { command } => {
                let executor = self.engine.registry().executor();
                let segments = executor.policy().parse_shell(&command)?;
                self.engine.gate().validate_command(&segments)?;
                self.engine.gate().check_resources().await?;
                let output = executor.run_shell(&command, self.command_timeout()).await?;
                Ok(process_reply(&output.exit_code, &output.stdout, &output.stderr))
            }
            AgentTool::TaskComplete { .. } | AgentTool::RunNmap { .. } | AgentTool::RunNuclei { .. } | AgentTool::RunHydra { .. } => {
                Err(WardenError::Internal("tool handled outside dispatch".into()))
            }
        }
    }

    async fn principal(&self, session: &AgentSession) -> Result<String, WardenError> {
        let token = session
            .login_token
            .as_deref()
            .ok_or_else(|| WardenError::Authentication("login is required before using scan tools".into()))?;
        self.sessions
            .resolve(token)
            .await?
            .map(|s| s.principal)
            .ok_or_else(|| WardenError::Authentication("session expired, login again".into()))
    }

    /// Run a registry tool against one gate-approved target.
    async fn run_named(&self, tool: &str, target: String, options: Value) -> Result<Value, WardenError> {
        let gate = self.engine.gate();
        gate.validate_target(&target)?;
        gate.check_resources().await?;

        let runner = self.engine.registry().get(tool)?;
        let targets = vec![target];
        if !runner.validate(&targets, &options) {
            return Err(WardenError::CommandRejected(format!("{}: invalid target or options", tool)));
        }
        let result = runner.execute(&targets, &options, self.command_timeout()).await?;
        if let Some(audit) = self.engine.audit() {
            audit.record_tool_result(self.scan_id.as_deref(), &result).await;
        }

        let mut reply = process_reply(&result.exit_code, &result.stdout, &result.stderr);
        reply["parsed"] = json!({
            "hosts": result.payload.hosts.len(),
            "vulnerabilities": result.payload.vulnerabilities.len(),
            "credentials": result.payload.credentials.len(),
        });
        if let Some(scan_id) = &self.scan_id {
            let outcome = self.engine.aggregator().aggregate(scan_id, &result).await?;
            reply["new_findings"] = json!(outcome.created.len());
        }
        Ok(reply)
    }
}

/// Arguments as they go into the tool-call log; passwords are masked.
fn redacted(arguments: &Value) -> Value {
    let mut logged = arguments.clone();
    if let Some(password) = logged.get_mut("password") {
        *password = json!("***");
    }
    logged
}

fn process_reply(exit_code: &Option<i32>, stdout: &str, stderr: &str) -> Value {
    json!({
        "exit_code": exit_code,
        "stdout": truncate_chars(stdout, STDOUT_CHARS),
        "stderr": truncate_chars(stderr, STDERR_CHARS),
    })
}
