#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use warden::aggregator::ResultAggregator;
use warden::audit::AuditLog;
use warden::config::{EngineConfig, SafetyConfig};
use warden::db::Database;
use warden::errors::WardenError;
use warden::events::{ChannelNotifier, Notifier, ScanEvent};
use warden::llm::{ChatMessage, ChatResponse, LLMProvider, StopReason, ToolCall, ToolSchema};
use warden::pipeline::{ScanEngine, ScanService};
use warden::process::{CommandPolicy, ProcessBackend, ProcessExecutor, ProcessOutput, ProcessRequest};
use warden::queue::{LocalQueue, ScanWorker};
use warden::safety::{ResourceMonitor, ResourceSnapshot, SafetyGate};
use warden::tools::ToolRegistry;

/// How the fake backend answers one binary.
#[derive(Clone)]
pub enum Reply {
    Stdout(String),
    Timeout,
    Hang,
}

/// Answers by binary name; anything unscripted exits 127.
#[derive(Default)]
pub struct FakeBackend {
    replies: Mutex<HashMap<String, Reply>>,
    pub calls: AtomicU32,
    pub argvs: Mutex<Vec<Vec<String>>>,
}

impl FakeBackend {
    pub fn reply(self, binary: &str, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(binary.to_string(), reply);
        self
    }
}

#[async_trait]
impl ProcessBackend for FakeBackend {
    async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, WardenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.argvs.lock().unwrap().push(request.argv.clone());
        let reply = self.replies.lock().unwrap().get(&request.argv[0]).cloned();
        match reply {
            Some(Reply::Stdout(stdout)) => Ok(ProcessOutput { stdout, exit_code: Some(0), ..Default::default() }),
            Some(Reply::Timeout) => Err(WardenError::CommandTimeout { secs: request.timeout.as_secs(), stdout: String::new() }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProcessOutput { exit_code: Some(0), ..Default::default() })
            }
            None => Ok(ProcessOutput { exit_code: Some(127), stderr: "command not found".into(), ..Default::default() }),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub struct SteadyMonitor(pub ResourceSnapshot);

impl SteadyMonitor {
    pub fn idle() -> Self {
        Self(ResourceSnapshot { cpu_percent: 5.0, memory_percent: 30.0, disk_free_gb: 50.0 })
    }
}

#[async_trait]
impl ResourceMonitor for SteadyMonitor {
    async fn sample(&self) -> Result<ResourceSnapshot, WardenError> {
        Ok(self.0)
    }
}

/// One nuclei JSONL line reporting `cve` against `host`.
pub fn nuclei_hit(cve: &str, host: &str) -> String {
    json!({
        "template-id": cve.to_lowercase(),
        "info": {
            "name": format!("{} path traversal", cve),
            "severity": "critical",
            "classification": {"cve-id": [cve.to_lowercase()], "cvss-score": 9.8}
        },
        "host": host,
        "matched-at": format!("http://{}/cgi-bin/", host)
    })
    .to_string()
}

pub struct Stack {
    pub db: Database,
    pub backend: Arc<FakeBackend>,
    pub engine: Arc<ScanEngine>,
    pub notifier: Arc<dyn Notifier>,
    pub events: UnboundedReceiver<ScanEvent>,
}

impl Stack {
    pub fn new(backend: FakeBackend, safety: SafetyConfig, engine: EngineConfig) -> Self {
        Self::with_monitor(backend, safety, engine, SteadyMonitor::idle())
    }

    pub fn with_monitor(backend: FakeBackend, safety: SafetyConfig, engine: EngineConfig, monitor: SteadyMonitor) -> Self {
        Self::build(backend, safety, engine, monitor, None)
    }

    /// Default limits with the audit log written under `dir`.
    pub async fn audited(backend: FakeBackend, dir: &Path) -> Self {
        let audit = Arc::new(AuditLog::open(dir).await.unwrap());
        Self::build(backend, SafetyConfig::default(), EngineConfig::default(), SteadyMonitor::idle(), Some(audit))
    }

    fn build(
        backend: FakeBackend,
        safety: SafetyConfig,
        engine: EngineConfig,
        monitor: SteadyMonitor,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        let db = Database::in_memory().unwrap();
        let backend = Arc::new(backend);
        let executor = Arc::new(ProcessExecutor::new(CommandPolicy::default(), backend.clone()));
        let (notifier, events) = ChannelNotifier::new();
        let notifier: Arc<dyn Notifier> = Arc::new(notifier);
        let aggregator = Arc::new(ResultAggregator::new(Arc::new(db.clone()), notifier.clone()));
        let gate = Arc::new(SafetyGate::new(safety, Arc::new(monitor)).unwrap());
        let mut engine = ScanEngine::new(ToolRegistry::new(executor), gate, aggregator, notifier.clone(), engine);
        if let Some(audit) = audit {
            engine = engine.with_audit(audit);
        }
        let engine = Arc::new(engine);
        Self { db, backend, engine, notifier, events }
    }

    /// Service over an in-process queue driven by `worker` (the engine when `None`).
    pub fn service(&self, worker: Option<Arc<dyn ScanWorker>>) -> (ScanService, Arc<LocalQueue>) {
        let worker = match worker {
            Some(worker) => worker,
            None => self.engine.clone() as Arc<dyn ScanWorker>,
        };
        let queue = Arc::new(LocalQueue::new(worker, 2));
        let service = ScanService::new(
            self.engine.gate().clone(),
            self.engine.aggregator().clone(),
            queue.clone(),
            self.notifier.clone(),
        );
        (service, queue)
    }

    pub fn drain_events(&mut self) -> Vec<ScanEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Replays canned provider replies, then answers in plain text forever.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ChatResponse>>,
    pub calls: AtomicU32,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), calls: AtomicU32::new(0) })
    }
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    async fn chat_with_tools(&self, _: &[ChatMessage], _: &[ToolSchema], _: &str) -> Result<ChatResponse, WardenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_else(|| say("Let me think about this some more")))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }
}

pub fn say(text: &str) -> ChatResponse {
    ChatResponse {
        text: text.into(),
        tool_calls: vec![],
        stop_reason: StopReason::EndTurn,
        input_tokens: None,
        output_tokens: None,
        model: "scripted-1".into(),
    }
}

pub fn use_tool(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse {
        text: String::new(),
        tool_calls: vec![ToolCall { id: format!("call-{}", name), name: name.into(), arguments }],
        stop_reason: StopReason::ToolUse,
        input_tokens: None,
        output_tokens: None,
        model: "scripted-1".into(),
    }
}
