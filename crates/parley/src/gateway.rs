use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};

use crate::agents::{AgentDescriptor, AgentRegistry, BackendKind, ResolvedAgent};
use crate::backends::{Backend, BackendRequest, CloudBackend, DeltaStream, LocalBackend};
use crate::errors::{GatewayError, GatewayResult};
use crate::history::{trim_history, HistoryStore, Message, Role};
use crate::history::{DEFAULT_RECALL_WINDOW, DEFAULT_TRIM_BUDGET};
use crate::personas::PersonaTable;

/// How often the streaming loop wakes to notice a disconnected client.
const HEARTBEAT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub trim_budget: usize,
    pub recall_window: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            trim_budget: DEFAULT_TRIM_BUDGET,
            recall_window: DEFAULT_RECALL_WINDOW,
        }
    }
}

/// An inbound chat request, already parsed off the wire.
#[derive(Debug, Clone, Default)]
pub struct ChatCall {
    /// Logical agent name; the registry default applies when absent.
    pub to: Option<String>,
    pub text: String,
    /// Pre-built history overriding assembly.
    pub messages: Option<Vec<Message>>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChatReply {
    pub from: String,
    pub text: String,
}

/// One unit of the streaming response: a fragment, normal completion, or a
/// failure after the stream already started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Delta(String),
    Done,
    Failed(String),
}

/// A request that passed resolution and assembly and is ready to dispatch.
///
/// Holds the per-agent-key lock (when memory is on) so concurrent exchanges
/// against the same key queue instead of racing on the history record.
#[derive(Debug)]
pub struct PreparedExchange {
    agent: AgentDescriptor,
    persist_base: Vec<Message>,
    request: BackendRequest,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl PreparedExchange {
    pub fn agent(&self) -> &AgentDescriptor {
        &self.agent
    }

    /// The exact messages the backend will see.
    pub fn request_messages(&self) -> &[Message] {
        &self.request.messages
    }
}

/// Routes chat requests to backend adapters and owns the history lifecycle:
/// load, persona injection, append, trim, persist.
pub struct ChatGateway {
    registry: AgentRegistry,
    personas: PersonaTable,
    store: Arc<dyn HistoryStore>,
    local: LocalBackend,
    cloud: CloudBackend,
    config: GatewayConfig,
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChatGateway {
    pub fn new(
        registry: AgentRegistry,
        personas: PersonaTable,
        store: Arc<dyn HistoryStore>,
        local: LocalBackend,
        cloud: CloudBackend,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            personas,
            store,
            local,
            cloud,
            config,
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Sorted logical agent names.
    pub fn agents(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Last `recall_window` persisted messages for an agent key.
    pub async fn recent_messages(&self, agent: &str) -> GatewayResult<Vec<Message>> {
        let mut history = self.store.load(agent).await?;
        cap_to_window(&mut history, self.config.recall_window);
        Ok(history)
    }

    /// Whether the local backend answers its liveness probe.
    pub async fn backend_health(&self) -> bool {
        self.local.ping().await
    }

    fn adapter(&self, kind: BackendKind) -> &dyn Backend {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Cloud => &self.cloud,
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    /// RESOLVE and ASSEMBLE: map the call to an agent, build and trim its
    /// prompt history, and take the per-key lock. No side effects yet;
    /// persistence waits until the backend reply is known.
    pub async fn prepare(&self, call: ChatCall) -> GatewayResult<PreparedExchange> {
        let name = call
            .to
            .unwrap_or_else(|| self.registry.default_agent().to_string());
        let ResolvedAgent {
            persona_tag,
            descriptor: agent,
        } = self.registry.resolve(&name, false)?;

        let user_text = call.text.trim().to_string();

        let guard = if agent.memory {
            Some(self.key_lock(&agent.name).await.lock_owned().await)
        } else {
            None
        };

        let stored = if agent.memory {
            let mut history = self.store.load(&agent.name).await?;
            cap_to_window(&mut history, self.config.recall_window);
            history
        } else {
            Vec::new()
        };

        let (messages, persist_base) = if agent.fixed_prompt.is_some() {
            // The stored prompt lives server-side; only the raw input goes
            // up. The exchange is still recorded against the agent's memory.
            if user_text.is_empty() {
                return Err(GatewayError::EmptyInput);
            }
            let mut base = stored;
            base.push(Message::user(&user_text));
            trim_history(&mut base, self.config.trim_budget);
            (Vec::new(), base)
        } else if let Some(mut provided) = call.messages {
            if !has_system(&provided) {
                provided.insert(0, Message::system(self.personas.text_for(&persona_tag)));
            }
            (provided.clone(), provided)
        } else {
            if user_text.is_empty() {
                return Err(GatewayError::EmptyInput);
            }
            let mut history = stored;
            if !has_system(&history) {
                history.insert(0, Message::system(self.personas.text_for(&persona_tag)));
            }
            history.push(Message::user(&user_text));
            trim_history(&mut history, self.config.trim_budget);
            (history.clone(), history)
        };

        let request = BackendRequest {
            model: agent.model.clone(),
            messages,
            fixed_prompt: agent.fixed_prompt.clone(),
            input: user_text,
        };

        Ok(PreparedExchange {
            agent,
            persist_base,
            request,
            _guard: guard,
        })
    }

    /// One-shot mode: drain the adapter fully, persist, return the reply.
    /// Adapter failures surface as errors and persist nothing.
    pub async fn collect(&self, prepared: PreparedExchange) -> GatewayResult<ChatReply> {
        let PreparedExchange {
            agent,
            persist_base,
            request,
            _guard,
        } = prepared;

        let mut stream = self.adapter(agent.backend).stream_chat(request).await?;
        let mut answer = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if !delta.trim().is_empty() {
                answer.push_str(&delta);
            }
        }

        self.persist(&agent, persist_base, &answer).await?;
        Ok(ChatReply {
            from: agent.name,
            text: answer,
        })
    }

    /// Streaming mode: emit one frame per non-blank fragment in arrival
    /// order, then a terminal frame. The receiver going away aborts the
    /// exchange without persisting.
    pub async fn stream_exchange(&self, prepared: PreparedExchange, tx: mpsc::Sender<StreamFrame>) {
        let PreparedExchange {
            agent,
            persist_base,
            request,
            _guard,
        } = prepared;

        let stream = match self.adapter(agent.backend).stream_chat(request).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.send(StreamFrame::Failed(e.to_string())).await;
                return;
            }
        };

        self.pump(&agent, persist_base, stream, tx).await;
    }

    async fn pump(
        &self,
        agent: &AgentDescriptor,
        persist_base: Vec<Message>,
        mut deltas: DeltaStream,
        tx: mpsc::Sender<StreamFrame>,
    ) {
        let mut collected = String::new();
        loop {
            match tokio::time::timeout(HEARTBEAT, deltas.next()).await {
                Ok(Some(Ok(delta))) => {
                    if delta.trim().is_empty() {
                        continue;
                    }
                    if tx.send(StreamFrame::Delta(delta.clone())).await.is_err() {
                        // Client disconnected: stop consuming upstream and do
                        // not record a silently truncated assistant turn.
                        return;
                    }
                    collected.push_str(&delta);
                }
                Ok(Some(Err(e))) => {
                    // Already-emitted frames are not retracted; the partial
                    // reply the client saw is what gets remembered.
                    self.persist_or_log(agent, persist_base, &collected).await;
                    let _ = tx.send(StreamFrame::Failed(e.to_string())).await;
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    // Heartbeat between deltas; detects clients that vanished
                    // while the upstream is quiet.
                    if tx.is_closed() {
                        return;
                    }
                }
            }
        }

        // Persist before the terminal frame so a client that drops right
        // after `done` cannot cancel the write.
        self.persist_or_log(agent, persist_base, &collected).await;
        let _ = tx.send(StreamFrame::Done).await;
    }

    /// Record the finished exchange: base history plus one assistant turn,
    /// re-trimmed to the budget. Skipped for memory-disabled agents and for
    /// empty replies.
    async fn persist(
        &self,
        agent: &AgentDescriptor,
        mut base: Vec<Message>,
        answer: &str,
    ) -> GatewayResult<()> {
        if !agent.memory || answer.is_empty() {
            return Ok(());
        }
        base.push(Message::assistant(answer));
        trim_history(&mut base, self.config.trim_budget);
        self.store.save(&agent.name, &base).await
    }

    async fn persist_or_log(&self, agent: &AgentDescriptor, base: Vec<Message>, answer: &str) {
        if let Err(e) = self.persist(agent, base, answer).await {
            tracing::error!(agent = %agent.name, "failed to persist exchange: {e}");
        }
    }
}

fn has_system(history: &[Message]) -> bool {
    history.iter().any(|m| m.role == Role::System)
}

fn cap_to_window(history: &mut Vec<Message>, window: usize) {
    if history.len() > window {
        let excess = history.len() - window;
        history.drain(..excess);
    }
}
