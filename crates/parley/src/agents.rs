use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{GatewayError, GatewayResult};

/// Route-tag prefix marking a cloud chat-completion model.
pub const CLOUD_PREFIX: &str = "openai:";

/// Bare alias accepted for the default local model.
pub const LOCAL_ALIAS: &str = "llama3";

/// Fully qualified tag the bare alias expands to.
pub const LOCAL_ALIAS_MODEL: &str = "llama3:8b-instruct-q4_K_M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Cloud,
}

/// A server-side stored prompt an agent can be bound to, replacing the
/// chat-completion call with a single templated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPrompt {
    pub id: String,
    pub version: String,
}

/// Everything the gateway needs to know about a logical agent.
/// Built once at startup from the registry; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescriptor {
    pub name: String,
    pub backend: BackendKind,
    pub model: String,
    pub fixed_prompt: Option<FixedPrompt>,
    pub memory: bool,
    /// Tool names from a loadout; carried for listing, not executed here.
    pub tools: Vec<String>,
}

/// A loadout substitutes persona and tools independently of the model route.
#[derive(Debug, Clone)]
pub struct Loadout {
    pub persona: String,
    pub model: String,
    pub tools: Vec<String>,
}

/// Outcome of resolving a logical agent name: the persona tag to inject and
/// the descriptor to dispatch on.
#[derive(Debug, Clone)]
pub struct ResolvedAgent {
    pub persona_tag: String,
    pub descriptor: AgentDescriptor,
}

/// Closed mapping from logical agent names to backend kind + model.
///
/// Resolution order: loadout override, then the model-routes table, then
/// (only when the caller permits it) the name taken as a literal model tag.
pub struct AgentRegistry {
    routes: BTreeMap<String, String>,
    loadouts: BTreeMap<String, Loadout>,
    fixed_prompts: BTreeMap<String, FixedPrompt>,
    no_memory: BTreeSet<String>,
    default_agent: String,
}

impl AgentRegistry {
    pub fn new<S: Into<String>>(default_agent: S) -> Self {
        Self {
            routes: BTreeMap::new(),
            loadouts: BTreeMap::new(),
            fixed_prompts: BTreeMap::new(),
            no_memory: BTreeSet::new(),
            default_agent: default_agent.into(),
        }
    }

    /// Map a logical agent name to a model tag. Cloud tags carry the
    /// `openai:` prefix.
    pub fn route<N: Into<String>, M: Into<String>>(mut self, name: N, model: M) -> Self {
        self.routes.insert(name.into(), model.into());
        self
    }

    pub fn loadout<N: Into<String>>(mut self, name: N, loadout: Loadout) -> Self {
        self.loadouts.insert(name.into(), loadout);
        self
    }

    /// Bind an agent to a server-side stored prompt.
    pub fn fixed_prompt<N: Into<String>>(mut self, name: N, prompt: FixedPrompt) -> Self {
        self.fixed_prompts.insert(name.into(), prompt);
        self
    }

    /// Exclude an agent from the memory layer; its history is never loaded
    /// or saved.
    pub fn without_memory<N: Into<String>>(mut self, name: N) -> Self {
        self.no_memory.insert(name.into());
        self
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Sorted logical agent names, for the list endpoint.
    pub fn names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.routes.keys().cloned().collect();
        names.extend(self.loadouts.keys().cloned());
        names.into_iter().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name) || self.loadouts.contains_key(name)
    }

    /// Resolve a logical agent name to a descriptor.
    ///
    /// `allow_literal` controls the last resort: treating an unrouted name as
    /// a literal model tag. The HTTP surface keeps it off so typos surface as
    /// `UnknownAgent` instead of reaching the backend.
    pub fn resolve(&self, name: &str, allow_literal: bool) -> GatewayResult<ResolvedAgent> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::UnknownAgent(String::new()));
        }

        let (persona_tag, model_tag, tools) = if let Some(loadout) = self.loadouts.get(name) {
            // The loadout's model field may itself be a routed agent name.
            let tag = self
                .routes
                .get(&loadout.model)
                .cloned()
                .unwrap_or_else(|| loadout.model.clone());
            (loadout.persona.clone(), tag, loadout.tools.clone())
        } else if let Some(tag) = self.routes.get(name) {
            (name.to_string(), tag.clone(), Vec::new())
        } else if allow_literal {
            (name.to_string(), name.to_string(), Vec::new())
        } else {
            return Err(GatewayError::UnknownAgent(name.to_string()));
        };

        let model_tag = if model_tag.eq_ignore_ascii_case(LOCAL_ALIAS) {
            LOCAL_ALIAS_MODEL.to_string()
        } else {
            model_tag
        };

        let (backend, model) = match model_tag.strip_prefix(CLOUD_PREFIX) {
            Some(rest) => (BackendKind::Cloud, rest.to_string()),
            None => (BackendKind::Local, model_tag),
        };

        Ok(ResolvedAgent {
            persona_tag,
            descriptor: AgentDescriptor {
                name: name.to_string(),
                backend,
                model,
                fixed_prompt: self.fixed_prompts.get(name).cloned(),
                memory: !self.no_memory.contains(name),
                tools,
            },
        })
    }
}
