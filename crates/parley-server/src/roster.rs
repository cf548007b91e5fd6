//! Static agent, persona, and loadout tables, fixed at process start.

use parley::{AgentRegistry, FixedPrompt, Loadout, PersonaTable};

/// Model routes and memory policy for the built-in agents.
pub fn registry(default_agent: &str) -> AgentRegistry {
    AgentRegistry::new(default_agent)
        // Local quantized llama3 variants.
        .route("Scribe", "llama3:8b-instruct-q4_K_M")
        .route("Quill", "llama3:8b-instruct-q3_K_M")
        .route("Forge", "llama3")
        .route("Drifter", "llama3:8b-instruct-q4_K")
        // Cloud routes.
        .route("Oracle", "openai:gpt-4o")
        .route("OracleM", "openai:gpt-4o")
        .route("Courier", "openai:gpt-4o")
        // Archivist reuses Scribe's model with its own persona and tools.
        .loadout(
            "Archivist",
            Loadout {
                persona: "Archivist".to_string(),
                model: "Scribe".to_string(),
                tools: vec!["index_notes.py".to_string(), "search_notes.py".to_string()],
            },
        )
        // Courier is bound to a server-side stored prompt.
        .fixed_prompt(
            "Courier",
            FixedPrompt {
                id: "pmpt_64f1c2a9d0b34e7c8a55".to_string(),
                version: "2".to_string(),
            },
        )
        // Raw modes: no memory layer.
        .without_memory("Drifter")
        .without_memory("Oracle")
}

pub fn personas() -> PersonaTable {
    PersonaTable::new()
        .insert(
            "Scribe",
            "You are Scribe: precise and laconic. Answer with the shortest \
             correct response and remember earlier turns.",
        )
        .insert(
            "Quill",
            "You are Quill, a patient writing assistant. Improve drafts \
             without changing the author's voice.",
        )
        .insert(
            "Forge",
            "You are Forge, a systems engineer. Help with Linux, containers, \
             and server operations, commands first.",
        )
        .insert(
            "Drifter",
            "You are Drifter, a stateless scratchpad. Each exchange stands \
             alone; never refer to earlier conversation.",
        )
        .insert(
            "Oracle",
            "You are Oracle: direct and well-read. Give balanced answers and \
             flag uncertainty explicitly.",
        )
        .insert(
            "OracleM",
            "You are OracleM, Oracle with long-term memory. Retain relevant \
             context, decisions, and open threads across sessions.",
        )
        .insert(
            "Archivist",
            "You are Archivist, keeper of the notes index. Locate, summarize, \
             and cross-reference stored material on request.",
        )
}
