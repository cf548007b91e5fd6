use std::collections::BTreeMap;

/// Static mapping from persona tag to system-prompt text.
///
/// When a tag has no entry the tag itself is used as the system text, which
/// matches how loadout persona tags were historically injected verbatim.
#[derive(Debug, Default, Clone)]
pub struct PersonaTable {
    personas: BTreeMap<String, String>,
}

impl PersonaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: Into<String>, T: Into<String>>(mut self, name: N, text: T) -> Self {
        self.personas.insert(name.into(), text.into());
        self
    }

    pub fn text_for(&self, tag: &str) -> String {
        self.personas
            .get(tag)
            .cloned()
            .unwrap_or_else(|| tag.to_string())
    }
}
