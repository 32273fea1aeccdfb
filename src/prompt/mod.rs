//! Prompt engineering: normalization plus strategy-specific framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Framing applied ahead of the normalized instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStrategy {
    Clarity,
    Context,
    Specificity,
    Creativity,
}

impl Default for PromptStrategy {
    fn default() -> Self {
        PromptStrategy::Clarity
    }
}

impl PromptStrategy {
    fn prefix(&self) -> &'static str {
        match self {
            PromptStrategy::Clarity => "Provide a clear, well-structured response.",
            PromptStrategy::Context => "Ground your response in the context provided.",
            PromptStrategy::Specificity => "Be specific and concrete, citing exact details.",
            PromptStrategy::Creativity => "Approach this creatively and explore novel angles.",
        }
    }
}

const INSTRUCTIONAL_VERBS: &[&str] = &[
    "write", "explain", "describe", "generate", "create", "list", "summarize", "summarise",
    "analyze", "analyse", "compare", "translate", "provide", "give", "outline", "draft",
    "compose", "suggest", "answer", "respond", "identify", "evaluate",
];

/// Stateless prompt shaping stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptEngineer;

impl PromptEngineer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw prompt and frame it for the chosen strategy.
    ///
    /// Normalization collapses whitespace and guarantees terminal
    /// punctuation; prompts with no instructional verb get an imperative
    /// cue. Non-empty context is rendered as a labelled `key: value` block
    /// ahead of the instruction.
    pub fn engineer(
        &self,
        prompt: &str,
        context: &[(String, Value)],
        strategy: PromptStrategy,
    ) -> String {
        let instruction = Self::normalize(prompt);
        let instruction = if Self::has_instructional_verb(&instruction) {
            instruction
        } else {
            format!("Respond to the following: {instruction}")
        };

        let framed = format!("{} {}", strategy.prefix(), instruction);
        if context.is_empty() {
            return framed;
        }

        let mut block = String::from("Context:\n");
        for (key, value) in context {
            block.push_str(key);
            block.push_str(": ");
            block.push_str(&render_value(value));
            block.push('\n');
        }
        format!("{block}\n{framed}")
    }

    fn normalize(prompt: &str) -> String {
        let mut collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty()
            && !collapsed.ends_with(['.', '!', '?', ':'])
        {
            collapsed.push('.');
        }
        collapsed
    }

    fn has_instructional_verb(prompt: &str) -> bool {
        let lowered = prompt.to_lowercase();
        let mut words = lowered.split_whitespace();
        let first = words.next().unwrap_or("");
        let first = first.trim_matches(|c: char| !c.is_alphanumeric());
        if INSTRUCTIONAL_VERBS.contains(&first) {
            return true;
        }
        // "Please <verb> ..." also counts.
        if first == "please" {
            if let Some(second) = words.next() {
                let second = second.trim_matches(|c: char| !c.is_alphanumeric());
                return INSTRUCTIONAL_VERBS.contains(&second);
            }
        }
        false
    }
}

pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
