//! Prompt construction for draft generation.

use std::collections::BTreeMap;
use std::fmt::Write;

use osmium_abstraction::ChatMessage;
use serde_json::{Value, json};

use crate::playbook::{KnowledgeItem, Playbook};

const SYSTEM_PROMPT: &str = "You draft artifacts that satisfy the stated requirements. \
Use the playbook entries as guidance and cite the ids of the entries you relied on. \
Reply with a single JSON object.";

/// Text used to rank playbook items against the requirements.
pub fn retrieval_query(requirements: &BTreeMap<String, Value>, templates: &[Value]) -> String {
    let mut query = String::new();
    for (key, value) in requirements {
        writeln!(query, "{}: {}", key, render_value(value)).unwrap();
    }
    if query.trim().is_empty() {
        for template in templates {
            writeln!(query, "{}", render_value(template)).unwrap();
        }
    }
    query.trim().to_string()
}

/// JSON schema for the generator's reply.
pub fn reply_schema(draft_schema: &Value) -> Value {
    json!({
        "type": "object",
        "properties": {
            "reasoning": {"type": "string"},
            "bullet_ids": {"type": "array", "items": {"type": "string"}},
            "draft": draft_schema,
        },
        "required": ["reasoning", "bullet_ids", "draft"]
    })
}

/// Builds the conversation for one generation call.
pub fn build_messages(
    requirements: &BTreeMap<String, Value>,
    templates: &[Value],
    playbook: &Playbook,
    retrieved: &[KnowledgeItem],
) -> Vec<ChatMessage> {
    let mut prompt = String::from("## Requirements\n\n");
    if requirements.is_empty() {
        prompt.push_str("(none stated)\n");
    }
    for (key, value) in requirements {
        writeln!(prompt, "- {}: {}", key, render_value(value)).unwrap();
    }

    if !templates.is_empty() {
        prompt.push_str("\n## Reference templates\n\n");
        for (i, template) in templates.iter().enumerate() {
            let rendered =
                serde_json::to_string_pretty(template).unwrap_or_else(|_| template.to_string());
            writeln!(prompt, "### Template {}\n{}\n", i + 1, rendered).unwrap();
        }
    }

    prompt.push_str("\n## Playbook\n\n");
    if retrieved.is_empty() {
        prompt.push_str("(no entries)\n");
    } else {
        prompt.push_str(&playbook.as_context(retrieved));
        prompt.push('\n');
    }

    prompt.push_str(
        "\nReturn `reasoning` (how you approached the draft), `bullet_ids` (ids of the \
         playbook entries you used) and `draft` (the artifact itself).",
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
