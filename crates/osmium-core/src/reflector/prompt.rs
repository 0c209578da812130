//! Prompt construction for reflection rounds.

use std::fmt::Write;

use osmium_abstraction::ChatMessage;
use serde_json::{Value, json};

use super::ReflectionInput;
use super::types::{BulletTag, Insight};

const SYSTEM_PROMPT: &str = "You review drafted artifacts against feedback and diagnose \
what went wrong. Judge each playbook entry the draft relied on as helpful, harmful or neutral. \
Reply with a single JSON object.";

/// JSON schema for a reflection reply.
pub fn reply_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reasoning": {"type": "string"},
            "error_identification": {"type": "string"},
            "root_cause": {"type": "string"},
            "correct_approach": {"type": "string"},
            "key_insight": {"type": "string"},
            "section": {"type": "string"},
            "bullet_tags": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "tag": {"type": "string", "enum": ["helpful", "harmful", "neutral"]}
                    },
                    "required": ["id", "tag"]
                }
            }
        },
        "required": ["error_identification", "root_cause", "correct_approach", "bullet_tags"]
    })
}

/// Builds the conversation for `round`. Rounds after the first include the
/// previous round's analysis.
pub fn build_messages(
    input: &ReflectionInput<'_>,
    previous: Option<(&Insight, &[BulletTag])>,
    round: u32,
) -> Vec<ChatMessage> {
    let trajectory = input.trajectory;
    let mut prompt = String::from("## Draft\n\n");
    prompt.push_str(
        &serde_json::to_string_pretty(&trajectory.draft).unwrap_or_else(|_| trajectory.draft.to_string()),
    );

    if !trajectory.reasoning_trace.trim().is_empty() {
        writeln!(prompt, "\n\n## Generator reasoning\n\n{}", trajectory.reasoning_trace.trim()).unwrap();
    }

    prompt.push_str("\n## Playbook entries used\n\n");
    let used: Vec<_> = trajectory.items_used().cloned().collect();
    if used.is_empty() {
        prompt.push_str("(none)\n");
    } else {
        prompt.push_str(&input.playbook.as_context(&used));
        prompt.push('\n');
    }

    writeln!(prompt, "\n## Feedback\n\n{}", input.feedback.trim()).unwrap();

    if let Some(truth) = input.ground_truth {
        let rendered = serde_json::to_string_pretty(truth).unwrap_or_else(|_| truth.to_string());
        writeln!(prompt, "\n## Expected result\n\n{}", rendered).unwrap();
    }

    if let Some((insight, tags)) = previous {
        writeln!(prompt, "\n## Previous analysis (round {})\n", round - 1).unwrap();
        writeln!(prompt, "- error: {}", insight.error_identification).unwrap();
        writeln!(prompt, "- root cause: {}", insight.root_cause).unwrap();
        writeln!(prompt, "- correct approach: {}", insight.correct_approach).unwrap();
        if let Some(key) = &insight.key_insight {
            writeln!(prompt, "- key insight: {}", key).unwrap();
        }
        for tag in tags {
            writeln!(prompt, "- [{}] {}", tag.item_id, tag.verdict.as_str()).unwrap();
        }
        prompt.push_str(
            "\nSharpen this analysis: make the root cause and the correct approach more specific. \
             If it is already precise, repeat it unchanged.\n",
        );
    }

    writeln!(
        prompt,
        "\nSections available for the key insight: {}.\n\
         Tag every entry listed under \"Playbook entries used\" by its id.",
        input.playbook.sections().join(", ")
    )
    .unwrap();

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}
