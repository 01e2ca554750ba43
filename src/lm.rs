//! The reflection language model capability and the built-in instruction-proposal
//! routine.

use std::collections::HashMap;

use anyhow::Result;

use crate::adapter::Record;
use crate::error::EngineError;

/// A synchronous-from-the-caller's-perspective prompt capability, modeled as an
/// `async fn` directly in the trait.
#[allow(async_fn_in_trait)]
pub trait ReflectionLm: Send + Sync {
    async fn prompt(&self, prompt: String) -> Result<String>;
}

/// The default prompt template: two named holes, the current component text and a
/// markdown rendering of its feedback records.
pub const DEFAULT_INSTRUCTION_TEMPLATE: &str = "\
You are refining one component of a larger program.

Current text of the component:
```
{current_text}
```

Feedback from recent executions:
{feedback_markdown}

Rewrite the component to address the feedback. Reply with only the new text, \
wrapped in a single triple-backtick fenced block.
";

/// Renders `records` as nested markdown headed sections, one `###` per record.
pub fn render_feedback_markdown(records: &[Record]) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        out.push_str(&format!("### Example {}\n", i + 1));
        for (key, value) in record {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("**{key}**: {rendered}\n"));
        }
        out.push('\n');
    }
    out
}

/// Fills [`DEFAULT_INSTRUCTION_TEMPLATE`]'s two holes.
pub fn render_instruction_prompt(current_text: &str, records: &[Record]) -> String {
    DEFAULT_INSTRUCTION_TEMPLATE
        .replace("{current_text}", current_text)
        .replace("{feedback_markdown}", &render_feedback_markdown(records))
}

/// Extracts the first triple-backtick fenced block from `reply`.
///
/// Strips an optional language tag after the opening fence (e.g. ` ```text `). If no
/// closing fence is found, everything after the opening fence is used to end-of-
/// string. An extraction that comes out empty (after trimming) is an error.
pub fn extract_fenced_block(reply: &str) -> Result<String, EngineError> {
    let fence_start = reply.find("```").ok_or_else(|| EngineError::ProposalError {
        reason: "reflection LM reply contained no fenced code block".to_string(),
    })?;

    let after_open = &reply[fence_start + 3..];
    // Skip an optional language tag: everything up to the first newline, if that
    // line doesn't itself look like content (heuristic: no newline means no tag to
    // strip, just content running to end-of-string).
    let content_start = after_open.find('\n').map(|nl| nl + 1).unwrap_or(0);
    let body = &after_open[content_start..];

    let extracted = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };

    let trimmed = extracted.trim();
    if trimmed.is_empty() {
        return Err(EngineError::ProposalError {
            reason: "reflection LM reply's fenced block was empty".to_string(),
        });
    }

    Ok(trimmed.to_string())
}

/// Runs the built-in single-round-trip instruction proposal for every requested
/// component, using the same `current_text`/`feedback` rendering for each.
pub async fn default_propose_new_texts<LM: ReflectionLm>(
    lm: &LM,
    current_texts: &HashMap<String, String>,
    reflective_dataset: &HashMap<String, Vec<Record>>,
    components_to_update: &[String],
) -> Result<HashMap<String, String>, EngineError> {
    let mut proposals = HashMap::with_capacity(components_to_update.len());

    for component in components_to_update {
        let current_text = current_texts.get(component).cloned().unwrap_or_default();
        let records = reflective_dataset
            .get(component)
            .cloned()
            .unwrap_or_default();

        let prompt = render_instruction_prompt(&current_text, &records);
        let reply = lm
            .prompt(prompt)
            .await
            .map_err(EngineError::AdapterError)?;
        let new_text = extract_fenced_block(&reply)?;
        proposals.insert(component.clone(), new_text);
    }

    Ok(proposals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_block_with_language_tag() {
        let reply = "```text\nBetter instruction\n```";
        assert_eq!(extract_fenced_block(reply).unwrap(), "Better instruction");
    }

    #[test]
    fn extracts_block_without_language_tag() {
        let reply = "```\nBetter instruction\n```";
        assert_eq!(extract_fenced_block(reply).unwrap(), "Better instruction");
    }

    #[test]
    fn extracts_to_end_of_string_when_no_closing_fence() {
        let reply = "```\nBetter instruction, still going";
        assert_eq!(
            extract_fenced_block(reply).unwrap(),
            "Better instruction, still going"
        );
    }

    #[test]
    fn errors_when_no_fence_present() {
        assert!(extract_fenced_block("just plain text").is_err());
    }

    #[test]
    fn errors_when_extraction_is_empty() {
        assert!(extract_fenced_block("```\n\n```").is_err());
    }

    struct EchoLm;
    impl ReflectionLm for EchoLm {
        async fn prompt(&self, _prompt: String) -> Result<String> {
            Ok("```\nBetter instruction\n```".to_string())
        }
    }

    #[tokio::test]
    async fn default_propose_new_texts_returns_one_entry_per_component() {
        let lm = EchoLm;
        let mut current = HashMap::new();
        current.insert("instruction".to_string(), "old text".to_string());
        let reflective = HashMap::new();
        let components = vec!["instruction".to_string()];

        let proposals = default_propose_new_texts(&lm, &current, &reflective, &components)
            .await
            .unwrap();

        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals["instruction"], "Better instruction");
    }
}
