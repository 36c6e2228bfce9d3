//! Prompts sent to the vision-language model.
//!
//! Kept in one place so prompt changes never touch retry or retrieval code,
//! and so tests can inspect them without a live model.

/// System prompt used when asking the VLM to describe an image at ingestion.
pub const ASSISTANT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Answer returned when retrieval finds nothing; no model call is made.
pub const NO_ANSWER: &str = "No relevant answer found.";

/// Multimodal answer prompt. `{query}` and `{text_context}` are substituted
/// by [`synthesis_system_prompt`].
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a multimodal reasoning assistant.
You are given the following inputs:

1. User query: {query}
2. Text context: {text_context}

Your task is to:
- Always start by understanding the user query.
- If images are uploaded, analyze both the text and image contexts together.
- If images are not uploaded or is empty, analyze only the text context.
- Integrate evidence from the available contexts when forming your answer.
- If information is missing, uncertain, or contradictory, explicitly state it.
- Provide a clear, well-structured response that directly addresses the query.
- Use reasoning that is faithful to the provided contexts; do not hallucinate unsupported details.
"#;

/// User instruction that accompanies an image during ingestion.
///
/// `caption` is the block's captions, each newline-terminated; it may be empty.
pub fn describe_image_prompt(caption: &str) -> String {
    format!(
        "The caption of the image is:{}, please describe the uploaded image in detail.",
        caption
    )
}

/// Fill the answer prompt with the question and the retrieved text.
pub fn synthesis_system_prompt(query: &str, text_context: &str) -> String {
    // Single pass so a query containing "{text_context}" is not expanded.
    let mut out = String::with_capacity(SYNTHESIS_SYSTEM_PROMPT.len() + query.len() + text_context.len());
    let mut rest = SYNTHESIS_SYSTEM_PROMPT;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{query}") {
            out.push_str(query);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{text_context}") {
            out.push_str(text_context);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_prompt_embeds_caption() {
        let p = describe_image_prompt("Figure 2: AIME accuracy\n");
        assert!(p.starts_with("The caption of the image is:Figure 2: AIME accuracy\n,"));
        assert!(p.ends_with("describe the uploaded image in detail."));
    }

    #[test]
    fn synthesis_prompt_substitutes_both_fields() {
        let p = synthesis_system_prompt("what is GRPO?", "GRPO is a policy optimisation method\n");
        assert!(p.contains("1. User query: what is GRPO?"));
        assert!(p.contains("2. Text context: GRPO is a policy optimisation method"));
        assert!(!p.contains("{query}"));
        assert!(!p.contains("{text_context}"));
    }

    #[test]
    fn synthesis_prompt_does_not_expand_placeholders_inside_query() {
        let p = synthesis_system_prompt("explain {text_context}", "CTX");
        assert!(p.contains("User query: explain {text_context}"));
        assert_eq!(p.matches("CTX").count(), 1);
    }
}
