//! Retrieval-QA prompt assembly.

use lumen_store::ChatMessage;

const NO_CONTEXT_NOTE: &str = "No documents are available for this question. Say that \
no relevant documents were found, then answer from general knowledge if you can.";

/// Build the prompt sent to the provider.
///
/// `history` is oldest-first; only completed assistant turns are included.
/// An empty `context` produces an explicit no-documents instruction.
pub fn build_prompt(context: &str, history: &[ChatMessage], question: &str) -> String {
    let mut prompt = String::new();

    let context = context.trim();
    if context.is_empty() {
        prompt.push_str(NO_CONTEXT_NOTE);
        prompt.push_str("\n\n");
    } else {
        prompt.push_str("Context from the user's documents:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    let turns: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| !m.is_user_message && !m.response.trim().is_empty())
        .collect();
    if !turns.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for m in turns {
            prompt.push_str(&format!("User: {}\nAssistant: {}\n", m.question.trim(), m.response.trim()));
        }
        prompt.push('\n');
    }

    prompt.push_str("Question: ");
    prompt.push_str(question.trim());
    prompt.push_str("\nAnswer:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: i64, question: &str, response: &str, is_user: bool) -> ChatMessage {
        ChatMessage {
            id,
            question: question.into(),
            response: response.into(),
            timestamp: id,
            is_user_message: is_user,
            context_used: String::new(),
            detailed_context: String::new(),
        }
    }

    #[test]
    fn test_context_and_question() {
        let p = build_prompt("Tokio is an async runtime.", &[], " What is Tokio? ");
        assert!(p.starts_with("Context from the user's documents:\nTokio is an async runtime."));
        assert!(p.ends_with("Question: What is Tokio?\nAnswer:"));
        assert!(!p.contains("No documents"));
    }

    #[test]
    fn test_empty_context_is_explicit() {
        let p = build_prompt("  ", &[], "Anything?");
        assert!(p.starts_with(NO_CONTEXT_NOTE));
    }

    #[test]
    fn test_history_uses_answered_assistant_turns() {
        let history = vec![
            turn(1, "First?", "", true),
            turn(2, "First?", "One.", false),
            turn(3, "Second?", "", false),
        ];
        let p = build_prompt("ctx", &history, "Third?");
        assert_eq!(p.matches("User: ").count(), 1);
        assert!(p.contains("User: First?\nAssistant: One.\n"));
    }
}
