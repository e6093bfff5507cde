//! Prompt templates for the answer pipeline
//!
//! Three template families: the rich retrieval-grounded template, the
//! simpler naive template, and the reduction template that merges a
//! partitioned global-search report. Keyword extraction and the streaming
//! tool decision have their own prompts.

use answerforge_common::llm::ChatMessage;
use answerforge_common::KeywordSet;

/// System prompt for retrieval-grounded generation
pub const SYSTEM_PROMPT: &str = "You are a careful assistant answering questions over a curated \
knowledge base. Ground every statement in the retrieved information; if the retrieved information \
is insufficient, say so instead of guessing. Respond in the requested format: {response_type}.";

/// System prompt for the naive strategy
pub const NAIVE_SYSTEM_PROMPT: &str = "You are an assistant answering questions from retrieved \
text fragments. Answer directly from the fragments without additional analysis. Respond in the \
requested format: {response_type}.";

/// System prompt for the reduction stage
pub const REDUCE_SYSTEM_PROMPT: &str = "You are an assistant synthesizing a single answer from an \
analysis report assembled across multiple dataset partitions. Merge the partial findings, resolve \
duplicates, and keep only well-supported points. Respond in the requested format: {response_type}.";

fn fill(template: &str, response_type: &str) -> String {
    template.replace("{response_type}", response_type)
}

/// Messages for the generation stage
pub fn rag_messages(
    context: &str,
    question: &str,
    response_type: &str,
    naive: bool,
) -> Vec<ChatMessage> {
    if naive {
        vec![
            ChatMessage::system(fill(NAIVE_SYSTEM_PROMPT, response_type)),
            ChatMessage::user(format!(
                "---Retrieved fragments---\n{context}\n\nQuestion:\n{question}"
            )),
        ]
    } else {
        vec![
            ChatMessage::system(fill(SYSTEM_PROMPT, response_type)),
            ChatMessage::user(format!(
                "---Analysis report---\n\
                 The following retrieved information is ordered by importance:\n\n\
                 {context}\n\n\
                 The user's question is:\n{question}\n\n\
                 Answer clearly and comprehensively, making sure to:\n\
                 1. Blend the low-level (entity detail) and high-level (topic and concept) information retrieved\n\
                 2. Organize the content with third-level headings (###) for readability\n\
                 3. Close with a \"#### Citations\" section marking the sources used"
            )),
        ]
    }
}

/// Messages for the reduction stage
pub fn reduce_messages(report: &str, question: &str, response_type: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(fill(REDUCE_SYSTEM_PROMPT, response_type)),
        ChatMessage::user(format!(
            "---Analysis report---\n{report}\n\nThe user's question is:\n{question}"
        )),
    ]
}

/// Messages for structured keyword extraction
pub fn keyword_messages(query: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Extract keywords from the following query:\n\
         Query: {query}\n\n\
         Extract two kinds of keywords:\n\
         1. low_level: concrete entities, names, terms\n\
         2. high_level: topics, concepts, domains\n\n\
         Return a JSON object with \"low_level\" and \"high_level\" string arrays."
    ))]
}

/// Messages for the streaming tool decision
///
/// The extracted keywords ride along so the model can judge whether
/// retrieval is worth a tool call.
pub fn tool_decision_messages(query: &str, keywords: &KeywordSet) -> Vec<ChatMessage> {
    let mut user = format!("The user's question is:\n{query}");
    if !keywords.is_empty() {
        user.push_str(&format!(
            "\n\nKeywords extracted from the question: {}",
            keywords.all().join(", ")
        ));
    }
    vec![
        ChatMessage::system(
            "You are an assistant with retrieval tools. Decide whether answering the question \
             requires retrieving supporting context; if so, call the most suitable tool with the \
             question as the query. Otherwise answer directly.",
        ),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rich_template_structure() {
        let messages = rag_messages("the docs", "the question", "multiple paragraphs", false);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("multiple paragraphs"));
        assert!(messages[1].content.contains("the docs"));
        assert!(messages[1].content.contains("third-level headings"));
        assert!(messages[1].content.contains("#### Citations"));
    }

    #[test]
    fn test_naive_template_is_simpler() {
        let messages = rag_messages("the docs", "the question", "one paragraph", true);
        assert!(!messages[1].content.contains("#### Citations"));
        assert!(messages[1].content.contains("Retrieved fragments"));
    }

    #[test]
    fn test_keyword_prompt_names_both_levels() {
        let messages = keyword_messages("who proposed relativity?");
        assert!(messages[0].content.contains("low_level"));
        assert!(messages[0].content.contains("high_level"));
    }
}
