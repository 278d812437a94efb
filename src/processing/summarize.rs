//! Document summarization with hierarchical reduction for long inputs.
//!
//! A document that fits the generation model's context budget is summarized
//! in one pass. Longer documents go through map-reduce: fixed-size text
//! groups are summarized independently, then the concatenated group
//! summaries are summarized again. Reduction is bounded to
//! [`MAX_REDUCTION_PASSES`]; past that the working text is truncated to the
//! budget instead of recursing further, keeping context growth bounded.
//!
//! Token counts use the `cl100k_base` encoding with a whitespace fallback
//! when the tokenizer fails to initialize.

use std::sync::{Arc, OnceLock};

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::generation::GenerationClient;
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::DocumentSummary;

use super::chunking::reconstruct_text;
use super::types::{Chunk, SummarizeError};

/// Upper bound on map-reduce passes before the input is truncated instead.
///
/// Two passes compress far beyond any realistic upload (each pass shrinks
/// the text by roughly the group-to-summary ratio); the bound exists so a
/// pathological input cannot recurse indefinitely.
pub const MAX_REDUCTION_PASSES: usize = 2;

/// Estimated characters per token used to size text groups.
const CHARS_PER_TOKEN: usize = 4;

/// Word budget for each intermediate section summary.
const SECTION_SUMMARY_WORDS: usize = 150;

static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

/// Count tokens with `cl100k_base`, falling back to whitespace splitting.
fn count_tokens(text: &str) -> usize {
    let encoder = ENCODER.get_or_init(|| match cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(error) => {
            tracing::warn!(error = %error, "Tokenizer unavailable; falling back to whitespace counting");
            None
        }
    });
    match encoder {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.split_whitespace().count(),
    }
}

/// Produces structured summaries from a document's chunk set.
pub struct Summarizer {
    generation: Arc<dyn GenerationClient>,
    context_tokens: usize,
    max_words: usize,
    retry: RetryPolicy,
}

impl Summarizer {
    /// Build a summarizer over the given generation client.
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        context_tokens: usize,
        max_words: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            generation,
            context_tokens,
            max_words,
            retry,
        }
    }

    /// Summarize the document's full ordered chunk set.
    pub async fn summarize(
        &self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<DocumentSummary, SummarizeError> {
        let full_text = reconstruct_text(chunks);
        if full_text.trim().is_empty() {
            return Err(SummarizeError::EmptyDocument);
        }

        // Reserve a quarter of the window for the prompt scaffold and output.
        let budget_tokens = (self.context_tokens * 3 / 4).max(1);
        let char_budget = budget_tokens * CHARS_PER_TOKEN;

        let mut working = full_text;
        let mut passes = 0usize;
        while count_tokens(&working) > budget_tokens {
            if passes >= MAX_REDUCTION_PASSES {
                tracing::warn!(
                    document_id,
                    passes,
                    "Reduction pass limit reached; truncating summarization input"
                );
                working = truncate_chars(&working, char_budget);
                break;
            }

            let groups = split_into_groups(&working, char_budget);
            tracing::debug!(
                document_id,
                pass = passes,
                groups = groups.len(),
                "Hierarchical summarization pass"
            );
            let mut summaries = Vec::with_capacity(groups.len());
            for group in &groups {
                let prompt = section_prompt(group);
                summaries.push(self.generate_with_retry(&prompt).await?);
            }
            working = summaries.join("\n\n");
            passes += 1;
        }

        let prompt = final_prompt(&working, self.max_words);
        let raw = self.generate_with_retry(&prompt).await?;
        Ok(parse_summary(document_id, &raw))
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String, SummarizeError> {
        with_backoff("summarize", self.retry, || self.generation.generate(prompt))
            .await
            .map_err(SummarizeError::from)
    }
}

fn section_prompt(text: &str) -> String {
    format!(
        "Summarize the following section of a larger document in at most \
         {SECTION_SUMMARY_WORDS} words. Keep concrete facts, names, dates, and figures.\n\n\
         Section:\n{text}"
    )
}

fn final_prompt(text: &str, max_words: usize) -> String {
    format!(
        "You are a document analyst. Read the document below and respond in exactly this format:\n\
         \n\
         SUMMARY:\n\
         A prose summary of the document in at most {max_words} words, split into short paragraphs.\n\
         \n\
         KEY POINTS:\n\
         - The most important facts, one per line.\n\
         \n\
         PERSONAL INFORMATION:\n\
         Any names, contact details, dates of birth, or identifiers found in the document, or None.\n\
         \n\
         Document:\n{text}"
    )
}

/// Split text into groups of roughly `char_budget` characters at whitespace.
fn split_into_groups(text: &str, char_budget: usize) -> Vec<String> {
    let budget = char_budget.max(1);
    let mut groups = Vec::new();
    let mut current = String::new();
    for word in text.split_inclusive(char::is_whitespace) {
        if !current.is_empty() && current.len() + word.len() > budget {
            groups.push(std::mem::take(&mut current));
        }
        current.push_str(word);
    }
    if !current.trim().is_empty() {
        groups.push(current);
    }
    groups
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Parse the model's sectioned response into a [`DocumentSummary`].
///
/// Tolerates missing sections: with no recognizable headers the whole
/// response is treated as the prose summary.
fn parse_summary(document_id: &str, raw: &str) -> DocumentSummary {
    #[derive(Clone, Copy, PartialEq)]
    enum Section {
        Summary,
        KeyPoints,
        Personal,
    }

    let mut summary_lines: Vec<String> = Vec::new();
    let mut key_points: Vec<String> = Vec::new();
    let mut personal_lines: Vec<String> = Vec::new();
    let mut section = Section::Summary;

    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_header(trimmed, "summary") {
            section = Section::Summary;
            if !rest.is_empty() {
                summary_lines.push(rest.to_string());
            }
            continue;
        }
        if let Some(rest) = strip_header(trimmed, "key points") {
            section = Section::KeyPoints;
            if let Some(point) = strip_bullet(rest) {
                key_points.push(point);
            }
            continue;
        }
        if let Some(rest) = strip_header(trimmed, "personal information") {
            section = Section::Personal;
            if !rest.is_empty() {
                personal_lines.push(rest.to_string());
            }
            continue;
        }

        match section {
            Section::Summary => summary_lines.push(trimmed.to_string()),
            Section::KeyPoints => {
                if let Some(point) = strip_bullet(trimmed) {
                    key_points.push(point);
                }
            }
            Section::Personal => {
                if !trimmed.is_empty() {
                    personal_lines.push(trimmed.to_string());
                }
            }
        }
    }

    let summary = summary_lines.join("\n").trim().to_string();
    let paragraphs: Vec<String> = summary
        .split("\n\n")
        .map(|paragraph| paragraph.trim().replace('\n', " "))
        .filter(|paragraph| !paragraph.is_empty())
        .collect();
    let word_count = summary.split_whitespace().count();

    DocumentSummary {
        document_id: document_id.to_string(),
        summary,
        key_points,
        paragraphs,
        personal_info: personal_lines.join("\n"),
        word_count,
    }
}

/// Match a section header like `SUMMARY:` case-insensitively, returning any
/// content following the colon.
fn strip_header<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if line.len() < name.len()
        || !line.is_char_boundary(name.len())
        || !line[..name.len()].eq_ignore_ascii_case(name)
    {
        return None;
    }
    let rest = &line[name.len()..];
    if rest.is_empty() {
        Some("")
    } else if let Some(rest) = rest.strip_prefix(':') {
        Some(rest.trim())
    } else {
        None
    }
}

fn strip_bullet(line: &str) -> Option<String> {
    if line.is_empty() {
        return None;
    }
    let stripped = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
        .unwrap_or(line);
    let stripped = stripped.trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationError, TokenStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGeneration {
        calls: AtomicUsize,
        section_response: String,
        final_response: String,
    }

    impl ScriptedGeneration {
        fn new(section_response: &str, final_response: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                section_response: section_response.to_string(),
                final_response: final_response.to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl GenerationClient for ScriptedGeneration {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("PERSONAL INFORMATION") {
                Ok(self.final_response.clone())
            } else {
                Ok(self.section_response.clone())
            }
        }

        async fn generate_stream(&self, _prompt: &str) -> Result<TokenStream, GenerationError> {
            Err(GenerationError::GenerationFailed("not used".into()))
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            document_id: "doc".into(),
            index: 0,
            start: 0,
            end: text.chars().count(),
            text: text.to_string(),
        }
    }

    const STRUCTURED: &str = "SUMMARY:\nAn onboarding form for a new patient.\n\n\
        It lists contact and insurance details.\n\
        KEY POINTS:\n- Patient enrolled in 2026\n- Insurance on file\n\
        PERSONAL INFORMATION:\nJane Doe, jane@example.com";

    #[tokio::test]
    async fn short_document_is_summarized_directly() {
        let generation = Arc::new(ScriptedGeneration::new("unused", STRUCTURED));
        let summarizer = Summarizer::new(generation.clone(), 8192, 200, RetryPolicy::new(1, 1));

        let summary = summarizer
            .summarize("doc", &[chunk("A short patient onboarding form.")])
            .await
            .unwrap();

        assert_eq!(generation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.document_id, "doc");
        assert!(summary.summary.starts_with("An onboarding form"));
        assert_eq!(summary.key_points.len(), 2);
        assert_eq!(summary.paragraphs.len(), 2);
        assert_eq!(summary.personal_info, "Jane Doe, jane@example.com");
        assert_eq!(summary.word_count, summary.summary.split_whitespace().count());
    }

    #[tokio::test]
    async fn long_document_goes_through_map_reduce() {
        let generation = Arc::new(ScriptedGeneration::new("Facts.", STRUCTURED));
        // A tiny context window forces grouping.
        let summarizer = Summarizer::new(generation.clone(), 40, 200, RetryPolicy::new(1, 1));

        let text = "alpha beta gamma delta epsilon ".repeat(40);
        let summary = summarizer.summarize("doc", &[chunk(&text)]).await.unwrap();

        assert!(generation.calls.load(Ordering::SeqCst) >= 3);
        assert!(!summary.summary.is_empty());
        assert!(!summary.key_points.is_empty());
    }

    #[tokio::test]
    async fn empty_chunk_set_is_rejected() {
        let generation = Arc::new(ScriptedGeneration::new("unused", STRUCTURED));
        let summarizer = Summarizer::new(generation, 8192, 200, RetryPolicy::new(1, 1));
        let error = summarizer.summarize("doc", &[]).await.unwrap_err();
        assert!(matches!(error, SummarizeError::EmptyDocument));
    }

    #[test]
    fn parse_summary_handles_unstructured_output() {
        let parsed = parse_summary("doc", "Just a plain paragraph with no headers.");
        assert_eq!(parsed.summary, "Just a plain paragraph with no headers.");
        assert!(parsed.key_points.is_empty());
        assert!(parsed.personal_info.is_empty());
        assert_eq!(parsed.paragraphs.len(), 1);
    }

    #[test]
    fn split_into_groups_respects_budget() {
        let text = "one two three four five six seven eight";
        let groups = split_into_groups(text, 12);
        assert!(groups.len() > 1);
        assert_eq!(
            groups.concat().split_whitespace().collect::<Vec<_>>(),
            text.split_whitespace().collect::<Vec<_>>()
        );
    }

    #[test]
    fn strip_header_requires_colon_or_bare_name() {
        assert_eq!(strip_header("SUMMARY:", "summary"), Some(""));
        assert_eq!(strip_header("Summary: text", "summary"), Some("text"));
        assert_eq!(strip_header("SUMMARY", "summary"), Some(""));
        assert!(strip_header("summary of findings", "summary").is_none());
    }
}
