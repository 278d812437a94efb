//! Prompt assembly and response shaping for grounded answers.
//!
//! Retrieved chunks are embedded in the prompt with `[source N]` provenance
//! markers so answers can cite the passages they drew from. Confidence is
//! graded from the top similarity score, and the response carries truncated
//! previews of the supporting chunks.

use crate::index::ScoredChunk;

use super::types::{ChatTurn, Confidence, SourcePreview};

/// Characters of chunk text included in a source preview.
const PREVIEW_CHARS: usize = 200;

/// Conversation turns folded into the prompt for follow-up questions.
const HISTORY_TURNS: usize = 3;

/// Build the grounded prompt for a question over retrieved chunks.
pub(crate) fn build_answer_prompt(
    question: &str,
    hits: &[ScoredChunk],
    history: &[ChatTurn],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a helpful assistant answering questions about an uploaded document. \
         Answer using only the context below.\n\nContext:\n",
    );

    for (position, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!("[source {}]\n{}\n\n", position + 1, hit.text.trim()));
    }

    if !history.is_empty() {
        prompt.push_str("Previous conversation:\n");
        let recent = history.len().saturating_sub(HISTORY_TURNS);
        for turn in &history[recent..] {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Question: {question}\n\n"));
    prompt.push_str(
        "Instructions:\n\
         - Keep answers brief and to the point (2-4 sentences maximum)\n\
         - Use bullet points for lists or multiple items\n\
         - Cite supporting passages as [source N]\n\
         - If the context is insufficient, say so instead of guessing\n\n\
         Answer:",
    );
    prompt
}

/// Grade confidence from the top similarity score.
pub(crate) fn grade_confidence(top_score: Option<f32>) -> Confidence {
    match top_score {
        Some(score) if score > 0.6 => Confidence::High,
        Some(score) if score > 0.4 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// Build truncated previews of the retrieved chunks.
pub(crate) fn source_previews(hits: &[ScoredChunk]) -> Vec<SourcePreview> {
    hits.iter()
        .map(|hit| SourcePreview {
            chunk_index: hit.chunk_index,
            content: truncate_preview(&hit.text),
            relevance_score: hit.score,
        })
        .collect()
}

fn truncate_preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    preview.push('…');
    preview
}
