use super::{Generation, GenerationRequest, StopReason, TextGenerator};
use crate::errors::GenerationError;
use tracing::debug;

/// Bounds for [`generate_with_continuation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationSettings {
    /// Maximum number of follow-up "continue" calls.
    pub limit: u32,
    /// Trailing characters of the output so far quoted in each follow-up.
    pub overlap: usize,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            limit: 2,
            overlap: 200,
        }
    }
}

/// Shortest repeated overlap that is stripped from a continuation.
const MIN_DEDUP_CHARS: usize = 12;

fn tail(text: &str, chars: usize) -> &str {
    let skip = text.chars().count().saturating_sub(chars);
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

fn continuation_prompt(original: &str, tail: &str) -> String {
    format!(
        "{original}\n\n---\n\nYour previous response was cut off. It ended with:\n\n\
         {tail}\n\nContinue exactly where it stopped. Do not repeat earlier text \
         and do not restart the response."
    )
}

/// Drop the start of `next` if it repeats the end of `so_far`.
fn strip_repeated_overlap<'a>(so_far: &str, next: &'a str) -> &'a str {
    let max = next.len().min(so_far.len());
    for len in (MIN_DEDUP_CHARS..=max).rev() {
        if !next.is_char_boundary(len) {
            continue;
        }
        if so_far.ends_with(&next[..len]) {
            return &next[len..];
        }
    }
    next
}

/// Generate, then resend a "continue" prompt while the output is truncated,
/// up to `settings.limit` times, concatenating the pieces.
pub async fn generate_with_continuation(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    settings: ContinuationSettings,
) -> Result<Generation, GenerationError> {
    let mut combined = generator.generate(request).await?;
    let mut continuations = 0;

    while combined.is_truncated() && continuations < settings.limit {
        continuations += 1;
        debug!(
            generator = generator.name(),
            continuation = continuations,
            chars_so_far = combined.content.len(),
            "Output truncated, requesting continuation"
        );

        let prompt = continuation_prompt(&request.prompt, tail(&combined.content, settings.overlap));
        let next = generator.generate(&request.with_prompt(prompt)).await?;

        let addition = strip_repeated_overlap(&combined.content, &next.content);
        combined.content.push_str(addition);
        combined.input_tokens += next.input_tokens;
        combined.output_tokens += next.output_tokens;
        combined.stop_reason = next.stop_reason;
    }

    if combined.stop_reason == StopReason::Truncated {
        debug!(
            generator = generator.name(),
            "Output still truncated after continuation limit"
        );
    }
    Ok(combined)
}
