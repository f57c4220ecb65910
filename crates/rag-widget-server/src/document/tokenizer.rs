use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

// Both vocabularies ship inside the binary; loading them cannot fail at
// runtime, so the Lazy init is the only place an expect is acceptable.
static CL100K: Lazy<CoreBPE> = Lazy::new(|| cl100k_base().expect("embedded cl100k vocabulary"));
static O200K: Lazy<CoreBPE> = Lazy::new(|| o200k_base().expect("embedded o200k vocabulary"));

fn bpe_for_model(model: &str) -> &'static CoreBPE {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-4o")
        || model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        &O200K
    } else {
        // Everything else, including Gemini models, is counted with cl100k.
        // Gemini does not publish its tokenizer; cl100k is a stable estimate.
        &CL100K
    }
}

/// Deterministic token count for `text` under the given model family.
/// Stable across processes for the same inputs.
pub fn count_tokens(text: &str, model: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    bpe_for_model(model).encode_ordinary(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(count_tokens("", "gpt-4o-mini"), 0);
    }

    #[test]
    fn counting_is_deterministic() {
        let text = "Alpha. Beta. Gamma. ".repeat(50);
        let a = count_tokens(&text, "gpt-4o-mini");
        let b = count_tokens(&text, "gpt-4o-mini");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn model_families_select_different_vocabularies() {
        // Same text, different vocabularies, both non-zero.
        let text = "The quick brown fox jumps over the lazy dog.";
        assert!(count_tokens(text, "gpt-4o") > 0);
        assert!(count_tokens(text, "gemini-1.5-flash") > 0);
    }

    #[test]
    fn longer_text_counts_more_tokens() {
        let short = count_tokens("hello", "gpt-4o-mini");
        let long = count_tokens(&"hello world ".repeat(100), "gpt-4o-mini");
        assert!(long > short);
    }
}
