//! LLM-side confidence from the model's own token log-probabilities.
//!
//! Each scalar is located in the generated text with a cursor that only moves
//! forward, so equal values map to successive occurrences. The covering
//! tokens' mean log-probability is turned back into a probability.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{build_tree, ConfidenceLeaf, ConfidenceTree, LeafEvaluator};

/// The API marks unavailable or filtered log-probabilities with this floor.
pub const LOGPROB_SENTINEL: f64 = -9999.0;

/// One generated token as reported by the chat-completions API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    #[serde(default)]
    pub logprob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
}

/// Re-renders a token to the exact bytes it contributed to the generated text.
pub trait TokenTextDecoder {
    fn decoded_len(&self, token: &TokenLogprob) -> usize;
}

/// Uses the token's raw `bytes` when the API sent them, else its string form.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenDecoder;

impl TokenTextDecoder for ByteTokenDecoder {
    fn decoded_len(&self, token: &TokenLogprob) -> usize {
        token
            .bytes
            .as_ref()
            .map(|b| b.len())
            .unwrap_or_else(|| token.token.len())
    }
}

/// Byte offset of every token in the generated text.
pub fn token_offsets(logprobs: &[TokenLogprob], decoder: &dyn TokenTextDecoder) -> Vec<(usize, usize)> {
    let mut offset = 0;
    logprobs
        .iter()
        .map(|t| {
            let len = decoder.decoded_len(t);
            let range = (offset, offset + len);
            offset += len;
            range
        })
        .collect()
}

/// Text form of a scalar as it appears inside generated JSON.
fn generated_form(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(_) => {
            let quoted = serde_json::to_string(value).ok()?;
            Some(quoted[1..quoted.len() - 1].to_string())
        }
        Value::Array(_) | Value::Object(_) => None,
        scalar => Some(scalar.to_string()),
    }
}

/// Forward-only search position in the generated text.
#[derive(Debug, Default)]
pub struct TextCursor {
    pub offset: usize,
}

impl TextCursor {
    /// Find `needle` at or after the cursor and move past it.
    pub fn advance_to(&mut self, haystack: &str, needle: &str) -> Option<(usize, usize)> {
        let rest = haystack.get(self.offset..)?;
        let start = self.offset + rest.find(needle)?;
        let end = start + needle.len();
        self.offset = end;
        Some((start, end))
    }
}

#[derive(Debug, Default)]
pub struct LlmConfidenceEvaluator;

impl LlmConfidenceEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Score every scalar of `extracted` by the log-probabilities of the tokens
    /// that generated it.
    ///
    /// Without a decoder the token offsets are unknown; the result then keeps
    /// the tree's shape but carries no scores.
    pub fn evaluate(
        &self,
        extracted: &Value,
        generated_text: &str,
        logprobs: &[TokenLogprob],
        decoder: Option<&dyn TokenTextDecoder>,
    ) -> ConfidenceTree {
        let Some(decoder) = decoder else {
            warn!("No token decoder available, LLM confidence degraded to no signal");
            return build_tree(extracted, &mut Unscored);
        };

        let offsets = token_offsets(logprobs, decoder);
        let mut leaf_eval = LogprobLeafEvaluator {
            text: generated_text,
            logprobs,
            offsets: &offsets,
            cursor: TextCursor::default(),
        };
        let tree = build_tree(extracted, &mut leaf_eval);
        debug!(
            "LLM confidence: {} fields over {} tokens, overall {:.3}",
            tree.leaves().len(),
            logprobs.len(),
            tree.overall
        );
        tree
    }
}

struct Unscored;

impl LeafEvaluator for Unscored {
    fn evaluate_leaf(&mut self, field_path: &str, value: &Value) -> ConfidenceLeaf {
        ConfidenceLeaf::scored(field_path, value, None)
    }
}

struct LogprobLeafEvaluator<'a> {
    text: &'a str,
    logprobs: &'a [TokenLogprob],
    offsets: &'a [(usize, usize)],
    cursor: TextCursor,
}

impl LogprobLeafEvaluator<'_> {
    fn score(&mut self, value: &Value) -> f64 {
        let Some(needle) = generated_form(value) else {
            return 0.0;
        };
        let Some((start, end)) = self.cursor.advance_to(self.text, &needle) else {
            return 0.0;
        };

        let usable: Vec<f64> = self
            .offsets
            .iter()
            .zip(self.logprobs)
            .filter(|((t_start, t_end), _)| *t_start < end && *t_end > start)
            .filter_map(|(_, t)| t.logprob)
            .filter(|lp| *lp > LOGPROB_SENTINEL && lp.is_finite())
            .collect();
        if usable.is_empty() {
            return 0.0;
        }

        let mean = usable.iter().sum::<f64>() / usable.len() as f64;
        mean.exp().clamp(0.0, 1.0)
    }
}

impl LeafEvaluator for LogprobLeafEvaluator<'_> {
    fn evaluate_leaf(&mut self, field_path: &str, value: &Value) -> ConfidenceLeaf {
        let confidence = self.score(value);
        ConfidenceLeaf::scored(field_path, value, Some(confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tok(token: &str, logprob: f64) -> TokenLogprob {
        TokenLogprob {
            token: token.to_string(),
            logprob: Some(logprob),
            bytes: None,
        }
    }

    /// Tokenize generated text into the given pieces with matching logprobs.
    fn tokens(pieces: &[(&str, f64)]) -> (String, Vec<TokenLogprob>) {
        let text = pieces.iter().map(|(p, _)| *p).collect::<String>();
        let toks = pieces.iter().map(|(p, lp)| tok(p, *lp)).collect();
        (text, toks)
    }

    fn confidence(tree: &ConfidenceTree, index: usize) -> Option<f64> {
        tree.leaves()[index].confidence
    }

    #[test]
    fn test_single_value_confidence() {
        let (text, toks) = tokens(&[
            ("{\"", 0.0),
            ("invoiceId", 0.0),
            ("\":\"", 0.0),
            ("INV", -0.1),
            ("-2024", -0.3),
            ("-001", -0.2),
            ("\"}", 0.0),
        ]);
        let tree = LlmConfidenceEvaluator::new().evaluate(
            &json!({"invoiceId": "INV-2024-001"}),
            &text,
            &toks,
            Some(&ByteTokenDecoder),
        );
        let expected = (-0.2f64).exp();
        assert!((confidence(&tree, 0).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_values_use_successive_occurrences() {
        let (text, toks) = tokens(&[
            ("{\"a\":\"", 0.0),
            ("X", -0.05),
            ("\",\"b\":\"", 0.0),
            ("X", -2.0),
            ("\"}", 0.0),
        ]);
        let tree = LlmConfidenceEvaluator::new().evaluate(
            &json!({"a": "X", "b": "X"}),
            &text,
            &toks,
            Some(&ByteTokenDecoder),
        );
        assert!((confidence(&tree, 0).unwrap() - (-0.05f64).exp()).abs() < 1e-9);
        assert!((confidence(&tree, 1).unwrap() - (-2.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_sentinel_logprobs_are_ignored() {
        let (text, toks) = tokens(&[("{\"t\":", 0.0), ("12", -9999.0), ("5", -0.5), ("}", 0.0)]);
        let tree = LlmConfidenceEvaluator::new().evaluate(
            &json!({"t": 125}),
            &text,
            &toks,
            Some(&ByteTokenDecoder),
        );
        assert!((confidence(&tree, 0).unwrap() - (-0.5f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_value_not_in_text_scores_zero() {
        let (text, toks) = tokens(&[("{\"a\":\"Y\"}", -0.1)]);
        let tree = LlmConfidenceEvaluator::new().evaluate(
            &json!({"a": "Z", "b": ""}),
            &text,
            &toks,
            Some(&ByteTokenDecoder),
        );
        assert_eq!(confidence(&tree, 0), Some(0.0));
        assert_eq!(confidence(&tree, 1), Some(0.0));
    }

    #[test]
    fn test_multibyte_tokens_use_bytes() {
        let text = "{\"c\":\"Zürich\"}";
        let toks = vec![
            tok("{\"c\":\"", 0.0),
            tok("Z", -0.1),
            // First half of "ü", rendered lossily by the API.
            TokenLogprob {
                token: "\u{fffd}".to_string(),
                logprob: Some(-0.1),
                bytes: Some(vec![0xc3]),
            },
            TokenLogprob {
                token: "\u{fffd}rich".to_string(),
                logprob: Some(-0.1),
                bytes: Some(vec![0xbc, b'r', b'i', b'c', b'h']),
            },
            tok("\"}", -3.0),
        ];
        let tree = LlmConfidenceEvaluator::new().evaluate(
            &json!({"c": "Zürich"}),
            text,
            &toks,
            Some(&ByteTokenDecoder),
        );
        assert!((confidence(&tree, 0).unwrap() - (-0.1f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_missing_decoder_degrades() {
        let tree = LlmConfidenceEvaluator::new().evaluate(&json!({"a": "b", "n": [1, 2]}), "", &[], None);
        assert_eq!(tree.leaves().len(), 3);
        assert!(tree.leaves().iter().all(|l| l.confidence.is_none()));
        assert_eq!(tree.overall, 0.0);

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["a"]["confidence"], json!(0.0));
        assert_eq!(json["n"][1]["confidence"], json!(0.0));
    }

    #[test]
    fn test_empty_tree() {
        let tree = LlmConfidenceEvaluator::new().evaluate(&json!({}), "{}", &[], Some(&ByteTokenDecoder));
        assert_eq!(serde_json::to_value(&tree).unwrap(), json!({"_overall": 0.0}));
    }

    #[test]
    fn test_cursor_never_moves_back() {
        let mut cursor = TextCursor::default();
        assert_eq!(cursor.advance_to("abcabc", "bc"), Some((1, 3)));
        assert_eq!(cursor.advance_to("abcabc", "bc"), Some((4, 6)));
        assert_eq!(cursor.advance_to("abcabc", "a"), None);
    }

    proptest! {
        #[test]
        fn prop_confidence_is_clamped(lps in proptest::collection::vec(-20.0f64..5.0, 1..8)) {
            let pieces: Vec<(String, f64)> = lps
                .iter()
                .enumerate()
                .map(|(i, lp)| (format!("v{}", i), *lp))
                .collect();
            let text: String = pieces.iter().map(|(p, _)| p.as_str()).collect();
            let toks: Vec<TokenLogprob> = pieces.iter().map(|(p, lp)| tok(p, *lp)).collect();
            let extracted = json!({"all": text.clone()});
            let tree = LlmConfidenceEvaluator::new().evaluate(&extracted, &text, &toks, Some(&ByteTokenDecoder));
            let c = tree.leaves()[0].confidence.unwrap();
            prop_assert!((0.0..=1.0).contains(&c));
        }
    }
}
