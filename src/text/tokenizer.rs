//! Text tokenization
//!
//! Wrapper around a HuggingFace `tokenizer.json` (WordPiece for the BERT
//! backbone). Every encoding is truncated and padded to the same fixed length.

use candle_core::{Device, Tensor};
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::core::error::{EmoError, Result};

/// Token ids and attention mask of one utterance transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
}

impl TokenizedText {
    /// Wrap pre-tokenized input; both sequences must be non-empty and equally long
    pub fn new(input_ids: Vec<u32>, attention_mask: Vec<u32>) -> Result<Self> {
        if input_ids.is_empty() {
            return Err(EmoError::invalid_input("input_ids", "token sequence is empty"));
        }
        if input_ids.len() != attention_mask.len() {
            return Err(EmoError::invalid_input(
                "attention_mask",
                format!(
                    "{} mask entries for {} tokens",
                    attention_mask.len(),
                    input_ids.len()
                ),
            ));
        }
        Ok(Self {
            input_ids,
            attention_mask,
        })
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Tokens that are not padding
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }

    /// `(input_ids, attention_mask)`, each `(1, len)` u32
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let ids = Tensor::new(self.input_ids.as_slice(), device)?.unsqueeze(0)?;
        let mask = Tensor::new(self.attention_mask.as_slice(), device)?.unsqueeze(0)?;
        Ok((ids, mask))
    }
}

/// Fixed-length transcript tokenizer
pub struct TextTokenizer {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl TextTokenizer {
    /// Load from a `tokenizer.json` file
    pub fn load<P: AsRef<Path>>(path: P, max_length: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmoError::Tokenization {
                message: format!("tokenizer file not found: {:?}", path),
            });
        }
        let tokenizer = Tokenizer::from_file(path).map_err(|e| EmoError::Tokenization {
            message: format!("failed to load tokenizer from {:?}: {}", path, e),
        })?;
        Self::from_tokenizer(tokenizer, max_length)
    }

    /// Configure an already constructed tokenizer for fixed-length output
    pub fn from_tokenizer(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(EmoError::invalid_input("max_length", "must be greater than zero"));
        }

        let pad_token = ["[PAD]", "<pad>"]
            .into_iter()
            .find(|t| tokenizer.token_to_id(t).is_some())
            .unwrap_or("[PAD]");
        let pad_id = tokenizer.token_to_id(pad_token).unwrap_or(0);

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token: pad_token.to_string(),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| EmoError::Tokenization {
                message: format!("invalid truncation settings: {}", e),
            })?;

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Encode with special tokens, truncated and padded to `max_length`
    pub fn encode(&self, text: &str) -> Result<TokenizedText> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmoError::Tokenization {
                message: format!("failed to encode {:?}: {}", text, e),
            })?;
        TokenizedText::new(
            encoding.get_ids().to_vec(),
            encoding.get_attention_mask().to_vec(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal word-level tokenizer with BERT-style special tokens
    pub(crate) const TOY_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "BertProcessing",
            "sep": ["[SEP]", 3],
            "cls": ["[CLS]", 2]
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3,
                      "i": 4, "am": 5, "so": 6, "happy": 7, "today": 8},
            "unk_token": "[UNK]"
        }
    }"#;

    pub(crate) fn toy_tokenizer(max_length: usize) -> TextTokenizer {
        let tokenizer: Tokenizer = TOY_TOKENIZER.parse().unwrap();
        TextTokenizer::from_tokenizer(tokenizer, max_length).unwrap()
    }

    #[test]
    fn test_encode_pads_to_fixed_length() {
        let tokens = toy_tokenizer(16).encode("I am so happy").unwrap();
        assert_eq!(tokens.len(), 16);
        assert_eq!(&tokens.input_ids()[..6], &[2, 4, 5, 6, 7, 3]);
        assert!(tokens.input_ids()[6..].iter().all(|&id| id == 0));
        assert_eq!(tokens.real_tokens(), 6);
    }

    #[test]
    fn test_encode_truncates_long_text() {
        let text = "i am so happy today ".repeat(10);
        let tokens = toy_tokenizer(8).encode(&text).unwrap();
        assert_eq!(tokens.len(), 8);
        assert_eq!(tokens.real_tokens(), 8);
        assert_eq!(tokens.input_ids()[0], 2);
        assert_eq!(tokens.input_ids()[7], 3);
    }

    #[test]
    fn test_unknown_words() {
        let tokens = toy_tokenizer(8).encode("happy banana").unwrap();
        assert_eq!(&tokens.input_ids()[..4], &[2, 7, 1, 3]);
    }

    #[test]
    fn test_pretokenized_validation() {
        assert!(TokenizedText::new(vec![], vec![]).is_err());
        assert!(TokenizedText::new(vec![2, 3], vec![1]).is_err());
        let tokens = TokenizedText::new(vec![2, 7, 3, 0], vec![1, 1, 1, 0]).unwrap();
        assert_eq!(tokens.real_tokens(), 3);
    }

    #[test]
    fn test_to_tensors_shape() {
        let tokens = TokenizedText::new(vec![2, 7, 3, 0], vec![1, 1, 1, 0]).unwrap();
        let (ids, mask) = tokens.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(ids.dims(), &[1, 4]);
        assert_eq!(mask.dims(), &[1, 4]);
        assert_eq!(mask.to_vec2::<u32>().unwrap(), vec![vec![1, 1, 1, 0]]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            TextTokenizer::load("/nonexistent/tokenizer.json", 128),
            Err(EmoError::Tokenization { .. })
        ));
    }
}
