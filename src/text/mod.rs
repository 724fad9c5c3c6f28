//! Transcript tokenization for the text encoder

mod tokenizer;

pub use tokenizer::{TextTokenizer, TokenizedText};

#[cfg(test)]
pub(crate) use tokenizer::tests::toy_tokenizer;
