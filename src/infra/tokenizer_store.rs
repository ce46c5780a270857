// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Builds, saves and loads the word-level tokenizer that lives in
// every model directory as tokenizer.json.
//
// The vocabulary is ranked here from the cleaned training texts
// and handed to a WordLevel model, so ids are reproducible for a
// given corpus and vocab size.
//
// Special token ids follow the BERT convention, so the embedding
// table must be sized from the largest id, not the word count.
//
// Reference: Devlin et al. (2019) BERT

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokenizers::{
    models::wordlevel::WordLevel,
    normalizers::{bert::BertNormalizer, NormalizerWrapper},
    pre_tokenizers::{whitespace::Whitespace, PreTokenizerWrapper},
    AddedToken, Tokenizer,
};

pub const TOKENIZER_FILE: &str = "tokenizer.json";

const UNK: &str = "[UNK]";

/// Special tokens and their BERT ids.
const SPECIAL_TOKENS: [(&str, u32); 5] = [
    ("[PAD]", 0),
    (UNK, 1),
    ("[CLS]", 101),
    ("[SEP]", 102),
    ("[MASK]", 103),
];
const FIRST_WORD_ID: usize = 104;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.path();
        if !self.exists() {
            anyhow::bail!("No tokenizer at '{}'", path.display());
        }
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    /// Write `tokenizer` into this store's directory.
    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.path();
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write tokenizer to '{}': {}", path.display(), e))
    }

    /// Build a word-level vocabulary of at most `vocab_size` entries
    /// (special tokens included) from `texts` and save it.
    pub fn build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        let words = rank_words(texts, vocab_size.saturating_sub(SPECIAL_TOKENS.len()));

        let mut vocab: HashMap<String, u32> = SPECIAL_TOKENS
            .iter()
            .map(|&(token, id)| (token.to_string(), id))
            .collect();
        vocab.extend(words.iter().cloned().zip(FIRST_WORD_ID as u32..));

        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token(UNK.to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("Cannot build word-level model: {e}"))?;

        let mut tokenizer = Tokenizer::new(model);
        tokenizer
            .with_normalizer(NormalizerWrapper::from(BertNormalizer::new(true, true, None, true)))
            .with_pre_tokenizer(PreTokenizerWrapper::from(Whitespace::default()));
        let specials: Vec<AddedToken> = SPECIAL_TOKENS
            .iter()
            .map(|&(token, _)| AddedToken::from(token, true))
            .collect();
        tokenizer.add_special_tokens(&specials);

        self.save(&tokenizer)?;
        tracing::info!("Tokenizer built with {} words, saved to '{}'", words.len(), self.path().display());
        Ok(tokenizer)
    }
}

/// The `limit` most frequent lowercased words. Equal counts are ordered
/// alphabetically so the same corpus always yields the same ids.
fn rank_words(texts: &[String], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let words = texts
        .iter()
        .flat_map(|text| text.split_whitespace())
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty());
    for word in words {
        *counts.entry(word).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_unstable_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

/// Embedding rows needed to cover every id the tokenizer can emit.
pub fn vocab_bound(tokenizer: &Tokenizer) -> usize {
    tokenizer
        .get_vocab(true)
        .values()
        .max()
        .map_or(FIRST_WORD_ID, |&max| max as usize + 1)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "The film was great, great fun!".to_string(),
            "A dull film.".to_string(),
        ]
    }

    #[test]
    fn test_build_assigns_ids_after_special_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let tokenizer = store.build(&corpus(), 100).unwrap();

        assert!(store.exists());
        // "film" and "great" occur twice; "film" wins the tie alphabetically
        assert_eq!(tokenizer.token_to_id("film"), Some(104));
        assert_eq!(tokenizer.token_to_id("great"), Some(105));
        assert_eq!(tokenizer.token_to_id("[CLS]"), Some(101));
        // film, great, then a, dull, fun, the, was
        assert_eq!(vocab_bound(&tokenizer), 104 + 7);
    }

    #[test]
    fn test_vocab_size_limits_words() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = TokenizerStore::new(dir.path()).build(&corpus(), 7).unwrap();
        assert_eq!(vocab_bound(&tokenizer), 106);
        assert_eq!(tokenizer.token_to_id("dull"), None);
    }

    #[test]
    fn test_save_into_another_directory() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let tokenizer = TokenizerStore::new(src.path()).build(&corpus(), 100).unwrap();

        let target = TokenizerStore::new(dst.path().join("model"));
        target.save(&tokenizer).unwrap();
        let copy = target.load().unwrap();
        assert_eq!(copy.token_to_id("film"), Some(104));
    }
}
