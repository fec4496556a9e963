use crate::config::TextConfig;
use crate::error::{RecommenderError, Result};
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use stop_words::LANGUAGE;

/// Normalizes raw descriptions into token sequences.
///
/// The pipeline is pure: lowercase, drop links and email-like substrings,
/// drop characters outside the alphabet, stem each word, split on word
/// boundaries, then remove stopwords. Stopwords are matched against the
/// stemmed tokens.
pub struct TextPreprocessor {
    link_pattern: Regex,
    outside_alphabet: Regex,
    word_pattern: Regex,
    stemmer: Stemmer,
    stopwords: HashSet<String>,
}

impl TextPreprocessor {
    pub fn new(config: &TextConfig) -> Result<Self> {
        let link_pattern = Regex::new(
            r"((\S+)?(https?)(\S+))|((\S+)?(www)(\S+))|((\S+)?(@)(\S+)?)",
        )
        .map_err(|e| RecommenderError::InvalidRequest(format!("link pattern: {}", e)))?;

        let outside_alphabet = Regex::new(&format!(r"[^{}\s]", config.alphabet)).map_err(|e| {
            RecommenderError::InvalidRequest(format!("invalid alphabet '{}': {}", config.alphabet, e))
        })?;

        let word_pattern = Regex::new(r"\w+")
            .map_err(|e| RecommenderError::InvalidRequest(format!("word pattern: {}", e)))?;

        let mut stopwords: HashSet<String> = stop_words::get(stopword_language(&config.stopword_language)?)
            .iter()
            .map(|word| word.to_string())
            .collect();
        stopwords.extend(config.extra_stopwords.iter().map(|word| word.to_lowercase()));

        Ok(Self {
            link_pattern,
            outside_alphabet,
            word_pattern,
            stemmer: Stemmer::create(stemmer_algorithm(&config.stemmer_language)?),
            stopwords,
        })
    }

    pub fn preprocess(&self, raw_text: &str) -> Vec<String> {
        let lowered = raw_text.to_lowercase();
        let without_links = self.link_pattern.replace_all(&lowered, " ");
        let restricted = self.outside_alphabet.replace_all(&without_links, "");

        let stemmed = restricted
            .split_whitespace()
            .map(|word| self.stemmer.stem(word).into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        self.word_pattern
            .find_iter(&stemmed)
            .map(|token| token.as_str())
            .filter(|token| !self.stopwords.contains(*token))
            .map(str::to_string)
            .collect()
    }

    /// Missing descriptions yield an empty token sequence.
    pub fn preprocess_optional(&self, raw_text: Option<&str>) -> Vec<String> {
        raw_text.map(|text| self.preprocess(text)).unwrap_or_default()
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }
}

fn stemmer_algorithm(language: &str) -> Result<Algorithm> {
    let algorithm = match language.to_lowercase().as_str() {
        "english" | "en" => Algorithm::English,
        "french" | "fr" => Algorithm::French,
        "german" | "de" => Algorithm::German,
        "spanish" | "es" => Algorithm::Spanish,
        "italian" | "it" => Algorithm::Italian,
        "portuguese" | "pt" => Algorithm::Portuguese,
        "dutch" | "nl" => Algorithm::Dutch,
        "finnish" | "fi" => Algorithm::Finnish,
        "hungarian" | "hu" => Algorithm::Hungarian,
        "turkish" | "tr" => Algorithm::Turkish,
        other => {
            return Err(RecommenderError::InvalidRequest(format!(
                "unsupported stemmer language '{}'",
                other
            )))
        }
    };
    Ok(algorithm)
}

fn stopword_language(language: &str) -> Result<LANGUAGE> {
    let language = match language.to_lowercase().as_str() {
        "english" | "en" => LANGUAGE::English,
        "french" | "fr" => LANGUAGE::French,
        "german" | "de" => LANGUAGE::German,
        "spanish" | "es" => LANGUAGE::Spanish,
        "italian" | "it" => LANGUAGE::Italian,
        "portuguese" | "pt" => LANGUAGE::Portuguese,
        "dutch" | "nl" => LANGUAGE::Dutch,
        "finnish" | "fi" => LANGUAGE::Finnish,
        "hungarian" | "hu" => LANGUAGE::Hungarian,
        "turkish" | "tr" => LANGUAGE::Turkish,
        other => {
            return Err(RecommenderError::InvalidRequest(format!(
                "unsupported stopword language '{}'",
                other
            )))
        }
    };
    Ok(language)
}
