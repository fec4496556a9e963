//! Latent Dirichlet Allocation fitted with collapsed Gibbs sampling.
//!
//! Fitting is seeded, so identical corpora produce identical models.
//! Inference for a single document is a deterministic fold-in against the
//! fitted topic-word distribution and always returns a full-length vector
//! (minimum probability zero), which keeps every document comparable.

use crate::algorithms::dictionary::{BagOfWords, Dictionary};
use crate::algorithms::TopicModel;
use crate::config::TopicModelConfig;
use crate::error::{RecommenderError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdaParams {
    pub n_topics: usize,
    pub alpha: f64,
    pub beta: f64,
    pub iterations: usize,
    pub random_seed: u64,
    pub inference_iterations: usize,
}

impl LdaParams {
    pub fn from_config(config: &TopicModelConfig) -> Result<Self> {
        if config.n_topics == 0 {
            return Err(RecommenderError::InvalidRequest("n_topics must be positive".to_string()));
        }
        Ok(Self {
            n_topics: config.n_topics,
            alpha: config.alpha.unwrap_or(1.0 / config.n_topics as f64),
            beta: config.beta,
            iterations: config.iterations,
            random_seed: config.random_seed,
            inference_iterations: config.inference_iterations.max(1),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdaModel {
    params: LdaParams,
    n_terms: usize,
    /// Row-major `n_topics × n_terms` topic-word probabilities.
    topic_word: Vec<f64>,
}

impl LdaModel {
    pub fn fit(corpus: &[BagOfWords], n_terms: usize, params: LdaParams) -> Result<Self> {
        if corpus.is_empty() {
            return Err(RecommenderError::InvalidRequest(
                "cannot fit a topic model on an empty corpus".to_string(),
            ));
        }

        let k = params.n_topics;
        let mut rng = StdRng::seed_from_u64(params.random_seed);

        // Token streams with their current topic assignment.
        let mut tokens: Vec<Vec<(usize, usize)>> = Vec::with_capacity(corpus.len());
        let mut doc_topic = vec![vec![0u32; k]; corpus.len()];
        let mut topic_word = vec![0u32; k * n_terms];
        let mut topic_totals = vec![0u32; k];

        for (d, bow) in corpus.iter().enumerate() {
            let mut doc_tokens = Vec::with_capacity(bow.total_count() as usize);
            for &(word, count) in bow.iter() {
                if word >= n_terms {
                    continue;
                }
                for _ in 0..count {
                    let topic = rng.gen_range(0..k);
                    doc_topic[d][topic] += 1;
                    topic_word[topic * n_terms + word] += 1;
                    topic_totals[topic] += 1;
                    doc_tokens.push((word, topic));
                }
            }
            tokens.push(doc_tokens);
        }

        let v_beta = n_terms as f64 * params.beta;
        let mut weights = vec![0.0f64; k];

        for _ in 0..params.iterations {
            for (d, doc_tokens) in tokens.iter_mut().enumerate() {
                for token in doc_tokens.iter_mut() {
                    let (word, old_topic) = *token;
                    doc_topic[d][old_topic] -= 1;
                    topic_word[old_topic * n_terms + word] -= 1;
                    topic_totals[old_topic] -= 1;

                    let mut total = 0.0;
                    for topic in 0..k {
                        let weight = (doc_topic[d][topic] as f64 + params.alpha)
                            * (topic_word[topic * n_terms + word] as f64 + params.beta)
                            / (topic_totals[topic] as f64 + v_beta);
                        weights[topic] = weight;
                        total += weight;
                    }

                    let mut draw = rng.gen::<f64>() * total;
                    let mut new_topic = k - 1;
                    for (topic, weight) in weights.iter().enumerate() {
                        if draw < *weight {
                            new_topic = topic;
                            break;
                        }
                        draw -= weight;
                    }

                    doc_topic[d][new_topic] += 1;
                    topic_word[new_topic * n_terms + word] += 1;
                    topic_totals[new_topic] += 1;
                    token.1 = new_topic;
                }
            }
        }

        let mut probabilities = vec![0.0f64; k * n_terms];
        for topic in 0..k {
            let denom = topic_totals[topic] as f64 + v_beta;
            for word in 0..n_terms {
                probabilities[topic * n_terms + word] =
                    (topic_word[topic * n_terms + word] as f64 + params.beta) / denom;
            }
        }

        Ok(Self {
            params,
            n_terms,
            topic_word: probabilities,
        })
    }

    pub fn params(&self) -> &LdaParams {
        &self.params
    }

    pub fn n_terms(&self) -> usize {
        self.n_terms
    }

    pub fn word_probability(&self, topic: usize, word: usize) -> f64 {
        if topic >= self.params.n_topics || word >= self.n_terms {
            return 0.0;
        }
        self.topic_word[topic * self.n_terms + word]
    }

    /// Highest-probability tokens per topic.
    pub fn top_words(&self, dictionary: &Dictionary, n_words: usize) -> Vec<Vec<(String, f64)>> {
        (0..self.params.n_topics)
            .map(|topic| {
                let mut scored: Vec<(String, f64)> = (0..self.n_terms)
                    .filter_map(|word| {
                        dictionary
                            .token(word)
                            .map(|token| (token.to_string(), self.word_probability(topic, word)))
                    })
                    .collect();
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                scored.truncate(n_words);
                scored
            })
            .collect()
    }

    fn infer(&self, bow: &BagOfWords) -> Vec<f64> {
        let k = self.params.n_topics;
        let mut theta = vec![1.0 / k as f64; k];

        let known: Vec<(usize, f64)> = bow
            .iter()
            .filter(|(word, _)| *word < self.n_terms)
            .map(|(word, count)| (*word, *count as f64))
            .collect();
        if known.is_empty() {
            return theta;
        }

        for _ in 0..self.params.inference_iterations {
            let mut next = vec![self.params.alpha; k];
            for &(word, count) in &known {
                let denom: f64 = (0..k)
                    .map(|topic| theta[topic] * self.topic_word[topic * self.n_terms + word])
                    .sum();
                if denom <= 0.0 {
                    continue;
                }
                for topic in 0..k {
                    next[topic] +=
                        count * theta[topic] * self.topic_word[topic * self.n_terms + word] / denom;
                }
            }
            let total: f64 = next.iter().sum();
            for value in next.iter_mut() {
                *value /= total;
            }
            theta = next;
        }

        theta
    }
}

impl TopicModel for LdaModel {
    fn n_topics(&self) -> usize {
        self.params.n_topics
    }

    fn document_topics(&self, bow: &BagOfWords) -> Vec<f64> {
        self.infer(bow)
    }
}
