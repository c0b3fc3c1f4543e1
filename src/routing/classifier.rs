use anyhow::Context;
use async_trait::async_trait;
use regex::{RegexSet, RegexSetBuilder};

use crate::types::SecurityRequest;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrisisSignal {
    pub is_crisis: bool,
    /// Patterns (or model labels) that triggered the signal.
    pub matched: Vec<String>,
}

impl CrisisSignal {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Decides whether a request's content indicates an emergency.
///
/// Keyword matching, an on-device model, or a remote service can all sit
/// behind this seam without touching the routing algorithm.
#[async_trait]
pub trait CrisisClassifier: Send + Sync {
    async fn classify(&self, request: &SecurityRequest) -> anyhow::Result<CrisisSignal>;
}

/// Case-insensitive regular-expression matcher over the request payload.
pub struct KeywordCrisisClassifier {
    patterns: Vec<String>,
    set: RegexSet,
}

impl KeywordCrisisClassifier {
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .context("compile crisis patterns")?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub fn matches(&self, text: &str) -> Vec<String> {
        self.set
            .matches(text)
            .into_iter()
            .map(|idx| self.patterns[idx].clone())
            .collect()
    }
}

#[async_trait]
impl CrisisClassifier for KeywordCrisisClassifier {
    async fn classify(&self, request: &SecurityRequest) -> anyhow::Result<CrisisSignal> {
        let matched = self.matches(&request.payload);
        Ok(CrisisSignal {
            is_crisis: !matched.is_empty(),
            matched,
        })
    }
}
