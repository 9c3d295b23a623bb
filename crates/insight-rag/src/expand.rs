//! Query expansion with related scripture vocabulary.
//!
//! A topic matches when its name, or one of its first three terms, appears
//! in the query as a whole word or phrase. Every matching topic contributes
//! its terms; a question word (how, what, why, when) adds a few framing
//! terms. Terms already in the query are not repeated.

use std::collections::{BTreeMap, HashSet};

use insight_core::config::RetrievalSettings;

const MAX_TERMS: usize = 15;

const TOPICS: &[(&str, &[&str])] = &[
    ("anger", &["krodh", "anger", "rage", "peace", "calm", "patience", "forgiveness", "equanimity"]),
    (
        "meditation",
        &["simran", "meditation", "prayer", "naam", "jap", "concentration", "divine remembrance", "amrit vela"],
    ),
    ("ego", &["haumai", "ego", "pride", "arrogance", "humility", "surrender", "selfless", "nimrata"]),
    ("fear", &["bhau", "fear", "anxiety", "courage", "faith", "trust", "divine protection"]),
    ("wealth", &["dhan", "wealth", "money", "greed", "contentment", "attachment", "true riches", "santokh"]),
    ("relationships", &["family", "marriage", "friendship", "community", "harmony", "sangat", "compassion"]),
    ("truth", &["sat", "truth", "reality", "honesty", "integrity", "illusion", "maya", "wisdom"]),
    ("duty", &["dharam", "duty", "responsibility", "karma", "righteousness", "conduct", "discipline"]),
    ("liberation", &["mukti", "liberation", "salvation", "freedom", "enlightenment", "union"]),
    ("suffering", &["dukh", "suffering", "pain", "comfort", "relief", "healing", "acceptance"]),
    ("god", &["waheguru", "divine", "lord", "creator", "akal", "hari", "prabh"]),
    ("soul", &["atma", "spirit", "consciousness", "jot", "light"]),
    ("guru", &["satguru", "teacher", "guide", "teachings", "instruction"]),
    ("equality", &["oneness", "equal", "unity", "justice", "sarbat da bhala"]),
];

const QUESTION_CUES: &[(&[&str], &[&str])] = &[
    (&["how", "way", "ways"], &["method", "practice", "guidance", "path"]),
    (&["what", "explain", "mean", "meaning"], &["concept", "teaching", "principle"]),
    (&["why", "reason", "purpose"], &["purpose", "significance", "cause"]),
    (&["when"], &["time", "circumstance", "stage"]),
];

#[derive(Debug, Clone)]
pub struct QueryExpander {
    topics: BTreeMap<String, Vec<String>>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        let topics = TOPICS
            .iter()
            .map(|(topic, terms)| (topic.to_string(), terms.iter().map(|t| t.to_string()).collect()))
            .collect();
        Self { topics }
    }
}

impl QueryExpander {
    pub fn new(topics: BTreeMap<String, Vec<String>>) -> Self {
        Self { topics }
    }

    /// `None` unless `retrieval.expand_query` is set.
    pub fn from_settings(settings: &RetrievalSettings) -> Option<Self> {
        if !settings.expand_query {
            return None;
        }
        if settings.expansions.is_empty() {
            Some(Self::default())
        } else {
            Some(Self::new(settings.expansions.clone()))
        }
    }

    pub fn expand(&self, text: &str) -> String {
        let words = words(text);
        let mut candidates: Vec<&str> = Vec::new();
        for (topic, terms) in &self.topics {
            if contains_phrase(&words, topic) || terms.iter().take(3).any(|t| contains_phrase(&words, t)) {
                candidates.extend(terms.iter().map(String::as_str));
            }
        }
        let cue = QUESTION_CUES.iter().find(|(cues, _)| cues.iter().any(|c| words.iter().any(|w| w == c)));
        if let Some((_, framing)) = cue {
            candidates.extend(framing.iter().copied());
        }

        let mut seen = HashSet::new();
        let added: Vec<&str> = candidates
            .into_iter()
            .filter(|t| !contains_phrase(&words, t) && seen.insert(t.to_lowercase()))
            .take(MAX_TERMS)
            .collect();
        if added.is_empty() {
            text.to_string()
        } else {
            format!("{text} {}", added.join(" "))
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<String> = phrase.split_whitespace().map(str::to_lowercase).collect();
    !needle.is_empty() && words.windows(needle.len()).any(|w| w == needle.as_slice())
}
