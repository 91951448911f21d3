//! Perception
//!
//! What the controller understood about one input: intent, complexity and
//! context. Intent comes from a pluggable [`Classifier`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builtin::has_arithmetic;
use crate::error::{AgentError, Result};

/// Caller-supplied context merged into a perception
pub type Context = serde_json::Map<String, Value>;

/// Context key holding entries recalled from memory
pub const RECALLED_KEY: &str = "recalled";

/// Closed set of input categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Conversation,
    Calculation,
    InformationLookup,
    ValidationRequired,
    /// Anything the classifier could not place
    General,
}

impl Intent {
    pub const ALL: [Self; 5] = [
        Self::Conversation,
        Self::Calculation,
        Self::InformationLookup,
        Self::ValidationRequired,
        Self::General,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Calculation => "calculation",
            Self::InformationLookup => "information_lookup",
            Self::ValidationRequired => "validation_required",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
            .or(match normalized.as_str() {
                "information" | "question" | "lookup" => Some(Self::InformationLookup),
                "validation" | "approval" => Some(Self::ValidationRequired),
                "other" => Some(Self::General),
                _ => None,
            })
            .ok_or_else(|| AgentError::Classification(format!("Unknown intent: {s}")))
    }
}

/// Input complexity on a 1..=5 scale
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Complexity(u8);

impl Complexity {
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(5);

    /// Clamp any value into range
    pub fn saturating(value: u8) -> Self {
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    /// Estimate from word count
    pub fn estimate(text: &str) -> Self {
        match text.split_whitespace().count() {
            0..10 => Self(1),
            10..20 => Self(2),
            20..40 => Self(3),
            40..80 => Self(4),
            _ => Self(5),
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Complexity {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("complexity {value} outside 1..=5"))
        }
    }
}

impl From<Complexity> for u8 {
    fn from(value: Complexity) -> Self {
        value.0
    }
}

/// Result of the Perceive phase; read-only once built
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Perception {
    pub input: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Intent,
    pub complexity: Complexity,
    #[serde(default)]
    pub context: Context,
    pub role: String,
}

impl Perception {
    pub fn new(input: impl Into<String>, intent: Intent, role: impl Into<String>) -> Self {
        let input = input.into();
        Self {
            complexity: Complexity::estimate(&input),
            input,
            timestamp: Utc::now(),
            intent,
            context: Context::new(),
            role: role.into(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context.extend(context);
        self
    }

    /// Memory entries recalled during perception, if any
    pub fn recalled(&self) -> Option<&Value> {
        self.context.get(RECALLED_KEY)
    }
}

/// Intent classification capability
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Intent>;
}

/// Lexical rule classifier
///
/// Rules are checked in order; the first rule with a matching word wins.
/// Inputs with a clear arithmetic operator are calculations unless an
/// earlier rule fires; dashed dates and phone numbers are not.
#[derive(Clone, Debug)]
pub struct KeywordClassifier {
    rules: Vec<(Intent, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let rule = |intent, words: &[&str]| {
            (intent, words.iter().map(|w| (*w).to_string()).collect())
        };
        Self {
            rules: vec![
                rule(
                    Intent::ValidationRequired,
                    &[
                        "approve", "approval", "confirm", "authorize", "delete", "refund",
                        "transfer", "payment", "cancel", "validate", "deploy",
                    ],
                ),
                rule(
                    Intent::Calculation,
                    &["calculate", "compute", "sum", "multiply", "divide", "plus", "minus"],
                ),
                rule(
                    Intent::Conversation,
                    &["hello", "hi", "hey", "thanks", "thank", "bye", "goodbye", "morning"],
                ),
                rule(
                    Intent::InformationLookup,
                    &[
                        "what", "who", "when", "where", "which", "why", "how", "search", "find",
                        "lookup", "weather", "news", "latest", "explain",
                    ],
                ),
            ],
        }
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier with no rules at all
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule, checked after the existing ones
    #[must_use]
    pub fn with_rule(mut self, intent: Intent, words: &[&str]) -> Self {
        self.rules
            .push((intent, words.iter().map(|w| w.to_lowercase()).collect()));
        self
    }

    /// Synchronous classification
    pub fn classify_text(&self, text: &str) -> Intent {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        for (intent, keywords) in &self.rules {
            if *intent == Intent::Calculation && has_arithmetic(text) {
                return Intent::Calculation;
            }
            if words.iter().any(|w| keywords.contains(w)) {
                return *intent;
            }
        }

        if text.trim_end().ends_with('?') {
            return Intent::InformationLookup;
        }

        Intent::General
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Intent> {
        Ok(self.classify_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_rules() {
        let c = KeywordClassifier::new();
        assert_eq!(c.classify_text("15 * 8 + 42"), Intent::Calculation);
        assert_eq!(c.classify_text("What is 2 + 2?"), Intent::Calculation);
        assert_eq!(c.classify_text("Please calculate my taxes"), Intent::Calculation);
        assert_eq!(c.classify_text("Hello there"), Intent::Conversation);
        assert_eq!(c.classify_text("What's the weather in Tokyo"), Intent::InformationLookup);
        assert_eq!(c.classify_text("Is it open on Sundays?"), Intent::InformationLookup);
        assert_eq!(c.classify_text("Please refund order 1234"), Intent::ValidationRequired);
        assert_eq!(c.classify_text("blue sky thinking"), Intent::General);
        assert_eq!(c.classify_text("What happened on 2024-01-15?"), Intent::InformationLookup);
        assert_ne!(c.classify_text("Call 555-1234"), Intent::Calculation);
        assert_eq!(c.classify_text(""), Intent::General);
    }

    #[test]
    fn test_custom_rule_and_empty() {
        let c = KeywordClassifier::empty().with_rule(Intent::Conversation, &["Yo"]);
        assert_eq!(c.classify_text("yo!"), Intent::Conversation);
        assert_eq!(c.classify_text("12 * 3"), Intent::General);
    }

    #[test]
    fn test_complexity_estimate() {
        assert_eq!(Complexity::estimate("short input").get(), 1);
        assert_eq!(Complexity::estimate(&"word ".repeat(15)).get(), 2);
        assert_eq!(Complexity::estimate(&"word ".repeat(30)).get(), 3);
        assert_eq!(Complexity::estimate(&"word ".repeat(79)).get(), 4);
        assert_eq!(Complexity::estimate(&"word ".repeat(200)).get(), 5);
        assert_eq!(Complexity::saturating(9), Complexity::MAX);
        assert!(Complexity::try_from(0).is_err());
    }

    #[test]
    fn test_intent_parsing() {
        assert_eq!("Calculation".parse::<Intent>().unwrap(), Intent::Calculation);
        assert_eq!("information-lookup".parse::<Intent>().unwrap(), Intent::InformationLookup);
        assert_eq!("other".parse::<Intent>().unwrap(), Intent::General);
        assert!("poetry".parse::<Intent>().is_err());
    }

    #[test]
    fn test_perception_context_merge() {
        let mut ctx = Context::new();
        ctx.insert("user".into(), Value::from("ana"));
        let p = Perception::new("hi", Intent::Conversation, "Assistant").with_context(ctx);
        assert_eq!(p.context["user"], "ana");
        assert_eq!(p.complexity, Complexity::MIN);
        assert!(p.recalled().is_none());
    }
}
