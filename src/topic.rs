//! The closed set of topic labels a message can be tagged with.
//!
//! Stored tags are the Russian labels used by the training corpus; the
//! English keys exist for the CLI and for logs.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Work,
    Study,
    Family,
    Health,
    Leisure,
    Finance,
    Important,
    /// Overflow label for low-confidence predictions.
    Other,
}

impl Topic {
    /// The seven trainable categories, in declaration order.
    pub const CATEGORIES: [Topic; 7] = [
        Topic::Work,
        Topic::Study,
        Topic::Family,
        Topic::Health,
        Topic::Leisure,
        Topic::Finance,
        Topic::Important,
    ];

    /// Label persisted in the `tags` field of the store.
    pub fn label(self) -> &'static str {
        match self {
            Topic::Work => "работа",
            Topic::Study => "учеба",
            Topic::Family => "семья",
            Topic::Health => "здоровье",
            Topic::Leisure => "досуг",
            Topic::Finance => "финансы",
            Topic::Important => "важное",
            Topic::Other => "разное",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Topic::Work => "work",
            Topic::Study => "study",
            Topic::Family => "family",
            Topic::Health => "health",
            Topic::Leisure => "leisure",
            Topic::Finance => "finance",
            Topic::Important => "important",
            Topic::Other => "other",
        }
    }

    /// Accepts either the stored label or the English key.
    pub fn parse(s: &str) -> Option<Topic> {
        let s = s.trim();
        Topic::CATEGORIES
            .into_iter()
            .chain(std::iter::once(Topic::Other))
            .find(|t| t.label() == s || t.key().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
