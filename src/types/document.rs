//! Story Document Model
//!
//! Snapshot of the document a user is editing, as consumed by the request
//! builder. The core never persists or mutates documents; surfaces pass a
//! snapshot per generation call.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Document Snapshot
// =============================================================================

/// Snapshot of the edited story document.
///
/// Every field is optional: a freshly created story has none of them filled
/// in, and request building must work regardless.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub backstory: Option<String>,
    #[serde(default)]
    pub story_arc: Option<String>,
    #[serde(default)]
    pub characters: Vec<CharacterSheet>,
}

impl StoryDocument {
    /// Look up a character by name (case-insensitive).
    pub fn character(&self, name: &str) -> Option<&CharacterSheet> {
        self.characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether any character carries the given role (case-insensitive,
    /// surrounding whitespace ignored).
    pub fn has_role(&self, role: &str) -> bool {
        self.characters.iter().any(|c| {
            c.role
                .as_deref()
                .is_some_and(|r| r.trim().eq_ignore_ascii_case(role))
        })
    }
}

/// One character in the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub name: String,
    /// Narrative role, e.g. "protagonist", "antagonist", "supporting".
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CharacterSheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            description: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

// =============================================================================
// Target Field (Slot)
// =============================================================================

/// The slot a generation session writes into.
///
/// Each editable surface maps to exactly one variant; the session lifecycle
/// is written once and parameterized by this type instead of being repeated
/// per field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetField {
    Backstory,
    StoryArc,
    FullStory,
    /// A named attribute of a named character, e.g. appearance of "Mira".
    Character { name: String, attribute: String },
}

impl TargetField {
    /// Stable key identifying the slot. At most one session may be live per
    /// slot within a controller.
    pub fn slot_key(&self) -> String {
        match self {
            Self::Backstory => "backstory".to_string(),
            Self::StoryArc => "story-arc".to_string(),
            Self::FullStory => "full-story".to_string(),
            Self::Character { name, attribute } => {
                format!("character:{}:{}", name.to_lowercase(), attribute.to_lowercase())
            }
        }
    }

    /// Human-readable label used in prompts.
    pub fn label(&self) -> String {
        match self {
            Self::Backstory => "the story backstory".to_string(),
            Self::StoryArc => "the story arc".to_string(),
            Self::FullStory => "the full story".to_string(),
            Self::Character { name, attribute } => {
                format!("the {} of the character {}", attribute, name)
            }
        }
    }
}

// Display matches the slot key so logs and session records agree.
impl fmt::Display for TargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slot_key())
    }
}

// =============================================================================
// Tests
// =============================================================================
