//! Generation Request Construction
//!
//! Pure assembly of generation payloads from a document snapshot. One
//! parameterized builder replaces a call site per editable field: the
//! session lifecycle is written once and keyed by [`TargetField`].
//!
//! Nothing here performs I/O or touches shared state, so every surface can
//! call it freely and tests can assert on exact output.

use serde::{Deserialize, Serialize};

use crate::constants::sampling;
use crate::types::{CharacterSheet, StoryDocument, TargetField};

// =============================================================================
// Sampling Parameters
// =============================================================================

/// Sampling knobs forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// 0.0 = deterministic, higher = more creative.
    pub temperature: f32,
    /// `None` means the client resolves a fresh random seed when the
    /// session opens, so repeated generations differ.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: sampling::DEFAULT_TEMPERATURE,
            seed: None,
        }
    }
}

// =============================================================================
// Prompt Messages
// =============================================================================

/// Role of one prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
}

/// One message in the generation prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// Generation Request
// =============================================================================

/// Fully assembled request for one generation session.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The slot the output is destined for.
    pub target: TargetField,
    /// System + user messages carrying the serialized context excerpt and
    /// any free-text instructions.
    pub messages: Vec<PromptMessage>,
    pub sampling: SamplingParams,
}

// =============================================================================
// Request Builder
// =============================================================================

/// Builds [`GenerationRequest`]s from a document snapshot.
pub struct RequestBuilder;

impl RequestBuilder {
    /// Assemble a request with default sampling. Never fails: missing
    /// optional document fields are substituted with empty defaults.
    pub fn build(
        document: &StoryDocument,
        target: &TargetField,
        instructions: Option<&str>,
    ) -> GenerationRequest {
        Self::build_with_sampling(document, target, instructions, SamplingParams::default())
    }

    /// Assemble a request with explicit sampling parameters.
    pub fn build_with_sampling(
        document: &StoryDocument,
        target: &TargetField,
        instructions: Option<&str>,
        sampling: SamplingParams,
    ) -> GenerationRequest {
        let mut user = Self::context_excerpt(document, target);

        user.push_str(&format!("\nWrite {}.", target.label()));

        if let TargetField::Character { .. } = target {
            user.push_str(&format!(
                "\nSuggested archetype: {}.",
                Self::suggest_archetype(&document.characters)
            ));
        }

        if let Some(extra) = instructions
            && !extra.trim().is_empty()
        {
            user.push_str(&format!("\nAdditional instructions: {}", extra.trim()));
        }

        GenerationRequest {
            target: target.clone(),
            messages: vec![
                PromptMessage::system(Self::system_prompt(target)),
                PromptMessage::user(user),
            ],
            sampling,
        }
    }

    /// Suggest an archetype for a new character from the roles already
    /// present. Deterministic tie-break: no protagonist yet -> protagonist;
    /// else no antagonist yet -> antagonist; else supporting. Advisory
    /// input only, never an enforced constraint.
    pub fn suggest_archetype(characters: &[CharacterSheet]) -> &'static str {
        let has_role = |role: &str| {
            characters.iter().any(|c| {
                c.role
                    .as_deref()
                    .is_some_and(|r| r.trim().eq_ignore_ascii_case(role))
            })
        };

        if !has_role("protagonist") {
            "protagonist"
        } else if !has_role("antagonist") {
            "antagonist"
        } else {
            "supporting"
        }
    }

    fn system_prompt(target: &TargetField) -> String {
        format!(
            "You are a fiction-writing assistant helping an author develop a story. \
             Produce {} as prose, with no preamble or commentary.",
            target.label()
        )
    }

    /// Serialize the parts of the document relevant to this target into a
    /// plain-text excerpt. Absent fields contribute nothing.
    fn context_excerpt(document: &StoryDocument, target: &TargetField) -> String {
        let mut excerpt = String::new();

        push_field(&mut excerpt, "Title", document.title.as_deref());
        push_field(&mut excerpt, "Synopsis", document.synopsis.as_deref());

        if !document.characters.is_empty() {
            excerpt.push_str("Characters:\n");
            for character in &document.characters {
                excerpt.push_str(&format!("- {}", character.name));
                if let Some(role) = character.role.as_deref()
                    && !role.is_empty()
                {
                    excerpt.push_str(&format!(" ({})", role));
                }
                if let Some(description) = character.description.as_deref()
                    && !description.is_empty()
                {
                    excerpt.push_str(&format!(": {}", description));
                }
                excerpt.push('\n');
            }
        }

        // Existing content of adjacent fields anchors the new text.
        match target {
            TargetField::Backstory => {
                push_field(&mut excerpt, "Story arc", document.story_arc.as_deref());
            }
            TargetField::StoryArc => {
                push_field(&mut excerpt, "Backstory", document.backstory.as_deref());
            }
            TargetField::FullStory | TargetField::Character { .. } => {
                push_field(&mut excerpt, "Backstory", document.backstory.as_deref());
                push_field(&mut excerpt, "Story arc", document.story_arc.as_deref());
            }
        }

        if let TargetField::Character { name, .. } = target
            && let Some(sheet) = document.character(name)
            && let Some(description) = sheet.description.as_deref()
            && !description.is_empty()
        {
            push_field(&mut excerpt, "Current sheet", Some(description));
        }

        excerpt
    }
}

fn push_field(excerpt: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value
        && !value.trim().is_empty()
    {
        excerpt.push_str(&format!("{}: {}\n", label, value.trim()));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str, role: &str) -> CharacterSheet {
        CharacterSheet::new(name).with_role(role)
    }

    #[test]
    fn test_archetype_empty_cast_suggests_protagonist() {
        assert_eq!(RequestBuilder::suggest_archetype(&[]), "protagonist");
    }

    #[test]
    fn test_archetype_protagonist_present_suggests_antagonist() {
        let cast = vec![character("Mira", "protagonist")];
        assert_eq!(RequestBuilder::suggest_archetype(&cast), "antagonist");
    }

    #[test]
    fn test_archetype_both_present_suggests_supporting() {
        let cast = vec![
            character("Mira", "Protagonist"),
            character("Bran", "ANTAGONIST"),
        ];
        assert_eq!(RequestBuilder::suggest_archetype(&cast), "supporting");
    }

    #[test]
    fn test_archetype_ignores_unrelated_roles() {
        let cast = vec![character("Bran", "mentor")];
        assert_eq!(RequestBuilder::suggest_archetype(&cast), "protagonist");
    }

    #[test]
    fn test_build_on_empty_document() {
        let request = RequestBuilder::build(
            &StoryDocument::default(),
            &TargetField::Backstory,
            None,
        );

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, PromptRole::System);
        assert_eq!(request.messages[1].role, PromptRole::User);
        assert!(request.messages[1].content.contains("backstory"));
    }

    #[test]
    fn test_build_includes_instructions() {
        let request = RequestBuilder::build(
            &StoryDocument::default(),
            &TargetField::FullStory,
            Some("  keep it under 500 words  "),
        );
        assert!(
            request.messages[1]
                .content
                .contains("Additional instructions: keep it under 500 words")
        );
    }

    #[test]
    fn test_build_blank_instructions_omitted() {
        let request =
            RequestBuilder::build(&StoryDocument::default(), &TargetField::Backstory, Some("  "));
        assert!(!request.messages[1].content.contains("Additional instructions"));
    }

    #[test]
    fn test_character_request_carries_archetype() {
        let doc = StoryDocument {
            characters: vec![character("Mira", "protagonist")],
            ..Default::default()
        };
        let request = RequestBuilder::build(
            &doc,
            &TargetField::Character {
                name: "Bran".into(),
                attribute: "personality".into(),
            },
            None,
        );
        assert!(
            request.messages[1]
                .content
                .contains("Suggested archetype: antagonist")
        );
    }

    #[test]
    fn test_context_includes_cast_and_synopsis() {
        let doc = StoryDocument {
            synopsis: Some("A heist goes wrong.".into()),
            characters: vec![character("Mira", "protagonist")],
            ..Default::default()
        };
        let request = RequestBuilder::build(&doc, &TargetField::StoryArc, None);
        let user = &request.messages[1].content;
        assert!(user.contains("Synopsis: A heist goes wrong."));
        assert!(user.contains("- Mira (protagonist)"));
    }

    #[test]
    fn test_sampling_defaults() {
        let request =
            RequestBuilder::build(&StoryDocument::default(), &TargetField::Backstory, None);
        assert_eq!(
            request.sampling.temperature,
            crate::constants::sampling::DEFAULT_TEMPERATURE
        );
        assert_eq!(request.sampling.seed, None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Building never panics and always yields system + user
            /// messages, whatever the document contains.
            #[test]
            fn build_is_total(
                title in proptest::option::of(".{0,40}"),
                synopsis in proptest::option::of(".{0,80}"),
                names in proptest::collection::vec("[a-zA-Z ]{1,12}", 0..5),
            ) {
                let doc = StoryDocument {
                    title,
                    synopsis,
                    characters: names.into_iter().map(CharacterSheet::new).collect(),
                    ..Default::default()
                };
                for target in [
                    TargetField::Backstory,
                    TargetField::StoryArc,
                    TargetField::FullStory,
                ] {
                    let request = RequestBuilder::build(&doc, &target, None);
                    prop_assert_eq!(request.messages.len(), 2);
                    prop_assert!(!request.messages[0].content.is_empty());
                }
            }

            /// The archetype suggestion is one of the three known values
            /// and deterministic for a given cast.
            #[test]
            fn archetype_is_deterministic(
                roles in proptest::collection::vec(
                    proptest::option::of("[a-z]{1,12}"), 0..6
                ),
            ) {
                let cast: Vec<CharacterSheet> = roles
                    .into_iter()
                    .enumerate()
                    .map(|(i, role)| CharacterSheet {
                        name: format!("c{}", i),
                        role,
                        description: None,
                    })
                    .collect();

                let first = RequestBuilder::suggest_archetype(&cast);
                let second = RequestBuilder::suggest_archetype(&cast);
                prop_assert_eq!(first, second);
                prop_assert!(["protagonist", "antagonist", "supporting"].contains(&first));
            }
        }
    }
}
