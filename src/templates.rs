//! Scaffold documents written by `canon init` and `canon new`.

use crate::contract::METADATA_VERSION;
use crate::schema::{Bilingual, CharacterDefinition, LocationDefinition, StoryMetadata};

/// Fresh story metadata. `canon_ref` starts empty so a newly scaffolded
/// story fails `canon_version_match` until the author pins it to the lock.
pub fn story_metadata(slug: &str, contributor: &str) -> StoryMetadata {
    StoryMetadata {
        schema_version: METADATA_VERSION.to_string(),
        canon_ref: String::new(),
        id: slug.to_string(),
        episode: 0,
        title: Bilingual::default(),
        timeline: "2025-01-01".to_string(),
        synopsis: Bilingual::default(),
        characters: Vec::new(),
        locations: Vec::new(),
        contributor: contributor.to_string(),
        canon_status: "non-canonical".to_string(),
    }
}

pub fn character_definition(id: &str) -> CharacterDefinition {
    CharacterDefinition {
        id: id.to_string(),
        name: Bilingual::default(),
        description: Bilingual::default(),
    }
}

pub fn location_definition(id: &str) -> LocationDefinition {
    LocationDefinition {
        id: id.to_string(),
        name: Bilingual::default(),
        description: Bilingual::default(),
    }
}

pub const CONVENTIONS_MD: &str = "\
# Canon Conventions

## Layout

- `canon/characters/<id>/definition.json` holds one definition per
  character (a flat `<id>.json` file also works).
- `canon/worldbuilding/locations/<id>.json` holds one definition per
  location.
- `stories/<slug>/metadata.json` holds story metadata; `<slug>` must equal
  the metadata `id`.
- `canon.lock.json` pins the canon tree to a commit and content hash.

## Workflow

1. Write or edit canon entries and stories.
2. Commit your changes.
3. Run `canon lock --update-refs` to regenerate the lock and repoint
   story `canon_ref` fields at the new commit.
4. Run `canon check` before sending changes for review.
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::parse_metadata;

    #[test]
    fn scaffolded_story_gates_through_frozen_version() {
        let meta = story_metadata("first-light", "alice");
        let value = serde_json::to_value(&meta).expect("serialize");
        parse_metadata(&value).expect("frozen version accepted");
    }

    #[test]
    fn scaffolded_story_starts_non_canonical_with_empty_ref() {
        let meta = story_metadata("first-light", "alice");
        assert_eq!(meta.canon_status, "non-canonical");
        assert_eq!(meta.canon_ref, "");
        assert_eq!(meta.id, "first-light");
        assert_eq!(meta.contributor, "alice");
    }

    #[test]
    fn definitions_carry_bilingual_shells() {
        let value = serde_json::to_value(character_definition("kira")).expect("serialize");
        assert_eq!(value["id"], "kira");
        assert!(value["name"]["ko"].is_string());
        assert!(value["name"]["en"].is_string());
        assert!(value["description"]["ko"].is_string());
    }
}
