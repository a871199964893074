//! Content extraction, normalization and chunking.
//!
//! Turns heterogeneous [`Entity`] shapes into [`ExtractedContent`]: one
//! normalized, validated text per entity, ready to embed.
//!
//! # Extraction
//!
//! Each extractor concatenates a fixed, type-specific set of fields
//! (skipping absent or blank ones), normalizes the result with
//! [`normalize_text`] and emits at most one item. Content that is empty or
//! shorter than `min_content_length` characters is silently excluded: an
//! empty result means "nothing to embed", never failure.
//!
//! # Chunking
//!
//! [`chunk_content`] splits oversized text with a sliding window:
//!
//! 1. If the text fits in `chunk_size` characters, yield it unchanged.
//! 2. Otherwise cut at `start + chunk_size`.
//! 3. Pull the cut back to the last `.`, `?` or `!` found within the final
//!    `overlap` characters before it, to avoid mid-sentence breaks.
//! 4. Start the next window at `end - overlap`.
//!
//! Positions are counted in characters, so multi-byte text never splits
//! inside a code point.
//!
//! # Example
//!
//! ```rust
//! use narrative_search_core::content::{chunk_content, normalize_text};
//!
//! assert_eq!(normalize_text("  The\tdragon \n\n sleeps. "), "The dragon sleeps.");
//! let chunks: Vec<&str> = chunk_content("short text", 8000, 200).collect();
//! assert_eq!(chunks, vec!["short text"]);
//! ```

use serde::Serialize;
use serde_json::json;

use crate::models::{
    Chapter, Character, Culture, Entity, ExtractedContent, Location, Project, SourceType,
};

/// Minimum characters for content to be worth embedding.
pub const MIN_CONTENT_LENGTH: usize = 10;

/// Maximum characters sent to the embedding provider in one piece.
pub const MAX_CONTENT_LENGTH: usize = 8000;

/// Characters shared between consecutive chunks.
pub const CHUNK_OVERLAP: usize = 200;

/// Approximate characters-per-token ratio used for stats.
const CHARS_PER_TOKEN: usize = 4;

const FIELD_SEPARATOR: &str = "\n\n";

/// Normalize text for embedding and delta detection.
///
/// - Runs of whitespace (including NBSP and Unicode line/paragraph
///   separators) collapse to a single space.
/// - ASCII control characters and zero-width/bidi format characters are
///   removed.
/// - Leading and trailing whitespace is trimmed.
///
/// Idempotent: `normalize_text(normalize_text(s)) == normalize_text(s)`.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() || is_format_char(c) {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

/// Invisible format characters that carry no meaning for embeddings.
fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
    )
}

/// True if `text` has no visible content.
pub fn is_content_empty(text: &str) -> bool {
    normalize_text(text).is_empty()
}

/// True if `text` is shorter than `min_length` characters after trimming.
pub fn is_content_too_short(text: &str, min_length: usize) -> bool {
    text.trim().chars().count() < min_length
}

/// Split `content` into overlapping windows of at most `chunk_size`
/// characters. See the module docs for the algorithm.
///
/// The returned iterator is lazy and cloneable; cloning it before
/// consumption restarts the sequence.
pub fn chunk_content(content: &str, chunk_size: usize, overlap: usize) -> ContentChunks<'_> {
    let mut offsets: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
    offsets.push(content.len());

    ContentChunks {
        content,
        offsets,
        chunk_size: chunk_size.max(1),
        overlap,
        start: 0,
        done: false,
    }
}

/// Iterator over the chunks of a text. Created by [`chunk_content`].
#[derive(Debug, Clone)]
pub struct ContentChunks<'a> {
    content: &'a str,
    /// Byte offset of every char, plus `content.len()` as a sentinel.
    offsets: Vec<usize>,
    chunk_size: usize,
    overlap: usize,
    /// Char index where the next window starts.
    start: usize,
    done: bool,
}

impl<'a> ContentChunks<'a> {
    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn is_terminator_at(&self, char_idx: usize) -> bool {
        // Terminators are ASCII, so the first byte of the char decides.
        matches!(
            self.content.as_bytes()[self.offsets[char_idx]],
            b'.' | b'?' | b'!'
        )
    }
}

impl<'a> Iterator for ContentChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }

        let total = self.char_len();
        if self.start == 0 && total <= self.chunk_size {
            self.done = true;
            return Some(self.content);
        }

        let mut end = (self.start + self.chunk_size).min(total);
        if end < total {
            let window_start = end.saturating_sub(self.overlap).max(self.start + 1);
            if let Some(pos) = (window_start..end).rev().find(|&i| self.is_terminator_at(i)) {
                end = pos + 1;
            }
        }

        let chunk = &self.content[self.offsets[self.start]..self.offsets[end]];

        if end >= total {
            self.done = true;
        } else {
            self.start = end.saturating_sub(self.overlap).max(self.start + 1);
        }

        Some(chunk)
    }
}

/// Why a piece of content is not (or not entirely) embeddable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentIssue {
    #[error("content is empty")]
    Empty,

    #[error("content is too short ({length} < {min} characters)")]
    TooShort { length: usize, min: usize },

    #[error("content is {length} characters, over the {max} limit; it will be chunked")]
    TooLong { length: usize, max: usize },
}

impl ContentIssue {
    /// Blocking issues exclude the content from embedding.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, ContentIssue::TooLong { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentValidation {
    pub is_valid: bool,
    pub issues: Vec<ContentIssue>,
}

/// Reporting figures for a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentStats {
    pub char_count: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub estimated_tokens: usize,
    pub needs_chunking: bool,
    pub chunk_count: usize,
}

/// A world-building element borrowed for extraction.
#[derive(Debug, Clone, Copy)]
pub enum WorldBuildingElement<'a> {
    Location(&'a Location),
    Culture(&'a Culture),
}

/// Extracts, normalizes, validates and chunks entity text.
#[derive(Debug, Clone)]
pub struct ContentProcessor {
    min_content_length: usize,
    max_content_length: usize,
    chunk_overlap: usize,
}

impl Default for ContentProcessor {
    fn default() -> Self {
        Self::new(MIN_CONTENT_LENGTH, MAX_CONTENT_LENGTH, CHUNK_OVERLAP)
    }
}

impl ContentProcessor {
    pub fn new(min_content_length: usize, max_content_length: usize, chunk_overlap: usize) -> Self {
        Self {
            min_content_length,
            max_content_length,
            chunk_overlap,
        }
    }

    pub fn min_content_length(&self) -> usize {
        self.min_content_length
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Extract embeddable content from any entity.
    pub fn extract(&self, entity: &Entity) -> Vec<ExtractedContent> {
        match entity {
            Entity::Project(p) => self.extract_from_project(p),
            Entity::Chapter(c) => self.extract_from_chapter(c),
            Entity::Character(c) => self.extract_from_character(c),
            Entity::Location(l) => {
                self.extract_from_world_building(WorldBuildingElement::Location(l))
            }
            Entity::Culture(c) => self.extract_from_world_building(WorldBuildingElement::Culture(c)),
        }
    }

    /// Fan-out over a heterogeneous list; results are concatenated in input order.
    pub fn batch_extract(&self, entities: &[Entity]) -> Vec<ExtractedContent> {
        entities.iter().flat_map(|e| self.extract(e)).collect()
    }

    pub fn extract_from_project(&self, project: &Project) -> Vec<ExtractedContent> {
        let fields = [
            Some(project.title.clone()),
            project.genre.as_ref().map(|g| format!("Genre: {}", g)),
            project.description.clone(),
            project.synopsis.clone(),
        ];

        let metadata = json!({
            "hasDescription": has_text(&project.description),
            "hasSynopsis": has_text(&project.synopsis),
            "genre": project.genre,
        });

        self.emit(
            &project.id,
            &project.id,
            SourceType::Project,
            &fields,
            metadata,
        )
    }

    /// Title is always first. The summary is preferred over the full
    /// content when both exist, to bound embedding cost.
    pub fn extract_from_chapter(&self, chapter: &Chapter) -> Vec<ExtractedContent> {
        let used_summary = has_text(&chapter.summary);
        let body = if used_summary {
            chapter.summary.clone()
        } else {
            chapter.content.clone()
        };
        let fields = [Some(chapter.title.clone()), body];

        let metadata = json!({
            "hasSummary": used_summary,
            "hasContent": has_text(&chapter.content),
            "usedSummary": used_summary,
            "chapterNumber": chapter.chapter_number,
        });

        self.emit(
            &chapter.project_id,
            &chapter.id,
            SourceType::Chapter,
            &fields,
            metadata,
        )
    }

    pub fn extract_from_character(&self, character: &Character) -> Vec<ExtractedContent> {
        let fields = [
            Some(character.name.clone()),
            character.role.as_ref().map(|r| format!("Role: {}", r)),
            character.description.clone(),
            character.personality.clone(),
            character.backstory.clone(),
            character.goals.clone(),
        ];

        let metadata = json!({
            "hasDescription": has_text(&character.description),
            "hasPersonality": has_text(&character.personality),
            "hasBackstory": has_text(&character.backstory),
            "role": character.role,
        });

        self.emit(
            &character.project_id,
            &character.id,
            SourceType::Character,
            &fields,
            metadata,
        )
    }

    pub fn extract_from_world_building(
        &self,
        element: WorldBuildingElement<'_>,
    ) -> Vec<ExtractedContent> {
        match element {
            WorldBuildingElement::Location(l) => {
                let fields = [
                    Some(l.name.clone()),
                    l.description.clone(),
                    l.geography.clone(),
                    l.significance.clone(),
                ];
                let metadata = json!({
                    "elementType": "location",
                    "hasGeography": has_text(&l.geography),
                    "hasSignificance": has_text(&l.significance),
                });
                self.emit(&l.project_id, &l.id, SourceType::Location, &fields, metadata)
            }
            WorldBuildingElement::Culture(c) => {
                let fields = [
                    Some(c.name.clone()),
                    c.description.clone(),
                    c.values.clone(),
                    c.customs.clone(),
                ];
                let metadata = json!({
                    "elementType": "culture",
                    "hasValues": has_text(&c.values),
                    "hasCustoms": has_text(&c.customs),
                });
                self.emit(&c.project_id, &c.id, SourceType::Culture, &fields, metadata)
            }
        }
    }

    /// Chunk with this processor's limits.
    pub fn chunk_content<'a>(&self, content: &'a str) -> ContentChunks<'a> {
        chunk_content(content, self.max_content_length, self.chunk_overlap)
    }

    /// The text actually sent to the embedding provider: the first chunk.
    ///
    /// Stored rows keep the full normalized content so delta detection still
    /// sees changes past the cutoff.
    pub fn embedding_text<'a>(&self, content: &'a str) -> &'a str {
        self.chunk_content(content).next().unwrap_or(content)
    }

    pub fn validate_content(&self, content: &str) -> ContentValidation {
        let mut issues = Vec::new();
        let length = content.trim().chars().count();

        if is_content_empty(content) {
            issues.push(ContentIssue::Empty);
        } else if is_content_too_short(content, self.min_content_length) {
            issues.push(ContentIssue::TooShort {
                length,
                min: self.min_content_length,
            });
        }
        if length > self.max_content_length {
            issues.push(ContentIssue::TooLong {
                length,
                max: self.max_content_length,
            });
        }

        ContentValidation {
            is_valid: !issues.iter().any(ContentIssue::is_blocking),
            issues,
        }
    }

    pub fn content_stats(&self, content: &str) -> ContentStats {
        let char_count = content.chars().count();
        let sentence_count = content
            .split(['.', '?', '!'])
            .filter(|s| !s.trim().is_empty())
            .count();

        ContentStats {
            char_count,
            word_count: content.split_whitespace().count(),
            sentence_count,
            estimated_tokens: char_count.div_ceil(CHARS_PER_TOKEN),
            needs_chunking: char_count > self.max_content_length,
            chunk_count: self.chunk_content(content).count(),
        }
    }

    /// Join present fields, normalize, and emit one item if embeddable.
    fn emit(
        &self,
        project_id: &str,
        entity_id: &str,
        source_type: SourceType,
        fields: &[Option<String>],
        metadata: serde_json::Value,
    ) -> Vec<ExtractedContent> {
        let original_text = fields
            .iter()
            .flatten()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(FIELD_SEPARATOR);

        let content = normalize_text(&original_text);
        if content.is_empty() || is_content_too_short(&content, self.min_content_length) {
            tracing::debug!(
                entity_id,
                source_type = source_type.as_str(),
                "skipping content below minimum length"
            );
            return Vec::new();
        }

        vec![ExtractedContent {
            project_id: project_id.to_string(),
            entity_type: source_type.entity_type(),
            entity_id: entity_id.to_string(),
            content,
            source_type,
            original_text,
            metadata,
        }]
    }
}

fn has_text(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    fn chapter(summary: Option<&str>, content: Option<&str>) -> Chapter {
        Chapter {
            id: "ch1".to_string(),
            project_id: "p1".to_string(),
            title: "The Long Night".to_string(),
            chapter_number: Some(3),
            summary: summary.map(str::to_string),
            content: content.map(str::to_string),
        }
    }

    #[test]
    fn test_normalize_collapses_and_trims() {
        assert_eq!(normalize_text("  a \t\n b  "), "a b");
        assert_eq!(normalize_text("one\u{00A0}\u{2028}two"), "one two");
    }

    #[test]
    fn test_normalize_strips_control_and_format_chars() {
        assert_eq!(normalize_text("ab\u{0007}c"), "abc");
        assert_eq!(normalize_text("zero\u{200B}width"), "zerowidth");
        assert_eq!(normalize_text("\u{FEFF}bom"), "bom");
        assert_eq!(normalize_text("a \u{200B} b"), "a b");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "",
            "   ",
            "plain",
            " lead and trail ",
            "tabs\t\tand\nnewlines\r\n",
            "\u{200B}\u{00A0}mixed \u{0001} junk\u{2029}end",
            "ünïcödé   ✓  text",
        ];
        for s in samples {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_empty_and_short_checks() {
        assert!(is_content_empty(" \n\t\u{200B} "));
        assert!(!is_content_empty("x"));
        assert!(is_content_too_short("  123456789 ", MIN_CONTENT_LENGTH));
        assert!(!is_content_too_short("1234567890", MIN_CONTENT_LENGTH));
    }

    #[test]
    fn test_short_content_extracts_nothing() {
        let p = ContentProcessor::default();
        let project = Project {
            id: "p1".to_string(),
            title: "Tiny".to_string(),
            ..Default::default()
        };
        assert!(p.extract_from_project(&project).is_empty());

        let ch = Chapter {
            id: "c".to_string(),
            project_id: "p1".to_string(),
            title: "  Ch 1 ".to_string(),
            ..Default::default()
        };
        assert!(p.extract_from_chapter(&ch).is_empty());

        let character = Character {
            id: "x".to_string(),
            project_id: "p1".to_string(),
            name: "Bo".to_string(),
            description: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(p.extract_from_character(&character).is_empty());

        let loc = Location {
            id: "l".to_string(),
            project_id: "p1".to_string(),
            name: "Pit".to_string(),
            ..Default::default()
        };
        assert!(p
            .extract_from_world_building(WorldBuildingElement::Location(&loc))
            .is_empty());
    }

    #[test]
    fn test_chapter_prefers_summary_and_prefixes_title() {
        let p = ContentProcessor::default();
        let out = p.extract_from_chapter(&chapter(
            Some("Mira keeps watch over the burning city."),
            Some("Full chapter prose that should not be used."),
        ));
        assert_eq!(out.len(), 1);
        let item = &out[0];
        assert!(item.content.starts_with("The Long Night"));
        assert!(item.content.contains("burning city"));
        assert!(!item.content.contains("prose"));
        assert_eq!(item.metadata["usedSummary"], true);
        assert_eq!(item.metadata["hasContent"], true);
        assert_eq!(item.metadata["chapterNumber"], 3);
        assert_eq!(item.entity_type, EntityType::Chapter);
        assert_eq!(item.project_id, "p1");
    }

    #[test]
    fn test_chapter_falls_back_to_content() {
        let p = ContentProcessor::default();
        let out = p.extract_from_chapter(&chapter(Some("  "), Some("The gates open at dawn.")));
        assert_eq!(out.len(), 1);
        assert!(out[0].content.ends_with("The gates open at dawn."));
        assert_eq!(out[0].metadata["hasSummary"], false);
    }

    #[test]
    fn test_character_fields_and_metadata() {
        let p = ContentProcessor::default();
        let c = Character {
            id: "c1".to_string(),
            project_id: "p1".to_string(),
            name: "Aldric".to_string(),
            role: Some("antagonist".to_string()),
            description: Some("A disgraced knight.".to_string()),
            personality: None,
            backstory: Some("Raised by   dragons\nin the north.".to_string()),
            goals: None,
        };
        let out = p.extract_from_character(&c);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].content,
            "Aldric Role: antagonist A disgraced knight. Raised by dragons in the north."
        );
        assert!(out[0].original_text.contains("\n\n"));
        assert_eq!(out[0].metadata["hasBackstory"], true);
        assert_eq!(out[0].metadata["hasPersonality"], false);
        assert_eq!(out[0].source_type, SourceType::Character);
    }

    #[test]
    fn test_world_building_sources() {
        let p = ContentProcessor::default();
        let culture = Culture {
            id: "cu1".to_string(),
            project_id: "p1".to_string(),
            name: "The Salt Clans".to_string(),
            values: Some("Honor debts above blood.".to_string()),
            ..Default::default()
        };
        let out = p.extract_from_world_building(WorldBuildingElement::Culture(&culture));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_type, EntityType::WorldBuilding);
        assert_eq!(out[0].source_type, SourceType::Culture);
        assert_eq!(out[0].metadata["elementType"], "culture");
    }

    #[test]
    fn test_batch_extract_dispatches_and_skips() {
        let p = ContentProcessor::default();
        let entities = vec![
            Entity::Chapter(chapter(Some("A summary long enough."), None)),
            Entity::Project(Project {
                id: "p1".to_string(),
                title: "X".to_string(),
                ..Default::default()
            }),
            Entity::Location(Location {
                id: "l1".to_string(),
                project_id: "p1".to_string(),
                name: "Harrowdeep".to_string(),
                description: Some("A drowned mine.".to_string()),
                ..Default::default()
            }),
        ];
        let out = p.batch_extract(&entities);
        let ids: Vec<&str> = out.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["ch1", "l1"]);
    }

    #[test]
    fn test_chunk_short_text_single_chunk() {
        let chunks: Vec<&str> = chunk_content("short text", 8000, 200).collect();
        assert_eq!(chunks, vec!["short text"]);
    }

    #[test]
    fn test_chunk_9000_chars_two_chunks_reconstruct() {
        let text = "x".repeat(9000);
        let chunks: Vec<&str> = chunk_content(&text, 8000, 200).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 8000);
        let rebuilt = format!("{}{}", chunks[0], &chunks[1][200..]);
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_chunk_breaks_on_sentence_terminator() {
        let text = "The dragon slept. ".repeat(500);
        assert_eq!(text.len(), 9000);
        let chunks: Vec<&str> = chunk_content(&text, 8000, 200).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('.'));
        assert!(chunks[0].len() < 8000);
        let rebuilt = format!("{}{}", chunks[0], &chunks[1][200..]);
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_chunk_is_restartable() {
        let text = "word ".repeat(100);
        let chunks = chunk_content(&text, 120, 20);
        let first: Vec<&str> = chunks.clone().collect();
        let second: Vec<&str> = chunks.collect();
        assert!(first.len() > 1);
        assert_eq!(first, second);
        for c in &first {
            assert!(c.chars().count() <= 120);
        }
    }

    #[test]
    fn test_chunk_multibyte_safe() {
        let text = "龍".repeat(300);
        let chunks: Vec<&str> = chunk_content(&text, 100, 10).collect();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 100);
        }
    }

    #[test]
    fn test_embedding_text_is_first_chunk() {
        let p = ContentProcessor::new(10, 50, 5);
        let long = "a".repeat(120);
        assert_eq!(p.embedding_text(&long).len(), 50);
        assert_eq!(p.embedding_text("short enough"), "short enough");
    }

    #[test]
    fn test_validate_content() {
        let p = ContentProcessor::new(10, 20, 5);
        let v = p.validate_content("   ");
        assert!(!v.is_valid);
        assert_eq!(v.issues, vec![ContentIssue::Empty]);

        let v = p.validate_content("tiny");
        assert!(!v.is_valid);
        assert!(matches!(v.issues[0], ContentIssue::TooShort { length: 4, min: 10 }));

        let v = p.validate_content(&"y".repeat(30));
        assert!(v.is_valid);
        assert!(matches!(v.issues[0], ContentIssue::TooLong { length: 30, max: 20 }));

        assert!(p.validate_content("just right here").issues.is_empty());
    }

    #[test]
    fn test_content_stats() {
        let p = ContentProcessor::default();
        let stats = p.content_stats("The tower fell. Who saw it? Nobody!");
        assert_eq!(stats.word_count, 7);
        assert_eq!(stats.sentence_count, 3);
        assert_eq!(stats.char_count, 35);
        assert_eq!(stats.estimated_tokens, 9);
        assert!(!stats.needs_chunking);
        assert_eq!(stats.chunk_count, 1);
    }
}
