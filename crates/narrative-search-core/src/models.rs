//! Core data models used throughout Narrative Search.
//!
//! These types represent the narrative entities, the content extracted from
//! them, the vector rows persisted per entity, and the hydrated search
//! results that flow back to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical kind of an indexed entity.
///
/// One vector row exists per `(EntityType, entity_id)`. Locations and
/// cultures share [`EntityType::WorldBuilding`]; the finer distinction is
/// kept in [`SourceType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Chapter,
    Character,
    WorldBuilding,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Project,
        EntityType::Chapter,
        EntityType::Character,
        EntityType::WorldBuilding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Chapter => "chapter",
            EntityType::Character => "character",
            EntityType::WorldBuilding => "world_building",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "project" => Ok(EntityType::Project),
            "chapter" => Ok(EntityType::Chapter),
            "character" => Ok(EntityType::Character),
            "world_building" => Ok(EntityType::WorldBuilding),
            other => anyhow::bail!(
                "Unknown entity type: '{}'. Use project, chapter, character, or world_building.",
                other
            ),
        }
    }
}

/// The concrete shape the content was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Project,
    Chapter,
    Character,
    Location,
    Culture,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Project => "project",
            SourceType::Chapter => "chapter",
            SourceType::Character => "character",
            SourceType::Location => "location",
            SourceType::Culture => "culture",
        }
    }

    /// The entity type whose vector row this source feeds.
    pub fn entity_type(&self) -> EntityType {
        match self {
            SourceType::Project => EntityType::Project,
            SourceType::Chapter => EntityType::Chapter,
            SourceType::Character => EntityType::Character,
            SourceType::Location | SourceType::Culture => EntityType::WorldBuilding,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "project" => Ok(SourceType::Project),
            "chapter" => Ok(SourceType::Chapter),
            "character" => Ok(SourceType::Character),
            "location" => Ok(SourceType::Location),
            "culture" => Ok(SourceType::Culture),
            other => anyhow::bail!("Unknown source type: '{}'", other),
        }
    }
}

/// Project metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub synopsis: Option<String>,
}

/// A chapter as loaded from the editor's draft store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub chapter_number: Option<u32>,
    pub summary: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub role: Option<String>,
    pub description: Option<String>,
    pub personality: Option<String>,
    pub backstory: Option<String>,
    pub goals: Option<String>,
}

/// World-building element: a place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub geography: Option<String>,
    pub significance: Option<String>,
}

/// World-building element: a people, faction or society.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Culture {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub values: Option<String>,
    pub customs: Option<String>,
}

/// Any entity that owns narrative content.
///
/// Used as extraction input, as the sync payload and as the hydrated
/// entity attached to search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Entity {
    Project(Project),
    Chapter(Chapter),
    Character(Character),
    Location(Location),
    Culture(Culture),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Project(p) => &p.id,
            Entity::Chapter(c) => &c.id,
            Entity::Character(c) => &c.id,
            Entity::Location(l) => &l.id,
            Entity::Culture(c) => &c.id,
        }
    }

    /// The owning project. A project owns itself.
    pub fn project_id(&self) -> &str {
        match self {
            Entity::Project(p) => &p.id,
            Entity::Chapter(c) => &c.project_id,
            Entity::Character(c) => &c.project_id,
            Entity::Location(l) => &l.project_id,
            Entity::Culture(c) => &c.project_id,
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Entity::Project(_) => SourceType::Project,
            Entity::Chapter(_) => SourceType::Chapter,
            Entity::Character(_) => SourceType::Character,
            Entity::Location(_) => SourceType::Location,
            Entity::Culture(_) => SourceType::Culture,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.source_type().entity_type()
    }
}

/// Normalized, validated text ready for embedding.
///
/// Transient: produced by the content processor and consumed immediately
/// by the batch processor or the sync service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedContent {
    pub project_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Normalized text. This is what delta detection compares.
    pub content: String,
    pub source_type: SourceType,
    /// The concatenated fields before normalization.
    pub original_text: String,
    /// Provenance flags (`hasSummary`, `hasBackstory`, ...).
    pub metadata: serde_json::Value,
}

/// The persisted embedding record for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRow {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub project_id: String,
    pub source_type: SourceType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub metadata: serde_json::Value,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
}

impl VectorRow {
    /// Build a fresh row for `content`, stamped with the current time.
    pub fn from_content(content: &ExtractedContent, embedding: Vec<f32>, model: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            entity_type: content.entity_type,
            entity_id: content.entity_id.clone(),
            project_id: content.project_id.clone(),
            source_type: content.source_type,
            content: content.content.clone(),
            embedding,
            model: model.to_string(),
            metadata: content.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A raw result from vector similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub project_id: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f32,
    pub content: String,
}

/// A similarity hit enriched with its fully loaded entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydratedSearchResult {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub similarity: f32,
    pub entity: Entity,
    /// Human/LLM-readable rendering of `entity`.
    pub context: String,
}

/// Caller-supplied filters for a search.
///
/// Filters never take part in the cache key: requests that differ only in
/// filters share one cache entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchFilters {
    /// Allow-list; empty means all types.
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
}

impl SearchFilters {
    /// The single entity type to push down into the similarity search, if
    /// exactly one was requested.
    pub fn single_entity_type(&self) -> Option<EntityType> {
        match self.entity_types.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Apply the allow-list, score floor and limit, preserving order.
    pub fn apply(&self, results: &[HydratedSearchResult]) -> Vec<HydratedSearchResult> {
        let limit = self.limit.unwrap_or(usize::MAX);
        results
            .iter()
            .filter(|r| self.entity_types.is_empty() || self.entity_types.contains(&r.entity_type))
            .filter(|r| self.min_score.map_or(true, |min| r.similarity >= min))
            .take(limit)
            .cloned()
            .collect()
    }
}
