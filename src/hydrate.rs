//! Entity services and hit hydration.
//!
//! The services that own projects, chapters, characters and world-building
//! elements are external to this crate; they are consumed through the
//! traits below and bundled into [`EntityServices`].
//!
//! | Entity type | Lookup |
//! |-------------|--------|
//! | `character` | [`CharacterService::get_by_id`] |
//! | `chapter` | [`EditorService::load_draft`] |
//! | `world_building` | [`WorldBuildingService::get_location`], then [`WorldBuildingService::get_culture`] |
//! | `project` | [`ProjectService::get_by_id`] |

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use narrative_search_core::models::{
    Chapter, Character, Culture, Entity, EntityType, Location, Project,
};

#[async_trait]
pub trait CharacterService: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Character>>;
}

#[async_trait]
pub trait EditorService: Send + Sync {
    /// Load the current draft of a chapter.
    async fn load_draft(&self, chapter_id: &str) -> Result<Option<Chapter>>;
}

#[async_trait]
pub trait WorldBuildingService: Send + Sync {
    async fn get_location(&self, id: &str) -> Result<Option<Location>>;
    async fn get_culture(&self, id: &str) -> Result<Option<Culture>>;
}

#[async_trait]
pub trait ProjectService: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Project>>;
}

/// Handles to every entity-owning service.
#[derive(Clone)]
pub struct EntityServices {
    pub characters: Arc<dyn CharacterService>,
    pub editor: Arc<dyn EditorService>,
    pub world_building: Arc<dyn WorldBuildingService>,
    pub projects: Arc<dyn ProjectService>,
}

impl EntityServices {
    /// Load the full entity behind a similarity hit.
    ///
    /// World-building ids are probed as a location first and as a culture
    /// when no location matches.
    pub async fn hydrate(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<Entity>> {
        let entity = match entity_type {
            EntityType::Character => self
                .characters
                .get_by_id(entity_id)
                .await?
                .map(Entity::Character),
            EntityType::Chapter => self.editor.load_draft(entity_id).await?.map(Entity::Chapter),
            EntityType::WorldBuilding => {
                match self.world_building.get_location(entity_id).await? {
                    Some(location) => Some(Entity::Location(location)),
                    None => self
                        .world_building
                        .get_culture(entity_id)
                        .await?
                        .map(Entity::Culture),
                }
            }
            EntityType::Project => self.projects.get_by_id(entity_id).await?.map(Entity::Project),
        };
        Ok(entity)
    }
}
