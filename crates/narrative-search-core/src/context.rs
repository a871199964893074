//! Retrieval context formatting.
//!
//! Renders a hydrated [`Entity`] into a plain-text block suitable for an
//! LLM prompt. Each type has a fixed template whose first line is
//! `"<Type>: <name or title>"`; absent or blank fields are omitted.

use crate::models::{Chapter, Character, Culture, Entity, Location, Project};

/// Maximum characters of chapter prose included in a context block.
pub const CHAPTER_EXCERPT_CHARS: usize = 1000;

pub fn format_context(entity: &Entity) -> String {
    match entity {
        Entity::Project(p) => format_project(p),
        Entity::Chapter(c) => format_chapter(c),
        Entity::Character(c) => format_character(c),
        Entity::Location(l) => format_location(l),
        Entity::Culture(c) => format_culture(c),
    }
}

fn format_project(p: &Project) -> String {
    render(
        format!("Project: {}", p.title),
        &[
            labeled("Genre", &p.genre),
            plain(&p.description),
            labeled("Synopsis", &p.synopsis),
        ],
    )
}

fn format_chapter(c: &Chapter) -> String {
    let heading = match c.chapter_number {
        Some(n) => format!("Chapter: {} (#{})", c.title, n),
        None => format!("Chapter: {}", c.title),
    };
    let excerpt = c.content.as_ref().map(|body| excerpt(body, CHAPTER_EXCERPT_CHARS));
    render(heading, &[labeled("Summary", &c.summary), plain(&excerpt)])
}

fn format_character(c: &Character) -> String {
    render(
        format!("Character: {}", c.name),
        &[
            labeled("Role", &c.role),
            plain(&c.description),
            labeled("Personality", &c.personality),
            labeled("Backstory", &c.backstory),
            labeled("Goals", &c.goals),
        ],
    )
}

fn format_location(l: &Location) -> String {
    render(
        format!("Location: {}", l.name),
        &[
            plain(&l.description),
            labeled("Geography", &l.geography),
            labeled("Significance", &l.significance),
        ],
    )
}

fn format_culture(c: &Culture) -> String {
    render(
        format!("Culture: {}", c.name),
        &[
            plain(&c.description),
            labeled("Values", &c.values),
            labeled("Customs", &c.customs),
        ],
    )
}

fn render(heading: String, lines: &[Option<String>]) -> String {
    let mut out = heading;
    for line in lines.iter().flatten() {
        out.push('\n');
        out.push_str(line);
    }
    out
}

fn plain(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn labeled(label: &str, field: &Option<String>) -> Option<String> {
    plain(field).map(|v| format!("{}: {}", label, v))
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_template() {
        let ctx = format_context(&Entity::Character(Character {
            id: "c1".to_string(),
            project_id: "p1".to_string(),
            name: "Aldric".to_string(),
            description: Some("A disgraced knight.".to_string()),
            backstory: Some("Raised by dragons.".to_string()),
            personality: Some("  ".to_string()),
            ..Default::default()
        }));
        assert_eq!(
            ctx,
            "Character: Aldric\nA disgraced knight.\nBackstory: Raised by dragons."
        );
    }

    #[test]
    fn test_chapter_template_truncates_prose() {
        let ctx = format_context(&Entity::Chapter(Chapter {
            id: "ch1".to_string(),
            project_id: "p1".to_string(),
            title: "Embers".to_string(),
            chapter_number: Some(2),
            summary: Some("The city burns.".to_string()),
            content: Some("z".repeat(CHAPTER_EXCERPT_CHARS + 50)),
        }));
        let mut lines = ctx.lines();
        assert_eq!(lines.next(), Some("Chapter: Embers (#2)"));
        assert_eq!(lines.next(), Some("Summary: The city burns."));
        let prose = lines.next().unwrap();
        assert_eq!(prose.len(), CHAPTER_EXCERPT_CHARS + 3);
        assert!(prose.ends_with("..."));
    }

    #[test]
    fn test_world_building_and_project_headings() {
        let loc = format_context(&Entity::Location(Location {
            name: "Harrowdeep".to_string(),
            ..Default::default()
        }));
        assert_eq!(loc, "Location: Harrowdeep");

        let cul = format_context(&Entity::Culture(Culture {
            name: "Salt Clans".to_string(),
            customs: Some("Tide feasts".to_string()),
            ..Default::default()
        }));
        assert_eq!(cul, "Culture: Salt Clans\nCustoms: Tide feasts");

        let proj = format_context(&Entity::Project(Project {
            title: "Ashfall".to_string(),
            genre: Some("Fantasy".to_string()),
            ..Default::default()
        }));
        assert!(proj.starts_with("Project: Ashfall\nGenre: Fantasy"));
    }
}
