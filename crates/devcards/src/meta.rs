//! Devcard metadata: the identity of one devcard-producing function.

use serde::{Deserialize, Serialize};

/// Metadata of a devcard-producing function, collected by the analyzer when
/// it parses a source file.
///
/// Two devcards are the same iff their `name` matches; names are unique
/// within a project. The project keeps its metadata list stably sorted by
/// `path`, preserving textual order within a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevcardMeta {
    /// Module path of the defining package, e.g. `my_crate::widgets`.
    pub import_path: String,

    /// Name of the defining package (the last segment of `import_path`).
    pub package: String,

    /// Source path relative to the project root.
    pub path: String,

    /// 1-based line of the function definition.
    pub line: usize,

    /// Name of the devcard-producing function.
    pub name: String,

    /// Title extracted from the first `set_title` call, if any.
    pub title: String,
}

impl DevcardMeta {
    /// Human-readable caption: the extracted title, or the function name
    /// when no title was found.
    pub fn caption(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }
}

/// Find a devcard by name.
pub fn lookup<'a>(cards: &'a [DevcardMeta], name: &str) -> Option<&'a DevcardMeta> {
    cards.iter().find(|m| m.name == name)
}

/// The devcards sharing one import path, in stable metadata order.
pub fn filter_by_import_path(cards: &[DevcardMeta], import_path: &str) -> Vec<DevcardMeta> {
    cards
        .iter()
        .filter(|m| m.import_path == import_path)
        .cloned()
        .collect()
}

/// Group devcards by import path. Groups come out sorted by import path;
/// cards within a group keep their stable metadata order.
pub fn group_by_import_path(cards: &[DevcardMeta]) -> Vec<Vec<DevcardMeta>> {
    let mut sorted: Vec<DevcardMeta> = cards.to_vec();
    sorted.sort_by(|a, b| a.import_path.cmp(&b.import_path));

    let mut groups: Vec<Vec<DevcardMeta>> = Vec::new();
    for card in sorted {
        match groups.last_mut() {
            Some(group) if group[0].import_path == card.import_path => group.push(card),
            _ => groups.push(vec![card]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, import_path: &str, path: &str) -> DevcardMeta {
        DevcardMeta {
            import_path: import_path.into(),
            package: import_path.rsplit("::").next().unwrap().into(),
            path: path.into(),
            line: 1,
            name: name.into(),
            title: String::new(),
        }
    }

    #[test]
    fn test_caption_falls_back_to_name() {
        let mut m = meta("devcard_x", "demo", "src/lib.rs");
        assert_eq!(m.caption(), "devcard_x");
        m.title = "Widget gallery".into();
        assert_eq!(m.caption(), "Widget gallery");
    }

    #[test]
    fn test_lookup() {
        let cards = vec![meta("devcard_a", "demo", "src/a.rs"), meta("devcard_b", "demo", "src/b.rs")];
        assert_eq!(lookup(&cards, "devcard_b").unwrap().path, "src/b.rs");
        assert!(lookup(&cards, "devcard_c").is_none());
    }

    #[test]
    fn test_group_by_import_path_keeps_in_group_order() {
        let cards = vec![
            meta("devcard_a", "demo::x", "src/x/a.rs"),
            meta("devcard_b", "demo::y", "src/y/b.rs"),
            meta("devcard_c", "demo::x", "src/x/c.rs"),
        ];
        let groups = group_by_import_path(&cards);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].name, "devcard_a");
        assert_eq!(groups[0][1].name, "devcard_c");
        assert_eq!(groups[1][0].name, "devcard_b");
    }
}
