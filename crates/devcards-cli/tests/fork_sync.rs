//! Integration tests for source analysis and fork synchronization.

use devcards_cli::config::ProjectConfig;
use devcards_cli::project::analyzer::{Analyzer, RESERVED_MAIN};
use devcards_cli::project::bootstrap;
use devcards_cli::project::fork::{Fork, INJECTION_FILE};
use std::collections::BTreeMap;
use std::path::Path;

const LIB_RS: &str = "pub mod widgets;\npub mod util;\n";

const WIDGETS_RS: &str = r#"use devcards::Devcard;

/// A gallery of widgets.
pub fn devcard_gallery(card: &mut Devcard) {
    card.set_title("Widget gallery");
    card.md("widgets!");
}

pub fn devcard_details(card: &mut Devcard) {
    card.md("details");
}
"#;

const UTIL_RS: &str = r#"pub fn helper() -> u32 {
    42
}

fn main() {
    println!("should be renamed");
}
"#;

fn write_project(dir: &Path) -> ProjectConfig {
    std::fs::create_dir_all(dir.join("src/widgets")).unwrap();
    std::fs::create_dir_all(dir.join("src/util")).unwrap();
    std::fs::create_dir_all(dir.join("docs")).unwrap();
    std::fs::write(
        dir.join("Cargo.toml"),
        "[package]\nname = \"sample\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
    )
    .unwrap();
    std::fs::write(dir.join("src/lib.rs"), LIB_RS).unwrap();
    std::fs::write(dir.join("src/widgets/mod.rs"), WIDGETS_RS).unwrap();
    std::fs::write(dir.join("src/util/mod.rs"), UTIL_RS).unwrap();
    std::fs::write(dir.join("docs/notes.md"), "# notes\n").unwrap();

    ProjectConfig {
        name: "sample".into(),
        dir: dir.to_path_buf(),
        injection: String::new(),
        generators: BTreeMap::new(),
    }
}

fn synced_fixture() -> (tempfile::TempDir, ProjectConfig, Fork, Analyzer) {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = write_project(tmp.path());
    let mut analyzer = Analyzer::new(&cfg.dir, "sample");
    let fork = Fork::new("sample").unwrap();
    fork.sync_all(&cfg, &mut analyzer).unwrap();
    (tmp, cfg, fork, analyzer)
}

#[test]
fn fork_mirrors_every_file() {
    let (_tmp, _cfg, fork, analyzer) = synced_fixture();

    // Sources are rewritten copies, non-sources are linked or copied.
    for rel in ["src/lib.rs", "src/widgets/mod.rs", "src/util/mod.rs", "docs/notes.md", "Cargo.toml"] {
        assert!(fork.dir().join(rel).exists(), "missing {rel}");
    }

    // The user main was renamed so the bootstrap can claim `main`.
    let util = std::fs::read_to_string(fork.dir().join("src/util/mod.rs")).unwrap();
    assert!(util.contains(&format!("fn {RESERVED_MAIN}()")));
    assert!(!util.contains("fn main()"));

    // One bootstrap for the one import path that has devcards.
    assert_eq!(analyzer.cards.len(), 2);
    let bootstrap_dir = fork.dir().join(bootstrap::bootstrap_dir(&analyzer.cards[0]));
    let bootstrap = std::fs::read_to_string(bootstrap_dir.join("gen_devcard_main.rs")).unwrap();
    assert!(bootstrap.contains("use sample::widgets as dc;"));
    assert!(bootstrap.contains("devcard_gallery"));
    assert!(bootstrap.contains("devcard_details"));

    // And it is registered in the rewritten manifest.
    let manifest = std::fs::read_to_string(fork.dir().join("Cargo.toml")).unwrap();
    assert!(manifest.contains("[[bin]]"));
    assert!(manifest.contains(&bootstrap::bin_name(&analyzer.cards[0])));
}

#[test]
fn metadata_is_deterministic() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = write_project(tmp.path());

    let mut first = Analyzer::new(&cfg.dir, "sample");
    let fork1 = Fork::new("sample").unwrap();
    fork1.sync_all(&cfg, &mut first).unwrap();

    let mut second = Analyzer::new(&cfg.dir, "sample");
    let fork2 = Fork::new("sample").unwrap();
    fork2.sync_all(&cfg, &mut second).unwrap();

    assert_eq!(first.cards, second.cards);
    let names: Vec<&str> = first.cards.iter().map(|m| m.name.as_str()).collect();
    // Stable order: by path, textual order within the file.
    assert_eq!(names, vec!["devcard_gallery", "devcard_details"]);
}

#[test]
fn devcard_discovery_round_trip() {
    let (tmp, cfg, fork, mut analyzer) = synced_fixture();
    assert_eq!(analyzer.cards.len(), 2);

    // A new file with a matching function grows the metadata.
    let extra = tmp.path().join("src/util/extra.rs");
    std::fs::write(
        &extra,
        "use devcards::Devcard;\n\npub fn devcard_extra(card: &mut Devcard) {}\n",
    )
    .unwrap();
    fork.sync_file(&cfg, &mut analyzer, &extra, false).unwrap();
    assert_eq!(analyzer.cards.len(), 3);
    assert!(analyzer.cards.iter().any(|m| m.name == "devcard_extra"));

    // Removing the file shrinks it again.
    std::fs::remove_file(&extra).unwrap();
    fork.remove_file(&cfg, &mut analyzer, &extra);
    assert_eq!(analyzer.cards.len(), 2);
    assert!(!fork.dir().join("src/util/extra.rs").exists());
}

#[test]
fn parse_error_mirrors_source_verbatim() {
    let (tmp, cfg, fork, mut analyzer) = synced_fixture();

    let path = tmp.path().join("src/widgets/mod.rs");
    let broken = "pub fn devcard_broken(card: &mut Devcard {";
    std::fs::write(&path, broken).unwrap();
    fork.sync_file(&cfg, &mut analyzer, &path, false).unwrap();

    let mirrored = std::fs::read_to_string(fork.dir().join("src/widgets/mod.rs")).unwrap();
    assert_eq!(mirrored, broken);
}

#[test]
fn injection_files_cover_every_package() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut cfg = write_project(tmp.path());
    cfg.injection = "pub(crate) const INJECTED: bool = true;".into();

    let mut analyzer = Analyzer::new(&cfg.dir, "sample");
    let fork = Fork::new("sample").unwrap();
    fork.sync_all(&cfg, &mut analyzer).unwrap();

    for dir in ["src", "src/widgets", "src/util"] {
        let path = fork.dir().join(dir).join(INJECTION_FILE);
        assert!(path.exists(), "missing injection in {dir}");
        assert_eq!(std::fs::read_to_string(path).unwrap(), cfg.injection);
    }
}

#[test]
fn titles_are_extracted_from_set_title() {
    let (_tmp, _cfg, _fork, analyzer) = synced_fixture();
    let gallery = analyzer
        .cards
        .iter()
        .find(|m| m.name == "devcard_gallery")
        .unwrap();
    assert_eq!(gallery.title, "Widget gallery");
    assert_eq!(gallery.caption(), "Widget gallery");

    let details = analyzer
        .cards
        .iter()
        .find(|m| m.name == "devcard_details")
        .unwrap();
    assert_eq!(details.title, "");
    assert_eq!(details.caption(), "devcard_details");
}
