//! Source analysis: devcard discovery and file rewriting.
//!
//! Every `.rs` file in the project is parsed with `syn`. The analyzer
//! records the file's function declarations (for source cells), maps its
//! directory to a package name, discovers devcard producers, and rewrites
//! the file for the fork. The only rewrite is renaming a top-level `fn
//! main` to the reserved name, done by splicing the identifier at its exact
//! byte offset so comments and formatting survive untouched.
//!
//! Files that don't parse are mirrored verbatim; `cargo` reports the error
//! in the fork build with its own diagnostics.

use devcards::DevcardMeta;
use proc_macro2::LineColumn;
use quote::ToTokens;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use syn::spanned::Spanned;

/// The name a user `fn main` is renamed to in the fork, freeing `main` for
/// the generated bootstrap.
pub const RESERVED_MAIN: &str = "__devcard_main";

/// A devcard producer takes exactly one parameter of this type.
const PRODUCER_PARAM_TYPES: [&str; 2] = ["&mut Devcard", "&mut devcards::Devcard"];

/// Per-project analysis state, rebuilt on every full restart.
#[derive(Debug)]
pub struct Analyzer {
    project_dir: PathBuf,
    module: String,

    /// `package.function` → declaration source text.
    decls: HashMap<String, String>,
    /// Relative directory → package name.
    pub packages: HashMap<String, String>,
    /// Devcard metadata, stably sorted by source path.
    pub cards: Vec<DevcardMeta>,
}

impl Analyzer {
    /// `module` is the crate name read from the project's `Cargo.toml`.
    pub fn new(project_dir: &Path, module: &str) -> Analyzer {
        Analyzer {
            project_dir: project_dir.to_path_buf(),
            module: module.to_string(),
            decls: HashMap::new(),
            packages: HashMap::new(),
            cards: Vec::new(),
        }
    }

    /// Drop all collected state before a full re-scan.
    pub fn clear(&mut self) {
        self.decls.clear();
        self.packages.clear();
        self.cards.clear();
    }

    /// Analyze one file and return the contents its fork mirror should have.
    ///
    /// `None` means the file is not a Rust source and should be linked or
    /// copied instead. Unparseable sources come back verbatim.
    pub fn update_file(&mut self, path: &Path) -> std::io::Result<Option<String>> {
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            return Ok(None);
        }

        let source = std::fs::read_to_string(path)?;
        let file = match syn::parse_file(&source) {
            Ok(file) => file,
            Err(_) => return Ok(Some(source)),
        };

        let package = self.collect_package(path);
        self.collect_decls(&package, &source, &file);
        self.update_cards(path, &package, &source, &file);
        Ok(Some(rewrite(&source, &file)))
    }

    /// Forget a deleted file's devcards.
    pub fn remove_file(&mut self, path: &Path) {
        let rel = self.rel_path(path);
        self.cards.retain(|meta| meta.path != rel);
    }

    /// Source text of `package.function`, for source cells.
    pub fn source(&self, decl: &str) -> Option<&str> {
        self.decls.get(decl).map(|s| s.as_str())
    }

    fn rel_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_dir)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Map the file's directory to a package name and remember it.
    fn collect_package(&mut self, path: &Path) -> String {
        let rel_dir = Path::new(&self.rel_path(path))
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let package = package_of(&import_path(&self.module, &rel_dir));
        self.packages.insert(rel_dir, package.clone());
        package
    }

    fn collect_decls(&mut self, package: &str, source: &str, file: &syn::File) {
        for item in &file.items {
            if let syn::Item::Fn(func) = item {
                let key = format!("{package}.{}", func.sig.ident);
                if let Some(text) = slice_span(source, func.span()) {
                    self.decls.insert(key, text.to_string());
                }
            }
        }
    }

    /// Replace this file's metadata with what the parse found, keeping the
    /// list stably sorted by path.
    fn update_cards(&mut self, path: &Path, package: &str, source: &str, file: &syn::File) {
        let rel = self.rel_path(path);
        self.cards.retain(|meta| meta.path != rel);

        let rel_dir = Path::new(&rel)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        for item in &file.items {
            let syn::Item::Fn(func) = item else { continue };
            if !is_devcard_producer(func) {
                continue;
            }
            self.cards.push(DevcardMeta {
                import_path: import_path(&self.module, &rel_dir),
                package: package.to_string(),
                path: rel.clone(),
                line: func.sig.ident.span().start().line,
                name: func.sig.ident.to_string(),
                title: devcard_title(source, func),
            });
        }

        self.cards.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

/// Module path of a file in `rel_dir`, e.g. `my_crate::widgets`.
///
/// Files directly under `src/` (or in the project root) belong to the crate
/// root module.
pub fn import_path(module: &str, rel_dir: &str) -> String {
    let rel_dir = rel_dir.strip_prefix("src").unwrap_or(rel_dir);
    let rel_dir = rel_dir.trim_matches('/');
    if rel_dir.is_empty() {
        return module.to_string();
    }
    let mut path = module.to_string();
    for part in rel_dir.split('/') {
        path.push_str("::");
        path.push_str(part);
    }
    path
}

/// The package name: the last segment of an import path.
pub fn package_of(import_path: &str) -> String {
    import_path.rsplit("::").next().unwrap_or(import_path).to_string()
}

/// A function is a devcard producer iff its name starts with `devcard_`, it
/// has no generic parameters, no return type, and exactly one parameter
/// whose type prints as the devcard handle.
fn is_devcard_producer(func: &syn::ItemFn) -> bool {
    if !func.sig.ident.to_string().starts_with("devcard_") {
        return false;
    }
    if !func.sig.generics.params.is_empty() || func.sig.generics.where_clause.is_some() {
        return false;
    }
    if !matches!(func.sig.output, syn::ReturnType::Default) {
        return false;
    }
    if func.sig.inputs.len() != 1 {
        return false;
    }
    let syn::FnArg::Typed(param) = &func.sig.inputs[0] else {
        return false;
    };
    let printed = normalize_tokens(&param.ty.to_token_stream().to_string());
    PRODUCER_PARAM_TYPES
        .iter()
        .any(|t| normalize_tokens(t) == printed)
}

fn normalize_tokens(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Extract the devcard title: the first statement calling
/// `<receiver>.set_title(<single argument>)`. String literals are unquoted;
/// any other argument is returned as source text.
fn devcard_title(source: &str, func: &syn::ItemFn) -> String {
    for stmt in &func.block.stmts {
        let syn::Stmt::Expr(syn::Expr::MethodCall(call), _) = stmt else {
            continue;
        };
        if call.method != "set_title" || call.args.len() != 1 {
            continue;
        }
        let arg = &call.args[0];
        if let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(lit),
            ..
        }) = arg
        {
            return lit.value();
        }
        return slice_span(source, arg.span())
            .unwrap_or_default()
            .to_string();
    }
    String::new()
}

/// Rewrite a parsed source file for the fork: rename any top-level
/// `fn main` to [`RESERVED_MAIN`]. Everything else is byte-identical.
pub fn rewrite(source: &str, file: &syn::File) -> String {
    for item in &file.items {
        let syn::Item::Fn(func) = item else { continue };
        if func.sig.ident != "main" {
            continue;
        }
        let span = func.sig.ident.span();
        let Some(start) = offset_of(source, span.start()) else {
            continue;
        };
        if source[start..].starts_with("main") {
            let mut out = String::with_capacity(source.len() + RESERVED_MAIN.len());
            out.push_str(&source[..start]);
            out.push_str(RESERVED_MAIN);
            out.push_str(&source[start + "main".len()..]);
            return out;
        }
    }
    source.to_string()
}

/// Byte offset of a span position. Lines are 1-based, columns are 0-based
/// character counts.
fn offset_of(source: &str, pos: LineColumn) -> Option<usize> {
    let mut offset = 0;
    for (i, line) in source.split_inclusive('\n').enumerate() {
        if i + 1 == pos.line {
            let col_bytes: usize = line.chars().take(pos.column).map(|c| c.len_utf8()).sum();
            return Some(offset + col_bytes);
        }
        offset += line.len();
    }
    None
}

/// The source text covered by a span.
fn slice_span(source: &str, span: proc_macro2::Span) -> Option<&str> {
    let start = offset_of(source, span.start())?;
    let end = offset_of(source, span.end())?;
    source.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = r#"use devcards::Devcard;

/// Says hello.
pub fn devcard_hello(card: &mut Devcard) {
    card.set_title("Hi");
    card.md("hello");
}

pub fn devcard_raw(card: &mut devcards::Devcard) {
    card.md("raw");
}

fn helper() -> u32 {
    41 + 1
}

fn main() {
    println!("user main");
}
"#;

    fn analyzer_with_demo() -> (tempfile::TempDir, Analyzer) {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/lib.rs"), DEMO).unwrap();
        let mut analyzer = Analyzer::new(tmp.path(), "demo");
        analyzer
            .update_file(&tmp.path().join("src/lib.rs"))
            .unwrap();
        (tmp, analyzer)
    }

    #[test]
    fn test_discovers_producers_in_textual_order() {
        let (_tmp, analyzer) = analyzer_with_demo();
        let names: Vec<&str> = analyzer.cards.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["devcard_hello", "devcard_raw"]);
        assert_eq!(analyzer.cards[0].import_path, "demo");
        assert_eq!(analyzer.cards[0].package, "demo");
        assert_eq!(analyzer.cards[0].path, "src/lib.rs");
        assert_eq!(analyzer.cards[0].title, "Hi");
        assert_eq!(analyzer.cards[1].title, "");
    }

    #[test]
    fn test_non_producers_are_skipped() {
        let source = r#"
pub fn devcard_generic<T>(card: &mut Devcard) {}
pub fn devcard_returns(card: &mut Devcard) -> u32 { 0 }
pub fn devcard_two(card: &mut Devcard, extra: u32) {}
pub fn devcard_wrong_type(card: &String) {}
pub fn other(card: &mut Devcard) {}
"#;
        let file = syn::parse_file(source).unwrap();
        for item in &file.items {
            if let syn::Item::Fn(func) = item {
                assert!(!is_devcard_producer(func), "{}", func.sig.ident);
            }
        }
    }

    #[test]
    fn test_main_is_renamed_and_everything_else_untouched() {
        let file = syn::parse_file(DEMO).unwrap();
        let rewritten = rewrite(DEMO, &file);
        assert!(rewritten.contains(&format!("fn {RESERVED_MAIN}() {{")));
        assert!(!rewritten.contains("fn main()"));
        // The rename is the only change.
        assert_eq!(
            rewritten.replace(RESERVED_MAIN, "main"),
            DEMO,
        );
        // Comments survive.
        assert!(rewritten.contains("/// Says hello."));
    }

    #[test]
    fn test_rewrite_without_main_is_identity() {
        let source = "pub fn helper() {}\n";
        let file = syn::parse_file(source).unwrap();
        assert_eq!(rewrite(source, &file), source);
    }

    #[test]
    fn test_remove_file_drops_metadata() {
        let (tmp, mut analyzer) = analyzer_with_demo();
        assert_eq!(analyzer.cards.len(), 2);
        analyzer.remove_file(&tmp.path().join("src/lib.rs"));
        assert!(analyzer.cards.is_empty());
    }

    #[test]
    fn test_parse_twice_is_deterministic() {
        let (tmp, mut analyzer) = analyzer_with_demo();
        let first = analyzer.cards.clone();
        analyzer
            .update_file(&tmp.path().join("src/lib.rs"))
            .unwrap();
        assert_eq!(analyzer.cards, first);
    }

    #[test]
    fn test_unparseable_source_comes_back_verbatim() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src/broken.rs");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "fn broken( {").unwrap();

        let mut analyzer = Analyzer::new(tmp.path(), "demo");
        let mirrored = analyzer.update_file(&path).unwrap();
        assert_eq!(mirrored.as_deref(), Some("fn broken( {"));
    }

    #[test]
    fn test_non_rust_file_is_not_rewritten() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("README.md");
        std::fs::write(&path, "# readme").unwrap();
        let mut analyzer = Analyzer::new(tmp.path(), "demo");
        assert_eq!(analyzer.update_file(&path).unwrap(), None);
    }

    #[test]
    fn test_import_path_mapping() {
        assert_eq!(import_path("demo", "src"), "demo");
        assert_eq!(import_path("demo", ""), "demo");
        assert_eq!(import_path("demo", "src/widgets"), "demo::widgets");
        assert_eq!(import_path("demo", "src/widgets/gallery"), "demo::widgets::gallery");
        assert_eq!(package_of("demo::widgets"), "widgets");
        assert_eq!(package_of("demo"), "demo");
    }

    #[test]
    fn test_source_lookup() {
        let (_tmp, analyzer) = analyzer_with_demo();
        let src = analyzer.source("demo.helper").unwrap();
        assert!(src.contains("fn helper() -> u32"));
        assert!(analyzer.source("demo.missing").is_none());
    }

    #[test]
    fn test_title_from_non_literal_argument() {
        let source = r#"
pub fn devcard_dynamic(card: &mut Devcard) {
    card.set_title(format!("run {}", 1));
}
"#;
        let file = syn::parse_file(source).unwrap();
        let syn::Item::Fn(func) = &file.items[0] else {
            panic!()
        };
        let title = devcard_title(source, func);
        assert!(title.contains("format!"));
    }
}
