//! Cell rendering: tagged cells in, HTML fragments out.
//!
//! This is the boundary to the page-rendering collaborators. Markdown goes
//! through the `markdown` crate; everything else is assembled here. Syntax
//! highlighting proper happens client-side, so the [`Highlighter`] only
//! decides which `language-*` class a code block gets.

use devcards::Cell;

/// Opaque handle configured from `[appearance] code-highlighting`.
#[derive(Debug, Clone)]
pub struct Highlighter {
    default_lang: String,
}

impl Highlighter {
    pub fn new(default_lang: &str) -> Highlighter {
        Highlighter {
            default_lang: default_lang.to_string(),
        }
    }

    fn code_class(&self, lang: Option<&str>) -> String {
        let lang = lang.unwrap_or(&self.default_lang);
        if lang.is_empty() {
            String::new()
        } else {
            format!(" class=\"language-{}\"", escape_html(lang))
        }
    }
}

/// Render one cell to an HTML fragment.
pub fn render_cell(highlighter: &Highlighter, cell: &Cell) -> String {
    match cell {
        Cell::Markdown { text } => md_to_html(text),
        Cell::Html { html } => html.clone(),
        Cell::Error { title, body } => render_error(title, body),
        Cell::Monospace { text, highlighting } => {
            format!(
                "<pre><code{}>{}</code></pre>",
                highlighter.code_class(highlighting.as_deref()),
                escape_html(text)
            )
        }
        Cell::Value { values } => values
            .iter()
            .map(|v| format!("<pre class=\"dc-value\">{}</pre>", escape_html(v)))
            .collect(),
        Cell::AnnotatedValue { values } => values
            .iter()
            .map(|av| {
                format!(
                    "<div class=\"dc-annotated\"><span class=\"dc-annotation\">{}</span><pre class=\"dc-value\">{}</pre></div>",
                    escape_html(&av.annotation),
                    escape_html(&av.value)
                )
            })
            .collect(),
        Cell::Image { images } => images
            .iter()
            .map(|img| {
                let caption = if img.annotation.is_empty() {
                    String::new()
                } else {
                    format!("<figcaption>{}</figcaption>", escape_html(&img.annotation))
                };
                format!(
                    "<figure class=\"dc-image\"><img src=\"/file?path={}\">{}</figure>",
                    escape_query(&img.path),
                    caption
                )
            })
            .collect(),
        Cell::Source { decls } => decls
            .iter()
            .map(|d| format!("<pre><code>{}</code></pre>", escape_html(d)))
            .collect(),
        Cell::Jump { .. } => "<div class=\"dc-jump\"></div>".to_string(),
        Cell::Wait { id } => format!(
            "<div class=\"dc-wait\"><a href=\"/unblock/{}\" target=\"-dc-unblock\">Continue ▶</a></div>",
            escape_html(id)
        ),
    }
}

/// Render an error report, as used both for error cells and for runner
/// failures.
pub fn render_error(title: &str, body: &str) -> String {
    let mut html = format!("<div class=\"dc-error\"><h3>{}</h3>", escape_html(title));
    if !body.is_empty() {
        html.push_str(&format!("<pre>{}</pre>", escape_html(body)));
    }
    html.push_str("</div>");
    html
}

/// Markdown to HTML, raw HTML allowed (devcards are local and trusted).
pub fn md_to_html(text: &str) -> String {
    let options = markdown::Options {
        compile: markdown::CompileOptions {
            allow_dangerous_html: true,
            ..markdown::CompileOptions::default()
        },
        ..markdown::Options::default()
    };
    markdown::to_html_with_options(text, &options).unwrap_or_else(|_| escape_html(text))
}

/// Minimal HTML escaping for text interpolated into markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode a query-string value.
fn escape_query(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
