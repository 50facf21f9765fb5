//! HTML page shells.
//!
//! Pages are static shells: a title, the cell containers, and the client
//! script that opens the WebSocket and applies frames. All dynamic content
//! arrives over the stream.

const JAVASCRIPT: &str = include_str!("../../assets/javascript.js");

const SHELL: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<link rel="icon" href="/favicon.png">
<link rel="stylesheet" href="/stylesheet/css">
<script>
{{javascript}}
</script>
</head>
<body>
<h1 id="-devcard-title">{{title}}</h1>
<div id="-devcard-navigation"></div>
<div id="-devcard-cells">{{body}}</div>
<div id="-devcard-stdout"></div>
<div id="-devcard-stderr"></div>
<div id="-devcard-status-bar"></div>
<iframe name="-dc-unblock" hidden></iframe>
</body>
</html>
"#;

/// One renderable page.
#[derive(Debug, Default)]
pub struct Page<'a> {
    pub title: &'a str,
    pub client_id: &'a str,
    pub client_kind: &'a str,
    pub url: &'a str,
    pub project_name: &'a str,
    pub devcard_name: &'a str,
    /// Static body, for pages without a streaming client.
    pub body: &'a str,
}

impl Page<'_> {
    pub fn generate(&self) -> String {
        SHELL
            .replace("{{javascript}}", JAVASCRIPT)
            .replace("{{title}}", self.title)
            .replace("{{body}}", self.body)
            .replace("{{clientId}}", self.client_id)
            .replace("{{clientKind}}", self.client_kind)
            .replace("{{url}}", self.url)
            .replace("{{projectName}}", self.project_name)
            .replace("{{devcardName}}", self.devcard_name)
    }
}
