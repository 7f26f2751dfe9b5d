use crate::model::Flash;

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn render_flashes(flashes: &[Flash]) -> String {
    flashes
        .iter()
        .map(|flash| {
            format!(
                r#"<div class="alert alert-{}" role="alert">{}</div>"#,
                flash.category.as_str(),
                escape_html(&flash.message)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fragment swapped into `#alert-container`
pub fn alert_fragment(flashes: &[Flash]) -> String {
    format!(
        "<div id=\"alert-container\">\n{}\n</div>",
        render_flashes(flashes)
    )
}

/// Full document with navigation chrome
pub fn page(title: &str, flashes: &[Flash], body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title} | OpeNGSync</title>
<link rel="stylesheet" href="/static/style.css">
<script src="/static/htmx.min.js"></script>
</head>
<body>
<nav class="navbar"><a href="/">OpeNGSync</a></nav>
{alerts}
<main>
{body}
</main>
</body>
</html>"#,
        title = escape_html(title),
        alerts = alert_fragment(flashes),
        body = body,
    )
}

/// Error body for the page flavor
pub fn error_page(code: u16, message: &str, flashes: &[Flash], detail: Option<&str>) -> String {
    page(
        &code.to_string(),
        flashes,
        &error_body(code, message, detail),
    )
}

/// Error body for the resource flavor, without navigation chrome
pub fn error_resource(code: u16, message: &str, flashes: &[Flash], detail: Option<&str>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{code}</title></head>
<body>
{alerts}
{body}
</body>
</html>"#,
        code = code,
        alerts = render_flashes(flashes),
        body = error_body(code, message, detail),
    )
}

fn error_body(code: u16, message: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|d| format!("\n<pre class=\"traceback\">{}</pre>", escape_html(d)))
        .unwrap_or_default();
    format!(
        "<div class=\"error\">\n<h1>{}</h1>\n<p>{}</p>{}\n</div>",
        code,
        escape_html(message),
        detail
    )
}
