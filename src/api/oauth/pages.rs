//! HTML pages returned by the callback endpoint.

const STYLE: &str = "body{font-family:sans-serif;max-width:40em;margin:4em auto;padding:0 1em}\
h1{font-size:1.4em}.detail{color:#555}";

/// Escape text for interpolation into HTML element content or attributes.
pub(super) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
<style>{STYLE}</style></head><body><h1>{title}</h1>{body}</body></html>\n",
        title = escape_html(title),
        STYLE = STYLE,
        body = body
    )
}

pub(super) fn success(tenant: &str) -> String {
    page(
        "Authorization complete",
        &format!(
            "<p>Access for <strong>{}</strong> is now authorized.</p>\
<p>You can close this window and retry your request.</p>",
            escape_html(tenant)
        ),
    )
}

pub(super) fn failure(reason: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|d| format!("<p class=\"detail\">{}</p>", escape_html(d)))
        .unwrap_or_default();
    page(
        "Authorization failed",
        &format!(
            "<p>{}</p>{}<p>Start the authorization again from your application.</p>",
            escape_html(reason),
            detail
        ),
    )
}
