use crate::types::AlertItem;
use serde::Serialize;

pub const DEFAULT_SUBJECT: &str = "Watched conditions were found satisfied";

const HEADER: &str = "Monitored conditions found satisfied";

/// Alert content rendered once per dispatch and shared read-only by every
/// provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertContent {
    pub subject: String,
    pub text_body: String,
    /// HTML rendition for channels that support rich bodies.
    pub structured_body: String,
    pub items: Vec<AlertItem>,
}

impl AlertContent {
    pub fn render(subject: &str, items: &[AlertItem]) -> Self {
        Self {
            subject: subject.to_string(),
            text_body: Self::format_text(items),
            structured_body: Self::format_html(items),
            items: items.to_vec(),
        }
    }

    fn format_text(items: &[AlertItem]) -> String {
        let mut body = format!("{HEADER}:\n");
        for item in items {
            body.push_str(&format!("{} --> {}\n", item.label(), item.url));
        }
        body
    }

    fn format_html(items: &[AlertItem]) -> String {
        let list: String = items
            .iter()
            .map(|item| {
                format!(
                    r#"<li><a href="{}">{}</a></li>"#,
                    escape_html(&item.url),
                    escape_html(item.label())
                )
            })
            .collect();
        format!("<h3>{HEADER}:</h3><ul>{list}</ul>")
    }
}

fn escape_html(s: &str) -> String {
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
