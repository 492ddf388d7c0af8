use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::clean_text;

/// Elements whose text is never visible.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Visible text of an HTML document with whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 4);

    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| HIDDEN_TAGS.contains(&el.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }

    clean_text(&out).unwrap_or_default()
}

/// Trimmed `<title>` text, if present and non-empty.
pub fn page_title(html: &str) -> Option<String> {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("title").expect("valid selector"));

    let doc = Html::parse_document(html);
    let title = doc.select(&TITLE_SEL).next()?;
    clean_text(&title.text().collect::<String>())
}
