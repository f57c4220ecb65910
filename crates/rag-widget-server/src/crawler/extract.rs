use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};

/// Elements whose subtrees carry no readable content.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "template", "form",
    "iframe", "svg", "button",
];

/// Elements that end a visual block; text around them gets a newline.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr",
    "blockquote", "pre", "br", "table", "ul", "ol",
];

#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub text: String,
    pub title: Option<String>,
    pub canonical: Option<String>,
}

/// Readability-style extraction: prefer the semantic main-content element,
/// drop boilerplate subtrees, and flatten the rest to newline-separated text.
pub fn extract(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title");
    let canonical = Selector::parse(r#"link[rel="canonical"]"#)
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(|href| href.trim().to_string())
        })
        .filter(|href| !href.is_empty());

    let mut text = String::new();
    for candidate in ["article", "main", "[role=\"main\"]", "body"] {
        let Ok(selector) = Selector::parse(candidate) else {
            continue;
        };
        if let Some(root) = document.select(&selector).next() {
            let mut raw = String::new();
            collect_text(*root, &mut raw);
            text = normalize_whitespace(&raw);
            if !text.is_empty() {
                break;
            }
        }
    }

    ExtractedPage {
        text,
        title: title.filter(|t| !t.is_empty()),
        canonical,
    }
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(element) => {
            let tag = element.name();
            if EXCLUDED_TAGS.contains(&tag) {
                return;
            }
            let block = BLOCK_TAGS.contains(&tag);
            if block {
                out.push('\n');
            }
            for child in node.children() {
                collect_text(child, out);
            }
            if block {
                out.push('\n');
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

fn normalize_whitespace(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push("");
            }
        } else {
            lines.push(line);
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_canonical_and_body_text() {
        let html = r#"<html><head>
            <title>My Page</title>
            <link rel="canonical" href="https://example.com/page">
          </head><body>
            <nav>Home | About</nav>
            <article><h1>Welcome</h1><p>First paragraph.</p><p>Second paragraph.</p></article>
            <footer>copyright</footer>
          </body></html>"#;

        let page = extract(html);
        assert_eq!(page.title.as_deref(), Some("My Page"));
        assert_eq!(page.canonical.as_deref(), Some("https://example.com/page"));
        assert!(page.text.contains("First paragraph."));
        assert!(page.text.contains("Welcome"));
        assert!(!page.text.contains("Home | About"));
        assert!(!page.text.contains("copyright"));
    }

    #[test]
    fn scripts_and_styles_are_dropped() {
        let html = "<html><body><p>visible</p><script>var x = 1;</script>\
                    <style>p { color: red }</style></body></html>";
        let page = extract(html);
        assert_eq!(page.text, "visible");
    }

    #[test]
    fn falls_back_to_body_without_article() {
        let html = "<html><body><div><p>just a div page</p></div></body></html>";
        let page = extract(html);
        assert!(page.text.contains("just a div page"));
    }

    #[test]
    fn empty_shell_yields_empty_text() {
        let page = extract(r#"<html><body><div id="root"></div></body></html>"#);
        assert!(page.text.is_empty());
        assert!(page.title.is_none());
    }
}
