//! Main-content text extraction from raw HTML.
//!
//! A small readability-style heuristic: score the block-level containers of the
//! page by how much non-link text they hold, pick the best one, drop the
//! non-content elements inside it and flatten what is left into one line of text.

use std::collections::HashMap;

use scraper::node::Element;
use scraper::{Html, Node};

use crate::config::Config;

/// Elements whose text never reaches the excerpt.
const STRIPPED_TAGS: [&str; 9] = [
    "script", "style", "nav", "header", "footer", "aside", "form", "iframe", "noscript",
];

/// Class/id fragments that mark page chrome rather than content.
const BOILERPLATE_MARKERS: [&str; 12] = [
    "nav",
    "menu",
    "sidebar",
    "footer",
    "header",
    "banner",
    "cookie",
    "consent",
    "advert",
    "promo",
    "subscribe",
    "newsletter",
];

const CANDIDATE_TAGS: [&str; 4] = ["article", "main", "section", "div"];

/// Candidates with less visible text than this are ignored.
const MIN_CANDIDATE_CHARS: usize = 20;

/// Converts HTML into a bounded plain-text excerpt.
///
/// Extraction is a pure function of the input: the same HTML always yields the
/// same text, and malformed markup degrades to partial or empty text.
///
/// # Examples
///
/// ```
/// use reflexity::ContentExtractor;
///
/// let extractor = ContentExtractor::new(100);
/// let html = "<html><body><nav>Home</nav><article><p>Rust is fast and memory safe.</p></article></body></html>";
/// assert_eq!(extractor.extract(html), "Rust is fast and memory safe.");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContentExtractor {
    max_chars: usize,
}

impl ContentExtractor {
    /// Creates an extractor that caps output at `max_chars` characters.
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_page_chars)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Extracts the readable main text of `html`, truncated to the character cap.
    pub fn extract(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let page = PageTree::new(&document);
        let root = page
            .main_content()
            .or_else(|| page.first_element("body"))
            .unwrap_or(0);

        let cleaned = page
            .text_under(root)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        truncate_chars(&cleaned, self.max_chars)
    }
}

/// Text statistics for every node of a parsed page, in document order.
///
/// Built in two linear passes so scoring stays cheap however deep the markup nests.
struct PageTree<'a> {
    nodes: Vec<&'a Node>,
    /// Node `i` and its descendants occupy `i..i + span[i]`.
    span: Vec<usize>,
    /// Inside a stripped element.
    hidden: Vec<bool>,
    text_chars: Vec<usize>,
    link_chars: Vec<usize>,
}

impl<'a> PageTree<'a> {
    fn new(document: &'a Html) -> Self {
        let order: Vec<_> = document.root_element().descendants().collect();
        let position: HashMap<_, usize> = order
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        let parent: Vec<Option<usize>> = order
            .iter()
            .map(|node| node.parent().and_then(|p| position.get(&p.id()).copied()))
            .collect();
        let nodes: Vec<&'a Node> = order.iter().map(|node| node.value()).collect();

        let len = nodes.len();
        let mut hidden = vec![false; len];
        for i in 0..len {
            if let Some(p) = parent[i] {
                hidden[i] = hidden[p] || is_stripped(nodes[p]);
            }
        }

        // Descendants always follow their ancestors, so a reverse walk sees
        // every child before its parent.
        let mut span = vec![1; len];
        let mut text_chars = vec![0; len];
        let mut link_chars = vec![0; len];
        for i in (0..len).rev() {
            match nodes[i] {
                Node::Text(text) => text_chars[i] = text.trim().chars().count(),
                Node::Element(el) if el.name() == "a" => link_chars[i] = text_chars[i],
                _ => {}
            }
            let Some(p) = parent[i] else {
                continue;
            };
            span[p] += span[i];
            if !is_stripped(nodes[i]) {
                text_chars[p] += text_chars[i];
                link_chars[p] += link_chars[i];
            }
        }

        Self {
            nodes,
            span,
            hidden,
            text_chars,
            link_chars,
        }
    }

    fn first_element(&self, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| node.as_element().is_some_and(|el| el.name() == name))
    }

    /// Picks the container most likely to hold the article body.
    fn main_content(&self) -> Option<usize> {
        let mut best: Option<(i64, usize)> = None;
        for (i, node) in self.nodes.iter().enumerate() {
            let Some(el) = node.as_element() else {
                continue;
            };
            if !CANDIDATE_TAGS.contains(&el.name()) || self.hidden[i] || is_boilerplate(el) {
                continue;
            }

            let text_chars = self.text_chars[i];
            if text_chars < MIN_CANDIDATE_CHARS {
                continue;
            }
            let link_chars = self.link_chars[i];

            let mut score = text_chars as i64 - 2 * link_chars as i64;
            match el.name() {
                "article" => score += 500,
                "main" => score += 300,
                _ => {}
            }
            if link_chars > text_chars / 2 {
                score -= 500;
            }

            // Strictly greater: the first of equally scored blocks wins.
            if score > 0 && best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, i));
            }
        }

        best.map(|(_, i)| i)
    }

    /// Visible text under node `root`, pieces joined by single spaces.
    fn text_under(&self, root: usize) -> String {
        let end = (root + self.span.get(root).copied().unwrap_or(0)).min(self.nodes.len());
        (root..end)
            .filter(|&i| !self.hidden[i])
            .filter_map(|i| self.nodes[i].as_text())
            .map(|text| &**text)
            .collect::<Vec<&str>>()
            .join(" ")
    }
}

fn is_boilerplate(el: &Element) -> bool {
    let mut marker = String::new();
    if let Some(class) = el.attr("class") {
        marker.push_str(class);
        marker.push(' ');
    }
    if let Some(id) = el.attr("id") {
        marker.push_str(id);
    }
    if marker.is_empty() {
        return false;
    }
    let marker = marker.to_ascii_lowercase();
    BOILERPLATE_MARKERS.iter().any(|bad| marker.contains(bad))
}

fn is_stripped(node: &Node) -> bool {
    node.as_element()
        .is_some_and(|el| STRIPPED_TAGS.contains(&el.name()))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
