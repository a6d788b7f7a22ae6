//! Block tree to HTML markup.
//!
//! Consecutive list items are grouped by a three-state machine ([`ListState`]):
//! a list opens when the first item of its kind arrives and closes as soon as a
//! node of another kind (or the end of the sequence) follows. Each nesting level
//! runs its own machine. Images are relayed through [`MediaRelay`] and rendered
//! with the returned storage reference.

use std::fmt::Write as _;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{MediaFetcher, MediaStore};
use crate::media::MediaRelay;
use crate::model::{ContentNode, ContentTree, ListKind, NodeId, NodeKind, TextRun};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Inline style of the container wrapping a node's children.
    pub indent_style: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            indent_style: "margin-left: 2em".to_string(),
        }
    }
}

impl ListKind {
    pub fn open_tag(self) -> &'static str {
        match self {
            ListKind::Bulleted => "<ul>",
            ListKind::Numbered => "<ol>",
        }
    }

    pub fn close_tag(self) -> &'static str {
        match self {
            ListKind::Bulleted => "</ul>",
            ListKind::Numbered => "</ol>",
        }
    }
}

/// List grouping state while walking one sequence of siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListState {
    #[default]
    Outside,
    Inside(ListKind),
}

/// Tags to emit before the next node: an optional close followed by an optional open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListEdge {
    pub close: Option<ListKind>,
    pub open: Option<ListKind>,
}

impl ListEdge {
    pub fn write_to(self, out: &mut String) {
        if let Some(kind) = self.close {
            out.push_str(kind.close_tag());
        }
        if let Some(kind) = self.open {
            out.push_str(kind.open_tag());
        }
    }
}

impl ListState {
    /// Next state and the edge to emit when a node of `kind` follows.
    pub fn step(self, kind: NodeKind) -> (ListState, ListEdge) {
        match (self, kind.list_kind()) {
            (ListState::Outside, None) => (self, ListEdge::default()),
            (ListState::Outside, Some(next)) => (
                ListState::Inside(next),
                ListEdge {
                    close: None,
                    open: Some(next),
                },
            ),
            (ListState::Inside(current), Some(next)) if current == next => {
                (self, ListEdge::default())
            }
            (ListState::Inside(current), Some(next)) => (
                ListState::Inside(next),
                ListEdge {
                    close: Some(current),
                    open: Some(next),
                },
            ),
            (ListState::Inside(current), None) => (
                ListState::Outside,
                ListEdge {
                    close: Some(current),
                    open: None,
                },
            ),
        }
    }

    /// Edge to emit when the sequence ends.
    pub fn finish(self) -> ListEdge {
        match self {
            ListState::Outside => ListEdge::default(),
            ListState::Inside(current) => ListEdge {
                close: Some(current),
                open: None,
            },
        }
    }
}

pub struct ContentRenderer<'a, F, S> {
    relay: &'a MediaRelay<'a, F, S>,
    options: &'a RenderOptions,
}

impl<'a, F: MediaFetcher, S: MediaStore> ContentRenderer<'a, F, S> {
    pub fn new(relay: &'a MediaRelay<'a, F, S>, options: &'a RenderOptions) -> Self {
        Self { relay, options }
    }

    /// Render the whole tree. Never fails: a node that cannot be rendered is left out.
    pub async fn render(&self, tree: &ContentTree) -> String {
        let markup = self.render_sequence(tree, tree.roots()).await;
        debug!(nodes = tree.len(), bytes = markup.len(), "[RENDER] Tree rendered");
        markup
    }

    fn render_sequence<'b>(&'b self, tree: &'b ContentTree, ids: &'b [NodeId]) -> BoxFuture<'b, String> {
        async move {
            let mut out = String::new();
            let mut state = ListState::default();
            for &id in ids {
                let node = tree.node(id);
                let (next, edge) = state.step(node.kind);
                edge.write_to(&mut out);
                state = next;

                let children = tree.children(id);
                let nested = if children.is_empty() {
                    String::new()
                } else {
                    let inner = self.render_sequence(tree, children).await;
                    format!(
                        "<div style=\"{}\">{}</div>",
                        escape_html(&self.options.indent_style),
                        inner
                    )
                };
                out.push_str(&self.render_node(node, &nested).await);
            }
            state.finish().write_to(&mut out);
            out
        }
        .boxed()
    }

    /// Markup for `node` followed by `nested`, the container of its children.
    /// List items keep the container inside their `<li>`.
    async fn render_node(&self, node: &ContentNode, nested: &str) -> String {
        let own = match node.kind {
            NodeKind::Paragraph => wrap("p", &rich_text_to_markup(&node.text)),
            NodeKind::Heading1 => wrap("h1", &rich_text_to_markup(&node.text)),
            NodeKind::Heading2 => wrap("h2", &rich_text_to_markup(&node.text)),
            NodeKind::Heading3 => wrap("h3", &rich_text_to_markup(&node.text)),
            NodeKind::BulletedItem | NodeKind::NumberedItem => {
                return format!("<li>{}{}</li>", rich_text_to_markup(&node.text), nested);
            }
            NodeKind::Quote => wrap("blockquote", &rich_text_to_markup(&node.text)),
            NodeKind::Code => {
                let code: String = node.text.iter().map(|r| r.text.as_str()).collect();
                match &node.language {
                    Some(lang) => format!(
                        "<pre><code class=\"language-{}\">{}</code></pre>",
                        escape_html(lang),
                        escape_html(&code)
                    ),
                    None => format!("<pre><code>{}</code></pre>", escape_html(&code)),
                }
            }
            NodeKind::Image => {
                let Some(media) = &node.media else {
                    debug!(block_id = %node.id, "[RENDER] Image block without a source, skipping");
                    return nested.to_string();
                };
                let reference = self.relay.relay(media).await;
                if reference.is_empty() {
                    String::new()
                } else {
                    format!("<img src=\"{}\"/>", escape_html(&reference))
                }
            }
            NodeKind::Divider => "<hr/>".to_string(),
            NodeKind::Unsupported => String::new(),
        };
        own + nested
    }
}

fn wrap(tag: &str, inner: &str) -> String {
    format!("<{tag}>{inner}</{tag}>")
}

/// Concatenate runs, each wrapped in its formatting tags.
///
/// Nesting order, outermost first: link, bold, italic, strikethrough, underline, code.
pub fn rich_text_to_markup(runs: &[TextRun]) -> String {
    let mut out = String::new();
    for run in runs {
        let mut inner = escape_html(&run.text);
        let a = run.annotations;
        let layers = [
            (a.code, "code"),
            (a.underline, "u"),
            (a.strikethrough, "del"),
            (a.italic, "em"),
            (a.bold, "strong"),
        ];
        for (active, tag) in layers {
            if active {
                inner = wrap(tag, &inner);
            }
        }
        match &run.href {
            Some(href) => {
                let _ = write!(out, "<a href=\"{}\">{}</a>", escape_html(href), inner);
            }
            None => out.push_str(&inner),
        }
    }
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

/// Plain text of the tree's text-bearing nodes, whitespace-collapsed and cut to
/// `max_chars` characters.
pub fn plain_text_excerpt(tree: &ContentTree, max_chars: usize) -> String {
    let text = tree
        .walk()
        .into_iter()
        .filter(|node| node.kind.has_text() && node.kind != NodeKind::Code)
        .flat_map(|node| node.text.iter().map(|r| r.text.as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
