//! In-memory document model.
//!
//! A document's body is a [`ContentTree`]: an arena of [`ContentNode`]s whose
//! child lists hold [`NodeId`] indices into the same arena. Subtrees fetched
//! independently are grafted in as whole fragments, so a node either has all of
//! its children or none of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Block kinds the renderer understands. Anything else is [`NodeKind::Unsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Paragraph,
    Heading1,
    Heading2,
    Heading3,
    BulletedItem,
    NumberedItem,
    Code,
    Image,
    Quote,
    Divider,
    Unsupported,
}

impl NodeKind {
    pub fn from_block_type(block_type: &str) -> Self {
        match block_type {
            "paragraph" => NodeKind::Paragraph,
            "heading_1" => NodeKind::Heading1,
            "heading_2" => NodeKind::Heading2,
            "heading_3" => NodeKind::Heading3,
            "bulleted_list_item" => NodeKind::BulletedItem,
            "numbered_list_item" => NodeKind::NumberedItem,
            "code" => NodeKind::Code,
            "image" => NodeKind::Image,
            "quote" => NodeKind::Quote,
            "divider" => NodeKind::Divider,
            _ => NodeKind::Unsupported,
        }
    }

    /// The list this kind belongs to, if it is a list item.
    pub fn list_kind(self) -> Option<ListKind> {
        match self {
            NodeKind::BulletedItem => Some(ListKind::Bulleted),
            NodeKind::NumberedItem => Some(ListKind::Numbered),
            _ => None,
        }
    }

    pub fn has_text(self) -> bool {
        matches!(
            self,
            NodeKind::Paragraph
                | NodeKind::Heading1
                | NodeKind::Heading2
                | NodeKind::Heading3
                | NodeKind::BulletedItem
                | NodeKind::NumberedItem
                | NodeKind::Code
                | NodeKind::Quote
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ListKind {
    Bulleted,
    Numbered,
}

/// Formatting flags of a text run. Unknown keys (such as colour) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
}

/// A span of text with uniform formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextRun {
    pub text: String,
    pub annotations: Annotations,
    pub href: Option<String>,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            annotations: Annotations::default(),
            href: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaKind {
    Cover,
    InlineImage,
}

/// A media resource still living at its source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One block of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentNode {
    /// Block identifier at the source.
    pub id: String,
    pub kind: NodeKind,
    pub text: Vec<TextRun>,
    pub media: Option<MediaDescriptor>,
    /// Language label of a code block.
    pub language: Option<String>,
    pub has_children: bool,
    pub children: Vec<NodeId>,
}

impl ContentNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            text: Vec::new(),
            media: None,
            language: None,
            has_children: false,
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: Vec<TextRun>) -> Self {
        self.text = text;
        self
    }

    /// Parse one block object as returned by the source's children listing.
    pub fn from_block(block: &Value) -> Result<Self, String> {
        let id = block
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "block without an id".to_string())?;
        let block_type = block
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("block {id} has no type"))?;
        let kind = NodeKind::from_block_type(block_type);
        let body = block.get(block_type).unwrap_or(&Value::Null);

        let mut node = ContentNode::new(id, kind);
        node.has_children = block
            .get("has_children")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if kind.has_text() {
            node.text = parse_rich_text(body.get("rich_text"))
                .map_err(|e| format!("block {id}: invalid rich text: {e}"))?;
        }
        if kind == NodeKind::Code {
            node.language = body
                .get("language")
                .and_then(Value::as_str)
                .filter(|l| !l.is_empty() && *l != "plain text")
                .map(str::to_string);
        }
        if kind == NodeKind::Image {
            node.media = file_url(body).map(|url| MediaDescriptor {
                url,
                kind: MediaKind::InlineImage,
            });
        }
        Ok(node)
    }
}

#[derive(Deserialize)]
struct RawRichText {
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    text: Option<RawTextContent>,
    #[serde(default)]
    annotations: Annotations,
    #[serde(default)]
    href: Option<String>,
}

#[derive(Deserialize)]
struct RawTextContent {
    #[serde(default)]
    content: String,
}

/// Parse a source rich-text array into runs. A missing array is an empty run list.
pub fn parse_rich_text(value: Option<&Value>) -> Result<Vec<TextRun>, serde_json::Error> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let raw: Vec<RawRichText> = serde_json::from_value(value.clone())?;
    Ok(raw
        .into_iter()
        .map(|r| TextRun {
            text: r
                .plain_text
                .or_else(|| r.text.map(|t| t.content))
                .unwrap_or_default(),
            annotations: r.annotations,
            href: r.href.filter(|h| !h.is_empty()),
        })
        .collect())
}

/// URL of a source file object: `{"type": "external", "external": {"url": ..}}`
/// or `{"type": "file", "file": {"url": ..}}`.
pub fn file_url(file: &Value) -> Option<String> {
    let file_type = file.get("type").and_then(Value::as_str)?;
    file.get(file_type)
        .and_then(|f| f.get("url"))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

/// Arena holding a document body in listing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentTree {
    nodes: Vec<ContentNode>,
    roots: Vec<NodeId>,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a top-level node.
    pub fn push_root(&mut self, mut node: ContentNode) -> NodeId {
        node.children.clear();
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.roots.push(id);
        id
    }

    /// Append a node under `parent`.
    pub fn push_child(&mut self, parent: NodeId, mut node: ContentNode) -> NodeId {
        node.children.clear();
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Move every node of `fragment` into this arena, attaching its roots under `parent`.
    pub fn graft(&mut self, parent: NodeId, fragment: ContentTree) {
        let offset = self.nodes.len();
        let ContentTree { nodes, roots } = fragment;
        self.nodes.extend(nodes.into_iter().map(|mut node| {
            for child in &mut node.children {
                child.0 += offset;
            }
            node
        }));
        self.nodes[parent.0]
            .children
            .extend(roots.into_iter().map(|r| NodeId(r.0 + offset)));
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &ContentNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in document order (pre-order, depth first).
    pub fn walk(&self) -> Vec<&ContentNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            out.push(node);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }
}

/// A source document with its body once fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub author: String,
    pub summary: Option<String>,
    pub cover: Option<MediaDescriptor>,
    pub source_url: String,
    pub synced: bool,
    pub content: ContentTree,
}

/// Position in a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            cursor: None,
            page_size,
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(results: Vec<T>) -> Self {
        Self {
            results,
            has_more: false,
            next_cursor: None,
        }
    }

    pub fn more(results: Vec<T>, next_cursor: impl Into<String>) -> Self {
        Self {
            results,
            has_more: true,
            next_cursor: Some(next_cursor.into()),
        }
    }
}
