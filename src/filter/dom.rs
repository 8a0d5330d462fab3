//! Element tree the filter engine runs against.
//!
//! Hosting surfaces adapt the rendered page to this interface; tests drive
//! it directly. The shape mirrors the timeline structure the engine cares
//! about: cells wrapping post cards and user cards, name regions, profile
//! links. Node ids are only minted by [`Document::create_element`]; feeding
//! a foreign id back in is a logic error.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;

pub type NodeId = usize;

/// Structural role of an element, the analog of the host page's
/// test-id markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// A rendered post.
    PostCard,
    /// A profile card in a people list or search result.
    UserCard,
    /// Timeline cell wrapping one entry; the unit that gets hidden.
    Cell,
    /// Author block inside a post card, where the profile link lives.
    NameRegion,
    /// Anchor carrying an href.
    Link,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    /// An href changed. Only href attributes are observed; the engine's
    /// own marker attributes never come back around as mutations.
    Attributes,
    CharacterData,
}

/// One observer record delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added: Vec<NodeId>,
}

#[derive(Debug)]
struct ElementData {
    kind: ElementKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    href: Option<String>,
    attrs: HashMap<String, String>,
    text: String,
    display_hidden: bool,
}

impl ElementData {
    fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            href: None,
            attrs: HashMap::new(),
            text: String::new(),
            display_hidden: false,
        }
    }
}

pub struct Document {
    nodes: RwLock<Vec<ElementData>>,
    observers: RwLock<Vec<mpsc::UnboundedSender<Mutation>>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(vec![ElementData::new(ElementKind::Generic)]),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    /// New detached element. Nothing is emitted until it is attached.
    pub fn create_element(&self, kind: ElementKind) -> NodeId {
        let mut nodes = self.nodes.write();
        nodes.push(ElementData::new(kind));
        nodes.len() - 1
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        {
            let mut nodes = self.nodes.write();
            nodes[child].parent = Some(parent);
            nodes[parent].children.push(child);
        }
        self.emit(Mutation {
            kind: MutationKind::ChildList,
            target: parent,
            added: vec![child],
        });
    }

    pub fn set_href(&self, id: NodeId, href: &str) {
        self.nodes.write()[id].href = Some(href.to_string());
        self.emit(Mutation {
            kind: MutationKind::Attributes,
            target: id,
            added: Vec::new(),
        });
    }

    pub fn href(&self, id: NodeId) -> Option<String> {
        self.nodes.read()[id].href.clone()
    }

    /// Silent write: marker attributes are outside the observed filter.
    pub fn set_attr(&self, id: NodeId, name: &str, value: &str) {
        self.nodes.write()[id]
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.nodes.read()[id].attrs.get(name).cloned()
    }

    pub fn set_text(&self, id: NodeId, text: &str) {
        self.nodes.write()[id].text = text.to_string();
        self.emit(Mutation {
            kind: MutationKind::CharacterData,
            target: id,
            added: Vec::new(),
        });
    }

    pub fn text(&self, id: NodeId) -> String {
        self.nodes.read()[id].text.clone()
    }

    pub fn kind(&self, id: NodeId) -> ElementKind {
        self.nodes.read()[id].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.read()[id].parent
    }

    /// Silent write: display changes are outside the observed filter.
    pub fn set_display_hidden(&self, id: NodeId, hidden: bool) {
        self.nodes.write()[id].display_hidden = hidden;
    }

    pub fn is_display_hidden(&self, id: NodeId) -> bool {
        self.nodes.read()[id].display_hidden
    }

    /// Nearest self-or-ancestor of the given kind.
    pub fn closest(&self, id: NodeId, kind: ElementKind) -> Option<NodeId> {
        let nodes = self.nodes.read();
        let mut current = Some(id);
        while let Some(node) = current {
            if nodes[node].kind == kind {
                return Some(node);
            }
            current = nodes[node].parent;
        }
        None
    }

    /// Descendants of the given kind in document order, excluding the
    /// root itself.
    pub fn descendants_of_kind(&self, root: NodeId, kind: ElementKind) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = nodes[root].children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if nodes[node].kind == kind {
                out.push(node);
            }
            stack.extend(nodes[node].children.iter().rev());
        }
        out
    }

    /// All descendants in document order, excluding the root itself.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = nodes[root].children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(nodes[node].children.iter().rev());
        }
        out
    }

    /// Subscribe to mutations. Every tree change after this call is
    /// delivered in order.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<Mutation> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.write().push(tx);
        rx
    }

    fn emit(&self, mutation: Mutation) {
        self.observers
            .write()
            .retain(|tx| tx.send(mutation.clone()).is_ok());
    }
}
