//! In-memory host: an arena-backed DOM plus manual visibility, ready and
//! recovery capabilities.
//!
//! Used natively and by the test suite. Elements live in an arena and are
//! addressed by generational [`NodeId`]s, so a released slot can be reused
//! without stale ids resolving to the new element.

mod clock;
mod markup;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::dom::{DiscardListener, Dom, DomEvent, Listener, ListenerId};
use crate::env::{ReadyGate, Recovery};
use crate::error::{Error, Result};
use crate::lazy::{Intersection, LazyOptions, Visibility, VisibilityCallback, VisibilityWatch};
use markup::Markup;

pub use clock::MemoryClock;

/// Generational index of an element in a [`MemoryDom`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

enum Child {
    Element(NodeId),
    Text(String),
}

struct RegisteredListener {
    event: String,
    id: ListenerId,
    listener: Listener<NodeId>,
}

struct ElementData {
    tag: String,
    attributes: Vec<(String, String)>,
    parent: Option<NodeId>,
    children: Vec<Child>,
    listeners: Vec<RegisteredListener>,
}

impl ElementData {
    fn new(tag: &str, attributes: Vec<(String, String)>) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, value)| value.as_str())
    }

    fn element_children(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(|child| match child {
            Child::Element(id) => Some(*id),
            Child::Text(_) => None,
        })
    }
}

struct Slot {
    generation: u32,
    element: Option<ElementData>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl Arena {
    fn alloc(&mut self, data: ElementData) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            if let Some(slot) = self.slots.get_mut(index as usize) {
                slot.generation += 1;
                slot.element = Some(data);
                return NodeId {
                    index,
                    generation: slot.generation,
                };
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            element: Some(data),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn get(&self, id: NodeId) -> Option<&ElementData> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.element.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.element.as_mut()
    }

    fn element(&self, id: NodeId) -> Result<&ElementData> {
        self.get(id).ok_or_else(|| stale(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData> {
        self.get_mut(id).ok_or_else(|| stale(id))
    }

    /// Free `id` and its subtree, handing back the freed elements.
    fn free(&mut self, id: NodeId, freed: &mut Vec<(NodeId, ElementData)>) {
        let children: Vec<NodeId> = match self.get(id) {
            Some(data) => data.element_children().collect(),
            None => return,
        };
        for child in children {
            self.free(child, freed);
        }
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if let Some(data) = slot.element.take() {
                freed.push((id, data));
            }
            self.free_list.push(id.index);
        }
    }

    /// Whether `node` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.get(candidate).and_then(|data| data.parent);
        }
        false
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.get(node).and_then(|data| data.parent) else {
            return;
        };
        if let Some(parent) = self.get_mut(parent) {
            parent
                .children
                .retain(|child| !matches!(child, Child::Element(id) if *id == node));
        }
        if let Some(data) = self.get_mut(node) {
            data.parent = None;
        }
    }

    fn position(&self, parent: NodeId, node: NodeId) -> Option<usize> {
        self.get(parent)?
            .children
            .iter()
            .position(|child| matches!(child, Child::Element(id) if *id == node))
    }

    /// Descendants of `root` in document order.
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = match self.get(root) {
            Some(data) => data.element_children().rev().collect(),
            None => return found,
        };
        while let Some(id) = stack.pop() {
            if let Some(data) = self.get(id) {
                found.push(id);
                stack.extend(data.element_children().rev());
            }
        }
        found
    }

    fn build(&mut self, parent: Option<NodeId>, nodes: Vec<Markup>) -> Vec<Child> {
        let mut children = Vec::new();
        for node in nodes {
            match node {
                Markup::Element {
                    tag,
                    attributes,
                    children: grandchildren,
                } => {
                    let id = self.alloc(ElementData::new(&tag, attributes));
                    let built = self.build(Some(id), grandchildren);
                    if let Some(data) = self.get_mut(id) {
                        data.parent = parent;
                        data.children = built;
                    }
                    children.push(Child::Element(id));
                }
                Markup::Text(text) => children.push(Child::Text(text)),
                Markup::Comment => {}
            }
        }
        children
    }

    fn serialize(&self, id: NodeId, output: &mut String) {
        let Some(data) = self.get(id) else {
            return;
        };
        output.push('<');
        output.push_str(&data.tag);
        for (name, value) in &data.attributes {
            output.push(' ');
            output.push_str(name);
            output.push_str("=\"");
            output.push_str(&markup::escape_attribute(value));
            output.push('"');
        }
        output.push('>');
        if markup::VOID_ELEMENTS.contains(&data.tag.as_str()) {
            return;
        }
        self.serialize_children(id, output);
        output.push_str("</");
        output.push_str(&data.tag);
        output.push('>');
    }

    fn serialize_children(&self, id: NodeId, output: &mut String) {
        let Some(data) = self.get(id) else {
            return;
        };
        for child in &data.children {
            match child {
                Child::Element(child) => self.serialize(*child, output),
                Child::Text(text) => output.push_str(&markup::escape_text(text)),
            }
        }
    }

    fn text_content(&self, id: NodeId, output: &mut String) {
        let Some(data) = self.get(id) else {
            return;
        };
        for child in &data.children {
            match child {
                Child::Element(child) => self.text_content(*child, output),
                Child::Text(text) => output.push_str(text),
            }
        }
    }
}

fn stale(id: NodeId) -> Error {
    Error::Host {
        message: format!("{id:?} is not a live element"),
    }
}

fn host_error(message: &str) -> Error {
    Error::Host {
        message: message.to_owned(),
    }
}

/// The selectors [`MemoryDom::query_selector`] understands: `#id`,
/// `.class`, `[name]`, `[name=value]` and `tag`.
enum Selector {
    Id(String),
    Class(String),
    Attribute { name: String, value: Option<String> },
    Tag(String),
}

impl Selector {
    fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        if let Some(id) = selector.strip_prefix('#') {
            return Self::Id(id.to_owned());
        }
        if let Some(class) = selector.strip_prefix('.') {
            return Self::Class(class.to_owned());
        }
        if let Some(inner) = selector.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            return match inner.split_once('=') {
                Some((name, value)) => Self::Attribute {
                    name: name.trim().to_ascii_lowercase(),
                    value: Some(value.trim().trim_matches(|quote| quote == '"' || quote == '\'').to_owned()),
                },
                None => Self::Attribute {
                    name: inner.trim().to_ascii_lowercase(),
                    value: None,
                },
            };
        }
        Self::Tag(selector.to_ascii_lowercase())
    }

    fn matches(&self, data: &ElementData) -> bool {
        match self {
            Self::Id(id) => data.attribute("id") == Some(id.as_str()),
            Self::Class(class) => data
                .attribute("class")
                .is_some_and(|classes| classes.split_whitespace().any(|known| known == class)),
            Self::Attribute { name, value } => match (data.attribute(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
            Self::Tag(tag) => data.tag == *tag,
        }
    }
}

/// Arena-backed DOM. All element ids handed out stay valid until
/// [`MemoryDom::release`] frees them.
pub struct MemoryDom {
    arena: RefCell<Arena>,
    document: NodeId,
    next_listener: Cell<u64>,
    discard_listeners: RefCell<Vec<(ListenerId, DiscardListener<NodeId>)>>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let mut arena = Arena::default();
        let document = arena.alloc(ElementData::new("#document", Vec::new()));
        Self {
            arena: RefCell::new(arena),
            document,
            next_listener: Cell::new(0),
            discard_listeners: RefCell::new(Vec::new()),
        }
    }

    /// A document whose content is `html`.
    pub fn from_html(html: &str) -> Result<Self> {
        let dom = Self::new();
        dom.set_inner_html(&dom.document, html)?;
        Ok(dom)
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    /// A new detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.arena
            .borrow_mut()
            .alloc(ElementData::new(tag, Vec::new()))
    }

    /// Parse `html` into a single detached element.
    pub fn parse_element(&self, html: &str) -> Result<NodeId> {
        let mut roots = markup::parse(html)?.into_iter().filter(|node| match node {
            Markup::Text(text) => !text.trim().is_empty(),
            Markup::Comment => false,
            Markup::Element { .. } => true,
        });
        let (Some(root @ Markup::Element { .. }), None) = (roots.next(), roots.next()) else {
            return Err(host_error("expected markup with exactly one root element"));
        };
        match self.arena.borrow_mut().build(None, vec![root]).pop() {
            Some(Child::Element(id)) => Ok(id),
            _ => Err(host_error("expected markup with exactly one root element")),
        }
    }

    pub fn set_attribute(&self, node: &NodeId, name: &str, value: &str) -> Result<()> {
        let mut arena = self.arena.borrow_mut();
        let data = arena.element_mut(*node)?;
        let name = name.to_ascii_lowercase();
        match data.attributes.iter_mut().find(|(known, _)| *known == name) {
            Some((_, known)) => *known = value.to_owned(),
            None => data.attributes.push((name, value.to_owned())),
        }
        Ok(())
    }

    pub fn remove_attribute(&self, node: &NodeId, name: &str) -> Result<()> {
        let mut arena = self.arena.borrow_mut();
        arena
            .element_mut(*node)?
            .attributes
            .retain(|(known, _)| known != name);
        Ok(())
    }

    pub fn tag(&self, node: &NodeId) -> Option<String> {
        self.arena.borrow().get(*node).map(|data| data.tag.clone())
    }

    pub fn text_content(&self, node: &NodeId) -> String {
        let mut text = String::new();
        self.arena.borrow().text_content(*node, &mut text);
        text
    }

    pub fn inner_html(&self, node: &NodeId) -> String {
        let mut html = String::new();
        self.arena.borrow().serialize_children(*node, &mut html);
        html
    }

    pub fn outer_html(&self, node: &NodeId) -> String {
        let mut html = String::new();
        self.arena.borrow().serialize(*node, &mut html);
        html
    }

    pub fn is_alive(&self, node: &NodeId) -> bool {
        self.arena.borrow().get(*node).is_some()
    }

    /// Whether `node` is attached to the document.
    pub fn is_connected(&self, node: &NodeId) -> bool {
        self.arena.borrow().contains(self.document, *node)
    }

    /// Free a detached element and its subtree, then report the freed ids
    /// to the discard listeners. Attached elements and the document are
    /// left alone.
    pub fn release(&self, node: &NodeId) -> bool {
        let mut freed = Vec::new();
        {
            let mut arena = self.arena.borrow_mut();
            let detached = arena
                .get(*node)
                .is_some_and(|data| data.parent.is_none());
            if !detached || *node == self.document {
                return false;
            }
            arena.free(*node, &mut freed);
        }
        let (discarded, elements): (Vec<NodeId>, Vec<ElementData>) = freed.into_iter().unzip();
        // Listener closures go before anyone hears about the discard.
        drop(elements);

        let listeners: Vec<DiscardListener<NodeId>> = self
            .discard_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&discarded);
        }
        true
    }

    /// Number of listeners for `event` attached directly to `node`.
    pub fn listener_count(&self, node: &NodeId, event: &str) -> usize {
        self.arena.borrow().get(*node).map_or(0, |data| {
            data.listeners
                .iter()
                .filter(|listener| listener.event == event)
                .count()
        })
    }
}

impl Dom for MemoryDom {
    type Node = NodeId;

    fn query_selector(&self, selector: &str) -> Option<NodeId> {
        let selector = Selector::parse(selector);
        let arena = self.arena.borrow();
        arena
            .descendants(self.document)
            .into_iter()
            .find(|id| arena.get(*id).is_some_and(|data| selector.matches(data)))
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        self.arena.borrow().get(*node)?.attribute(name).map(str::to_owned)
    }

    fn query_with_attribute(&self, root: &NodeId, name: &str) -> Vec<NodeId> {
        let arena = self.arena.borrow();
        arena
            .descendants(*root)
            .into_iter()
            .filter(|id| arena.get(*id).is_some_and(|data| data.attribute(name).is_some()))
            .collect()
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.arena.borrow().get(*node)?.parent
    }

    fn children(&self, node: &NodeId) -> Vec<NodeId> {
        self.arena
            .borrow()
            .get(*node)
            .map(|data| data.element_children().collect())
            .unwrap_or_default()
    }

    fn contains(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        self.arena.borrow().contains(*ancestor, *node)
    }

    fn set_inner_html(&self, node: &NodeId, html: &str) -> Result<()> {
        let nodes = markup::parse(html)?;
        let mut arena = self.arena.borrow_mut();
        let previous = std::mem::take(&mut arena.element_mut(*node)?.children);
        for child in previous {
            if let Child::Element(id) = child {
                if let Some(data) = arena.get_mut(id) {
                    data.parent = None;
                }
            }
        }
        let children = arena.build(Some(*node), nodes);
        arena.element_mut(*node)?.children = children;
        Ok(())
    }

    fn insert_before(&self, parent: &NodeId, node: &NodeId, before: Option<&NodeId>) -> Result<()> {
        let mut arena = self.arena.borrow_mut();
        arena.element(*parent)?;
        arena.element(*node)?;
        if arena.contains(*node, *parent) {
            return Err(host_error("cannot insert an element into itself or its descendant"));
        }
        if let Some(before) = before {
            if before == node || arena.position(*parent, *before).is_none() {
                return Err(host_error("reference element is not a child of the parent"));
            }
        }

        arena.detach(*node);
        let index = match before {
            Some(before) => arena
                .position(*parent, *before)
                .ok_or_else(|| host_error("reference element is not a child of the parent"))?,
            None => arena.element(*parent)?.children.len(),
        };
        arena.element_mut(*parent)?.children.insert(index, Child::Element(*node));
        arena.element_mut(*node)?.parent = Some(*parent);
        Ok(())
    }

    fn remove_child(&self, parent: &NodeId, node: &NodeId) -> Result<()> {
        let mut arena = self.arena.borrow_mut();
        if arena.element(*node)?.parent != Some(*parent) {
            return Err(host_error("element is not a child of the parent"));
        }
        arena.detach(*node);
        Ok(())
    }

    fn replace_child(&self, parent: &NodeId, new: &NodeId, old: &NodeId) -> Result<()> {
        let mut arena = self.arena.borrow_mut();
        arena.element(*new)?;
        if arena.element(*old)?.parent != Some(*parent) {
            return Err(host_error("replaced element is not a child of the parent"));
        }
        if new == old {
            return Ok(());
        }
        if arena.contains(*new, *parent) {
            return Err(host_error("cannot insert an element into itself or its descendant"));
        }

        arena.detach(*new);
        let index = arena
            .position(*parent, *old)
            .ok_or_else(|| host_error("replaced element is not a child of the parent"))?;
        arena.element_mut(*parent)?.children[index] = Child::Element(*new);
        arena.element_mut(*old)?.parent = None;
        arena.element_mut(*new)?.parent = Some(*parent);
        Ok(())
    }

    fn add_listener(&self, node: &NodeId, event: &str, listener: Listener<NodeId>) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        if let Some(data) = self.arena.borrow_mut().get_mut(*node) {
            data.listeners.push(RegisteredListener {
                event: event.to_owned(),
                id,
                listener,
            });
        }
        id
    }

    fn remove_listener(&self, node: &NodeId, event: &str, id: ListenerId) {
        if let Some(data) = self.arena.borrow_mut().get_mut(*node) {
            data.listeners
                .retain(|listener| !(listener.id == id && listener.event == event));
        }
    }

    fn on_discard(&self, listener: DiscardListener<NodeId>) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.discard_listeners.borrow_mut().push((id, listener));
        id
    }

    fn off_discard(&self, id: ListenerId) {
        self.discard_listeners
            .borrow_mut()
            .retain(|(known, _)| *known != id);
    }

    fn dispatch(&self, node: &NodeId, event: DomEvent<NodeId>) {
        // The propagation path is fixed before any listener runs.
        let path: Vec<NodeId> = {
            let arena = self.arena.borrow();
            let mut path = vec![*node];
            if event.bubbles {
                let mut current = arena.get(*node).and_then(|data| data.parent);
                while let Some(parent) = current {
                    path.push(parent);
                    current = arena.get(parent).and_then(|data| data.parent);
                }
            }
            path
        };

        for current in path {
            let listeners: Vec<Listener<NodeId>> = self
                .arena
                .borrow()
                .get(current)
                .map(|data| {
                    data.listeners
                        .iter()
                        .filter(|listener| listener.event == event.name)
                        .map(|listener| Rc::clone(&listener.listener))
                        .collect()
                })
                .unwrap_or_default();
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

struct Observation {
    id: u64,
    node: NodeId,
    options: LazyOptions,
    callback: Rc<RefCell<VisibilityCallback>>,
}

#[derive(Default)]
struct VisibilityRegistry {
    next_id: u64,
    observations: Vec<Observation>,
}

/// Visibility capability driven by hand with [`MemoryVisibility::intersect`].
#[derive(Clone, Default)]
pub struct MemoryVisibility {
    registry: Rc<RefCell<VisibilityRegistry>>,
}

struct MemoryWatch {
    id: u64,
    registry: Weak<RefCell<VisibilityRegistry>>,
}

impl VisibilityWatch for MemoryWatch {
    fn disconnect(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .borrow_mut()
                .observations
                .retain(|observation| observation.id != self.id);
        }
    }
}

impl Visibility<NodeId> for MemoryVisibility {
    fn observe(
        &self,
        node: &NodeId,
        options: &LazyOptions,
        callback: VisibilityCallback,
    ) -> Box<dyn VisibilityWatch> {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observations.push(Observation {
            id,
            node: *node,
            options: options.clone(),
            callback: Rc::new(RefCell::new(callback)),
        });
        Box::new(MemoryWatch {
            id,
            registry: Rc::downgrade(&self.registry),
        })
    }
}

impl MemoryVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `entry` for `node` to every observation of it. Returns the
    /// number of callbacks invoked.
    pub fn intersect(&self, node: &NodeId, entry: Intersection) -> usize {
        let callbacks: Vec<_> = self
            .registry
            .borrow()
            .observations
            .iter()
            .filter(|observation| observation.node == *node)
            .map(|observation| Rc::clone(&observation.callback))
            .collect();
        for callback in &callbacks {
            (callback.borrow_mut())(&[entry]);
        }
        callbacks.len()
    }

    pub fn is_observed(&self, node: &NodeId) -> bool {
        self.registry
            .borrow()
            .observations
            .iter()
            .any(|observation| observation.node == *node)
    }

    /// Options the observation of `node` was registered with.
    pub fn options(&self, node: &NodeId) -> Option<LazyOptions> {
        self.registry
            .borrow()
            .observations
            .iter()
            .find(|observation| observation.node == *node)
            .map(|observation| observation.options.clone())
    }
}

#[derive(Default)]
struct ReadyState {
    ready: bool,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

/// Document-ready signal fired by hand.
#[derive(Clone, Default)]
pub struct MemoryReadyGate {
    state: Rc<RefCell<ReadyState>>,
}

impl MemoryReadyGate {
    /// A gate whose document is still loading.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.ready = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl ReadyGate for MemoryReadyGate {
    fn is_ready(&self) -> bool {
        self.state.borrow().ready
    }

    fn when_ready(&self, callback: Box<dyn FnOnce()>) {
        if self.is_ready() {
            callback();
        } else {
            self.state.borrow_mut().callbacks.push(callback);
        }
    }
}

/// Recovery policy recording every reload request.
#[derive(Clone, Default)]
pub struct MemoryRecovery {
    reloads: Rc<RefCell<Vec<Error>>>,
}

impl MemoryRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reloads(&self) -> Vec<Error> {
        self.reloads.borrow().clone()
    }
}

impl Recovery for MemoryRecovery {
    fn reload(&self, error: &Error) {
        log::warn!(target: "nospa::app", "Reload requested after: {error}");
        self.reloads.borrow_mut().push(error.clone());
    }
}
