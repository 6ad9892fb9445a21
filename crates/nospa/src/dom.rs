//! DOM contract required from the host.
//!
//! The engine never touches a concrete DOM. Everything it needs (attribute
//! reads, attribute queries, tree mutation, event listening and dispatch) goes
//! through [`Dom`], implemented by [`crate::platform::memory::MemoryDom`] and,
//! with the `web` feature, by `platform::browser::BrowserDom`.

use serde_json::Value;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use crate::error::Result;

/// Handle returned by [`Dom::add_listener`], used to detach the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// An event travelling through the host DOM.
#[derive(Clone, Debug, PartialEq)]
pub struct DomEvent<N> {
    pub name: String,
    /// Element the event was originally dispatched on.
    pub target: N,
    pub detail: Option<Value>,
    pub bubbles: bool,
}

impl<N> DomEvent<N> {
    /// A bubbling event without detail, like a native `click`.
    pub fn new(name: impl Into<String>, target: N) -> Self {
        Self {
            name: name.into(),
            target,
            detail: None,
            bubbles: true,
        }
    }

    /// A bubbling, detail-carrying custom event.
    pub fn custom(name: impl Into<String>, target: N, detail: Value) -> Self {
        Self {
            name: name.into(),
            target,
            detail: Some(detail),
            bubbles: true,
        }
    }
}

pub type Listener<N> = Rc<dyn Fn(&DomEvent<N>)>;

/// Called with the nodes a host has discarded, descendants included.
pub type DiscardListener<N> = Rc<dyn Fn(&[N])>;

/// DOM primitives the binding engine relies on.
///
/// Implementations use interior mutability and must not hold internal
/// borrows while calling listeners: listeners re-enter the engine, which
/// re-enters the DOM.
pub trait Dom: 'static {
    type Node: Clone + Eq + Hash + Debug + 'static;

    /// First element in the document matching `selector`.
    fn query_selector(&self, selector: &str) -> Option<Self::Node>;

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    fn has_attribute(&self, node: &Self::Node, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    /// Descendants of `root` (not `root` itself) carrying attribute `name`,
    /// in document order.
    fn query_with_attribute(&self, root: &Self::Node, name: &str) -> Vec<Self::Node>;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Element children of `node`, in order.
    fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

    /// Whether `node` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool {
        let mut current = Some(node.clone());
        while let Some(candidate) = current {
            if &candidate == ancestor {
                return true;
            }
            current = self.parent(&candidate);
        }
        false
    }

    fn set_inner_html(&self, node: &Self::Node, html: &str) -> Result<()>;

    /// Insert `node` into `parent` before `before`, or append it.
    fn insert_before(
        &self,
        parent: &Self::Node,
        node: &Self::Node,
        before: Option<&Self::Node>,
    ) -> Result<()>;

    fn remove_child(&self, parent: &Self::Node, node: &Self::Node) -> Result<()>;

    /// Put `new` in place of `old` under `parent`.
    fn replace_child(&self, parent: &Self::Node, new: &Self::Node, old: &Self::Node)
    -> Result<()>;

    fn add_listener(&self, node: &Self::Node, event: &str, listener: Listener<Self::Node>)
    -> ListenerId;

    fn remove_listener(&self, node: &Self::Node, event: &str, id: ListenerId);

    /// Dispatch `event` on `node`, bubbling to ancestors when
    /// [`DomEvent::bubbles`] is set.
    fn dispatch(&self, node: &Self::Node, event: DomEvent<Self::Node>);

    /// Subscribe to node discards.
    ///
    /// A node is discarded once the host will never hand it out again. Side
    /// tables keyed by node drop their entries here, so that elements thrown
    /// away without an explicit unbind do not keep engine state alive.
    fn on_discard(&self, listener: DiscardListener<Self::Node>) -> ListenerId;

    fn off_discard(&self, id: ListenerId);
}

/// Elements under `root` carrying attribute `name`, root first when it
/// carries the attribute itself, then descendants in document order.
pub fn matched_elements<D: Dom + ?Sized>(dom: &D, root: &D::Node, name: &str) -> Vec<D::Node> {
    let mut elements = Vec::new();
    if dom.has_attribute(root, name) {
        elements.push(root.clone());
    }
    elements.extend(dom.query_with_attribute(root, name));
    elements
}
