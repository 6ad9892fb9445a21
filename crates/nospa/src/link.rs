//! Element link table: which component and directives are bound to which
//! element.
//!
//! The table is a side store keyed by node identity; elements themselves are
//! never marked. A record is removed as soon as it holds neither a component
//! nor a directive, so unbound elements leave nothing behind.

use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;

use crate::component::Component;
use crate::dom::Dom;
use crate::lazy::LazyWatch;

/// Generation token of a component link.
///
/// A pending instantiation completes only while the element still carries
/// the link it was started for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

pub struct ComponentLink<D: Dom> {
    pub id: LinkId,
    pub name: String,
    /// `None` while the component class is resolving or the element waits
    /// for visibility.
    pub instance: Option<Component<D>>,
    pub lazy: Option<LazyWatch>,
}

impl<D: Dom> Clone for ComponentLink<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            instance: self.instance.clone(),
            lazy: self.lazy.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectiveLink {
    pub name: String,
    pub props: Value,
}

struct ElementLink<D: Dom> {
    component: Option<ComponentLink<D>>,
    directives: SmallVec<[DirectiveLink; 2]>,
}

impl<D: Dom> ElementLink<D> {
    fn is_empty(&self) -> bool {
        self.component.is_none() && self.directives.is_empty()
    }
}

impl<D: Dom> Default for ElementLink<D> {
    fn default() -> Self {
        Self {
            component: None,
            directives: SmallVec::new(),
        }
    }
}

pub struct LinkTable<D: Dom> {
    links: HashMap<D::Node, ElementLink<D>>,
    next_id: u64,
}

impl<D: Dom> Default for LinkTable<D> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<D: Dom> LinkTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(&self, node: &D::Node) -> Option<&ComponentLink<D>> {
        self.links.get(node)?.component.as_ref()
    }

    /// Whether `node` carries the component link `id`.
    pub fn is_current(&self, node: &D::Node, id: LinkId) -> bool {
        self.component(node).is_some_and(|link| link.id == id)
    }

    /// Link a not yet instantiated component to `node`.
    pub fn link_placeholder(&mut self, node: &D::Node, name: &str) -> LinkId {
        let id = LinkId(self.next_id);
        self.next_id += 1;
        self.links.entry(node.clone()).or_default().component = Some(ComponentLink {
            id,
            name: name.to_owned(),
            instance: None,
            lazy: None,
        });
        id
    }

    pub fn attach_lazy(&mut self, node: &D::Node, id: LinkId, lazy: LazyWatch) -> bool {
        match self.component_mut(node, id) {
            Some(link) => {
                link.lazy = Some(lazy);
                true
            }
            None => false,
        }
    }

    /// Record the finished instance. Fails when the link was replaced or
    /// removed in the meantime.
    pub fn complete(&mut self, node: &D::Node, id: LinkId, instance: Component<D>) -> bool {
        match self.component_mut(node, id) {
            Some(link) => {
                link.instance = Some(instance);
                true
            }
            None => false,
        }
    }

    /// Remove the component link `id` from `node`.
    pub fn unlink_component(&mut self, node: &D::Node, id: LinkId) -> Option<ComponentLink<D>> {
        let record = self.links.get_mut(node)?;
        if record.component.as_ref().is_none_or(|link| link.id != id) {
            return None;
        }
        let link = record.component.take();
        self.prune(node);
        link
    }

    pub fn directives(&self, node: &D::Node) -> &[DirectiveLink] {
        self.links
            .get(node)
            .map(|record| record.directives.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_directive(&self, node: &D::Node, name: &str) -> bool {
        self.directives(node).iter().any(|link| link.name == name)
    }

    pub fn link_directive(&mut self, node: &D::Node, link: DirectiveLink) {
        self.links.entry(node.clone()).or_default().directives.push(link);
    }

    pub fn unlink_directives(&mut self, node: &D::Node) -> SmallVec<[DirectiveLink; 2]> {
        let Some(record) = self.links.get_mut(node) else {
            return SmallVec::new();
        };
        let directives = std::mem::take(&mut record.directives);
        self.prune(node);
        directives
    }

    /// Drop every record of `nodes`, returning their component links.
    pub fn forget(&mut self, nodes: &[D::Node]) -> Vec<ComponentLink<D>> {
        nodes
            .iter()
            .filter_map(|node| self.links.remove(node)?.component)
            .collect()
    }

    /// Number of elements carrying any link.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn component_mut(&mut self, node: &D::Node, id: LinkId) -> Option<&mut ComponentLink<D>> {
        self.links
            .get_mut(node)?
            .component
            .as_mut()
            .filter(|link| link.id == id)
    }

    fn prune(&mut self, node: &D::Node) {
        if self.links.get(node).is_some_and(ElementLink::is_empty) {
            self.links.remove(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryDom;
    use serde_json::json;

    fn nodes() -> (MemoryDom, <MemoryDom as Dom>::Node, <MemoryDom as Dom>::Node) {
        let dom = MemoryDom::new();
        let first = dom.create_element("div");
        let second = dom.create_element("div");
        (dom, first, second)
    }

    #[test]
    fn placeholder_then_unlink_removes_record() {
        let (_dom, first, second) = nodes();
        let mut table = LinkTable::<MemoryDom>::new();

        let id = table.link_placeholder(&first, "Modal");
        assert!(table.is_current(&first, id));
        assert!(table.component(&second).is_none());
        assert_eq!(table.component(&first).map(|link| link.name.as_str()), Some("Modal"));

        assert!(table.unlink_component(&first, id).is_some());
        assert!(table.component(&first).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn stale_generation_is_rejected() {
        let (_dom, first, _) = nodes();
        let mut table = LinkTable::<MemoryDom>::new();

        let old = table.link_placeholder(&first, "Modal");
        table.unlink_component(&first, old);
        let new = table.link_placeholder(&first, "Modal");

        assert_ne!(old, new);
        assert!(!table.is_current(&first, old));
        assert!(table.unlink_component(&first, old).is_none());
        assert!(table.is_current(&first, new));
    }

    #[test]
    fn directives_keep_record_alive_until_cleared() {
        let (_dom, first, _) = nodes();
        let mut table = LinkTable::<MemoryDom>::new();

        let id = table.link_placeholder(&first, "Modal");
        table.link_directive(&first, DirectiveLink { name: "tooltip".into(), props: json!({}) });
        table.link_directive(&first, DirectiveLink { name: "focus".into(), props: json!({"x": 1}) });

        table.unlink_component(&first, id);
        assert_eq!(table.len(), 1);
        assert!(table.has_directive(&first, "tooltip"));
        assert!(!table.has_directive(&first, "missing"));

        let removed = table.unlink_directives(&first);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[1].props, json!({"x": 1}));
        assert!(table.is_empty());
    }

    #[test]
    fn forgotten_nodes_lose_every_link() {
        let (_dom, first, second) = nodes();
        let mut table = LinkTable::<MemoryDom>::new();

        table.link_placeholder(&first, "Modal");
        table.link_directive(&first, DirectiveLink { name: "tooltip".into(), props: json!({}) });
        table.link_directive(&second, DirectiveLink { name: "focus".into(), props: json!({}) });

        let dropped = table.forget(&[first, second]);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].name, "Modal");
        assert!(table.component(&first).is_none());
        assert!(table.directives(&second).is_empty());
        assert!(table.is_empty());
    }
}
