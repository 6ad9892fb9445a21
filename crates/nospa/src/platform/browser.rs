//! Browser host on `web-sys`: the real DOM, `IntersectionObserver`
//! visibility, `setTimeout` sleeps, the `DOMContentLoaded` ready gate and
//! `location.reload()` recovery.
//!
//! Elements get a numeric id the first time the engine sees them. Ids live in
//! a `WeakMap` keyed by the element, so discarded elements take their id
//! with them.
//!
//! Engine state bound to an element cannot be reclaimed by the JS collector,
//! so discards are detected instead: a `MutationObserver` on the document
//! reports elements that were removed and not reattached by the time the
//! mutation batch is delivered. Their native listeners are detached and the
//! discard listeners are told.

use futures_channel::oneshot;
use futures_util::future::{self, FutureExt, LocalBoxFuture};
use futures_util::task::{LocalFutureObj, LocalSpawn, SpawnError};
use js_sys::{Array, JSON, WeakMap};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::time::Duration;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
    CustomEvent, CustomEventInit, Document, DocumentReadyState, Element, Event,
    IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit, MutationObserver,
    MutationObserverInit, MutationRecord,
};

use crate::dom::{DiscardListener, Dom, DomEvent, Listener, ListenerId};
use crate::env::{Environment, ReadyGate, Recovery, Timer};
use crate::error::{Error, Result};
use crate::lazy::{Intersection, LazyOptions, Visibility, VisibilityCallback, VisibilityWatch};

fn host_error(error: JsValue) -> Error {
    Error::Host {
        message: error
            .as_string()
            .or_else(|| JSON::stringify(&error).ok().and_then(|text| text.as_string()))
            .unwrap_or_else(|| "unknown error".to_owned()),
    }
}

fn json_to_js(value: &Value) -> JsValue {
    JSON::parse(&value.to_string()).unwrap_or(JsValue::NULL)
}

fn js_to_json(value: &JsValue) -> Option<Value> {
    if value.is_undefined() {
        return None;
    }
    let text = JSON::stringify(value).ok()?.as_string()?;
    serde_json::from_str(&text).ok()
}

/// An element together with its engine id.
#[derive(Clone, Debug)]
pub struct BrowserNode {
    id: u32,
    element: Element,
}

impl BrowserNode {
    pub fn element(&self) -> &Element {
        &self.element
    }
}

impl PartialEq for BrowserNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BrowserNode {}

impl Hash for BrowserNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

struct NodeIds {
    ids: WeakMap,
    next_id: Cell<u32>,
}

impl NodeIds {
    fn node(&self, element: Element) -> BrowserNode {
        let known = self.ids.get(&element).as_f64();
        let id = match known {
            Some(id) => id as u32,
            None => {
                let id = self.next_id.get();
                self.next_id.set(id + 1);
                self.ids.set(&element, &JsValue::from(id));
                id
            }
        };
        BrowserNode { id, element }
    }
}

struct RegisteredListener {
    node: u32,
    target: Element,
    event: String,
    closure: Closure<dyn FnMut(Event)>,
}

impl RegisteredListener {
    fn detach(&self) {
        if let Err(error) = self
            .target
            .remove_event_listener_with_callback(&self.event, self.closure.as_ref().unchecked_ref())
        {
            log::error!(target: "nospa::app", "Failed to remove listener: {}", host_error(error));
        }
    }
}

type Listeners = Rc<RefCell<HashMap<ListenerId, RegisteredListener>>>;
type DiscardListeners = Rc<RefCell<Vec<(ListenerId, DiscardListener<BrowserNode>)>>>;

/// Document-wide observer reporting discarded elements.
struct DiscardObserver {
    observer: MutationObserver,
    _closure: Closure<dyn FnMut(Array, MutationObserver)>,
}

impl Drop for DiscardObserver {
    fn drop(&mut self) {
        self.observer.disconnect();
    }
}

/// Removed elements that are still detached, with their descendants.
fn discarded_elements(ids: &NodeIds, records: &Array) -> Vec<BrowserNode> {
    let mut discarded = Vec::new();
    for record in records.iter() {
        let Ok(record) = record.dyn_into::<MutationRecord>() else {
            continue;
        };
        let removed = record.removed_nodes();
        for index in 0..removed.length() {
            let Some(element) = removed
                .item(index)
                .and_then(|node| node.dyn_into::<Element>().ok())
            else {
                continue;
            };
            if element.is_connected() {
                continue;
            }
            let descendants = element.get_elements_by_tag_name("*");
            discarded.push(ids.node(element));
            discarded.extend(
                (0..descendants.length())
                    .filter_map(|index| descendants.item(index))
                    .map(|element| ids.node(element)),
            );
        }
    }
    discarded
}

fn observe_discards(
    document: &Document,
    ids: Rc<NodeIds>,
    listeners: Listeners,
    discard_listeners: DiscardListeners,
) -> Result<DiscardObserver> {
    let closure = Closure::wrap(Box::new(move |records: Array, _observer: MutationObserver| {
        let discarded = discarded_elements(&ids, &records);
        if discarded.is_empty() {
            return;
        }
        let detached: Vec<RegisteredListener> = {
            let mut listeners = listeners.borrow_mut();
            let gone: Vec<ListenerId> = listeners
                .iter()
                .filter(|(_, registered)| discarded.iter().any(|node| node.id == registered.node))
                .map(|(id, _)| *id)
                .collect();
            gone.iter().filter_map(|id| listeners.remove(id)).collect()
        };
        for registered in &detached {
            registered.detach();
        }
        drop(detached);

        let subscribers: Vec<DiscardListener<BrowserNode>> = discard_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for subscriber in subscribers {
            subscriber(&discarded);
        }
    }) as Box<dyn FnMut(Array, MutationObserver)>);

    let observer = MutationObserver::new(closure.as_ref().unchecked_ref()).map_err(host_error)?;
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    observer
        .observe_with_options(document, &init)
        .map_err(host_error)?;
    Ok(DiscardObserver {
        observer,
        _closure: closure,
    })
}

pub struct BrowserDom {
    document: Document,
    ids: Rc<NodeIds>,
    listeners: Listeners,
    discard_listeners: DiscardListeners,
    next_listener: Cell<u64>,
    _discards: Option<DiscardObserver>,
}

impl BrowserDom {
    pub fn new(document: Document) -> Self {
        let ids = Rc::new(NodeIds {
            ids: WeakMap::new(),
            next_id: Cell::new(0),
        });
        let listeners: Listeners = Rc::default();
        let discard_listeners: DiscardListeners = Rc::default();
        let discards = observe_discards(
            &document,
            Rc::clone(&ids),
            Rc::clone(&listeners),
            Rc::clone(&discard_listeners),
        )
        .inspect_err(|error| {
            log::error!(target: "nospa::app", "Discarded elements will not be reported: {error}");
        })
        .ok();
        Self {
            document,
            ids,
            listeners,
            discard_listeners,
            next_listener: Cell::new(0),
            _discards: discards,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The engine node of `element`.
    pub fn node(&self, element: Element) -> BrowserNode {
        self.ids.node(element)
    }
}

impl Dom for BrowserDom {
    type Node = BrowserNode;

    fn query_selector(&self, selector: &str) -> Option<BrowserNode> {
        let element = self.document.query_selector(selector).ok().flatten()?;
        Some(self.node(element))
    }

    fn attribute(&self, node: &BrowserNode, name: &str) -> Option<String> {
        node.element.get_attribute(name)
    }

    fn has_attribute(&self, node: &BrowserNode, name: &str) -> bool {
        node.element.has_attribute(name)
    }

    fn query_with_attribute(&self, root: &BrowserNode, name: &str) -> Vec<BrowserNode> {
        let Ok(found) = root.element.query_selector_all(&format!("[{name}]")) else {
            return Vec::new();
        };
        (0..found.length())
            .filter_map(|index| found.item(index))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .map(|element| self.node(element))
            .collect()
    }

    fn parent(&self, node: &BrowserNode) -> Option<BrowserNode> {
        Some(self.node(node.element.parent_element()?))
    }

    fn children(&self, node: &BrowserNode) -> Vec<BrowserNode> {
        let children = node.element.children();
        (0..children.length())
            .filter_map(|index| children.item(index))
            .map(|element| self.node(element))
            .collect()
    }

    fn contains(&self, ancestor: &BrowserNode, node: &BrowserNode) -> bool {
        ancestor.element.contains(Some(&*node.element))
    }

    fn set_inner_html(&self, node: &BrowserNode, html: &str) -> Result<()> {
        node.element.set_inner_html(html);
        Ok(())
    }

    fn insert_before(
        &self,
        parent: &BrowserNode,
        node: &BrowserNode,
        before: Option<&BrowserNode>,
    ) -> Result<()> {
        parent
            .element
            .insert_before(&node.element, before.map(|before| &*before.element))
            .map(drop)
            .map_err(host_error)
    }

    fn remove_child(&self, parent: &BrowserNode, node: &BrowserNode) -> Result<()> {
        parent
            .element
            .remove_child(&node.element)
            .map(drop)
            .map_err(host_error)
    }

    fn replace_child(&self, parent: &BrowserNode, new: &BrowserNode, old: &BrowserNode) -> Result<()> {
        parent
            .element
            .replace_child(&new.element, &old.element)
            .map(drop)
            .map_err(host_error)
    }

    fn add_listener(
        &self,
        node: &BrowserNode,
        event: &str,
        listener: Listener<BrowserNode>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);

        let ids = Rc::clone(&self.ids);
        let closure = Closure::wrap(Box::new(move |event: Event| {
            let Some(target) = event
                .target()
                .and_then(|target| target.dyn_into::<Element>().ok())
            else {
                return;
            };
            let detail = event
                .dyn_ref::<CustomEvent>()
                .and_then(|custom| js_to_json(&custom.detail()));
            listener(&DomEvent {
                name: event.type_(),
                target: ids.node(target),
                detail,
                bubbles: event.bubbles(),
            });
        }) as Box<dyn FnMut(Event)>);

        if let Err(error) = node
            .element
            .add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
        {
            log::error!(target: "nospa::app", "Failed to add {event:?} listener: {}", host_error(error));
        }
        self.listeners.borrow_mut().insert(
            id,
            RegisteredListener {
                node: node.id,
                target: node.element.clone(),
                event: event.to_owned(),
                closure,
            },
        );
        id
    }

    fn remove_listener(&self, _node: &BrowserNode, _event: &str, id: ListenerId) {
        let Some(registered) = self.listeners.borrow_mut().remove(&id) else {
            return;
        };
        registered.detach();
    }

    fn on_discard(&self, listener: DiscardListener<BrowserNode>) -> ListenerId {
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

    fn dispatch(&self, node: &BrowserNode, event: DomEvent<BrowserNode>) {
        let init = CustomEventInit::new();
        init.set_bubbles(event.bubbles);
        if let Some(detail) = &event.detail {
            init.set_detail(&json_to_js(detail));
        }
        let dispatched = CustomEvent::new_with_event_init_dict(&event.name, &init)
            .and_then(|custom| node.element.dispatch_event(&custom));
        if let Err(error) = dispatched {
            log::error!(target: "nospa::app", "Failed to dispatch {:?}: {}", event.name, host_error(error));
        }
    }
}

/// `IntersectionObserver`-backed visibility capability.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserVisibility;

struct BrowserWatch {
    observer: Option<IntersectionObserver>,
    _closure: Closure<dyn FnMut(Array, IntersectionObserver)>,
}

impl VisibilityWatch for BrowserWatch {
    fn disconnect(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.disconnect();
        }
    }
}

impl Visibility<BrowserNode> for BrowserVisibility {
    fn observe(
        &self,
        node: &BrowserNode,
        options: &LazyOptions,
        mut callback: VisibilityCallback,
    ) -> Box<dyn VisibilityWatch> {
        let closure = Closure::wrap(Box::new(move |entries: Array, _observer: IntersectionObserver| {
            let entries: Vec<Intersection> = entries
                .iter()
                .filter_map(|entry| entry.dyn_into::<IntersectionObserverEntry>().ok())
                .map(|entry| Intersection {
                    is_intersecting: entry.is_intersecting(),
                    ratio: entry.intersection_ratio(),
                })
                .collect();
            callback(&entries);
        }) as Box<dyn FnMut(Array, IntersectionObserver)>);

        let init = IntersectionObserverInit::new();
        init.set_root_margin(&options.root_margin);
        init.set_threshold(&JsValue::from_f64(options.threshold));

        let observer = match IntersectionObserver::new_with_options(closure.as_ref().unchecked_ref(), &init) {
            Ok(observer) => {
                observer.observe(&node.element);
                Some(observer)
            }
            Err(error) => {
                log::error!(target: "nospa::lazy", "Cannot observe {node:?}: {}", host_error(error));
                None
            }
        };
        Box::new(BrowserWatch {
            observer,
            _closure: closure,
        })
    }
}

/// `setTimeout`-backed timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserTimer;

impl Timer for BrowserTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let ms = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        if ms == 0 {
            return future::ready(()).boxed_local();
        }
        let Some(window) = web_sys::window() else {
            return future::ready(()).boxed_local();
        };
        let (wake, woken) = oneshot::channel::<()>();
        let closure: Closure<dyn FnMut()> = Closure::once(move || {
            let _ = wake.send(());
        });
        let scheduled = window.set_timeout_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            ms,
        );
        if let Err(error) = scheduled {
            log::error!(target: "nospa::lazy", "setTimeout failed: {}", host_error(error));
            return future::ready(()).boxed_local();
        }
        async move {
            let _closure = closure;
            let _ = woken.await;
        }
        .boxed_local()
    }
}

/// Ready once the document has been parsed.
#[derive(Clone, Debug)]
pub struct BrowserReadyGate {
    document: Document,
}

impl BrowserReadyGate {
    pub fn new(document: Document) -> Self {
        Self { document }
    }
}

impl ReadyGate for BrowserReadyGate {
    fn is_ready(&self) -> bool {
        self.document.ready_state() != DocumentReadyState::Loading
    }

    fn when_ready(&self, callback: Box<dyn FnOnce()>) {
        if self.is_ready() {
            callback();
            return;
        }
        let listener = Closure::once_into_js(move || callback());
        if let Err(error) = self
            .document
            .add_event_listener_with_callback("DOMContentLoaded", listener.unchecked_ref())
        {
            log::error!(target: "nospa::app", "Cannot wait for DOMContentLoaded: {}", host_error(error));
        }
    }
}

/// Reloads the page, fetching a fresh bundle.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserRecovery;

impl Recovery for BrowserRecovery {
    fn reload(&self, error: &Error) {
        log::warn!(target: "nospa::app", "Reloading after: {error}");
        let reloaded = web_sys::window()
            .ok_or(JsValue::NULL)
            .and_then(|window| window.location().reload());
        if let Err(error) = reloaded {
            log::error!(target: "nospa::app", "Reload failed: {}", host_error(error));
        }
    }
}

/// Runs tasks on the browser's microtask queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserSpawner;

impl LocalSpawn for BrowserSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

/// The environment of the current page.
pub fn environment() -> Result<Environment<BrowserDom>> {
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| Error::Host {
            message: "no window document".to_owned(),
        })?;
    Ok(
        Environment::new(Rc::new(BrowserDom::new(document.clone())), BrowserSpawner)
            .with_timer(BrowserTimer)
            .with_visibility(BrowserVisibility)
            .with_ready_gate(BrowserReadyGate::new(document))
            .with_recovery(BrowserRecovery),
    )
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use crate::{App, AppOptions, Blueprint};
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn mount_point(html: &str) -> Element {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .expect("test runs in a browser");
        let root = document.create_element("div").expect("div is creatable");
        root.set_inner_html(html);
        document
            .body()
            .expect("document has a body")
            .append_child(&root)
            .expect("root is attachable");
        root
    }

    #[wasm_bindgen_test]
    fn node_ids_are_stable_per_element() {
        let root = mount_point("<p></p>");
        let dom = BrowserDom::new(web_sys::window().and_then(|w| w.document()).expect("document"));
        let first = dom.node(root.clone());
        let second = dom.node(root);
        assert_eq!(first, second);
        assert_eq!(dom.children(&first).len(), 1);
    }

    #[wasm_bindgen_test]
    async fn binds_components_on_the_real_dom() {
        let mount = mount_point("");
        let section = mount
            .owner_document()
            .expect("element has a document")
            .create_element("section")
            .expect("section is creatable");
        section.set_attribute("data-component", "Hello").expect("attribute is settable");

        let env = environment().expect("browser environment");
        let root = env.dom().node(mount);
        let app = App::new(
            AppOptions::<BrowserDom>::element(root)
                .component("Hello", Blueprint::<BrowserDom>::new().on_init(|component| {
                    component.element().element().set_attribute("data-ready", "yes").ok();
                })),
            env,
        );
        app.init().expect("root is given");

        let node = app.dom().node(section.clone());
        let component = app.init_component(&node).await.expect("instantiates");
        assert!(component.is_some());
        assert_eq!(section.get_attribute("data-ready").as_deref(), Some("yes"));
    }

    #[wasm_bindgen_test]
    async fn removed_elements_lose_their_links() {
        let mount = mount_point(r#"<section data-component="Hello"><p></p></section>"#);
        let section = mount.first_element_child().expect("fixture has a section");

        let env = environment().expect("browser environment");
        let root = env.dom().node(mount);
        let app = App::new(
            AppOptions::<BrowserDom>::element(root)
                .component("Hello", Blueprint::<BrowserDom>::new()),
            env,
        );
        app.init().expect("root is given");
        let node = app.dom().node(section.clone());
        assert!(app.is_linked(&node));

        section.remove();
        BrowserTimer.sleep(Duration::from_millis(1)).await;
        assert!(!app.is_linked(&node));
    }
}
