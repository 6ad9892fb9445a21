//! Component runtime: lifecycle, the local event bus, refs and ref-scoped
//! event delegation.
//!
//! A component is bound to exactly one element. Its refs are descendants
//! declaring `data-component-ref="<ComponentName>:<refName>"` (or a list of
//! such entries, optionally as `{"name": ..., "props": ...}` objects); each
//! component only sees the entries naming itself.

use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::app::{App, WeakApp};
use crate::definition::Behavior;
use crate::dom::{Dom, DomEvent, ListenerId};
use crate::error::{Error, Result};
use crate::utils::{is_truthy, parse_attr_value};

pub type EventHandler = Rc<dyn Fn(&Value)>;
pub type RefHandler<N> = Rc<dyn Fn(&DomEvent<N>, &ElementRef<N>)>;

/// A ref resolved for one component.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementRef<N> {
    pub element: N,
    pub name: String,
    pub props: Value,
}

/// Handle returned by the `on*` registrations.
///
/// Dropping it keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Clone)]
struct Subscriber {
    handler: EventHandler,
    once: bool,
}

impl Subscriber {
    fn matches(&self, handler: &EventHandler, once: bool) -> bool {
        self.once == once && same_handler(&self.handler, handler)
    }
}

struct DelegatedListener<N> {
    listener: ListenerId,
    refs: HashMap<String, Vec<RefHandler<N>>>,
}

fn same_handler<T: ?Sized>(left: &Rc<T>, right: &Rc<T>) -> bool {
    Rc::as_ptr(left).cast::<()>() == Rc::as_ptr(right).cast::<()>()
}

struct ComponentInner<D: Dom> {
    name: String,
    element: D::Node,
    props: Value,
    app: WeakApp<D>,
    dom: Rc<D>,
    ref_attribute: String,
    behavior: Box<dyn Behavior<D>>,
    initialized: Cell<bool>,
    destroyed: Cell<bool>,
    handlers: RefCell<HashMap<String, Vec<Subscriber>>>,
    ref_handlers: RefCell<HashMap<String, DelegatedListener<D::Node>>>,
}

/// A component instance bound to one element.
pub struct Component<D: Dom>(Rc<ComponentInner<D>>);

impl<D: Dom> Clone for Component<D> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<D: Dom> PartialEq for Component<D> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<D: Dom> fmt::Debug for Component<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.0.name)
            .field("element", &self.0.element)
            .field("initialized", &self.0.initialized.get())
            .field("destroyed", &self.0.destroyed.get())
            .finish()
    }
}

impl<D: Dom> Component<D> {
    pub(crate) fn new(
        app: &App<D>,
        name: &str,
        element: D::Node,
        props: Value,
        behavior: Box<dyn Behavior<D>>,
    ) -> Self {
        Self(Rc::new(ComponentInner {
            name: name.to_owned(),
            element,
            props,
            app: app.downgrade(),
            dom: Rc::clone(app.dom()),
            ref_attribute: app.attributes().reference.clone(),
            behavior,
            initialized: Cell::new(false),
            destroyed: Cell::new(false),
            handlers: RefCell::new(HashMap::new()),
            ref_handlers: RefCell::new(HashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn element(&self) -> &D::Node {
        &self.0.element
    }

    pub fn props(&self) -> &Value {
        &self.0.props
    }

    /// The owning app, `None` once it has been dropped.
    pub fn app(&self) -> Option<App<D>> {
        self.0.app.upgrade()
    }

    pub fn is_initialized(&self) -> bool {
        self.0.initialized.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// Run the init hook, mark the component initialized and emit `init`.
    ///
    /// The app calls this exactly once per bound instance; calling it again
    /// re-runs the hook and re-emits the event.
    pub fn init(&self) {
        self.0.behavior.on_init(self);
        self.0.initialized.set(true);
        log::debug!(target: "nospa::component", "{} initialized on {:?}", self.0.name, self.0.element);
        self.emit("init", json!({ "component": self.0.name }));
    }

    /// Run the destroy hook, mark the component destroyed, emit `destroy` and
    /// detach all delegated ref listeners.
    pub fn destroy(&self) {
        self.0.behavior.on_destroy(self);
        self.0.destroyed.set(true);
        log::debug!(target: "nospa::component", "{} destroyed on {:?}", self.0.name, self.0.element);
        self.emit("destroy", json!({ "component": self.0.name }));

        let delegated = std::mem::take(&mut *self.0.ref_handlers.borrow_mut());
        for (event, delegated) in delegated {
            self.0.dom.remove_listener(&self.0.element, &event, delegated.listener);
        }
    }

    /// Call a method of the component's behavior.
    pub fn call(&self, method: &str, args: Value) -> Option<Value> {
        self.0.behavior.call(self, method, args)
    }

    /// Listen to `event` on the local bus. Registering the same handler
    /// twice is a no-op; a pending [`Component::once`] registration of it
    /// does not count.
    pub fn on(&self, event: &str, handler: EventHandler) -> Subscription {
        {
            let mut handlers = self.0.handlers.borrow_mut();
            let subscribers = handlers.entry(event.to_owned()).or_default();
            if !subscribers
                .iter()
                .any(|subscriber| subscriber.matches(&handler, false))
            {
                subscribers.push(Subscriber {
                    handler: Rc::clone(&handler),
                    once: false,
                });
            }
        }
        self.unsubscribe_later(event, handler, false)
    }

    /// Listen to the next `event` only. The registration is separate from
    /// any [`Component::on`] of the same handler: only the returned
    /// subscription cancels it.
    pub fn once(&self, event: &str, handler: EventHandler) -> Subscription {
        self.0
            .handlers
            .borrow_mut()
            .entry(event.to_owned())
            .or_default()
            .push(Subscriber {
                handler: Rc::clone(&handler),
                once: true,
            });
        self.unsubscribe_later(event, handler, true)
    }

    /// Remove the [`Component::on`] registration of `handler`.
    pub fn off(&self, event: &str, handler: &EventHandler) {
        Self::remove_handler(&self.0, event, handler, false);
    }

    /// Call the local handlers of `event` in registration order, then
    /// dispatch a bubbling DOM event carrying `detail` on the element.
    pub fn emit(&self, event: &str, detail: Value) {
        let subscribers = {
            let mut handlers = self.0.handlers.borrow_mut();
            match handlers.get_mut(event) {
                Some(subscribers) => {
                    let snapshot = subscribers.clone();
                    subscribers.retain(|subscriber| !subscriber.once);
                    if subscribers.is_empty() {
                        handlers.remove(event);
                    }
                    snapshot
                }
                None => Vec::new(),
            }
        };
        for subscriber in subscribers {
            (subscriber.handler)(&detail);
        }
        self.0.dom.dispatch(
            &self.0.element,
            DomEvent::custom(event, self.0.element.clone(), detail),
        );
    }

    /// The ref `node` declares for this component, if any.
    pub fn ref_from_element(&self, node: &D::Node) -> Option<ElementRef<D::Node>> {
        if !self.0.dom.contains(&self.0.element, node) {
            return None;
        }
        let binding = parse_attr_value(self.0.dom.as_ref(), node, &self.0.ref_attribute)?;
        if !is_truthy(&binding) {
            return None;
        }
        let entries = match binding {
            Value::Array(entries) => entries,
            entry => vec![entry],
        };
        entries.iter().find_map(|entry| self.own_ref(node, entry))
    }

    fn own_ref(&self, node: &D::Node, entry: &Value) -> Option<ElementRef<D::Node>> {
        let (binding, props) = match entry {
            Value::String(binding) => (binding.as_str(), None),
            Value::Object(entry) => (entry.get("name")?.as_str()?, entry.get("props")),
            _ => return None,
        };
        let mut parts = binding.split(':');
        let owner = parts.next()?;
        let name = parts.next().filter(|name| !name.is_empty())?;
        if owner != self.0.name {
            return None;
        }
        Some(ElementRef {
            element: node.clone(),
            name: name.to_owned(),
            props: props
                .filter(|props| is_truthy(props))
                .cloned()
                .unwrap_or_else(|| json!({})),
        })
    }

    /// Descendant refs of this component named `name`, in document order.
    pub fn refs(&self, name: &str) -> Vec<ElementRef<D::Node>> {
        self.0
            .dom
            .query_with_attribute(&self.0.element, &self.0.ref_attribute)
            .iter()
            .filter_map(|node| self.ref_from_element(node))
            .filter(|reference| reference.name == name)
            .collect()
    }

    pub fn first_ref(&self, name: &str) -> Option<ElementRef<D::Node>> {
        self.0
            .dom
            .query_with_attribute(&self.0.element, &self.0.ref_attribute)
            .iter()
            .filter_map(|node| self.ref_from_element(node))
            .find(|reference| reference.name == name)
    }

    /// Handle `event` on any ref named `ref_name`.
    ///
    /// One native listener per event name is attached to the component's
    /// element and shared by all ref names.
    pub fn on_ref(&self, ref_name: &str, event: &str, handler: RefHandler<D::Node>) -> Subscription {
        {
            let mut delegated = self.0.ref_handlers.borrow_mut();
            let entry = delegated.entry(event.to_owned()).or_insert_with(|| {
                let component = Rc::downgrade(&self.0);
                let event_name = event.to_owned();
                let listener = self.0.dom.add_listener(
                    &self.0.element,
                    event,
                    Rc::new(move |dom_event: &DomEvent<D::Node>| {
                        if let Some(component) = component.upgrade() {
                            Component(component).delegate(&event_name, dom_event);
                        }
                    }),
                );
                log::trace!(target: "nospa::component", "Delegating {event:?} on {:?}", self.0.element);
                DelegatedListener {
                    listener,
                    refs: HashMap::new(),
                }
            });
            entry
                .refs
                .entry(ref_name.to_owned())
                .or_default()
                .push(Rc::clone(&handler));
        }

        let component = Rc::downgrade(&self.0);
        let (ref_name, event) = (ref_name.to_owned(), event.to_owned());
        Subscription::new(move || {
            if let Some(component) = component.upgrade() {
                Component(component).off_ref(&ref_name, &event, &handler);
            }
        })
    }

    /// Remove one ref handler. The native listener is detached once no
    /// handler is left for `event`.
    pub fn off_ref(&self, ref_name: &str, event: &str, handler: &RefHandler<D::Node>) {
        let detached = {
            let mut delegated = self.0.ref_handlers.borrow_mut();
            let Some(entry) = delegated.get_mut(event) else {
                return;
            };
            let Some(handlers) = entry.refs.get_mut(ref_name) else {
                return;
            };
            let Some(index) = handlers.iter().position(|known| same_handler(known, handler)) else {
                return;
            };
            handlers.remove(index);
            if handlers.is_empty() {
                entry.refs.remove(ref_name);
            }
            if entry.refs.is_empty() {
                delegated.remove(event).map(|entry| entry.listener)
            } else {
                None
            }
        };
        if let Some(listener) = detached {
            log::trace!(target: "nospa::component", "Detaching {event:?} from {:?}", self.0.element);
            self.0.dom.remove_listener(&self.0.element, event, listener);
        }
    }

    /// Walk from the event target up to (not including) the component's
    /// element and run the handlers of every ref met on the way.
    fn delegate(&self, event: &str, dom_event: &DomEvent<D::Node>) {
        let mut current = Some(dom_event.target.clone());
        while let Some(node) = current {
            if node == self.0.element {
                break;
            }
            if let Some(reference) = self.ref_from_element(&node) {
                let handlers = self
                    .0
                    .ref_handlers
                    .borrow()
                    .get(event)
                    .and_then(|delegated| delegated.refs.get(&reference.name))
                    .cloned()
                    .unwrap_or_default();
                for handler in handlers {
                    handler(dom_event, &reference);
                }
            }
            current = self.0.dom.parent(&node);
        }
    }

    fn unsubscribe_later(&self, event: &str, handler: EventHandler, once: bool) -> Subscription {
        let component = Rc::downgrade(&self.0);
        let event = event.to_owned();
        Subscription::new(move || {
            if let Some(component) = component.upgrade() {
                Self::remove_handler(&component, &event, &handler, once);
            }
        })
    }

    fn remove_handler(inner: &ComponentInner<D>, event: &str, handler: &EventHandler, once: bool) {
        let mut handlers = inner.handlers.borrow_mut();
        let Some(subscribers) = handlers.get_mut(event) else {
            return;
        };
        if let Some(index) = subscribers
            .iter()
            .position(|subscriber| subscriber.matches(handler, once))
        {
            subscribers.remove(index);
        }
        if subscribers.is_empty() {
            handlers.remove(event);
        }
    }

    fn detached(&self) -> Error {
        Error::Detached {
            component: self.0.name.clone(),
        }
    }

    fn owning_app(&self) -> Result<App<D>> {
        self.app().ok_or_else(|| self.detached())
    }

    pub fn insert_html(&self, container: &D::Node, html: &str) -> Result<()> {
        self.owning_app()?.insert_html(container, html)
    }

    pub fn append_or_insert_element(
        &self,
        node: &D::Node,
        parent: &D::Node,
        before: Option<&D::Node>,
    ) -> Result<D::Node> {
        self.owning_app()?.append_or_insert_element(node, parent, before)
    }

    pub fn remove_element(&self, node: &D::Node) -> Result<D::Node> {
        self.owning_app()?.remove_element(node)
    }

    pub fn replace_element(&self, old: &D::Node, new: &D::Node) -> Result<D::Node> {
        self.owning_app()?.replace_element(old, new)
    }

    pub fn component_from_element(&self, node: &D::Node) -> Option<Component<D>> {
        self.app()?.component_from_element(node)
    }
}

