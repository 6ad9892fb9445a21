//! App controller: scans a subtree for component and directive attributes,
//! binds what it finds and keeps bindings consistent across mutations.
//!
//! Discovery always binds directives before components, so a component's
//! init hook can rely on the directives of its own element. Teardown runs in
//! the opposite order: components are unbound before directives.

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use serde_json::{Value, json};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::component::Component;
use crate::config::{AppOptions, AttributeNames, MethodFn, Root};
use crate::definition::ComponentConfig;
use crate::directive::Directive;
use crate::dom::{Dom, ListenerId, matched_elements};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::hydrate::hydrate;
use crate::lazy::{LazyOptions, LazyWatch};
use crate::link::{DirectiveLink, LinkId, LinkTable};
use crate::utils::{is_truthy, parse_attr_value};

type ReadyCallback<D> = Box<dyn FnOnce(&App<D>)>;

struct AppInner<D: Dom> {
    env: Environment<D>,
    attributes: AttributeNames,
    root_target: Root<D::Node>,
    root: RefCell<Option<D::Node>>,
    data: RefCell<Value>,
    methods: HashMap<String, MethodFn>,
    components: HashMap<String, Rc<ComponentConfig<D>>>,
    directives: HashMap<String, Rc<dyn Directive<D::Node>>>,
    links: RefCell<LinkTable<D>>,
    discard_listener: ListenerId,
    initialized: Cell<bool>,
    destroyed: Cell<bool>,
    ready_callbacks: RefCell<Vec<ReadyCallback<D>>>,
}

/// The binding engine mounted on one root element.
///
/// Cheap to clone; clones share the same state.
pub struct App<D: Dom>(Rc<AppInner<D>>);

impl<D: Dom> Clone for App<D> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<D: Dom> Drop for AppInner<D> {
    fn drop(&mut self) {
        self.env.dom.off_discard(self.discard_listener);
    }
}

pub(crate) struct WeakApp<D: Dom>(Weak<AppInner<D>>);

impl<D: Dom> WeakApp<D> {
    pub(crate) fn upgrade(&self) -> Option<App<D>> {
        self.0.upgrade().map(App)
    }
}

impl<D: Dom> App<D> {
    /// Build an app without initializing it.
    pub fn new(options: AppOptions<D>, env: Environment<D>) -> Self {
        let AppOptions {
            root,
            data,
            methods,
            components,
            directives,
            attributes,
        } = options;
        let components = components
            .into_iter()
            .map(|(name, definition)| {
                let config = Rc::new(ComponentConfig::new(name.clone(), definition));
                (name, config)
            })
            .collect();

        Self(Rc::new_cyclic(|weak: &Weak<AppInner<D>>| {
            let app = WeakApp(weak.clone());
            let discard_listener = env.dom.on_discard(Rc::new(move |nodes: &[D::Node]| {
                if let Some(app) = app.upgrade() {
                    app.forget(nodes);
                }
            }));
            AppInner {
                env,
                attributes,
                root_target: root,
                root: RefCell::new(None),
                data: RefCell::new(data),
                methods,
                components,
                directives,
                links: RefCell::new(LinkTable::new()),
                discard_listener,
                initialized: Cell::new(false),
                destroyed: Cell::new(false),
                ready_callbacks: RefCell::new(Vec::new()),
            }
        }))
    }

    /// Build an app and initialize it as soon as the document is ready.
    ///
    /// When the document is already ready, initialization errors are
    /// returned; a deferred initialization logs them instead.
    pub fn mount(options: AppOptions<D>, env: Environment<D>) -> Result<Self> {
        let ready = Rc::clone(&env.ready);
        let app = Self::new(options, env);
        if ready.is_ready() {
            app.init()?;
        } else {
            let deferred = app.clone();
            ready.when_ready(Box::new(move || {
                if let Err(error) = deferred.init() {
                    log::error!(target: "nospa::app", "{error}");
                }
            }));
        }
        Ok(app)
    }

    pub(crate) fn downgrade(&self) -> WeakApp<D> {
        WeakApp(Rc::downgrade(&self.0))
    }

    pub fn dom(&self) -> &Rc<D> {
        &self.0.env.dom
    }

    pub fn environment(&self) -> &Environment<D> {
        &self.0.env
    }

    pub fn attributes(&self) -> &AttributeNames {
        &self.0.attributes
    }

    pub fn root(&self) -> Option<D::Node> {
        self.0.root.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.0.initialized.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn data(&self) -> Ref<'_, Value> {
        self.0.data.borrow()
    }

    pub fn data_mut(&self) -> RefMut<'_, Value> {
        self.0.data.borrow_mut()
    }

    /// Call a method registered with [`AppOptions::method`].
    pub fn call_method(&self, name: &str, args: Value) -> Option<Value> {
        let method = Rc::clone(self.0.methods.get(name)?);
        Some(method(args))
    }

    /// Resolve the root, bind directives then components under it and flush
    /// the ready callbacks. A second call while initialized does nothing.
    pub fn init(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let root = match &self.0.root_target {
            Root::Selector(selector) => self
                .dom()
                .query_selector(selector)
                .ok_or_else(|| Error::RootNotFound {
                    selector: selector.clone(),
                })?,
            Root::Element(node) => node.clone(),
        };
        *self.0.root.borrow_mut() = Some(root.clone());
        self.0.destroyed.set(false);

        log::debug!(target: "nospa::app", "Initializing on {root:?}");
        self.bind_directives_in(&root);
        self.bind_components_in(&root);

        loop {
            let callbacks = std::mem::take(&mut *self.0.ready_callbacks.borrow_mut());
            if callbacks.is_empty() {
                break;
            }
            for callback in callbacks {
                callback(self);
            }
        }
        self.0.initialized.set(true);
        Ok(())
    }

    /// Unbind every component and directive under the root.
    pub fn destroy(&self) {
        if let Some(root) = self.root() {
            log::debug!(target: "nospa::app", "Destroying on {root:?}");
            self.unbind_components_in(&root);
            self.unbind_directives_in(&root);
        }
        self.0.ready_callbacks.borrow_mut().clear();
        self.0.initialized.set(false);
        self.0.destroyed.set(true);
    }

    /// Run `callback` once the app is initialized, right away if it already is.
    pub fn on_ready(&self, callback: impl FnOnce(&App<D>) + 'static) {
        if self.is_initialized() {
            callback(self);
        } else {
            self.0.ready_callbacks.borrow_mut().push(Box::new(callback));
        }
    }

    /// The component instance bound to `node`. `None` while it is still
    /// loading or waiting for visibility.
    pub fn component_from_element(&self, node: &D::Node) -> Option<Component<D>> {
        self.0.links.borrow().component(node)?.instance.clone()
    }

    /// Whether `node` carries a component link, finished or pending.
    pub fn is_linked(&self, node: &D::Node) -> bool {
        self.0.links.borrow().component(node).is_some()
    }

    pub fn linked_directives(&self, node: &D::Node) -> Vec<DirectiveLink> {
        self.0.links.borrow().directives(node).to_vec()
    }

    /// Hydrate `value` against the app data store.
    pub fn hydrate(&self, mut value: Value) -> Value {
        hydrate(&self.0.data.borrow(), &mut value);
        value
    }

    pub fn insert_html(&self, container: &D::Node, html: &str) -> Result<()> {
        for child in self.dom().children(container) {
            self.unbind_in(&child);
        }
        self.dom().set_inner_html(container, html)?;
        for child in self.dom().children(container) {
            self.bind_in(&child);
        }
        Ok(())
    }

    /// Insert `node` into `parent` (before `before`, or last) and bind it.
    pub fn append_or_insert_element(
        &self,
        node: &D::Node,
        parent: &D::Node,
        before: Option<&D::Node>,
    ) -> Result<D::Node> {
        self.dom().insert_before(parent, node, before)?;
        self.bind_in(node);
        Ok(node.clone())
    }

    /// Unbind `node` and remove it from its parent.
    pub fn remove_element(&self, node: &D::Node) -> Result<D::Node> {
        let parent = self.dom().parent(node).ok_or(Error::InvalidElement {
            operation: "remove_element",
        })?;
        self.unbind_in(node);
        self.dom().remove_child(&parent, node)?;
        Ok(node.clone())
    }

    /// Unbind `old`, put `new` in its place and bind `new`. Returns `old`.
    pub fn replace_element(&self, old: &D::Node, new: &D::Node) -> Result<D::Node> {
        let parent = self.dom().parent(old).ok_or(Error::InvalidElement {
            operation: "replace_element",
        })?;
        self.unbind_in(old);
        self.dom().replace_child(&parent, new, old)?;
        self.bind_in(new);
        Ok(old.clone())
    }

    fn bind_in(&self, subtree: &D::Node) {
        self.bind_directives_in(subtree);
        self.bind_components_in(subtree);
    }

    fn unbind_in(&self, subtree: &D::Node) {
        self.unbind_components_in(subtree);
        self.unbind_directives_in(subtree);
    }

    pub fn bind_components_in(&self, subtree: &D::Node) {
        for node in matched_elements(self.dom().as_ref(), subtree, &self.0.attributes.component) {
            self.bind_component(&node);
        }
    }

    pub fn unbind_components_in(&self, subtree: &D::Node) {
        for node in matched_elements(self.dom().as_ref(), subtree, &self.0.attributes.component) {
            self.unbind_component(&node);
        }
    }

    pub fn bind_directives_in(&self, subtree: &D::Node) {
        for node in matched_elements(self.dom().as_ref(), subtree, &self.0.attributes.directive) {
            self.bind_directives(&node);
        }
    }

    pub fn unbind_directives_in(&self, subtree: &D::Node) {
        for node in matched_elements(self.dom().as_ref(), subtree, &self.0.attributes.directive) {
            self.unbind_directives(&node);
        }
    }

    /// Link and instantiate the component declared on `node`.
    ///
    /// Problems are logged and the element skipped: an element already
    /// linked, an unknown name. A lazy element with a visibility capability
    /// is instantiated once it becomes visible; any other element right
    /// away, completing asynchronously on the environment's spawner.
    pub fn bind_component(&self, node: &D::Node) {
        let Some((name, config)) = self.registered_component(node) else {
            return;
        };
        let id = self.0.links.borrow_mut().link_placeholder(node, &name);

        let lazy = parse_attr_value(self.dom().as_ref(), node, &self.0.attributes.lazy);
        match (lazy, self.0.env.visibility.clone()) {
            (Some(lazy), Some(visibility)) => {
                let options = LazyOptions::from_value(&lazy);
                let delay = options.delay();
                let app = self.downgrade();
                let element = node.clone();
                log::trace!(target: "nospa::lazy", "Waiting for {name} on {node:?} to become visible");
                let watch = LazyWatch::observe(visibility.as_ref(), node, &options, move || {
                    if let Some(app) = app.upgrade() {
                        log::trace!(target: "nospa::lazy", "{name} on {element:?} is visible");
                        app.spawn_instantiation(element, id, name, config, Some(delay));
                    }
                });
                self.0.links.borrow_mut().attach_lazy(node, id, watch);
            }
            _ => self.spawn_instantiation(node.clone(), id, name, config, None),
        }
    }

    /// Link and instantiate the component declared on `node`, bypassing the
    /// lazy gate, and hand back the outcome.
    ///
    /// Resolves to `None` when nothing was instantiated: the element is not
    /// a registered component or was unbound before its class resolved. An
    /// element that is already bound resolves to its current instance.
    pub fn init_component(&self, node: &D::Node) -> LocalBoxFuture<'static, Result<Option<Component<D>>>> {
        if self.is_linked(node) {
            log::warn!(target: "nospa::app", "Cannot initialize two components on the same element {node:?}");
            return future::ready(Ok(self.component_from_element(node))).boxed_local();
        }
        let Some((name, config)) = self.registered_component(node) else {
            return future::ready(Ok(None)).boxed_local();
        };
        let id = self.0.links.borrow_mut().link_placeholder(node, &name);
        let app = self.clone();
        let node = node.clone();
        async move { app.instantiate(&node, id, &name, &config).await }.boxed_local()
    }

    /// Destroy the component bound to `node` (or cancel its pending
    /// instantiation) and drop the link.
    pub fn unbind_component(&self, node: &D::Node) {
        let id = match self.0.links.borrow().component(node) {
            Some(link) => link.id,
            None => return,
        };
        let Some(link) = self.0.links.borrow_mut().unlink_component(node, id) else {
            return;
        };
        if let Some(lazy) = &link.lazy {
            lazy.dispose();
        }
        if let Some(instance) = &link.instance {
            instance.destroy();
        }
        log::debug!(target: "nospa::app", "Unbound {} from {node:?}", link.name);
    }

    /// Drop the links of nodes the host discarded without an unbind.
    ///
    /// No hooks run: the elements are gone, so only the engine state bound
    /// to them is released.
    fn forget(&self, nodes: &[D::Node]) {
        let dropped = self.0.links.borrow_mut().forget(nodes);
        if dropped.is_empty() {
            return;
        }
        for link in &dropped {
            if let Some(lazy) = &link.lazy {
                lazy.dispose();
            }
        }
        log::debug!(
            target: "nospa::app",
            "Dropped {} component link(s) of discarded elements",
            dropped.len()
        );
    }

    /// Bind every directive declared on `node` that is registered and not
    /// bound to it yet.
    pub fn bind_directives(&self, node: &D::Node) {
        let Some(mut binding) = parse_attr_value(self.dom().as_ref(), node, &self.0.attributes.directive)
        else {
            return;
        };
        if !is_truthy(&binding) {
            return;
        }
        if binding.is_object() || binding.is_array() {
            hydrate(&self.0.data.borrow(), &mut binding);
        }
        let entries = match binding {
            Value::Array(entries) => entries,
            entry => vec![entry],
        };

        for entry in entries {
            let Some((name, props)) = directive_entry(entry) else {
                log::error!(target: "nospa::app", "Invalid directive binding on {node:?}");
                continue;
            };
            let Some(directive) = self.0.directives.get(&name).cloned() else {
                log::error!(target: "nospa::app", "Directive with name {name:?} is not registered {node:?}");
                continue;
            };
            if self.0.links.borrow().has_directive(node, &name) {
                continue;
            }
            directive.bind(node, &props);
            log::trace!(target: "nospa::app", "Bound directive {name} to {node:?}");
            self.0
                .links
                .borrow_mut()
                .link_directive(node, DirectiveLink { name, props });
        }
    }

    /// Unbind all directives of `node` and drop their links.
    pub fn unbind_directives(&self, node: &D::Node) {
        let links = self.0.links.borrow_mut().unlink_directives(node);
        for link in links {
            if let Some(directive) = self.0.directives.get(&link.name) {
                directive.unbind(node);
                log::trace!(target: "nospa::app", "Unbound directive {} from {node:?}", link.name);
            }
        }
    }

    fn registered_component(&self, node: &D::Node) -> Option<(String, Rc<ComponentConfig<D>>)> {
        let name = self
            .dom()
            .attribute(node, &self.0.attributes.component)
            .filter(|name| !name.is_empty())?;
        if self.is_linked(node) {
            log::warn!(target: "nospa::app", "Cannot initialize two components on the same element {node:?}");
            return None;
        }
        let Some(config) = self.0.components.get(&name) else {
            log::warn!(target: "nospa::app", "Component with name {name:?} is not registered {node:?}");
            return None;
        };
        Some((name, Rc::clone(config)))
    }

    fn spawn_instantiation(
        &self,
        node: D::Node,
        id: LinkId,
        name: String,
        config: Rc<ComponentConfig<D>>,
        delay: Option<Duration>,
    ) {
        let app = self.clone();
        let timer = Rc::clone(&self.0.env.timer);
        self.0.env.spawn(async move {
            if let Some(delay) = delay {
                timer.sleep(delay).await;
            }
            if let Err(error) = app.instantiate(&node, id, &name, &config).await {
                log::error!(target: "nospa::app", "{error}");
            }
        });
    }

    /// Resolve the class and build the instance for link `id`, unless the
    /// element lost that link in the meantime.
    async fn instantiate(
        &self,
        node: &D::Node,
        id: LinkId,
        name: &str,
        config: &Rc<ComponentConfig<D>>,
    ) -> Result<Option<Component<D>>> {
        if !self.0.links.borrow().is_current(node, id) {
            return Ok(None);
        }
        let class = match config.resolve().await {
            Ok(class) => class,
            Err(error) => {
                // Leave the element free for a later attempt.
                self.0.links.borrow_mut().unlink_component(node, id);
                if error.is_chunk_load_failure() {
                    self.0.env.recovery.reload(&error);
                }
                return Err(error);
            }
        };
        if !self.0.links.borrow().is_current(node, id) {
            log::debug!(target: "nospa::app", "{name} on {node:?} was unbound while loading");
            return Ok(None);
        }

        let props = self.component_props(node);
        let component = Component::new(self, name, node.clone(), props, class.instantiate());
        component.init();

        if self.0.links.borrow_mut().complete(node, id, component.clone()) {
            log::debug!(target: "nospa::app", "Bound {name} to {node:?}");
            Ok(Some(component))
        } else {
            // The init hook unbound its own element.
            component.destroy();
            Ok(None)
        }
    }

    fn component_props(&self, node: &D::Node) -> Value {
        let mut props = match parse_attr_value(self.dom().as_ref(), node, &self.0.attributes.props) {
            None | Some(Value::Null) => return json!({}),
            Some(props @ (Value::Object(_) | Value::Array(_))) => props,
            Some(_) => {
                log::warn!(target: "nospa::app", "Component props should be an object {node:?}");
                return json!({});
            }
        };
        hydrate(&self.0.data.borrow(), &mut props);
        props
    }
}

/// Normalise one directive binding entry: `"name"` or
/// `{"name": ..., "props": ...}`.
fn directive_entry(entry: Value) -> Option<(String, Value)> {
    match entry {
        Value::String(name) => Some((name, json!({}))),
        Value::Object(mut entry) => {
            let Value::String(name) = entry.remove("name")? else {
                return None;
            };
            let props = entry
                .remove("props")
                .filter(is_truthy)
                .unwrap_or_else(|| json!({}));
            Some((name, props))
        }
        _ => None,
    }
}
