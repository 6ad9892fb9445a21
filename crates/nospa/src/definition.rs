//! Component definitions and the loader that turns them into classes.
//!
//! A registered definition comes in one of three shapes: a [`Blueprint`]
//! (hooks and methods given as closures), a prebuilt [`ComponentClass`], or a
//! factory producing a [`Module`] either synchronously or as a future. Every
//! shape is resolved once per [`ComponentConfig`] into a single
//! `Rc<ComponentClass>` shared by all instances of that name.

use futures_util::future::{self, FutureExt, LocalBoxFuture, Shared};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use crate::component::Component;
use crate::dom::Dom;
use crate::error::{BoxError, Error, Result};
use crate::utils::{MaybeAsync, call_as_async};

/// Behavior of one component instance.
///
/// Every hook is optional. Implementations needing state keep it behind
/// `Cell`/`RefCell`: hooks may re-enter the component (and the app) freely.
pub trait Behavior<D: Dom> {
    fn on_init(&self, _component: &Component<D>) {}

    fn on_destroy(&self, _component: &Component<D>) {}

    /// Invoke the method `method`. `None` means there is no such method.
    fn call(&self, _component: &Component<D>, _method: &str, _args: Value) -> Option<Value> {
        None
    }
}

pub type Hook<D> = Rc<dyn Fn(&Component<D>)>;
pub type Method<D> = Rc<dyn Fn(&Component<D>, Value) -> Value>;

/// Behavior assembled from closures, the "plain object" definition shape.
pub struct Blueprint<D: Dom> {
    on_init: Option<Hook<D>>,
    on_destroy: Option<Hook<D>>,
    methods: HashMap<String, Method<D>>,
}

impl<D: Dom> Clone for Blueprint<D> {
    fn clone(&self) -> Self {
        Self {
            on_init: self.on_init.clone(),
            on_destroy: self.on_destroy.clone(),
            methods: self.methods.clone(),
        }
    }
}

impl<D: Dom> Default for Blueprint<D> {
    fn default() -> Self {
        Self {
            on_init: None,
            on_destroy: None,
            methods: HashMap::new(),
        }
    }
}

impl<D: Dom> Blueprint<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init(mut self, hook: impl Fn(&Component<D>) + 'static) -> Self {
        self.on_init = Some(Rc::new(hook));
        self
    }

    pub fn on_destroy(mut self, hook: impl Fn(&Component<D>) + 'static) -> Self {
        self.on_destroy = Some(Rc::new(hook));
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&Component<D>, Value) -> Value + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Rc::new(method));
        self
    }
}

impl<D: Dom> Behavior<D> for Blueprint<D> {
    fn on_init(&self, component: &Component<D>) {
        if let Some(hook) = &self.on_init {
            hook(component);
        }
    }

    fn on_destroy(&self, component: &Component<D>) {
        if let Some(hook) = &self.on_destroy {
            hook(component);
        }
    }

    fn call(&self, component: &Component<D>, method: &str, args: Value) -> Option<Value> {
        let method = self.methods.get(method)?;
        Some(method(component, args))
    }
}

/// Reusable component template: builds a fresh [`Behavior`] per instance.
pub struct ComponentClass<D: Dom> {
    construct: Box<dyn Fn() -> Box<dyn Behavior<D>>>,
}

impl<D: Dom> ComponentClass<D> {
    pub fn new<B>(construct: impl Fn() -> B + 'static) -> Self
    where
        B: Behavior<D> + 'static,
    {
        Self {
            construct: Box::new(move || Box::new(construct())),
        }
    }

    /// Class whose instances start from `B::default()`.
    pub fn of<B>() -> Self
    where
        B: Behavior<D> + Default + 'static,
    {
        Self::new(B::default)
    }

    pub fn from_blueprint(blueprint: Blueprint<D>) -> Self {
        Self::new(move || blueprint.clone())
    }

    pub(crate) fn instantiate(&self) -> Box<dyn Behavior<D>> {
        (self.construct)()
    }
}

/// What a factory produces.
pub enum Module<D: Dom> {
    Blueprint(Blueprint<D>),
    Class(Rc<ComponentClass<D>>),
    /// A module whose default export holds the definition.
    Default(Box<Module<D>>),
}

impl<D: Dom> Module<D> {
    pub fn into_class(self) -> Rc<ComponentClass<D>> {
        match self {
            Self::Blueprint(blueprint) => Rc::new(ComponentClass::from_blueprint(blueprint)),
            Self::Class(class) => class,
            Self::Default(module) => module.into_class(),
        }
    }
}

impl<D: Dom> From<Blueprint<D>> for Module<D> {
    fn from(blueprint: Blueprint<D>) -> Self {
        Self::Blueprint(blueprint)
    }
}

impl<D: Dom> From<ComponentClass<D>> for Module<D> {
    fn from(class: ComponentClass<D>) -> Self {
        Self::Class(Rc::new(class))
    }
}

type Factory<D> = Box<dyn Fn() -> MaybeAsync<Module<D>, BoxError>>;

/// A registered component definition.
pub enum Definition<D: Dom> {
    Blueprint(Blueprint<D>),
    Class(Rc<ComponentClass<D>>),
    /// Called on first use, e.g. to load the component's code chunk.
    Factory(Factory<D>),
}

impl<D: Dom> Definition<D> {
    /// Definition produced by a synchronous factory.
    pub fn factory(factory: impl Fn() -> Result<Module<D>, BoxError> + 'static) -> Self {
        Self::Factory(Box::new(move || MaybeAsync::Ready(factory())))
    }

    /// Definition produced by an asynchronous factory.
    pub fn future<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<Module<D>, BoxError>> + 'static,
    {
        Self::Factory(Box::new(move || MaybeAsync::Pending(factory().boxed_local())))
    }
}

impl<D: Dom> From<Blueprint<D>> for Definition<D> {
    fn from(blueprint: Blueprint<D>) -> Self {
        Self::Blueprint(blueprint)
    }
}

impl<D: Dom> From<ComponentClass<D>> for Definition<D> {
    fn from(class: ComponentClass<D>) -> Self {
        Self::Class(Rc::new(class))
    }
}

type Resolution<D> = Shared<LocalBoxFuture<'static, Result<Rc<ComponentClass<D>>>>>;

/// Registry entry of one component name.
pub(crate) struct ComponentConfig<D: Dom> {
    name: String,
    definition: Definition<D>,
    resolved: RefCell<Option<Rc<ComponentClass<D>>>>,
    in_flight: RefCell<Option<Resolution<D>>>,
}

impl<D: Dom> ComponentConfig<D> {
    pub(crate) fn new(name: impl Into<String>, definition: Definition<D>) -> Self {
        Self {
            name: name.into(),
            definition,
            resolved: RefCell::new(None),
            in_flight: RefCell::new(None),
        }
    }

    /// Resolve the definition into its class.
    ///
    /// The class is memoized for the lifetime of the config and concurrent
    /// callers share a single pending factory call. A failed factory call is
    /// not memoized: the next call runs the factory again.
    pub(crate) fn resolve(self: &Rc<Self>) -> LocalBoxFuture<'static, Result<Rc<ComponentClass<D>>>> {
        if let Some(class) = self.resolved.borrow().clone() {
            return future::ready(Ok(class)).boxed_local();
        }
        if let Some(pending) = self.in_flight.borrow().clone() {
            log::trace!(target: "nospa::loader", "Joining pending resolution of {:?}", self.name);
            return pending.boxed_local();
        }

        let factory = match &self.definition {
            Definition::Class(class) => return future::ready(Ok(self.memoize(Rc::clone(class)))).boxed_local(),
            Definition::Blueprint(blueprint) => {
                let class = Rc::new(ComponentClass::from_blueprint(blueprint.clone()));
                return future::ready(Ok(self.memoize(class))).boxed_local();
            }
            Definition::Factory(factory) => factory,
        };

        log::debug!(target: "nospa::loader", "Loading component {:?}", self.name);
        let loading = call_as_async(factory);
        let config = Rc::clone(self);
        let pending = async move {
            let outcome = loading.await;
            config.in_flight.borrow_mut().take();
            match outcome {
                Ok(module) => Ok(config.memoize(module.into_class())),
                Err(error) => {
                    log::debug!(target: "nospa::loader", "Loading {:?} failed: {error}", config.name);
                    Err(Error::load(&config.name, error))
                }
            }
        }
        .boxed_local()
        .shared();

        *self.in_flight.borrow_mut() = Some(pending.clone());
        pending.boxed_local()
    }

    #[cfg(test)]
    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.borrow().is_some()
    }

    fn memoize(&self, class: Rc<ComponentClass<D>>) -> Rc<ComponentClass<D>> {
        *self.resolved.borrow_mut() = Some(Rc::clone(&class));
        class
    }
}
