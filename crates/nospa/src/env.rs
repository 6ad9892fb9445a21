//! Environment capabilities injected into an [`App`](crate::App).
//!
//! Scheduling, timers, visibility observation, the document-ready signal and
//! the failed-chunk recovery action are integration points of the host page,
//! not engine logic, so each of them is a small trait.

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use futures_util::task::{LocalSpawn, LocalSpawnExt};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::dom::Dom;
use crate::error::Error;
use crate::lazy::Visibility;

pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Completes every sleep immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl Timer for NoDelay {
    fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
        future::ready(()).boxed_local()
    }
}

/// One-shot "document is ready" signal.
pub trait ReadyGate {
    fn is_ready(&self) -> bool;

    /// Run `callback` once the document becomes ready.
    fn when_ready(&self, callback: Box<dyn FnOnce()>);
}

/// A document that is already loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlreadyReady;

impl ReadyGate for AlreadyReady {
    fn is_ready(&self) -> bool {
        true
    }

    fn when_ready(&self, callback: Box<dyn FnOnce()>) {
        callback();
    }
}

/// Reaction to a component whose code chunk failed to load.
pub trait Recovery {
    fn reload(&self, error: &Error);
}

/// Logs the failure and leaves the page as it is.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnly;

impl Recovery for LogOnly {
    fn reload(&self, error: &Error) {
        log::warn!(target: "nospa::app", "Chunk load failure, reload skipped: {error}");
    }
}

/// Everything an [`App`](crate::App) needs from its host.
pub struct Environment<D: Dom> {
    pub(crate) dom: Rc<D>,
    pub(crate) spawner: Rc<dyn LocalSpawn>,
    pub(crate) timer: Rc<dyn Timer>,
    pub(crate) visibility: Option<Rc<dyn Visibility<D::Node>>>,
    pub(crate) ready: Rc<dyn ReadyGate>,
    pub(crate) recovery: Rc<dyn Recovery>,
}

impl<D: Dom> Clone for Environment<D> {
    fn clone(&self) -> Self {
        Self {
            dom: Rc::clone(&self.dom),
            spawner: Rc::clone(&self.spawner),
            timer: Rc::clone(&self.timer),
            visibility: self.visibility.clone(),
            ready: Rc::clone(&self.ready),
            recovery: Rc::clone(&self.recovery),
        }
    }
}

impl<D: Dom> Environment<D> {
    /// An environment with immediate timers, an already-ready document, no
    /// visibility capability and log-only recovery.
    pub fn new(dom: Rc<D>, spawner: impl LocalSpawn + 'static) -> Self {
        Self {
            dom,
            spawner: Rc::new(spawner),
            timer: Rc::new(NoDelay),
            visibility: None,
            ready: Rc::new(AlreadyReady),
            recovery: Rc::new(LogOnly),
        }
    }

    pub fn with_timer(mut self, timer: impl Timer + 'static) -> Self {
        self.timer = Rc::new(timer);
        self
    }

    pub fn with_visibility(mut self, visibility: impl Visibility<D::Node> + 'static) -> Self {
        self.visibility = Some(Rc::new(visibility));
        self
    }

    pub fn with_ready_gate(mut self, ready: impl ReadyGate + 'static) -> Self {
        self.ready = Rc::new(ready);
        self
    }

    pub fn with_recovery(mut self, recovery: impl Recovery + 'static) -> Self {
        self.recovery = Rc::new(recovery);
        self
    }

    pub fn dom(&self) -> &Rc<D> {
        &self.dom
    }

    pub fn has_visibility(&self) -> bool {
        self.visibility.is_some()
    }

    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        if let Err(error) = self.spawner.spawn_local(task) {
            log::error!(target: "nospa::app", "Failed to schedule task: {error}");
        }
    }
}
