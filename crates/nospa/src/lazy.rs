//! Lazy gate: defer component instantiation until its element is visible.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Options declared by the lazy attribute, e.g.
/// `data-component-lazy='{"rootMargin": "200px", "delay": 150}'`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LazyOptions {
    pub root_margin: String,
    pub threshold: f64,
    /// Milliseconds to wait after the element became visible.
    pub delay: u64,
}

impl Default for LazyOptions {
    fn default() -> Self {
        Self {
            root_margin: "0px".to_owned(),
            threshold: 0.0,
            delay: 0,
        }
    }
}

impl LazyOptions {
    /// Options from a decoded lazy attribute. Anything but an object (an empty
    /// attribute, `true`, a bare string) means "lazy with defaults".
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|error| {
            log::warn!(target: "nospa::lazy", "Invalid lazy options {value}: {error}");
            Self::default()
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

/// One visibility observation of a watched element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    pub is_intersecting: bool,
    pub ratio: f64,
}

impl Intersection {
    pub fn visible() -> Self {
        Self {
            is_intersecting: true,
            ratio: 1.0,
        }
    }

    pub fn hidden() -> Self {
        Self {
            is_intersecting: false,
            ratio: 0.0,
        }
    }

    pub fn qualifies(&self) -> bool {
        self.is_intersecting || self.ratio > 0.0
    }
}

pub type VisibilityCallback = Box<dyn FnMut(&[Intersection])>;

/// Host capability to observe element visibility.
pub trait Visibility<N> {
    fn observe(&self, node: &N, options: &LazyOptions, callback: VisibilityCallback)
    -> Box<dyn VisibilityWatch>;
}

/// An active observation created by [`Visibility::observe`].
pub trait VisibilityWatch {
    /// Stop observing. Called at most once by [`LazyWatch`].
    fn disconnect(&mut self);
}

struct WatchState {
    handle: RefCell<Option<Box<dyn VisibilityWatch>>>,
    disposed: Cell<bool>,
}

impl WatchState {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(handle) = self.handle.borrow_mut().as_mut() {
            handle.disconnect();
        }
    }
}

/// One-shot visibility watch of a lazily bound element.
///
/// Fires `on_visible` on the first qualifying intersection and disposes the
/// underlying watch exactly once, either then or on [`LazyWatch::dispose`].
#[derive(Clone)]
pub struct LazyWatch {
    state: Rc<WatchState>,
}

impl LazyWatch {
    pub fn observe<N>(
        visibility: &dyn Visibility<N>,
        node: &N,
        options: &LazyOptions,
        on_visible: impl FnOnce() + 'static,
    ) -> Self {
        let state = Rc::new(WatchState {
            handle: RefCell::new(None),
            disposed: Cell::new(false),
        });
        let weak_state: Weak<WatchState> = Rc::downgrade(&state);
        let mut on_visible = Some(on_visible);

        let handle = visibility.observe(
            node,
            options,
            Box::new(move |entries| {
                let Some(state) = weak_state.upgrade() else {
                    return;
                };
                if state.disposed.get() || !entries.iter().any(Intersection::qualifies) {
                    return;
                }
                let Some(on_visible) = on_visible.take() else {
                    return;
                };
                state.dispose();
                on_visible();
            }),
        );

        *state.handle.borrow_mut() = Some(handle);
        // The host may report visibility synchronously while observing.
        if state.disposed.get() {
            if let Some(handle) = state.handle.borrow_mut().as_mut() {
                handle.disconnect();
            }
        }
        Self { state }
    }

    pub fn dispose(&self) {
        self.state.dispose();
    }

    #[cfg(test)]
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.get()
    }
}
