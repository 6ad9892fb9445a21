//! Attach behavior to server-rendered HTML.
//!
//! Elements declare what they are through attributes:
//!
//! ```html
//! <div data-component="Gallery"
//!      data-component-props='{"items": "$$data.gallery"}'
//!      data-component-lazy='{"rootMargin": "200px"}'>
//!   <button data-component-ref="Gallery:next">Next</button>
//! </div>
//! <input data-directive='[{"name": "mask", "props": {"pattern": "99/99"}}]'>
//! ```
//!
//! An [`App`] scans its root for these attributes, instantiates registered
//! components (resolving async definitions once and waiting for visibility
//! when asked to), binds registered directives, and keeps the bindings in
//! step when the page mutates the DOM through it.
//!
//! The engine is host-agnostic: it speaks to the page through [`Dom`] and the
//! [`Environment`] capabilities. [`platform::memory`] is a complete
//! in-memory host; the `web` feature adds `platform::browser`.

mod app;
mod component;
mod config;
mod definition;
mod directive;
mod dom;
mod env;
mod error;
mod hydrate;
mod lazy;
mod link;
pub mod platform;
pub mod utils;

pub use app::App;
pub use component::{Component, ElementRef, EventHandler, RefHandler, Subscription};
pub use config::{AppOptions, AttributeNames, MethodFn, Root};
pub use definition::{Behavior, Blueprint, ComponentClass, Definition, Hook, Method, Module};
pub use directive::{Directive, FnDirective, directive};
pub use dom::{DiscardListener, Dom, DomEvent, Listener, ListenerId, matched_elements};
pub use env::{AlreadyReady, Environment, LogOnly, NoDelay, ReadyGate, Recovery, Timer};
pub use error::{BoxError, Error, Result};
pub use hydrate::hydrate;
pub use lazy::{Intersection, LazyOptions, Visibility, VisibilityCallback, VisibilityWatch};
pub use link::{DirectiveLink, LinkId};
