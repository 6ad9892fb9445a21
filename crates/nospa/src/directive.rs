//! Directives: stateless bind/unbind pairs applied to elements.

use serde_json::Value;

pub trait Directive<N> {
    fn bind(&self, node: &N, props: &Value);

    fn unbind(&self, node: &N);
}

/// Directive built from a pair of closures, see [`directive`].
pub struct FnDirective<N> {
    bind: Box<dyn Fn(&N, &Value)>,
    unbind: Box<dyn Fn(&N)>,
}

impl<N> Directive<N> for FnDirective<N> {
    fn bind(&self, node: &N, props: &Value) {
        (self.bind)(node, props);
    }

    fn unbind(&self, node: &N) {
        (self.unbind)(node);
    }
}

pub fn directive<N>(
    bind: impl Fn(&N, &Value) + 'static,
    unbind: impl Fn(&N) + 'static,
) -> FnDirective<N> {
    FnDirective {
        bind: Box::new(bind),
        unbind: Box::new(unbind),
    }
}
