//! App configuration: attribute names and the options an [`App`](crate::App)
//! is built from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;

use crate::definition::Definition;
use crate::directive::Directive;
use crate::dom::Dom;
use crate::error::{Error, Result};

/// Attributes the engine discovers bindings through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeNames {
    #[serde(rename = "componentAttr")]
    pub component: String,
    #[serde(rename = "componentPropsAttr")]
    pub props: String,
    #[serde(rename = "componentLazyAttr")]
    pub lazy: String,
    #[serde(rename = "componentRefAttr")]
    pub reference: String,
    #[serde(rename = "directiveAttr")]
    pub directive: String,
}

impl Default for AttributeNames {
    fn default() -> Self {
        Self {
            component: "data-component".to_owned(),
            props: "data-component-props".to_owned(),
            lazy: "data-component-lazy".to_owned(),
            reference: "data-component-ref".to_owned(),
            directive: "data-directive".to_owned(),
        }
    }
}

/// Where the app is mounted.
#[derive(Clone, Debug, PartialEq)]
pub enum Root<N> {
    Selector(String),
    Element(N),
}

pub type MethodFn = Rc<dyn Fn(Value) -> Value>;

pub struct AppOptions<D: Dom> {
    pub(crate) root: Root<D::Node>,
    pub(crate) data: Value,
    pub(crate) methods: HashMap<String, MethodFn>,
    pub(crate) components: Vec<(String, Definition<D>)>,
    pub(crate) directives: HashMap<String, Rc<dyn Directive<D::Node>>>,
    pub(crate) attributes: AttributeNames,
}

#[derive(Deserialize)]
struct SerializedOptions {
    el: String,
    #[serde(default = "empty_object")]
    data: Value,
    #[serde(flatten)]
    attributes: AttributeNames,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl<D: Dom> AppOptions<D> {
    pub fn new(root: Root<D::Node>) -> Self {
        Self {
            root,
            data: empty_object(),
            methods: HashMap::new(),
            components: Vec::new(),
            directives: HashMap::new(),
            attributes: AttributeNames::default(),
        }
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        Self::new(Root::Selector(selector.into()))
    }

    pub fn element(node: D::Node) -> Self {
        Self::new(Root::Element(node))
    }

    /// Options from their serialisable part, e.g.
    /// `{"el": "#app", "data": {...}, "componentAttr": "data-widget"}`.
    /// Components, directives and methods are added with the builder methods.
    pub fn from_json(options: &Value) -> Result<Self> {
        let options = SerializedOptions::deserialize(options).map_err(|error| Error::Config {
            message: error.to_string(),
        })?;
        Ok(Self::selector(options.el)
            .data(options.data)
            .attributes(options.attributes))
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn method(mut self, name: impl Into<String>, method: impl Fn(Value) -> Value + 'static) -> Self {
        self.methods.insert(name.into(), Rc::new(method));
        self
    }

    /// Register a component. A later registration of the same name wins.
    pub fn component(mut self, name: impl Into<String>, definition: impl Into<Definition<D>>) -> Self {
        self.components.push((name.into(), definition.into()));
        self
    }

    pub fn directive(
        mut self,
        name: impl Into<String>,
        directive: impl Directive<D::Node> + 'static,
    ) -> Self {
        self.directives.insert(name.into(), Rc::new(directive));
        self
    }

    pub fn attributes(mut self, attributes: AttributeNames) -> Self {
        self.attributes = attributes;
        self
    }
}
