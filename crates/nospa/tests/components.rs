mod support;

use log::Level;
use nospa::platform::memory::{MemoryDom, NodeId};
use nospa::{
    Behavior, BoxError, Component, ComponentClass, Definition, Dom, DomEvent, EventHandler, Module,
};
use serde_json::{Value, json};
use std::cell::Cell;
use std::rc::Rc;
use support::{Harness, Journal, blueprint, logged, options};

#[derive(Default)]
struct Counter {
    count: Cell<i64>,
    inits: Cell<i64>,
}

impl Behavior<MemoryDom> for Counter {
    fn on_init(&self, _component: &Component<MemoryDom>) {
        self.inits.set(self.inits.get() + 1);
    }

    fn call(&self, _component: &Component<MemoryDom>, method: &str, args: Value) -> Option<Value> {
        match method {
            "increment" => {
                let step = args.as_i64().unwrap_or(1);
                self.count.set(self.count.get() + step);
                Some(json!(self.count.get()))
            }
            "inits" => Some(json!(self.inits.get())),
            _ => None,
        }
    }
}

#[test]
fn every_definition_shape_is_instantiated() {
    let mut harness = Harness::new(
        r#"<main id="app">
            <div id="plain" data-component="Plain"></div>
            <div id="class" data-component="Counter"></div>
            <div id="sync" data-component="Sync"></div>
            <div id="async" data-component="Async"></div>
            <div id="prebuilt" data-component="Prebuilt"></div>
        </main>"#,
    );
    let journal = Journal::default();
    let recording = |journal: &Journal| {
        let recorder = journal.clone();
        blueprint().on_init(move |component| recorder.push(component.name()))
    };
    let (plain, sync, deferred) = (recording(&journal), recording(&journal), recording(&journal));

    let app = harness.mount(
        options()
            .component("Plain", plain)
            .component("Counter", ComponentClass::<MemoryDom>::of::<Counter>())
            .component(
                "Sync",
                Definition::<MemoryDom>::factory(move || {
                    Ok(Module::Default(Box::new(sync.clone().into())))
                }),
            )
            .component(
                "Async",
                Definition::<MemoryDom>::future(move || {
                    let blueprint = deferred.clone();
                    async move { Ok::<_, BoxError>(Module::from(blueprint)) }
                }),
            )
            .component(
                "Prebuilt",
                Definition::<MemoryDom>::factory(|| {
                    Ok(Module::from(ComponentClass::<MemoryDom>::of::<Counter>()))
                }),
            ),
    );

    for selector in ["#plain", "#class", "#sync", "#async", "#prebuilt"] {
        let component = app
            .component_from_element(&harness.select(selector))
            .unwrap_or_else(|| panic!("{selector} is bound"));
        assert!(component.is_initialized());
        assert!(!component.is_destroyed());
    }
    for name in ["Plain", "Sync", "Async"] {
        assert_eq!(journal.count(name), 1, "{name} init hook runs once");
    }
    assert_eq!(journal.entries().len(), 3);
    for selector in ["#class", "#prebuilt"] {
        let component = app
            .component_from_element(&harness.select(selector))
            .unwrap_or_else(|| panic!("{selector} is bound"));
        assert_eq!(component.call("inits", Value::Null), Some(json!(1)));
    }

    let counter = app
        .component_from_element(&harness.select("#class"))
        .expect("counter is bound");
    assert_eq!(counter.call("increment", json!(2)), Some(json!(2)));
    assert_eq!(counter.call("increment", Value::Null), Some(json!(3)));
    assert_eq!(counter.call("reset", Value::Null), None);
}

#[test]
fn instances_of_one_class_do_not_share_state() {
    let mut harness = Harness::new(
        r#"<main id="app"><i id="a" data-component="Counter"></i><i id="b" data-component="Counter"></i></main>"#,
    );
    let app = harness.mount(options().component("Counter", ComponentClass::<MemoryDom>::of::<Counter>()));

    let a = app.component_from_element(&harness.select("#a")).expect("bound");
    let b = app.component_from_element(&harness.select("#b")).expect("bound");
    assert_ne!(a, b);
    a.call("increment", json!(5));
    assert_eq!(b.call("increment", json!(1)), Some(json!(1)));
}

#[test]
fn props_are_decoded_and_hydrated() {
    let mut harness = Harness::new(
        r#"<main id="app">
            <div id="hydrated" data-component="Card" data-component-props='{"title": "$$data.title", "tags": ["$$data.tags.0"]}'></div>
            <div id="bare" data-component="Card"></div>
            <div id="scalar" data-component="Card" data-component-props="42"></div>
        </main>"#,
    );
    let app = harness.mount(
        options()
            .data(json!({"title": "Hello", "tags": ["new"]}))
            .component("Card", blueprint()),
    );

    let props = |selector: &str| {
        app.component_from_element(&harness.select(selector))
            .expect("bound")
            .props()
            .clone()
    };
    assert_eq!(props("#hydrated"), json!({"title": "Hello", "tags": ["new"]}));
    assert_eq!(props("#bare"), json!({}));
    assert_eq!(props("#scalar"), json!({}));
    assert!(logged(Level::Warn, "Component props should be an object"));
}

#[test]
fn second_binding_of_an_element_is_rejected() {
    let mut harness = Harness::new(r#"<main id="app"><div id="modal" data-component="Modal"></div></main>"#);
    let journal = Journal::default();
    let recorder = journal.clone();
    let app = harness.mount(
        options().component("Modal", blueprint().on_init(move |_| recorder.push("init"))),
    );
    let modal = harness.select("#modal");
    let first = app.component_from_element(&modal).expect("bound");

    app.bind_component(&modal);
    app.bind_components_in(&harness.select("#app"));
    harness.run();

    assert_eq!(journal.count("init"), 1);
    assert_eq!(app.component_from_element(&modal), Some(first));
    assert!(logged(Level::Warn, "Cannot initialize two components on the same element"));
}

#[test]
fn unknown_components_are_skipped() {
    let mut harness = Harness::new(
        r#"<main id="app"><div id="ghost" data-component="Ghost"></div><div id="known" data-component="Known"></div></main>"#,
    );
    let app = harness.mount(options().component("Known", blueprint()));

    assert!(!app.is_linked(&harness.select("#ghost")));
    assert!(app.component_from_element(&harness.select("#known")).is_some());
    assert!(logged(Level::Warn, "Component with name \"Ghost\" is not registered"));
}

#[test]
fn lifecycle_events_reach_the_bus_and_the_dom() {
    let mut harness = Harness::new(r#"<main id="app"><div id="tabs" data-component="Tabs"></div></main>"#);
    let journal = Journal::default();

    let recorder = journal.clone();
    harness.dom.add_listener(
        &harness.select("#app"),
        "init",
        Rc::new(move |event: &DomEvent<NodeId>| {
            recorder.push(format!("dom init {}", event.detail.clone().unwrap_or_default()));
        }),
    );

    let recorder = journal.clone();
    let app = harness.mount(
        options().component("Tabs", blueprint().on_destroy(move |_| recorder.push("hook destroy"))),
    );
    let tabs = harness.select("#tabs");
    let component = app.component_from_element(&tabs).expect("bound");

    let recorder = journal.clone();
    let _subscription = component.on(
        "destroy",
        Rc::new(move |detail: &Value| recorder.push(format!("bus destroy {detail}"))),
    );

    app.unbind_component(&tabs);
    assert!(component.is_destroyed());
    assert!(!app.is_linked(&tabs));
    assert_eq!(
        journal.entries(),
        vec![
            r#"dom init {"component":"Tabs"}"#,
            "hook destroy",
            r#"bus destroy {"component":"Tabs"}"#,
        ]
    );
}

#[test]
fn local_event_bus() {
    let mut harness = Harness::new(r#"<main id="app"><div id="bus" data-component="Bus"></div></main>"#);
    let app = harness.mount(options().component("Bus", blueprint()));
    let component = app.component_from_element(&harness.select("#bus")).expect("bound");
    let journal = Journal::default();

    let recorder = journal.clone();
    let always: EventHandler = Rc::new(move |detail: &Value| recorder.push(format!("always {detail}")));
    let recorder = journal.clone();
    let first: EventHandler = Rc::new(move |detail: &Value| recorder.push(format!("once {detail}")));

    component.on("change", Rc::clone(&always));
    component.on("change", Rc::clone(&always));
    component.once("change", first);

    component.emit("change", json!(1));
    component.emit("change", json!(2));
    assert_eq!(journal.entries(), vec!["always 1", "once 1", "always 2"]);

    journal.clear();
    component.off("change", &always);
    component.emit("change", json!(3));
    assert!(journal.entries().is_empty());

    let recorder = journal.clone();
    let subscription = component.on("change", Rc::new(move |_: &Value| recorder.push("subscribed")));
    component.emit("change", Value::Null);
    subscription.unsubscribe();
    component.emit("change", Value::Null);
    assert_eq!(journal.entries(), vec!["subscribed"]);
}

#[test]
fn once_and_on_of_one_handler_are_separate_registrations() {
    let mut harness = Harness::new(r#"<main id="app"><div id="bus" data-component="Bus"></div></main>"#);
    let app = harness.mount(options().component("Bus", blueprint()));
    let component = app.component_from_element(&harness.select("#bus")).expect("bound");
    let journal = Journal::default();
    let recorder = journal.clone();
    let handler: EventHandler = Rc::new(move |detail: &Value| recorder.push(format!("h {detail}")));

    component.once("change", Rc::clone(&handler));
    component.on("change", Rc::clone(&handler));
    component.emit("change", json!(1));
    component.emit("change", json!(2));
    assert_eq!(journal.entries(), vec!["h 1", "h 1", "h 2"]);

    journal.clear();
    let pending = component.once("change", Rc::clone(&handler));
    component.off("change", &handler);
    pending.unsubscribe();
    component.emit("change", json!(3));
    assert!(journal.entries().is_empty());
}

#[test]
fn app_methods_are_callable() {
    let mut harness = Harness::new(r#"<main id="app"></main>"#);
    let app = harness.mount(options().method("double", |value| json!(value.as_i64().unwrap_or(0) * 2)));

    assert_eq!(app.call_method("double", json!(21)), Some(json!(42)));
    assert_eq!(app.call_method("triple", json!(1)), None);
}
