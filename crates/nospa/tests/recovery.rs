mod support;

use futures_executor::block_on;
use log::Level;
use nospa::platform::memory::MemoryDom;
use nospa::{Definition, Error};
use std::cell::Cell;
use std::rc::Rc;
use support::{Harness, Journal, blueprint, logged, options};

/// A `Lazy` definition failing with `message` on its first call only.
fn flaky(message: &'static str, calls: &Rc<Cell<usize>>, journal: &Journal) -> Definition<MemoryDom> {
    let (calls, journal) = (Rc::clone(calls), journal.clone());
    Definition::factory(move || {
        calls.set(calls.get() + 1);
        if calls.get() == 1 {
            return Err(message.into());
        }
        let journal = journal.clone();
        Ok(blueprint().on_init(move |_| journal.push("init")).into())
    })
}

#[test]
fn chunk_failures_trigger_recovery_and_can_be_retried() {
    let mut harness = Harness::new(r#"<main id="app"><div id="lazy" data-component="Lazy"></div></main>"#);
    let calls = Rc::new(Cell::new(0));
    let journal = Journal::default();
    let app = harness.mount(options().component("Lazy", flaky("Loading chunk 4 failed.", &calls, &journal)));
    let element = harness.select("#lazy");

    let reloads = harness.recovery.reloads();
    assert_eq!(reloads.len(), 1);
    assert!(reloads[0].is_chunk_load_failure());
    assert!(logged(Level::Error, "failed to load"));
    assert!(!app.is_linked(&element));

    app.bind_component(&element);
    harness.run();
    assert_eq!(calls.get(), 2);
    assert_eq!(journal.entries(), vec!["init"]);
    assert_eq!(harness.recovery.reloads().len(), 1);
}

#[test]
fn other_failures_propagate_without_recovery() {
    let mut harness = Harness::new(r#"<main id="app"></main>"#);
    let calls = Rc::new(Cell::new(0));
    let journal = Journal::default();
    let app = harness.mount(options().component("Lazy", flaky("network is down", &calls, &journal)));

    let element = harness
        .dom
        .parse_element(r#"<div data-component="Lazy"></div>"#)
        .expect("valid element");
    let error = block_on(app.init_component(&element)).expect_err("factory fails");
    assert_eq!(
        error,
        Error::Load {
            component: "Lazy".into(),
            message: "network is down".into(),
        }
    );
    assert!(harness.recovery.reloads().is_empty());

    let component = block_on(app.init_component(&element)).expect("second attempt loads");
    assert!(component.is_some());
}
