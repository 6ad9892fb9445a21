mod support;

use nospa::{Dom, Intersection, LazyOptions};
use support::{Harness, Journal, blueprint, options};

fn lazy_app(harness: &mut Harness, journal: &Journal) -> nospa::App<nospa::platform::memory::MemoryDom> {
    let recorder = journal.clone();
    harness.mount_lazy(options().component(
        "Map",
        blueprint().on_init(move |component| recorder.push(format!("init {}", component.name()))),
    ))
}

#[test]
fn without_visibility_capability_lazy_components_bind_right_away() {
    let mut harness = Harness::new(r#"<main id="app"><div id="map" data-component="Map" data-component-lazy></div></main>"#);
    let journal = Journal::default();
    let recorder = journal.clone();
    let app = harness.mount(options().component(
        "Map",
        blueprint().on_init(move |_| recorder.push("init")),
    ));

    assert_eq!(journal.entries(), vec!["init"]);
    assert!(app.component_from_element(&harness.select("#map")).is_some());
    assert!(!harness.visibility.is_observed(&harness.select("#map")));
}

#[test]
fn lazy_components_wait_for_visibility() {
    let mut harness = Harness::new(r#"<main id="app"><div id="map" data-component="Map" data-component-lazy></div></main>"#);
    let journal = Journal::default();
    let app = lazy_app(&mut harness, &journal);
    let map = harness.select("#map");

    assert!(app.is_linked(&map));
    assert!(app.component_from_element(&map).is_none());
    assert_eq!(harness.visibility.options(&map), Some(LazyOptions::default()));

    harness.visibility.intersect(&map, Intersection::hidden());
    harness.run();
    assert!(journal.entries().is_empty());

    harness.visibility.intersect(&map, Intersection::visible());
    assert!(!harness.visibility.is_observed(&map));
    harness.run();
    assert_eq!(journal.entries(), vec!["init Map"]);
    assert!(app.component_from_element(&map).is_some());

    harness.visibility.intersect(&map, Intersection::visible());
    harness.run();
    assert_eq!(journal.count("init Map"), 1);
}

#[test]
fn lazy_options_and_delay() {
    let mut harness = Harness::new(
        r#"<main id="app"><div id="map" data-component="Map" data-component-lazy='{"rootMargin": "200px", "threshold": 0.5, "delay": 150}'></div></main>"#,
    );
    let journal = Journal::default();
    let app = lazy_app(&mut harness, &journal);
    let map = harness.select("#map");

    let options = harness.visibility.options(&map).expect("observed");
    assert_eq!(options.root_margin, "200px");
    assert_eq!(options.threshold, 0.5);

    harness.visibility.intersect(&map, Intersection::visible());
    harness.run();
    assert!(journal.entries().is_empty());
    assert_eq!(harness.clock.pending_sleeps(), 1);

    harness.clock.advance_by(149);
    harness.run();
    assert!(journal.entries().is_empty());

    harness.clock.advance_by(1);
    harness.run();
    assert_eq!(journal.entries(), vec!["init Map"]);
    assert!(app.component_from_element(&map).is_some());
}

#[test]
fn unbinding_before_visibility_cancels_the_watch() {
    let mut harness = Harness::new(r#"<main id="app"><div id="map" data-component="Map" data-component-lazy=""></div></main>"#);
    let journal = Journal::default();
    let app = lazy_app(&mut harness, &journal);
    let map = harness.select("#map");
    assert!(harness.visibility.is_observed(&map));

    app.unbind_component(&map);
    assert!(!app.is_linked(&map));
    assert!(!harness.visibility.is_observed(&map));
    assert_eq!(harness.visibility.intersect(&map, Intersection::visible()), 0);
    harness.run();
    assert!(journal.entries().is_empty());
}

#[test]
fn unbinding_during_the_delay_drops_the_instantiation() {
    let mut harness = Harness::new(
        r#"<main id="app"><div id="map" data-component="Map" data-component-lazy='{"delay": 100}'></div></main>"#,
    );
    let journal = Journal::default();
    let app = lazy_app(&mut harness, &journal);
    let map = harness.select("#map");

    harness.visibility.intersect(&map, Intersection::visible());
    harness.run();
    app.unbind_component(&map);

    harness.clock.advance_by(100);
    harness.run();
    assert!(journal.entries().is_empty());
    assert!(!app.is_linked(&map));
}

#[test]
fn init_component_bypasses_the_lazy_gate() {
    let mut harness = Harness::new(r#"<main id="app"><div id="lazy-root"></div></main>"#);
    let journal = Journal::default();
    let app = lazy_app(&mut harness, &journal);

    let element = harness
        .dom
        .parse_element(r#"<div data-component="Map" data-component-lazy></div>"#)
        .expect("valid element");
    let component = futures_executor::block_on(app.init_component(&element))
        .expect("instantiates")
        .expect("registered component");
    assert_eq!(component.name(), "Map");
    assert_eq!(journal.entries(), vec!["init Map"]);
    assert!(!harness.visibility.is_observed(&element));
}

#[test]
fn discarded_lazy_elements_stop_being_watched() {
    let mut harness = Harness::new(r#"<main id="app"><div id="map" data-component="Map" data-component-lazy></div></main>"#);
    let journal = Journal::default();
    let app = lazy_app(&mut harness, &journal);
    let root = harness.select("#app");
    let map = harness.select("#map");
    assert!(harness.visibility.is_observed(&map));

    harness.dom.set_inner_html(&root, "").expect("valid markup");
    assert!(harness.dom.release(&map));

    assert!(!app.is_linked(&map));
    assert!(!harness.visibility.is_observed(&map));
    harness.run();
    assert!(journal.entries().is_empty());
}
