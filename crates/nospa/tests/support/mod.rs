#![allow(dead_code)]

use futures_executor::LocalPool;
use log::{Level, LevelFilter, Log, Metadata, Record};
use nospa::platform::memory::{
    MemoryClock, MemoryDom, MemoryReadyGate, MemoryRecovery, MemoryVisibility, NodeId,
};
use nospa::{App, AppOptions, Blueprint, Environment};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
}

thread_local! {
    static LINES: RefCell<Vec<LogLine>> = const { RefCell::new(Vec::new()) };
}

/// Records log lines per test thread.
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        LINES.with(|lines| {
            lines.borrow_mut().push(LogLine {
                level: record.level(),
                target: record.target().to_owned(),
                message: record.args().to_string(),
            })
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

pub fn capture_logs() {
    INSTALL.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
    LINES.with(|lines| lines.borrow_mut().clear());
}

pub fn log_lines() -> Vec<LogLine> {
    LINES.with(|lines| lines.borrow().clone())
}

/// Whether a line at `level` containing `needle` was logged.
pub fn logged(level: Level, needle: &str) -> bool {
    log_lines()
        .iter()
        .any(|line| line.level == level && line.message.contains(needle))
}

pub fn count_logged(level: Level, needle: &str) -> usize {
    log_lines()
        .iter()
        .filter(|line| line.level == level && line.message.contains(needle))
        .count()
}

pub fn options() -> AppOptions<MemoryDom> {
    AppOptions::selector("#app")
}

pub fn blueprint() -> Blueprint<MemoryDom> {
    Blueprint::new()
}

/// A memory host with a hand-driven executor, clock, visibility and
/// recovery policy.
pub struct Harness {
    pub pool: LocalPool,
    pub dom: Rc<MemoryDom>,
    pub clock: MemoryClock,
    pub visibility: MemoryVisibility,
    pub recovery: MemoryRecovery,
}

impl Harness {
    pub fn new(html: &str) -> Self {
        capture_logs();
        Self {
            pool: LocalPool::new(),
            dom: Rc::new(MemoryDom::from_html(html).expect("valid markup")),
            clock: MemoryClock::new(),
            visibility: MemoryVisibility::new(),
            recovery: MemoryRecovery::new(),
        }
    }

    /// Environment without a visibility capability.
    pub fn env(&self) -> Environment<MemoryDom> {
        Environment::new(Rc::clone(&self.dom), self.pool.spawner())
            .with_timer(self.clock.clone())
            .with_recovery(self.recovery.clone())
    }

    pub fn lazy_env(&self) -> Environment<MemoryDom> {
        self.env().with_visibility(self.visibility.clone())
    }

    pub fn pending_env(&self, gate: &MemoryReadyGate) -> Environment<MemoryDom> {
        self.env().with_ready_gate(gate.clone())
    }

    /// Build, initialize and settle an app.
    pub fn mount(&mut self, options: AppOptions<MemoryDom>) -> App<MemoryDom> {
        let app = App::new(options, self.env());
        app.init().expect("root exists");
        self.run();
        app
    }

    pub fn mount_lazy(&mut self, options: AppOptions<MemoryDom>) -> App<MemoryDom> {
        let app = App::new(options, self.lazy_env());
        app.init().expect("root exists");
        self.run();
        app
    }

    pub fn run(&mut self) {
        self.pool.run_until_stalled();
    }

    pub fn select(&self, selector: &str) -> NodeId {
        use nospa::Dom;
        self.dom
            .query_selector(selector)
            .unwrap_or_else(|| panic!("{selector} exists"))
    }
}

/// Shared, ordered record of what happened.
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|known| *known == entry).count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}
