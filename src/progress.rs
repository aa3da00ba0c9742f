//! Progress reporting for long running operations such as level generation
//!
//! Operations open nested progress scopes with [`ProgressTracker::observe`];
//! registered observers are notified with the current stack of states.

use parking_lot::Mutex;
use std::sync::Arc;

/// State of one progress scope
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub label: String,
    pub total_work: f64,
    pub completed_work: f64,
    pub error: Option<String>,
}

impl ProgressState {
    pub fn new(label: impl Into<String>, total_work: f64) -> Self {
        Self {
            label: label.into(),
            total_work,
            completed_work: 0.0,
            error: None,
        }
    }

    /// Completed fraction of the total work
    pub fn progress(&self) -> f64 {
        if self.total_work > 0.0 {
            self.completed_work / self.total_work
        } else {
            0.0
        }
    }
}

/// Receives progress notifications
pub trait ProgressObserver: Send + Sync {
    fn on_begin(&self, state_stack: &[ProgressState]);

    fn on_update(&self, state_stack: &[ProgressState]);

    fn on_end(&self, state_stack: &[ProgressState]);
}

/// Prints one line per notification to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgressObserver;

impl ProgressObserver for ConsoleProgressObserver {
    fn on_begin(&self, state_stack: &[ProgressState]) {
        println!("{}", format_progress(state_stack, Some("...")));
    }

    fn on_update(&self, state_stack: &[ProgressState]) {
        println!("{}", format_progress(state_stack, None));
    }

    fn on_end(&self, state_stack: &[ProgressState]) {
        let failed = state_stack.first().is_some_and(|s| s.error.is_some());
        let marker = if failed { "error!" } else { "done." };
        println!("{}", format_progress(state_stack, Some(marker)));
    }
}

/// Format a state stack as `outer - 50.0%: inner - done.`.
///
/// A `status_label` replaces the percentage of the innermost state.
pub fn format_progress(state_stack: &[ProgressState], status_label: Option<&str>) -> String {
    let Some((last, outer)) = state_stack.split_last() else {
        return String::new();
    };
    let mut parts: Vec<String> = outer.iter().map(|s| format_state(s, None)).collect();
    parts.push(format_state(last, status_label));
    parts.join(": ")
}

fn format_state(state: &ProgressState, marker: Option<&str>) -> String {
    match marker {
        Some(marker) => format!("{} - {}", state.label, marker),
        None => format!("{} - {:.1}%", state.label, 100.0 * state.progress()),
    }
}

/// Format seconds as `10.4s`, `16min 40.4s` or ` 1hr  0min  0.0s`
pub fn format_time(seconds: f64) -> String {
    let (m, s) = div_mod(seconds, 60.0);
    let (h, m) = div_mod(m, 60.0);
    if h != 0.0 {
        format!("{h:2.0}hr {m:2.0}min {s:4.1}s")
    } else if m != 0.0 {
        format!("{m:2.0}min {s:4.1}s")
    } else {
        format!("{s:4.1}s")
    }
}

fn div_mod(value: f64, divisor: f64) -> (f64, f64) {
    let quotient = (value / divisor).floor();
    (quotient, value - quotient * divisor)
}

/// Holds the observers and the stack of open progress scopes
#[derive(Default, Clone)]
pub struct ProgressTracker {
    observers: Vec<Arc<dyn ProgressObserver>>,
    state_stack: Arc<Mutex<Vec<ProgressState>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Open a progress scope, closed when the returned guard is dropped
    pub fn observe(&self, label: impl Into<String>, total_work: f64) -> ProgressGuard<'_> {
        let snapshot = {
            let mut stack = self.state_stack.lock();
            stack.push(ProgressState::new(label, total_work));
            stack.clone()
        };
        self.notify(|observer| observer.on_begin(&snapshot));
        ProgressGuard { tracker: self }
    }

    /// Snapshot of the currently open scopes
    pub fn state_stack(&self) -> Vec<ProgressState> {
        self.state_stack.lock().clone()
    }

    fn notify(&self, f: impl Fn(&dyn ProgressObserver)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }

    fn update_top(&self, f: impl FnOnce(&mut ProgressState)) -> Vec<ProgressState> {
        let mut stack = self.state_stack.lock();
        if let Some(state) = stack.last_mut() {
            f(state);
        }
        stack.clone()
    }
}

/// Guard of an open progress scope
pub struct ProgressGuard<'a> {
    tracker: &'a ProgressTracker,
}

impl ProgressGuard<'_> {
    /// Add completed work and notify observers
    pub fn worked(&self, work: f64) {
        let snapshot = self.tracker.update_top(|state| {
            state.completed_work = (state.completed_work + work).min(state.total_work);
        });
        self.tracker.notify(|observer| observer.on_update(&snapshot));
    }

    /// Mark the scope and all enclosing scopes as failed
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        let mut stack = self.tracker.state_stack.lock();
        for state in stack.iter_mut() {
            state.error = Some(error.clone());
        }
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        let snapshot = self.tracker.state_stack();
        self.tracker.notify(|observer| observer.on_end(&snapshot));
        self.tracker.state_stack.lock().pop();
    }
}
