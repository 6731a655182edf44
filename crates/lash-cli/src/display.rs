//! Terminal rendering of progress events
//!
//! `StartWait` shows a spinner, `StopWait` clears it, `Done` prints a
//! checkmarked line and `Debug` prints dimmed detail when verbose.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lash_kube::{Event, EventBus, EventKind, Subscriptions};

/// Line printed for `event`, `None` for spinner events and hidden detail
pub fn format_event(event: &Event, show_debug: bool) -> Option<String> {
    match event.kind() {
        EventKind::Done => Some(format!("{} {}", style("✓").green().bold(), event.message())),
        EventKind::Debug if show_debug => Some(format!("  {}", style(event.message()).dim())),
        _ => None,
    }
}

/// Subscriber that draws events on stderr
pub struct ProgressRenderer {
    spinner: Mutex<Option<ProgressBar>>,
    show_debug: bool,
}

impl ProgressRenderer {
    pub fn new(show_debug: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            show_debug,
        }
    }

    /// Subscribe to every event kind on `bus`
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscriptions {
        let renderer = Arc::clone(self);
        bus.subscribe_all(move |event| renderer.handle(event))
    }

    fn handle(&self, event: &Event) {
        let mut spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);

        match event.kind() {
            EventKind::StartWait => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                *spinner = Some(start_spinner(event.message()));
            }
            EventKind::StopWait => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
            }
            EventKind::Done => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                if let Some(line) = format_event(event, self.show_debug) {
                    eprintln!("{}", line);
                }
            }
            EventKind::Debug => {
                let Some(line) = format_event(event, self.show_debug) else {
                    return;
                };
                match spinner.as_ref() {
                    Some(pb) => pb.suspend(|| eprintln!("{}", line)),
                    None => eprintln!("{}", line),
                }
            }
        }
    }
}

impl Drop for ProgressRenderer {
    fn drop(&mut self) {
        let spinner = self.spinner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pb) = spinner.take() {
            pb.finish_and_clear();
        }
    }
}

fn start_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(template);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print a warning line
pub fn warning(message: &str) {
    eprintln!("{} {}", style("⚠").yellow(), message);
}
