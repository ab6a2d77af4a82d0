//! Thread-aware progress reporting and cooperative cancellation.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A progress channel shared by the engine and its stages.
///
/// Clones share the same bar and the same interrupt flag, so a pipeline
/// clone running in a worker thread reports into the driver's display.
/// Nothing is drawn unless the channel was created with display enabled.
///
/// Cancellation is cooperative: something (a signal handler, a UI) calls
/// [interrupt](Progress::interrupt), and stages poll
/// [interrupted](Progress::interrupted) in their inner loops.
///
/// # Examples
///
/// ```
/// # use laspipe::Progress;
/// let mut progress = Progress::new(false);
/// progress.set_total(100);
/// progress.set_prefix("rasterize");
/// progress.inc(10);
/// assert!(!progress.interrupted());
/// progress.done();
/// ```
#[derive(Clone, Debug)]
pub struct Progress {
    bar: ProgressBar,
    interrupted: Arc<AtomicBool>,
    display: bool,
}

impl Progress {
    /// Creates a progress channel; hidden unless `display`.
    pub fn new(display: bool) -> Progress {
        let bar = if display {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix} [{bar:50}] {percent}% ({pos}/{len})")
                    .expect("the progress template is valid")
                    .progress_chars("=> "),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Progress {
            bar,
            interrupted: Arc::new(AtomicBool::new(false)),
            display,
        }
    }

    /// Sets the number of work units.
    pub fn set_total(&mut self, total: u64) {
        self.bar.set_length(total);
    }

    /// Sets the label shown before the bar.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.bar.set_prefix(prefix.into());
    }

    /// Advances the counter.
    pub fn inc(&mut self, delta: u64) {
        self.bar.inc(delta);
    }

    /// Sets the counter to an absolute position.
    pub fn update(&mut self, position: u64) {
        self.bar.set_position(position);
    }

    /// Redraws the bar if due; cheap enough for inner loops.
    pub fn show(&mut self) {
        self.bar.tick();
    }

    /// Resets the counter for a new phase.
    pub fn reset(&mut self) {
        self.bar.reset();
    }

    /// Finishes and clears the display.
    pub fn done(&mut self) {
        self.bar.finish_and_clear();
    }

    /// Is display enabled?
    pub fn is_enabled(&self) -> bool {
        self.display
    }

    /// Signals cancellation to every clone of this channel.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    /// Has the user signalled cancellation?
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

impl Default for Progress {
    fn default() -> Progress {
        Progress::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_shared_across_clones() {
        let progress = Progress::new(false);
        let clone = progress.clone();
        assert!(!clone.interrupted());
        progress.interrupt();
        assert!(clone.interrupted());
    }
}
