use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Single bar tracking elapsed time against the planned shape duration.
pub(crate) struct HumanProgress {
    pb: ProgressBar,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(5));
        pb.set_style(bar_style());
        Self { pb }
    }

    pub(crate) fn update(&self, planned: Duration, elapsed: Duration, message: String) {
        let total_ms = planned.as_millis() as u64;
        let elapsed_ms = elapsed.as_millis() as u64;
        self.pb.set_length(total_ms);
        self.pb.set_position(elapsed_ms.min(total_ms));
        self.pb.set_message(message);
    }

    /// Prints a line above the bar without tearing it.
    pub(crate) fn println(&self, line: String) {
        self.pb.println(line);
    }

    pub(crate) fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] [ {bar:24.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}
