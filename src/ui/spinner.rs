use std::future::Future;
use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner for an operation that needs manual control (the poll loop prints
/// notices through it while it runs). Hidden when stderr is not a terminal.
pub fn start_spinner(message: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
            .template("{spinner:.cyan} {msg}")
            .expect("spinner template"),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Run an async operation with a spinner showing the given message.
pub async fn with_spinner<T, F: Future<Output = T>>(message: &str, fut: F) -> T {
    let spinner = start_spinner(message);
    let result = fut.await;
    spinner.finish_and_clear();
    result
}
