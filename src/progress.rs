//! Progress indicators for paratrooper CLI.

use fleet::TransferProgress;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar over hosts receiving the kitchen archive.
pub struct TransferBar {
    bar: ProgressBar,
}

impl TransferBar {
    pub fn new(hosts: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(hosts as u64)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} hosts {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl TransferProgress for TransferBar {
    fn on_start(&self, host: &str) {
        self.bar.set_message(host.to_string());
    }

    fn on_complete(&self, host: &str, success: bool) {
        if !success {
            self.bar.println(format!("transfer to {host} failed"));
        }
        self.bar.inc(1);
    }
}

/// Spinner for a single local step.
pub fn spinner(msg: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
