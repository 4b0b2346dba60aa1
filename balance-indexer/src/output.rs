use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

/// Console progress of a long indexing pass. Logs go to file, this is what
/// the operator watches.
pub struct IndexOutput {
    bar: ProgressBar,
}

impl IndexOutput {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);

        Self { bar }
    }

    // For tests and non-interactive runs
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn update_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    pub fn update_current(&self, current: u64) {
        self.bar.set_position(current);
    }

    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    pub fn println(&self, msg: &str) {
        self.bar.println(msg);
    }

    pub fn finish(&self, msg: &str) {
        self.bar.finish_with_message(msg.to_string());
    }
}

impl Default for IndexOutput {
    fn default() -> Self {
        Self::new()
    }
}

pub type IndexOutputRef = Arc<IndexOutput>;
