use std::collections::HashMap;
use std::time::{Duration, Instant};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use console::style;
use crate::events::ScanEvent;
use crate::utils::formatting::{format_duration, severity_label};

/// Renders one scan's event stream as indicatif bars.
pub struct ScanProgress {
    multi: MultiProgress,
    scan_bar: ProgressBar,
    tool_bars: HashMap<String, ProgressBar>,
    status_bar: ProgressBar,
    findings_count: usize,
    failed_tools: usize,
    start_time: Instant,
}

impl ScanProgress {
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let scan_bar = multi.add(ProgressBar::new(100));
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("  {bar:30.cyan/dark_gray} {pos:>3}% | {msg}")
        {
            scan_bar.set_style(bar_style.progress_chars("█▓░"));
        }
        scan_bar.set_message("Queued");

        let status_bar = multi.add(ProgressBar::new_spinner());
        if let Ok(spinner) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            status_bar.set_style(spinner);
        }
        status_bar.set_message("Waiting for a worker...");
        status_bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            scan_bar,
            tool_bars: HashMap::new(),
            status_bar,
            findings_count: 0,
            failed_tools: 0,
            start_time: Instant::now(),
        }
    }

    pub fn handle_event(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::ScanStarted { tools, .. } => {
                self.scan_bar.set_message(format!("Running {}", tools.join(", ")));
                self.update_status();
            }
            ScanEvent::PhaseStarted { phase, .. } => {
                self.scan_bar.set_message(phase.clone());
                self.update_status();
            }
            ScanEvent::ToolStarted { tool, .. } => {
                let bar = self.multi.insert_before(&self.status_bar, ProgressBar::new_spinner());
                if let Ok(spinner) = ProgressStyle::default_spinner().template("    {spinner:.yellow} {msg}") {
                    bar.set_style(spinner);
                }
                bar.set_message(tool.clone());
                bar.enable_steady_tick(Duration::from_millis(100));
                self.tool_bars.insert(tool.clone(), bar);
            }
            ScanEvent::ToolCompleted { tool, duration_ms, .. } => {
                if let Some(bar) = self.tool_bars.remove(tool) {
                    bar.finish_and_clear();
                }
                self.println(&format!(
                    "  {} {} ({})",
                    style("✓").green(),
                    tool,
                    format_duration(*duration_ms)
                ));
            }
            ScanEvent::ToolFailed { tool, error, .. } => {
                self.failed_tools += 1;
                if let Some(bar) = self.tool_bars.remove(tool) {
                    bar.finish_and_clear();
                }
                self.println(&format!("  {} {}: {}", style("✗").red(), tool, error));
                self.update_status();
            }
            ScanEvent::FindingCreated { title, severity, .. } => {
                self.findings_count += 1;
                self.println(&format!("    {} {}", style(severity_label(*severity)).bold(), title));
                self.update_status();
            }
            ScanEvent::ExploitationSucceeded { original_finding_id, .. } => {
                self.println(&format!(
                    "  {} Exploitation confirmed finding {}",
                    style("!").red().bold(),
                    original_finding_id
                ));
            }
            ScanEvent::ScanProgress { percent, .. } => {
                self.scan_bar.set_position(u64::from(*percent));
            }
            ScanEvent::ScanCompleted { counts, .. } => {
                self.clear_tools();
                self.scan_bar.set_position(100);
                self.scan_bar.finish_with_message("Complete");
                self.status_bar.finish_with_message(format!(
                    "Scan complete: {} findings | {}",
                    counts.total(),
                    self.elapsed(),
                ));
            }
            ScanEvent::ScanFailed { error, .. } => {
                self.clear_tools();
                self.scan_bar.abandon_with_message("Failed");
                self.status_bar.finish_with_message(format!("Scan failed: {}", error));
            }
            ScanEvent::ScanCancelled { .. } => {
                self.clear_tools();
                self.scan_bar.abandon_with_message("Cancelled");
                self.status_bar.finish_with_message(format!("Scan cancelled after {}", self.elapsed()));
            }
            ScanEvent::ScanCreated { .. } | ScanEvent::PhaseCompleted { .. } => {}
        }
    }

    /// Stop any bars still drawing, for example when the event stream ends
    /// without a terminal event.
    pub fn finish(&mut self) {
        self.clear_tools();
        if !self.status_bar.is_finished() {
            self.status_bar.finish_and_clear();
        }
        if !self.scan_bar.is_finished() {
            self.scan_bar.finish_and_clear();
        }
    }

    fn clear_tools(&mut self) {
        for (_, bar) in self.tool_bars.drain() {
            bar.finish_and_clear();
        }
    }

    fn elapsed(&self) -> String {
        format_duration(self.start_time.elapsed().as_millis() as u64)
    }

    fn update_status(&self) {
        self.status_bar.set_message(format!(
            "{} | {} findings | {} tool failure(s)",
            self.elapsed(),
            self.findings_count,
            self.failed_tools,
        ));
    }

    /// Print a line above the bars.
    pub fn println(&self, msg: &str) {
        let _ = self.multi.println(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, SeverityCounts};

    #[test]
    fn test_counts_findings_and_failures() {
        let mut progress = ScanProgress::new(true);
        progress.handle_event(&ScanEvent::ToolStarted { scan_id: "s".into(), tool: "nmap".into() });
        progress.handle_event(&ScanEvent::FindingCreated {
            scan_id: "s".into(),
            finding_id: "f".into(),
            title: "Open port 22/tcp".into(),
            severity: Severity::Info,
        });
        progress.handle_event(&ScanEvent::ToolFailed { scan_id: "s".into(), tool: "nmap".into(), error: "boom".into() });
        assert_eq!(progress.findings_count, 1);
        assert_eq!(progress.failed_tools, 1);
        assert!(progress.tool_bars.is_empty());

        progress.handle_event(&ScanEvent::ScanCompleted { scan_id: "s".into(), counts: SeverityCounts::default() });
        assert!(progress.status_bar.is_finished());
    }
}
