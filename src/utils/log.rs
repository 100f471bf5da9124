// src/utils/log.rs

//! Console report formatting for CLI runs.
//!
//! Diagnostics go through the `log` facade; these helpers print the
//! human-facing cycle summaries in a server-style layout.

use chrono::Local;

fn enabled() -> bool {
    ::log::log_enabled!(::log::Level::Info)
}

/// Format a line with timestamp and level
fn format_line(message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("[{}] [INFO] {}", timestamp, message)
}

/// Print a header
pub fn header(title: &str) {
    if enabled() {
        let border = "═".repeat(60);
        println!("{}", format_line(&border));
        println!("{}", format_line(&format!("  {}", title)));
        println!("{}", format_line(&border));
    }
}

/// Print a sub-item (indented)
pub fn sub_item(message: &str) {
    if enabled() {
        println!("{}", format_line(&format!("    {}", message)));
    }
}

/// Print a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    if enabled() {
        println!();
        println!("{}", format_line(&format!("[SUMMARY] {}", title)));
        for line in summary_lines(items) {
            println!("{}", format_line(&line));
        }
    }
}

fn summary_lines(items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    items
        .iter()
        .map(|(key, value)| format!("    {:<width$} : {}", key, value, width = width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines_align_keys() {
        let lines = summary_lines(&[("parsed", "12".to_string()), ("stored", "3".to_string())]);
        assert_eq!(lines, vec!["    parsed : 12", "    stored : 3"]);
    }

    #[test]
    fn test_format_line_has_level() {
        assert!(format_line("hello").ends_with("[INFO] hello"));
    }
}
