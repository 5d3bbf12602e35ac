// src/utils/log.rs

//! Structured console helpers on top of the `log` facade.
//!
//! Cycle boundaries, steps and summaries share one look regardless of which
//! logger the binary installs.

const WIDTH: usize = 60;

/// Boxed title line for the start of a cycle or command.
pub fn header(title: &str) {
    let border = "═".repeat(WIDTH);
    log::info!("{border}");
    log::info!("  {title}");
    log::info!("{border}");
}

/// Numbered step within a larger operation.
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {step_num}/{total}] {message}");
}

/// Indented detail line.
pub fn sub_item(message: &str) {
    log::info!("    {message}");
}

/// Title plus aligned key/value lines.
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {title}");
    let width = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for line in summary_lines(items, width) {
        log::info!("{line}");
    }
}

fn summary_lines(items: &[(&str, String)], width: usize) -> Vec<String> {
    items
        .iter()
        .map(|(key, value)| format!("    {key:<width$} : {value}"))
        .collect()
}
