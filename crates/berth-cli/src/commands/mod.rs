pub mod check;
pub mod completions;
pub mod doctor;
pub mod exec;
pub mod image;
pub mod ports;
pub mod up;

use berth_core::{Chain, LifecycleError};
use berth_runtime::{
    plan_from_manifest, select_transport, ContainerError, ContainerTransport, RunningContainer,
};
use berth_schema::{load_manifest, ResolvedManifest};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_ENGINE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "created" => Style::new().yellow().apply_to(state).to_string(),
        "started" => Style::new().cyan().bold().apply_to(state).to_string(),
        "stopped" => Style::new().blue().apply_to(state).to_string(),
        "removed" | "defined" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn load(manifest: &Path) -> Result<ResolvedManifest, String> {
    load_manifest(manifest).map_err(|e| format!("manifest error: {e}"))
}

pub fn open_transport(name: &str) -> Result<Arc<dyn ContainerTransport>, String> {
    select_transport(name).map_err(|e| format!("engine error: {e}"))
}

pub fn plan(
    manifest: &ResolvedManifest,
    transport: Arc<dyn ContainerTransport>,
) -> Result<Chain<RunningContainer>, String> {
    plan_from_manifest(manifest, transport).map_err(|e| match e {
        ContainerError::Pattern(_) => format!("manifest error: {e}"),
        other => other.to_string(),
    })
}

/// Message for a failed provision, prefixed when the engine itself refused.
pub fn describe_failure(err: &LifecycleError) -> String {
    let engine_fault = err.commission_failure().is_some_and(|failure| {
        matches!(
            failure.cause.downcast_ref::<ContainerError>(),
            Some(ContainerError::Transport { .. })
        )
    });
    if engine_fault {
        format!("engine error: {err}")
    } else {
        err.to_string()
    }
}
