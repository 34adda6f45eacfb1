use super::{load, open_transport, plan, EXIT_FAILURE, EXIT_SUCCESS};
use berth_runtime::docker::DOCKER_ENV;
use berth_runtime::ContainerTransport;
use berth_schema::PreStartAction;
use std::path::Path;
use std::sync::Arc;

pub fn run(manifest: &Path, transport: &str, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let transport = match open_transport(transport) {
        Ok(transport) => {
            check_transport(transport.as_ref(), &mut checks, &mut all_pass);
            Some(transport)
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("transport", &e));
            None
        }
    };

    if manifest.exists() {
        check_manifest(manifest, transport, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "manifest",
            &format!("No manifest at {}", manifest.display()),
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_transport(
    transport: &dyn ContainerTransport,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    let name = transport.name();
    if transport.available() {
        checks.push(Check::pass(
            "transport",
            &format!("Transport '{name}' is reachable"),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "transport",
            &format!("Transport '{name}' is not reachable"),
        ));
    }

    if name == "docker" {
        match std::env::var(DOCKER_ENV) {
            Ok(binary) => checks.push(Check::info(
                "docker_binary",
                &format!("Using {binary} (from {DOCKER_ENV})"),
            )),
            Err(_) => checks.push(Check::info(
                "docker_binary",
                &format!("Using docker from PATH (set {DOCKER_ENV} to override)"),
            )),
        }
    }
}

fn check_manifest(
    manifest: &Path,
    transport: Option<Arc<dyn ContainerTransport>>,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    let resolved = match load(manifest) {
        Ok(resolved) => resolved,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("manifest", &e));
            return;
        }
    };
    checks.push(Check::pass(
        "manifest",
        &format!("Manifest {} is valid", manifest.display()),
    ));

    for action in &resolved.pre_start {
        let PreStartAction::Copy { local, .. } = action;
        if !local.exists() {
            checks.push(Check::warn(
                "copy_source",
                &format!("Copy source {} does not exist yet", local.display()),
            ));
        }
    }

    let Some(transport) = transport else {
        return;
    };
    match plan(&resolved, transport) {
        Ok(chain) => checks.push(Check::info(
            "stages",
            &format!("{} stages planned", chain.len()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("stages", &e));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("berth doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
