use super::{
    colorize_state, describe_failure, json_pretty, load, open_transport, plan, spin_fail,
    spin_ok, spinner, EXIT_SUCCESS,
};
use berth_core::{CachingProvider, ScopePolicy};
use berth_runtime::RunningContainer;
use std::io::Read;
use std::path::Path;

pub fn run(manifest: &Path, transport: &str, json_output: bool) -> Result<u8, String> {
    let resolved = load(manifest)?;
    let chain = plan(&resolved, open_transport(transport)?)?;
    let provider = CachingProvider::from_chain(chain, ScopePolicy::global());

    let pb = (!json_output).then(|| spinner(&format!("starting {}...", resolved.params.image)));
    let running = match provider.provide().get() {
        Ok(running) => {
            if let Some(pb) = &pb {
                spin_ok(pb, &format!("container {} is up", running.id().short()));
            }
            running
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "provisioning failed");
            }
            return Err(describe_failure(&e));
        }
    };

    print_running(&running, json_output)?;

    if !json_output {
        eprintln!("close stdin (Ctrl-D) to tear down, or interrupt with Ctrl-C");
    }
    // Blocks until EOF; Ctrl-C is handled by the exit hooks instead.
    let _ = std::io::stdin().lock().read_to_end(&mut Vec::new());

    provider
        .finish_now()
        .map_err(|e| format!("teardown failed: {e}"))?;
    if !json_output {
        println!("container {} torn down", running.id().short());
    }
    Ok(EXIT_SUCCESS)
}

fn print_running(running: &RunningContainer, json_output: bool) -> Result<(), String> {
    let ports = running
        .port_bindings()
        .map_err(|e| format!("engine error: {e}"))?;

    if json_output {
        let json = serde_json::json!({
            "container": running.info(),
            "state": running.state(),
            "ports": ports,
        });
        println!("{}", json_pretty(&json)?);
        return Ok(());
    }

    let info = running.info();
    println!("id:     {}", info.id);
    if let Some(name) = &info.name {
        println!("name:   {name}");
    }
    println!("image:  {}", info.image);
    println!("state:  {}", colorize_state(&running.state().to_string()));
    for warning in &info.warnings {
        println!("warn:   {warning}");
    }
    for binding in &ports {
        println!("port:   {binding}");
    }
    Ok(())
}
