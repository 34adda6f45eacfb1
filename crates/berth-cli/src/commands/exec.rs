use super::{describe_failure, json_pretty, load, open_transport, plan, EXIT_FAILURE};
use berth_core::{CachingProvider, ScopePolicy};
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(
    manifest: &Path,
    transport: &str,
    command: &[String],
    json_output: bool,
) -> Result<u8, String> {
    let resolved = load(manifest)?;
    let chain = plan(&resolved, open_transport(transport)?)?;
    let provider = CachingProvider::from_chain(chain, ScopePolicy::global());

    let running = provider
        .provide()
        .get()
        .map_err(|e| describe_failure(&e))?;
    let output = running.exec(&BTreeMap::new(), command);

    // Tear down before reporting so a failed command still leaves nothing behind.
    let teardown = provider.finish_now();
    let output = output.map_err(|e| format!("engine error: {e}"))?;
    teardown.map_err(|e| format!("teardown failed: {e}"))?;

    if json_output {
        let json = serde_json::json!({
            "container": running.id(),
            "command": command,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }

    Ok(u8::try_from(output.exit_code).unwrap_or(EXIT_FAILURE))
}
