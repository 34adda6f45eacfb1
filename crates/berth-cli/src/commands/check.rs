use super::{json_pretty, load, open_transport, plan, EXIT_SUCCESS};
use std::path::Path;

pub fn run(manifest: &Path, transport: &str, json_output: bool) -> Result<u8, String> {
    let resolved = load(manifest)?;
    let chain = plan(&resolved, open_transport(transport)?)?;
    let stages = chain.stage_names();

    if json_output {
        let json = serde_json::json!({
            "manifest": resolved,
            "stages": stages,
        });
        println!("{}", json_pretty(&json)?);
        return Ok(EXIT_SUCCESS);
    }

    let params = &resolved.params;
    println!("image:        {}", params.image);
    if let Some(name) = &params.name {
        println!("name:         {name}");
    }
    println!("command type: {}", params.command_type);
    println!("auto-remove:  {}", params.auto_remove());
    println!("stop timeout: {}s", params.stop_timeout_secs);
    println!("stages:");
    for (index, stage) in stages.iter().enumerate() {
        println!("  {index}. {stage}");
    }
    Ok(EXIT_SUCCESS)
}
