use super::{json_pretty, EXIT_SUCCESS};
use berth_schema::parse_port_list;

pub fn run(listing: &str, json_output: bool) -> Result<u8, String> {
    let bindings = parse_port_list(listing).map_err(|e| format!("invalid port listing: {e}"))?;

    if json_output {
        println!("{}", json_pretty(&bindings)?);
        return Ok(EXIT_SUCCESS);
    }

    if bindings.is_empty() {
        println!("no ports");
    }
    for binding in &bindings {
        match &binding.host {
            Some(host) => println!(
                "{}/{} -> {host}",
                binding.container_port, binding.protocol
            ),
            None => println!("{}/{} (not published)", binding.container_port, binding.protocol),
        }
    }
    Ok(EXIT_SUCCESS)
}
