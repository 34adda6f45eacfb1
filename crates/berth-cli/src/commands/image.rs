use super::{json_pretty, EXIT_SUCCESS};
use berth_schema::{ImageRef, ImageVersion};

pub fn run(reference: &str, json_output: bool) -> Result<u8, String> {
    let image =
        ImageRef::parse(reference).map_err(|e| format!("invalid image reference: {e}"))?;

    let (tag, digest) = match image.version() {
        Some(ImageVersion::Tag(tag)) => (Some(tag.clone()), None),
        Some(ImageVersion::Digest { algorithm, hex }) => (None, Some(format!("{algorithm}:{hex}"))),
        None => (None, None),
    };

    if json_output {
        let json = serde_json::json!({
            "reference": image.to_string(),
            "registry": image.registry(),
            "repository": image.repository(),
            "name": image.name(),
            "tag": tag,
            "digest": digest,
        });
        println!("{}", json_pretty(&json)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("reference:  {image}");
    println!("registry:   {}", image.registry().unwrap_or("-"));
    println!("repository: {}", image.repository().unwrap_or("-"));
    println!("name:       {}", image.name());
    println!("tag:        {}", tag.as_deref().unwrap_or("-"));
    println!("digest:     {}", digest.as_deref().unwrap_or("-"));
    Ok(EXIT_SUCCESS)
}
