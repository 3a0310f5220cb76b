use std::fs;
use std::io::Write;

use anyhow::{Context, Result, bail};
use shared::config::ClientConfig;

/// Writes a default configuration file named `helpdesk.<format>` into the
/// working directory.
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> Result<()> {
    let file_name = match format {
        "yaml" | "yml" => "helpdesk.yaml",
        "json" => "helpdesk.json",
        "toml" => "helpdesk.toml",
        other => bail!("unsupported format `{other}`; use yaml, json or toml"),
    };

    let serialized = ClientConfig::with_defaults().render(format)?;
    let mut file = fs::File::create(file_name)
        .with_context(|| format!("failed to create {file_name}"))?;
    file.write_all(serialized.as_bytes())?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
