//! Configuration management commands.

use std::path::Path;

use reconstream_core::config::IssueSeverity;
use reconstream_core::Config;

use crate::ConfigAction;

pub fn handle(action: ConfigAction, path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(path)?;
    match action {
        ConfigAction::Show => {
            println!("# Config directory: {}", Config::config_dir().display());
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Validate => {
            let result = config.validate();
            for issue in &result.issues {
                let label = match issue.severity {
                    IssueSeverity::Error => "error",
                    IssueSeverity::Warning => "warning",
                };
                println!("{}: {}", label, issue);
            }
            if !result.is_ok() {
                anyhow::bail!("configuration is invalid");
            }
            println!("Configuration is valid");
        }
    }
    Ok(())
}
