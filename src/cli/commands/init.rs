//! `init` command: write a starter configuration file.

use std::path::Path;

use console::style;

use crate::config::{ConfigLoader, CONFIG_FILE_NAME};
use crate::types::Result;

pub fn run(dir: &Path) -> Result<()> {
    let path = dir.join(CONFIG_FILE_NAME);
    ConfigLoader::write_template(&path)?;
    println!("{} {}", style("Wrote").bold(), path.display());
    println!("Set provider keys in the environment, e.g. CONTEXTLOOM_LLM__API_KEY.");
    Ok(())
}
