use crate::colors::*;
use crate::fsutil::MANIFEST_FILE;
use crate::manifest::{self, Manifest};
use anyhow::{bail, Result};
use std::path::PathBuf;

pub fn cmd_init(name: Option<String>, version: Option<String>) -> Result<()> {
    let path = PathBuf::from(MANIFEST_FILE);
    if path.exists() {
        bail!("{MANIFEST_FILE} already exists");
    }
    let default_name = std::env::current_dir()
        .ok()
        .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "hello".into());
    let manifest = Manifest::new(
        name.unwrap_or(default_name),
        version.unwrap_or_else(|| "0.1.0".into()),
    );
    manifest::write(&manifest, &path)?;
    println!(
        "{gray}[poac]{reset} {green}init{reset} created {name} {ver}",
        gray = C_GRAY,
        reset = C_RESET,
        green = C_GREEN,
        name = manifest.name,
        ver = manifest.version
    );
    Ok(())
}
