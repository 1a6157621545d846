use crate::cache::CacheManager;
use crate::colors::*;
use crate::config::Config;
use crate::fsutil::DEPS_DIR;
use anyhow::Result;

fn cache_manager() -> Result<CacheManager> {
    let config = Config::from_env()?;
    Ok(CacheManager::new(config.cache_root, DEPS_DIR))
}

pub fn cmd_cache_path() -> Result<()> {
    let cache = cache_manager()?;
    println!(
        "{gray}[poac]{reset} cache: {path}",
        gray = C_GRAY,
        reset = C_RESET,
        path = cache.cache_root().display()
    );
    Ok(())
}

pub fn cmd_cache_clean() -> Result<()> {
    let cache = cache_manager()?;
    cache.clean()?;
    println!(
        "{gray}[poac]{reset} {green}cache cleaned{reset} at {path}",
        gray = C_GRAY,
        green = C_GREEN,
        reset = C_RESET,
        path = cache.cache_root().display()
    );
    Ok(())
}

pub fn cmd_cache_ls() -> Result<()> {
    let cache = cache_manager()?;
    let entries = cache.entries()?;
    if entries.is_empty() {
        println!("{C_GRAY}[poac]{C_RESET} {C_DIM}cache is empty{C_RESET}");
        return Ok(());
    }
    for name in &entries {
        println!("{name}");
    }
    println!(
        "{C_GRAY}[poac]{C_RESET} {n} cached package(s)",
        n = entries.len()
    );
    Ok(())
}
