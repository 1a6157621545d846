mod cache;
mod init;
mod install;

pub(crate) use cache::{cmd_cache_clean, cmd_cache_ls, cmd_cache_path};
pub(crate) use init::cmd_init;
pub(crate) use install::{cmd_install, InstallOptions};
