use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "poac",
    version,
    about = "Package manager for C++",
    long_about = "poac - resolve, fetch and cache C++ dependencies declared in poac.yml.\n\nExamples:\n  poac init --name hello\n  poac install\n  poac install --verbose --jobs 4\n  poac cache path\n  poac cache clean"
)]
pub struct PoacCli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new poac.yml
    Init {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        version: Option<String>,
    },
    /// Install the dependencies listed in poac.yml
    #[command(alias = "i")]
    Install {
        /// Print nothing but errors
        #[arg(long, short = 'q', alias = "quite")]
        quiet: bool,
        /// Print details for every package; ignored with --quiet
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Number of packages fetched in parallel
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
    },
    /// Inspect or clear the global package cache
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCmd {
    /// Show the cache path on this machine
    Path,
    /// Clean the cache (remove all cached packages)
    Clean,
    /// List cached packages
    Ls,
}

impl PoacCli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(&self) -> Result<()> {
        match &self.command {
            None => {
                self.print_help();
                Ok(())
            }
            Some(Commands::Init { name, version }) => {
                commands::cmd_init(name.clone(), version.clone())
            }
            Some(Commands::Install {
                quiet,
                verbose,
                jobs,
            }) => commands::cmd_install(commands::InstallOptions {
                quiet: *quiet,
                verbose: !*quiet && *verbose,
                jobs: *jobs,
            }),
            Some(Commands::Cache { cmd }) => match cmd {
                CacheCmd::Path => commands::cmd_cache_path(),
                CacheCmd::Clean => commands::cmd_cache_clean(),
                CacheCmd::Ls => commands::cmd_cache_ls(),
            },
        }
    }

    fn print_help(&self) {
        println!("poac - Package manager for C++\n");
        println!(
            "Commands:\n  init [--name --version]\n  install [-q|--quiet] [-v|--verbose] [-j|--jobs N]\n  cache <path|clean|ls>"
        );
    }
}
