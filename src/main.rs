use camino::Utf8PathBuf;
use clap::Parser;
use mod_loader_lib::commands::{self, ModSummary};
use mod_loader_lib::config::LoaderSettings;
use mod_loader_lib::utils::logging;
use mod_loader_lib::SError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mod-loader")]
#[command(about = "Inspect, order and pack game mods")]
#[command(version)]
struct Cli {
    /// Settings file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Import every package in a directory and list the mods found
    Scan {
        /// Mods directory; defaults to the configured one
        dir: Option<PathBuf>,
    },
    /// Print the order in which the mods would be loaded
    Order {
        dir: Option<PathBuf>,
    },
    /// Write every mod in a directory into one .modpack file
    Pack {
        dir: PathBuf,
        out: PathBuf,
    },
    /// Show the settings file location and its effective values
    Config,
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, SError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| SError::InvalidPath(p.display().to_string()))
}

fn canonical(path: &Path) -> Result<Utf8PathBuf, SError> {
    utf8(dunce::canonicalize(path)?)
}

fn mods_dir(settings: &LoaderSettings, dir: Option<PathBuf>) -> Result<Utf8PathBuf, SError> {
    match dir {
        Some(dir) => canonical(&dir),
        None => Ok(settings.mods_directory.clone()),
    }
}

fn load_settings(path: Option<PathBuf>) -> Result<LoaderSettings, SError> {
    match path {
        Some(path) => LoaderSettings::load_path(&utf8(path)?),
        None => LoaderSettings::load(),
    }
}

fn print_summaries(mods: &[ModSummary]) {
    for m in mods {
        println!("{} {} ({}) [{}]", m.guid, m.version, m.name, m.state);
        if m.is_circular_dependency {
            println!("    circular dependency");
        }
        for plugin in &m.plugins {
            println!("    plugin {plugin}");
        }
        for dependency in &m.dependencies {
            println!("    depends on {dependency}");
        }
        for missing in &m.missing_dependencies {
            println!("    missing {missing}");
        }
        for other in &m.incompatibilities {
            println!("    incompatible with {other}");
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), SError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli, settings: LoaderSettings) -> Result<(), SError> {
    match cli.command {
        Commands::Scan { dir } => {
            let dir = mods_dir(&settings, dir)?;
            let mods = commands::scan(settings, &dir)?;
            if cli.json {
                print_json(&mods)?;
            } else {
                print_summaries(&mods);
            }
        }
        Commands::Order { dir } => {
            let dir = mods_dir(&settings, dir)?;
            let order = commands::order(settings, &dir)?;
            if cli.json {
                print_json(&order)?;
            } else {
                for (position, guid) in order.iter().enumerate() {
                    println!("{:>3}. {guid}", position + 1);
                }
            }
        }
        Commands::Pack { dir, out } => {
            let dir = canonical(&dir)?;
            let out = utf8(out)?;
            let count = commands::pack(settings, &dir, &out)?;
            println!("packed {count} mods into {out}");
        }
        Commands::Config => {
            let path = match cli.config {
                Some(path) => utf8(path)?,
                None => LoaderSettings::config_path()?,
            };
            println!("# {path}");
            print_json(&settings)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.clone()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = logging::init(&settings.log);

    match run(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
