use std::{io, path::PathBuf};

use clap::Parser;
use color_eyre as ey;
use ey::eyre::{bail, Context};
use kiln_content::{expand_env_placeholders, AssetState, Workspace};
use kiln_shared::log::{self, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArguments {
    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Converts all files of the workspace for which an encoder is configured
    Pack(Pack),
    /// Refreshes a single converted file without converting it again
    Update(Update),
    /// Shows or resets the workspace configuration
    Config(Config),
}

#[derive(Parser, Debug)]
struct Pack {
    /// Root directory of the workspace
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Number of files that are converted in parallel
    #[arg(short, long)]
    threads: Option<usize>,
}

#[derive(Parser, Debug)]
struct Update {
    /// Root directory of the workspace
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// File to update, either absolute or relative to the workspace
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct Config {
    #[clap(subcommand)]
    action: ConfigAction,

    /// Root directory of the workspace
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,
}

#[derive(Parser, Debug, Clone, Copy)]
enum ConfigAction {
    /// Prints the configuration including the resolved encoder module paths
    Show,
    /// Overwrites the configuration file with the default configuration
    Reset,
}

fn main() -> ey::Result<()> {
    color_eyre::install()?;
    let command_line_arguments = CommandLineArguments::parse();

    // Setup logging
    let level = if command_line_arguments.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                kiln_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    match &command_line_arguments.command {
        Command::Pack(pack) => {
            let mut workspace = Workspace::open(&pack.workspace).wrap_err("Failed to open workspace")?;
            if let Some(threads) = pack.threads {
                workspace = workspace.with_threads(threads);
            }
            let summary = workspace.pack().wrap_err("Failed to pack workspace")?;
            println!("{summary}");
            if !summary.is_success() {
                bail!("{} file(s) failed and {} file(s) were cancelled", summary.failed, summary.cancelled);
            }
        }
        Command::Update(update) => {
            let mut workspace = Workspace::open(&update.workspace).wrap_err("Failed to open workspace")?;
            let report = workspace
                .update(&update.file)
                .wrap_err_with(|| format!("Failed to update '{}'", update.file.display()))?;
            println!("{report}");
            if report.state != AssetState::Updated {
                bail!("Update of '{}' was unsuccessful", update.file.display());
            }
        }
        Command::Config(config) => {
            let mut workspace = Workspace::open(&config.workspace).wrap_err("Failed to open workspace")?;
            match config.action {
                ConfigAction::Show => show_config(&workspace),
                ConfigAction::Reset => {
                    info!("Resetting the configuration of '{}'", workspace.root().display());
                    workspace.reset_configuration();
                    workspace.save_configuration().wrap_err("Failed to save configuration")?;
                    show_config(&workspace);
                }
            }
        }
    }
    Ok(())
}

fn show_config(workspace: &Workspace) {
    let config = workspace.config();
    println!("output directory:    {}", config.output_path(workspace.root()).display());
    println!("excluded extensions: {}", config.excluded_extension_tokens().join(" "));
    println!("encoders:");
    for link in &config.encoder_links {
        println!("  {:<6} {}", link.extension, expand_env_placeholders(&link.module_path));
    }
}
