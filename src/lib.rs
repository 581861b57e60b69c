pub mod app;
pub mod catalog;
pub mod config;
pub mod profile;
pub mod remote;
pub mod server;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use semver::Version;
use tracing::info;

use app::{App, OperationResult};
use config::AppConfig;
use profile::{PlatformKind, Profile, ProfileRequest, parse_platform_version};
use server::{InstallRequest, LoopbackServer, ProjectKind};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "rsi",
    version,
    about = "Install Drupal extensions onto registered remote sites over SSH"
)]
pub struct Cli {
    /// Config file (defaults to config.toml in the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage saved site profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Check a site and print its detected platform version
    Probe {
        #[arg(long)]
        user: String,
        /// host or host:port
        #[arg(long)]
        host: String,
        /// Project root (where composer.json lives)
        #[arg(long)]
        dir: String,
    },
    /// Install a package onto a saved site
    Install {
        #[arg(long)]
        profile: i64,

        /// Composer package, e.g. drupal/token
        #[arg(long, conflicts_with = "machine_name", required_unless_present = "machine_name")]
        package: Option<String>,

        /// Catalog machine name, e.g. token
        #[arg(long)]
        machine_name: Option<String>,
    },
    /// Run composer update on a saved site
    Update {
        #[arg(long)]
        profile: i64,
    },
    /// Browse the catalog of installables
    Catalog {
        #[command(subcommand)]
        action: CatalogCommand,
    },
    /// Listen for install requests from the browser extension
    Serve {
        /// Install requested extensions on this profile
        #[arg(long)]
        profile: Option<i64>,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Probe a site and save it as a profile
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        dir: String,
    },
    List {
        #[arg(long)]
        json: bool,
    },
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    Remove {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Search titles and machine names
    Search {
        term: String,
        /// Only entries for this platform version (e.g. 10 or 11.1)
        #[arg(long)]
        platform_version: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Resolve configuration for a parsed command line.
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(Some(path), default_data_dir()),
        None => AppConfig::load(),
    };
    config.context("loading configuration")
}

pub fn run(cli: Cli, config: AppConfig) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "rsi", &mut std::io::stdout());
        return Ok(());
    }

    let app = App::open(&config)?;

    match cli.command {
        Commands::Profile { action } => run_profile(&app, action),
        Commands::Probe { user, host, dir } => {
            let secret = read_password(&user, &host)?;
            let info = app.probe_site(&user, &secret, &host, &dir).into_result()?;
            println!("{} {}", "✓".green(), info);
            Ok(())
        }
        Commands::Install {
            profile,
            package,
            machine_name,
        } => {
            let profile = app.load_profile_by_id(profile).into_result()?;
            let secret = read_password(&profile.user_name, &profile.host)?;
            match (package, machine_name) {
                (Some(package), _) => {
                    let report = app.install_package(&profile, &secret, &package).into_result()?;
                    println!("{} {} installed (attempt {})", "✓".green(), package.bold(), report.attempt);
                }
                (None, Some(machine_name)) => {
                    let request = InstallRequest {
                        platform: PlatformKind::Drupal,
                        project: ProjectKind::Extension,
                        machine_name: machine_name.clone(),
                    };
                    let reports = app.fulfil_request(&request, &profile, &secret).into_result()?;
                    println!("{} {} installed ({} package(s))", "✓".green(), machine_name.bold(), reports.len());
                }
                (None, None) => bail!("either --package or --machine-name is required"),
            }
            Ok(())
        }
        Commands::Update { profile } => {
            let profile = app.load_profile_by_id(profile).into_result()?;
            let secret = read_password(&profile.user_name, &profile.host)?;
            app.update_packages(&profile, &secret).into_result()?;
            println!("{} composer update finished on {}", "✓".green(), profile.title.bold());
            Ok(())
        }
        Commands::Catalog { action } => run_catalog(&app, action),
        Commands::Serve { profile } => serve(&app, &config, profile),
        Commands::Completions { .. } => Ok(()),
    }
}

fn run_profile(app: &App, action: ProfileCommand) -> Result<()> {
    match action {
        ProfileCommand::Add { title, user, host, dir } => {
            let password = read_password(&user, &host)?;
            let profile = app
                .create_profile(ProfileRequest {
                    title,
                    user_name: user,
                    password,
                    host,
                    directory: dir,
                })
                .into_result()?;
            println!("{} Saved {}", "✓".green(), profile.summary());
        }
        ProfileCommand::List { json } => {
            let profiles = app.get_profiles().into_result()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else if profiles.is_empty() {
                println!("No profiles saved.");
            } else {
                for profile in &profiles {
                    println!("{}", profile.summary());
                }
            }
        }
        ProfileCommand::Show { id, json } => {
            let profile = app.load_profile_by_id(id).into_result()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                print_profile(&profile);
            }
        }
        ProfileCommand::Remove { ids } => {
            let mut profiles = Vec::with_capacity(ids.len());
            for id in ids {
                profiles.push(app.load_profile_by_id(id).into_result()?);
            }
            app.delete_profiles(&profiles).into_result()?;
            println!("{} Removed {} profile(s)", "✓".green(), profiles.len());
        }
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("{}", profile.title.bold());
    println!("  id:        {}", profile.id());
    println!("  login:     {}@{}", profile.user_name, profile.host);
    println!("  directory: {}", profile.directory);
    println!("  platform:  {} {}", profile.platform, profile.version);
    println!("  modified:  {}", format_timestamp(profile.modified));
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn run_catalog(app: &App, action: CatalogCommand) -> Result<()> {
    match action {
        CatalogCommand::Search {
            term,
            platform_version,
            limit,
        } => {
            let version: Option<Version> = platform_version
                .as_deref()
                .map(parse_platform_version)
                .transpose()?;
            if app.catalog().is_empty() {
                println!("No catalogs configured.");
                return Ok(());
            }

            let hits: Vec<_> = app
                .catalog()
                .search(&term)
                .into_iter()
                .filter(|i| version.as_ref().is_none_or(|v| i.is_compatible_with(v)))
                .take(limit)
                .collect();
            for installable in &hits {
                let packages: Vec<&str> = installable.composer_namespaces().collect();
                println!(
                    "{} ({}) [{}.x] {}",
                    installable.title.bold(),
                    installable.machine_name,
                    installable.platform_version.major,
                    packages.join(", ").cyan()
                );
                println!("    {}", installable.plain_description(100));
                println!("    {}", installable.link.dimmed());
            }
            if hits.is_empty() {
                println!("No matches for '{term}'.");
            }
        }
    }
    Ok(())
}

fn serve(app: &App, config: &AppConfig, profile_id: Option<i64>) -> Result<()> {
    let target = match profile_id {
        Some(id) => {
            let profile = app.load_profile_by_id(id).into_result()?;
            let secret = read_password(&profile.user_name, &profile.host)?;
            Some((profile, secret))
        }
        None => None,
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let server = LoopbackServer::bind(config.listen_addr, tx)
        .with_context(|| format!("binding {}", config.listen_addr))?;
    println!("Listening on {}", server.local_addr()?);
    let handle = std::thread::spawn(move || server.run());

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(request) => handle_install_request(app, &request, target.as_ref()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => result.context("loopback listener"),
        Err(_) => bail!("loopback listener thread panicked"),
    }
}

fn handle_install_request(app: &App, request: &InstallRequest, target: Option<&(Profile, String)>) {
    info!(machine_name = %request.machine_name, "Handling install request");
    match target {
        Some((profile, secret)) => match app.fulfil_request(request, profile, secret) {
            OperationResult::Success { data } => println!(
                "{} {} installed on {} ({} package(s))",
                "✓".green(),
                request.machine_name.bold(),
                profile.title,
                data.len()
            ),
            other => println!(
                "{} {}: {}",
                "✗".red(),
                request.machine_name.bold(),
                other.message().unwrap_or_default()
            ),
        },
        None => {
            let matches = app.installables_matching(request);
            if matches.is_empty() {
                println!("{} {} is not in the catalog", "✗".red(), request.machine_name.bold());
            }
            for installable in matches {
                println!(
                    "{} {} [{}.x] {}",
                    "→".cyan(),
                    installable.title.bold(),
                    installable.platform_version.major,
                    installable.link
                );
            }
        }
    }
}

/// SSH password from `RSI_PASSWORD`, or an interactive hidden prompt.
fn read_password(user: &str, host: &str) -> Result<String> {
    if let Ok(password) = dotenvy::var("RSI_PASSWORD") {
        return Ok(password);
    }
    dialoguer::Password::with_theme(&dialoguer::theme::ColorfulTheme::default())
        .with_prompt(format!("SSH password for {user}@{host}"))
        .interact()
        .context("reading password")
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "remote-site-installer", "remote-site-installer").map_or_else(
        || PathBuf::from(".remote-site-installer"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}
