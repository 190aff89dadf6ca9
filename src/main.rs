#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use vinepress::config::{PrefixConfiguration, SettingsStore};
use vinepress::environment::host_environment;
use vinepress::errors::find_presentable;
use vinepress::hardware::LspciProber;
use vinepress::launcher::ProductLauncher;
use vinepress::main_loop::{LoopExit, MainLoop};
use vinepress::net::HttpFetcher;
use vinepress::process::{LogDirectory, ProcessRunner};
use vinepress::products::{PrefixHint, Product};
use vinepress::recipes::{Recipe, RecipeContext, RecipeTask};
use vinepress::resolve::{ensure_first_time_setup, find_prefix, resolve_for_product, resolve_prefix, run_first_time_setup};
use vinepress::wine::{Prefix, PrefixContext};

#[derive(Parser, Debug)]
#[command(name = "vinepress", version, about = "Wine prefix manager for Roblox")]
struct Cli {
    /// Log at debug level regardless of LOG_LEVEL
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch the player, optionally with a roblox-player: URI
    Player { uri: String },
    /// Launch Studio; without a URI the IDE is opened
    Studio { uri: Option<String> },
    /// Launch the desktop app
    App,
    FirstTimeSetup,
    /// List configured prefixes in resolution order
    Prefixes,
    /// Change one prefix setting; the value is JSON
    Set { prefix_id: String, key: String, value: String },
    Dxvk {
        prefix_id: String,
        #[command(subcommand)]
        action: DxvkAction,
    },
    /// Apply the edge update recipe matching the prefix's setting
    EdgeUpdate { prefix_id: String },
    Webview2 { prefix_id: String },
    KillWineserver { prefix_id: String },
    /// Show processes running in the prefix resolved for a hint
    Top { hint: PrefixHint },
    /// Migrate the settings document to a schema version
    Migrate { version: u32 },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum DxvkAction {
    Install,
    Uninstall,
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose {
        TraceLevel::DEBUG
    } else {
        match std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => TraceLevel::TRACE,
            "debug" => TraceLevel::DEBUG,
            "warn" => TraceLevel::WARN,
            "error" => TraceLevel::ERROR,
            _ => TraceLevel::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

/// Everything a command needs after the settings are loaded
struct Session {
    store: SettingsStore,
    context: PrefixContext,
}

impl Session {
    fn load(settings: Option<PathBuf>) -> Result<Self> {
        let prober = LspciProber;
        let mut store = SettingsStore::load(settings.unwrap_or_else(SettingsStore::default_path), &prober)?;

        let hardware_profile = match store.hardware_profile(&prober) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Continuing without a hardware profile");
                None
            }
        };

        let context = PrefixContext {
            host: host_environment(),
            hardware_profile,
            runner: ProcessRunner::new(LogDirectory::default_location()),
            assets: PrefixContext::default_assets_directory(),
            prefixes_root: PrefixContext::default_prefixes_directory(),
            default_wine_home: store.document().default_wine_home.clone(),
        };

        Ok(Self { store, context })
    }

    fn open(&self, configuration: &PrefixConfiguration) -> Result<Prefix> {
        Prefix::open(configuration.clone(), &self.context)
    }

    fn open_by_id(&self, id: &str) -> Result<Prefix> {
        let configuration = find_prefix(self.store.document(), id)?;
        self.open(configuration)
    }

    fn open_for_product(&mut self, product: Product) -> Result<Prefix> {
        ensure_first_time_setup(&mut self.store)?;
        let configuration = resolve_for_product(self.store.document(), product)?;
        info!(product = %product, prefix = %configuration.display_name, "Resolved prefix");
        self.open(configuration)
    }

    fn main_loop(&self) -> Result<MainLoop> {
        let mut main_loop = MainLoop::new(self.context.runner.clone())?;
        #[cfg(unix)]
        main_loop.install_signal_handlers()?;
        Ok(main_loop)
    }
}

fn launch(session: &mut Session, product: Product, uri: Option<String>) -> Result<()> {
    let mut prefix = session.open_for_product(product)?;
    let mut main_loop = session.main_loop()?;
    let fetcher = HttpFetcher::new();
    let ctx = RecipeContext { fetcher: &fetcher };

    let mut launcher = ProductLauncher::new(&mut prefix);
    let installed = match product {
        Product::Studio => launcher.locate_all_executables(vinepress::constants::product::STUDIO_LAUNCHER),
        Product::Player | Product::App => {
            launcher.locate_all_executables(vinepress::constants::product::PLAYER_LAUNCHER)
        }
    };

    if installed.is_empty() {
        info!(product = %product, "Product is not installed, running the installer");
        launcher.install(main_loop.supervisor_mut(), &fetcher, None)?;
        if main_loop.run_until_idle() == LoopExit::Quit {
            return Ok(());
        }
    }

    match product {
        Product::Player => {
            launcher.run_player(main_loop.supervisor_mut(), ctx, uri.as_deref().unwrap_or_default())?;
        }
        Product::Studio => {
            let ide = uri.is_none();
            launcher.run_studio(main_loop.supervisor_mut(), ctx, uri.as_deref(), ide)?;
        }
        Product::App => {
            launcher.launch_app(main_loop.supervisor_mut(), ctx)?;
        }
    }

    main_loop.run_until_idle();
    Ok(())
}

fn run_recipe(session: &mut Session, prefix_id: &str, recipe: Recipe) -> Result<()> {
    let prefix = session.open_by_id(prefix_id)?;
    let mut main_loop = session.main_loop()?;
    let (updated_tx, updated_rx) = mpsc::channel();

    main_loop.spawn_task(Box::new(RecipeTask::new(
        recipe,
        prefix,
        Box::new(HttpFetcher::new()),
        updated_tx,
    )));
    main_loop.run_until_idle();

    for report in main_loop.take_task_reports() {
        report.into_result()?;
    }

    for configuration in updated_rx.try_iter() {
        session.store.save_prefix(configuration)?;
    }
    Ok(())
}

fn list_prefixes(session: &Session) {
    let mut prefixes: Vec<&PrefixConfiguration> = session.store.document().wineprefixes.iter().collect();
    prefixes.sort_by_key(|prefix| prefix.sort_priority());

    for prefix in prefixes {
        let hints: Vec<&str> = prefix.hints.iter().map(PrefixHint::as_str).collect();
        println!(
            "{:>4}  {}  {}  [{}]",
            prefix.priority.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            prefix.id,
            prefix.display_name,
            hints.join(", ")
        );
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut session = Session::load(cli.settings)?;

    match cli.command {
        Command::Player { uri } => launch(&mut session, Product::Player, Some(uri)),
        Command::Studio { uri } => launch(&mut session, Product::Studio, uri),
        Command::App => launch(&mut session, Product::App, None),
        Command::FirstTimeSetup => run_first_time_setup(&mut session.store),
        Command::Prefixes => {
            list_prefixes(&session);
            Ok(())
        }
        Command::Set { prefix_id, key, value } => {
            let value: Value =
                serde_json::from_str(&value).with_context(|| format!("'{}' is not a JSON value", value))?;
            session.store.set_prefix_setting(&prefix_id, &key, value)
        }
        Command::Dxvk { prefix_id, action } => {
            let recipe = match action {
                DxvkAction::Install => Recipe::InstallDxvk,
                DxvkAction::Uninstall => Recipe::UninstallDxvk,
            };
            run_recipe(&mut session, &prefix_id, recipe)
        }
        Command::EdgeUpdate { prefix_id } => {
            let disable = find_prefix(session.store.document(), &prefix_id)?.disable_edge_update;
            run_recipe(&mut session, &prefix_id, Recipe::edge_update_for(disable))
        }
        Command::Webview2 { prefix_id } => run_recipe(&mut session, &prefix_id, Recipe::InstallWebview2),
        Command::KillWineserver { prefix_id } => session.open_by_id(&prefix_id)?.kill_runtime_server(),
        Command::Top { hint } => {
            let configuration = resolve_prefix(session.store.document(), &[hint])?;
            for process in session.open(configuration)?.process_list()? {
                println!("{:>8}  {:>3}  {}", process.pid, process.threads, process.image);
            }
            Ok(())
        }
        Command::Migrate { version } => session.store.perform_migrations(version),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match find_presentable(&e) {
                Some(presentable) => {
                    error!(error = ?e, "Command failed");
                    eprintln!("{}\n\n{}", presentable.title, presentable.description);
                }
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
