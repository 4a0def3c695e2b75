//! Activity Agent CLI
//!
//! Workstation activity monitoring with fake-activity detection.

use activity_agent::{
    backend::{BackendConfig, BlockingBackendClient},
    collector::{check_permission, Collector, CollectorConfig, ForegroundProbe},
    config::{Config, ConfigOverrides, LogoutAction},
    core::AgentSnapshot,
    session::{
        ensure_registered, AgentError, ExitReason, NoopSessionControl, SessionControl,
        SessionController, StopHandle, SystemSessionControl,
    },
    MONITORING_NOTICE, VERSION,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "activity-agent")]
#[command(version = VERSION)]
#[command(about = "Workstation activity monitoring agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring
    Start(StartArgs),

    /// Check that an employee id is registered with the collector
    Verify {
        /// Employee id to check
        employee_id: String,

        /// Collector base URL (overrides the config file)
        #[arg(long)]
        backend_url: Option<String>,
    },

    /// Show configuration
    Config,

    /// Forget the remembered employee id
    Forget,
}

#[derive(Args)]
struct StartArgs {
    /// Employee id (falls back to the remembered one)
    #[arg(long)]
    employee_id: Option<String>,

    /// Collector base URL
    #[arg(long)]
    backend_url: Option<String>,

    /// Seconds between activity reports
    #[arg(long)]
    send_interval: Option<u64>,

    /// Seconds of inactivity after which time counts as idle
    #[arg(long)]
    idle_threshold: Option<u64>,

    /// Seconds of inactivity that force a logout
    #[arg(long)]
    idle_logout: Option<u64>,

    /// Action on forced logout (lock, disconnect or logoff)
    #[arg(long)]
    logout_action: Option<LogoutAction>,

    /// Remember the employee id for the next start
    #[arg(long)]
    remember: bool,

    /// Log the logout action instead of performing it
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("activity_agent=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            cmd_start(args);
        }
        Commands::Verify {
            employee_id,
            backend_url,
        } => {
            cmd_verify(&employee_id, backend_url);
        }
        Commands::Config => {
            cmd_config();
        }
        Commands::Forget => {
            cmd_forget();
        }
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    })
}

fn build_client(config: &Config) -> BlockingBackendClient {
    match BlockingBackendClient::new(BackendConfig::from_config(config)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error creating backend client: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_start(args: StartArgs) {
    let stored = load_config();
    let config = stored.clone().merge(ConfigOverrides {
        backend_base_url: args.backend_url,
        send_interval_seconds: args.send_interval,
        idle_threshold_seconds: args.idle_threshold,
        idle_logout_seconds: args.idle_logout,
        suspicious_key_threshold: None,
        logout_action: args.logout_action,
    });
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let from_cli = args.employee_id.is_some();
    let remembered = stored
        .employee_id
        .clone()
        .filter(|_| stored.remember_me);
    let Some(employee_id) = args.employee_id.or(remembered) else {
        eprintln!("Error: No employee id given and none remembered.");
        eprintln!("Run 'activity-agent start --employee-id <ID> --remember' once.");
        std::process::exit(2);
    };

    println!("{MONITORING_NOTICE}");

    if !check_permission() {
        eprintln!("Warning: Input monitoring permission not granted; capture may fail.");
    }

    let transport = build_client(&config);
    match ensure_registered(&transport, &employee_id) {
        Ok(()) => println!("Employee {employee_id} verified."),
        Err(e) => {
            eprintln!("Error: {e}");
            if !from_cli && matches!(e, AgentError::Unregistered(_)) {
                let mut cleared = stored.clone();
                cleared.employee_id = None;
                cleared.remember_me = false;
                match cleared.save() {
                    Ok(()) => eprintln!("Cleared remembered employee id."),
                    Err(e) => eprintln!("Warning: Could not update config: {e}"),
                }
            }
            std::process::exit(1);
        }
    }

    if args.remember {
        let mut updated = stored.clone();
        updated.employee_id = Some(employee_id.clone());
        updated.remember_me = true;
        if let Err(e) = updated.save() {
            eprintln!("Warning: Could not save config: {e}");
        }
    }

    let session: Box<dyn SessionControl> = if args.dry_run {
        Box::new(NoopSessionControl::new())
    } else {
        Box::new(SystemSessionControl::new())
    };

    let mut controller = SessionController::new(
        employee_id.clone(),
        &config,
        Box::new(Collector::new(CollectorConfig::default())),
        Box::new(ForegroundProbe::new()),
        Box::new(transport),
        session,
        Utc::now(),
    );
    ctrlc_handler(controller.stop_handle());
    let accumulator = controller.accumulator();

    let session_id = uuid::Uuid::new_v4();
    let _span = tracing::info_span!("session", id = %session_id).entered();

    println!("Monitoring as {employee_id}");
    println!("  Collector: {}", config.backend_base_url);
    println!("  Send interval: {}s", config.send_interval_seconds);
    println!(
        "  Idle threshold: {}s, idle logout: {}s",
        config.idle_threshold_seconds, config.idle_logout_seconds
    );
    println!("  Logout action: {}", config.logout_action);
    println!();
    println!("Press Ctrl+C to stop.");
    println!();

    let exit = match controller.run() {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    print_summary(&accumulator.snapshot(Utc::now()), exit);

    if exit == ExitReason::Unregistered {
        std::process::exit(1);
    }
}

fn print_summary(snapshot: &AgentSnapshot, exit: ExitReason) {
    let totals = &snapshot.totals;
    let hours = snapshot.session_seconds / 3600;
    let minutes = (snapshot.session_seconds % 3600) / 60;
    let seconds = snapshot.session_seconds % 60;

    println!();
    println!("Session Summary");
    println!("===============");
    println!("  Employee: {}", snapshot.employee_id);
    println!("  Duration: {hours:02}:{minutes:02}:{seconds:02}");
    println!(
        "  Active: {}s, idle: {}s",
        totals.active_seconds, totals.idle_seconds
    );
    println!("  Key presses: {}", totals.keypresses);
    println!("  Mouse events: {}", totals.mouse_events());
    println!("  Window changes: {}", totals.window_changes);
    println!("  Suspicious flags: {}", totals.suspicious);
    println!("  Last send: {}", snapshot.last_send_label);
    println!("  Status: {}", snapshot.status_text);
    match exit {
        ExitReason::Stopped => println!("  Exit: stopped"),
        ExitReason::LoggedOut(reason) => println!("  Exit: logged out ({reason})"),
        ExitReason::Unregistered => println!("  Exit: employee not registered"),
    }
}

fn cmd_verify(employee_id: &str, backend_url: Option<String>) {
    let config = load_config().merge(ConfigOverrides {
        backend_base_url: backend_url,
        ..ConfigOverrides::default()
    });
    let transport = build_client(&config);

    match ensure_registered(&transport, employee_id) {
        Ok(()) => println!("Employee {employee_id} is registered."),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_forget() {
    let mut config = load_config();
    config.employee_id = None;
    config.remember_me = false;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Remembered employee id cleared.");
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(handle: StopHandle) {
    ctrlc::set_handler(move || {
        handle.stop();
    })
    .expect("Error setting Ctrl+C handler");
}
