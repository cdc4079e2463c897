//! codblog: command-line client for codblog sessions and live notifications.
//!
//! ## Subcommands
//!
//! - `login` / `register` / `logout` / `whoami` / `status`: session management
//! - `notifications`: list notifications and mark them read, unread, or deleted
//! - `watch`: stay connected and print notifications as they arrive

mod auth;
mod logging;
mod notifications;
mod watch;

use clap::{Parser, Subcommand, ValueEnum};
use codblog_core::notifications::NotificationTab;
use codblog_core::{ClientConfig, Result, SessionContext, StorageConfig};

#[derive(Parser)]
#[command(name = "codblog")]
#[command(about = "codblog session and notification client")]
#[command(version)]
struct Cli {
    /// API base URL (overrides config and CODBLOG_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    /// WebSocket base URL (overrides config and CODBLOG_WS_URL)
    #[arg(long, global = true, value_name = "URL")]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the credential pair
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "CODBLOG_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account
    Register {
        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "CODBLOG_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Revoke the refresh credential and clear local credentials
    Logout,

    /// Show the signed-in user as reported by the server
    Whoami,

    /// Print the resolved session state as JSON
    Status,

    /// Stay connected and print notifications until Ctrl-C
    Watch,

    /// List and act on notifications
    Notifications {
        #[command(subcommand)]
        command: NotificationsCommand,
    },
}

#[derive(Subcommand)]
enum NotificationsCommand {
    /// List notifications
    List {
        #[arg(long, value_enum, default_value_t = TabArg::All)]
        tab: TabArg,
    },

    MarkRead {
        id: u64,
    },

    MarkUnread {
        id: u64,
    },

    Delete {
        id: u64,
    },

    /// Mark every unread notification read
    MarkAllRead,
}

#[derive(Clone, Copy, ValueEnum)]
enum TabArg {
    All,
    General,
    Followers,
}

impl From<TabArg> for NotificationTab {
    fn from(tab: TabArg) -> Self {
        match tab {
            TabArg::All => NotificationTab::All,
            TabArg::General => NotificationTab::General,
            TabArg::Followers => NotificationTab::Followers,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let storage = match StorageConfig::from_env() {
        Ok(storage) => storage,
        Err(err) => {
            let _logging_guard = logging::init(None);
            tracing::error!(error = %err, "codblog could not resolve its storage directory");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };
    let _logging_guard = logging::init(Some(&storage.logs_dir()));

    if let Err(err) = run(cli, storage).await {
        tracing::error!(error = %err, "codblog command failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, storage: StorageConfig) -> Result<()> {
    let mut config = ClientConfig::load_with_env(&storage.config_file())?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(url) = cli.ws_url {
        config.ws_base_url = url;
    }
    let context = SessionContext::new(config, storage)?;

    match cli.command {
        Commands::Login { email, password } => auth::login(&context, &email, &password).await,
        Commands::Register {
            username,
            email,
            password,
        } => auth::register(&context, &username, &email, &password).await,
        Commands::Logout => auth::logout(&context).await,
        Commands::Whoami => auth::whoami(&context).await,
        Commands::Status => auth::status(&context).await,
        Commands::Watch => watch::run(&context).await,
        Commands::Notifications { command } => match command {
            NotificationsCommand::List { tab } => notifications::list(&context, tab.into()).await,
            NotificationsCommand::MarkRead { id } => {
                notifications::act(&context, id, codblog_protocol::NotificationAction::MarkRead)
                    .await
            }
            NotificationsCommand::MarkUnread { id } => {
                notifications::act(&context, id, codblog_protocol::NotificationAction::MarkUnread)
                    .await
            }
            NotificationsCommand::Delete { id } => {
                notifications::act(&context, id, codblog_protocol::NotificationAction::Delete)
                    .await
            }
            NotificationsCommand::MarkAllRead => notifications::mark_all_read(&context).await,
        },
    }
}
