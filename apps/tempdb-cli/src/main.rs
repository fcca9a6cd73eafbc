use clap::{Parser, Subcommand, ValueEnum};
use tempdb::{
    create_database, database_exists, drop_database, kill_other_connections, with_admin_connection,
    DbUrl, Dialect, TempDbError, TemporaryDatabase,
};

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgresql,
    Mysql,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgresql => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create the database named in the url
    Create {
        url: String,
        /// Postgres template database to copy
        #[arg(long)]
        template: Option<String>,
        /// Drop any existing database first
        #[arg(long)]
        wipe: bool,
    },
    /// Drop the database named in the url, killing its connections
    Drop { url: String },
    /// Report whether the database named in the url exists
    Exists {
        url: String,
        /// Check by connecting and running `select 1`
        #[arg(long)]
        can_select: bool,
    },
    /// Terminate other connections on the server
    Kill {
        url: String,
        /// Only connections to this database
        #[arg(short, long)]
        database: Option<String>,
        /// Also terminate busy sessions, not just idle ones
        #[arg(long)]
        hard: bool,
    },
    /// Create a randomly named database and print its url. Without
    /// `--keep` the database lives until Ctrl-C and is then dropped.
    Temp {
        #[arg(value_enum)]
        dialect: DialectArg,
        /// Leave the database behind and exit immediately
        #[arg(long)]
        keep: bool,
    },
}

#[derive(Parser)]
#[command(name = "tempdb")]
#[command(about = "Create, inspect and drop throwaway test databases")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

async fn run(command: Command) -> Result<(), TempDbError> {
    match command {
        Command::Create {
            url,
            template,
            wipe,
        } => {
            let url = DbUrl::parse(&url)?;
            let created = create_database(&url, template.as_deref(), wipe).await?;
            println!("{}", if created { "created" } else { "exists" });
        }
        Command::Drop { url } => {
            let url = DbUrl::parse(&url)?;
            let dropped = drop_database(&url).await?;
            println!("{}", if dropped { "dropped" } else { "absent" });
        }
        Command::Exists { url, can_select } => {
            let url = DbUrl::parse(&url)?;
            println!("{}", database_exists(&url, can_select).await?);
        }
        Command::Kill {
            url,
            database,
            hard,
        } => {
            let url = DbUrl::parse(&url)?;
            let killed = with_admin_connection(&url, move |admin| {
                Box::pin(async move {
                    kill_other_connections(admin.connection(), database.as_deref(), hard).await
                })
            })
            .await?;
            println!("killed {killed}");
        }
        Command::Temp { dialect, keep } => {
            let mut db = TemporaryDatabase::create(dialect.into()).await?;
            if keep {
                db.keep();
            }
            // Print the real url: the caller needs the password to connect.
            println!("{}", db.url().to_connection_string());
            let waited = if keep {
                Ok(())
            } else {
                eprintln!("press Ctrl-C to drop the database");
                tokio::signal::ctrl_c().await
            };
            // Drop the database even if the signal handler failed to install.
            db.close().await?;
            waited?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tempdb=info,sqlx=warn")),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if e.use_stderr() {
                eprintln!("{e}");
                std::process::exit(2);
            }
            // --help / --version
            print!("{e}");
            std::process::exit(0);
        }
    };

    if let Err(e) = run(args.command).await {
        eprintln!("tempdb failed: {e}");
        std::process::exit(1);
    }
}
