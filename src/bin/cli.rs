use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use mindmirror_rest_api::api;
use mindmirror_rest_api::client::{self, CreateMilestoneRequest, CreateTaskRequest, RegisterRequest, UpdateTaskRequest};
use mindmirror_rest_api::config::ServerConfig;
use mindmirror_rest_api::TaskStatus;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[command(flatten)]
        config: ServerConfig,
    },
    /// Client commands
    Client {
        /// The base URL of the API
        #[arg(long, default_value = mindmirror_rest_api::BASE_URL)]
        url: String,
        /// Bearer token from `client login`
        #[arg(long, env = "MINDMIRROR_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[command(subcommand)]
        command: ClientCommands,
    },
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Create an account
    Register {
        username: String,
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and print an access token
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Journal entry commands
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },
    /// Milestone and task commands
    Milestones {
        #[command(subcommand)]
        command: MilestoneCommands,
    },
}

#[derive(Subcommand)]
enum JournalCommands {
    /// Write a new entry
    Create {
        text: String,
        /// Entry date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List entries, oldest first
    List {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Show one entry
    Get { id: i32 },
    /// Replace an entry's text
    Update { id: i32, text: String },
    /// Delete an entry
    Delete { id: i32 },
    /// Mood score per entry date
    Mood {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Most frequent key phrases
    Trends {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Entries containing a keyword
    Search { keyword: String },
    /// Group entries by theme
    Cluster {
        #[arg(long, default_value_t = 3)]
        n_clusters: usize,
    },
}

#[derive(Subcommand)]
enum MilestoneCommands {
    /// Create a milestone
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// List milestones with their tasks
    List,
    /// Show one milestone
    Get { id: i32 },
    /// Delete a milestone and its tasks
    Delete { id: i32 },
    /// Add a task to a milestone
    AddTask {
        milestone_id: i32,
        description: String,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// Mark a task completed
    Complete { milestone_id: i32, task_id: i32 },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_client(url: &str, token: Option<String>, command: ClientCommands) -> anyhow::Result<()> {
    let token = || token.clone().context("a token is required: pass --token or set MINDMIRROR_TOKEN");

    match command {
        ClientCommands::Register {
            username,
            email,
            password,
        } => {
            let request = RegisterRequest {
                username,
                email,
                password,
            };
            print_json(&client::register(url, &request).await?)
        }
        ClientCommands::Login { username, password } => {
            let session = client::login(url, &username, &password).await?;
            println!("{}", session.token);
            Ok(())
        }
        ClientCommands::Journal { command } => {
            let token = token()?;
            match command {
                JournalCommands::Create { text, date } => {
                    print_json(&client::create_entry(url, &token, &text, date).await?)
                }
                JournalCommands::List { start, end } => {
                    print_json(&client::fetch_entries(url, &token, start, end).await?)
                }
                JournalCommands::Get { id } => print_json(&client::fetch_entry(url, &token, id).await?),
                JournalCommands::Update { id, text } => {
                    print_json(&client::update_entry(url, &token, id, &text).await?)
                }
                JournalCommands::Delete { id } => {
                    client::delete_entry(url, &token, id).await?;
                    Ok(())
                }
                JournalCommands::Mood { start, end } => {
                    print_json(&client::fetch_mood_data(url, &token, start, end).await?)
                }
                JournalCommands::Trends { limit } => {
                    print_json(&client::fetch_trends(url, &token, limit).await?)
                }
                JournalCommands::Search { keyword } => {
                    print_json(&client::search_by_keyword(url, &token, &keyword).await?)
                }
                JournalCommands::Cluster { n_clusters } => {
                    print_json(&client::cluster_entries(url, &token, n_clusters).await?)
                }
            }
        }
        ClientCommands::Milestones { command } => {
            let token = token()?;
            match command {
                MilestoneCommands::Create {
                    title,
                    description,
                    due,
                } => {
                    let request = CreateMilestoneRequest {
                        title,
                        description,
                        due_date: due,
                    };
                    print_json(&client::create_milestone(url, &token, &request).await?)
                }
                MilestoneCommands::List => print_json(&client::fetch_milestones(url, &token).await?),
                MilestoneCommands::Get { id } => {
                    print_json(&client::fetch_milestone(url, &token, id).await?)
                }
                MilestoneCommands::Delete { id } => {
                    client::delete_milestone(url, &token, id).await?;
                    Ok(())
                }
                MilestoneCommands::AddTask {
                    milestone_id,
                    description,
                    due,
                } => {
                    let request = CreateTaskRequest {
                        description,
                        due_date: due,
                    };
                    print_json(&client::create_task(url, &token, milestone_id, &request).await?)
                }
                MilestoneCommands::Complete {
                    milestone_id,
                    task_id,
                } => {
                    let request = UpdateTaskRequest {
                        status: Some(TaskStatus::Completed),
                        ..Default::default()
                    };
                    print_json(&client::update_task(url, &token, milestone_id, task_id, &request).await?)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let state = config.build_state()?;
            let listener = tokio::net::TcpListener::bind(config.addr)
                .await
                .with_context(|| format!("failed to bind {}", config.addr))?;
            info!(addr = %config.addr, defer_analysis = config.defer_analysis, "starting server");
            api::serve(listener, state).await?;
        }
        Commands::Client {
            url,
            token,
            command,
        } => run_client(&url, token, command).await?,
    }

    Ok(())
}
