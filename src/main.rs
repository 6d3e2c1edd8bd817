use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bearer_relay::config::{load_config, print_schema};
use bearer_relay::navigation::LogNavigator;
use bearer_relay::surface::{ErrorSurface, LogNotifier};
use bearer_relay::utils::init_logging;
use bearer_relay::{ApiClient, ClassifiedError};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "bearer-relay",
    about = "Issue authenticated API calls with transparent credential renewal"
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "BEARER_RELAY_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Bearer credential to start with, as a login flow would install it
    #[arg(long, env = "BEARER_RELAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Get { path: String },
    Post { path: String, body: String },
    Put { path: String, body: String },
    Patch { path: String, body: String },
    Delete { path: String },
    /// Fetch a binary resource and save it into a directory
    Download {
        path: String,
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Print the JSON schema of the configuration file
    Schema,
}

fn parse_body(raw: &str) -> Result<Value, ClassifiedError> {
    serde_json::from_str(raw)
        .map_err(|e| ClassifiedError::unknown(format!("Body is not valid JSON: {}", e)))
}

async fn run(client: &ApiClient, command: Command) -> Result<(), ClassifiedError> {
    let output: Value = match command {
        Command::Get { path } => client.get(&path).await?,
        Command::Post { path, body } => client.post(&path, &parse_body(&body)?).await?,
        Command::Put { path, body } => client.put(&path, &parse_body(&body)?).await?,
        Command::Patch { path, body } => client.patch(&path, &parse_body(&body)?).await?,
        Command::Delete { path } => client.delete(&path).await?,
        Command::Download { path, dir } => {
            let download = client.download(&path).await?;
            let saved = download.save_to(&dir).await.map_err(|e| {
                ClassifiedError::unknown(format!("Could not save {}: {}", download.filename, e))
            })?;
            info!("Saved {}", saved.display());
            return Ok(());
        }
        Command::Schema => return Ok(()),
    };

    match serde_json::to_string_pretty(&output) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", output),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if matches!(args.command, Command::Schema) {
        return match print_schema() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error rendering schema: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let client = match ApiClient::from_config(&config, Arc::new(LogNavigator)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error creating client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(token) = args.token {
        client.session().login(token, None);
    }

    match run(&client, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let surface = ErrorSurface::new(Arc::new(LogNotifier));
            if let Some(fields) = surface.report(&err) {
                eprintln!("{}", err);
                for (field, messages) in fields {
                    eprintln!("  {}: {}", field, messages.join(", "));
                }
            }
            ExitCode::FAILURE
        }
    }
}
