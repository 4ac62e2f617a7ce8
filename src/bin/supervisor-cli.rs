use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "supervisor-cli")]
#[command(about = "Query a running tunnel-supervisor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8079")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lifecycle state and composite health
    Status,
    /// Composite health; exits 1 when not ready
    Health,
    /// Per-role state, pid and restart count
    Roles,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().no_proxy().build()?;
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/status", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            let ready = res.status().is_success();
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
            if !ready {
                std::process::exit(1);
            }
        }
        Commands::Roles => {
            let res = client.get(format!("{}/health", base)).send().await?;
            let json: Value = res.json().await?;
            print_roles(&json);
        }
    }

    Ok(())
}

fn print_roles(health: &Value) {
    println!("{:<20} {:<10} {:<6} {:>8} {:>9}", "ROLE", "STATE", "READY", "PID", "RESTARTS");
    let roles = health["roles"].as_array().cloned().unwrap_or_default();
    for role in roles {
        let pid = role["pid"].as_u64().map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<10} {:<6} {:>8} {:>9}",
            role["name"].as_str().unwrap_or("?"),
            role["state"].as_str().unwrap_or("?"),
            role["ready"].as_bool().unwrap_or(false),
            pid,
            role["restart_count"].as_u64().unwrap_or(0),
        );
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: supervisor returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
