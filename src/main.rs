use kvclerk::clerk::transport::TcpServerEnd;
use kvclerk::server::{serve, KvServer};
use kvclerk::utils::config::CONFIG;
use kvclerk::Clerk;
use log::info;
use std::env;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

enum Command {
    Get(String),
    Put(String, String),
    Append(String, String),
}

const USAGE: &str = "usage: kvclerk serve | get <key> | put <key> <value> | append <key> <value>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    kvclerk::utils::log::init(&CONFIG.log)?;

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["serve"] => run_server().await,
        ["get", key] => run_command(Command::Get(key.to_string())).await,
        ["put", key, value] => run_command(Command::Put(key.to_string(), value.to_string())).await,
        ["append", key, value] => {
            run_command(Command::Append(key.to_string(), value.to_string())).await
        }
        _ => Err(USAGE.into()),
    }
}

async fn run_server() -> Result<(), Box<dyn Error>> {
    let addr = env::var("PEER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let id = env::var("SERVER_ID").ok().and_then(|id| id.parse().ok()).unwrap_or(0);
    let leader = env::var("LEADER").map(|v| v == "true").unwrap_or(false);

    let listener = TcpListener::bind(&addr).await?;
    serve(Arc::new(KvServer::new(id, leader)), listener).await?;
    Ok(())
}

async fn run_command(command: Command) -> Result<(), Box<dyn Error>> {
    let config = &CONFIG.clerk;
    let ends: Vec<TcpServerEnd> = config
        .servers
        .iter()
        .map(|addr| TcpServerEnd::new(addr.clone(), config.rpc_timeout()))
        .collect();
    let clerk = Clerk::with_policy(ends, config.retry_policy())?;
    info!(target: "clerk", "clerk {} using {} servers", clerk.client_id(), clerk.server_count());

    let work = async move {
        match command {
            Command::Get(key) => match clerk.get(key).await {
                Some(value) => println!("{}", value),
                None => println!("(no such key)"),
            },
            Command::Put(key, value) => clerk.put(key, value).await,
            Command::Append(key, value) => clerk.append(key, value).await,
        }
    };

    match config.command_timeout() {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| format!("no definitive answer within {:?}", limit))?,
        None => work.await,
    }

    Ok(())
}
