//! hookrelay CLI binary entry point.

use std::collections::HashMap;

use clap::Parser;
use hookrelay::cli::{format_event, Cli, Commands, FireArgs, WatchArgs};
use hookrelay::config::{load_agents, RelayConfig};
use hookrelay::error::RelayError;
use hookrelay::store::SessionEvent;
use hookrelay::supervisor::RunSupervisor;
use hookrelay::types::{Agent, AgentId, SessionId, Status};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RelayConfig::from_env();

    let result = match cli.command {
        Commands::Fire(args) => handle_fire(config, args).await,
        Commands::Watch(args) => handle_watch(config, args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_fire(config: RelayConfig, args: FireArgs) -> Result<(), Box<dyn std::error::Error>> {
    let supervisor = RunSupervisor::from_config(config);
    let agent = Agent::builder()
        .id(AgentId::from("adhoc"))
        .name(args.name)
        .webhook_url(args.url)
        .method(args.method)
        .maybe_payload(args.payload)
        .build();
    supervisor.upsert_agent(agent.clone());

    // Subscribe first so no event of the new session is missed.
    let mut events = supervisor.subscribe();
    let session_id = supervisor.trigger(&agent.id).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !supervisor.stop(session_id) {
                    return finish(&supervisor, session_id);
                }
            }
            event = events.recv() => match event {
                Ok(event) if event.session_id() == session_id => {
                    if let Some(line) = format_event(&agent.name, &event) {
                        println!("{line}");
                    }
                    if matches!(event, SessionEvent::StatusChanged { status, .. } if status.is_terminal()) {
                        return finish(&supervisor, session_id);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => eprintln!("missed {missed} event(s)"),
                Err(RecvError::Closed) => return finish(&supervisor, session_id),
            },
        }
    }
}

fn finish(supervisor: &RunSupervisor, session_id: SessionId) -> Result<(), Box<dyn std::error::Error>> {
    match supervisor.session(session_id).map(|s| s.status) {
        Some(Status::Completed | Status::Cancelled) => Ok(()),
        Some(status) => Err(format!("run ended with status {status}").into()),
        None => Err(RelayError::UnknownSession(session_id).into()),
    }
}

async fn handle_watch(config: RelayConfig, args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let agents = load_agents(&args.agents)?;
    let supervisor = RunSupervisor::from_config(config);
    let mut events = supervisor.subscribe();

    let outcome = supervisor.set_agents(agents);
    for (agent_id, at) in supervisor.scheduler().pending() {
        eprintln!("armed {agent_id} for {}", at.to_rfc3339());
    }
    if !outcome.demoted.is_empty() {
        eprintln!("{} schedule(s) already passed", outcome.demoted.len());
    }

    for id in args.trigger {
        let agent_id = AgentId::from(id);
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if let Err(err) = supervisor.trigger(&agent_id).await {
                eprintln!("could not trigger {agent_id}: {err}");
            }
        });
    }

    let mut names: HashMap<SessionId, String> = HashMap::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let stopped = supervisor.stop_all();
                eprintln!("stopped {} running session(s)", stopped.len());
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let SessionEvent::Created { session_id, name, .. } = &event {
                        names.insert(*session_id, name.clone());
                        continue;
                    }
                    let name = names
                        .get(&event.session_id())
                        .cloned()
                        .unwrap_or_else(|| "system".to_string());
                    if let Some(line) = format_event(&name, &event) {
                        println!("{line}");
                    }
                    if let SessionEvent::Removed { session_id } = event {
                        names.remove(&session_id);
                    }
                }
                Err(RecvError::Lagged(missed)) => eprintln!("missed {missed} event(s)"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
