use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use hive::agent::{AgentId, AgentProfile};
use hive::config::Config;
use hive::core::TaskSpec;
use hive::orchestration::{AgentWorkload, StealOperation, WorkloadStats};
use hive::{Hive, Result};

/// Hive - task and workflow engine with a work-stealing load balancer
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HIVE_DEBUG=1    Enable debug logging (alternative to --debug)\n    RUST_LOG        Override the log filter")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.hive/hive.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file to use instead of ~/.hive/hive.toml
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the effective configuration as TOML
    Config {
        /// Write the effective configuration back to the config file
        #[arg(long)]
        save: bool,
    },

    /// Queue work on one agent and let the balancer spread it
    Simulate {
        /// Number of agents to register
        #[arg(long, default_value_t = 4)]
        agents: usize,

        /// Number of tasks queued on the first agent
        #[arg(long, default_value_t = 20)]
        tasks: usize,

        /// Rebalance passes to run
        #[arg(long, default_value_t = 3)]
        passes: usize,
    },
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    stats: WorkloadStats,
    workloads: Vec<AgentWorkload>,
    operations: Vec<StealOperation>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

async fn simulate(config: Config, agents: usize, tasks: usize, passes: usize) -> Result<()> {
    let hive = Hive::new(config);
    hive.start().await;

    let profiles: Vec<AgentProfile> = (0..agents.max(2))
        .map(|i| AgentProfile::new(format!("agent-{}", i)).with_capabilities(["general"]))
        .collect();
    for profile in &profiles {
        hive.register_agent(profile).await;
    }

    let loaded = &profiles[0].id;
    for i in 0..tasks {
        let task = hive
            .scheduler()
            .create_task(TaskSpec::new("simulated", &format!("task {}", i)).with_priority((i % 101) as u8))
            .await?;
        hive.scheduler().assign_task(&task.id, loaded.clone()).await?;
    }
    wait_for_count(&hive, loaded, tasks).await;

    for pass in 0..passes {
        if let Some(ops) = hive.coordinator().check_and_steal().await {
            info!(pass, operations = ops.len(), "Simulation pass");
        }
        // Let the event pump apply and confirm the steals.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let report = SimulationReport {
        stats: hive.coordinator().get_workload_stats().await,
        workloads: agent_workloads(&hive, &profiles).await,
        operations: hive.coordinator().get_steal_operations().await,
    };
    hive.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn wait_for_count(hive: &Hive, agent_id: &AgentId, expected: usize) {
    for _ in 0..100 {
        match hive.coordinator().get_workload(agent_id).await {
            Ok(workload) if workload.task_count >= expected => return,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
}

async fn agent_workloads(hive: &Hive, profiles: &[AgentProfile]) -> Vec<AgentWorkload> {
    let mut workloads = Vec::with_capacity(profiles.len());
    for profile in profiles {
        if let Ok(workload) = hive.coordinator().get_workload(&profile.id).await {
            workloads.push(workload);
        }
    }
    workloads
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = hive::log::init_with_debug(cli.debug);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Config { save } => {
            if save {
                match &cli.config {
                    Some(path) => config.save_to(path)?,
                    None => config.save()?,
                }
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Simulate {
            agents,
            tasks,
            passes,
        } => simulate(config, agents, tasks, passes).await?,
    }
    Ok(())
}
