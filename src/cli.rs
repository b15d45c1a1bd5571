use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use leadsniper::{
    api::{self, AppState},
    config::AppCfg,
    leads::LeadService,
    Orchestrator, RunRegistry, RunStatus, StepStatus,
};

#[derive(Debug, Parser)]
#[command(name = "leadsniper", version, about = "Lead discovery dashboard backend")]
pub struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(long, global = true, env = "LEADSNIPER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the dashboard HTTP API
    Serve {
        /// Overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Start one pipeline run and follow it until it ends
    Run {
        #[arg(long, default_value = "All")]
        trigger: String,
        #[arg(long, default_value = "all")]
        source: String,
        /// Status poll interval
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },
    /// Print leads, from the lead API when reachable
    Leads {
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let cfg = AppCfg::load(cli.config.as_deref()).await?;
    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let orchestrator = Orchestrator::new(Arc::new(RunRegistry::new()), cfg.pipeline)?;
            let leads = Arc::new(LeadService::from_cfg(&cfg.leads)?);
            api::serve(&bind, AppState::new(orchestrator, leads)).await
        }
        Command::Run { trigger, source, poll_ms } => {
            let orchestrator = Orchestrator::new(Arc::new(RunRegistry::new()), cfg.pipeline)?;
            follow_run(&orchestrator, &trigger, &source, Duration::from_millis(poll_ms.max(50))).await
        }
        Command::Leads { json } => {
            let svc = LeadService::from_cfg(&cfg.leads)?;
            let leads = svc.list_leads().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&leads)?);
            } else {
                for l in &leads {
                    println!("{:>3}  {:<24} {:<16} {:<9} {}", l.intent_score, l.company, l.trigger, l.source, l.inferred_pain);
                }
            }
            Ok(())
        }
    }
}

/// Polls a fresh run, printing new log lines, until it leaves `running`. Ctrl-C cancels it.
async fn follow_run(orch: &Orchestrator, trigger: &str, source: &str, every: Duration) -> Result<()> {
    let run_id = orch.start_run(trigger, source);
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );

    let mut printed = 0usize;
    let mut ticker = tokio::time::interval(every);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                orch.cancel_run(&run_id);
            }
        }

        let Some(st) = orch.get_run_status(&run_id) else {
            bail!("run {run_id} disappeared");
        };
        for line in &st.logs[printed..] {
            pb.println(format!("[{run_id}] {line}"));
        }
        printed = st.logs.len();
        pb.set_position(st.progress as u64);
        if let Some(step) = st.steps.iter().find(|s| s.status == StepStatus::Running) {
            pb.set_message(format!("{}: {}", step.name, step.log));
        }

        match st.status {
            RunStatus::Running => continue,
            RunStatus::Completed => {
                pb.finish_with_message("completed");
                return Ok(());
            }
            RunStatus::Error => {
                pb.abandon_with_message("cancelled");
                return Ok(());
            }
        }
    }
}
