// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RelVal Control CLI
//!
//! Operator entry points for the submission engine.
//!
//! Usage:
//!   relval-ctl <command> [options]
//!
//! Commands:
//!   create-batch <json-file>      Create a batch request
//!   expand <batch_id>             Create runs for a batch request
//!   delete-batch <batch_id>       Delete a batch request without runs
//!   submit <run_id>               Submit a run and wait for the worker
//!   get-batch <batch_id>          Print a batch request
//!   get-run <run_id>              Print a run

use std::process::ExitCode;

use anyhow::Context;
use relval_core::RelvalRuntime;
use relval_core::config::Config;
use relval_core::model::{AUTOMATIC_USER, BatchRequest};
use tracing::{info, warn};

fn print_usage() {
    eprintln!(
        r#"Usage: relval-ctl <command> [options]

Drive RelVal batch expansion and run submission.

COMMANDS:
    create-batch <json-file>        Create a batch request from a JSON document
    expand <batch_id>               Create runs for a batch request
    delete-batch <batch_id>         Delete a batch request that has no runs
    submit <run_id>                 Submit a run and wait until it is processed
    get-batch <batch_id>            Print a batch request
    get-run <run_id>                Print a run

OPTIONS:
    --user <name>                   User recorded in history (default: $USER)

ENVIRONMENT:
    RELVAL_DATABASE_URL             Document store (default: sqlite:.data/relval.db?mode=rwc)
    RELVAL_GRID_USER_CERT           Grid certificate, PEM (required)
    RELVAL_GRID_USER_KEY            Grid key, PEM (required)
    RELVAL_REMOTE_HOST              Build host (default: lxplus.cern.ch)
    RELVAL_DEVELOPMENT              Development instance (default: false)

EXAMPLES:
    # Create a batch request and expand it
    relval-ctl create-batch ticket.json
    relval-ctl expand CMSSW_13_0_0__fullsim-00001

    # Submit one of the created runs
    relval-ctl submit CMSSW_13_0_0__fullsim-00001_11634_0 --user jdoe
"#
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    CreateBatch { file: String, user: String },
    Expand { prepid: String, user: String },
    DeleteBatch { prepid: String },
    Submit { prepid: String, user: String },
    GetBatch { prepid: String },
    GetRun { prepid: String },
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| AUTOMATIC_USER.to_string())
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args, default_user())
}

/// Parse `<command> <id> [--user <name>]`.
fn parse_target(args: &[String], what: &str, default_user: String) -> Result<(String, String), String> {
    let target = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .ok_or_else(|| format!("{} required", what))?
        .clone();
    let mut user = default_user;

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--user" => {
                i += 1;
                user = args.get(i).ok_or("--user requires a name")?.clone();
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    Ok((target, user))
}

fn parse_args_from_vec(args: &[String], default_user: String) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "create-batch" => {
            let (file, user) = parse_target(args, "JSON file", default_user)?;
            Ok(Command::CreateBatch { file, user })
        }
        "expand" => {
            let (prepid, user) = parse_target(args, "Batch ID", default_user)?;
            Ok(Command::Expand { prepid, user })
        }
        "delete-batch" => {
            let prepid = args.get(2).ok_or("Batch ID required")?.clone();
            Ok(Command::DeleteBatch { prepid })
        }
        "submit" => {
            let (prepid, user) = parse_target(args, "Run ID", default_user)?;
            Ok(Command::Submit { prepid, user })
        }
        "get-batch" => {
            let prepid = args.get(2).ok_or("Batch ID required")?.clone();
            Ok(Command::GetBatch { prepid })
        }
        "get-run" => {
            let prepid = args.get(2).ok_or("Run ID required")?.clone();
            Ok(Command::GetRun { prepid })
        }
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relval_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cmd: Command) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!(
        database = %config.database_url,
        remote_host = %config.remote_host,
        development = config.development,
        "Starting relval-ctl"
    );

    let runtime = RelvalRuntime::builder()
        .from_config(config)
        .await?
        .build()?
        .start()
        .await?;

    let result = execute_command(&runtime, cmd).await;
    // Waits for queued submissions to finish
    runtime.shutdown().await;
    result
}

async fn execute_command(runtime: &RelvalRuntime, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::CreateBatch { file, user } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let batch: BatchRequest = serde_json::from_str(&content)
                .with_context(|| format!("Invalid batch request in {}", file))?;
            let created = runtime.create_batch(batch, &user).await?;
            println!("{}", created.prepid);
        }

        Command::Expand { prepid, user } => {
            for run in runtime.expand_batch(&prepid, &user).await? {
                println!("{}", run);
            }
        }

        Command::DeleteBatch { prepid } => {
            runtime.delete_batch(&prepid).await?;
            println!("Deleted: {}", prepid);
        }

        Command::Submit { prepid, user } => {
            runtime.submit_run(&prepid, &user).await?;
            println!("Queued: {}", prepid);
        }

        Command::GetBatch { prepid } => {
            let batch = runtime.batches().get(&prepid).await?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }

        Command::GetRun { prepid } => {
            let run = runtime.runs().get(&prepid).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    fn parse(a: &[&str]) -> Result<Command, String> {
        parse_args_from_vec(&args(a), "operator".to_string())
    }

    #[test]
    fn test_parse_no_command() {
        assert_eq!(parse(&["relval-ctl"]).unwrap_err(), "No command specified");
    }

    #[test]
    fn test_parse_expand_with_default_user() {
        assert_eq!(
            parse(&["relval-ctl", "expand", "T-00001"]).unwrap(),
            Command::Expand {
                prepid: "T-00001".to_string(),
                user: "operator".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_submit_with_user() {
        assert_eq!(
            parse(&["relval-ctl", "submit", "R_1_0", "--user", "jdoe"]).unwrap(),
            Command::Submit {
                prepid: "R_1_0".to_string(),
                user: "jdoe".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(&["relval-ctl", "expand"]).unwrap_err(), "Batch ID required");
        assert_eq!(
            parse(&["relval-ctl", "expand", "--user", "jdoe"]).unwrap_err(),
            "Batch ID required"
        );
        assert_eq!(
            parse(&["relval-ctl", "submit", "R_1", "--user"]).unwrap_err(),
            "--user requires a name"
        );
        assert_eq!(
            parse(&["relval-ctl", "submit", "R_1", "--force"]).unwrap_err(),
            "Unknown argument: --force"
        );
        assert_eq!(
            parse(&["relval-ctl", "frobnicate"]).unwrap_err(),
            "Unknown command: frobnicate"
        );
    }

    #[test]
    fn test_parse_delete_batch() {
        assert_eq!(
            parse(&["relval-ctl", "delete-batch", "T-00001"]).unwrap(),
            Command::DeleteBatch {
                prepid: "T-00001".to_string(),
            }
        );
    }
}
