//! Definición de argumentos (clap derive).
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use refine_domain::Pipeline;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "refine")]
#[command(about = "Flow lifecycle and batch execution for refining batches", long_about = None)]
pub struct Cli {
    /// JSON array with the template catalog
    #[arg(long, env = "REFINE_TEMPLATES", global = true)]
    pub templates: Option<PathBuf>,

    /// Acting user id
    #[arg(long, env = "REFINE_USER", default_value = "cli", global = true)]
    pub user: String,

    /// Acting user display name (defaults to the user id)
    #[arg(long, env = "REFINE_USERNAME", global = true)]
    pub username: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Flow definitions and their versions
    #[command(subcommand)]
    Flow(FlowCommand),
    /// Batch execution
    #[command(subcommand)]
    Batch(BatchCommand),
    /// Business hours between two RFC 3339 instants
    Hours {
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub struct FlowRef {
    #[arg(long = "flow")]
    pub flow_id: Uuid,
    #[arg(long)]
    pub version: u32,
}

#[derive(Subcommand, Debug)]
pub enum FlowCommand {
    /// Create a draft from a JSON definition file
    Import { file: PathBuf },
    Activate(FlowRef),
    Deactivate(FlowRef),
    Delete(FlowRef),
    /// Copy a version into a new draft
    NewVersion(FlowRef),
    /// Print one version, or every version when --version is omitted
    Show {
        #[arg(long = "flow")]
        flow_id: Uuid,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Print the active flow of a pipeline
    Active { pipeline: Pipeline },
}

#[derive(Subcommand, Debug)]
pub enum BatchCommand {
    Create {
        batch_number: String,
        #[arg(long)]
        pipeline: Pipeline,
    },
    /// Complete the current node of a batch
    Complete {
        batch_number: String,
        #[arg(long)]
        node: String,
        #[arg(long)]
        template: Option<String>,
        /// Step payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    Hold {
        batch_number: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Release { batch_number: String },
    Reassign {
        batch_number: String,
        #[arg(long)]
        to: String,
    },
    Show { batch_number: String },
    /// Replay the event log and compare with the stored batch
    Audit { batch_number: String },
}
