//! Ejecución de subcomandos contra el motor sobre Postgres.
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use log::{debug, info};
use refine_core::{business_hours, BatchEngine, CachedTemplateCatalog, Clock, EngineConfig, InMemoryTemplateCatalog,
                  StepSubmission, SystemClock};
use refine_domain::{Actor, Flow, FlowEdge, FlowKey, FlowNode, Pipeline};
use refine_persistence::{build_pool_from_env, PgBatchStore, PgFlowStore, PoolProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::{BatchCommand, Cli, Command, FlowCommand, FlowRef};
use crate::error::CliError;

pub type CliEngine =
    BatchEngine<PgBatchStore<PoolProvider>, PgFlowStore<PoolProvider>, CachedTemplateCatalog<InMemoryTemplateCatalog>>;

/// Definición importable: sólo el grafo y su identidad de negocio.
#[derive(Debug, Deserialize)]
pub struct FlowDocument {
    pub name: String,
    pub pipeline: Pipeline,
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default)]
    pub entry_node_id: Option<String>,
}

impl FlowDocument {
    pub fn into_draft(self, created_by: &str, now: chrono::DateTime<chrono::Utc>) -> Flow {
        let mut flow = Flow::new_draft(self.name, self.pipeline, created_by, now);
        flow.nodes = self.nodes;
        flow.edges = self.edges;
        flow.entry_node_id = self.entry_node_id;
        flow
    }
}

#[derive(Serialize)]
struct HoursOutput {
    business_hours: u32,
}

pub fn load_templates(path: Option<&Path>) -> Result<InMemoryTemplateCatalog, CliError> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)?;
            let catalog = InMemoryTemplateCatalog::from_json_str(&raw)?;
            debug!("templates:loaded path={} count={}", p.display(), catalog.len());
            Ok(catalog)
        }
        None => Ok(InMemoryTemplateCatalog::new()),
    }
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(CliError::Usage("--payload must be a JSON object".into()));
    }
    Ok(value)
}

fn build_engine(cli: &Cli) -> Result<CliEngine, CliError> {
    let config = EngineConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let catalog = CachedTemplateCatalog::new(load_templates(cli.templates.as_deref())?,
                                             Duration::seconds(config.template_cache_ttl_secs as i64),
                                             clock.clone());
    let pool = build_pool_from_env()?;
    Ok(BatchEngine::builder(PgBatchStore::new(PoolProvider { pool: pool.clone() }),
                            PgFlowStore::new(PoolProvider { pool }),
                            catalog).clock(clock)
                                    .config(config)
                                    .build())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn key(r: FlowRef) -> FlowKey {
    FlowKey::new(r.flow_id, r.version)
}

pub fn run(cli: Cli) -> Result<(), CliError> {
    let actor = Actor::new(cli.user.clone(), cli.username.clone().unwrap_or_else(|| cli.user.clone()));
    match &cli.command {
        // no requiere base de datos
        Command::Hours { start, end } => print_json(&HoursOutput { business_hours: business_hours(*start, *end) }),
        Command::Flow(cmd) => run_flow(&build_engine(&cli)?, cmd, &actor),
        Command::Batch(cmd) => run_batch(&build_engine(&cli)?, cmd, &actor),
    }
}

fn run_flow(engine: &CliEngine, cmd: &FlowCommand, actor: &Actor) -> Result<(), CliError> {
    match cmd {
        FlowCommand::Import { file } => {
            let doc: FlowDocument = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            let draft = engine.create_flow_draft(doc.into_draft(&actor.user_id, engine.now()), actor)?;
            info!("flow imported key={}", draft.key());
            print_json(&draft)
        }
        FlowCommand::Activate(r) => {
            let archived = engine.activate_flow(key(*r), actor)?;
            print_json(&serde_json::json!({ "activated": key(*r), "archived": archived }))
        }
        FlowCommand::Deactivate(r) => {
            engine.deactivate_flow(key(*r), actor)?;
            print_json(&engine.flow(key(*r))?)
        }
        FlowCommand::Delete(r) => {
            engine.delete_flow(key(*r), actor)?;
            print_json(&serde_json::json!({ "deleted": key(*r) }))
        }
        FlowCommand::NewVersion(r) => print_json(&engine.new_flow_version(key(*r), actor)?),
        FlowCommand::Show { flow_id, version: Some(v) } => print_json(&engine.flow(FlowKey::new(*flow_id, *v))?),
        FlowCommand::Show { flow_id, version: None } => print_json(&engine.flow_versions(*flow_id)?),
        FlowCommand::Active { pipeline } => match engine.active_flow(pipeline)? {
            Some(flow) => print_json(&flow),
            None => Err(refine_core::CoreEngineError::NoActiveFlow(pipeline.clone()).into()),
        },
    }
}

fn run_batch(engine: &CliEngine, cmd: &BatchCommand, actor: &Actor) -> Result<(), CliError> {
    match cmd {
        BatchCommand::Create { batch_number, pipeline } => print_json(&engine.create_batch(batch_number, pipeline, actor)?),
        BatchCommand::Complete { batch_number,
                                 node,
                                 template,
                                 payload, } => {
            let mut submission = StepSubmission::new(node.clone(), parse_payload(payload)?);
            if let Some(t) = template {
                submission = submission.with_template(t.clone());
            }
            let (batch, outcome) = engine.complete_step(batch_number, &submission, actor)?;
            info!("step completed batch={} node={} next={:?}",
                  batch.batch_number, outcome.completed_node_id, outcome.next_node_id);
            print_json(&batch)
        }
        BatchCommand::Hold { batch_number, reason } => print_json(&engine.place_hold(batch_number, reason.clone(), actor)?),
        BatchCommand::Release { batch_number } => print_json(&engine.release_hold(batch_number, actor)?),
        BatchCommand::Reassign { batch_number, to } => print_json(&engine.reassign(batch_number, to, actor)?),
        BatchCommand::Show { batch_number } => print_json(&engine.batch_by_number(batch_number)?),
        BatchCommand::Audit { batch_number } => {
            let report = engine.audit(batch_number)?;
            print_json(&serde_json::json!({ "batch_number": batch_number,
                                            "consistent": report.is_consistent(),
                                            "mismatches": report.mismatches }))
        }
    }
}
