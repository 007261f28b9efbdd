//! BIM Scoring CLI
//!
//! Operator interface over the scoring workflow:
//! - Authoring and submitting evidence (`evidence create|update|submit|list`)
//! - Reviewing evidence (`review`)
//! - Approving, rejecting and inspecting periods (`period approve|reject|status`)
//! - Inspecting and merging the local store (`store show|import`)
//!
//! Every read prints a trust banner saying whether the live backend or the
//! local cache served it.

use anyhow::{anyhow, Context, Result};
use bimscore_engine::config::parse_role;
use bimscore_engine::{
    Actor, DecisionRequest, EvidencePatch, NewEvidence, ReadOutcome, ReviewRequest,
    ScoringWorkflow, WorkflowConfig,
};
use bimscore_model::{
    normalize_evidence_type, normalize_review_outcome, ApprovalDecision, EvidenceContent,
    EvidenceType, Role,
};
use bimscore_store::StoreDocument;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser)]
#[command(name = "bimscore")]
#[command(author, version, about = "BIM scoring: evidence review and period approval")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// JSON config file (defaults to BIMSCORE_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the local store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Acting role: coordinator, reviewer, manager, admin
    #[arg(long, global = true)]
    role: Option<String>,
    /// Acting user id
    #[arg(long, global = true, default_value = "cli")]
    actor: String,
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,
    /// Log at debug level (BIMSCORE_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, edit, submit and list evidence.
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommands,
    },

    /// Record a review outcome on a submitted evidence item.
    Review {
        /// Evidence id
        evidence_id: String,
        /// ACCEPTABLE, NEEDS_REVISION or REJECTED (spelling is forgiving)
        #[arg(long)]
        outcome: String,
        #[arg(long)]
        reason: String,
    },

    /// Approve, reject or inspect a scoring period.
    Period {
        #[command(subcommand)]
        command: PeriodCommands,
    },

    /// Review-status counts for a scope.
    Counts {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Inspect or merge the local store.
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Args, Debug, Clone)]
struct ScopeArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    period: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct ContentArgs {
    /// FILE, URL or TEXT
    #[arg(long = "type")]
    kind: Option<String>,
    /// Generic URI: the view url of a FILE, the link of a URL, the body of a TEXT
    #[arg(long)]
    uri: Option<String>,
    #[arg(long)]
    view_url: Option<String>,
    #[arg(long)]
    download_url: Option<String>,
    #[arg(long)]
    reference_url: Option<String>,
    /// Body of a TEXT item
    #[arg(long)]
    text: Option<String>,
}

#[derive(Subcommand)]
enum EvidenceCommands {
    /// Create a DRAFT item.
    Create {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Indicator id (repeatable)
        #[arg(long = "indicator")]
        indicators: Vec<String>,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Edit a DRAFT, NEEDS_REVISION or REJECTED item.
    Update {
        evidence_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replacement indicator ids (repeatable)
        #[arg(long = "indicator")]
        indicators: Vec<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        period: Option<String>,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Submit an item for review.
    Submit { evidence_id: String },
    /// List items with their effective status.
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(Subcommand)]
enum PeriodCommands {
    /// APPROVE PERIOD: snapshot and lock.
    Approve {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        reason: String,
        /// Period version token (backend mode; defaults to the cached one)
        #[arg(long)]
        version: Option<i64>,
    },
    /// REJECT APPROVAL: record the decision, keep the period open.
    Reject {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        version: Option<i64>,
    },
    /// Lock, decisions, snapshot and counts.
    Status {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Print the local store document.
    Show,
    /// Merge a store exported from another machine.
    Import { input: PathBuf },
}

// ============================================================================
// Entry
// ============================================================================

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("BIMSCORE_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(global: &GlobalArgs) -> Result<WorkflowConfig> {
    let mut config = match &global.config {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::from_env()?,
    };
    if let Some(dir) = &global.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(role) = &global.role {
        let role = parse_role(role)?;
        if let Some(backend) = config.backend.as_mut() {
            backend.role = role;
        }
    }
    Ok(config)
}

fn actor(global: &GlobalArgs, config: &WorkflowConfig) -> Result<Actor> {
    let role = match &global.role {
        Some(role) => parse_role(role)?,
        None => config
            .backend
            .as_ref()
            .map_or(Role::Coordinator, |b| b.role),
    };
    Ok(Actor::new(global.actor.clone(), role))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let config = load_config(&cli.global)?;
    let actor = actor(&cli.global, &config)?;
    let workflow = ScoringWorkflow::from_config(&config)?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        backend = config.active_backend().map(|b| b.base_url.as_str()),
        actor = %actor.id,
        role = %actor.role,
        "workflow ready"
    );
    run(&workflow, &actor, &cli.global, cli.command).await
}

async fn run(wf: &ScoringWorkflow, actor: &Actor, global: &GlobalArgs, command: Commands) -> Result<()> {
    let json = global.json;
    match command {
        Commands::Evidence { command } => match command {
            EvidenceCommands::Create {
                scope,
                title,
                description,
                indicators,
                content,
            } => {
                let new = NewEvidence {
                    project_id: scope.project,
                    period_id: scope.period,
                    content: build_content(&content)?
                        .ok_or_else(|| anyhow!("--type and a payload (--uri, --text, ...) are required"))?,
                    title,
                    description,
                    indicator_ids: indicators,
                };
                let view = wf.create_evidence(actor, new).await?;
                if json {
                    print_json(&view)?;
                } else {
                    render::done("created", &view.item.id);
                    render::evidence_table(std::slice::from_ref(&view));
                }
            }
            EvidenceCommands::Update {
                evidence_id,
                title,
                description,
                indicators,
                project,
                period,
                content,
            } => {
                let patch = EvidencePatch {
                    title,
                    description,
                    indicator_ids: (!indicators.is_empty()).then_some(indicators),
                    content: build_content(&content)?,
                    project_id: project,
                    period_id: period,
                };
                let view = wf.update_evidence(actor, &evidence_id, patch).await?;
                if json {
                    print_json(&view)?;
                } else {
                    render::done("updated", &view.item.id);
                    render::evidence_table(std::slice::from_ref(&view));
                }
            }
            EvidenceCommands::Submit { evidence_id } => {
                let view = wf.submit_evidence(actor, &evidence_id).await?;
                if json {
                    print_json(&view)?;
                } else {
                    render::done("submitted", &view.item.id);
                }
            }
            EvidenceCommands::List { scope } => {
                let out = wf.list_evidence(&scope.project, scope.period.as_deref()).await;
                emit(json, &out, |views| render::evidence_table(views))?;
            }
        },

        Commands::Review {
            evidence_id,
            outcome,
            reason,
        } => {
            let outcome = normalize_review_outcome(&outcome)
                .ok_or_else(|| anyhow!("unknown review outcome `{outcome}`"))?;
            let applied = wf
                .review(
                    actor,
                    ReviewRequest {
                        evidence_id,
                        outcome,
                        reason,
                    },
                )
                .await?;
            if json {
                print_json(&applied)?;
            } else {
                render::done(
                    outcome.label(),
                    &format!(
                        "{} (now {})",
                        applied.evidence.item.id, applied.evidence.effective_status
                    ),
                );
            }
        }

        Commands::Period { command } => match command {
            PeriodCommands::Approve {
                scope,
                reason,
                version,
            } => decide(wf, actor, json, scope, ApprovalDecision::ApprovePeriod, reason, version).await?,
            PeriodCommands::Reject {
                scope,
                reason,
                version,
            } => decide(wf, actor, json, scope, ApprovalDecision::RejectApproval, reason, version).await?,
            PeriodCommands::Status { scope } => {
                let out = wf.period_summary(&scope.project, scope.period.as_deref()).await;
                emit(json, &out, render::period_summary)?;
            }
        },

        Commands::Counts { scope } => {
            let out = wf.counts(&scope.project, scope.period.as_deref()).await;
            emit(json, &out, render::counts)?;
        }

        Commands::Store { command } => match command {
            StoreCommands::Show => {
                let store = wf.local_store().load()?;
                print_json(&StoreDocument::new(store))?;
            }
            StoreCommands::Import { input } => {
                let raw = std::fs::read_to_string(&input)
                    .with_context(|| format!("failed to read {}", input.display()))?;
                let incoming = StoreDocument::decode(&raw);
                if incoming.is_empty() {
                    return Err(anyhow!("{} holds no store data", input.display()));
                }
                let merged = wf.import_store(&incoming)?;
                if json {
                    print_json(&StoreDocument::new(merged))?;
                } else {
                    render::done(
                        "imported",
                        &format!(
                            "{} evidence item(s), {} decision(s), {} lock(s)",
                            merged.evidence_items.len(),
                            merged.approval_decisions.len(),
                            merged.period_locks.len()
                        ),
                    );
                }
            }
        },
    }
    Ok(())
}

async fn decide(
    wf: &ScoringWorkflow,
    actor: &Actor,
    json: bool,
    scope: ScopeArgs,
    decision: ApprovalDecision,
    reason: String,
    version: Option<i64>,
) -> Result<()> {
    let outcome = wf
        .decide(
            actor,
            DecisionRequest {
                project_id: scope.project,
                period_id: scope.period,
                decision,
                reason,
                period_version: version,
            },
        )
        .await?;
    if json {
        return print_json(&outcome);
    }
    render::done(decision.label(), &outcome.decision.scope_key());
    if let Some(snapshot) = &outcome.snapshot {
        println!(
            "  {} snapshot {} score {:.2}",
            "→".cyan(),
            snapshot.snapshot_id.bold(),
            snapshot.final_bim_score
        );
    }
    render::counts(&outcome.counts);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Evidence payload from flags. `None` when no content flag was given.
fn build_content(args: &ContentArgs) -> Result<Option<EvidenceContent>> {
    let any_payload = args.uri.is_some()
        || args.view_url.is_some()
        || args.download_url.is_some()
        || args.reference_url.is_some()
        || args.text.is_some();
    let kind = match &args.kind {
        Some(raw) => normalize_evidence_type(raw).ok_or_else(|| anyhow!("unknown evidence type `{raw}`"))?,
        None if any_payload => return Err(anyhow!("--type is required with a payload flag")),
        None => return Ok(None),
    };
    let content = match kind {
        EvidenceType::File => EvidenceContent::File {
            view_url: args.view_url.clone().or_else(|| args.uri.clone()),
            download_url: args.download_url.clone(),
            reference_url: args.reference_url.clone(),
        },
        EvidenceType::Url => EvidenceContent::Url {
            external_url: args.uri.clone().unwrap_or_default(),
        },
        EvidenceType::Text => EvidenceContent::Text {
            text: args.text.clone().or_else(|| args.uri.clone()).unwrap_or_default(),
        },
    };
    Ok(Some(content))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a read: JSON including its mode, or a banner followed by `human`.
fn emit<T: Serialize>(json: bool, out: &ReadOutcome<T>, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        return print_json(out);
    }
    render::banner(out.mode, out.message.as_deref());
    human(&out.data);
    Ok(())
}
