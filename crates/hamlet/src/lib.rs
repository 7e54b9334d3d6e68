//! The Hamlet compilation pipeline.
//!
//! Wires the middle-end together: operator list to plan, cached-result
//! short-circuiting, rule rewriting, materialization planning, and code
//! emission, with the Markov bookkeeping that feeds the next run.

pub mod backend;
pub mod error;
pub mod script;

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use common::{Args, FileService, LocalFileService, Settings};
use dataflow::{DataflowPlan, OpKind, Operator};
use emitter::{emit_program, EmitConfig};
use materializer::MaterializationManager;
use profiler::{MarkovModel, END_NODE, START_NODE};
use rewrite::{rewrite_plan, RuleRegistry};

use crate::error::CompileError;

/// Everything a compilation needs, threaded explicitly instead of living in
/// process-wide singletons.
pub struct CompilerContext {
    pub args: Args,
    pub settings: Settings,
    pub fs: LocalFileService,
}

impl CompilerContext {
    pub fn new(args: Args, settings: Settings) -> Self {
        Self {
            args,
            settings,
            fs: LocalFileService,
        }
    }

    pub fn profiling(&self) -> bool {
        self.args.profiling_enabled()
    }
}

/// Result of one compilation: the emitted artifact and the updated model.
pub struct CompileOutcome {
    pub artifact: PathBuf,
    pub markov: MarkovModel,
}

/// Compile one operator list end to end.
pub fn compile(
    ctx: &CompilerContext,
    name: &str,
    mut ops: Vec<Operator>,
) -> Result<CompileOutcome, CompileError> {
    if ctx.profiling() {
        resolve_load_timestamps(ctx, &mut ops);
    }

    let mut plan = DataflowPlan::new(ops)?;
    plan.check_consistency()?;
    plan.check_schema_conformance()?;
    info!("constructed plan with {} operators", plan.operator_count());

    // Profile data is useful even on unprofiled runs (for materialization
    // decisions); its absence is never an error.
    let mut markov = MarkovModel::load(&ctx.settings.profiling_file).unwrap_or_else(|err| {
        warn!("ignoring unreadable profile: {}", err);
        MarkovModel::new()
    });

    let mut manager = MaterializationManager::new(ctx.settings.materialization.clone());
    match manager.load_cached(&mut plan, &ctx.fs) {
        Ok(n) if n > 0 => info!("short-circuited {} cached sub-plan(s)", n),
        Ok(_) => {}
        Err(err) => warn!("cache lookup failed, compiling from scratch: {}", err),
    }

    let mut registry = RuleRegistry::with_defaults();
    registry.register_backend_rules(ctx.args.backend);
    if ctx.profiling() {
        registry.register_profiling_rules();
    }
    rewrite_plan(&mut plan, &registry)?;

    if let Err(err) = manager.insert_points(&mut plan, &markov, epoch_millis()) {
        warn!("materialization planning failed, continuing: {}", err);
    }
    if let Err(err) = manager.save_catalogue() {
        warn!("could not persist the cache catalogue: {}", err);
    }

    if ctx.args.show_plan {
        println!("{}", plan);
    }

    record_run(&mut markov, &plan);

    let program = emit_program(
        &plan,
        &EmitConfig {
            name: name.to_string(),
            backend: ctx.args.backend,
            profiling_url: ctx.args.profiling.clone(),
        },
    )?;

    let outdir = ctx.args.outdir();
    fs::create_dir_all(&outdir)?;
    let artifact = outdir.join(format!("{}.scala", name));
    fs::write(&artifact, &program)?;
    info!("emitted {}", artifact.display());

    Ok(CompileOutcome { artifact, markov })
}

/// Embed each input file's modification time in its LOAD so that file edits
/// invalidate cached materializations.
fn resolve_load_timestamps(ctx: &CompilerContext, ops: &mut [Operator]) {
    for op in ops.iter_mut() {
        if let OpKind::Load {
            file,
            last_modified,
            ..
        } = op.kind_mut()
        {
            match ctx.fs.last_modified(file) {
                Ok(ts) => *last_modified = Some(ts),
                Err(err) => debug!("no modification time for {}: {}", file.display(), err),
            }
        }
    }
}

/// Record this compilation's operator transitions in the Markov model.
///
/// Timing and cache shims are lineage-transparent, so edges through them
/// collapse onto the wrapped operators; the shims themselves are skipped.
fn record_run(markov: &mut MarkovModel, plan: &DataflowPlan) {
    markov.start_run();
    for (idx, op) in plan.operators() {
        if matches!(op.kind(), OpKind::TimingOp { .. } | OpKind::Cache { .. }) {
            continue;
        }
        let signature = plan.signature_of(idx);
        if op.is_source() {
            markov.add(START_NODE, &signature);
        } else {
            for input in op.inputs() {
                if let Some(producer) = plan.find_operator_for_alias(input) {
                    markov.add(&plan.signature_of(producer), &signature);
                }
            }
        }
        if op.is_sink() {
            markov.add(&signature, END_NODE);
        }
    }
}

/// Fire the optional end-of-run webhook with a hard timeout.
pub fn notify_webhook(settings: &Settings, name: &str, success: bool) {
    let Some(url) = &settings.webhook_url else {
        return;
    };
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(settings.webhook_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            warn!("webhook client setup failed: {}", err);
            return;
        }
    };
    let result = client
        .get(url)
        .query(&[("job", name), ("success", if success { "1" } else { "0" })])
        .send();
    if let Err(err) = result {
        warn!("webhook notification failed: {}", err);
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
