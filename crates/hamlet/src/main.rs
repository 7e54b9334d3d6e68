use std::path::Path;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use common::{Args, Settings};
use hamlet::backend::{BackendRunner, ProcessRunner};
use hamlet::script::read_script;
use hamlet::{compile, notify_webhook, CompileOutcome, CompilerContext};
use profiler::Collector;

/// Time allowed for late collector messages after the job ends.
const QUIESCENCE: Duration = Duration::from_secs(3);

fn main() {
    // Initialize simple tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load();
    let params = args.param_map();
    let ctx = CompilerContext::new(args, settings);

    if ctx.args.sequential || ctx.args.scripts().len() == 1 {
        for script in ctx.args.scripts().to_vec() {
            let name = Args::script_name(&script);
            let ops = match read_script(Path::new(&script), &params) {
                Ok(ops) => ops,
                Err(err) => fail(&err),
            };
            match compile(&ctx, &name, ops) {
                Ok(outcome) => run_job(&ctx, &name, outcome),
                Err(err) => fail(&err),
            }
        }
    } else {
        // Merge all scripts into one plan.
        let mut ops = Vec::new();
        for script in ctx.args.scripts() {
            match read_script(Path::new(script), &params) {
                Ok(more) => ops.extend(more),
                Err(err) => fail(&err),
            }
        }
        let name = Args::script_name(&ctx.args.scripts()[0]);
        match compile(&ctx, &name, ops) {
            Ok(outcome) => run_job(&ctx, &name, outcome),
            Err(err) => fail(&err),
        }
    }
}

/// Submit the artifact unless compile-only; profiled runs bracket the job
/// with the collector and fold its observations back into the model.
fn run_job(ctx: &CompilerContext, name: &str, outcome: CompileOutcome) {
    let CompileOutcome { artifact, markov } = outcome;

    if ctx.args.compile_only {
        save_markov(ctx, &markov);
        info!("compiled {} (not submitted)", artifact.display());
        return;
    }

    let mut collector = None;
    if ctx.profiling() {
        match Collector::start(ctx.settings.collector_port, markov.clone()) {
            Ok(running) => collector = Some(running),
            Err(err) => {
                // Degrade to an unprofiled run, keeping the bookkeeping.
                error!("profiling collector failed to start: {}", err);
                save_markov(ctx, &markov);
            }
        }
    }

    let runner = ProcessRunner::new(ctx.args.backend);
    let status = runner.run(
        &artifact,
        &ctx.args.master,
        &ctx.args.param_map(),
        ctx.profiling(),
        ctx.args.mute_consumer,
    );

    if let Some(running) = collector {
        match running.stop(QUIESCENCE) {
            Ok(updated) => save_markov(ctx, &updated),
            Err(err) => error!("profiling collection failed: {}", err),
        }
    }

    match status {
        Ok(0) => {
            notify_webhook(&ctx.settings, name, true);
            info!("job {} finished", name);
        }
        Ok(code) => {
            notify_webhook(&ctx.settings, name, false);
            error!("job {} failed with status {}", name, code);
            process::exit(code);
        }
        Err(err) => fail(&err),
    }
}

/// Persist the model at the end of a compilation that had profiling on.
fn save_markov(ctx: &CompilerContext, markov: &profiler::MarkovModel) {
    if !ctx.profiling() {
        return;
    }
    if let Err(err) = markov.save(&ctx.settings.profiling_file) {
        error!("could not persist profile: {}", err);
    }
}

/// One-line diagnostic to stderr, full detail at debug level.
fn fail(err: &dyn std::error::Error) -> ! {
    debug!("{:?}", err);
    error!("{}", err);
    process::exit(1);
}
