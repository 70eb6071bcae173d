//! Pipeline Driver
//!
//! Plans a topological order over the recipe, owns the run directory and
//! state files, executes stages in-process, stamps their outputs, and
//! routes final artifacts. One run, one book, one process; stages talk to
//! each other only through artifacts on disk.
//!
//! Run directory layout:
//! ```text
//! <output-dir>/<run_id>/
//!   pipeline_state.json
//!   pipeline_events.jsonl
//!   instrumentation.json
//!   NN_<module_id>/<artifact>
//!   output/gamebook.json
//!   output/validation_report.json
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

use crate::core::artifact::{stamp_artifact, ArtifactError, ArtifactStore};
use crate::core::instrument::{Instrumentation, StageMeter};
use crate::core::llm::{ChatProvider, LlmService, LlmServiceConfig, OpenAiCompatProvider};
use crate::core::stamp::Stamp;

use super::recipe::{Recipe, RecipeError, StageSpec};
use super::stage::{BookConfig, InputResolver, StageContext, StageOutcome, StageParams};
use super::state::{EventLog, PipelineState, RunStatus, StageStatus};
use super::stage_registry;

pub const INSTRUMENTATION: &str = "instrumentation.json";

// ============================================================================
// Options & Errors
// ============================================================================

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub recipe_path: PathBuf,
    pub run_id: String,
    pub output_dir: PathBuf,
    pub input_pdf: Option<PathBuf>,
    pub force: bool,
    pub allow_run_id_reuse: bool,
    pub start_from: Option<String>,
    pub dry_run: bool,
}

/// Setup-time failures: all of these are exit code 2 territory.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("stage {stage} references unknown module {module}")]
    UnknownModule { stage: String, module: String },

    #[error("--start-from names unknown stage {0}")]
    UnknownStartStage(String),

    #[error("run id {0} already exists; pass --force or --allow-run-id-reuse")]
    RunIdReuse(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// What a finished (or halted) run looks like.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_status: RunStatus,
    pub failed_stage: Option<String>,
    pub gate_failed: bool,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.run_status {
            RunStatus::Success => 0,
            _ => 1,
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> DriverError {
    DriverError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Driver
// ============================================================================

pub async fn run(options: &DriverOptions) -> Result<RunOutcome> {
    let recipe = Recipe::load(&options.recipe_path)?;
    let plan: Vec<StageSpec> = recipe.plan()?.into_iter().cloned().collect();

    let registry = stage_registry();
    for spec in &plan {
        if !registry.contains_key(spec.module_id.as_str()) {
            return Err(DriverError::UnknownModule {
                stage: spec.id.clone(),
                module: spec.module_id.clone(),
            });
        }
    }
    if let Some(start_from) = &options.start_from {
        if !plan.iter().any(|s| &s.id == start_from) {
            return Err(DriverError::UnknownStartStage(start_from.clone()));
        }
    }

    let run_dir = options.output_dir.join(&options.run_id);
    let stage_dirs: HashMap<String, PathBuf> = plan
        .iter()
        .enumerate()
        .map(|(i, s)| {
            (
                s.id.clone(),
                run_dir.join(format!("{:02}_{}", i + 1, s.module_id)),
            )
        })
        .collect();

    if options.dry_run {
        println!("plan for run {} in {}:", options.run_id, run_dir.display());
        for spec in &plan {
            println!(
                "  {} ({}) -> {}",
                spec.id,
                spec.module_id,
                stage_dirs[&spec.id].display()
            );
        }
        return Ok(RunOutcome {
            run_status: RunStatus::Success,
            failed_stage: None,
            gate_failed: false,
        });
    }

    let mut state = prepare_run_dir(options, &run_dir, &plan, &stage_dirs)?;
    let output_dir = run_dir.join("output");
    std::fs::create_dir_all(&output_dir).map_err(|e| io_err(&output_dir, e))?;
    state.save(&run_dir)?;
    let events = EventLog::new(&run_dir);
    events.record("run_started", None, format!("{} stages planned", plan.len()))?;

    let providers = build_providers(&recipe);
    let mut resolver = InputResolver::default();
    for (name, path) in &recipe.inputs {
        resolver.register(name, path.clone());
    }
    if let Some(pdf) = &options.input_pdf {
        resolver.register("input.pdf", pdf.clone());
    }

    let progress = ProgressBar::new(plan.len() as u64).with_style(
        ProgressStyle::with_template("{prefix:>24} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut gate_failed = false;
    let failed_stage: Option<String> = None;

    for spec in &plan {
        progress.set_prefix(spec.id.clone());
        let stage_dir = stage_dirs[&spec.id].clone();

        if state.stage(&spec.id).map(|s| s.status) == Some(StageStatus::Done) {
            register_dir_artifacts(&mut resolver, &stage_dir);
            register_dir_artifacts(&mut resolver, &output_dir);
            progress.inc(1);
            continue;
        }

        std::fs::create_dir_all(&stage_dir).map_err(|e| io_err(&stage_dir, e))?;
        state.mark(&spec.id, StageStatus::Running);
        state.save(&run_dir)?;
        events.record("stage_started", Some(&spec.id), spec.module_id.as_str())?;
        info!(stage = %spec.id, module = %spec.module_id, "stage started");

        let stage_impl = Arc::clone(&registry[spec.module_id.as_str()]);
        let ctx = build_context(
            options,
            &recipe,
            spec,
            &stage_dir,
            &output_dir,
            &resolver,
            &stage_dirs,
            &providers,
        );

        let started = Instant::now();
        let result = stage_impl.run(&ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let written = ctx.store.written();

        Instrumentation::record(
            &run_dir.join(INSTRUMENTATION),
            &spec.id,
            ctx.meter.finish(elapsed_ms),
        )?;

        match result {
            Ok(outcome) => {
                let schema = spec
                    .output_schema
                    .clone()
                    .unwrap_or_else(|| stage_impl.output_schema().to_string());
                let stamp = Stamp::new(&schema, &spec.module_id, &options.run_id);
                for path in &written {
                    stamp_artifact(path, &stamp)?;
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        resolver.register(name, path.clone());
                    }
                }
                state.mark(&spec.id, StageStatus::Done);
                state.save(&run_dir)?;
                match outcome {
                    StageOutcome::Done => {
                        events.record("stage_done", Some(&spec.id), format!("{elapsed_ms}ms"))?;
                    }
                    StageOutcome::GateFailed => {
                        // The stage completed and its artifacts stand, but
                        // the run cannot be called a success.
                        gate_failed = true;
                        events.record(
                            "gate_failed",
                            Some(&spec.id),
                            "game-ready gate did not pass",
                        )?;
                    }
                }
            }
            Err(e) => {
                error!(stage = %spec.id, error = %e, "stage failed");
                state.mark(&spec.id, StageStatus::Failed);
                for later in plan.iter().skip_while(|s| s.id != spec.id).skip(1) {
                    if state.stage(&later.id).map(|s| s.status) == Some(StageStatus::Pending) {
                        state.mark(&later.id, StageStatus::Skipped);
                    }
                }
                state.run_status = RunStatus::Failed;
                state.save(&run_dir)?;
                events.record("stage_failed", Some(&spec.id), e.to_string())?;
                progress.abandon();
                return Ok(RunOutcome {
                    run_status: RunStatus::Failed,
                    failed_stage: Some(spec.id.clone()),
                    gate_failed,
                });
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    state.run_status = if gate_failed {
        RunStatus::Failed
    } else {
        RunStatus::Success
    };
    state.save(&run_dir)?;
    events.record(
        "run_finished",
        None,
        format!("run_status {:?}", state.run_status),
    )?;

    Ok(RunOutcome {
        run_status: state.run_status,
        failed_stage,
        gate_failed,
    })
}

/// Resume/force/start-from semantics over an existing run directory.
fn prepare_run_dir(
    options: &DriverOptions,
    run_dir: &Path,
    plan: &[StageSpec],
    stage_dirs: &HashMap<String, PathBuf>,
) -> Result<PipelineState> {
    let stage_ids: Vec<&str> = plan.iter().map(|s| s.id.as_str()).collect();

    // A run exists once its state file does; the bare directory may have
    // been created early for the log file.
    let has_state = run_dir.join(super::state::PIPELINE_STATE).exists();
    if has_state {
        if options.force {
            std::fs::remove_dir_all(run_dir).map_err(|e| io_err(run_dir, e))?;
        } else if let Some(start_from) = &options.start_from {
            let mut state = PipelineState::load(run_dir)
                .unwrap_or_else(|_| PipelineState::new(&options.run_id, &stage_ids));
            let reset = state.reset_from(start_from);
            for id in &reset {
                if let Some(dir) = stage_dirs.get(id) {
                    if dir.exists() {
                        std::fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))?;
                    }
                }
            }
            std::fs::create_dir_all(run_dir).map_err(|e| io_err(run_dir, e))?;
            return Ok(state);
        } else if !options.allow_run_id_reuse {
            return Err(DriverError::RunIdReuse(options.run_id.clone()));
        } else {
            let state = PipelineState::load(run_dir)
                .unwrap_or_else(|_| PipelineState::new(&options.run_id, &stage_ids));
            return Ok(state);
        }
    }

    std::fs::create_dir_all(run_dir).map_err(|e| io_err(run_dir, e))?;
    Ok(PipelineState::new(&options.run_id, &stage_ids))
}

fn build_providers(
    recipe: &Recipe,
) -> Option<(Arc<dyn ChatProvider>, Option<Arc<dyn ChatProvider>>)> {
    if !recipe.ai.enabled || recipe.ai.base_url.is_empty() {
        return None;
    }
    let api_key = std::env::var(&recipe.ai.api_key_env).unwrap_or_default();
    let primary = OpenAiCompatProvider::new(
        "gateway",
        recipe.ai.base_url.clone(),
        api_key,
        recipe.ai.model.clone(),
    );
    let arbiter: Option<Arc<dyn ChatProvider>> = recipe
        .ai
        .arbiter_model
        .as_ref()
        .map(|m| Arc::new(primary.with_model(m.clone())) as Arc<dyn ChatProvider>);
    Some((Arc::new(primary), arbiter))
}

#[allow(clippy::too_many_arguments)]
fn build_context(
    options: &DriverOptions,
    recipe: &Recipe,
    spec: &StageSpec,
    stage_dir: &Path,
    output_dir: &Path,
    resolver: &InputResolver,
    stage_dirs: &HashMap<String, PathBuf>,
    providers: &Option<(Arc<dyn ChatProvider>, Option<Arc<dyn ChatProvider>>)>,
) -> StageContext {
    let params = substitute_params(&spec.params, stage_dirs);

    // Per-stage input overrides: params.inputs = { name: path }
    let mut resolver = resolver.clone();
    if let Some(Value::Object(inputs)) = params.get("inputs") {
        for (name, value) in inputs {
            if let Some(path) = value.as_str() {
                resolver.register(name, PathBuf::from(path));
            }
        }
    }

    let params = StageParams(params);
    let ai_wanted = params.get_bool("ai", true);
    let llm = providers.as_ref().filter(|_| ai_wanted).map(|(primary, arbiter)| {
        let config = LlmServiceConfig {
            max_calls: params.get_u32("max_calls", recipe.ai.max_calls_per_stage),
            call_timeout_secs: recipe.ai.call_timeout_secs,
            concurrency: recipe.ai.concurrency,
        };
        Arc::new(LlmService::new(primary.clone(), arbiter.clone(), config))
    });

    StageContext {
        run_id: options.run_id.clone(),
        stage_id: spec.id.clone(),
        module_id: spec.module_id.clone(),
        params,
        book: BookConfig {
            expected_range: recipe.book.expected_range,
            known_missing_sections: recipe.book.known_missing_sections.clone(),
            title: recipe.book.title.clone(),
        },
        store: ArtifactStore::new(stage_dir.to_path_buf(), output_dir.to_path_buf(), options.force),
        inputs: resolver,
        llm,
        meter: StageMeter::new(),
    }
}

/// Replace `{<stage_id>.<artifact>}` references in string params with the
/// producing stage's artifact path.
fn substitute_params(
    params: &serde_json::Map<String, Value>,
    stage_dirs: &HashMap<String, PathBuf>,
) -> serde_json::Map<String, Value> {
    let mut out = params.clone();
    for value in out.values_mut() {
        substitute_value(value, stage_dirs);
    }
    out
}

fn substitute_value(value: &mut Value, stage_dirs: &HashMap<String, PathBuf>) {
    match value {
        Value::String(s) => {
            if let Some(resolved) = resolve_reference(s, stage_dirs) {
                *s = resolved;
            }
        }
        Value::Object(map) => {
            for v in map.values_mut() {
                substitute_value(v, stage_dirs);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                substitute_value(v, stage_dirs);
            }
        }
        _ => {}
    }
}

fn resolve_reference(s: &str, stage_dirs: &HashMap<String, PathBuf>) -> Option<String> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    let (stage_id, artifact) = inner.split_once('.')?;
    let dir = stage_dirs.get(stage_id)?;
    Some(dir.join(artifact).to_string_lossy().into_owned())
}

fn register_dir_artifacts(resolver: &mut InputResolver, dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()).map(|n| n.to_string()) {
                resolver.register(&name, path);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
