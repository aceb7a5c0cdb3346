//! Rhai-backed grader.
//!
//! The grading script is compiled once at startup and must define
//! `fn grader(response)`. Each run calls it with the scoring service's
//! response: a JSON object body is passed as a Rhai object map, anything
//! else as the verbatim string. The body is never spliced into script
//! source.
//!
//! The engine is shared by every run and treated as non-reentrant: all
//! calls go through one mutex and execute on the blocking thread pool.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rhai::{CallFnOptions, Dynamic, Engine, Scope, AST};

use regscore_core::capability::{ScriptError, Scorer};
use regscore_core::score::ScoreValue;

/// Name of the function every grading script must define.
pub const GRADER_FN: &str = "grader";

#[derive(Debug, thiserror::Error)]
pub enum GraderLoadError {
    #[error("Grading script does not compile: {0}")]
    Compile(String),

    #[error("Grading script must define `fn grader(response)` taking one parameter")]
    MissingGrader,

    #[error("Grading script failed while running its top-level statements: {0}")]
    TopLevel(String),
}

#[derive(Debug, Clone, Default)]
pub struct GraderOptions {
    /// Abort a call after this many Rhai operations. `None` means unbounded.
    pub max_operations: Option<u64>,
}

struct GraderState {
    engine: Engine,
    ast: AST,
}

/// The grading capability handed to the orchestrator.
#[derive(Clone)]
pub struct RhaiGrader {
    state: Arc<Mutex<GraderState>>,
}

impl std::fmt::Debug for RhaiGrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiGrader").finish_non_exhaustive()
    }
}

impl RhaiGrader {
    /// Compile `script` with default options.
    pub fn load(script: &str) -> Result<Self, GraderLoadError> {
        Self::load_with(script, &GraderOptions::default())
    }

    /// Compile `script`, check it defines the grader and run its
    /// top-level statements once.
    pub fn load_with(script: &str, options: &GraderOptions) -> Result<Self, GraderLoadError> {
        let mut engine = Engine::new();
        if let Some(max) = options.max_operations {
            engine.set_max_operations(max);
        }
        engine.on_print(|text| tracing::info!(target: "regscore::grader", "{text}"));

        let ast = engine
            .compile(script)
            .map_err(|e| GraderLoadError::Compile(e.to_string()))?;

        let has_grader = ast
            .iter_functions()
            .any(|f| f.name == GRADER_FN && f.params.len() == 1);
        if !has_grader {
            return Err(GraderLoadError::MissingGrader);
        }

        engine
            .run_ast(&ast)
            .map_err(|e| GraderLoadError::TopLevel(e.to_string()))?;

        Ok(Self {
            state: Arc::new(Mutex::new(GraderState { engine, ast })),
        })
    }

    /// Call the grader synchronously on the current thread.
    pub fn evaluate(&self, response: &str) -> Result<ScoreValue, ScriptError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let argument = response_argument(&state.engine, response);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let mut scope = Scope::new();

        let value: Dynamic = state
            .engine
            .call_fn_with_options(options, &mut scope, &state.ast, GRADER_FN, (argument,))
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        Ok(score_value(value))
    }
}

#[async_trait]
impl Scorer for RhaiGrader {
    async fn score(&self, response: &str) -> Result<ScoreValue, ScriptError> {
        let grader = self.clone();
        let response = response.to_owned();
        tokio::task::spawn_blocking(move || grader.evaluate(&response))
            .await
            .map_err(|e| ScriptError::Aborted(e.to_string()))?
    }
}

/// The single argument passed to `grader`.
fn response_argument(engine: &Engine, response: &str) -> Dynamic {
    if response.trim_start().starts_with('{') {
        if let Ok(map) = engine.parse_json(response, true) {
            return Dynamic::from_map(map);
        }
    }
    Dynamic::from(response.to_string())
}

/// Detach a script value from the engine.
fn score_value(value: Dynamic) -> ScoreValue {
    if value.is_unit() {
        return ScoreValue::Unit;
    }
    if let Ok(v) = value.as_int() {
        return ScoreValue::Int(v);
    }
    if let Ok(v) = value.as_float() {
        return ScoreValue::Float(v);
    }
    if let Ok(v) = value.as_bool() {
        return ScoreValue::Bool(v);
    }
    match value.into_string() {
        Ok(text) => ScoreValue::Text(text),
        Err(type_name) => ScoreValue::Other(type_name.to_string()),
    }
}
