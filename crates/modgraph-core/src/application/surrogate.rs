//! Surrogate execution
//!
//! A surrogate stands in for a module that has no real implementation yet: it
//! takes JSON inputs and produces plausible JSON outputs. Surrogates are built
//! by factories registered under a type name, so a module can name the
//! surrogate it wants through its `implementation` field.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::module::{Module, ModuleName, ModuleStatus};
use crate::error::SurrogateError;

/// Registered name of [`StaticStubSurrogate`]
pub const STATIC_STUB: &str = "static_stub";

/// Registered name of [`MockLlmSurrogate`]
pub const MOCK_LLM: &str = "mock_llm";

/// JSON object passed to and returned from a surrogate
pub type JsonObject = Map<String, Value>;

/// Builds a surrogate from its JSON options (`null` means defaults)
pub type SurrogateFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn Surrogate>, SurrogateError> + Send + Sync>;

/// Metadata describing a surrogate implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurrogateInfo {
    /// Implementation type
    #[serde(rename = "type")]
    pub kind: String,
    /// What the surrogate does
    pub description: String,
}

/// Placeholder behavior for a module
pub trait Surrogate: Send + Sync {
    /// Implementation type, e.g. `StaticStubSurrogate`
    fn surrogate_type(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// Produce outputs for `inputs`
    fn run(&self, inputs: &JsonObject) -> Result<JsonObject, SurrogateError>;

    /// Metadata for listings and run reports
    fn info(&self) -> SurrogateInfo {
        SurrogateInfo {
            kind: self.surrogate_type().to_string(),
            description: self.description().to_string(),
        }
    }
}

fn parse_options<T>(surrogate: &str, options: &Value) -> Result<T, SurrogateError>
where
    T: DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| SurrogateError::InvalidOptions {
        surrogate: surrogate.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StaticStubOptions {
    output: Option<JsonObject>,
}

/// Returns a fixed output, stamped with the run time and the input keys
#[derive(Debug, Clone)]
pub struct StaticStubSurrogate {
    output: JsonObject,
}

impl StaticStubSurrogate {
    /// Stub returning `output`, or `{"result": "stub", "timestamp": "placeholder"}`
    pub fn new(output: Option<JsonObject>) -> Self {
        let output = output.unwrap_or_else(|| {
            let mut default = JsonObject::new();
            default.insert("result".into(), json!("stub"));
            default.insert("timestamp".into(), json!("placeholder"));
            default
        });
        Self { output }
    }

    fn factory() -> SurrogateFactory {
        Arc::new(|options: &Value| {
            let options: StaticStubOptions = parse_options(STATIC_STUB, options)?;
            Ok(Arc::new(StaticStubSurrogate::new(options.output)) as Arc<dyn Surrogate>)
        })
    }
}

impl Surrogate for StaticStubSurrogate {
    fn surrogate_type(&self) -> &str {
        "StaticStubSurrogate"
    }

    fn description(&self) -> &str {
        "Returns fixed output for early integration and tests"
    }

    fn run(&self, inputs: &JsonObject) -> Result<JsonObject, SurrogateError> {
        let mut result = self.output.clone();
        result.insert("execution_time".into(), json!(Utc::now().to_rfc3339()));
        let received: Vec<&String> = inputs.keys().collect();
        result.insert("inputs_received".into(), json!(received));
        debug!(inputs = inputs.len(), "Static stub produced output");
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MockLlmOptions {
    prompt_template: String,
    log_file: Option<PathBuf>,
}

impl Default for MockLlmOptions {
    fn default() -> Self {
        Self {
            prompt_template: MockLlmSurrogate::DEFAULT_TEMPLATE.to_string(),
            log_file: None,
        }
    }
}

/// Simulates an LLM-backed module: renders a prompt, optionally appends it to
/// a log file, and returns a canned response
#[derive(Debug, Clone)]
pub struct MockLlmSurrogate {
    prompt_template: String,
    log_file: Option<PathBuf>,
}

impl MockLlmSurrogate {
    /// Template used when none is given. `{inputs}` is replaced with the inputs as JSON.
    pub const DEFAULT_TEMPLATE: &'static str = "Process {inputs} and generate output";

    /// Create a mock LLM surrogate
    pub fn new(prompt_template: impl Into<String>, log_file: Option<PathBuf>) -> Self {
        Self {
            prompt_template: prompt_template.into(),
            log_file,
        }
    }

    /// Prompt sent for `inputs`
    pub fn render_prompt(&self, inputs: &JsonObject) -> String {
        let rendered = serde_json::to_string_pretty(inputs).unwrap_or_else(|_| "{}".to_string());
        self.prompt_template.replace("{inputs}", &rendered)
    }

    fn append_prompt(path: &Path, timestamp: &str, prompt: &str) -> Result<(), SurrogateError> {
        let to_error = |e: std::io::Error| SurrogateError::PromptLog {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(to_error)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(to_error)?;
        write!(file, "[{}] MockLLM Prompt:\n{}\n\n", timestamp, prompt).map_err(to_error)
    }

    fn factory() -> SurrogateFactory {
        Arc::new(|options: &Value| {
            let options: MockLlmOptions = parse_options(MOCK_LLM, options)?;
            Ok(Arc::new(MockLlmSurrogate::new(options.prompt_template, options.log_file))
                as Arc<dyn Surrogate>)
        })
    }
}

impl Surrogate for MockLlmSurrogate {
    fn surrogate_type(&self) -> &str {
        "MockLLMSurrogate"
    }

    fn description(&self) -> &str {
        "Logs prompts and returns dummy LLM responses without calling a model"
    }

    fn run(&self, inputs: &JsonObject) -> Result<JsonObject, SurrogateError> {
        let prompt = self.render_prompt(inputs);
        let timestamp = Utc::now().to_rfc3339();

        match &self.log_file {
            Some(path) => {
                Self::append_prompt(path, &timestamp, &prompt)?;
                info!(log_file = %path.display(), "Mock LLM prompt logged");
            }
            None => debug!(prompt = %prompt, "Mock LLM prompt"),
        }

        let tokens_used = Value::Object(inputs.clone()).to_string().len() * 2;
        let mut response = JsonObject::new();
        response.insert(
            "response".into(),
            json!(format!("<mock-llm-response-for-{}-inputs>", inputs.len())),
        );
        response.insert(
            "prompt_logged".into(),
            json!(self.log_file.as_ref().map(|p| p.display().to_string())),
        );
        response.insert("execution_time".into(), json!(timestamp));
        response.insert("model".into(), json!("mock-gpt-4"));
        response.insert("tokens_used".into(), json!(tokens_used));
        Ok(response)
    }
}

/// What to run for a module
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurrogateRequest {
    /// Surrogate type; defaults to the module's implementation when that names
    /// a registered surrogate, otherwise to `static_stub`
    pub surrogate_type: Option<String>,
    /// Inputs object; `null` or `{}` derives placeholder inputs from the module
    pub inputs: Value,
    /// Factory options
    pub options: Value,
}

/// Module context reported with a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Status of the module at run time
    pub module_status: ModuleStatus,
    /// Implementation reference of the module
    pub module_implementation: Option<String>,
    /// The surrogate that ran
    pub surrogate_info: SurrogateInfo,
}

/// Result of running a surrogate for a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateRun {
    /// Module the surrogate stood in for
    pub module_name: ModuleName,
    /// Registered surrogate name
    pub surrogate_type: String,
    /// Inputs actually passed
    pub inputs: JsonObject,
    /// Outputs produced
    pub outputs: JsonObject,
    /// Module and surrogate context
    pub execution_info: ExecutionInfo,
}

/// Surrogate factories by name
#[derive(Clone)]
pub struct SurrogateRegistry {
    factories: BTreeMap<String, SurrogateFactory>,
}

impl fmt::Debug for SurrogateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurrogateRegistry")
            .field("surrogates", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SurrogateRegistry {
    /// Registry holding `static_stub` and `mock_llm`
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(STATIC_STUB, StaticStubSurrogate::factory());
        registry.register(MOCK_LLM, MockLlmSurrogate::factory());
        registry
    }
}

impl SurrogateRegistry {
    /// Registry without any surrogates
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register `factory` under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, factory: SurrogateFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(surrogate = %name, "Replaced registered surrogate");
        } else {
            debug!(surrogate = %name, "Registered surrogate");
        }
    }

    /// Whether a surrogate is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the surrogate registered under `name`
    pub fn create(&self, name: &str, options: &Value) -> Result<Arc<dyn Surrogate>, SurrogateError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SurrogateError::UnknownSurrogate(name.to_string()))?;
        factory(options)
    }

    /// Registered names with the metadata of a default-built instance
    pub fn list(&self) -> BTreeMap<String, SurrogateInfo> {
        self.factories
            .iter()
            .filter_map(|(name, factory)| match factory(&Value::Null) {
                Ok(surrogate) => Some((name.clone(), surrogate.info())),
                Err(err) => {
                    warn!(surrogate = %name, error = %err, "Surrogate has no default options");
                    None
                }
            })
            .collect()
    }

    /// Surrogate name used for `module` when the request names none
    pub fn default_for<'a>(&self, module: &'a Module) -> &'a str {
        match module.implementation.as_deref() {
            Some(implementation) if self.contains(implementation) => implementation,
            _ => STATIC_STUB,
        }
    }

    /// Run a surrogate standing in for `module`
    pub fn run(&self, module: &Module, request: SurrogateRequest) -> Result<SurrogateRun, SurrogateError> {
        let surrogate_type = request
            .surrogate_type
            .unwrap_or_else(|| self.default_for(module).to_string());

        let inputs = match request.inputs {
            Value::Null => placeholder_inputs(module),
            Value::Object(map) if map.is_empty() => placeholder_inputs(module),
            Value::Object(map) => map,
            other => return Err(SurrogateError::InvalidInputs(other.to_string())),
        };

        let surrogate = self.create(&surrogate_type, &request.options)?;
        let outputs = surrogate.run(&inputs)?;
        info!(
            module = %module.name,
            surrogate = %surrogate_type,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "Surrogate run completed"
        );

        Ok(SurrogateRun {
            module_name: module.name.clone(),
            surrogate_type,
            inputs,
            outputs,
            execution_info: ExecutionInfo {
                module_status: module.status,
                module_implementation: module.implementation.clone(),
                surrogate_info: surrogate.info(),
            },
        })
    }
}

// One `<dummy-...>` value per declared module input
fn placeholder_inputs(module: &Module) -> JsonObject {
    module
        .inputs
        .iter()
        .map(|input| {
            let value = format!("<dummy-{}>", input.to_lowercase());
            (input.clone(), Value::String(value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sensor() -> Module {
        Module::new("Sensor", "Reads sensors", ModuleStatus::Placeholder)
            .with_inputs(["Lidar", "Camera"])
    }

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            other => panic!("Expected object, got {}", other),
        }
    }

    #[test]
    fn test_default_registry_lists_builtins() {
        let registry = SurrogateRegistry::default();
        let listed = registry.list();
        let names: Vec<&str> = listed.keys().map(|n| n.as_str()).collect();
        assert_eq!(names, vec![MOCK_LLM, STATIC_STUB]);
        assert_eq!(listed[STATIC_STUB].kind, "StaticStubSurrogate");
        assert_eq!(listed[MOCK_LLM].kind, "MockLLMSurrogate");
    }

    #[test]
    fn test_static_stub_stamps_output() {
        let stub = StaticStubSurrogate::new(None);
        let out = stub
            .run(&object(json!({"sensor_data": [1, 2, 3], "timestamp": "t0"})))
            .unwrap();
        assert_eq!(out["result"], json!("stub"));
        assert_eq!(out["timestamp"], json!("placeholder"));
        assert_eq!(out["inputs_received"], json!(["sensor_data", "timestamp"]));
        assert!(out["execution_time"].is_string());
    }

    #[test]
    fn test_static_stub_options_set_output() {
        let registry = SurrogateRegistry::default();
        let stub = registry
            .create(STATIC_STUB, &json!({"output": {"speed": 3}}))
            .unwrap();
        let out = stub.run(&JsonObject::new()).unwrap();
        assert_eq!(out["speed"], json!(3));
        assert!(out.get("result").is_none());

        let err = registry.create(STATIC_STUB, &json!({"ouput": {}})).err().unwrap();
        assert!(matches!(err, SurrogateError::InvalidOptions { .. }));
    }

    #[test]
    fn test_mock_llm_logs_prompt() {
        let dir = TempDir::new().unwrap();
        let log_file = dir.path().join("logs").join("llm_prompts.log");
        let registry = SurrogateRegistry::default();
        let llm = registry
            .create(
                MOCK_LLM,
                &json!({"prompt_template": "Analyze: {inputs}", "log_file": log_file}),
            )
            .unwrap();

        let out = llm.run(&object(json!({"lidar_points": 1000}))).unwrap();
        assert_eq!(out["response"], json!("<mock-llm-response-for-1-inputs>"));
        assert_eq!(out["model"], json!("mock-gpt-4"));
        assert_eq!(out["tokens_used"], json!(r#"{"lidar_points":1000}"#.len() * 2));
        assert_eq!(out["prompt_logged"], json!(log_file.display().to_string()));

        llm.run(&JsonObject::new()).unwrap();
        let logged = std::fs::read_to_string(&log_file).unwrap();
        assert_eq!(logged.matches("MockLLM Prompt:").count(), 2);
        assert!(logged.contains("Analyze: {\n  \"lidar_points\": 1000\n}"));
    }

    #[test]
    fn test_run_defaults_to_module_implementation() {
        let registry = SurrogateRegistry::default();
        let module = sensor().with_implementation(MOCK_LLM);
        let run = registry.run(&module, SurrogateRequest::default()).unwrap();
        assert_eq!(run.surrogate_type, MOCK_LLM);
        assert_eq!(run.execution_info.surrogate_info.kind, "MockLLMSurrogate");
        assert_eq!(run.execution_info.module_implementation.as_deref(), Some(MOCK_LLM));

        let module = sensor().with_implementation("src/sensor.rs");
        let run = registry.run(&module, SurrogateRequest::default()).unwrap();
        assert_eq!(run.surrogate_type, STATIC_STUB);
    }

    #[test]
    fn test_run_derives_placeholder_inputs() {
        let registry = SurrogateRegistry::default();
        let run = registry.run(&sensor(), SurrogateRequest::default()).unwrap();
        assert_eq!(
            run.inputs,
            object(json!({"Lidar": "<dummy-lidar>", "Camera": "<dummy-camera>"}))
        );
        let received = run.outputs["inputs_received"].as_array().unwrap();
        assert_eq!(received.len(), 2);
        assert!(received.contains(&json!("Lidar")) && received.contains(&json!("Camera")));
        assert_eq!(run.execution_info.module_status, ModuleStatus::Placeholder);

        let request = SurrogateRequest {
            inputs: json!({"frame": "f1"}),
            ..SurrogateRequest::default()
        };
        let run = registry.run(&sensor(), request).unwrap();
        assert_eq!(run.inputs, object(json!({"frame": "f1"})));
    }

    #[test]
    fn test_run_rejects_bad_requests() {
        let registry = SurrogateRegistry::default();
        let request = SurrogateRequest {
            surrogate_type: Some("oracle".into()),
            ..SurrogateRequest::default()
        };
        assert_eq!(
            registry.run(&sensor(), request).unwrap_err(),
            SurrogateError::UnknownSurrogate("oracle".into())
        );

        let request = SurrogateRequest {
            inputs: json!([1, 2]),
            ..SurrogateRequest::default()
        };
        assert!(matches!(
            registry.run(&sensor(), request).unwrap_err(),
            SurrogateError::InvalidInputs(_)
        ));
    }

    #[test]
    fn test_custom_factory_registration() {
        struct Echo;
        impl Surrogate for Echo {
            fn surrogate_type(&self) -> &str {
                "Echo"
            }
            fn description(&self) -> &str {
                "Returns its inputs"
            }
            fn run(&self, inputs: &JsonObject) -> Result<JsonObject, SurrogateError> {
                Ok(inputs.clone())
            }
        }

        let mut registry = SurrogateRegistry::empty();
        registry.register("echo", Arc::new(|_: &Value| Ok(Arc::new(Echo) as Arc<dyn Surrogate>)));
        let module = sensor().with_implementation("echo");
        let run = registry.run(&module, SurrogateRequest::default()).unwrap();
        assert_eq!(run.outputs, run.inputs);
        assert!(!registry.contains(STATIC_STUB));
    }
}
