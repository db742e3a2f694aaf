use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::executor::{ClientFactory, RunConfig};
use crate::utils::variables;

/// Root configuration for a batch run.
///
/// This structure is intended to be deserialized from a JSON file. It captures
/// everything the CLI needs to build a runner:
/// - the target `host` and optional credentials
/// - the group-wide `error_behavior`
/// - variable `variables` and which of them are `secure_variables`
/// - the ordered `actions`
#[derive(Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct BatchConfig {
    /// Label used for the run and in the final report.
    #[serde(default = "default_batch_name")]
    pub name: String,

    /// Base URL that relative action commands (starting with `/`) are joined onto.
    #[serde(default)]
    pub host: Option<String>,

    /// Basic-auth user applied to every request.
    #[serde(default)]
    pub user: Option<String>,

    /// Basic-auth password applied to every request.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout in milliseconds (default: 30000).
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Behavior applied to actions that inherit the group default.
    #[serde(default)]
    pub error_behavior: GlobalErrorBehavior,

    /// Placeholder bindings, e.g. `{ "path": "/content/site" }` fills `${path}`.
    #[serde(default)]
    pub variables: VariableMap,

    /// Names of variables whose values must be redacted from all output.
    #[serde(default)]
    pub secure_variables: BTreeSet<String>,

    /// Actions executed in order.
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl BatchConfig {
    /// Executor factory for the configured host, credentials and timeout.
    pub fn client_factory(&self) -> ClientFactory {
        let mut factory = ClientFactory::new();
        if let Some(host) = &self.host {
            factory = factory.host(host.clone());
        }
        if let Some(user) = &self.user {
            factory = factory.credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        if let Some(ms) = self.timeout_ms {
            factory = factory.timeout(Duration::from_millis(ms));
        }
        factory
    }

    /// Run settings taken from this file.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            error_behavior: self.error_behavior,
            variables: self.variables.clone(),
            secure_variables: self.secure_variables.clone(),
            cancel: Default::default(),
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .field("error_behavior", &self.error_behavior)
            .field(
                "variables",
                &variables::masked(&self.variables, &self.secure_variables),
            )
            .field("secure_variables", &self.secure_variables)
            .field("actions", &self.actions)
            .finish()
    }
}

fn default_batch_name() -> String {
    "batch".to_string()
}

/// Variable bindings: placeholder name -> value.
pub type VariableMap = BTreeMap<String, String>;

/// One HTTP administrative operation.
///
/// `command` is a curl-style command line that may contain `${name}` placeholders:
///
/// ```text
/// -X POST -F cmd=activate -F path=${path} /bin/replicate.json
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Action {
    /// Display name.
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Command template.
    pub command: String,

    /// How the response body should be interpreted.
    #[serde(default)]
    pub result_type: ResultType,

    /// Per-action override of the group error behavior.
    #[serde(default)]
    pub error_behavior: ErrorBehavior,
}

impl Action {
    /// Create an action with default result type and an inherited error behavior.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            command: command.into(),
            result_type: ResultType::default(),
            error_behavior: ErrorBehavior::Inherit,
        }
    }

    pub fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    pub fn with_error_behavior(mut self, behavior: ErrorBehavior) -> Self {
        self.error_behavior = behavior;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Placeholder names used by the command, in order of appearance (duplicates kept).
    pub fn variable_names(&self) -> Vec<String> {
        variables::variable_names(&self.command)
    }

    /// An action can run only with a name and a command.
    pub fn is_runnable(&self) -> bool {
        !self.name.trim().is_empty() && !self.command.trim().is_empty()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Interpretation of a response body.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    #[default]
    Html,
    Json,
    Plain,
}

/// Per-action error behavior.
///
/// `Inherit` defers to the group's [`GlobalErrorBehavior`].
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBehavior {
    #[default]
    Inherit,
    Ignore,
    Halt,
    /// Tolerate the failure only while nothing in the batch has succeeded yet.
    SkipIfSuccessful,
}

/// Group-wide default error behavior.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GlobalErrorBehavior {
    Ignore,
    #[default]
    Halt,
}

impl std::str::FromStr for GlobalErrorBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "halt" => Ok(Self::Halt),
            other => Err(format!("unknown error behavior '{other}' (expected ignore|halt)")),
        }
    }
}
