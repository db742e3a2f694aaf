use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{Action, GlobalErrorBehavior, VariableMap};
use crate::executor::command;
use crate::executor::http::{ExecError, HttpExecutor};
use crate::executor::policy::ErrorPolicy;
use crate::executor::result::{ActionResult, FailureKind, RunSnapshot, RunState, RunnerResult};
use crate::utils::variables::{self, Redactor, VariableError};

/// Everything a run needs besides the actions and the executor.
#[derive(Clone, Default)]
pub struct RunConfig {
    /// Applied to actions whose behavior is `Inherit`.
    pub error_behavior: GlobalErrorBehavior,
    pub variables: VariableMap,
    /// Variables whose values are masked in results and logs.
    pub secure_variables: BTreeSet<String>,
    /// Checked between actions and after the last one; firing it stops the run.
    pub cancel: CancellationToken,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("error_behavior", &self.error_behavior)
            .field(
                "variables",
                &variables::masked(&self.variables, &self.secure_variables),
            )
            .field("secure_variables", &self.secure_variables)
            .field("cancel", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunConfig {
    pub fn new(error_behavior: GlobalErrorBehavior) -> Self {
        Self {
            error_behavior,
            ..Self::default()
        }
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Bind a variable and mark it secure.
    pub fn secure_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.secure_variables.insert(name.clone());
        self.variables.insert(name, value.into());
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Raised when a runner is built from unusable input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("action #{index} ('{name}') is not runnable: name and command must be non-empty")]
    InvalidAction { index: usize, name: String },
}

/// Runs an ordered list of actions as one batch.
///
/// Actions run strictly one after another. After each one the outcome is recorded
/// in the shared [`RunnerResult`] and the error policy decides whether to go on.
/// Per-action failures are data; `run` itself never fails.
pub struct ActionGroupRunner {
    name: String,
    actions: Vec<Arc<Action>>,
    config: RunConfig,
    redactor: Redactor,
    executor: Arc<dyn HttpExecutor>,
    result: RunnerResult,
}

impl ActionGroupRunner {
    pub fn new(
        name: impl Into<String>,
        actions: Vec<Action>,
        config: RunConfig,
        executor: Arc<dyn HttpExecutor>,
    ) -> Result<Self, RunnerError> {
        if let Some((index, action)) = actions
            .iter()
            .enumerate()
            .find(|(_, action)| !action.is_runnable())
        {
            return Err(RunnerError::InvalidAction {
                index,
                name: action.name.clone(),
            });
        }

        let name = name.into();
        let redactor = Redactor::new(&config.variables, &config.secure_variables);
        let result = RunnerResult::new(name.clone(), actions.len());
        Ok(Self {
            name,
            actions: actions.into_iter().map(Arc::new).collect(),
            config,
            redactor,
            executor,
            result,
        })
    }

    /// Handle to this run's results; valid before, during and after the run.
    pub fn result(&self) -> RunnerResult {
        self.result.clone()
    }

    /// Run on a separate tokio task.
    pub fn spawn(self) -> JoinHandle<RunSnapshot> {
        tokio::spawn(self.run())
    }

    /// Execute the batch and return the final snapshot.
    pub async fn run(self) -> RunSnapshot {
        info!(
            target: "curly::runner",
            batch = %self.name,
            actions = self.actions.len(),
            error_behavior = ?self.config.error_behavior,
            "Starting batch"
        );
        self.result.set_state(RunState::Running);

        let mut policy = ErrorPolicy::new(self.config.error_behavior);
        let mut final_state = RunState::Completed;

        for (index, action) in self.actions.iter().enumerate() {
            if self.config.cancel.is_cancelled() {
                warn!(
                    target: "curly::runner",
                    batch = %self.name, index,
                    "Cancellation requested; stopping before next action"
                );
                final_state = RunState::Cancelled;
                break;
            }

            trace!(target: "curly::runner", batch = %self.name, index, action = %action.name, "Executing action");
            let outcome = self.run_action(action).await;
            let succeeded = outcome.succeeded();
            self.result.push(outcome);

            let verdict = policy.evaluate(action.error_behavior, succeeded);
            if verdict.is_halt() {
                warn!(
                    target: "curly::runner",
                    batch = %self.name, index, action = %action.name,
                    "Action failed; halting batch"
                );
                final_state = RunState::Halted;
                break;
            }
        }

        // a token fired during the last action still cancels the run
        if final_state == RunState::Completed && self.config.cancel.is_cancelled() {
            warn!(
                target: "curly::runner",
                batch = %self.name,
                "Cancellation requested during the last action"
            );
            final_state = RunState::Cancelled;
        }

        self.result.set_state(final_state);
        let snapshot = self.result.snapshot();
        info!(
            target: "curly::runner",
            batch = %self.name,
            attempted = snapshot.results().len(),
            completed = snapshot.completed(),
            completely_successful = snapshot.completely_successful(),
            "Batch finished"
        );
        snapshot
    }

    /// Fill placeholders token by token so a bound value never changes how the
    /// command splits. Returns the command to send and its masked display copy.
    fn resolve_command(&self, template: &str) -> Result<(String, String), VariableError> {
        let Ok(tokens) = command::lex(template) else {
            // left whole for the executor to reject
            let line = variables::resolve(template, &self.config.variables)?;
            let shown = self.redactor.redact(&line);
            return Ok((line, shown));
        };

        let mut line = Vec::with_capacity(tokens.len());
        let mut shown = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let filled = variables::resolve(token, &self.config.variables)?;
            shown.push(command::quote(&self.redactor.redact(&filled)));
            line.push(command::quote(&filled));
        }
        Ok((line.join(" "), shown.join(" ")))
    }

    /// Resolve, dispatch and classify one action.
    async fn run_action(&self, action: &Arc<Action>) -> ActionResult {
        let started = Instant::now();

        let (command, shown) = match self.resolve_command(&action.command) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(target: "curly::runner", action = %action.name, error = %err, "Variable resolution failed");
                return ActionResult::failed(
                    Arc::clone(action),
                    FailureKind::Variable,
                    None,
                    None,
                    self.redactor.redact(&err.to_string()),
                    started.elapsed(),
                );
            }
        };
        debug!(target: "curly::runner", action = %action.name, command = %shown, "Dispatching");

        match self.executor.execute(&command, action.result_type).await {
            Ok(response) => {
                let summary = response.summary(action.result_type, &self.redactor);
                let elapsed = started.elapsed();
                if response.is_success() {
                    debug!(target: "curly::runner", action = %action.name, status = response.status, "Action succeeded");
                    ActionResult::success(Arc::clone(action), shown, response.status, summary, elapsed)
                } else {
                    warn!(target: "curly::runner", action = %action.name, status = response.status, "Action returned error status");
                    ActionResult::failed(
                        Arc::clone(action),
                        FailureKind::HttpStatus,
                        Some(shown),
                        Some(response.status),
                        summary,
                        elapsed,
                    )
                }
            }
            Err(err) => {
                let kind = match err {
                    ExecError::InvalidCommand(_) | ExecError::InvalidRequest(_) => {
                        FailureKind::InvalidCommand
                    }
                    ExecError::Timeout(_) | ExecError::Transport(_) => FailureKind::Transport,
                };
                let detail = self.redactor.redact(&err.to_string());
                warn!(target: "curly::runner", action = %action.name, ?kind, error = %detail, "Action could not be executed");
                ActionResult::failed(
                    Arc::clone(action),
                    kind,
                    Some(shown),
                    None,
                    detail,
                    started.elapsed(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ErrorBehavior, ResultType};
    use crate::executor::command::CommandSpec;
    use crate::executor::http::HttpResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers by path: `/success` -> 200, `/failure` -> 500, `/echo` -> 200 echoing
    /// the command, `/down` -> transport error.
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedExecutor {
        fn cancelling_after(calls: usize, token: CancellationToken) -> Self {
            Self {
                calls: Mutex::default(),
                cancel_after: Some((calls, token)),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            command: &str,
            _result_type: ResultType,
        ) -> Result<HttpResponse, ExecError> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(command.to_string());
                calls.len()
            };
            if let Some((after, token)) = &self.cancel_after {
                if count >= *after {
                    token.cancel();
                }
            }
            if command.contains("/success") {
                Ok(HttpResponse::new(200, "ok"))
            } else if command.contains("/echo") {
                Ok(HttpResponse::new(200, format!("you sent: {command}")))
            } else if command.contains("/down") {
                Err(ExecError::Transport("connection refused".into()))
            } else {
                Ok(HttpResponse::new(500, "boom"))
            }
        }
    }

    fn success() -> Action {
        Action::new("success", "http://localhost/success").with_result_type(ResultType::Plain)
    }

    fn failure() -> Action {
        Action::new("failure", "http://localhost/failure").with_result_type(ResultType::Plain)
    }

    async fn run(actions: Vec<Action>, config: RunConfig) -> RunSnapshot {
        let exec = Arc::new(ScriptedExecutor::default());
        ActionGroupRunner::new("test", actions, config, exec)
            .unwrap()
            .run()
            .await
    }

    fn assert_flags(snap: &RunSnapshot, successful: bool, completed: bool, len: usize) {
        assert_eq!(snap.completely_successful(), successful, "completely_successful");
        assert_eq!(snap.completed(), completed, "completed");
        assert_eq!(snap.results().len(), len, "result count");
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let actions = (0..5).map(|_| success()).collect();
        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Halt)).await;
        assert_flags(&snap, true, true, 5);
        assert_eq!(snap.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_global_ignore() {
        let actions = (0..3).map(|_| failure()).collect();
        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Ignore)).await;
        assert_flags(&snap, false, true, 3);
    }

    #[tokio::test]
    async fn test_action_ignore_overrides_global_halt() {
        let actions = vec![
            failure().with_error_behavior(ErrorBehavior::Ignore),
            failure().with_error_behavior(ErrorBehavior::Ignore),
        ];
        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Halt)).await;
        assert_flags(&snap, false, true, 2);
    }

    #[tokio::test]
    async fn test_skip_if_successful_without_prior_success() {
        let actions = vec![
            failure().with_error_behavior(ErrorBehavior::SkipIfSuccessful),
            failure().with_error_behavior(ErrorBehavior::SkipIfSuccessful),
        ];
        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Halt)).await;
        assert_flags(&snap, false, true, 2);
    }

    #[tokio::test]
    async fn test_skip_if_successful_after_success_halts() {
        let actions = vec![
            success().with_error_behavior(ErrorBehavior::SkipIfSuccessful),
            failure().with_error_behavior(ErrorBehavior::SkipIfSuccessful),
            success(),
        ];
        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Halt)).await;
        assert_flags(&snap, false, false, 2);
        assert_eq!(snap.state(), RunState::Halted);
    }

    #[tokio::test]
    async fn test_global_halt_stops_after_first_failure() {
        let exec = Arc::new(ScriptedExecutor::default());
        let runner = ActionGroupRunner::new(
            "halt",
            vec![failure(), failure()],
            RunConfig::new(GlobalErrorBehavior::Halt),
            exec.clone(),
        )
        .unwrap();
        let snap = runner.run().await;
        assert_flags(&snap, false, false, 1);
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_runs_are_identical() {
        let actions = vec![
            success(),
            failure().with_error_behavior(ErrorBehavior::Ignore),
            success(),
            failure(),
            success(),
        ];
        let first = run(actions.clone(), RunConfig::new(GlobalErrorBehavior::Halt)).await;
        let second = run(actions, RunConfig::new(GlobalErrorBehavior::Halt)).await;
        assert_eq!(first.outcomes(), second.outcomes());
        assert_eq!(first.outcomes(), vec![true, false, true, false]);
        assert_eq!(first.completed(), second.completed());
        assert_eq!(
            first.completely_successful(),
            second.completely_successful()
        );
    }

    #[tokio::test]
    async fn test_secure_values_are_redacted() {
        let exec = Arc::new(ScriptedExecutor::default());
        let config = RunConfig::new(GlobalErrorBehavior::Ignore)
            .variable("site", "/content/site")
            .secure_variable("password", "hunter2");
        let actions = vec![
            Action::new("echo", "-F pw=${password} -F p=${site} http://localhost/echo")
                .with_result_type(ResultType::Plain),
            Action::new("fail", "-F pw=${password} http://localhost/failure"),
            Action::new("down", "-F pw=${password} http://localhost/down"),
        ];
        let snap = ActionGroupRunner::new("secure", actions, config, exec.clone())
            .unwrap()
            .run()
            .await;

        // the real value still reached the server
        assert!(exec.calls()[0].contains("hunter2"));
        for result in snap.results() {
            assert!(!result.response_summary().contains("hunter2"));
            assert!(!result.command().unwrap_or_default().contains("hunter2"));
        }
        assert!(!snap.to_string().contains("hunter2"));
        assert!(snap.results()[0].response_summary().contains("[REDACTED:password]"));
        assert!(snap.results()[0].response_summary().contains("/content/site"));
    }

    #[tokio::test]
    async fn test_missing_variable_is_a_failure() {
        let exec = Arc::new(ScriptedExecutor::default());
        let actions = vec![
            Action::new("needs var", "http://localhost/success/${missing}"),
            success(),
        ];
        let snap = ActionGroupRunner::new(
            "vars",
            actions.clone(),
            RunConfig::new(GlobalErrorBehavior::Ignore),
            exec.clone(),
        )
        .unwrap()
        .run()
        .await;
        assert_flags(&snap, false, true, 2);
        let first = &snap.results()[0];
        assert_eq!(first.failure(), Some(FailureKind::Variable));
        assert!(first.response_summary().contains("'missing'"));
        assert!(first.command().is_none());
        assert_eq!(exec.calls().len(), 1);

        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Halt)).await;
        assert_flags(&snap, false, false, 1);
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let actions = vec![
            Action::new("status", "http://localhost/failure"),
            Action::new("down", "http://localhost/down"),
        ];
        let snap = run(actions, RunConfig::new(GlobalErrorBehavior::Ignore)).await;
        assert_eq!(snap.results()[0].failure(), Some(FailureKind::HttpStatus));
        assert_eq!(snap.results()[0].status(), Some(500));
        assert_eq!(snap.results()[1].failure(), Some(FailureKind::Transport));
        assert_eq!(snap.results()[1].status(), None);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let config = RunConfig::new(GlobalErrorBehavior::Ignore).cancel_token(token);
        let snap = run(vec![success(), success()], config).await;
        assert_flags(&snap, true, false, 0);
        assert_eq!(snap.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_between_actions_keeps_in_flight_result() {
        let token = CancellationToken::new();
        let exec = Arc::new(ScriptedExecutor::cancelling_after(2, token.clone()));
        let config = RunConfig::new(GlobalErrorBehavior::Ignore).cancel_token(token);
        let actions = (0..4).map(|_| success()).collect();
        let snap = ActionGroupRunner::new("cancel", actions, config, exec.clone())
            .unwrap()
            .run()
            .await;
        assert_flags(&snap, true, false, 2);
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_during_last_action_is_not_completed() {
        let token = CancellationToken::new();
        let exec = Arc::new(ScriptedExecutor::cancelling_after(2, token.clone()));
        let config = RunConfig::new(GlobalErrorBehavior::Halt).cancel_token(token);
        let snap = ActionGroupRunner::new("late cancel", vec![success(), success()], config, exec)
            .unwrap()
            .run()
            .await;
        assert_flags(&snap, true, false, 2);
        assert_eq!(snap.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_spaced_values_stay_in_one_argument() {
        let exec = Arc::new(ScriptedExecutor::default());
        let config = RunConfig::new(GlobalErrorBehavior::Halt)
            .variable("site", "/content/my site")
            .secure_variable("password", "correct horse");
        let actions = vec![
            Action::new(
                "spaced",
                "-F pw=${password} -F \"path=${site}\" http://localhost/echo",
            )
            .with_result_type(ResultType::Plain),
        ];
        let snap = ActionGroupRunner::new("spaced", actions, config, exec.clone())
            .unwrap()
            .run()
            .await;
        assert_flags(&snap, true, true, 1);

        let sent = CommandSpec::parse(&exec.calls()[0]).unwrap();
        assert_eq!(
            sent.form,
            vec![
                ("pw".to_string(), "correct horse".to_string()),
                ("path".to_string(), "/content/my site".to_string()),
            ]
        );
        assert_eq!(sent.url, "http://localhost/echo");

        let result = &snap.results()[0];
        assert_eq!(
            result.command(),
            Some("-F pw=[REDACTED:password] -F 'path=/content/my site' http://localhost/echo")
        );
        assert!(!result.response_summary().contains("horse"));
        assert!(!result.response_summary().contains("correct"));
    }

    #[test]
    fn test_run_config_debug_masks_secure_values() {
        let config = RunConfig::new(GlobalErrorBehavior::Halt)
            .variable("site", "/content/site")
            .secure_variable("password", "hunter2");
        let shown = format!("{config:?}");
        assert!(shown.contains("/content/site"));
        assert!(shown.contains("[REDACTED]"));
        assert!(!shown.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_observer_sees_consistent_progress() {
        let exec = Arc::new(ScriptedExecutor::default());
        let actions = vec![success(), failure(), success()];
        let runner = ActionGroupRunner::new(
            "observed",
            actions,
            RunConfig::new(GlobalErrorBehavior::Ignore),
            exec,
        )
        .unwrap();
        let result = runner.result();
        let mut rx = result.subscribe();
        let handle = runner.spawn();

        let mut last_len = 0;
        loop {
            rx.changed().await.unwrap();
            let snap = rx.borrow_and_update().clone();
            assert!(snap.results().len() >= last_len);
            last_len = snap.results().len();
            if snap.is_finished() {
                assert_eq!(last_len, 3);
                break;
            }
        }

        let final_snap = handle.await.unwrap();
        assert!(final_snap.completed());
        assert!(result.completed());
        assert!(!result.completely_successful());
    }

    #[test]
    fn test_rejects_unrunnable_actions() {
        let exec = Arc::new(ScriptedExecutor::default());
        let err = ActionGroupRunner::new(
            "bad",
            vec![success(), Action::new("empty", "")],
            RunConfig::default(),
            exec,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            RunnerError::InvalidAction {
                index: 1,
                name: "empty".into()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let snap = run(Vec::new(), RunConfig::default()).await;
        assert_flags(&snap, true, true, 0);
    }
}
