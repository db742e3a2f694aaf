#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Executor module for curly.

This module wires together:
- `command`: curl-style command line parsing
- `http`: the `HttpExecutor` seam and its reqwest / dry-run implementations
- `policy`: the error-behavior state machine
- `result`: observable run results
- `runner`: sequential batch execution

Typical usage:
- Build a `RunConfig` and an executor.
- Construct an `ActionGroupRunner`, grab `result()` for observers, then `run()` or `spawn()`.

Example:
```no_run
use std::sync::Arc;
use curly::config::{Action, GlobalErrorBehavior};
use curly::executor::{ActionGroupRunner, ClientFactory, RunConfig};

# async fn demo() -> anyhow::Result<()> {
let exec = ClientFactory::new().host("http://localhost:4502").build()?;
let config = RunConfig::new(GlobalErrorBehavior::Halt).variable("path", "/content/site");
let actions = vec![Action::new("activate", "-F cmd=activate -F path=${path} /bin/replicate.json")];
let snapshot = ActionGroupRunner::new("publish", actions, config, Arc::new(exec))?
    .run()
    .await;
println!("{snapshot}");
# Ok(())
# }
```
*/

pub mod command;
pub mod http;
pub mod policy;
pub mod result;
pub mod runner;

// Re-exports for convenient access from `curly::executor::*`
pub use command::{CommandError, CommandSpec};
pub use http::{ClientFactory, DryRunExecutor, ExecError, HttpExecutor, HttpResponse, ReqwestExecutor};
pub use policy::{EffectiveBehavior, ErrorPolicy, Verdict};
pub use result::{ActionResult, FailureKind, RunSnapshot, RunState, RunnerResult};
pub use runner::{ActionGroupRunner, RunConfig, RunnerError};
