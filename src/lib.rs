//! fsgrade core library: model-based conformance grading for file-serving
//! HTTP servers.

#[path = "model/compare.rs"]
mod compare;
#[path = "platform/config.rs"]
mod config;
#[path = "model/env.rs"]
mod env;
#[path = "gen/env_gen.rs"]
mod env_gen;
#[path = "platform/error.rs"]
mod error;
#[path = "platform/http.rs"]
mod http;
#[path = "gen/names.rs"]
mod names;
#[path = "model/query.rs"]
mod query;
#[path = "gen/query_gen.rs"]
mod query_gen;
#[path = "model/reporting.rs"]
mod reporting;
#[path = "runtime/runner.rs"]
mod runner;
#[path = "runtime/scenario.rs"]
mod scenario;
#[path = "runtime/suite.rs"]
mod suite;

pub use compare::*;
pub use config::*;
pub use env::*;
pub use env_gen::*;
pub use error::*;
pub use http::*;
pub use names::*;
pub use query::*;
pub use query_gen::*;
pub use reporting::*;
pub use runner::*;
pub use scenario::*;
pub use suite::*;
