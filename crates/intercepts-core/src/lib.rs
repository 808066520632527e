//! Function interception core for intercepts.
//!
//! Given a callable that cannot carry attached context, this crate builds a
//! trampoline that can be installed in its place. Every invocation of the
//! trampoline is funneled into one dispatch entry point together with a
//! recoverable identity of the original callable, and the dispatcher decides
//! whether to call through, substitute, observe or suppress.
//!
//! # Architecture
//!
//! ```text
//! caller -> Trampoline -> invoke_with_identity -> DispatchEntry -> policy chain -> original
//!                         (pushes C ++ [id])      (reads trailing constant)
//! ```
//!
//! The crate consists of:
//! - **Values** (`value`): dynamically typed arguments and results
//! - **Callables** (`callable`): shareable callable descriptors and their kinds
//! - **Identity encoder** (`identity`): descriptor address <-> `CallableIdentity`
//! - **Constant pool** (`pool`): the dispatcher's embedded constants
//! - **Constant injection** (`inject`): scoped swap/invoke/restore of the pool
//! - **Dispatch entry point** (`dispatch`): identity resolution and policy execution
//! - **Policies** (`policy`): per-identity policy chains
//! - **Trampoline factory** (`trampoline`)
//! - **Call sites** (`site`): installation slots callers invoke through
//! - **Registration** (`registration`): the `Interceptor` front door
//! - **Configuration** (`config`): pool isolation mode
//! - **Metrics** (`metrics`): atomic counters for observability

pub mod callable;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod inject;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod registration;
pub mod site;
pub mod trampoline;
pub mod value;

pub use callable::{Callable, CallableBuilder, CallableKind};
pub use config::{PoolIsolation, pool_isolation};
pub use dispatch::{DispatchEntry, DispatchFrame};
pub use error::{BoxError, CallResult, InterceptError};
pub use identity::{CallableIdentity, DecodedCallable, IdentityTable, decode, encode};
pub use inject::invoke_with_identity;
pub use metrics::{InterceptMetrics, MetricsSnapshot, global_metrics};
pub use policy::{Next, Policy, PolicyTable};
pub use pool::{Constant, ConstantPool};
pub use registration::Interceptor;
pub use site::CallSite;
pub use trampoline::{Trampoline, make_trampoline};
pub use value::{Args, Kwargs, Value};
