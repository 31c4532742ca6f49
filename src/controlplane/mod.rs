//! Control Plane Module
//!
//! Everything that talks to the outside world: the targetd backend adapter,
//! the persistent volume store, and the kube-runtime reconcilers feeding
//! events into the provisioning core.

pub mod backends;
pub mod metrics;
pub mod reconciler;
pub mod retry;
pub mod store;

pub use backends::*;
pub use metrics::Metrics;
pub use reconciler::{Context, ProvisionerConfig, FINALIZER};
pub use retry::{RetryConfig, RetryTracker};
pub use store::KubeVolumeStore;
