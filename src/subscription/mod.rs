pub mod registry;
#[allow(clippy::module_inception)]
pub mod subscription;

pub use registry::SubscriptionRegistry;
pub(crate) use subscription::SubscriptionState;
pub use subscription::{Subscription, SubscriptionHandle};
