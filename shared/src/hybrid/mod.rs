mod controller;
mod role;
mod routing;
mod state;

pub use controller::{Delivery, HybridController, WeakHybridController};
pub use role::{Inspection, Passive, SwitchRole};
pub use routing::RoutingPolicy;
pub use state::HybridState;
