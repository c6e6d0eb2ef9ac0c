//! Presence: mapping users to their live connections

mod registry;

pub use registry::{Disconnection, PresenceRegistry};
