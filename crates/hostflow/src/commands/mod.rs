pub mod events;
pub mod lifecycle;
pub mod provision;
pub mod reconcile;
pub mod status;
