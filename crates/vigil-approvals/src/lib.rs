//! Two-phase plan approval: the store that owns `PendingApproval` records
//! and the service that drives plan → review → resume.

pub mod service;
pub mod store;

pub use service::{ApprovalService, CallbackBridge};
pub use store::ApprovalStore;
