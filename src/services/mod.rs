//! Reconciliation, polling and repair logic

pub mod adoption_admin;
pub mod backfill;
pub mod callback;
pub mod growth;
pub mod reconciliation;
pub mod status_poller;

pub use adoption_admin::AdoptionAdmin;
pub use backfill::{BackfillConfig, BackfillService};
pub use callback::CallbackProcessor;
pub use growth::GrowthTracker;
pub use reconciliation::{PlantDefaults, ReconcileOutcome, ReconciliationEngine, StatusUpdate};
pub use status_poller::{PollSummary, PollerConfig, StatusPoller};
