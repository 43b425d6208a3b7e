// Marksync core managers
// Managers own the synchronization state: session, push subscription, reconciliation, edits.

pub mod reconciliation;
pub mod record_edit;
pub mod session_gate;
pub mod subscription_lifecycle;
