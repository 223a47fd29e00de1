// Service layer
//
// log_analyzer and the fix orchestrator are the core engines; gitlab,
// ai and notification wrap the external collaborators.

pub mod ai;
pub mod fix;
pub mod gitlab;
pub mod log_analyzer;
pub mod notification;
