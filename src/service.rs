pub mod application_service;
pub mod contract_service;
pub mod error;
pub mod identity_provider;
pub mod job_service;
pub mod ledger_service;
pub mod notification_service;
pub mod payout_scheduler;
pub mod timesheet_service;

#[cfg(test)]
pub mod fixtures;
