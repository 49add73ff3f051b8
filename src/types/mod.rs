pub mod backup;
pub mod ledger;
pub mod queue;
