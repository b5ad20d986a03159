//! Reconciliation logic turning queued keys into created snapshots

pub mod snapshot;
