//! CRD YAML Generator
//!
//! Prints the SnapshotRequest CRD manifest.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use pvc_snapshot_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
