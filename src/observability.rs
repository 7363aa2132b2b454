use std::net::SocketAddr;

use crate::engine::Branch;
use crate::model::StoreOperation;

/// Counter: reconciliations planned. Labels: branch.
pub const RECONCILE_TOTAL: &str = "reprise_reconcile_total";

/// Histogram: planning + apply latency in seconds. Labels: branch.
pub const RECONCILE_DURATION_SECONDS: &str = "reprise_reconcile_duration_seconds";

/// Counter: store operations applied. Labels: kind.
pub const OPERATIONS_TOTAL: &str = "reprise_operations_total";

/// Counter: edits rejected because of a stale version.
pub const CONFLICTS_TOTAL: &str = "reprise_conflicts_total";

/// Counter: performances removed through bulk delete.
pub const BULK_DELETED_TOTAL: &str = "reprise_bulk_deleted_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

pub fn branch_label(branch: Branch) -> &'static str {
    match branch {
        Branch::Standalone => "standalone",
        Branch::NewRule => "new_rule",
        Branch::Broadcast => "broadcast",
        Branch::Detach => "detach",
        Branch::Regenerate => "regenerate",
    }
}

pub fn operation_label(op: &StoreOperation) -> &'static str {
    match op {
        StoreOperation::CreateRule(_) => "create_rule",
        StoreOperation::UpdateRule(_) => "update_rule",
        StoreOperation::Create(_) => "create",
        StoreOperation::Update(_) => "update",
        StoreOperation::Delete(_) => "delete",
    }
}
