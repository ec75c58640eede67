use audit_service::{AuditService, ServiceConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::commands::{CommandError, CommandResult};

pub async fn run(mut config: ServiceConfig, bind: Option<SocketAddr>, metrics: Option<SocketAddr>) -> CommandResult<()> {
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    if let Some(addr) = metrics.or(config.metrics_addr) {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| CommandError::Validation(format!("cannot start metrics exporter: {}", e)))?;
        info!(%addr, "prometheus exporter listening");
    }

    let service = Arc::new(AuditService::from_config(&config).await?);
    audit_service::http::serve(service, config.bind_addr).await?;
    Ok(())
}
