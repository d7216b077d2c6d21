use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self, BuildError> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
