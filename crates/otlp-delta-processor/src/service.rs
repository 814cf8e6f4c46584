//! OTLP/gRPC endpoint that converts metrics and forwards them downstream.

use std::sync::Arc;

use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_client::MetricsServiceClient,
    metrics_service_server::{MetricsService, MetricsServiceServer},
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use otlp_delta_core::CancellationToken;
use tonic::{
    transport::{Channel, Endpoint, Server},
    Request, Response, Status,
};
use tracing::{debug, info, warn};

use crate::{DeltaProcessor, Error, ProcessorConfig};

/// Receives metric batches, converts cumulative sums and exports the result
/// to the downstream collector.
pub struct DeltaMetricsService {
    processor: Arc<DeltaProcessor>,
    downstream: MetricsServiceClient<Channel>,
}

impl DeltaMetricsService {
    pub fn new(processor: Arc<DeltaProcessor>, downstream: MetricsServiceClient<Channel>) -> Self {
        Self {
            processor,
            downstream,
        }
    }
}

#[tonic::async_trait]
impl MetricsService for DeltaMetricsService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let mut metrics = request.into_inner();
        let stats = self.processor.process(&mut metrics);
        debug!(
            converted = stats.converted,
            dropped = stats.dropped,
            tracked_series = self.processor.tracker().len(),
            "Converted metric batch"
        );
        // Clients are cheap to clone and share the channel.
        let mut downstream = self.downstream.clone();
        downstream.export(metrics).await.map_err(|status| {
            warn!(error = %status, "Failed to forward metrics downstream");
            Status::unavailable(format!(
                "downstream export failed: {}",
                status.message()
            ))
        })
    }
}

/// Runs the processor until `cancel` fires.
///
/// Stops the stale series sweeper before returning, even on error.
pub async fn serve(config: &ProcessorConfig, cancel: CancellationToken) -> Result<(), Error> {
    let result = run(config, &cancel).await;
    cancel.cancel();
    info!("Cumulative-to-delta processor stopped");
    result
}

async fn run(config: &ProcessorConfig, cancel: &CancellationToken) -> Result<(), Error> {
    config.validate()?;
    // Connect lazily so we can start before the downstream collector.
    let downstream =
        MetricsServiceClient::new(Endpoint::from_shared(config.otlp_endpoint.clone())?.connect_lazy());
    let processor = Arc::new(DeltaProcessor::new(config, cancel.clone())?);
    info!(
        listen = %config.listen_address,
        endpoint = %config.otlp_endpoint,
        max_stale = ?config.max_stale,
        monotonic_only = config.monotonic_only,
        "Starting cumulative-to-delta processor"
    );
    let shutdown = cancel.clone();
    Server::builder()
        .add_service(MetricsServiceServer::new(DeltaMetricsService::new(
            processor, downstream,
        )))
        .serve_with_shutdown(config.listen_address, async move {
            shutdown.cancelled().await
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        connect_with_retry, cumulative_sum, free_local_addr, metrics_request, point,
        spawn_mock_collector,
    };
    use opentelemetry_proto::tonic::metrics::v1::{
        metric::Data, number_data_point, AggregationTemporality,
    };
    use otlp_delta_core::MetricTracker;
    use std::time::Duration;

    #[tokio::test]
    async fn test_export_converts_and_forwards() -> Result<(), Error> {
        let cancel = CancellationToken::new();
        let collector_addr = free_local_addr();
        let mut received = spawn_mock_collector(collector_addr, cancel.clone());
        // Make sure the collector is up before anything is forwarded to it.
        connect_with_retry(collector_addr).await;

        let config = ProcessorConfig {
            listen_address: free_local_addr(),
            otlp_endpoint: format!("http://{collector_addr}"),
            max_stale: Duration::from_secs(300),
            ..Default::default()
        };
        let server_config = config.clone();
        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move { serve(&server_config, server_cancel).await });

        let mut client = connect_with_retry(config.listen_address).await;
        for (ts, cumulative) in [(10, 100.0), (50, 225.0)] {
            client
                .export(metrics_request(vec![cumulative_sum(
                    "requests",
                    true,
                    vec![point(ts, cumulative, vec![])],
                )]))
                .await?;
        }

        let expected = [(10, 100.0), (10, 125.0)];
        for (start, delta) in expected {
            let batch = received.recv().await.expect("Collector should receive batch");
            let metric = &batch.resource_metrics[0].scope_metrics[0].metrics[0];
            let Some(Data::Sum(sum)) = &metric.data else {
                panic!("Expected Sum data");
            };
            assert_eq!(
                sum.aggregation_temporality,
                AggregationTemporality::Delta as i32
            );
            assert_eq!(sum.data_points[0].start_time_unix_nano, start);
            assert_eq!(
                sum.data_points[0].value,
                Some(number_data_point::Value::AsDouble(delta))
            );
        }

        cancel.cancel();
        server.await.expect("Server task panicked")?;
        Ok(())
    }

    #[tokio::test]
    async fn test_export_reports_unavailable_downstream() {
        let processor = DeltaProcessor::with_tracker(
            MetricTracker::new(Duration::ZERO, CancellationToken::new()).unwrap(),
            &ProcessorConfig::default(),
        );
        let unreachable = Endpoint::from_shared(format!("http://{}", free_local_addr()))
            .unwrap()
            .connect_lazy();
        let service =
            DeltaMetricsService::new(Arc::new(processor), MetricsServiceClient::new(unreachable));

        let result = service
            .export(Request::new(metrics_request(vec![cumulative_sum(
                "requests",
                true,
                vec![point(10, 1.0, vec![])],
            )])))
            .await;
        let status = result.expect_err("Export should fail without a downstream");
        assert_eq!(status.code(), tonic::Code::Unavailable);
        // The point was still tracked before forwarding failed.
        assert_eq!(service.processor.tracker().len(), 1);
    }

    #[tokio::test]
    async fn test_serve_rejects_invalid_config() {
        let config = ProcessorConfig {
            otlp_endpoint: "localhost:4317".to_owned(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let result = serve(&config, cancel.clone()).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_serve_stops_sweeper_on_bad_endpoint() {
        let config = ProcessorConfig {
            otlp_endpoint: "http://bad host".to_owned(),
            max_stale: Duration::from_secs(60),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let result = serve(&config, cancel.clone()).await;
        assert!(matches!(result, Err(Error::TonicTransportError(_))));
        assert!(cancel.is_cancelled());
    }
}
