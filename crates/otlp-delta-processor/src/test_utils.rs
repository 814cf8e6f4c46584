//! Utilities/mocks for testing.

use std::net::SocketAddr;
use std::time::Duration;

use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::{
    MetricsService, MetricsServiceServer,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, InstrumentationScope, KeyValue,
};
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data, number_data_point, AggregationTemporality, Gauge, Metric, NumberDataPoint,
    ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use otlp_delta_core::CancellationToken;
use tokio::sync::mpsc;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

pub fn kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_owned(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_owned())),
        }),
    }
}

pub fn point(time_unix_nano: u64, value: f64, attributes: Vec<KeyValue>) -> NumberDataPoint {
    NumberDataPoint {
        attributes,
        start_time_unix_nano: 1,
        time_unix_nano,
        exemplars: Vec::new(),
        flags: 0,
        value: Some(number_data_point::Value::AsDouble(value)),
    }
}

pub fn int_point(time_unix_nano: u64, value: i64, attributes: Vec<KeyValue>) -> NumberDataPoint {
    NumberDataPoint {
        value: Some(number_data_point::Value::AsInt(value)),
        ..point(time_unix_nano, 0.0, attributes)
    }
}

pub fn cumulative_sum(name: &str, is_monotonic: bool, data_points: Vec<NumberDataPoint>) -> Metric {
    Metric {
        name: name.to_owned(),
        description: format!("Description of {name}"),
        unit: "1".to_owned(),
        metadata: Vec::new(),
        data: Some(Data::Sum(Sum {
            data_points,
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic,
        })),
    }
}

pub fn gauge(name: &str, value: f64) -> Metric {
    Metric {
        name: name.to_owned(),
        description: String::new(),
        unit: String::new(),
        metadata: Vec::new(),
        data: Some(Data::Gauge(Gauge {
            data_points: vec![point(10, value, Vec::new())],
        })),
    }
}

pub fn resource_metrics(resource: Vec<KeyValue>, metrics: Vec<Metric>) -> ResourceMetrics {
    ResourceMetrics {
        resource: Some(Resource {
            attributes: resource,
            ..Default::default()
        }),
        scope_metrics: vec![ScopeMetrics {
            scope: Some(InstrumentationScope {
                name: "test-scope".to_owned(),
                version: "1.0".to_owned(),
                ..Default::default()
            }),
            metrics,
            schema_url: String::new(),
        }],
        schema_url: String::new(),
    }
}

/// A batch with one resource and one scope.
pub fn metrics_request(metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![resource_metrics(vec![kv("service.name", "test")], metrics)],
    }
}

/// Mock for receiving OTLP metrics downstream of the processor.
pub struct MockOtlpService {
    pub metrics_tx: mpsc::Sender<ExportMetricsServiceRequest>,
}

#[tonic::async_trait]
impl MetricsService for MockOtlpService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let _ = self.metrics_tx.send(request.into_inner()).await;
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}

/// Finds a port nobody is listening on.
pub fn free_local_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("Failed to find a free port")
}

/// Serves a [`MockOtlpService`] until `cancel` fires.
pub fn spawn_mock_collector(
    addr: SocketAddr,
    cancel: CancellationToken,
) -> mpsc::Receiver<ExportMetricsServiceRequest> {
    let (metrics_tx, metrics_rx) = mpsc::channel(16);
    let service = MockOtlpService { metrics_tx };
    tokio::spawn(async move {
        Server::builder()
            .add_service(MetricsServiceServer::new(service))
            .serve_with_shutdown(addr, async move { cancel.cancelled().await })
            .await
            .expect("Mock collector failed");
    });
    metrics_rx
}

/// Connects to a gRPC server that may still be starting.
pub async fn connect_with_retry(addr: SocketAddr) -> MetricsServiceClient<Channel> {
    let endpoint = format!("http://{addr}");
    for _ in 0..50 {
        if let Ok(client) = MetricsServiceClient::connect(endpoint.clone()).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Unable to connect to {endpoint}");
}
