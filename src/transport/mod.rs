//! Transport-layer middleware for gRPC servers.

use tower_http::trace::TraceLayer;

/// Tower trace layer that extracts `x-correlation-id` from gRPC request headers.
///
/// Creates a tracing span per request with the correlation_id, enabling
/// all downstream tracing to inherit it automatically. This works at the
/// HTTP layer, before tonic deserializes the protobuf body.
pub fn grpc_trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::GrpcErrorsAsFailures>,
    impl Fn(&http::Request<tonic::body::BoxBody>) -> tracing::Span + Clone,
> {
    TraceLayer::new_for_grpc().make_span_with(|request: &http::Request<tonic::body::BoxBody>| {
        let correlation_id = request
            .headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let path = request.uri().path();
        tracing::info_span!("grpc", %correlation_id, %path)
    })
}
