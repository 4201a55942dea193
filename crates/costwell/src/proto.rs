//! Plugin wire protocol
//!
//! Messages and client stub for the `costwell.plugin.v1.CostSourceService`
//! gRPC service every plugin implements. The messages are declared with
//! `prost` derives. The client is a thin wrapper over
//! [`tonic::client::Grpc`] and [`CostSourceServer`] adapts a
//! [`CostSourceService`] implementation for `tonic::transport::Server`, so no
//! protoc step is needed at build time.
//!
//! ```text
//! service CostSourceService {
//!   rpc Name(NameRequest) returns (NameResponse);
//!   rpc GetProjectedCost(GetProjectedCostRequest) returns (GetProjectedCostResponse);
//!   rpc GetActualCost(GetActualCostRequest) returns (GetActualCostResponse);
//! }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codegen::http::{self, uri::PathAndQuery};
use tonic::codegen::{BoxFuture, Service};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

/// Fully-qualified service name
pub const SERVICE_NAME: &str = "costwell.plugin.v1.CostSourceService";
/// Protocol version the host speaks
pub const PROTOCOL_VERSION: &str = "v1";

const NAME_PATH: &str = "/costwell.plugin.v1.CostSourceService/Name";
const PROJECTED_PATH: &str = "/costwell.plugin.v1.CostSourceService/GetProjectedCost";
const ACTUAL_PATH: &str = "/costwell.plugin.v1.CostSourceService/GetActualCost";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NameRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NameResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Empty for plugins that predate protocol versioning
    #[prost(string, tag = "2")]
    pub protocol_version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceDescriptor {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(string, tag = "2")]
    pub provider: String,
    #[prost(string, tag = "3")]
    pub sku: String,
    #[prost(string, tag = "4")]
    pub region: String,
    #[prost(map = "string, string", tag = "5")]
    pub properties: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetProjectedCostRequest {
    #[prost(message, repeated, tag = "1")]
    pub resources: Vec<ResourceDescriptor>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProjectedCostResult {
    #[prost(string, tag = "1")]
    pub currency: String,
    #[prost(double, tag = "2")]
    pub unit_price: f64,
    #[prost(double, tag = "3")]
    pub cost_per_month: f64,
    #[prost(string, tag = "4")]
    pub billing_detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetProjectedCostResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<ProjectedCostResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetActualCostRequest {
    #[prost(string, tag = "1")]
    pub resource_id: String,
    /// Unix seconds
    #[prost(int64, tag = "2")]
    pub start: i64,
    /// Unix seconds
    #[prost(int64, tag = "3")]
    pub end: i64,
    #[prost(map = "string, string", tag = "4")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActualCostResult {
    /// Unix seconds
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(double, tag = "2")]
    pub cost: f64,
    #[prost(double, tag = "3")]
    pub usage_amount: f64,
    #[prost(string, tag = "4")]
    pub usage_unit: String,
    #[prost(string, tag = "5")]
    pub source: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetActualCostResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<ActualCostResult>,
}

impl From<&crate::types::ResourceDescriptor> for ResourceDescriptor {
    fn from(r: &crate::types::ResourceDescriptor) -> Self {
        Self {
            resource_type: r.resource_type.clone(),
            provider: r.provider.clone(),
            sku: r.sku.clone(),
            region: r.region.clone(),
            properties: r.properties.clone(),
        }
    }
}

/// Client stub for `CostSourceService`
#[derive(Debug, Clone)]
pub struct CostSourceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl CostSourceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn name(
        &mut self,
        request: impl tonic::IntoRequest<NameRequest>,
    ) -> Result<Response<NameResponse>, Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(NAME_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn get_projected_cost(
        &mut self,
        request: impl tonic::IntoRequest<GetProjectedCostRequest>,
    ) -> Result<Response<GetProjectedCostResponse>, Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(PROJECTED_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn get_actual_cost(
        &mut self,
        request: impl tonic::IntoRequest<GetActualCostRequest>,
    ) -> Result<Response<GetActualCostResponse>, Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(ACTUAL_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {}", e)))
    }
}

/// Plugin side of `CostSourceService`
#[async_trait]
pub trait CostSourceService: Send + Sync + 'static {
    async fn name(&self, request: Request<NameRequest>) -> Result<Response<NameResponse>, Status>;

    async fn get_projected_cost(
        &self,
        request: Request<GetProjectedCostRequest>,
    ) -> Result<Response<GetProjectedCostResponse>, Status>;

    async fn get_actual_cost(
        &self,
        _request: Request<GetActualCostRequest>,
    ) -> Result<Response<GetActualCostResponse>, Status> {
        Err(Status::unimplemented("GetActualCost"))
    }
}

type Handled<Resp> = BoxFuture<Response<Resp>, Status>;

/// One routed method: the shared implementation plus the call into it
struct Method<T, Req, Resp> {
    inner: Arc<T>,
    handler: fn(Arc<T>, Request<Req>) -> Handled<Resp>,
}

impl<T, Req, Resp> tonic::server::UnaryService<Req> for Method<T, Req, Resp> {
    type Response = Resp;
    type Future = Handled<Resp>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        (self.handler)(Arc::clone(&self.inner), request)
    }
}

fn handle_name<T: CostSourceService>(
    inner: Arc<T>,
    request: Request<NameRequest>,
) -> Handled<NameResponse> {
    Box::pin(async move { inner.name(request).await })
}

fn handle_projected<T: CostSourceService>(
    inner: Arc<T>,
    request: Request<GetProjectedCostRequest>,
) -> Handled<GetProjectedCostResponse> {
    Box::pin(async move { inner.get_projected_cost(request).await })
}

fn handle_actual<T: CostSourceService>(
    inner: Arc<T>,
    request: Request<GetActualCostRequest>,
) -> Handled<GetActualCostResponse> {
    Box::pin(async move { inner.get_actual_cost(request).await })
}

async fn serve_unary<T, Req, Resp>(
    method: Method<T, Req, Resp>,
    request: http::Request<BoxBody>,
) -> http::Response<BoxBody>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
{
    let codec = tonic::codec::ProstCodec::<Resp, Req>::default();
    tonic::server::Grpc::new(codec).unary(method, request).await
}

/// Routes `CostSourceService` requests to a [`CostSourceService`]
/// implementation. Pass it to `tonic::transport::Server::add_service`.
#[derive(Debug)]
pub struct CostSourceServer<T> {
    inner: Arc<T>,
}

impl<T: CostSourceService> CostSourceServer<T> {
    pub fn new(service: T) -> Self {
        Self {
            inner: Arc::new(service),
        }
    }
}

impl<T> Clone for CostSourceServer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CostSourceService> Service<http::Request<BoxBody>> for CostSourceServer<T> {
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<BoxBody>) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        match request.uri().path() {
            NAME_PATH => {
                let method: Method<T, NameRequest, NameResponse> = Method {
                    inner,
                    handler: handle_name::<T>,
                };
                Box::pin(async move { Ok(serve_unary(method, request).await) })
            }
            PROJECTED_PATH => {
                let method: Method<T, GetProjectedCostRequest, GetProjectedCostResponse> = Method {
                    inner,
                    handler: handle_projected::<T>,
                };
                Box::pin(async move { Ok(serve_unary(method, request).await) })
            }
            ACTUAL_PATH => {
                let method: Method<T, GetActualCostRequest, GetActualCostResponse> = Method {
                    inner,
                    handler: handle_actual::<T>,
                };
                Box::pin(async move { Ok(serve_unary(method, request).await) })
            }
            other => {
                let status = Status::unimplemented(format!("unknown method {}", other));
                Box::pin(async move { Ok(status.into_http()) })
            }
        }
    }
}

impl<T> tonic::server::NamedService for CostSourceServer<T> {
    const NAME: &'static str = SERVICE_NAME;
}
