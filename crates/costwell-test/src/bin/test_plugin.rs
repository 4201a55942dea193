//! Minimal cost plugin used by the lifecycle tests.
//!
//! Serves `CostSourceService` on `--port=<N>` or over stdin/stdout with
//! `--stdio`. Prices `t3.micro` at 7.59 USD/month, never answers for the
//! `hang` SKU and reports every other SKU as not found.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Parser;
use futures::StreamExt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tonic::transport::server::Connected;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use costwell::proto::{self, CostSourceServer, CostSourceService};

#[derive(Parser, Debug)]
struct Args {
    /// Serve on 127.0.0.1:<port>
    #[arg(long)]
    port: Option<u16>,
    /// Serve over stdin/stdout
    #[arg(long)]
    stdio: bool,
    /// Name reported by `Name()`
    #[arg(long, default_value = "test-plugin")]
    name: String,
    /// Write the process id here before serving
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

struct TestPlugin {
    name: String,
}

#[async_trait]
impl CostSourceService for TestPlugin {
    async fn name(
        &self,
        _request: Request<proto::NameRequest>,
    ) -> Result<Response<proto::NameResponse>, Status> {
        Ok(Response::new(proto::NameResponse {
            name: self.name.clone(),
            protocol_version: proto::PROTOCOL_VERSION.to_string(),
        }))
    }

    async fn get_projected_cost(
        &self,
        request: Request<proto::GetProjectedCostRequest>,
    ) -> Result<Response<proto::GetProjectedCostResponse>, Status> {
        let sku = request
            .into_inner()
            .resources
            .into_iter()
            .next()
            .map(|r| r.sku)
            .unwrap_or_default();

        match sku.as_str() {
            "t3.micro" => Ok(Response::new(proto::GetProjectedCostResponse {
                results: vec![proto::ProjectedCostResult {
                    currency: "USD".to_string(),
                    unit_price: 0.0104,
                    cost_per_month: 7.59,
                    billing_detail: "on-demand linux".to_string(),
                }],
            })),
            "hang" => futures::future::pending().await,
            other => Err(Status::not_found(format!("no price for {:?}", other))),
        }
    }

    async fn get_actual_cost(
        &self,
        request: Request<proto::GetActualCostRequest>,
    ) -> Result<Response<proto::GetActualCostResponse>, Status> {
        let request = request.into_inner();
        Ok(Response::new(proto::GetActualCostResponse {
            results: vec![proto::ActualCostResult {
                timestamp: request.start,
                cost: 12.5,
                usage_amount: 720.0,
                usage_unit: "Hrs".to_string(),
                source: self.name.clone(),
            }],
        }))
    }
}

/// The process's stdin and stdout as one connection
struct StdioConnection {
    stdin: tokio::io::Stdin,
    stdout: tokio::io::Stdout,
}

impl Connected for StdioConnection {
    type ConnectInfo = ();

    fn connect_info(&self) -> Self::ConnectInfo {}
}

impl AsyncRead for StdioConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdout).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_shutdown(cx)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.pid_file {
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let service = CostSourceServer::new(TestPlugin { name: args.name });
    let mut server = Server::builder();
    let router = server.add_service(service);

    if args.stdio {
        let connection = StdioConnection {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        };
        // One connection, then keep serving until killed
        let incoming = futures::stream::once(async { Ok::<_, io::Error>(connection) })
            .chain(futures::stream::pending());
        router.serve_with_incoming(incoming).await?;
    } else {
        let port = args.port.context("either --port or --stdio is required")?;
        router
            .serve(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .await?;
    }
    Ok(())
}
