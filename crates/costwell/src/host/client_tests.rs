//! Tests for plugin client construction and teardown

#[cfg(test)]
mod client_tests {
    use crate::config::LaunchConfig;
    use crate::error::{PluginError, PluginErrorKind, PluginResult};
    use crate::host::client::{Client, CostSource};
    use crate::host::launcher::{allocate_port, CleanupFn, Launched, Launcher};
    use crate::host::process::ProcessLauncher;
    use crate::proto::{self, CostSourceServer, CostSourceService};
    use crate::types::{ActualCostQuery, ResourceDescriptor, TransportKind};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tokio::net::TcpListener;
    use tonic::transport::server::TcpIncoming;
    use tonic::transport::{Channel, Endpoint, Server};
    use tonic::{Request, Response, Status};

    /// Channel to a port nobody listens on; every RPC fails.
    fn dead_channel() -> Channel {
        let port = allocate_port().unwrap();
        Endpoint::from_shared(format!("http://127.0.0.1:{}", port))
            .unwrap()
            .connect_lazy()
    }

    fn counting_cleanup(calls: Arc<AtomicUsize>, fail: bool) -> CleanupFn {
        CleanupFn::new(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(PluginError::cleanup("fake", "kill failed", None))
                } else {
                    Ok(())
                }
            }
        })
    }

    /// Launcher that "starts" a plugin whose RPCs all fail
    struct FakeLauncher {
        config: LaunchConfig,
        starts: AtomicUsize,
        cleanups: Arc<AtomicUsize>,
        cleanup_fails: bool,
    }

    impl FakeLauncher {
        fn new(cleanup_fails: bool) -> Self {
            Self {
                config: LaunchConfig {
                    handshake_timeout: Duration::from_secs(5),
                    ..Default::default()
                },
                starts: AtomicUsize::new(0),
                cleanups: Arc::new(AtomicUsize::new(0)),
                cleanup_fails,
            }
        }
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn start(
            &self,
            _cancel: &CancellationToken,
            _binary: &Path,
            _args: &[String],
        ) -> PluginResult<Launched> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Launched {
                channel: dead_channel(),
                cleanup: counting_cleanup(self.cleanups.clone(), self.cleanup_fails),
            })
        }

        fn transport(&self) -> TransportKind {
            TransportKind::Tcp
        }

        fn config(&self) -> &LaunchConfig {
            &self.config
        }
    }

    #[tokio::test]
    async fn test_connect_missing_binary_returns_error() {
        let launcher = ProcessLauncher::new(LaunchConfig::default());
        let result = Client::connect(
            &CancellationToken::new(),
            &launcher,
            Path::new("/nonexistent/plugin/binary"),
            &[],
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), PluginErrorKind::Launcher);
    }

    #[tokio::test]
    async fn test_name_failure_runs_cleanup() {
        let launcher = FakeLauncher::new(false);
        let err = Client::connect(
            &CancellationToken::new(),
            &launcher,
            Path::new("fake-plugin"),
            &[],
        )
        .await
        .unwrap_err();

        assert!(
            err.to_string().contains("getting plugin name"),
            "unexpected error: {}",
            err
        );
        assert_eq!(err.kind(), PluginErrorKind::Protocol);
        assert_eq!(launcher.starts.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_name_and_cleanup_failure_are_combined() {
        let launcher = FakeLauncher::new(true);
        let err = Client::connect(
            &CancellationToken::new(),
            &launcher,
            Path::new("fake-plugin"),
            &[],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PluginError::Composite { .. }));
        let text = err.to_string();
        assert!(text.contains("getting plugin name"));
        assert!(text.contains("kill failed"));
        assert_eq!(launcher.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_fast_without_launching() {
        let launcher = FakeLauncher::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Client::connect(&cancel, &launcher, Path::new("fake-plugin"), &[])
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(launcher.starts.load(Ordering::SeqCst), 0);
        assert_eq!(launcher.cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_is_repeatable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Client::from_parts(
            "aws-public",
            dead_channel(),
            counting_cleanup(calls.clone(), false),
        );

        assert!(!client.is_closed());
        for expected in 1..=3 {
            client.close().await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), expected);
        }
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_rpc_after_close_fails() {
        let client = Client::from_parts("aws-public", dead_channel(), CleanupFn::noop());
        client.close().await.unwrap();

        let resource = ResourceDescriptor::new("aws:ec2/instance:Instance", "aws", "t3.micro", "");
        let err = client.projected_cost(&resource).await.unwrap_err();
        assert_eq!(err.kind(), PluginErrorKind::Rpc);
        assert!(err.to_string().contains("client closed"));
    }

    #[tokio::test]
    async fn test_unreachable_plugin_is_an_rpc_error() {
        let client = Client::from_parts("aws-public", dead_channel(), CleanupFn::noop());
        let resource = ResourceDescriptor::new("aws:ec2/instance:Instance", "aws", "t3.micro", "");

        let err = client.projected_cost(&resource).await.unwrap_err();
        assert_eq!(err.kind(), PluginErrorKind::Rpc);
        assert!(err.to_string().contains("aws-public"));
    }

    /// In-process plugin answering over a real gRPC connection
    #[derive(Clone)]
    struct ServedPlugin {
        name: String,
        protocol_version: String,
    }

    impl ServedPlugin {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                protocol_version: proto::PROTOCOL_VERSION.to_string(),
            }
        }
    }

    #[async_trait]
    impl CostSourceService for ServedPlugin {
        async fn name(
            &self,
            _request: Request<proto::NameRequest>,
        ) -> Result<Response<proto::NameResponse>, Status> {
            Ok(Response::new(proto::NameResponse {
                name: self.name.clone(),
                protocol_version: self.protocol_version.clone(),
            }))
        }

        async fn get_projected_cost(
            &self,
            request: Request<proto::GetProjectedCostRequest>,
        ) -> Result<Response<proto::GetProjectedCostResponse>, Status> {
            let resource = request.into_inner().resources.into_iter().next();
            match resource {
                Some(r) if r.sku == "t3.micro" => {
                    Ok(Response::new(proto::GetProjectedCostResponse {
                        results: vec![proto::ProjectedCostResult {
                            currency: String::new(),
                            unit_price: 0.0104,
                            cost_per_month: 7.59,
                            billing_detail: "on-demand".to_string(),
                        }],
                    }))
                }
                _ => Err(Status::not_found("unknown sku")),
            }
        }

        async fn get_actual_cost(
            &self,
            _request: Request<proto::GetActualCostRequest>,
        ) -> Result<Response<proto::GetActualCostResponse>, Status> {
            let entry = |timestamp| proto::ActualCostResult {
                timestamp,
                cost: 1.25,
                usage_amount: 24.0,
                usage_unit: "Hrs".to_string(),
                source: "billing".to_string(),
            };
            Ok(Response::new(proto::GetActualCostResponse {
                results: vec![entry(1_700_000_000), entry(i64::MAX)],
            }))
        }
    }

    /// Launcher that serves a [`ServedPlugin`] in-process; cleanup stops it
    struct ServingLauncher {
        config: LaunchConfig,
        plugin: ServedPlugin,
        cleanups: Arc<AtomicUsize>,
    }

    impl ServingLauncher {
        fn new(plugin: ServedPlugin) -> Self {
            Self {
                config: LaunchConfig {
                    handshake_timeout: Duration::from_secs(5),
                    ..Default::default()
                },
                plugin,
                cleanups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Launcher for ServingLauncher {
        async fn start(
            &self,
            _cancel: &CancellationToken,
            _binary: &Path,
            _args: &[String],
        ) -> PluginResult<Launched> {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
            let server = tokio::spawn(
                Server::builder()
                    .add_service(CostSourceServer::new(self.plugin.clone()))
                    .serve_with_incoming(incoming),
            );

            let abort = server.abort_handle();
            let calls = self.cleanups.clone();
            let channel = Endpoint::from_shared(format!("http://{}", address))
                .unwrap()
                .connect_lazy();
            Ok(Launched {
                channel,
                cleanup: CleanupFn::new(move || {
                    let abort = abort.clone();
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        abort.abort();
                        Ok(())
                    }
                }),
            })
        }

        fn transport(&self) -> TransportKind {
            TransportKind::Tcp
        }

        fn config(&self) -> &LaunchConfig {
            &self.config
        }
    }

    fn t3_micro() -> ResourceDescriptor {
        ResourceDescriptor::new("aws:ec2/instance:Instance", "aws", "t3.micro", "us-east-1")
    }

    #[tokio::test]
    async fn test_connect_confirms_identity_and_prices() {
        let launcher = ServingLauncher::new(ServedPlugin::named("aws-public"));
        let client = Client::connect(&CancellationToken::new(), &launcher, Path::new("aws"), &[])
            .await
            .unwrap();

        assert_eq!(client.name(), "aws-public");
        assert_eq!(client.protocol_version(), Some(proto::PROTOCOL_VERSION));

        let price = client.projected_cost(&t3_micro()).await.unwrap().unwrap();
        assert_eq!(price.monthly_cost, 7.59);
        assert_eq!(price.currency, "USD");

        let mut other = t3_micro();
        other.sku = "m5.large".to_string();
        assert!(client.projected_cost(&other).await.unwrap().is_none());

        client.close().await.unwrap();
        assert_eq!(launcher.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reserved_plugin_names_are_rejected() {
        for reserved in ["spec", "none"] {
            let launcher = ServingLauncher::new(ServedPlugin::named(reserved));
            let err = Client::connect(&CancellationToken::new(), &launcher, Path::new("p"), &[])
                .await
                .unwrap_err();

            assert_eq!(err.kind(), PluginErrorKind::Protocol);
            let message = err.to_string();
            assert!(message.contains("getting plugin name"), "{}", message);
            assert!(message.contains("reserved"), "{}", message);
            assert_eq!(launcher.cleanups.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_other_protocol_version_still_connects() {
        let plugin = ServedPlugin {
            name: "future".to_string(),
            protocol_version: "v2".to_string(),
        };
        let launcher = ServingLauncher::new(plugin);
        let client = Client::connect(&CancellationToken::new(), &launcher, Path::new("f"), &[])
            .await
            .unwrap();

        assert_eq!(client.protocol_version(), Some("v2"));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_timestamps_are_dropped() {
        let launcher = ServingLauncher::new(ServedPlugin::named("billing"));
        let client = Client::connect(&CancellationToken::new(), &launcher, Path::new("b"), &[])
            .await
            .unwrap();

        let query = ActualCostQuery {
            resource_id: "i-0abc".to_string(),
            start: Utc.timestamp_opt(1_699_000_000, 0).unwrap(),
            end: Utc.timestamp_opt(1_701_000_000, 0).unwrap(),
            tags: HashMap::new(),
        };
        let entries = client.actual_cost(&query).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp.timestamp(), 1_700_000_000);
        client.close().await.unwrap();
    }
}
