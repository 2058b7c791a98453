use std::net::{IpAddr, SocketAddr};

use escola_backend::{
    AppState,
    cache::{CacheClient, keys::MFA_EVENTS_CHANNEL},
    clock,
    config::Config,
    router,
};
use futures_util::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 订阅 MFA 生命周期事件并写入日志
fn spawn_mfa_event_listener(store: CacheClient) {
    tokio::spawn(async move {
        let mut events = match store.subscribe(MFA_EVENTS_CHANNEL).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Failed to subscribe to MFA events: {}", e);
                return;
            }
        };
        while let Some(event) = events.next().await {
            tracing::info!(target: "mfa_audit", "{}", event);
        }
    });
}

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");
    let clock = clock::system();

    // 设置键值存储，连接失败不阻止启动
    let store = CacheClient::from_config(&config, clock.clone()).unwrap_or_else(|e| {
        tracing::error!("Failed to create key-value store client, running disabled: {}", e);
        CacheClient::disabled()
    });
    match store.ping().await {
        Ok(()) => tracing::info!("Key-value store reachable"),
        Err(e) => tracing::error!("Key-value store ping failed, continuing degraded: {}", e),
    }
    spawn_mfa_event_listener(store.clone());

    let state = AppState::new(config, store, clock);
    let router = router::app(state.clone());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
