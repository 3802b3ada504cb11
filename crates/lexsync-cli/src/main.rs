use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lexsync_core::app::{LoadSnapshot, SyncClient, SyncClientBuilder};
use lexsync_core::config::SyncConfig;
use lexsync_core::domain::EntityType;
use lexsync_core::impls::{
    FileKeyValueStore, HttpRecordStore, InMemoryCredentialStore, InMemoryRecordStore,
    WsPushConnector,
};
use lexsync_core::observability::init_tracing;
use lexsync_core::typed::Client;
use serde_json::json;
use tracing::{info, warn};

/// Bearer credential for the REST and push endpoints. Login is handled elsewhere.
const ENV_TOKEN: &str = "LEXSYNC_TOKEN";

const USAGE: &str = "usage: lexsync-cli [--demo] [config.toml]";

struct Args {
    demo: bool,
    config: Option<PathBuf>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Args {
            demo: false,
            config: None,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--demo" => parsed.demo = true,
                "-h" | "--help" => return Err(USAGE.to_string()),
                flag if flag.starts_with('-') => return Err(format!("unknown flag {flag}\n{USAGE}")),
                _ if parsed.config.is_none() => parsed.config = Some(PathBuf::from(arg)),
                _ => return Err(USAGE.to_string()),
            }
        }
        Ok(parsed)
    }
}

/// REST + WebSocket against the configured backend.
fn remote_client(config: &SyncConfig) -> Result<SyncClient, Box<dyn Error>> {
    let credentials = Arc::new(InMemoryCredentialStore::new(std::env::var(ENV_TOKEN).ok()));
    let store = HttpRecordStore::new(
        config.api_url.clone(),
        credentials.clone(),
        config.request_timeout(),
    )?;

    let mut builder = SyncClientBuilder::from_config(config)
        .record_store(Arc::new(store))
        .credentials(credentials)
        .push_connector(Arc::new(WsPushConnector::new(config.ws_url())));
    if let Some(dir) = &config.drafts.dir {
        builder = builder.local_store(Arc::new(FileKeyValueStore::open(dir)?));
    }
    Ok(builder.build()?)
}

/// In-memory backend with a simulated colleague adding clients.
fn demo_client(config: &SyncConfig) -> Result<SyncClient, Box<dyn Error>> {
    let store = Arc::new(InMemoryRecordStore::new());
    store.seed(
        EntityType::Client,
        json!({"name": "Acme Holdings", "email": "legal@acme.test", "phone": "555-0100"}),
    );
    store.seed(
        EntityType::Client,
        json!({"name": "Globex", "email": "office@globex.test", "phone": "555-0199"}),
    );

    let colleague = store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(15));
        ticker.tick().await;
        for n in 1u32.. {
            ticker.tick().await;
            let record = colleague.seed(
                EntityType::Client,
                json!({"name": format!("Walk-in client #{n}"), "email": "", "phone": ""}),
            );
            info!(entity_id = %record.id, "demo colleague added a client");
        }
    });

    Ok(SyncClientBuilder::from_config(config)
        .record_store(store)
        .credentials(Arc::new(InMemoryCredentialStore::new(Some("demo".into()))))
        .build()?)
}

fn print_clients(snapshot: &LoadSnapshot<Client>) {
    println!("clients ({}):", snapshot.records().len());
    for client in snapshot.records() {
        println!("  {:<28} {:<24} {} [{}]", client.name, client.email, client.phone, client.version);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse(std::env::args().skip(1))?;
    init_tracing("info")?;

    let config = SyncConfig::load(args.config.as_deref())?;
    let sync = if args.demo {
        demo_client(&config)?
    } else {
        remote_client(&config)?
    };

    // (A) 参照データを読み込む（失敗しても realtime は起動する）
    let clients = sync.loader::<Client>();
    match clients.load().await {
        Ok(_) => print_clients(&clients.snapshot()),
        Err(err) => warn!(error = %err, "initial client load failed"),
    }

    // (B) push channel + fallback poller を起動
    let realtime = sync.start_realtime();
    let mut changes = realtime.aggregator().subscribe();
    let mut state = realtime.subscribe_state();

    // (C) 変更があれば全件再読み込み、Ctrl-C で終了
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("sync: {}", serde_json::to_string(&realtime.status())?);
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let reloaded = realtime
                    .aggregator()
                    .consume(EntityType::Client, || async { clients.load().await.map(|_| ()) })
                    .await;
                match reloaded {
                    Ok(true) => print_clients(&clients.snapshot()),
                    Ok(false) => {}
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => warn!(error = %err, "client list reload failed"),
                }
            }
        }
    }

    info!("shutting down");
    clients.cancel().await;
    realtime.shutdown().await;
    Ok(())
}
