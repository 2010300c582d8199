//! End-to-end tests over loopback TCP: a real hub, relay, and leaves.

use std::sync::Arc;
use std::time::Duration;

use fuelline_core::{FuelType, Margin, Transaction};
use fuelline_db::{Database, DbConfig};
use fuelline_sync::{
    FrameReader, FrameWriter, HubConfig, HubHandle, HubServer, LeafConfig, LeafHandle, LeafNode,
    MemoryStore, Message, RelayConfig, RelayHandle, RelayNode, SaleSimulation, TransactionStore,
};
use tokio::net::{TcpListener, TcpStream};

const MAX_FRAME: usize = 1024 * 1024;
const FAST_RECONNECT: Duration = Duration::from_millis(50);

macro_rules! wait_until {
    ($cond:expr) => {{
        let mut met = false;
        for _ in 0..500 {
            if $cond {
                met = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(met, "timed out waiting for {}", stringify!($cond));
    }};
}

async fn start_hub(bind_addr: &str, ledger: Arc<MemoryStore>) -> HubHandle {
    HubServer::new(
        HubConfig {
            node_id: "hub".to_string(),
            bind_addr: bind_addr.to_string(),
            max_frame_len: MAX_FRAME,
        },
        ledger,
    )
    .start()
    .await
    .unwrap()
}

/// Starts a hub on an address a previous hub may still be releasing.
async fn restart_hub(bind_addr: &str, ledger: Arc<MemoryStore>) -> HubHandle {
    for _ in 0..100 {
        let started = HubServer::new(
            HubConfig {
                node_id: "hub".to_string(),
                bind_addr: bind_addr.to_string(),
                max_frame_len: MAX_FRAME,
            },
            ledger.clone(),
        )
        .start()
        .await;
        if let Ok(hub) = started {
            return hub;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not rebind hub on {}", bind_addr);
}

async fn start_relay(hub_addr: &str, store: Arc<dyn TransactionStore>) -> RelayHandle {
    RelayNode::new(
        RelayConfig {
            node_id: "relay-north".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            hub_addr: hub_addr.to_string(),
            reconnect_delay: FAST_RECONNECT,
            max_frame_len: MAX_FRAME,
            margin: Margin::RELAY,
            outbox_retention_days: 7,
            cleanup_interval: Duration::ZERO,
        },
        store,
    )
    .start()
    .await
    .unwrap()
}

fn start_leaf(id: &str, relay_addr: &str, simulation: Option<SaleSimulation>) -> LeafHandle {
    LeafNode::new(LeafConfig {
        node_id: id.to_string(),
        relay_addr: relay_addr.to_string(),
        reconnect_delay: FAST_RECONNECT,
        max_frame_len: MAX_FRAME,
        simulation,
    })
    .start()
}

/// An address nothing is listening on yet.
async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[tokio::test]
async fn test_price_reaches_leaf_with_margin() {
    let ledger = Arc::new(MemoryStore::new());
    let hub = start_hub("127.0.0.1:0", ledger).await;
    let relay = start_relay(&hub.local_addr().to_string(), Arc::new(MemoryStore::new())).await;
    let leaf = start_leaf("leaf-1", &relay.local_addr().to_string(), None);

    wait_until!(relay.is_linked() && hub.connection_count().await == 1);
    wait_until!(leaf.is_linked() && relay.leaf_count().await == 1);

    hub.broadcast_price("95", 1000).await.unwrap();
    hub.broadcast_price("93", 999).await.unwrap();

    wait_until!(leaf.price("93").await == Some(1148));
    assert_eq!(leaf.price("95").await, Some(1150));
    assert_eq!(
        relay.prices().await,
        vec![(FuelType::from("93"), 1148), (FuelType::from("95"), 1150)]
    );
    assert_eq!(
        hub.prices().await,
        vec![(FuelType::from("93"), 999), (FuelType::from("95"), 1000)]
    );

    leaf.shutdown().await;
    relay.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_new_leaf_gets_snapshot_before_broadcasts() {
    let hub = start_hub("127.0.0.1:0", Arc::new(MemoryStore::new())).await;
    let relay = start_relay(&hub.local_addr().to_string(), Arc::new(MemoryStore::new())).await;
    wait_until!(relay.is_linked() && hub.connection_count().await == 1);

    hub.broadcast_price("95", 1000).await.unwrap();
    wait_until!(relay.prices().await.len() == 1);

    // Raw leaf so the exact frame order is visible
    let stream = TcpStream::connect(relay.local_addr()).await.unwrap();
    let (read, _write) = stream.into_split();
    let mut reader = FrameReader::new(read);

    let first = reader.recv_message().await.unwrap().unwrap().unwrap();
    assert_eq!(first, Message::price_local("95", 1150));

    wait_until!(relay.leaf_count().await == 1);
    hub.broadcast_price("Diesel", 2000).await.unwrap();
    let second = reader.recv_message().await.unwrap().unwrap().unwrap();
    assert_eq!(second, Message::price_local("Diesel", 2300));

    relay.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_sale_reaches_hub_ledger() {
    let ledger = Arc::new(MemoryStore::new());
    let hub = start_hub("127.0.0.1:0", ledger.clone()).await;
    let outbox = Arc::new(MemoryStore::new());
    let relay = start_relay(&hub.local_addr().to_string(), outbox.clone()).await;
    let leaf = start_leaf("leaf-7", &relay.local_addr().to_string(), None);

    wait_until!(relay.is_linked() && hub.connection_count().await == 1);
    wait_until!(leaf.is_linked() && relay.leaf_count().await == 1);
    hub.broadcast_price("97", 2000).await.unwrap();
    wait_until!(leaf.price("97").await == Some(2300));

    let receipt = leaf
        .sell("97", 12.5, Duration::from_millis(20))
        .await
        .unwrap();
    assert_eq!(receipt.unit_price, 2300);
    assert_eq!(receipt.transaction.loads, 1);

    wait_until!(ledger.ledger_entries().len() == 1);
    let recorded = &ledger.ledger_entries()[0];
    assert_eq!(recorded.leaf_id, "leaf-7");
    assert_eq!(recorded.relay_id.as_deref(), Some("relay-north"));
    assert_eq!(recorded.litres, 12.5);

    wait_until!(relay.unsynced_count().await.unwrap() == 0);
    assert_eq!(outbox.outbox_records().len(), 1);

    let totals = hub.fuel_totals().await.unwrap();
    assert_eq!(totals[0].fuel_type, "97");
    assert_eq!(totals[0].loads, 1);

    leaf.shutdown().await;
    relay.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_outbox_survives_hub_outage() {
    let hub_addr = free_addr().await;
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let relay = start_relay(&hub_addr, Arc::new(db.clone())).await;

    // Relay runs autonomously: reports are accepted and persisted
    let stream = TcpStream::connect(relay.local_addr()).await.unwrap();
    let (_read, write) = stream.into_split();
    let mut leaf = FrameWriter::new(write);
    for litres in [10.0, 20.0, 30.0] {
        leaf.send_message(&Transaction::new("leaf-1", "95", litres).into())
            .await
            .unwrap();
    }

    wait_until!(relay.unsynced_count().await.unwrap() == 3);
    assert!(!relay.is_linked());

    // Hub comes up; reconnect triggers the sync pass
    let ledger = Arc::new(MemoryStore::new());
    let hub = start_hub(&hub_addr, ledger.clone()).await;

    wait_until!(ledger.ledger_entries().len() == 3);
    wait_until!(relay.unsynced_count().await.unwrap() == 0);
    assert!(db.outbox().list_unsynced().await.unwrap().is_empty());

    // Forwarded in ascending id order
    let litres: Vec<f64> = ledger.ledger_entries().iter().map(|t| t.litres).collect();
    assert_eq!(litres, vec![10.0, 20.0, 30.0]);

    relay.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_outbox_replays_after_link_drops() {
    let ledger = Arc::new(MemoryStore::new());
    let hub = start_hub("127.0.0.1:0", ledger.clone()).await;
    let hub_addr = hub.local_addr().to_string();
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let relay = start_relay(&hub_addr, Arc::new(db.clone())).await;
    wait_until!(relay.is_linked() && hub.connection_count().await == 1);

    let stream = TcpStream::connect(relay.local_addr()).await.unwrap();
    let (_read, write) = stream.into_split();
    let mut leaf = FrameWriter::new(write);

    // Linked: forwarded at once
    leaf.send_message(&Transaction::new("leaf-1", "95", 1.0).into())
        .await
        .unwrap();
    wait_until!(ledger.ledger_entries().len() == 1);

    let mut hub = hub;
    let mut sent = 1.0;
    for cycle in 1..=2 {
        hub.shutdown().await;
        wait_until!(!relay.is_linked());

        for _ in 0..2 {
            sent += 1.0;
            leaf.send_message(&Transaction::new("leaf-1", "95", sent).into())
                .await
                .unwrap();
        }
        wait_until!(relay.unsynced_count().await.unwrap() == 2);

        hub = restart_hub(&hub_addr, ledger.clone()).await;
        wait_until!(relay.is_linked());
        wait_until!(ledger.ledger_entries().len() == 1 + 2 * cycle);
        wait_until!(relay.unsynced_count().await.unwrap() == 0);
    }

    // Nothing arrives twice
    tokio::time::sleep(Duration::from_millis(100)).await;
    let litres: Vec<f64> = ledger.ledger_entries().iter().map(|t| t.litres).collect();
    assert_eq!(litres, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert!(db.outbox().list_unsynced().await.unwrap().is_empty());

    relay.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_leaf_queues_updates_during_sale() {
    let ledger = Arc::new(MemoryStore::new());
    let hub = start_hub("127.0.0.1:0", ledger.clone()).await;
    let relay = start_relay(&hub.local_addr().to_string(), Arc::new(MemoryStore::new())).await;
    let leaf = start_leaf("leaf-1", &relay.local_addr().to_string(), None);

    wait_until!(relay.is_linked() && hub.connection_count().await == 1);
    wait_until!(leaf.is_linked() && relay.leaf_count().await == 1);
    hub.broadcast_price("95", 1000).await.unwrap();
    wait_until!(leaf.price("95").await == Some(1150));

    let seller = leaf.clone();
    let sale = tokio::spawn(async move {
        seller
            .sell("95", 30.0, Duration::from_secs(2))
            .await
            .unwrap()
    });
    wait_until!(leaf.is_operating().await);

    // 1044 -> 1200, 1131 -> 1300 after margin
    hub.broadcast_price("95", 1044).await.unwrap();
    hub.broadcast_price("95", 1131).await.unwrap();
    wait_until!(leaf
        .recent_activity(20)
        .iter()
        .any(|e| e.line.contains("95 = 1300 queued")));

    assert_eq!(leaf.price("95").await, Some(1150));
    assert_eq!(leaf.pending_count().await, 1);

    let receipt = sale.await.unwrap();
    assert_eq!(receipt.unit_price, 1150);
    assert_eq!(receipt.applied_updates, vec![(FuelType::from("95"), 1300)]);
    assert_eq!(leaf.price("95").await, Some(1300));
    assert!(!leaf.is_operating().await);

    wait_until!(ledger.ledger_entries().len() == 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ledger.ledger_entries().len(), 1);

    // Idle: applied at once
    hub.broadcast_price("93", 800).await.unwrap();
    wait_until!(leaf.price("93").await == Some(920));
    assert_eq!(leaf.pending_count().await, 0);

    leaf.shutdown().await;
    relay.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_leaf_report_waits_for_relay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = listener.local_addr().unwrap().to_string();
    let leaf = start_leaf("leaf-3", &relay_addr, None);

    // First session: deliver a price, then drop the link
    let (stream, _) = listener.accept().await.unwrap();
    let (read, write) = stream.into_split();
    let mut from_leaf = FrameReader::new(read);
    let mut to_leaf = FrameWriter::new(write);
    assert_eq!(
        from_leaf.recv_message().await.unwrap().unwrap().unwrap(),
        Message::online("leaf-3")
    );
    to_leaf.send_message(&Message::price_local("Kerosene", 700)).await.unwrap();
    wait_until!(leaf.price("Kerosene").await == Some(700));

    drop(from_leaf);
    drop(to_leaf);
    wait_until!(!leaf.is_linked());

    // Sells from cache while the relay is away
    leaf.sell("Kerosene", 8.25, Duration::ZERO).await.unwrap();

    // Second session: heartbeat, then the queued report
    let (stream, _) = listener.accept().await.unwrap();
    let (read, _write) = stream.into_split();
    let mut from_leaf = FrameReader::new(read);
    assert_eq!(
        from_leaf.recv_message().await.unwrap().unwrap().unwrap(),
        Message::online("leaf-3")
    );
    assert_eq!(
        from_leaf.recv_message().await.unwrap().unwrap().unwrap(),
        Message::TransactionReport(Transaction::new("leaf-3", "Kerosene", 8.25))
    );

    leaf.shutdown().await;
}

#[tokio::test]
async fn test_simulation_sells_when_priced() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = listener.local_addr().unwrap().to_string();
    let simulation = SaleSimulation {
        fuel_types: vec![FuelType::from("95")],
        min_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(30),
        min_loading: Duration::from_millis(10),
        max_loading: Duration::from_millis(20),
    };
    let leaf = start_leaf("leaf-sim", &relay_addr, Some(simulation));

    let (stream, _) = listener.accept().await.unwrap();
    let (read, write) = stream.into_split();
    let mut from_leaf = FrameReader::new(read);
    let mut to_leaf = FrameWriter::new(write);
    from_leaf.recv_message().await.unwrap().unwrap().unwrap();

    to_leaf.send_message(&Message::price_local("95", 1150)).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), from_leaf.recv_message())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .unwrap();
    match report {
        Message::TransactionReport(tx) => {
            assert_eq!(tx.leaf_id, "leaf-sim");
            assert_eq!(tx.fuel_type, FuelType::from("95"));
            assert!((5.0..=60.0).contains(&tx.litres));
            assert_eq!(tx.loads, 1);
            assert!(tx.relay_id.is_none());
        }
        other => panic!("expected a report, got {:?}", other),
    }

    leaf.shutdown().await;
}
