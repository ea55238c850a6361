//! End-to-end transaction tests: BUY over UDP control plane handed off to
//! the TCP transaction orchestrator against real loopback listeners playing
//! the buyer/seller stream protocol, grounded on the teacher's
//! `net/encrypted.rs` `#[tokio::test]` loopback style (see `tests/net_test.rs`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agora::config::CoordinatorConfig;
use agora::net::message::StreamFrame;
use agora::net::{Engine, Endpoint};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

async fn start_coordinator(config: CoordinatorConfig) -> (Arc<Engine>, SocketAddr) {
    let endpoint = Arc::new(Endpoint::bind(config.bind_addr).await.unwrap());
    let addr = endpoint.local_addr().unwrap();
    let engine = Engine::new(endpoint.clone(), config);
    let run_engine = engine.clone();
    tokio::spawn(async move {
        let _ = endpoint.run(run_engine).await;
    });
    (engine, addr)
}

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        offer_window: Duration::from_millis(80),
        abandon_timeout: Duration::from_millis(150),
        transaction_io_timeout: Duration::from_millis(1000),
        snapshot_path: std::env::temp_dir().join(format!("agora-orch-test-{}.snapshot", Uuid::new_v4())),
    }
}

struct UdpPeer {
    socket: UdpSocket,
    coordinator: SocketAddr,
}

impl UdpPeer {
    async fn new(coordinator: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self { socket, coordinator }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    async fn send(&self, msg: &str) {
        self.socket.send_to(msg.as_bytes(), self.coordinator).await.unwrap();
    }

    async fn recv(&self) -> String {
        let mut buf = vec![0u8; 1024];
        let (n, _) = timeout(Duration::from_secs(2), self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    async fn register(&self, name: &str, stream_port: u16) {
        self.send(&format!("REGISTER {} {name} localhost {} {stream_port}", Uuid::new_v4(), self.port())).await;
        let reply = self.recv().await;
        assert!(reply.starts_with("REGISTERED"), "registration failed: {reply}");
    }
}

/// Poll an async predicate until it's true or the deadline passes.
async fn wait_until<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if predicate().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition did not become true in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.trim().to_string()
}

#[tokio::test]
async fn s6_transaction_completes_and_splits_settlement() {
    let (engine, coordinator) = start_coordinator(fast_config()).await;

    let buyer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let buyer_port = buyer_listener.local_addr().unwrap().port();
    let seller_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seller_port = seller_listener.local_addr().unwrap().port();

    // Buyer side of the transaction protocol: answer INFORM_Req, then expect
    // the connection to close without ever receiving Shipping_Info.
    tokio::spawn(async move {
        let (stream, _) = buyer_listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let line = read_line(&mut reader).await;
        let StreamFrame::InformReq { tx, .. } = StreamFrame::parse(&line).unwrap() else {
            panic!("expected INFORM_Req, got {line}");
        };
        let res = StreamFrame::InformRes {
            tx,
            name: "Buyer Co".to_string(),
            cc_number: "4111111111111111".to_string(),
            cc_expiry: "12/29".to_string(),
            address: "1 Market St".to_string(),
        };
        write_half.write_all(format!("{res}\n").as_bytes()).await.unwrap();
        let mut trailing = String::new();
        let n = reader.read_line(&mut trailing).await.unwrap();
        assert_eq!(n, 0, "buyer connection should be closed, not sent further frames");
    });

    let (shipping_tx, shipping_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = seller_listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let line = read_line(&mut reader).await;
        let StreamFrame::InformReq { tx, item, price } = StreamFrame::parse(&line).unwrap() else {
            panic!("expected INFORM_Req, got {line}");
        };
        assert_eq!(item, "book");
        assert_eq!(price, 15.0);
        let res = StreamFrame::InformRes {
            tx,
            name: "Seller Co".to_string(),
            cc_number: "5500000000000004".to_string(),
            cc_expiry: "01/28".to_string(),
            address: "99 Industrial Ave".to_string(),
        };
        write_half.write_all(format!("{res}\n").as_bytes()).await.unwrap();
        let shipping_line = read_line(&mut reader).await;
        let shipping = StreamFrame::parse(&shipping_line).unwrap();
        shipping_tx.send(shipping).unwrap();
    });

    let buyer = UdpPeer::new(coordinator).await;
    let seller = UdpPeer::new(coordinator).await;
    buyer.register("A", buyer_port).await;
    seller.register("C", seller_port).await;

    let rq = Uuid::new_v4();
    buyer.send(&format!("LOOKING_FOR {rq} A book a paperback novel 20")).await;
    assert!(seller.recv().await.starts_with(&format!("SEARCH {rq}")));

    seller.send(&format!("OFFER {rq} C book 15")).await;
    assert_eq!(buyer.recv().await, format!("FOUND {rq} book 15 from C"));
    assert_eq!(seller.recv().await, format!("RESERVE {rq} book 15"));

    buyer.send(&format!("BUY {rq} book 15")).await;

    wait_until(|| {
        let engine = engine.clone();
        async move { engine.request_state(&rq).await == Some(agora::net::RequestState::Completed) }
    })
    .await;

    let shipping = timeout(Duration::from_secs(1), shipping_rx).await.unwrap().unwrap();
    match shipping {
        StreamFrame::ShippingInfo { buyer_name, buyer_address, .. } => {
            assert_eq!(buyer_name, "Buyer Co");
            assert_eq!(buyer_address, "1 Market St");
        }
        other => panic!("expected Shipping_Info, got {other:?}"),
    }

    // Settlement split per spec §4.5/§3: seller keeps 90%, coordinator 10%.
    let price = 15.0_f64;
    let seller_cut = price * 0.90;
    let coordinator_cut = price - seller_cut;
    assert!((seller_cut - 13.5).abs() < 1e-9);
    assert!((coordinator_cut - 1.5).abs() < 1e-9);
}

#[tokio::test]
async fn transaction_cancels_both_sides_when_seller_unreachable() {
    let (engine, coordinator) = start_coordinator(fast_config()).await;

    let buyer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let buyer_port = buyer_listener.local_addr().unwrap().port();

    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = buyer_listener.accept().await.unwrap();
        let (read_half, _write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let line = read_line(&mut reader).await;
        let frame = StreamFrame::parse(&line).unwrap();
        cancel_tx.send(frame).unwrap();
    });

    let buyer = UdpPeer::new(coordinator).await;
    let seller = UdpPeer::new(coordinator).await;
    buyer.register("A", buyer_port).await;
    // Advertise a stream port nothing is listening on, so the orchestrator's
    // connect to the seller fails and the transaction is cancelled.
    seller.register("C", 1).await;

    let rq = Uuid::new_v4();
    buyer.send(&format!("LOOKING_FOR {rq} A book a paperback novel 20")).await;
    assert!(seller.recv().await.starts_with(&format!("SEARCH {rq}")));

    seller.send(&format!("OFFER {rq} C book 15")).await;
    assert_eq!(buyer.recv().await, format!("FOUND {rq} book 15 from C"));
    assert_eq!(seller.recv().await, format!("RESERVE {rq} book 15"));

    buyer.send(&format!("BUY {rq} book 15")).await;

    wait_until(|| {
        let engine = engine.clone();
        async move { engine.request_state(&rq).await == Some(agora::net::RequestState::Failed) }
    })
    .await;

    let frame = timeout(Duration::from_secs(1), cancel_rx).await.unwrap().unwrap();
    match frame {
        StreamFrame::Cancel { reason, .. } => assert!(reason.contains("seller unreachable")),
        other => panic!("expected CANCEL, got {other:?}"),
    }
}
