//! End-to-end logon over loopback TCP through the full service

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use glyph_auth::config::AuthConfig;
use glyph_auth::protocol::command::{
    ClientVersion, FourCc, LogonChallengeRequest, LogonProofRequest, CHALLENGE_RESPONSE_LEN,
};
use glyph_auth::protocol::srp::{ClientProof, SrpClient};
use glyph_auth::protocol::InMemoryAccountDirectory;
use glyph_auth::service::{AuthService, SessionRegistry};
use glyph_auth::utils::Metrics;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    registry: SessionRegistry,
    metrics: Arc<Metrics>,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<glyph_auth::Result<()>>,
}

async fn start_service() -> Harness {
    let mut config = AuthConfig::default();
    config.server.address = "127.0.0.1:0".into();
    config.server.shutdown_timeout = Duration::from_secs(1);
    config.server.metrics_interval = Duration::ZERO;

    let accounts = Arc::new(InMemoryAccountDirectory::new());
    accounts.insert_with_password("player", "hunter2");

    let service = AuthService::new(config, accounts).bind().await.unwrap();
    let (shutdown, shutdown_rx) = mpsc::channel(1);
    Harness {
        addr: service.local_addr(),
        registry: service.registry(),
        metrics: service.metrics(),
        shutdown,
        task: tokio::spawn(service.run(shutdown_rx)),
    }
}

impl Harness {
    async fn stop(self) {
        self.shutdown.send(()).await.unwrap();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("service did not stop")
            .unwrap()
            .unwrap();
    }
}

fn challenge(account: &str) -> Vec<u8> {
    LogonChallengeRequest {
        error: 8,
        game_name: "WoW".into(),
        version: ClientVersion {
            major: 2,
            minor: 4,
            patch: 3,
            build: 8606,
        },
        platform: FourCc(*b"68x\0"),
        os: FourCc(*b"niW\0"),
        locale: FourCc(*b"SUne"),
        timezone_bias: 0,
        ip: Ipv4Addr::LOCALHOST,
        account_name: account.into(),
    }
    .encode()
    .unwrap()
    .readable_slice()
    .to_vec()
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("response timed out")
        .unwrap();
    buf
}

/// Run challenge and proof, returning the proof response
async fn logon(
    stream: &mut TcpStream,
    client: &SrpClient,
    account: &str,
    proof_len: usize,
) -> (Vec<u8>, ClientProof) {
    stream.write_all(&challenge(account)).await.unwrap();
    let response = read_n(stream, CHALLENGE_RESPONSE_LEN).await;
    assert_eq!(&response[..3], &[0, 0, 0]);

    let answer = client
        .respond(
            &response[3..35].try_into().unwrap(),
            &response[70..102].try_into().unwrap(),
        )
        .unwrap();
    let proof = LogonProofRequest {
        client_public: answer.client_public,
        client_proof: answer.client_proof,
        crc_hash: [0; 20],
        number_of_keys: 0,
        security_flags: 0,
    }
    .encode()
    .unwrap();
    stream.write_all(proof.readable_slice()).await.unwrap();
    (read_n(stream, proof_len).await, answer)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_logon_over_tcp() {
    let harness = start_service().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let client = SrpClient::new("PLAYER", "HUNTER2");
    let (response, answer) = logon(&mut stream, &client, "PLAYER", 32).await;
    assert_eq!(&response[..2], &[0x01, 0x00]);
    assert!(answer.verify_server_proof(&response[2..22].try_into().unwrap()));

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.handshakes_total, 1);
    assert_eq!(snapshot.handshakes_success, 1);
    assert_eq!(harness.registry.len(), 1);

    drop(stream);
    let registry = harness.registry.clone();
    wait_until(|| registry.is_empty()).await;
    let metrics = harness.metrics.clone();
    wait_until(|| metrics.snapshot().connections_active == 0).await;
    assert!(harness.metrics.snapshot().bytes_sent >= (CHALLENGE_RESPONSE_LEN + 32) as u64);

    harness.stop().await;
}

#[tokio::test]
async fn test_wrong_password_over_tcp() {
    let harness = start_service().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let client = SrpClient::new("player", "letmein");
    let (response, _) = logon(&mut stream, &client, "player", 4).await;
    assert_eq!(response, vec![0x01, 0x05, 0x03, 0x00]);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT, stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(harness.metrics.snapshot().handshakes_failed, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let harness = start_service().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(&challenge("nobody")).await.unwrap();
    assert_eq!(read_n(&mut stream, 3).await, vec![0x00, 0x00, 0x04]);

    let registry = harness.registry.clone();
    harness.stop().await;
    assert!(registry.is_empty());

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT, stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}
