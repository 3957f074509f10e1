//! Integration tests over real loopback UDP sockets.
//!
//! Both peers run in the same task (`tokio::join!`), each bound to an
//! OS-chosen loopback port.

use std::net::SocketAddr;
use std::time::Duration;

use udp_transfer::resource::{MemoryResources, MemorySink, ResourceError};
use udp_transfer::{
    Channel, Client, ClientConfig, DeliveryConfig, Message, MessageKind, Server, ServerConfig,
    SessionFailure, SessionOutcome, Socket,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind loopback socket")
}

fn server_config() -> ServerConfig {
    ServerConfig {
        delivery: DeliveryConfig {
            ack_timeout: Duration::from_millis(300),
            max_consecutive_collapses: None,
        },
        ..Default::default()
    }
}

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

async fn recv_from_server(peer: &mut Socket, server: SocketAddr) -> Message {
    let (msg, from) = peer
        .recv(WAIT)
        .await
        .expect("recv")
        .expect("server did not answer");
    assert_eq!(from, server);
    msg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A stock client fetches a multi-chunk resource from a stock server.
#[tokio::test]
async fn client_fetches_resource_from_server() {
    // 5000 characters: four full chunks and a short fifth.
    let content = "0123456789abcdef\n".repeat(294) + "tail";
    assert_eq!(content.chars().count(), 5002);

    let mut server = Server::new(
        bind().await,
        MemoryResources::new().with("notes.txt", &content),
        server_config(),
    );
    let mut client = Client::new(
        bind().await,
        server.local_addr(),
        MemorySink::default(),
        ClientConfig::default(),
    );

    let (outcome, fetched) = tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(server.serve_session(), client.fetch("notes.txt"))
    })
    .await
    .expect("transfer timed out");

    let report = fetched.expect("client fetch failed");
    assert_eq!(report.chunks, 5);
    assert_eq!(report.chars, content.chars().count());
    assert_eq!(client.sink().outputs, vec![content]);

    match outcome.expect("server socket failed") {
        SessionOutcome::Completed {
            resource, report, ..
        } => {
            assert_eq!(resource, "notes.txt");
            assert_eq!(report.chunks, 5);
            // The stock client asks for a ceiling of 3.
            assert!(report.windows.iter().all(|&w| (1..=3).contains(&w)));
        }
        SessionOutcome::Failed { failure, .. } => panic!("session failed: {failure}"),
    }
}

/// `Hello` is answered with `Welcome`, and a bare peer can drive the whole
/// transfer by hand.
#[tokio::test]
async fn hello_is_welcomed_and_chunks_arrive_in_windows() {
    let mut server = Server::new(
        bind().await,
        MemoryResources::new().with("f", "abcdefghij"),
        ServerConfig {
            chunk_size: 2,
            ..server_config()
        },
    );
    let server_addr = server.local_addr();
    let mut peer = bind().await;

    let script = async {
        peer.send(&Message::hello(Some(2)), server_addr).await.unwrap();
        assert_eq!(recv_from_server(&mut peer, server_addr).await, Message::welcome());

        peer.send(&Message::request_data("f"), server_addr).await.unwrap();
        let mut seen = Vec::new();
        loop {
            let msg = recv_from_server(&mut peer, server_addr).await;
            match msg.kind {
                MessageKind::Data => {
                    let (seq, payload) = msg.data_parts().unwrap();
                    seen.push((seq, payload.to_owned()));
                    peer.send(&Message::ack(seq), server_addr).await.unwrap();
                }
                MessageKind::End => return seen,
                other => panic!("unexpected {other}"),
            }
        }
    };
    let (outcome, seen) = tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(server.serve_session(), script)
    })
    .await
    .expect("session timed out");

    let payloads: Vec<_> = seen.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(payloads, ["ab", "cd", "ef", "gh", "ij"]);
    assert_eq!(
        seen.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
        [1, 2, 3, 4, 5]
    );
    match outcome.unwrap() {
        SessionOutcome::Completed { report, .. } => assert_eq!(report.windows, vec![1, 2, 2]),
        SessionOutcome::Failed { failure, .. } => panic!("session failed: {failure}"),
    }
}

/// Asking for something that does not exist gets `Error` and no `Data`.
#[tokio::test]
async fn unknown_resource_is_refused() {
    let mut server = Server::new(bind().await, MemoryResources::new(), server_config());
    let server_addr = server.local_addr();
    let mut peer = bind().await;

    let script = async {
        peer.send(&Message::hello(None), server_addr).await.unwrap();
        assert_eq!(recv_from_server(&mut peer, server_addr).await, Message::welcome());
        peer.send(&Message::request_data("missing.txt"), server_addr)
            .await
            .unwrap();
        assert_eq!(recv_from_server(&mut peer, server_addr).await, Message::error());
    };
    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(server.serve_session(), script)
    })
    .await
    .expect("session timed out");

    match outcome.unwrap() {
        SessionOutcome::Failed { failure, .. } => assert!(matches!(
            failure,
            SessionFailure::Resource(ResourceError::NotFound(_))
        )),
        SessionOutcome::Completed { .. } => panic!("missing resource was served"),
    }
    let quiet = peer.recv(Some(Duration::from_millis(300))).await.unwrap();
    assert!(quiet.is_none(), "no Data may follow Error: {quiet:?}");
}

/// The client gives up when the server never answers.
#[tokio::test]
async fn client_times_out_without_server() {
    let silent = bind().await;
    let mut client = Client::new(
        bind().await,
        silent.local_addr,
        MemorySink::default(),
        ClientConfig {
            idle_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        },
    );

    let err = client.fetch("anything").await.unwrap_err();
    assert!(matches!(err, udp_transfer::ClientError::TimedOut), "{err}");
    assert!(client.sink().outputs.is_empty());
}
