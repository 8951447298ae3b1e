use std::collections::HashSet;
use std::time::Duration;

use futures::stream::futures_unordered::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cardroom_game::protocol::{Request, Response, GAME_STARTING};
use cardroom_game::server;
use cardroom_server::{run, settings, USER_ID_HEADER};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn try_connect(url: &str, user: &str) -> Result<Client, tungstenite::Error> {
    let mut request = url.into_client_request().expect("valid url");
    request.headers_mut().insert(
        USER_ID_HEADER,
        HeaderValue::from_str(user).expect("valid header"),
    );
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn connect(url: &str, user: &str) -> Client {
    try_connect(url, user).await.expect("server to be up")
}

async fn register(stream: &mut Client) {
    let register = serde_json::to_string(&Request::Register).expect("serialization to work");
    stream
        .send(Message::Text(register))
        .await
        .expect("server to be up");
}

// Read responses until one matches.
async fn read_until<F>(stream: &mut Client, done: F) -> Vec<Response>
where
    F: Fn(&Response) -> bool,
{
    let mut responses = vec![];
    loop {
        let msg = stream
            .next()
            .await
            .expect("server to respond")
            .expect("response to be successful");
        if let Message::Text(text) = msg {
            let response: Response = serde_json::from_str(&text).expect("serialization to work");
            let finished = done(&response);
            responses.push(response);
            if finished {
                return responses;
            }
        }
    }
}

// Ensure that:
//
// - a server can be started.
// - a full table of clients can register and each receives a private hand.
// - the server receives the shutdown notification.
// - all client tasks stop.
// - the server shuts down gracefully.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn graceful_shutdown() {
    let _logger = flexi_logger::Logger::try_with_env()
        .expect("log spec to parse")
        .format(flexi_logger::with_thread)
        .start()
        .ok();
    // Spawn server.
    let bind_addr = "127.0.0.1:38080";
    let table_url = "ws://127.0.0.1:38080/tables/main";
    let settings = settings::Server {
        bind_addr: bind_addr.into(),
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let game = server::Settings::default();
    let table_size = game.table_size;
    let server = tokio::spawn(async move { run(settings, game, shutdown_rx).await.ok() });

    // Hack: wait a bit for the server to be ready.
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Seat a full table in parallel.
    let mut connections = FuturesUnordered::new();
    for id in 0..table_size {
        connections.push(tokio::spawn(async move {
            let mut stream = connect(table_url, &format!("player{}", id)).await;
            register(&mut stream).await;
            let responses =
                read_until(&mut stream, |r| matches!(r, Response::PlayerCards(_))).await;
            (stream, responses)
        }));
    }

    let mut clients = Vec::with_capacity(table_size);
    while let Some(client_task) = connections.next().await {
        clients.push(client_task.expect("client"));
    }

    // Every client heard the game start and got its own two cards.
    let mut dealt = HashSet::new();
    for (_, responses) in clients.iter() {
        assert!(responses.contains(&Response::GameUpdate(GAME_STARTING.into())));
        let hands: Vec<_> = responses
            .iter()
            .filter_map(|r| match r {
                Response::PlayerCards(hand) => Some(*hand),
                _ => None,
            })
            .collect();
        assert_eq!(hands.len(), 1);
        dealt.extend(hands[0].cards().iter().copied());
    }
    assert_eq!(dealt.len(), table_size * 2);

    // Tell server to shutdown.
    shutdown_tx.send(()).expect("server still running");
    let stats = server
        .await
        .expect("server shutdown smoothly")
        .expect("server shutdown smoothly");

    // Ensure the server agrees with us.
    assert_eq!(stats.total_accepted_connections, table_size);
    assert_eq!(stats.games_started, 1);
    drop(clients);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identity_is_required_and_members_are_listed() {
    let settings = settings::Server {
        bind_addr: "127.0.0.1:38081".into(),
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        run(settings, server::Settings::default(), shutdown_rx)
            .await
            .ok()
    });
    tokio::time::sleep(Duration::from_millis(150)).await;

    // no identity, no seat
    let anonymous = tokio_tungstenite::connect_async("ws://127.0.0.1:38081/tables/lounge").await;
    assert!(anonymous.is_err());
    // a blank id is no identity either
    assert!(try_connect("ws://127.0.0.1:38081/tables/lounge", "").await.is_err());
    assert!(try_connect("ws://127.0.0.1:38081/tables/lounge", "   ").await.is_err());

    let mut solo = connect("ws://127.0.0.1:38081/tables/lounge", "solo").await;
    register(&mut solo).await;
    let responses = read_until(&mut solo, |r| matches!(r, Response::Joined(_))).await;
    match responses.last() {
        Some(Response::Joined(members)) => {
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].display_name, "solo");
        }
        other => panic!("unexpected {:?}", other),
    }

    let mut http = TcpStream::connect("127.0.0.1:38081")
        .await
        .expect("server to be up");
    http.write_all(b"GET /tables/lounge/members HTTP/1.0\r\nHost: localhost\r\n\r\n")
        .await
        .expect("request to be written");
    let mut body = String::new();
    http.read_to_string(&mut body)
        .await
        .expect("response to be read");
    assert!(body.starts_with("HTTP/1.0 200") || body.starts_with("HTTP/1.1 200"));
    assert!(body.contains(r#""user_id":"solo""#));

    shutdown_tx.send(()).expect("server still running");
    let stats = server
        .await
        .expect("server shutdown smoothly")
        .expect("server shutdown smoothly");
    assert_eq!(stats.total_accepted_connections, 1);
    assert_eq!(stats.games_started, 0);
    drop(solo);
}
