use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use session_relay_core::HubHandle;
use session_relay_server::{AppState, ProcessLauncher, serve};
use session_relay_store::MemoryStore;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    addr: SocketAddr,
    hub: HubHandle,
}

impl TestHub {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = HubHandle::spawn();
        let state = AppState::new(
            hub.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(ProcessLauncher::new("relay-agent", format!("ws://{addr}"))),
        );
        tokio::spawn(serve(listener, state, std::future::pending()));
        Self { addr, hub }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn client(&self) -> Client {
        let (ws, _) = connect_async(self.url()).await.unwrap();
        ws
    }

    /// Wait until the hub has processed everything sent so far and the
    /// given set of sessions is registered.
    async fn wait_for_agents(&self, expected: &[&str]) {
        for _ in 0..200 {
            let stats = self.hub.stats().await.unwrap();
            if stats.agents == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("agents never became {expected:?}");
    }

    async fn wait_for_connections(&self, count: usize) {
        for _ in 0..200 {
            if self.hub.stats().await.unwrap().connections == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection count never reached {count}");
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "expected no message, got {next:?}");
}

async fn register(hub: &TestHub, session_id: &str) -> Client {
    let mut agent = hub.client().await;
    send(&mut agent, json!({"type": "register", "sessionId": session_id})).await;
    assert_eq!(
        recv(&mut agent).await,
        json!({"type": "registered", "sessionId": session_id})
    );
    agent
}

#[cfg(unix)]
#[tokio::test]
async fn test_echo_end_to_end_with_real_agent() {
    use session_relay_agent::{AgentBridge, BridgeConfig, Shell};

    let hub = TestHub::start().await;
    let mut frontend = hub.client().await;
    let mut observer = hub.client().await;

    tokio::spawn(
        AgentBridge::new(BridgeConfig {
            hub_url: hub.url(),
            session_id: "s1".to_string(),
            shell: Shell::platform_default(),
        })
        .run(),
    );
    hub.wait_for_agents(&["s1"]).await;
    hub.wait_for_connections(3).await;

    send(
        &mut frontend,
        json!({"type": "command", "sessionId": "s1", "command": "echo hi"}),
    )
    .await;

    for ws in [&mut frontend, &mut observer] {
        assert_eq!(
            recv(ws).await,
            json!({"type": "output", "sessionId": "s1", "content": "hi\n"})
        );
        assert_eq!(
            recv(ws).await,
            json!({"type": "close", "sessionId": "s1", "content": "Process exited with code 0"})
        );
    }
}

#[tokio::test]
async fn test_command_without_agent_errors_to_sender_only() {
    let hub = TestHub::start().await;
    let mut sender = hub.client().await;
    let mut bystander = hub.client().await;
    let mut agent = register(&hub, "s1").await;

    send(
        &mut sender,
        json!({"type": "command", "sessionId": "s2", "command": "echo hi"}),
    )
    .await;

    assert_eq!(
        recv(&mut sender).await,
        json!({"type": "error", "error": "Agent not connected"})
    );
    assert_silent(&mut bystander).await;
    assert_silent(&mut agent).await;
}

#[tokio::test]
async fn test_command_forwarded_verbatim() {
    let hub = TestHub::start().await;
    let mut agent = register(&hub, "s1").await;
    let mut frontend = hub.client().await;

    let command = "printf '%s\\n' \"a b\" | tr a-z A-Z; echo ü";
    send(
        &mut frontend,
        json!({"type": "command", "sessionId": "s1", "command": command, "extra": true}),
    )
    .await;

    assert_eq!(
        recv(&mut agent).await,
        json!({"type": "command", "sessionId": "s1", "command": command})
    );
    assert_silent(&mut agent).await;
}

#[tokio::test]
async fn test_newer_agent_takes_over_session() {
    let hub = TestHub::start().await;
    let mut first = register(&hub, "s1").await;
    let mut second = register(&hub, "s1").await;
    let mut frontend = hub.client().await;

    send(
        &mut frontend,
        json!({"type": "command", "sessionId": "s1", "command": "uptime"}),
    )
    .await;
    assert_eq!(recv(&mut second).await["command"], "uptime");
    assert_silent(&mut first).await;

    // The superseded agent leaving must not unregister the new one.
    first.close(None).await.unwrap();
    drop(first);
    hub.wait_for_connections(2).await;
    hub.wait_for_agents(&["s1"]).await;

    send(
        &mut frontend,
        json!({"type": "command", "sessionId": "s1", "command": "date"}),
    )
    .await;
    assert_eq!(recv(&mut second).await["command"], "date");
}

#[tokio::test]
async fn test_agent_output_broadcast_skips_departed_frontends() {
    let hub = TestHub::start().await;
    let mut agent = register(&hub, "s1").await;
    let mut other_agent = register(&hub, "s2").await;
    let mut stays = hub.client().await;
    let mut leaves = hub.client().await;
    hub.wait_for_connections(4).await;

    leaves.close(None).await.unwrap();
    drop(leaves);
    hub.wait_for_connections(3).await;

    let chunk = json!({"type": "output", "sessionId": "s1", "content": "x", "seq": 7});
    send(&mut agent, chunk.clone()).await;

    assert_eq!(recv(&mut stays).await, chunk);
    assert_silent(&mut other_agent).await;
    assert_silent(&mut agent).await;
}

#[tokio::test]
async fn test_invalid_json_keeps_agent_registered() {
    let hub = TestHub::start().await;
    let mut agent = register(&hub, "s1").await;
    let mut frontend = hub.client().await;

    agent.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(
        recv(&mut agent).await,
        json!({"type": "error", "error": "Invalid JSON"})
    );
    hub.wait_for_agents(&["s1"]).await;

    send(
        &mut agent,
        json!({"type": "error", "sessionId": "s1", "content": "warn\n"}),
    )
    .await;
    assert_eq!(
        recv(&mut frontend).await,
        json!({"type": "error", "sessionId": "s1", "content": "warn\n"})
    );
}

#[tokio::test]
async fn test_agent_disconnect_unregisters_session() {
    let hub = TestHub::start().await;
    let mut agent = register(&hub, "s1").await;
    let mut frontend = hub.client().await;

    agent.close(None).await.unwrap();
    drop(agent);
    hub.wait_for_agents(&[]).await;

    send(
        &mut frontend,
        json!({"type": "command", "sessionId": "s1", "command": "ls"}),
    )
    .await;
    assert_eq!(
        recv(&mut frontend).await,
        json!({"type": "error", "error": "Agent not connected"})
    );
}
