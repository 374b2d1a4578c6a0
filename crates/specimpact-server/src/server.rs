//! WebSocket server implementation.
//!
//! Handles client connections and routes messages to handlers.

use crate::handlers::{
    handle_code_for_spec, handle_export, handle_impact, handle_info, handle_node_get,
    handle_specs_for_code, handle_tests_for_change, handle_update,
};
use crate::protocol::{
    CodeForSpecParams, ExportParams, ImpactParams, NodeGetParams, Request, Response,
    SpecsForCodeParams, TestsForChangeParams,
};
use crate::{ServerEvent, ServerState};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use specimpact_graph::{GraphHandle, IncrementalUpdate};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_PORT: u16 = 7433;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
        }
    }
}

/// The SpecImpact WebSocket server.
pub struct ImpactServer {
    config: ServerConfig,
    state: ServerState,
}

impl ImpactServer {
    /// Creates a new server over a shared graph.
    pub fn new(graph: GraphHandle, config: ServerConfig) -> Self {
        Self {
            config,
            state: ServerState::new(graph),
        }
    }

    /// Returns a handle to the shared graph for updates.
    pub fn graph(&self) -> GraphHandle {
        self.state.graph.clone()
    }

    /// Returns a receiver for update notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.state.events.subscribe()
    }

    /// Binds the configured address and serves forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections on an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("SpecImpact server listening on ws://{}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let connection_id = Uuid::new_v4();
                    debug!("New connection {} from {}", connection_id, addr);
                    let state = self.state.clone();
                    let events = self.state.events.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, connection_id, state, events).await
                        {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handles a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: Uuid,
    state: ServerState,
    mut events: broadcast::Receiver<ServerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    info!("WebSocket connection {} established with {}", connection_id, addr);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("Message error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                };

                if msg.is_close() {
                    debug!("Client {} disconnected", connection_id);
                    break;
                }

                if msg.is_ping() {
                    write.send(Message::Pong(msg.into_data())).await?;
                    continue;
                }

                if msg.is_text() {
                    let text = msg.to_text().unwrap_or("");
                    let response = process_message(text, &state);
                    let json = serde_json::to_string(&response)?;
                    write.send(Message::Text(json)).await?;
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = serde_json::to_string(&event)?;
                        if write.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} notifications", connection_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Connection {} closed: {}", connection_id, addr);
    Ok(())
}

fn parse<T: DeserializeOwned>(params: Value, id: &Option<Value>) -> Result<T, Response> {
    serde_json::from_value(params).map_err(|e| Response::invalid_params(id.clone(), e.to_string()))
}

/// Processes a JSON-RPC message and returns a response.
pub(crate) fn process_message(text: &str, state: &ServerState) -> Response {
    let request: Request = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => return Response::parse_error(),
    };

    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return Response::invalid_request(id, "jsonrpc must be \"2.0\"");
    }
    let method = request.method.as_str();

    debug!("Processing method: {}", method);

    let routed = match method {
        "graph.info" => Ok(handle_info(state, id.clone())),

        "impact" => parse::<ImpactParams>(request.params, &id)
            .map(|params| handle_impact(state, id.clone(), params)),

        "specs.forCode" => parse::<SpecsForCodeParams>(request.params, &id)
            .map(|params| handle_specs_for_code(state, id.clone(), params)),

        "code.forSpec" => parse::<CodeForSpecParams>(request.params, &id)
            .map(|params| handle_code_for_spec(state, id.clone(), params)),

        "tests.forChange" => parse::<TestsForChangeParams>(request.params, &id)
            .map(|params| handle_tests_for_change(state, id.clone(), params)),

        "node.get" => parse::<NodeGetParams>(request.params, &id)
            .map(|params| handle_node_get(state, id.clone(), params)),

        "graph.update" => parse::<IncrementalUpdate>(request.params, &id)
            .map(|update| handle_update(state, id.clone(), update)),

        "graph.export" if request.params.is_null() => {
            Ok(handle_export(state, id.clone(), ExportParams::default()))
        }
        "graph.export" => parse::<ExportParams>(request.params, &id)
            .map(|params| handle_export(state, id.clone(), params)),

        _ => Ok(Response::method_not_found(id.clone(), method)),
    };

    routed.unwrap_or_else(|response| response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use specimpact_graph::{Edge, GraphStore, Node, Relationship};
    use tokio_tungstenite::connect_async;

    fn graph() -> GraphHandle {
        let mut graph = GraphStore::new();
        graph.add_node(Node::spec("auth-req").with_manual(true)).unwrap();
        graph.add_node(Node::code("auth/service.py")).unwrap();
        graph.add_node(Node::test("test_auth.py")).unwrap();
        graph
            .add_edge(
                Edge::new("auth-req", "auth/service.py", Relationship::Implements)
                    .with_manual(true),
            )
            .unwrap();
        graph
            .add_edge(
                Edge::new("auth/service.py", "test_auth.py", Relationship::Tests)
                    .with_confidence(0.9),
            )
            .unwrap();
        GraphHandle::new(graph)
    }

    fn process(text: &str) -> Response {
        process_message(text, &ServerState::new(graph()))
    }

    #[test]
    fn test_parse_error() {
        let response = process("{ nope");
        assert_eq!(response.error.unwrap().code, crate::PARSE_ERROR);
        assert!(response.id.is_none());
    }

    #[test]
    fn test_method_not_found() {
        let response = process(r#"{"jsonrpc":"2.0","id":1,"method":"discover"}"#);
        assert_eq!(response.error.unwrap().code, crate::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_invalid_params() {
        let response = process(r#"{"jsonrpc":"2.0","id":2,"method":"impact","params":{}}"#);
        assert_eq!(response.error.unwrap().code, crate::INVALID_PARAMS);
        assert_eq!(response.id, Some(Value::from(2)));
    }

    #[test]
    fn test_wrong_version() {
        let response = process(r#"{"jsonrpc":"1.0","id":2,"method":"graph.info"}"#);
        assert_eq!(response.error.unwrap().code, crate::INVALID_REQUEST);
    }

    #[test]
    fn test_routes_tests_for_change() {
        let response = process(
            r#"{"jsonrpc":"2.0","id":"t","method":"tests.forChange","params":{"changed":["auth/service.py"]}}"#,
        );
        let result = response.result.unwrap();
        assert_eq!(result["nodes"][0]["id"], "test_auth.py");
    }

    #[test]
    fn test_export_without_params() {
        let response = process(r#"{"jsonrpc":"2.0","id":5,"method":"graph.export"}"#);
        assert_eq!(response.result.unwrap()["nodes"].as_array().unwrap().len(), 3);
    }

    async fn request(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
        body: &str,
    ) -> Value {
        ws.send(Message::Text(body.to_string())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        serde_json::from_str(reply.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_websocket_round_trip_and_notifications() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ImpactServer::new(graph(), ServerConfig { addr });
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let url = format!("ws://{}", addr);
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        let (mut watcher, _) = connect_async(url.as_str()).await.unwrap();

        let impact = request(
            &mut client,
            r#"{"jsonrpc":"2.0","id":1,"method":"impact","params":{"changed":["auth/service.py"],"depth":2,"includeSuggested":true}}"#,
        )
        .await;
        assert_eq!(impact["result"]["specs"][0]["id"], "auth-req");
        assert_eq!(impact["result"]["specs"][0]["confidence"], 1.0);

        let update = request(
            &mut client,
            r#"{"jsonrpc":"2.0","id":2,"method":"graph.update","params":{"changed_code_ids":["auth/service.py"]}}"#,
        )
        .await;
        assert_eq!(update["result"]["edges_removed"], 2);

        let note = watcher.next().await.unwrap().unwrap();
        let note: Value = serde_json::from_str(note.to_text().unwrap()).unwrap();
        assert_eq!(note["type"], "GraphUpdated");
        assert_eq!(note["payload"]["edge_count"], 0);
    }
}
