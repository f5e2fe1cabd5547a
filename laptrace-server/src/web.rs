use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_embed::ServeEmbed;
use log::{debug, error, info, trace, warn};
use rust_embed::RustEmbed;
use serde::Serialize;
use std::{io, net::SocketAddr};
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::{gateway::BroadcastGateway, Session};

const WS_URI: &str = "/ws";
const LAP_URI: &str = "/api/lap";

/// The viewer page shell
#[derive(RustEmbed, Clone)]
#[folder = "web/"]
struct Assets;

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[derive(Clone)]
pub struct Web {
    session: Session,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(session: Session) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Web {
            session,
            shutdown_tx,
        }
    }

    /// All routes, without a listener
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route(LAP_URI, get(get_lap))
            .layer(middleware::from_fn(no_cache_middleware));

        Router::new()
            .route(WS_URI, get(ws_handler))
            .merge(api)
            .fallback_service(ServeEmbed::<Assets>::new())
            .with_state(self.clone())
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let addr = SocketAddr::new(self.session.args.bind, self.session.args.port);
        let listener = TcpListener::bind(addr).await.map_err(WebError::Io)?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!("Starting HTTP web server on {}", addr);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                // Closes the viewer sockets, the server then drains
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(
                        async move {
                            _ = shutdown_rx.recv().await;
                        }
                    ) => {
                return r.map_err(WebError::Io);
            }
        }
        Ok(())
    }
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

#[derive(Serialize)]
struct LapApi<'a> {
    driver: &'a str,
    lap_number: u32,
    location: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_name: Option<&'a str>,
    samples: usize,
    max_index: usize,
    index: usize,
    viewers: usize,
}

async fn get_lap(State(state): State<Web>) -> Response {
    let session = &state.session;
    let info = session.lap.info();
    let engine = session.gateway.engine();

    Json(LapApi {
        driver: &info.driver,
        lap_number: info.lap_number,
        location: &info.location,
        event_name: info.event_name.as_deref(),
        samples: session.lap.len(),
        max_index: engine.max_index(),
        index: engine.index(),
        viewers: session.gateway.viewer_count(),
    })
    .into_response()
}

async fn ws_handler(
    State(state): State<Web>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("Viewer request from {}", addr);

    let shutdown_rx = state.shutdown_tx.subscribe();
    let gateway = state.session.gateway.clone();
    ws.on_upgrade(move |socket| viewer_stream(socket, gateway, addr, shutdown_rx))
}

/// One viewer connection: initial frame, then updates out and seeks in
async fn viewer_stream(
    mut socket: WebSocket,
    gateway: BroadcastGateway,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut viewer, initial) = match gateway.connect().await {
        Ok(r) => r,
        Err(e) => {
            error!("Cannot serve viewer at {}: {}", addr, e);
            return;
        }
    };
    debug!("Viewer {} is {}", viewer.id(), addr);

    if let Err(e) = socket.send(Message::Text(initial.text.clone())).await {
        warn!("Error on send to websocket: {}", e);
        gateway.disconnect(viewer);
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of websocket");
                let _ = socket.send(Message::Close(None)).await;
                break;
            },
            r = viewer.next_update() => {
                match r {
                    Some(frame) => {
                        if let Err(e) = socket.send(Message::Text(frame.text.clone())).await {
                            warn!("Error on send to websocket: {}", e);
                            break;
                        }
                        trace!("Sent index {} to viewer {}", frame.index, viewer.id());
                    },
                    None => {
                        debug!("Update channel closed");
                        break;
                    }
                }
            },
            r = socket.recv() => {
                match r {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = gateway.handle_text(&viewer, text.as_str()) {
                            let reply = match serde_json::to_string(&reply) {
                                Ok(reply) => reply,
                                Err(e) => {
                                    error!("Cannot encode reply: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = socket.send(Message::Text(reply.into())).await {
                                warn!("Error on send to websocket: {}", e);
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {},
                    Some(Ok(_)) => {
                        debug!("Viewer {} sent a non-text frame, dropped", viewer.id());
                    },
                    Some(Err(e)) => {
                        debug!("Websocket error from {}: {}", addr, e);
                        break;
                    }
                }
            }
        }
    }

    gateway.disconnect(viewer);
}
