//! Exposes in-process fake file stores for use in integration tests.
//!
//! ```
//! use filestore_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::aostor().await;
//!    let url = server.url("/test");
//!    // point an aostor backend at the URL...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;

type Objects = Arc<Mutex<HashMap<String, Bytes>>>;

#[derive(Clone, Debug)]
struct ServerState {
    objects: Objects,
    port: u16,
}

/// An in-process fake file store for use in integration tests.
///
/// The server keeps all objects in memory and listens on a random available port on localhost. It
/// is shut down when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    objects: Objects,
}

impl TestServer {
    /// Starts a server speaking the aostor protocol.
    ///
    /// Uploads are posted as multipart forms to `/{realm}/up` and answered with a 32 character
    /// hex key. Objects are served at `/{realm}/{key}`.
    pub async fn aostor() -> Self {
        Self::start(|state| {
            Router::new()
                .route("/{realm}/up", post(aostor_upload))
                .route("/{realm}/{key}", get(aostor_get))
                .with_state(state)
        })
    }

    /// Starts a server acting as both weed-fs master and volume server.
    ///
    /// `/dir/assign` hands out file ids pointing back at this server, which accepts multipart
    /// uploads and serves objects at `/{fid}`.
    pub async fn weed() -> Self {
        Self::start(|state| {
            Router::new()
                .route("/dir/assign", get(weed_assign))
                .route("/{fid}", post(weed_upload).get(weed_get))
                .with_state(state)
        })
    }

    fn start(router: impl FnOnce(ServerState) -> Router) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let objects = Objects::default();
        let app = router(ServerState {
            objects: objects.clone(),
            port: socket.port(),
        });

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            objects,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the address of the server as `localhost:port`.
    pub fn address(&self) -> String {
        format!("localhost:{}", self.socket.port())
    }

    /// Returns the number of stored objects.
    pub fn objects(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Overwrites the contents of an object, identified by its key or file id.
    pub fn replace(&self, id: &str, data: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(id.to_owned(), data.into());
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Reads the `file` field of a multipart upload, returning its file name and contents.
async fn read_file(mut multipart: Multipart) -> Option<(String, Bytes)> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_owned();
        return field.bytes().await.ok().map(|data| (name, data));
    }
    None
}

fn lookup(objects: &Objects, id: &str) -> Response {
    match objects.lock().unwrap().get(id) {
        Some(data) => data.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn aostor_upload(
    State(state): State<ServerState>,
    Path(_realm): Path<String>,
    multipart: Multipart,
) -> Response {
    let Some((_, data)) = read_file(multipart).await else {
        return "ERR missing file field".into_response();
    };

    let key = uuid::Uuid::new_v4().simple().to_string();
    state.objects.lock().unwrap().insert(key.clone(), data);
    key.into_response()
}

async fn aostor_get(
    State(state): State<ServerState>,
    Path((_realm, key)): Path<(String, String)>,
) -> Response {
    lookup(&state.objects, &key)
}

async fn weed_assign(State(state): State<ServerState>) -> Response {
    let id = uuid::Uuid::new_v4().simple().to_string();
    Json(serde_json::json!({
        "count": 1,
        "fid": format!("3,{}", &id[..10]),
        "url": format!("127.0.0.1:{}", state.port),
        "publicUrl": format!("localhost:{}", state.port),
    }))
    .into_response()
}

async fn weed_upload(
    State(state): State<ServerState>,
    Path(fid): Path<String>,
    multipart: Multipart,
) -> Response {
    let Some((name, data)) = read_file(multipart).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let size = data.len();
    state.objects.lock().unwrap().insert(fid, data);
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "name": name, "size": size })),
    )
        .into_response()
}

async fn weed_get(State(state): State<ServerState>, Path(fid): Path<String>) -> Response {
    lookup(&state.objects, &fid)
}
