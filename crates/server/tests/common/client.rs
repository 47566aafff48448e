//! Minimal framed client for exercising the receiver in tests.

use bytes::Bytes;
use coldstore_core::protocol::{Request, Response};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[allow(dead_code)]
pub struct TestClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

#[allow(dead_code)]
impl TestClient {
    pub async fn connect(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).await.expect("connect");
        Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send(&mut self, request: &Request) {
        let bytes = serde_json::to_vec(request).expect("encode request");
        self.framed.send(Bytes::from(bytes)).await.expect("send");
    }

    pub async fn recv(&mut self) -> Response {
        let frame = self
            .framed
            .next()
            .await
            .expect("connection open")
            .expect("frame");
        serde_json::from_slice(&frame).expect("decode response")
    }

    pub async fn call(&mut self, request: &Request) -> Response {
        self.send(request).await;
        self.recv().await
    }
}
