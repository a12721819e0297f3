//! Framed connection speaking the Kafka admin protocol.
//!
//! One TCP connection to a bootstrap broker, 4-byte length-prefixed frames,
//! correlation IDs, and an ApiVersions handshake at connect time. The admin
//! surface never pipelines, so requests are strictly sequential: the stream
//! is held under a mutex for the full request/response exchange.
//!
//! Versions are clamped to the highest non-flexible version of each API this
//! client speaks, which keeps the request header at v1 and the response
//! header at v0 for every exchange.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, ApiVersionsRequest, ApiVersionsResponse, RequestHeader};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Error, Result};

/// Client ID sent in every request header.
const CLIENT_ID: &str = "zkafka";

/// Upper bound on response frames; admin responses are tiny, so anything
/// bigger indicates a framing bug or a non-Kafka peer.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Highest non-flexible version per API, alongside the lowest this client
/// can produce.
const SUPPORTED_APIS: &[(ApiKey, i16, i16)] = &[
    (ApiKey::MetadataKey, 1, 7),
    (ApiKey::CreateTopicsKey, 0, 4),
    (ApiKey::DescribeConfigsKey, 0, 2),
];

pub(crate) struct Connection {
    stream: Mutex<BufStream<TcpStream>>,
    correlation_id: AtomicI32,
    /// Negotiated version per API key.
    versions: HashMap<i16, i16>,
    broker: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect to the first reachable address and negotiate API versions.
    pub(crate) async fn connect(addrs: &[String]) -> Result<Self> {
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => {
                    debug!(broker = addr.as_str(), "connected to bootstrap broker");
                    let mut connection = Self {
                        stream: Mutex::new(BufStream::new(stream)),
                        correlation_id: AtomicI32::new(0),
                        versions: HashMap::new(),
                        broker: addr.clone(),
                    };
                    connection.sync_versions().await?;
                    return Ok(connection);
                }
                Err(error) => {
                    warn!(broker = addr.as_str(), %error, "cannot connect to bootstrap broker");
                    last_error = Some(error);
                }
            }
        }
        Err(match last_error {
            Some(error) => Error::Io(error),
            None => Error::MissingBootstrap,
        })
    }

    /// The broker address this connection talks to.
    pub(crate) fn broker(&self) -> &str {
        &self.broker
    }

    /// Issue `request` at the version negotiated for `api_key`.
    pub(crate) async fn request<Req, Resp>(&self, api_key: ApiKey, request: &Req) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let version = *self
            .versions
            .get(&(api_key as i16))
            .ok_or(Error::NoVersionMatch {
                api_key: api_key as i16,
            })?;
        self.request_versioned(api_key, version, request).await
    }

    async fn request_versioned<Req, Resp>(
        &self,
        api_key: ApiKey,
        version: i16,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let correlation_id = self.correlation_id.fetch_add(1, Ordering::SeqCst);
        let header = RequestHeader::default()
            .with_request_api_key(api_key as i16)
            .with_request_api_version(version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(StrBytes::from_static_str(CLIENT_ID)));

        let mut frame = BytesMut::new();
        header
            .encode(&mut frame, 1)
            .map_err(|err| Error::Protocol(format!("cannot encode request header: {err}")))?;
        request
            .encode(&mut frame, version)
            .map_err(|err| Error::Protocol(format!("cannot encode request: {err}")))?;

        let mut stream = self.stream.lock().await;
        stream.write_all(&(frame.len() as i32).to_be_bytes()).await?;
        stream.write_all(&frame).await?;
        stream.flush().await?;

        let mut length = [0u8; 4];
        stream.read_exact(&mut length).await?;
        let length = i32::from_be_bytes(length);
        if length < 4 || length as usize > MAX_FRAME_SIZE {
            return Err(Error::InvalidResponse(format!(
                "unreasonable response frame length {length}"
            )));
        }
        let mut payload = vec![0u8; length as usize];
        stream.read_exact(&mut payload).await?;
        drop(stream);

        let mut payload = Bytes::from(payload);
        let received = payload.get_i32();
        if received != correlation_id {
            return Err(Error::InvalidResponse(format!(
                "correlation id mismatch: sent {correlation_id}, received {received}"
            )));
        }
        Resp::decode(&mut payload, version)
            .map_err(|err| Error::Protocol(format!("cannot decode response: {err}")))
    }

    async fn sync_versions(&mut self) -> Result<()> {
        let response: ApiVersionsResponse = self
            .request_versioned(ApiKey::ApiVersionsKey, 0, &ApiVersionsRequest::default())
            .await?;
        if response.error_code != 0 {
            return Err(Error::Server {
                code: response.error_code,
                message: None,
            });
        }

        for (api_key, min_version, max_version) in SUPPORTED_APIS {
            let key = *api_key as i16;
            let server = response
                .api_keys
                .iter()
                .find(|range| range.api_key == key)
                .ok_or(Error::NoVersionMatch { api_key: key })?;
            let version = (*max_version).min(server.max_version);
            if version < *min_version || version < server.min_version {
                return Err(Error::NoVersionMatch { api_key: key });
            }
            self.versions.insert(key, version);
        }
        debug!(broker = self.broker.as_str(), "negotiated API versions");
        Ok(())
    }
}
