//!
//! HTTP client for decryption delegate services.
//!
//! A delegate holds viewing rights for an account and opens commitment notes on its
//! behalf. Every call is a single attempt bounded by the request timeout; a failed
//! decryption only skips the event it belongs to, and backfills are retried by
//! restarting the watcher.

use super::types::*;
use super::{DecryptionDelegate, DelegateConnector};
use crate::indexer::ChainEvent;

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decryption delegate reachable over HTTP.
#[derive(Clone)]
pub struct DelegateClient {
	http_client: Client,
	url: String,
}

impl DelegateClient {
	pub fn new(url: String, timeout: Duration) -> Result<Self, DelegateError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self { http_client, url })
	}

	fn endpoint(&self, path: &str) -> String {
		format!("{}/{}", self.url.trim_end_matches('/'), path)
	}

	/// Send one request and decode the body. Non-2xx responses become `Rejected`.
	async fn send<T>(&self, request: reqwest::RequestBuilder) -> Result<T, DelegateError>
	where
		T: serde::de::DeserializeOwned,
	{
		let response = request.send().await.map_err(|e| {
			warn!("Delegate {} request failed: {}", self.url, e);
			DelegateError::HttpError(e)
		})?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			warn!("Delegate {} responded {}: {}", self.url, status, body);
			return Err(DelegateError::Rejected {
				status: status.as_u16(),
				body,
			});
		}

		Ok(response.json::<T>().await?)
	}
}

#[async_trait::async_trait]
impl DecryptionDelegate for DelegateClient {
	fn url(&self) -> &str {
		&self.url
	}

	async fn decrypt(&self, request: &DecryptRequest) -> Result<DecryptedNote, DelegateError> {
		let endpoint = self.endpoint("decrypt");
		debug!(
			"Requesting decryption of {} from {}",
			request.poseidon_hash, self.url
		);
		let response: DecryptResponse = self
			.send(self.http_client.post(&endpoint).json(request))
			.await?;
		DecryptedNote::try_from(response)
	}

	async fn events_since(
		&self,
		from_block: u64,
		owner: &str,
		token: &str,
	) -> Result<Vec<ChainEvent>, DelegateError> {
		let endpoint = self.endpoint("events");
		let query = [
			("fromBlock", from_block.to_string()),
			("owner", owner.to_string()),
			("token", token.to_string()),
		];
		let events: Vec<ChainEvent> = self
			.send(self.http_client.get(&endpoint).query(&query))
			.await?;
		debug!(
			"Delegate {} reported {} events since block {}",
			self.url,
			events.len(),
			from_block
		);
		Ok(events)
	}
}

/// Builds short-lived HTTP clients for delegates named in event metadata.
#[derive(Debug, Clone)]
pub struct HttpDelegateConnector {
	timeout: Duration,
}

impl HttpDelegateConnector {
	pub fn new(timeout: Duration) -> Self {
		Self { timeout }
	}
}

impl DelegateConnector for HttpDelegateConnector {
	fn connect(&self, url: &str) -> Result<Arc<dyn DecryptionDelegate>, DelegateError> {
		Ok(Arc::new(DelegateClient::new(url.to_string(), self.timeout)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::{TcpListener, TcpStream};

	fn request() -> DecryptRequest {
		DecryptRequest {
			block_number: 1,
			token: "0xtoken".to_string(),
			poseidon_hash: crate::ledger::H256([1; 32]),
			owner: "0xowner".to_string(),
		}
	}

	/// Read one full HTTP request (headers plus `Content-Length` body).
	async fn read_request(socket: &mut TcpStream) {
		let mut buf = Vec::new();
		let mut chunk = [0u8; 1024];
		loop {
			let n = socket.read(&mut chunk).await.unwrap();
			if n == 0 {
				return;
			}
			buf.extend_from_slice(&chunk[..n]);
			let text = String::from_utf8_lossy(&buf).to_string();
			if let Some(end) = text.find("\r\n\r\n") {
				let length = text[..end]
					.lines()
					.find_map(|line| {
						let (name, value) = line.split_once(':')?;
						name.eq_ignore_ascii_case("content-length")
							.then(|| value.trim().parse::<usize>().ok())
							.flatten()
					})
					.unwrap_or(0);
				if buf.len() >= end + 4 + length {
					return;
				}
			}
		}
	}

	/// Serve `status` with an empty body to every request, counting them.
	async fn serve_status(status: &'static str) -> (String, Arc<AtomicUsize>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("http://{}", listener.local_addr().unwrap());
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = hits.clone();
		tokio::spawn(async move {
			while let Ok((mut socket, _)) = listener.accept().await {
				counter.fetch_add(1, Ordering::SeqCst);
				read_request(&mut socket).await;
				let response = format!(
					"HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
					status
				);
				let _ = socket.write_all(response.as_bytes()).await;
				let _ = socket.shutdown().await;
			}
		});
		(url, hits)
	}

	#[test]
	fn endpoints_tolerate_trailing_slash() {
		let client =
			DelegateClient::new("https://delegate.example/api/".to_string(), Duration::from_secs(1)).unwrap();
		assert_eq!(client.endpoint("decrypt"), "https://delegate.example/api/decrypt");
		assert_eq!(client.url(), "https://delegate.example/api/");
	}

	#[tokio::test]
	async fn server_error_is_reported_after_one_attempt() {
		let (url, hits) = serve_status("503 Service Unavailable").await;
		let delegate = HttpDelegateConnector::new(Duration::from_secs(5)).connect(&url).unwrap();

		let result = delegate.decrypt(&request()).await;
		assert!(matches!(result, Err(DelegateError::Rejected { status: 503, .. })));
		assert_eq!(hits.load(Ordering::SeqCst), 1);

		let result = delegate.events_since(10, "0xowner", "0xtoken").await;
		assert!(matches!(result, Err(DelegateError::Rejected { status: 503, .. })));
		assert_eq!(hits.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn unreachable_delegate_fails_immediately() {
		let delegate = HttpDelegateConnector::new(Duration::from_millis(500))
			.connect("http://127.0.0.1:1")
			.unwrap();
		let result = delegate.decrypt(&request()).await;
		assert!(matches!(result, Err(DelegateError::HttpError(_))));
	}
}
