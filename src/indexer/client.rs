//!
//! GraphQL client for the commitment pool event indexer.
//!
//! Historical event windows are fetched with GraphQL queries over HTTP; live events arrive
//! through a `graphql-transport-ws` subscription. All methods are async and designed for
//! use with Tokio.

use super::types::*;
use super::{EventStream, LogSource};

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info};

const EVENT_FIELDS: &str = r#"
	eventName
	owner
	token
	poseidonHash
	metadata
	blockNumber
	transactionIndex
	transactionHash
"#;

/// Commitment event indexer client
#[derive(Clone)]
pub struct IndexerClient {
	/// The underlying HTTP client for GraphQL queries.
	http_client: Client,
	/// The base URL for the indexer GraphQL HTTP endpoint.
	indexer_url: String,
	/// The WebSocket URL for real-time subscriptions.
	ws_url: String,
}

impl IndexerClient {
	/// Create a new indexer client.
	///
	/// # Arguments
	/// * `indexer_url` - The HTTP endpoint for GraphQL queries.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	/// * `timeout` - Per-request timeout for HTTP queries.
	pub fn new(indexer_url: String, ws_url: String, timeout: Duration) -> Result<Self, IndexerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			indexer_url,
			ws_url,
		})
	}

	/// Execute a GraphQL query.
	///
	/// # Returns
	/// The JSON response from the indexer, or an `IndexerError` if the request fails.
	pub async fn execute_query(
		&self,
		query: &str,
		variables: Option<serde_json::Value>,
	) -> Result<serde_json::Value, IndexerError> {
		let request_body = json!({
			"query": query,
			"variables": variables
		});

		let response = self
			.http_client
			.post(&self.indexer_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(IndexerError::GraphQLError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let response_json: serde_json::Value = response.json().await?;

		if let Some(errors) = response_json.get("errors") {
			return Err(IndexerError::GraphQLError(format!(
				"GraphQL errors: {}",
				errors
			)));
		}

		Ok(response_json)
	}

	/// Open a `graphql-transport-ws` connection and start one subscription on it.
	///
	/// Returns the receiving half; the subscription's `next` payloads are read from it.
	async fn open_subscription(
		&self,
		subscription_id: &str,
		query: &str,
		variables: serde_json::Value,
	) -> Result<
		futures_util::stream::SplitStream<
			tokio_tungstenite::WebSocketStream<
				tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
			>,
		>,
		IndexerError,
	> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		// Create WebSocket request with required subprotocol
		let mut request = self.ws_url.clone().into_client_request()?;
		request.headers_mut().insert(
			"Sec-WebSocket-Protocol",
			"graphql-transport-ws".parse().map_err(|_| {
				IndexerError::GraphQLError("Invalid WebSocket subprotocol header value".to_string())
			})?,
		);

		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let init_message = json!({
			"type": "connection_init"
		});
		ws_sender
			.send(Message::Text(init_message.to_string()))
			.await?;

		match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if parsed.get("type").and_then(|t| t.as_str()) != Some("connection_ack") {
						return Err(IndexerError::SubscriptionError(
							"Connection not acknowledged".to_string(),
						));
					}
				}
				_ => {
					return Err(IndexerError::SubscriptionError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(IndexerError::SubscriptionError(
					"Connection closed during handshake".to_string(),
				));
			}
		}

		let start_message = json!({
			"id": subscription_id,
			"type": "subscribe",
			"payload": {
				"query": query,
				"variables": variables
			}
		});

		ws_sender
			.send(Message::Text(start_message.to_string()))
			.await?;

		Ok(ws_receiver)
	}
}

/// Decode one `graphql-transport-ws` text frame into a commitment event.
///
/// `None` means the frame carries nothing for the caller (acks, pings, completion).
fn parse_subscription_frame(text: &str) -> Option<Result<ChainEvent, IndexerError>> {
	let parsed = match serde_json::from_str::<serde_json::Value>(text) {
		Ok(parsed) => parsed,
		Err(e) => return Some(Err(IndexerError::JsonError(e))),
	};

	let Some(msg_type) = parsed.get("type").and_then(|t| t.as_str()) else {
		return Some(Err(IndexerError::SubscriptionError(
			"Message missing type field".to_string(),
		)));
	};

	match msg_type {
		"next" => {
			let Some(event_data) = parsed
				.get("payload")
				.and_then(|p| p.get("data"))
				.and_then(|d| d.get("commitmentEvents"))
			else {
				return Some(Err(IndexerError::NoData));
			};
			match serde_json::from_value::<ChainEvent>(event_data.clone()) {
				Ok(event) => Some(Ok(event)),
				Err(e) => {
					error!("Failed to deserialize commitment event: {}", e);
					Some(Err(IndexerError::JsonError(e)))
				}
			}
		}
		"error" => {
			let error_msg = parsed
				.get("payload")
				.and_then(|p| p.get(0).or(Some(p)))
				.and_then(|p| p.get("message"))
				.and_then(|m| m.as_str())
				.unwrap_or("Unknown subscription error");
			Some(Err(IndexerError::GraphQLError(error_msg.to_string())))
		}
		"complete" => {
			info!("Commitment event subscription completed");
			None
		}
		_ => {
			debug!("Ignoring message type: {}", msg_type);
			None
		}
	}
}

#[async_trait::async_trait]
impl LogSource for IndexerClient {
	async fn block_number(&self) -> Result<u64, IndexerError> {
		let query = r#"
			query ChainHead {
				chainHead {
					number
				}
			}
		"#;

		let response = self.execute_query(query, None).await?;
		response
			.get("data")
			.and_then(|data| data.get("chainHead"))
			.and_then(|head| head.get("number"))
			.and_then(|number| number.as_u64())
			.ok_or(IndexerError::NoData)
	}

	async fn query_logs(
		&self,
		contract: &str,
		from_block: u64,
		to_block: u64,
		event_name: EventName,
	) -> Result<Vec<ChainEvent>, IndexerError> {
		if to_block.saturating_sub(from_block) >= MAX_LOG_RANGE {
			return Err(IndexerError::RangeTooLarge {
				from: from_block,
				to: to_block,
				max: MAX_LOG_RANGE,
			});
		}

		let query = format!(
			r#"
			query CommitmentEvents($contract: String!, $eventName: String!, $fromBlock: Int!, $toBlock: Int!) {{
				commitmentEvents(contract: $contract, eventName: $eventName, fromBlock: $fromBlock, toBlock: $toBlock) {{
					{}
				}}
			}}
			"#,
			EVENT_FIELDS
		);

		let variables = json!({
			"contract": contract,
			"eventName": event_name.as_str(),
			"fromBlock": from_block,
			"toBlock": to_block,
		});

		let response = self.execute_query(&query, Some(variables)).await?;
		let events = response
			.get("data")
			.and_then(|data| data.get("commitmentEvents"))
			.cloned()
			.ok_or(IndexerError::NoData)?;

		let events: Vec<ChainEvent> = serde_json::from_value(events)?;
		debug!(
			"Fetched {} {} events in blocks {}..={}",
			events.len(),
			event_name,
			from_block,
			to_block
		);
		Ok(events)
	}

	async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, IndexerError> {
		let query = format!(
			r#"
			subscription CommitmentEvents($contract: String!, $owner: String!, $token: String!) {{
				commitmentEvents(contract: $contract, owner: $owner, token: $token) {{
					{}
				}}
			}}
			"#,
			EVENT_FIELDS
		);

		let variables = json!({
			"contract": filter.contract,
			"owner": filter.owner,
			"token": filter.token,
		});

		let ws_receiver = self
			.open_subscription("commitment-events", &query, variables)
			.await?;
		info!("Subscribed to commitment events for {}", filter.owner);

		let stream = ws_receiver.filter_map(|msg| async move {
			match msg {
				Ok(Message::Text(text)) => parse_subscription_frame(&text),
				Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
				Ok(Message::Close(_)) => None,
				Ok(_) => Some(Err(IndexerError::SubscriptionError(
					"Unexpected message type".to_string(),
				))),
				Err(e) => Some(Err(IndexerError::WebSocketError(e))),
			}
		});

		Ok(Box::pin(stream))
	}
}
