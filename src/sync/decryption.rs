//! Decryption routing for created commitments.
//!
//! Every `CommitmentCreated` event carries hex-encoded metadata holding the note
//! ciphertext and, optionally, the URL of the delegate that can open it. The route is
//! resolved once per event:
//!
//! - no delegate named: open the ciphertext locally with the account's decryption key
//! - this ledger's own delegate: ask the configured delegate client
//! - any other delegate: connect a short-lived client for that URL and ask it
//!
//! Each route is served by its own [`NoteDecryptor`] implementation.

use super::events::OrderedEvent;
use super::types::SyncError;
use crate::delegate::{DecryptRequest, DecryptedNote, DecryptionDelegate, DelegateConnector};
use crate::ledger::H256;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const NONCE_LEN: usize = 12;

/// Decoded on-chain note metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMetadata {
	pub ciphertext: Vec<u8>,
	pub origin_url: Option<String>,
	pub message: Option<String>,
}

impl EncryptedMetadata {
	/// Parse hex-encoded bincode, with or without a `0x` prefix.
	pub fn decode(encoded: &str) -> Result<Self, SyncError> {
		let raw = encoded.strip_prefix("0x").unwrap_or(encoded);
		let bytes = hex::decode(raw)
			.map_err(|e| SyncError::MetadataError(format!("invalid hex: {}", e)))?;
		bincode::deserialize(&bytes)
			.map_err(|e| SyncError::MetadataError(format!("invalid encoding: {}", e)))
	}

	pub fn encode(&self) -> Result<String, SyncError> {
		let bytes = bincode::serialize(self)
			.map_err(|e| SyncError::MetadataError(format!("failed to encode: {}", e)))?;
		Ok(format!("0x{}", hex::encode(bytes)))
	}
}

/// Plaintext of a locally sealed note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePlaintext {
	pub amount: u128,
	pub blinding: H256,
}

/// Symmetric note key derived from the account's private decryption key.
#[derive(Clone)]
pub struct DecryptionKey {
	key: [u8; 32],
}

impl DecryptionKey {
	pub fn from_secret(secret: &[u8; 32]) -> Self {
		Self {
			key: Sha256::digest(secret).into(),
		}
	}

	pub fn from_hex(secret: &str) -> Result<Self, SyncError> {
		let raw = secret.strip_prefix("0x").unwrap_or(secret);
		let bytes: [u8; 32] = hex::decode(raw)
			.map_err(|e| SyncError::DecryptionError(format!("invalid key hex: {}", e)))?
			.try_into()
			.map_err(|_| SyncError::DecryptionError("decryption key must be 32 bytes".to_string()))?;
		Ok(Self::from_secret(&bytes))
	}

	fn cipher(&self) -> ChaCha20Poly1305 {
		ChaCha20Poly1305::new(Key::from_slice(&self.key))
	}

	/// Encrypt `note` as `nonce || sealed` under a fresh random nonce.
	pub fn seal(&self, note: &NotePlaintext) -> Result<Vec<u8>, SyncError> {
		let plaintext = bincode::serialize(note)
			.map_err(|e| SyncError::DecryptionError(format!("failed to encode note: {}", e)))?;
		let mut nonce = [0u8; NONCE_LEN];
		rand::rng().fill(&mut nonce);
		let sealed = self
			.cipher()
			.encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
			.map_err(|e| SyncError::DecryptionError(format!("failed to seal note: {}", e)))?;

		let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
		out.extend_from_slice(&nonce);
		out.extend_from_slice(&sealed);
		Ok(out)
	}

	pub fn open(&self, ciphertext: &[u8]) -> Result<NotePlaintext, SyncError> {
		if ciphertext.len() <= NONCE_LEN {
			return Err(SyncError::DecryptionError(format!(
				"ciphertext too short: {} bytes",
				ciphertext.len()
			)));
		}
		let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
		let plaintext = self
			.cipher()
			.decrypt(Nonce::from_slice(nonce), sealed)
			.map_err(|_| SyncError::DecryptionError("note authentication failed".to_string()))?;
		bincode::deserialize(&plaintext)
			.map_err(|e| SyncError::DecryptionError(format!("invalid note plaintext: {}", e)))
	}
}

impl std::fmt::Debug for DecryptionKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("DecryptionKey(..)")
	}
}

/// Where a created note gets decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionRoute {
	Local,
	SelfDelegate,
	RemoteDelegate(String),
}

impl DecryptionRoute {
	/// Pick the route for a note whose metadata names `origin_url`, given the URL of this
	/// ledger's own delegate. Trailing slashes are ignored when comparing URLs.
	pub fn resolve(origin_url: Option<&str>, self_url: Option<&str>) -> Self {
		let origin = match origin_url.map(str::trim).filter(|url| !url.is_empty()) {
			Some(origin) => origin,
			None => return DecryptionRoute::Local,
		};
		match self_url {
			Some(own) if own.trim_end_matches('/') == origin.trim_end_matches('/') => {
				DecryptionRoute::SelfDelegate
			}
			_ => DecryptionRoute::RemoteDelegate(origin.to_string()),
		}
	}
}

fn decrypt_request(event: &OrderedEvent) -> DecryptRequest {
	DecryptRequest {
		block_number: event.block_number,
		token: event.token.clone(),
		poseidon_hash: event.poseidon_hash,
		owner: event.owner.clone(),
	}
}

/// Opens one created note.
#[async_trait::async_trait]
pub trait NoteDecryptor: Send + Sync {
	async fn decrypt(
		&self,
		event: &OrderedEvent,
		metadata: &EncryptedMetadata,
	) -> Result<DecryptedNote, SyncError>;

	fn name(&self) -> &'static str;
}

/// Opens notes with the account's own key.
pub struct LocalDecryptor {
	key: Option<DecryptionKey>,
}

impl LocalDecryptor {
	pub fn new(key: Option<DecryptionKey>) -> Self {
		Self { key }
	}
}

#[async_trait::async_trait]
impl NoteDecryptor for LocalDecryptor {
	async fn decrypt(
		&self,
		_event: &OrderedEvent,
		metadata: &EncryptedMetadata,
	) -> Result<DecryptedNote, SyncError> {
		let key = self.key.as_ref().ok_or_else(|| {
			SyncError::DecryptionError("no local decryption key configured".to_string())
		})?;
		let note = key.open(&metadata.ciphertext)?;
		Ok(DecryptedNote {
			amount: note.amount,
			blinding: note.blinding,
		})
	}

	fn name(&self) -> &'static str {
		"LocalDecryptor"
	}
}

/// Asks this ledger's own delegate.
pub struct DelegateDecryptor {
	delegate: Option<Arc<dyn DecryptionDelegate>>,
}

impl DelegateDecryptor {
	pub fn new(delegate: Option<Arc<dyn DecryptionDelegate>>) -> Self {
		Self { delegate }
	}
}

#[async_trait::async_trait]
impl NoteDecryptor for DelegateDecryptor {
	async fn decrypt(
		&self,
		event: &OrderedEvent,
		_metadata: &EncryptedMetadata,
	) -> Result<DecryptedNote, SyncError> {
		let delegate = self.delegate.as_ref().ok_or_else(|| {
			SyncError::DecryptionError("no decryption delegate configured".to_string())
		})?;
		Ok(delegate.decrypt(&decrypt_request(event)).await?)
	}

	fn name(&self) -> &'static str {
		"DelegateDecryptor"
	}
}

/// Connects to the delegate named in the metadata for each note.
pub struct RemoteDelegateDecryptor {
	connector: Arc<dyn DelegateConnector>,
}

impl RemoteDelegateDecryptor {
	pub fn new(connector: Arc<dyn DelegateConnector>) -> Self {
		Self { connector }
	}
}

#[async_trait::async_trait]
impl NoteDecryptor for RemoteDelegateDecryptor {
	async fn decrypt(
		&self,
		event: &OrderedEvent,
		metadata: &EncryptedMetadata,
	) -> Result<DecryptedNote, SyncError> {
		let url = metadata.origin_url.as_deref().ok_or_else(|| {
			SyncError::DecryptionError("metadata names no delegate".to_string())
		})?;
		let delegate = self.connector.connect(url)?;
		Ok(delegate.decrypt(&decrypt_request(event)).await?)
	}

	fn name(&self) -> &'static str {
		"RemoteDelegateDecryptor"
	}
}

/// The three decryptors, selected per event by [`DecryptionRoute`].
pub struct DecryptionDispatcher {
	self_url: Option<String>,
	local: LocalDecryptor,
	own_delegate: DelegateDecryptor,
	remote: RemoteDelegateDecryptor,
}

impl DecryptionDispatcher {
	pub fn new(
		key: Option<DecryptionKey>,
		delegate: Option<Arc<dyn DecryptionDelegate>>,
		connector: Arc<dyn DelegateConnector>,
	) -> Self {
		Self {
			self_url: delegate.as_ref().map(|d| d.url().to_string()),
			local: LocalDecryptor::new(key),
			own_delegate: DelegateDecryptor::new(delegate),
			remote: RemoteDelegateDecryptor::new(connector),
		}
	}

	pub fn route(&self, metadata: &EncryptedMetadata) -> DecryptionRoute {
		DecryptionRoute::resolve(metadata.origin_url.as_deref(), self.self_url.as_deref())
	}

	fn decryptor(&self, route: &DecryptionRoute) -> &dyn NoteDecryptor {
		match route {
			DecryptionRoute::Local => &self.local,
			DecryptionRoute::SelfDelegate => &self.own_delegate,
			DecryptionRoute::RemoteDelegate(_) => &self.remote,
		}
	}

	pub async fn decrypt(
		&self,
		event: &OrderedEvent,
		metadata: &EncryptedMetadata,
	) -> Result<DecryptedNote, SyncError> {
		let route = self.route(metadata);
		let decryptor = self.decryptor(&route);
		tracing::debug!(
			"Decrypting {} at block {} via {}",
			event.poseidon_hash,
			event.block_number,
			decryptor.name()
		);
		decryptor.decrypt(event, metadata).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::delegate::DelegateError;
	use crate::indexer::{ChainEvent, EventName};
	use parking_lot::Mutex;

	struct FixedDelegate {
		url: String,
		amount: u128,
	}

	#[async_trait::async_trait]
	impl DecryptionDelegate for FixedDelegate {
		fn url(&self) -> &str {
			&self.url
		}

		async fn decrypt(&self, _request: &DecryptRequest) -> Result<DecryptedNote, DelegateError> {
			Ok(DecryptedNote {
				amount: self.amount,
				blinding: H256([9; 32]),
			})
		}

		async fn events_since(
			&self,
			_from_block: u64,
			_owner: &str,
			_token: &str,
		) -> Result<Vec<ChainEvent>, DelegateError> {
			Ok(Vec::new())
		}
	}

	#[derive(Default)]
	struct RecordingConnector {
		urls: Mutex<Vec<String>>,
	}

	impl DelegateConnector for RecordingConnector {
		fn connect(&self, url: &str) -> Result<Arc<dyn DecryptionDelegate>, DelegateError> {
			self.urls.lock().push(url.to_string());
			Ok(Arc::new(FixedDelegate {
				url: url.to_string(),
				amount: 7,
			}))
		}
	}

	fn created(hash: u8) -> OrderedEvent {
		OrderedEvent {
			event_name: EventName::CommitmentCreated,
			owner: "0xowner".to_string(),
			token: "0xtoken".to_string(),
			poseidon_hash: H256([hash; 32]),
			metadata: None,
			block_number: 10,
			transaction_index: 0,
			transaction_hash: None,
		}
	}

	#[test]
	fn route_resolution() {
		let own = Some("https://delegate.one/");
		assert_eq!(DecryptionRoute::resolve(None, own), DecryptionRoute::Local);
		assert_eq!(DecryptionRoute::resolve(Some(""), own), DecryptionRoute::Local);
		assert_eq!(
			DecryptionRoute::resolve(Some("https://delegate.one"), own),
			DecryptionRoute::SelfDelegate
		);
		assert_eq!(
			DecryptionRoute::resolve(Some("https://delegate.two"), own),
			DecryptionRoute::RemoteDelegate("https://delegate.two".to_string())
		);
		assert_eq!(
			DecryptionRoute::resolve(Some("https://delegate.one"), None),
			DecryptionRoute::RemoteDelegate("https://delegate.one".to_string())
		);
	}

	#[test]
	fn sealed_notes_open_with_the_same_key_only() {
		let key = DecryptionKey::from_secret(&[1; 32]);
		let note = NotePlaintext {
			amount: 1_000_000,
			blinding: H256([2; 32]),
		};
		let sealed = key.seal(&note).unwrap();
		assert_eq!(key.open(&sealed).unwrap(), note);

		let other = DecryptionKey::from_secret(&[3; 32]);
		assert!(matches!(other.open(&sealed), Err(SyncError::DecryptionError(_))));
		assert!(key.open(&sealed[..NONCE_LEN]).is_err());
	}

	#[test]
	fn metadata_decodes_from_prefixed_hex() {
		let metadata = EncryptedMetadata {
			ciphertext: vec![1, 2, 3],
			origin_url: Some("https://delegate.one".to_string()),
			message: Some("rent".to_string()),
		};
		let encoded = metadata.encode().unwrap();
		assert!(encoded.starts_with("0x"));
		assert_eq!(EncryptedMetadata::decode(&encoded).unwrap(), metadata);
		assert!(matches!(
			EncryptedMetadata::decode("0xnothex"),
			Err(SyncError::MetadataError(_))
		));
	}

	#[tokio::test]
	async fn dispatcher_uses_one_decryptor_per_route() {
		let connector = Arc::new(RecordingConnector::default());
		let own: Arc<dyn DecryptionDelegate> = Arc::new(FixedDelegate {
			url: "https://delegate.one".to_string(),
			amount: 5,
		});
		let key = DecryptionKey::from_secret(&[4; 32]);
		let dispatcher = DecryptionDispatcher::new(Some(key.clone()), Some(own), connector.clone());

		let local = EncryptedMetadata {
			ciphertext: key
				.seal(&NotePlaintext {
					amount: 3,
					blinding: H256([1; 32]),
				})
				.unwrap(),
			origin_url: None,
			message: None,
		};
		assert_eq!(dispatcher.decrypt(&created(1), &local).await.unwrap().amount, 3);

		let mine = EncryptedMetadata {
			ciphertext: Vec::new(),
			origin_url: Some("https://delegate.one".to_string()),
			message: None,
		};
		assert_eq!(dispatcher.decrypt(&created(2), &mine).await.unwrap().amount, 5);

		let theirs = EncryptedMetadata {
			ciphertext: Vec::new(),
			origin_url: Some("https://delegate.two".to_string()),
			message: None,
		};
		assert_eq!(dispatcher.decrypt(&created(3), &theirs).await.unwrap().amount, 7);
		assert_eq!(*connector.urls.lock(), vec!["https://delegate.two".to_string()]);
	}

	#[tokio::test]
	async fn missing_key_fails_local_route() {
		let dispatcher =
			DecryptionDispatcher::new(None, None, Arc::new(RecordingConnector::default()));
		let metadata = EncryptedMetadata {
			ciphertext: vec![0; 40],
			origin_url: None,
			message: None,
		};
		assert!(matches!(
			dispatcher.decrypt(&created(1), &metadata).await,
			Err(SyncError::DecryptionError(_))
		));
	}
}
