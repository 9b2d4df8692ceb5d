#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use solana_sdk::{commitment_config::CommitmentLevel, pubkey::Pubkey};
use solwatch_connector::{
    error::ConnectorError,
    events::{FieldMap, FieldValue},
    schema::{EventRegistry, EventSchema, FieldDef, FieldType},
    transport::{LogNotification, LogSource, LogStream},
};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A registry with a `Transfer { from, amount, memo }` and a `Closed { reason }` event.
pub fn registry() -> EventRegistry {
    EventRegistry::new()
        .with(EventSchema::anchor(
            "Transfer",
            vec![
                FieldDef::new("from", FieldType::Pubkey),
                FieldDef::new("amount", FieldType::U64),
                FieldDef::new("memo", FieldType::Option(Box::new(FieldType::String))),
            ],
        ))
        .with(EventSchema::anchor(
            "Closed",
            vec![FieldDef::new("reason", FieldType::String)],
        ))
}

pub fn transfer_fields(from: Pubkey, amount: u64, memo: Option<&str>) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("from".into(), FieldValue::Pubkey(from));
    fields.insert("amount".into(), FieldValue::Uint(amount.into()));
    fields.insert(
        "memo".into(),
        memo.map_or(FieldValue::Null, |m| FieldValue::Str(m.to_string())),
    );
    fields
}

/// Base64 payload for a `Transfer` of `amount`.
pub fn transfer_payload(amount: u64) -> String {
    let fields = transfer_fields(Pubkey::new_from_array([7; 32]), amount, None);
    encode(&registry(), "Transfer", &fields)
}

/// A `Transfer` whose discriminator matches but whose body is cut short.
pub fn truncated_transfer_payload() -> String {
    let mut bytes = registry()
        .encode_event("Transfer", &transfer_fields(Pubkey::new_unique(), 1, None))
        .unwrap();
    bytes.truncate(bytes.len() - 4);
    BASE64.encode(bytes)
}

pub fn closed_payload(reason: &str) -> String {
    let mut fields = FieldMap::new();
    fields.insert("reason".into(), FieldValue::Str(reason.to_string()));
    encode(&registry(), "Closed", &fields)
}

pub fn encode(registry: &EventRegistry, name: &str, fields: &FieldMap) -> String {
    BASE64.encode(registry.encode_event(name, fields).unwrap())
}

pub fn invoke(program: &Pubkey, depth: u32) -> String {
    format!("Program {program} invoke [{depth}]")
}

pub fn success(program: &Pubkey) -> String {
    format!("Program {program} success")
}

pub fn data(payload: &str) -> String {
    format!("Program data: {payload}")
}

pub fn log(message: &str) -> String {
    format!("Program log: {message}")
}

/// A successful transaction in which `program` emits `payloads` at depth 1.
pub fn notification(program: &Pubkey, slot: u64, payloads: &[String]) -> LogNotification {
    let mut logs = vec![invoke(program, 1), log("Instruction: Transfer")];
    logs.extend(payloads.iter().map(|p| data(p)));
    logs.push(format!("Program {program} consumed 1200 of 200000 compute units"));
    logs.push(success(program));
    LogNotification {
        signature: format!("sig-{slot}"),
        logs,
        err: None,
        slot,
    }
}

type Pending = Result<mpsc::UnboundedReceiver<LogNotification>, String>;

/// A [`LogSource`] whose subscribe attempts are scripted by a [`MockController`].
///
/// Each `subscribe` call takes the next queued outcome, waiting for one if the
/// queue is empty.
pub struct MockLogSource {
    outcomes: Mutex<mpsc::UnboundedReceiver<Pending>>,
    attempts: AtomicUsize,
}

pub struct MockController {
    outcomes: mpsc::UnboundedSender<Pending>,
}

impl MockLogSource {
    pub fn new() -> (Self, MockController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            outcomes: Mutex::new(rx),
            attempts: AtomicUsize::new(0),
        };
        (source, MockController { outcomes: tx })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MockController {
    /// Queues a successful subscription. Dropping the returned sender drops the connection.
    pub fn accept(&self) -> mpsc::UnboundedSender<LogNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes.send(Ok(rx)).unwrap();
        tx
    }

    pub fn reject(&self, reason: &str) {
        self.outcomes.send(Err(reason.to_string())).unwrap();
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    fn endpoint(&self) -> &str {
        "mock://local"
    }

    async fn subscribe(
        &self,
        _program_id: &Pubkey,
        _commitment: CommitmentLevel,
    ) -> Result<LogStream, ConnectorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().await.recv().await;
        match next {
            Some(Ok(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Err(reason)) => Err(ConnectorError::Transport(reason)),
            None => Err(ConnectorError::Transport("controller dropped".to_string())),
        }
    }
}

/// Receives the next value or fails the test after a generous timeout.
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for a value")
        .expect("channel closed")
}
