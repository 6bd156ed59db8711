//! The three-message sync handshake.
//!
//! A peer opens with `SyncStep1` carrying its state vector. The other side
//! answers with `SyncStep2`: an update holding exactly what the first peer
//! is missing. Afterwards every local commit travels as an `Update`.
//!
//! Envelope: `varuint tag` followed by `varbuf payload`.

use crate::error::{Result, SdkError};
use skein_codec::{Decoder, Encoder};
use skein_db::{Document, Origin, StateVector};
use tracing::{debug, trace};

pub const MESSAGE_SYNC_STEP1: u64 = 0;
pub const MESSAGE_SYNC_STEP2: u64 = 1;
pub const MESSAGE_UPDATE: u64 = 2;

/// A sync protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncMessage {
    /// "Here is what I have."
    SyncStep1(StateVector),
    /// The update answering a `SyncStep1`.
    SyncStep2(Vec<u8>),
    /// An incremental update.
    Update(Vec<u8>),
}

impl SyncMessage {
    pub fn tag(&self) -> u64 {
        match self {
            SyncMessage::SyncStep1(_) => MESSAGE_SYNC_STEP1,
            SyncMessage::SyncStep2(_) => MESSAGE_SYNC_STEP2,
            SyncMessage::Update(_) => MESSAGE_UPDATE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_var_uint(self.tag());
        match self {
            SyncMessage::SyncStep1(sv) => encoder.write_var_buf(&sv.to_bytes()),
            SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
                encoder.write_var_buf(update)
            }
        }
        encoder.to_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(bytes);
        let tag = decoder.read_var_uint()?;
        let payload = decoder.read_var_buf()?;
        match tag {
            MESSAGE_SYNC_STEP1 => Ok(SyncMessage::SyncStep1(StateVector::from_bytes(payload)?)),
            MESSAGE_SYNC_STEP2 => Ok(SyncMessage::SyncStep2(payload.to_vec())),
            MESSAGE_UPDATE => Ok(SyncMessage::Update(payload.to_vec())),
            other => Err(SdkError::UnknownMessageType(other)),
        }
    }
}

/// Where the handshake stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Step 1 was sent, the answer has not arrived.
    AwaitingStep2,
    Synced,
}

/// Handshake state machine for one connection.
#[derive(Debug)]
pub struct SyncProtocol {
    state: SyncState,
    origin: Origin,
}

impl SyncProtocol {
    /// `origin` tags every transaction created from a remote message.
    pub fn new(origin: impl Into<Origin>) -> Self {
        Self {
            state: SyncState::Idle,
            origin: origin.into(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Open (or reopen) the handshake.
    pub fn start(&mut self, doc: &Document) -> SyncMessage {
        self.state = SyncState::AwaitingStep2;
        SyncMessage::SyncStep1(doc.state_vector())
    }

    pub fn reset(&mut self) {
        self.state = SyncState::Idle;
    }

    /// Apply one incoming message, returning the reply if there is one.
    ///
    /// Updates are accepted in every state and never move the state machine.
    pub fn handle(
        &mut self,
        doc: &mut Document,
        message: SyncMessage,
    ) -> Result<Option<SyncMessage>> {
        match message {
            SyncMessage::SyncStep1(remote) => {
                let update = doc.encode_state_as_update(&remote);
                trace!(bytes = update.len(), "answering sync step 1");
                Ok(Some(SyncMessage::SyncStep2(update)))
            }
            SyncMessage::SyncStep2(update) => {
                doc.apply_update(&update, Some(self.origin.clone()))?;
                if self.state == SyncState::AwaitingStep2 {
                    debug!(client = doc.client_id(), "handshake complete");
                    self.state = SyncState::Synced;
                }
                Ok(None)
            }
            SyncMessage::Update(update) => {
                doc.apply_update(&update, Some(self.origin.clone()))?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(client: u64, text: &str) -> Document {
        let mut doc = Document::with_client_id(client);
        let body = doc.get_or_insert_text("body").unwrap();
        let mut txn = doc.transact();
        body.push(&mut txn, text).unwrap();
        txn.commit();
        doc
    }

    fn text(doc: &mut Document) -> String {
        let body = doc.get_or_insert_text("body").unwrap();
        body.get_string(&*doc)
    }

    #[test]
    fn test_envelope_layout() {
        let bytes = SyncMessage::Update(vec![9, 8]).encode();
        assert_eq!(bytes, vec![2, 2, 9, 8]);
        assert_eq!(
            SyncMessage::decode(&bytes).unwrap(),
            SyncMessage::Update(vec![9, 8])
        );

        let sv = StateVector::from_entries([(3, 5)]);
        let step1 = SyncMessage::SyncStep1(sv.clone());
        assert_eq!(SyncMessage::decode(&step1.encode()).unwrap(), step1);
    }

    #[test]
    fn test_unknown_tag() {
        let err = SyncMessage::decode(&[7, 0]).unwrap_err();
        assert!(matches!(err, SdkError::UnknownMessageType(7)));
    }

    #[test]
    fn test_truncated_envelope() {
        assert!(matches!(
            SyncMessage::decode(&[2, 5, 1]),
            Err(SdkError::Codec(_))
        ));
    }

    #[test]
    fn test_handshake_converges() {
        let mut a = doc_with(1, "left");
        let mut b = doc_with(2, "right");
        let mut pa = SyncProtocol::new("remote");
        let mut pb = SyncProtocol::new("remote");

        let step1_a = pa.start(&a);
        let step1_b = pb.start(&b);
        assert_eq!(pa.state(), SyncState::AwaitingStep2);

        let step2_for_a = pb.handle(&mut b, step1_a).unwrap().unwrap();
        let step2_for_b = pa.handle(&mut a, step1_b).unwrap().unwrap();
        assert!(pa.handle(&mut a, step2_for_a).unwrap().is_none());
        assert!(pb.handle(&mut b, step2_for_b).unwrap().is_none());

        assert!(pa.is_synced() && pb.is_synced());
        assert_eq!(text(&mut a), text(&mut b));
        assert_eq!(text(&mut a), "leftright");
    }

    #[test]
    fn test_update_does_not_move_state() {
        let a = doc_with(1, "x");
        let mut b = Document::with_client_id(2);
        let mut pb = SyncProtocol::new("remote");

        let update = a.encode_state_as_update(&StateVector::new());
        pb.handle(&mut b, SyncMessage::Update(update)).unwrap();
        assert_eq!(pb.state(), SyncState::Idle);
        assert_eq!(text(&mut b), "x");

        pb.start(&b);
        pb.reset();
        assert_eq!(pb.state(), SyncState::Idle);
    }

    #[test]
    fn test_remote_transactions_carry_origin() {
        let a = doc_with(1, "x");
        let mut b = Document::with_client_id(2);
        let mut events = b.subscribe();
        let mut pb = SyncProtocol::new("peer-a");

        let update = a.encode_state_as_update(&StateVector::new());
        pb.handle(&mut b, SyncMessage::Update(update)).unwrap();
        let event = events.try_recv().unwrap();
        assert!(event.has_origin(&Origin::from("peer-a")));
    }
}
