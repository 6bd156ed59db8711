//! Ordered, exactly-once delivery over a lossy broadcast transport.
//!
//! Every outgoing message is stamped with the sender, its connection epoch
//! and a sequence number that restarts at 0 with each epoch. Receivers keep
//! one stream per sender, hand messages on strictly in sequence order and
//! drop anything already processed or belonging to an older epoch.

use crate::error::{Result, SdkError};
use crate::network::PeerId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use skein_codec::{Decoder, Encoder};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// A sync message with its sequencing header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencedFrame {
    pub sender: PeerId,
    pub epoch: u64,
    pub seq: u64,
    pub message: Vec<u8>,
}

impl SequencedFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.message.len() + 32);
        encoder.write_var_string(self.sender.as_str());
        encoder.write_var_uint(self.epoch);
        encoder.write_var_uint(self.seq);
        encoder.write_var_buf(&self.message);
        encoder.to_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(bytes);
        Ok(Self {
            sender: PeerId(decoder.read_var_string()?),
            epoch: decoder.read_var_uint()?,
            seq: decoder.read_var_uint()?,
            message: decoder.read_var_buf()?.to_vec(),
        })
    }

    /// Text form used on the transport.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.encode())
    }

    pub fn from_base64(payload: &str) -> Result<Self> {
        let bytes = STANDARD.decode(payload)?;
        Self::decode(&bytes)
    }
}

#[derive(Debug)]
struct ReceiveStream {
    epoch: u64,
    last_processed: Option<u64>,
    highest_seen: Option<u64>,
    buffer: BTreeMap<u64, Vec<u8>>,
}

impl ReceiveStream {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            last_processed: None,
            highest_seen: None,
            buffer: BTreeMap::new(),
        }
    }

    fn next_expected(&self) -> u64 {
        self.last_processed.map_or(0, |last| last + 1)
    }

    fn drain(&mut self, out: &mut Vec<Vec<u8>>) {
        let mut next = self.next_expected();
        while let Some(message) = self.buffer.remove(&next) {
            out.push(message);
            self.last_processed = Some(next);
            next += 1;
        }
    }
}

/// Sequencing state for one replica.
#[derive(Debug)]
pub struct Sequencer {
    local: PeerId,
    epoch: u64,
    next_seq: u64,
    active: bool,
    streams: HashMap<PeerId, ReceiveStream>,
}

impl Sequencer {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            epoch: 0,
            next_seq: 0,
            active: false,
            streams: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start a new connection epoch and return it.
    pub fn connect(&mut self) -> u64 {
        self.epoch += 1;
        self.next_seq = 0;
        self.active = true;
        self.streams.clear();
        debug!(peer = %self.local, epoch = self.epoch, "sequencer connected");
        self.epoch
    }

    /// Go inactive and forget all sequencing state.
    pub fn disconnect(&mut self) {
        self.active = false;
        self.next_seq = 0;
        self.streams.clear();
        debug!(peer = %self.local, epoch = self.epoch, "sequencer disconnected");
    }

    /// Stamp an outgoing message.
    pub fn outgoing(&mut self, message: Vec<u8>) -> Result<SequencedFrame> {
        if !self.active {
            return Err(SdkError::NotConnected);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(SequencedFrame {
            sender: self.local.clone(),
            epoch: self.epoch,
            seq,
            message,
        })
    }

    /// Accept a frame and return every message that became deliverable, in
    /// order. Duplicates, stale epochs and our own echoes yield nothing.
    ///
    /// A stream from an unknown sender expects sequence 0. Joining a sender
    /// mid-epoch leaves its frames buffered until the next [`resync`].
    ///
    /// [`resync`]: Sequencer::resync
    pub fn receive(&mut self, frame: SequencedFrame) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if !self.active || frame.sender == self.local {
            return out;
        }

        let stream = self
            .streams
            .entry(frame.sender.clone())
            .or_insert_with(|| ReceiveStream::new(frame.epoch));

        if frame.epoch < stream.epoch {
            trace!(sender = %frame.sender, epoch = frame.epoch, "dropping frame from stale epoch");
            return out;
        }
        if frame.epoch > stream.epoch {
            debug!(sender = %frame.sender, epoch = frame.epoch, "sender started a new epoch");
            *stream = ReceiveStream::new(frame.epoch);
        }
        if stream.last_processed.is_some_and(|last| frame.seq <= last) {
            trace!(sender = %frame.sender, seq = frame.seq, "dropping duplicate frame");
            return out;
        }

        stream.highest_seen = Some(stream.highest_seen.map_or(frame.seq, |h| h.max(frame.seq)));
        stream.buffer.entry(frame.seq).or_insert(frame.message);
        stream.drain(&mut out);
        out
    }

    /// Give up on missing frames: clear every buffer and move each stream
    /// past the highest sequence seen so later frames drain again. Returns
    /// false when `epoch` is not the current connection epoch.
    pub fn resync(&mut self, epoch: u64) -> bool {
        if !self.active || epoch != self.epoch {
            trace!(epoch, current = self.epoch, "ignoring resync for stale epoch");
            return false;
        }
        for stream in self.streams.values_mut() {
            if let Some(highest) = stream.highest_seen {
                let last = stream.last_processed.map_or(highest, |l| l.max(highest));
                stream.last_processed = Some(last);
            }
            stream.buffer.clear();
        }
        true
    }

    /// Frames waiting behind a gap, across all senders.
    pub fn buffered(&self) -> usize {
        self.streams.values().map(|s| s.buffer.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sender: &str, epoch: u64, seq: u64) -> SequencedFrame {
        SequencedFrame {
            sender: PeerId::new(sender),
            epoch,
            seq,
            message: vec![seq as u8],
        }
    }

    fn connected(id: &str) -> Sequencer {
        let mut sequencer = Sequencer::new(PeerId::new(id));
        sequencer.connect();
        sequencer
    }

    #[test]
    fn test_outgoing_counts_from_zero_per_epoch() {
        let mut sequencer = Sequencer::new(PeerId::new("a"));
        assert!(matches!(
            sequencer.outgoing(vec![]),
            Err(SdkError::NotConnected)
        ));

        assert_eq!(sequencer.connect(), 1);
        assert_eq!(sequencer.outgoing(vec![]).unwrap().seq, 0);
        assert_eq!(sequencer.outgoing(vec![]).unwrap().seq, 1);

        assert_eq!(sequencer.connect(), 2);
        let frame = sequencer.outgoing(vec![]).unwrap();
        assert_eq!((frame.epoch, frame.seq), (2, 0));
    }

    #[test]
    fn test_reorder_and_duplicate() {
        let mut sequencer = connected("me");
        let mut applied = Vec::new();
        for seq in [0, 2, 1, 0] {
            applied.extend(sequencer.receive(frame("b", 1, seq)));
        }
        assert_eq!(applied, vec![vec![0], vec![1], vec![2]]);
        assert_eq!(sequencer.buffered(), 0);
    }

    #[test]
    fn test_gap_stalls_without_discarding() {
        let mut sequencer = connected("me");
        assert_eq!(sequencer.receive(frame("b", 1, 0)).len(), 1);
        assert!(sequencer.receive(frame("b", 1, 3)).is_empty());
        assert!(sequencer.receive(frame("b", 1, 2)).is_empty());
        assert_eq!(sequencer.buffered(), 2);
        assert_eq!(sequencer.receive(frame("b", 1, 1)).len(), 3);
    }

    #[test]
    fn test_unknown_sender_waits_for_frame_zero() {
        let mut sequencer = connected("me");
        let mut applied = Vec::new();
        for seq in [1, 0, 2] {
            applied.extend(sequencer.receive(frame("b", 1, seq)));
        }
        assert_eq!(applied, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_mid_epoch_join_drains_after_resync() {
        let mut sequencer = connected("me");
        assert!(sequencer.receive(frame("b", 1, 7)).is_empty());
        assert_eq!(sequencer.buffered(), 1);

        assert!(sequencer.resync(sequencer.epoch()));
        assert!(sequencer.receive(frame("b", 1, 7)).is_empty());
        assert_eq!(sequencer.receive(frame("b", 1, 8)), vec![vec![8]]);
    }

    #[test]
    fn test_echo_and_inactive_frames_are_ignored() {
        let mut sequencer = connected("me");
        assert!(sequencer.receive(frame("me", 1, 0)).is_empty());

        sequencer.disconnect();
        assert!(sequencer.receive(frame("b", 1, 0)).is_empty());
        assert!(!sequencer.resync(sequencer.epoch()));
    }

    #[test]
    fn test_sender_epochs() {
        let mut sequencer = connected("me");
        sequencer.receive(frame("b", 2, 0));
        sequencer.receive(frame("b", 2, 1));

        assert!(sequencer.receive(frame("b", 1, 2)).is_empty());
        assert_eq!(sequencer.receive(frame("b", 3, 0)), vec![vec![0]]);
    }

    #[test]
    fn test_resync_skips_missing_frames() {
        let mut sequencer = connected("me");
        sequencer.receive(frame("b", 1, 0));
        sequencer.receive(frame("b", 1, 2));
        sequencer.receive(frame("b", 1, 4));

        assert!(!sequencer.resync(sequencer.epoch() + 1));
        assert_eq!(sequencer.buffered(), 2);

        assert!(sequencer.resync(sequencer.epoch()));
        assert_eq!(sequencer.buffered(), 0);
        assert!(sequencer.receive(frame("b", 1, 3)).is_empty());
        assert_eq!(sequencer.receive(frame("b", 1, 5)), vec![vec![5]]);
    }

    #[test]
    fn test_frame_base64() {
        let original = SequencedFrame {
            sender: PeerId::new("peer-é"),
            epoch: 3,
            seq: 300,
            message: vec![1, 2, 3],
        };
        let text = original.to_base64();
        assert_eq!(SequencedFrame::from_base64(&text).unwrap(), original);

        assert!(matches!(
            SequencedFrame::from_base64("not base64!"),
            Err(SdkError::Base64(_))
        ));
    }
}
