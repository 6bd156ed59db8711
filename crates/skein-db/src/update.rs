//! Binary update format.
//!
//! An update is a version byte, seven length-prefixed columns and a trailing
//! "rest" stream:
//!
//! ```text
//! u8      version
//! varbuf  info         Rle         one byte per item: flags | content ref
//! varbuf  client       UintOptRle  client of every origin / right origin
//! varbuf  left_clock   IntDiff     clock of every origin
//! varbuf  right_clock  RleIntDiff  clock of every right origin
//! varbuf  string       String      text content, root names, map keys
//! varbuf  parent_info  Rle         parent kind of items without origins
//! varbuf  len          UintOptRle  length of deleted and `Any` content
//! rest:   clientCount, per client (itemCount, client, clock, items…),
//!         any-values inline, then the delete set
//! ```
//!
//! Items with a known neighbour carry no parent; the receiver inherits
//! parent and key from that neighbour.

use crate::error::{DbError, Result};
use skein_codec::{
    Decoder, Encoder, IntDiffDecoder, IntDiffEncoder, RleDecoder, RleEncoder, RleIntDiffDecoder,
    RleIntDiffEncoder, StreamDecoder, StreamEncoder, StringDecoder, StringEncoder,
    UintOptRleDecoder, UintOptRleEncoder, UINT_OPT_RLE_MAX,
};
use skein_core::content::char_to_byte;
use skein_core::{
    Branches, ClientId, Content, DeleteSet, Item, ItemRecord, StateVector, Store, Value, ID,
    MAX_CLIENT_ID,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const UPDATE_VERSION: u8 = 1;

const HAS_ORIGIN: u8 = 0x80;
const HAS_RIGHT_ORIGIN: u8 = 0x40;
const HAS_PARENT_SUB: u8 = 0x20;
const CONTENT_REF_MASK: u8 = 0x1f;

/// Parent kind for items that name their root type.
const PARENT_ROOT: u8 = 1;

const TAG_NULL: u8 = 126;
const TAG_INT: u8 = 125;
const TAG_FLOAT: u8 = 123;
const TAG_TRUE: u8 = 120;
const TAG_FALSE: u8 = 121;
const TAG_STRING: u8 = 119;

/// Cap on speculative preallocation driven by counts read off the wire.
const MAX_PREALLOC: u64 = 1024;

/// A fully decoded update, not yet applied to any document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub blocks: BTreeMap<ClientId, Vec<ItemRecord>>,
    pub delete_set: DeleteSet,
}

impl Update {
    /// Decode a whole payload; nothing is returned unless every byte parses.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        UpdateDecoder::new(bytes)?.read_update()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.values().all(Vec::is_empty) && self.delete_set.is_empty()
    }

    /// Clock range each client's records cover, as `(client, start, end)`.
    pub fn ranges(&self) -> impl Iterator<Item = (ClientId, u64, u64)> + '_ {
        self.blocks.iter().filter_map(|(client, records)| {
            let first = records.first()?;
            let last = records.last()?;
            Some((*client, first.id.clock, last.end()))
        })
    }
}

/// Encode every item `remote` lacks, plus the full delete set `ds`.
pub fn encode_update(store: &Store, remote: &StateVector, ds: &DeleteSet) -> Vec<u8> {
    let mut encoder = UpdateEncoder::new();
    let mut clients: Vec<(ClientId, u64)> = store
        .blocks
        .clients()
        .map(|client| (client, remote.get(client)))
        .filter(|(client, clock)| store.blocks.state(*client) > *clock)
        .collect();
    clients.sort_unstable();

    encoder.rest.write_var_uint(clients.len() as u64);
    for (client, clock) in clients {
        let ptrs = store.blocks.client_ptrs(client);
        let Some(start) = store.blocks.find_index(client, clock) else {
            encoder.rest.write_var_uint(0);
            encoder.rest.write_var_uint(client);
            encoder.rest.write_var_uint(clock);
            continue;
        };
        encoder.rest.write_var_uint((ptrs.len() - start) as u64);
        encoder.rest.write_var_uint(client);
        encoder.rest.write_var_uint(clock);
        for (i, ptr) in ptrs[start..].iter().enumerate() {
            let item = store.blocks.get(*ptr);
            let offset = if i == 0 { clock - item.id.clock } else { 0 };
            encoder.write_item(&store.branches, item, offset);
        }
    }
    ds.encode(&mut encoder.rest);
    encoder.to_bytes()
}

struct UpdateEncoder {
    rest: Encoder,
    info: RleEncoder,
    client: UintOptRleEncoder,
    left_clock: IntDiffEncoder,
    right_clock: RleIntDiffEncoder,
    string: StringEncoder,
    parent_info: RleEncoder,
    len: UintOptRleEncoder,
}

impl UpdateEncoder {
    fn new() -> Self {
        Self {
            rest: Encoder::new(),
            info: RleEncoder::new(),
            client: UintOptRleEncoder::new(),
            left_clock: IntDiffEncoder::new(0),
            right_clock: RleIntDiffEncoder::new(0),
            string: StringEncoder::new(),
            parent_info: RleEncoder::new(),
            len: UintOptRleEncoder::new(),
        }
    }

    fn write_item(&mut self, branches: &Branches, item: &Item, offset: u64) {
        let origin = if offset > 0 {
            Some(ID::new(item.id.client, item.id.clock + offset - 1))
        } else {
            item.origin
        };
        let content_ref = if item.deleted {
            Content::REF_DELETED
        } else {
            item.content.type_ref()
        };
        let mut info = content_ref;
        if origin.is_some() {
            info |= HAS_ORIGIN;
        }
        if item.right_origin.is_some() {
            info |= HAS_RIGHT_ORIGIN;
        }
        if item.parent_sub.is_some() {
            info |= HAS_PARENT_SUB;
        }
        self.info.write(info);

        if let Some(id) = origin {
            self.client.write(id.client);
            self.left_clock.write(id.clock as i64);
        }
        if let Some(id) = item.right_origin {
            self.client.write(id.client);
            self.right_clock.write(id.clock as i64);
        }
        if origin.is_none() && item.right_origin.is_none() {
            self.parent_info.write(PARENT_ROOT);
            self.string.write(branches.branch(item.parent).name.as_ref());
            if let Some(sub) = &item.parent_sub {
                self.string.write(sub.as_ref());
            }
        }

        match (&item.content, item.deleted) {
            (_, true) | (Content::Deleted(_), _) => self.len.write(item.len - offset),
            (Content::String(s), false) => self.string.write(&s[char_to_byte(s, offset)..]),
            (Content::Any(values), false) => {
                let values = &values[offset as usize..];
                self.len.write(values.len() as u64);
                for value in values {
                    write_any(&mut self.rest, value);
                }
            }
        }
    }

    fn to_bytes(self) -> Vec<u8> {
        let rest = self.rest.to_bytes();
        let mut out = Encoder::with_capacity(rest.len() + 64);
        out.write_u8(UPDATE_VERSION);
        out.write_var_buf(&self.info.to_bytes());
        out.write_var_buf(&self.client.to_bytes());
        out.write_var_buf(&self.left_clock.to_bytes());
        out.write_var_buf(&self.right_clock.to_bytes());
        out.write_var_buf(&self.string.to_bytes());
        out.write_var_buf(&self.parent_info.to_bytes());
        out.write_var_buf(&self.len.to_bytes());
        out.write_raw(&rest);
        out.to_bytes()
    }
}

fn write_any(encoder: &mut Encoder, value: &Value) {
    match value {
        Value::Null => encoder.write_u8(TAG_NULL),
        Value::Bool(true) => encoder.write_u8(TAG_TRUE),
        Value::Bool(false) => encoder.write_u8(TAG_FALSE),
        Value::Int(i) => {
            encoder.write_u8(TAG_INT);
            encoder.write_var_int(*i);
        }
        Value::Float(f) => {
            encoder.write_u8(TAG_FLOAT);
            encoder.write_f64(*f);
        }
        Value::String(s) => {
            encoder.write_u8(TAG_STRING);
            encoder.write_var_string(s);
        }
    }
}

fn read_any(decoder: &mut Decoder<'_>) -> Result<Value> {
    let value = match decoder.read_u8()? {
        TAG_NULL => Value::Null,
        TAG_TRUE => Value::Bool(true),
        TAG_FALSE => Value::Bool(false),
        TAG_INT => Value::Int(decoder.read_var_int()?),
        TAG_FLOAT => Value::Float(decoder.read_f64()?),
        TAG_STRING => Value::String(decoder.read_var_string()?),
        other => return Err(DbError::UnknownValueTag(other)),
    };
    Ok(value)
}

struct UpdateDecoder<'a> {
    rest: Decoder<'a>,
    info: RleDecoder<'a>,
    client: UintOptRleDecoder<'a>,
    left_clock: IntDiffDecoder<'a>,
    right_clock: RleIntDiffDecoder<'a>,
    string: StringDecoder<'a>,
    parent_info: RleDecoder<'a>,
    len: UintOptRleDecoder<'a>,
}

impl<'a> UpdateDecoder<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != UPDATE_VERSION {
            return Err(DbError::UnsupportedVersion(version));
        }
        let info = RleDecoder::new(decoder.read_var_buf()?);
        let client = UintOptRleDecoder::new(decoder.read_var_buf()?);
        let left_clock = IntDiffDecoder::new(decoder.read_var_buf()?, 0);
        let right_clock = RleIntDiffDecoder::new(decoder.read_var_buf()?, 0);
        let string_column = decoder.read_var_buf()?;
        let string = if string_column.is_empty() {
            StringDecoder::empty()
        } else {
            StringDecoder::new(string_column)?
        };
        let parent_info = RleDecoder::new(decoder.read_var_buf()?);
        let len = UintOptRleDecoder::new(decoder.read_var_buf()?);
        Ok(Self {
            rest: decoder,
            info,
            client,
            left_clock,
            right_clock,
            string,
            parent_info,
            len,
        })
    }

    fn read_update(mut self) -> Result<Update> {
        let mut blocks: BTreeMap<ClientId, Vec<ItemRecord>> = BTreeMap::new();
        let client_count = self.rest.read_var_uint()?;
        for _ in 0..client_count {
            let item_count = self.rest.read_var_uint()?;
            let client = self.rest.read_var_uint()?;
            if client > MAX_CLIENT_ID {
                return Err(DbError::MalformedUpdate("client id out of range"));
            }
            let mut clock = self.rest.read_var_uint()?;
            let records = blocks.entry(client).or_default();
            records.reserve(item_count.min(MAX_PREALLOC) as usize);
            for _ in 0..item_count {
                let record = self.read_item(ID::new(client, clock))?;
                // lengths travel in a UintOptRle column, so clocks stay below its limit
                clock = clock
                    .checked_add(record.len)
                    .filter(|end| *end <= UINT_OPT_RLE_MAX)
                    .ok_or(DbError::MalformedUpdate("clock overflow"))?;
                records.push(record);
            }
        }
        let delete_set = DeleteSet::decode(&mut self.rest)?;
        if self.rest.has_more() {
            return Err(DbError::MalformedUpdate("trailing bytes after delete set"));
        }
        blocks.retain(|_, records| !records.is_empty());
        Ok(Update { blocks, delete_set })
    }

    fn read_id(&mut self, right: bool) -> Result<ID> {
        let client = self.client.read_next()?;
        let clock = if right {
            self.right_clock.read_next()?
        } else {
            self.left_clock.read_next()?
        };
        let clock = u64::try_from(clock).map_err(|_| DbError::MalformedUpdate("negative clock"))?;
        Ok(ID::new(client, clock))
    }

    fn read_item(&mut self, id: ID) -> Result<ItemRecord> {
        let info = self.info.read_next()?;
        let origin = if info & HAS_ORIGIN != 0 {
            Some(self.read_id(false)?)
        } else {
            None
        };
        let right_origin = if info & HAS_RIGHT_ORIGIN != 0 {
            Some(self.read_id(true)?)
        } else {
            None
        };
        let (parent, parent_sub) = if origin.is_none() && right_origin.is_none() {
            if self.parent_info.read_next()? != PARENT_ROOT {
                return Err(DbError::MissingParent(id));
            }
            let name: Arc<str> = Arc::from(self.string.read_next()?);
            let sub = if info & HAS_PARENT_SUB != 0 {
                Some(Arc::from(self.string.read_next()?))
            } else {
                None
            };
            (Some(name), sub)
        } else {
            (None, None)
        };

        let content = match info & CONTENT_REF_MASK {
            Content::REF_DELETED => Content::Deleted(self.len.read_next()?),
            Content::REF_STRING => Content::String(self.string.read_next()?.to_owned()),
            Content::REF_ANY => {
                let count = self.len.read_next()?;
                let mut values = Vec::with_capacity(count.min(MAX_PREALLOC) as usize);
                for _ in 0..count {
                    values.push(read_any(&mut self.rest)?);
                }
                Content::Any(values)
            }
            other => return Err(DbError::UnknownContentRef(other)),
        };
        let len = content.len();
        if len == 0 {
            return Err(DbError::MalformedUpdate("empty item"));
        }
        Ok(ItemRecord {
            id,
            len,
            origin,
            right_origin,
            parent,
            parent_sub,
            content,
        })
    }
}

/// Decode an update for inspection without applying it.
pub fn decode_update(bytes: &[u8]) -> Result<Update> {
    Update::decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_update_layout() {
        let store = Store::new(1);
        let bytes = encode_update(&store, &StateVector::new(), &DeleteSet::new());
        // version, seven columns (the string column holds an empty varstring),
        // zero clients, empty delete set
        assert_eq!(bytes, vec![UPDATE_VERSION, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0]);
        let update = Update::decode(&bytes).unwrap();
        assert!(update.is_empty());
    }

    #[test]
    fn test_unknown_version() {
        assert_eq!(Update::decode(&[9]), Err(DbError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let store = Store::new(1);
        let bytes = encode_update(&store, &StateVector::new(), &DeleteSet::new());
        assert!(matches!(
            Update::decode(&bytes[..bytes.len() - 1]),
            Err(DbError::Codec(_))
        ));
    }

    #[test]
    fn test_any_values_round_trip() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-42),
            Value::Float(1.5),
            Value::String("ok".into()),
        ];
        let mut encoder = Encoder::new();
        for value in &values {
            write_any(&mut encoder, value);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = Decoder::new(&bytes);
        for value in &values {
            assert_eq!(&read_any(&mut decoder).unwrap(), value);
        }
    }

    #[test]
    fn test_unknown_value_tag() {
        let mut decoder = Decoder::new(&[7]);
        assert_eq!(read_any(&mut decoder), Err(DbError::UnknownValueTag(7)));
    }
}
