//! Item kinds, values and their on-segment representation
//!
//! The engine stores a closed set of value kinds. Each kind knows how to
//! construct, destroy, read and overwrite its arena payload; dispatch is an
//! exhaustive `match` on the kind, so no function pointers or vtables ever
//! land in shared memory. Discriminant bytes are part of the cross-process
//! contract and must never be renumbered.

use serde::{Deserialize, Serialize};

use crate::layout::arena::{Arena, ArenaError};
use crate::layout::constants::NIL;

/// Growth slack for string-like payloads, so that moderate in-place growth
/// does not reallocate
fn reserve_for(len: usize) -> usize {
    len.max(8) + len / 2
}

/// The closed set of item kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ItemKind {
    /// A raw boolean
    Bool = 1,
    /// A raw IEEE-754 double
    Double = 2,
    /// A UTF-8 string
    Text = 3,
    /// Metadata only, no payload
    Null = 4,
    /// A structured document stored as its JSON encoding
    Json = 5,
}

impl ItemKind {
    /// Decode a directory kind byte; `None` for bytes this build does not know
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Bool),
            2 => Some(Self::Double),
            3 => Some(Self::Text),
            4 => Some(Self::Null),
            5 => Some(Self::Json),
            _ => None,
        }
    }

    /// The directory kind byte for this kind
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable kind name
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Double => "double",
            Self::Text => "text",
            Self::Null => "null",
            Self::Json => "json",
        }
    }
}

/// A typed item value
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Bool(bool),
    Double(f64),
    Text(String),
    Json(serde_json::Value),
    Null,
}

impl ItemValue {
    /// The kind of this value
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Bool(_) => ItemKind::Bool,
            Self::Double(_) => ItemKind::Double,
            Self::Text(_) => ItemKind::Text,
            Self::Json(_) => ItemKind::Json,
            Self::Null => ItemKind::Null,
        }
    }

    /// Get the boolean value, if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the numeric value, if this is a Double
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the string value, if this is a Text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Get the document value, if this is a Json
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is the Null value
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for ItemValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for ItemValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for ItemValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ItemValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<serde_json::Value> for ItemValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// A value together with its free-form tag
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub value: ItemValue,
    pub tag: String,
}

impl Item {
    /// Create an item with an explicit tag
    pub fn new(value: impl Into<ItemValue>, tag: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tag: tag.into(),
        }
    }

    /// Create an item with the empty tag
    pub fn untagged(value: impl Into<ItemValue>) -> Self {
        Self {
            value: value.into(),
            tag: String::new(),
        }
    }

    /// The kind of the item's value
    pub fn kind(&self) -> ItemKind {
        self.value.kind()
    }
}

impl From<ItemValue> for Item {
    fn from(value: ItemValue) -> Self {
        Self::untagged(value)
    }
}

impl From<bool> for Item {
    fn from(v: bool) -> Self {
        Self::untagged(ItemValue::Bool(v))
    }
}

impl From<f64> for Item {
    fn from(v: f64) -> Self {
        Self::untagged(ItemValue::Double(v))
    }
}

impl From<&str> for Item {
    fn from(v: &str) -> Self {
        Self::untagged(ItemValue::from(v))
    }
}

impl From<String> for Item {
    fn from(v: String) -> Self {
        Self::untagged(ItemValue::Text(v))
    }
}

impl From<serde_json::Value> for Item {
    fn from(v: serde_json::Value) -> Self {
        Self::untagged(ItemValue::Json(v))
    }
}

/// Geometry of a value's payload allocation, as recorded in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValueSlot {
    pub off: u64,
    pub len: u64,
    pub cap: u64,
}

impl ValueSlot {
    pub(crate) fn none() -> Self {
        Self { off: NIL, len: 0, cap: 0 }
    }
}

/// Failure modes of the on-segment value operations
#[derive(Debug)]
pub(crate) enum ItemOpError {
    /// Arena exhausted
    OutOfSpace { requested: usize },
    /// Payload bookkeeping or content failed validation
    Corrupt,
    /// The value could not be serialized
    Encode(String),
}

impl From<ArenaError> for ItemOpError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::OutOfSpace { requested } => Self::OutOfSpace { requested },
            ArenaError::Corrupt => Self::Corrupt,
        }
    }
}

/// Serialize a value to its payload bytes; `None` for payload-free kinds
fn encode_payload(value: &ItemValue) -> Result<Option<Vec<u8>>, ItemOpError> {
    match value {
        ItemValue::Bool(v) => Ok(Some(vec![u8::from(*v)])),
        ItemValue::Double(v) => Ok(Some(v.to_le_bytes().to_vec())),
        ItemValue::Text(v) => Ok(Some(v.as_bytes().to_vec())),
        ItemValue::Json(v) => serde_json::to_vec(v)
            .map(Some)
            .map_err(|e| ItemOpError::Encode(e.to_string())),
        ItemValue::Null => Ok(None),
    }
}

/// Construct a value's payload in the arena, returning its slot geometry
pub(crate) fn construct_value(arena: &Arena, value: &ItemValue) -> Result<ValueSlot, ItemOpError> {
    let payload = match encode_payload(value)? {
        Some(payload) => payload,
        None => return Ok(ValueSlot::none()),
    };

    let reserve = match value.kind() {
        // String-like payloads over-allocate so in-place growth is cheap
        ItemKind::Text | ItemKind::Json => reserve_for(payload.len()),
        _ => payload.len(),
    };

    let (off, cap) = arena.alloc(reserve)?;
    arena.write_bytes(off, &payload)?;
    Ok(ValueSlot {
        off,
        len: payload.len() as u64,
        cap: cap as u64,
    })
}

/// Check that a value's payload could be destroyed, without touching it
pub(crate) fn validate_value(arena: &Arena, slot: ValueSlot) -> Result<(), ItemOpError> {
    if slot.off == NIL {
        return Ok(());
    }
    arena.validate_payload(slot.off)?;
    Ok(())
}

/// Destroy a value's payload. An absent payload counts as success: the item
/// is gone either way.
pub(crate) fn destroy_value(arena: &Arena, slot: ValueSlot) -> Result<(), ItemOpError> {
    if slot.off == NIL {
        return Ok(());
    }
    arena.free(slot.off)?;
    Ok(())
}

/// Read a value of the given kind back from its payload
pub(crate) fn read_value(
    arena: &Arena,
    kind: ItemKind,
    slot: ValueSlot,
) -> Result<ItemValue, ItemOpError> {
    match kind {
        ItemKind::Null => {
            if slot.off != NIL {
                return Err(ItemOpError::Corrupt);
            }
            Ok(ItemValue::Null)
        }
        ItemKind::Bool => {
            let bytes = arena.bytes(slot.off, 1)?;
            if slot.len != 1 {
                return Err(ItemOpError::Corrupt);
            }
            Ok(ItemValue::Bool(bytes[0] != 0))
        }
        ItemKind::Double => {
            if slot.len != 8 {
                return Err(ItemOpError::Corrupt);
            }
            let bytes = arena.bytes(slot.off, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(ItemValue::Double(f64::from_le_bytes(raw)))
        }
        ItemKind::Text => {
            let bytes = arena.bytes(slot.off, slot.len as usize)?;
            let text = std::str::from_utf8(bytes).map_err(|_| ItemOpError::Corrupt)?;
            Ok(ItemValue::Text(text.to_string()))
        }
        ItemKind::Json => {
            let bytes = arena.bytes(slot.off, slot.len as usize)?;
            let doc = serde_json::from_slice(bytes).map_err(|_| ItemOpError::Corrupt)?;
            Ok(ItemValue::Json(doc))
        }
    }
}

/// Overwrite an existing value of the same kind in place.
///
/// Fixed-width kinds always reuse their allocation. String-like kinds reuse
/// it while the new bytes fit the recorded capacity and move to a fresh
/// allocation only when they do not; either way the caller's directory entry
/// is updated through `slot`, never removed.
pub(crate) fn write_value(
    arena: &Arena,
    slot: &mut ValueSlot,
    value: &ItemValue,
) -> Result<(), ItemOpError> {
    let payload = match encode_payload(value)? {
        Some(payload) => payload,
        None => return Ok(()),
    };

    if payload.len() as u64 <= slot.cap {
        arena.write_bytes(slot.off, &payload)?;
        slot.len = payload.len() as u64;
        return Ok(());
    }

    // Grow: stage the replacement before releasing the old payload so a
    // failed allocation leaves the value untouched
    arena.validate_payload(slot.off)?;
    let (off, cap) = arena.alloc(reserve_for(payload.len()))?;
    arena.write_bytes(off, &payload)?;
    arena.free(slot.off)?;
    *slot = ValueSlot {
        off,
        len: payload.len() as u64,
        cap: cap as u64,
    };
    Ok(())
}

/// Rewrite an auxiliary string buffer (used for tags), reusing its
/// allocation when possible. The empty string stores no allocation at all.
pub(crate) fn rewrite_string(
    arena: &Arena,
    off: &mut u64,
    len: &mut u64,
    cap: &mut u64,
    text: &str,
) -> Result<(), ItemOpError> {
    let bytes = text.as_bytes();

    if bytes.is_empty() {
        if *off != NIL {
            arena.free(*off)?;
        }
        *off = NIL;
        *len = 0;
        *cap = 0;
        return Ok(());
    }

    if *off != NIL && bytes.len() as u64 <= *cap {
        arena.write_bytes(*off, bytes)?;
        *len = bytes.len() as u64;
        return Ok(());
    }

    if *off != NIL {
        arena.validate_payload(*off)?;
    }
    let (new_off, new_cap) = arena.alloc(reserve_for(bytes.len()))?;
    arena.write_bytes(new_off, bytes)?;
    if *off != NIL {
        arena.free(*off)?;
    }
    *off = new_off;
    *len = bytes.len() as u64;
    *cap = new_cap as u64;
    Ok(())
}

/// Read an auxiliary string buffer back
pub(crate) fn read_string(arena: &Arena, off: u64, len: u64) -> Result<String, ItemOpError> {
    if off == NIL {
        return Ok(String::new());
    }
    let bytes = arena.bytes(off, len as usize)?;
    let text = std::str::from_utf8(bytes).map_err(|_| ItemOpError::Corrupt)?;
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::header::{SegmentGeometry, SegmentHeader};
    use serde_json::json;

    struct TestRegion {
        storage: Vec<u64>,
    }

    impl TestRegion {
        fn new(capacity: usize) -> Self {
            let mut storage = vec![0u64; capacity / 8];
            let geo = SegmentGeometry::for_capacity(capacity).unwrap();
            let header = storage.as_mut_ptr() as *mut SegmentHeader;
            unsafe {
                SegmentHeader::initialize(header, geo, capacity);
                Arena::attach(storage.as_mut_ptr() as *mut u8).format();
            }
            Self { storage }
        }

        fn arena(&mut self) -> Arena {
            unsafe { Arena::attach(self.storage.as_mut_ptr() as *mut u8) }
        }
    }

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ItemKind::Bool.code(), 1);
        assert_eq!(ItemKind::Double.code(), 2);
        assert_eq!(ItemKind::Text.code(), 3);
        assert_eq!(ItemKind::Null.code(), 4);
        assert_eq!(ItemKind::Json.code(), 5);

        for kind in [
            ItemKind::Bool,
            ItemKind::Double,
            ItemKind::Text,
            ItemKind::Null,
            ItemKind::Json,
        ] {
            assert_eq!(ItemKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ItemKind::from_code(0), None);
        assert_eq!(ItemKind::from_code(9), None);
    }

    #[test]
    fn test_construct_read_each_kind() {
        let mut region = TestRegion::new(64 * 1024);
        let arena = region.arena();

        let values = [
            ItemValue::Bool(true),
            ItemValue::Double(3.25),
            ItemValue::Text("hello".to_string()),
            ItemValue::Json(json!({"answer": 42})),
            ItemValue::Null,
        ];

        for value in values {
            let slot = construct_value(&arena, &value).unwrap();
            if value.is_null() {
                assert_eq!(slot.off, NIL);
            }
            let back = read_value(&arena, value.kind(), slot).unwrap();
            assert_eq!(back, value);
            destroy_value(&arena, slot).unwrap();
        }
    }

    #[test]
    fn test_write_in_place_fixed_width() {
        let mut region = TestRegion::new(64 * 1024);
        let arena = region.arena();

        let mut slot = construct_value(&arena, &ItemValue::Double(1.0)).unwrap();
        let original = slot;
        write_value(&arena, &mut slot, &ItemValue::Double(2.5)).unwrap();
        assert_eq!(slot, original);
        assert_eq!(
            read_value(&arena, ItemKind::Double, slot).unwrap(),
            ItemValue::Double(2.5)
        );
    }

    #[test]
    fn test_write_text_reuses_buffer_when_it_fits() {
        let mut region = TestRegion::new(64 * 1024);
        let arena = region.arena();

        let mut slot = construct_value(&arena, &ItemValue::Text("abcdefgh".into())).unwrap();
        let off = slot.off;
        write_value(&arena, &mut slot, &ItemValue::Text("xy".into())).unwrap();
        assert_eq!(slot.off, off);
        assert_eq!(
            read_value(&arena, ItemKind::Text, slot).unwrap(),
            ItemValue::Text("xy".to_string())
        );
    }

    #[test]
    fn test_write_text_grows_past_capacity() {
        let mut region = TestRegion::new(64 * 1024);
        let arena = region.arena();

        let mut slot = construct_value(&arena, &ItemValue::Text("short".into())).unwrap();
        let grown = "x".repeat(4096);
        write_value(&arena, &mut slot, &ItemValue::Text(grown.clone())).unwrap();
        assert_eq!(
            read_value(&arena, ItemKind::Text, slot).unwrap(),
            ItemValue::Text(grown)
        );
        destroy_value(&arena, slot).unwrap();
    }

    #[test]
    fn test_corrupt_payload_fails_read() {
        let mut region = TestRegion::new(64 * 1024);
        let arena = region.arena();

        let bogus = ValueSlot { off: 1 << 40, len: 1, cap: 8 };
        assert!(read_value(&arena, ItemKind::Bool, bogus).is_err());
        assert!(matches!(
            read_value(&arena, ItemKind::Null, ValueSlot { off: 64, len: 0, cap: 0 }),
            Err(ItemOpError::Corrupt)
        ));
    }

    #[test]
    fn test_rewrite_string_lifecycle() {
        let mut region = TestRegion::new(64 * 1024);
        let arena = region.arena();

        let (mut off, mut len, mut cap) = (NIL, 0u64, 0u64);

        rewrite_string(&arena, &mut off, &mut len, &mut cap, "").unwrap();
        assert_eq!(off, NIL);
        assert_eq!(read_string(&arena, off, len).unwrap(), "");

        rewrite_string(&arena, &mut off, &mut len, &mut cap, "tag-a").unwrap();
        assert_ne!(off, NIL);
        assert_eq!(read_string(&arena, off, len).unwrap(), "tag-a");

        let stable = off;
        rewrite_string(&arena, &mut off, &mut len, &mut cap, "tag").unwrap();
        assert_eq!(off, stable);
        assert_eq!(read_string(&arena, off, len).unwrap(), "tag");

        rewrite_string(&arena, &mut off, &mut len, &mut cap, "").unwrap();
        assert_eq!(off, NIL);
        assert_eq!(cap, 0);
    }

    #[test]
    fn test_item_constructors() {
        let item = Item::new(true, "flag");
        assert_eq!(item.kind(), ItemKind::Bool);
        assert_eq!(item.tag, "flag");

        let item: Item = 3.5f64.into();
        assert_eq!(item.kind(), ItemKind::Double);
        assert_eq!(item.tag, "");

        let item: Item = "text".into();
        assert_eq!(item.kind(), ItemKind::Text);

        let item = Item::untagged(ItemValue::Null);
        assert!(item.value.is_null());
    }
}
