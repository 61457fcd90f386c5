//! ABI Codec (C1).
//!
//! Hand-rolled offset-arithmetic decoding of the subset of Solidity ABI
//! encoding the PDP handlers need: `uint256`, `address` (from a 32-byte log
//! topic), dynamic `bytes`, dynamic arrays of static or dynamic tuples, and
//! 4-byte-selector-prefixed function calldata. Never panics: every bounds
//! check returns a typed `CodecError` instead.

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};
use std::fmt;

pub const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErrorKind {
    TooShort,
    BadOffset,
    BadLength,
    Overflow,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub kind: CodecErrorKind,
    pub position: usize,
}

impl CodecError {
    pub fn new(kind: CodecErrorKind, position: usize) -> Self {
        Self { kind, position }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at byte offset {}", self.kind, self.position)
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = Result<T, CodecError>;

/// A 20-byte EVM address, stored lowercase-hex-normalized by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> CodecResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CodecError::new(CodecErrorKind::BadLength, 0))?;
        if bytes.len() != 20 {
            return Err(CodecError::new(CodecErrorKind::BadLength, 0));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A 32-byte hash: event topic0, tx hash, block hash, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> CodecResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CodecError::new(CodecErrorKind::BadLength, 0))?;
        if bytes.len() != 32 {
            return Err(CodecError::new(CodecErrorKind::BadLength, 0));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Bytes32(out))
    }
}

/// keccak256 over arbitrary bytes (C1, C2).
pub fn keccak256(data: &[u8]) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Bytes32(out)
}

/// Reads 32 bytes big-endian starting at `offset`. Fails if
/// `offset + 32 > data.len()`.
pub fn decode_uint256(data: &[u8], offset: usize) -> CodecResult<BigUint> {
    let end = offset
        .checked_add(WORD)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, offset))?;
    if end > data.len() {
        return Err(CodecError::new(CodecErrorKind::TooShort, offset));
    }
    Ok(BigUint::from_bytes_be(&data[offset..end]))
}

/// Saturating conversion from a decoded `uint256` to a narrower width,
/// flagging rather than wrapping (spec §4.1, §4.7 numeric semantics).
pub fn saturate_u64(value: &BigUint) -> (u64, bool) {
    let max = BigUint::from(u64::MAX);
    if *value > max {
        (u64::MAX, true)
    } else {
        let bytes = value.to_bytes_be();
        let mut buf = [0u8; 8];
        let start = 8usize.saturating_sub(bytes.len());
        buf[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(8 - start)..]);
        (u64::from_be_bytes(buf), false)
    }
}

/// Reads a 32-byte word at `offset` as a signed two's-complement `int32`
/// (the word is sign-extended per ABI encoding, so the low 4 bytes alone
/// carry the value).
pub fn decode_int32(data: &[u8], offset: usize) -> CodecResult<i32> {
    let end = offset
        .checked_add(WORD)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, offset))?;
    if end > data.len() {
        return Err(CodecError::new(CodecErrorKind::TooShort, offset));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[end - 4..end]);
    Ok(i32::from_be_bytes(buf))
}

/// Takes a 32-byte log topic and returns its low 20 bytes as an address.
pub fn decode_address_from_topic(topic: &[u8; 32]) -> Address {
    let mut out = [0u8; 20];
    out.copy_from_slice(&topic[12..32]);
    Address(out)
}

/// Reads a dynamic `bytes` value whose head word at `offset` is an offset
/// (pointer) relative to `base`. The pointed-to location holds a length word
/// followed by the payload, right-padded to a word boundary per ABI
/// encoding (the padding is not validated, only skipped).
///
/// `base` is the start of the enclosing structure the pointer is relative
/// to: 0 for top-level function/event arguments, an element's own head
/// offset when decoding a dynamic field nested inside a tuple.
pub fn decode_bytes_dynamic_relative(data: &[u8], base: usize, offset: usize) -> CodecResult<Vec<u8>> {
    let ptr = decode_uint256(data, offset)?;
    let (ptr, overflowed) = saturate_u64(&ptr);
    if overflowed {
        return Err(CodecError::new(CodecErrorKind::Overflow, offset));
    }
    let ptr = base
        .checked_add(ptr as usize)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, offset))?;
    let len_word = decode_uint256(data, ptr)?;
    let (len, overflowed) = saturate_u64(&len_word);
    if overflowed {
        return Err(CodecError::new(CodecErrorKind::Overflow, ptr));
    }
    let len = len as usize;
    let payload_start = ptr
        .checked_add(WORD)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, ptr))?;
    let payload_end = payload_start
        .checked_add(len)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, payload_start))?;
    if payload_end > data.len() {
        return Err(CodecError::new(CodecErrorKind::BadOffset, payload_start));
    }
    Ok(data[payload_start..payload_end].to_vec())
}

/// Top-level form of [`decode_bytes_dynamic_relative`] where the pointer is
/// relative to the start of `data` itself (`base = 0`) — the common case for
/// a `bytes` argument at the top level of a function call or event.
pub fn decode_bytes_dynamic(data: &[u8], offset: usize) -> CodecResult<Vec<u8>> {
    decode_bytes_dynamic_relative(data, 0, offset)
}

/// Decodes an ABI `T[]` whose head word at `offset` is an offset (pointer)
/// relative to `base` (0 for a top-level argument, an enclosing tuple's own
/// start when the array is a dynamic field nested inside a tuple) pointing
/// at the array region: a length word followed by `len` elements.
/// `elem_decoder` decodes one element given the data slice and the absolute
/// byte offset of that element's head word. Dynamic-tuple elements are
/// themselves offset-pointers relative to the start of the array region
/// (right after the length word), matching standard ABI tuple-array
/// encoding; static tuples are read in place. The caller's `elem_decoder` is
/// responsible for telling the two apart (it receives the already-resolved
/// absolute element offset).
pub fn decode_tuple_array<T>(
    data: &[u8],
    base: usize,
    offset: usize,
    elem_size_words: usize,
    is_dynamic: bool,
    mut elem_decoder: impl FnMut(&[u8], usize) -> CodecResult<T>,
) -> CodecResult<Vec<T>> {
    let ptr_word = decode_uint256(data, offset)?;
    let (ptr, overflowed) = saturate_u64(&ptr_word);
    if overflowed {
        return Err(CodecError::new(CodecErrorKind::Overflow, offset));
    }
    let ptr = base
        .checked_add(ptr as usize)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, offset))?;
    let len_word = decode_uint256(data, ptr)?;
    let (len, overflowed) = saturate_u64(&len_word);
    if overflowed {
        return Err(CodecError::new(CodecErrorKind::Overflow, ptr));
    }
    let len = len as usize;
    let array_region = ptr
        .checked_add(WORD)
        .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, ptr))?;

    // Dynamic elements are addressed through a head array of one offset
    // word per element, regardless of the pointed-to element's size.
    // Static tuple elements have no indirection: they sit back-to-back in
    // the array region, so the per-element stride is the tuple's own width.
    let stride_words = if is_dynamic { 1 } else { elem_size_words.max(1) };

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let head_offset = array_region
            .checked_add(i.checked_mul(stride_words * WORD).ok_or_else(|| {
                CodecError::new(CodecErrorKind::Overflow, array_region)
            })?)
            .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, array_region))?;
        if head_offset + WORD > data.len() {
            return Err(CodecError::new(CodecErrorKind::TooShort, head_offset));
        }
        if is_dynamic {
            let rel_ptr = decode_uint256(data, head_offset)?;
            let (rel_ptr, overflowed) = saturate_u64(&rel_ptr);
            if overflowed {
                return Err(CodecError::new(CodecErrorKind::Overflow, head_offset));
            }
            let elem_offset = array_region
                .checked_add(rel_ptr as usize)
                .ok_or_else(|| CodecError::new(CodecErrorKind::Overflow, array_region))?;
            out.push(elem_decoder(data, elem_offset)?);
        } else {
            out.push(elem_decoder(data, head_offset)?);
        }
    }
    Ok(out)
}

/// Decoded arguments for a recognized function call. Handlers downcast via
/// the `DecodedArgs` variant matching the call they expect; an unexpected
/// variant is a programmer error (dispatch already routed by signature), not
/// a runtime one.
#[derive(Debug, Clone)]
pub enum DecodedArgs {
    CreateProofSet {
        listener: Address,
    },
    AddRoots {
        set_id: BigUint,
        root_data: Vec<RootData>,
        extra_data: Vec<u8>,
    },
    ProvePossession {
        set_id: BigUint,
        proofs: Vec<MerkleProofEntry>,
    },
}

#[derive(Debug, Clone)]
pub struct RootData {
    pub cid: Vec<u8>,
    pub raw_size: BigUint,
}

#[derive(Debug, Clone)]
pub struct MerkleProofEntry {
    pub leaf: Bytes32,
    pub proof: Vec<Bytes32>,
}

/// Big-endian length-prefix framing for a persisted Merkle path: `u32 count
/// || for each element { u32 len || bytes len }` (spec §6).
pub fn encode_merkle_proof(proof: &[Bytes32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + proof.len() * (4 + WORD));
    out.extend_from_slice(&(proof.len() as u32).to_be_bytes());
    for entry in proof {
        out.extend_from_slice(&(WORD as u32).to_be_bytes());
        out.extend_from_slice(&entry.0);
    }
    out
}

/// Strips the 4-byte selector and dispatches to the typed decoder for that
/// function signature. `signature` is the canonical `name(type,type,...)`
/// form produced by the signature registry (C2); only the signatures the
/// handler catalog needs are recognized here.
pub fn decode_method_call(data: &[u8], signature: &str) -> CodecResult<DecodedArgs> {
    if data.len() < 4 {
        return Err(CodecError::new(CodecErrorKind::TooShort, 0));
    }
    let body = &data[4..];
    match signature {
        "createProofSet(address)" => {
            let word = decode_uint256(body, 0)?;
            let bytes = word.to_bytes_be();
            let mut padded = [0u8; 32];
            let start = 32usize.saturating_sub(bytes.len());
            padded[start..].copy_from_slice(&bytes);
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&padded[12..32]);
            Ok(DecodedArgs::CreateProofSet {
                listener: Address(addr),
            })
        }
        "addRoots(uint256,(bytes,uint256)[],bytes)" => decode_add_roots(body),
        "provePossession(uint256,(bytes32,bytes32[])[])" => decode_prove_possession(body),
        _ => Err(CodecError::new(CodecErrorKind::Mismatch, 0)),
    }
}

fn decode_add_roots(body: &[u8]) -> CodecResult<DecodedArgs> {
    // Standard ABI layout (spec §9 Open Question, resolved): word 0 is
    // setId, word 1 is a pointer to the dynamic root-data array, word 2 is
    // a pointer to `extraData`.
    let set_id = decode_uint256(body, 0)?;

    let root_data = decode_tuple_array(body, 0, WORD, 2, true, |data, elem_offset| {
        let cid = decode_bytes_dynamic_relative(data, elem_offset, elem_offset)?;
        let raw_size = decode_uint256(data, elem_offset + WORD)?;
        Ok(RootData { cid, raw_size })
    })?;

    let extra_data = decode_bytes_dynamic(body, 2 * WORD)?;

    Ok(DecodedArgs::AddRoots {
        set_id,
        root_data,
        extra_data,
    })
}

fn decode_prove_possession(body: &[u8]) -> CodecResult<DecodedArgs> {
    let set_id = decode_uint256(body, 0)?;

    let proofs = decode_tuple_array(body, 0, WORD, 2, true, |data, elem_offset| {
        if elem_offset + WORD > data.len() {
            return Err(CodecError::new(CodecErrorKind::TooShort, elem_offset));
        }
        let leaf = Bytes32(data[elem_offset..elem_offset + WORD].try_into().unwrap());
        let proof = decode_tuple_array(data, elem_offset, elem_offset + WORD, 1, false, |data, offset| {
            if offset + WORD > data.len() {
                return Err(CodecError::new(CodecErrorKind::TooShort, offset));
            }
            Ok(Bytes32(data[offset..offset + WORD].try_into().unwrap()))
        })?;
        Ok(MerkleProofEntry { leaf, proof })
    })?;

    Ok(DecodedArgs::ProvePossession { set_id, proofs })
}
