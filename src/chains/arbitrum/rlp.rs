//! Recursive Length Prefix encoding.
//!
//! Only canonical forms are produced. The decoder is strict and rejects every
//! alternative encoding, so it doubles as a canonicality check in tests.

use thiserror::Error;

use crate::core::errors::TradeError;

const STRING_SHORT: u8 = 0x80;
const STRING_LONG: u8 = 0xb7;
const LIST_SHORT: u8 = 0xc0;
const LIST_LONG: u8 = 0xf7;

fn minimal_be(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn encode_length(len: usize, short_base: u8, long_base: u8, out: &mut Vec<u8>) {
    if len <= 55 {
        out.push(short_base + len as u8);
    } else {
        let len_bytes = (len as u64).to_be_bytes();
        let len_be = minimal_be(&len_bytes);
        out.push(long_base + len_be.len() as u8);
        out.extend_from_slice(len_be);
    }
}

/// Encode a byte string.
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < STRING_SHORT {
        return vec![bytes[0]];
    }
    let mut out = Vec::with_capacity(bytes.len() + 9);
    encode_length(bytes.len(), STRING_SHORT, STRING_LONG, &mut out);
    out.extend_from_slice(bytes);
    out
}

/// Encode an unsigned integer as its minimal big-endian byte string.
pub fn encode_uint(value: u128) -> Vec<u8> {
    encode_bytes(minimal_be(&value.to_be_bytes()))
}

/// Encode a big-endian integer of arbitrary width, stripping leading zeros.
pub fn encode_uint_be(bytes: &[u8]) -> Vec<u8> {
    encode_bytes(minimal_be(bytes))
}

/// Wrap already-encoded items into a list.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(payload_len + 9);
    encode_length(payload_len, LIST_SHORT, LIST_LONG, &mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RlpError {
    #[error("input truncated")]
    Truncated,

    #[error("non-canonical encoding: {0}")]
    NonCanonical(&'static str),

    #[error("{0} trailing bytes after item")]
    TrailingBytes(usize),

    #[error("expected {0}")]
    UnexpectedShape(&'static str),
}

impl From<RlpError> for TradeError {
    fn from(e: RlpError) -> Self {
        Self::ProtocolError(format!("rlp: {}", e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn as_bytes(&self) -> Result<&[u8], RlpError> {
        match self {
            Self::Bytes(b) => Ok(b),
            Self::List(_) => Err(RlpError::UnexpectedShape("byte string")),
        }
    }

    pub fn as_list(&self) -> Result<&[Self], RlpError> {
        match self {
            Self::List(items) => Ok(items),
            Self::Bytes(_) => Err(RlpError::UnexpectedShape("list")),
        }
    }

    /// Interpret as an integer; rejects leading zero bytes and values over 128 bits.
    pub fn as_uint(&self) -> Result<u128, RlpError> {
        let bytes = self.as_bytes()?;
        if bytes.first() == Some(&0) {
            return Err(RlpError::NonCanonical("integer with leading zero"));
        }
        if bytes.len() > 16 {
            return Err(RlpError::UnexpectedShape("integer of at most 128 bits"));
        }
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b)))
    }
}

/// Decode exactly one item spanning the whole input.
pub fn decode(input: &[u8]) -> Result<RlpItem, RlpError> {
    let (item, used) = decode_item(input)?;
    if used != input.len() {
        return Err(RlpError::TrailingBytes(input.len() - used));
    }
    Ok(item)
}

fn read_long_length(input: &[u8], len_of_len: usize) -> Result<usize, RlpError> {
    let bytes = input.get(1..1 + len_of_len).ok_or(RlpError::Truncated)?;
    if bytes[0] == 0 {
        return Err(RlpError::NonCanonical("length with leading zero"));
    }
    if len_of_len > 8 {
        return Err(RlpError::NonCanonical("length wider than 64 bits"));
    }
    let len = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    if len <= 55 {
        return Err(RlpError::NonCanonical("long form for short payload"));
    }
    usize::try_from(len).map_err(|_| RlpError::Truncated)
}

fn payload<'a>(input: &'a [u8], start: usize, len: usize) -> Result<&'a [u8], RlpError> {
    let end = start.checked_add(len).ok_or(RlpError::Truncated)?;
    input.get(start..end).ok_or(RlpError::Truncated)
}

fn decode_item(input: &[u8]) -> Result<(RlpItem, usize), RlpError> {
    let prefix = *input.first().ok_or(RlpError::Truncated)?;
    match prefix {
        0x00..=0x7f => Ok((RlpItem::Bytes(vec![prefix]), 1)),
        0x80..=0xb7 => {
            let len = usize::from(prefix - STRING_SHORT);
            let body = payload(input, 1, len)?;
            if len == 1 && body[0] < STRING_SHORT {
                return Err(RlpError::NonCanonical("single byte below 0x80 wrapped"));
            }
            Ok((RlpItem::Bytes(body.to_vec()), 1 + len))
        }
        0xb8..=0xbf => {
            let len_of_len = usize::from(prefix - STRING_LONG);
            let len = read_long_length(input, len_of_len)?;
            let body = payload(input, 1 + len_of_len, len)?;
            Ok((RlpItem::Bytes(body.to_vec()), 1 + len_of_len + len))
        }
        0xc0..=0xf7 => {
            let len = usize::from(prefix - LIST_SHORT);
            let body = payload(input, 1, len)?;
            Ok((RlpItem::List(decode_items(body)?), 1 + len))
        }
        0xf8..=0xff => {
            let len_of_len = usize::from(prefix - LIST_LONG);
            let len = read_long_length(input, len_of_len)?;
            let body = payload(input, 1 + len_of_len, len)?;
            Ok((RlpItem::List(decode_items(body)?), 1 + len_of_len + len))
        }
    }
}

fn decode_items(mut body: &[u8]) -> Result<Vec<RlpItem>, RlpError> {
    let mut items = Vec::new();
    while !body.is_empty() {
        let (item, used) = decode_item(body)?;
        items.push(item);
        body = &body[used..];
    }
    Ok(items)
}
