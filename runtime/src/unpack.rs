// unpack.rs — Binary pack/unpack of integers and addresses
//
// The unpack primitives consume from the front of a byte slice and return
// the decoded value together with the unconsumed suffix, which is how the
// generated parse code threads a stream position through a field list.
//
// Law: `unpack(pack(x, order), order) == (x, empty)` for every order.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::RuntimeError;

// ── Byte order ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
    /// Alias for `Big` (network byte order).
    Network,
    /// The host's native order.
    Host,
}

impl ByteOrder {
    fn is_big(self) -> bool {
        match self {
            ByteOrder::Big | ByteOrder::Network => true,
            ByteOrder::Little => false,
            ByteOrder::Host => cfg!(target_endian = "big"),
        }
    }
}

// ── Integers ─────────────────────────────────────────────────────────────

/// Encode the low `width` bytes of `value` in the given order.
/// `width` must be between 1 and 8.
pub fn pack_uint(value: u64, width: usize, order: ByteOrder) -> Vec<u8> {
    debug_assert!((1..=8).contains(&width));
    let be = value.to_be_bytes();
    let mut out = be[8 - width..].to_vec();
    if !order.is_big() {
        out.reverse();
    }
    out
}

/// Decode a `width`-byte unsigned integer from the front of `data`.
/// Returns the value and the unconsumed suffix.
pub fn unpack_uint(data: &[u8], width: usize, order: ByteOrder) -> Result<(u64, &[u8]), RuntimeError> {
    debug_assert!((1..=8).contains(&width));
    if data.len() < width {
        return Err(RuntimeError::IndexOutOfRange {
            index: width as u64,
            size: data.len() as u64,
        });
    }
    let (head, rest) = data.split_at(width);
    let mut bytes = head.to_vec();
    if !order.is_big() {
        bytes.reverse();
    }
    let mut value = 0u64;
    for b in bytes {
        value = (value << 8) | u64::from(b);
    }
    Ok((value, rest))
}

pub fn pack_sint(value: i64, width: usize, order: ByteOrder) -> Vec<u8> {
    pack_uint(value as u64, width, order)
}

/// Decode a signed integer, sign-extending from `width` bytes.
pub fn unpack_sint(data: &[u8], width: usize, order: ByteOrder) -> Result<(i64, &[u8]), RuntimeError> {
    let (raw, rest) = unpack_uint(data, width, order)?;
    let shift = 64 - width * 8;
    Ok((((raw << shift) as i64) >> shift, rest))
}

// ── Addresses ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::V4(a) => write!(f, "{a}"),
            Address::V6(a) => write!(f, "{a}"),
        }
    }
}

/// Decode an address of the given family from the front of `data`.
pub fn unpack_address(
    data: &[u8],
    family: AddressFamily,
    order: ByteOrder,
) -> Result<(Address, &[u8]), RuntimeError> {
    match family {
        AddressFamily::IPv4 => {
            let (raw, rest) = unpack_uint(data, 4, order)?;
            Ok((Address::V4(Ipv4Addr::from(raw as u32)), rest))
        }
        AddressFamily::IPv6 => {
            if data.len() < 16 {
                return Err(RuntimeError::IndexOutOfRange {
                    index: 16,
                    size: data.len() as u64,
                });
            }
            let (head, rest) = data.split_at(16);
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(head);
            if !order.is_big() {
                bytes.reverse();
            }
            Ok((Address::V6(Ipv6Addr::from(bytes)), rest))
        }
    }
}

pub fn pack_address(addr: Address, order: ByteOrder) -> Vec<u8> {
    match addr {
        Address::V4(a) => pack_uint(u64::from(u32::from(a)), 4, order),
        Address::V6(a) => {
            let mut bytes = a.octets().to_vec();
            if !order.is_big() {
                bytes.reverse();
            }
            bytes
        }
    }
}

// ── Strings ──────────────────────────────────────────────────────────────

/// Decode UTF-8, rejecting invalid sequences.
pub fn decode_utf8(data: &[u8]) -> Result<String, RuntimeError> {
    String::from_utf8(data.to_vec()).map_err(|_| RuntimeError::DecodeError { encoding: "utf-8" })
}

pub fn encode_utf8(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}
