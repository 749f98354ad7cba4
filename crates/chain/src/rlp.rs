//! Just enough RLP to hash a header. Decoding is never needed here: headers
//! reach the verifier already parsed.

use alloy_primitives::U256;

/// Builds one RLP list item by item.
#[derive(Debug, Default)]
pub struct ListEncoder {
    payload: Vec<u8>,
}

impl ListEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte string.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        encode_bytes_into(&mut self.payload, data);
        self
    }

    /// Append an unsigned integer in its minimal big-endian form.
    pub fn uint(&mut self, value: u64) -> &mut Self {
        self.bytes(strip_zeros(&value.to_be_bytes()))
    }

    pub fn u256(&mut self, value: &U256) -> &mut Self {
        self.bytes(strip_zeros(&value.to_be_bytes::<32>()))
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 9);
        push_prefix(&mut out, self.payload.len(), 0xc0);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Encode a single byte string.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 9);
    encode_bytes_into(&mut out, data);
    out
}

fn encode_bytes_into(out: &mut Vec<u8>, data: &[u8]) {
    if let [byte] = data {
        if *byte < 0x80 {
            out.push(*byte);
            return;
        }
    }
    push_prefix(out, data.len(), 0x80);
    out.extend_from_slice(data);
}

fn push_prefix(out: &mut Vec<u8>, len: usize, offset: u8) {
    if len < 56 {
        out.push(offset + len as u8);
        return;
    }
    let len_bytes = (len as u64).to_be_bytes();
    let len_bytes = strip_zeros(&len_bytes);
    out.push(offset + 55 + len_bytes.len() as u8);
    out.extend_from_slice(len_bytes);
}

fn strip_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
