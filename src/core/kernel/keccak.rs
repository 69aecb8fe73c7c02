//! Keccak-256 as used by Ethereum.
//!
//! Sponge over Keccak-f[1600] with rate 136 bytes and capacity 512 bits. The
//! padding is the original Keccak `0x01 .. 0x80`, not the SHA3 `0x06` domain byte.

const RATE: usize = 136;
const ROUNDS: usize = 24;

const ROUND_CONSTANTS: [u64; ROUNDS] = [
    0x0000_0000_0000_0001,
    0x0000_0000_0000_8082,
    0x8000_0000_0000_808a,
    0x8000_0000_8000_8000,
    0x0000_0000_0000_808b,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8009,
    0x0000_0000_0000_008a,
    0x0000_0000_0000_0088,
    0x0000_0000_8000_8009,
    0x0000_0000_8000_000a,
    0x0000_0000_8000_808b,
    0x8000_0000_0000_008b,
    0x8000_0000_0000_8089,
    0x8000_0000_0000_8003,
    0x8000_0000_0000_8002,
    0x8000_0000_0000_0080,
    0x0000_0000_0000_800a,
    0x8000_0000_8000_000a,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8080,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8008,
];

const RHO_OFFSETS: [u32; 24] = [
    1, 3, 6, 10, 15, 21, 28, 36, 45, 55, 2, 14, 27, 41, 56, 8, 25, 43, 62, 18, 39, 61, 20, 44,
];

const PI_LANES: [usize; 24] = [
    10, 7, 11, 17, 18, 3, 5, 16, 8, 21, 24, 4, 15, 23, 19, 13, 12, 2, 20, 14, 22, 9, 6, 1,
];

/// The Keccak-f[1600] permutation over 25 little-endian 64-bit lanes.
pub fn keccak_f1600(state: &mut [u64; 25]) {
    let mut bc = [0u64; 5];
    for rc in ROUND_CONSTANTS {
        // theta
        for (i, c) in bc.iter_mut().enumerate() {
            *c = state[i] ^ state[i + 5] ^ state[i + 10] ^ state[i + 15] ^ state[i + 20];
        }
        for i in 0..5 {
            let t = bc[(i + 4) % 5] ^ bc[(i + 1) % 5].rotate_left(1);
            for j in (0..25).step_by(5) {
                state[j + i] ^= t;
            }
        }

        // rho + pi
        let mut carry = state[1];
        for (&lane, &rot) in PI_LANES.iter().zip(RHO_OFFSETS.iter()) {
            let next = state[lane];
            state[lane] = carry.rotate_left(rot);
            carry = next;
        }

        // chi
        for j in (0..25).step_by(5) {
            bc.copy_from_slice(&state[j..j + 5]);
            for i in 0..5 {
                state[j + i] = bc[i] ^ (!bc[(i + 1) % 5] & bc[(i + 2) % 5]);
            }
        }

        // iota
        state[0] ^= rc;
    }
}

/// Incremental Keccak-256 hasher.
///
/// Input that does not fill a whole rate block is buffered; `finalize` pads the
/// buffered tail and always runs one more permutation, so an input whose length
/// is an exact multiple of the rate still gets a full padding block.
#[derive(Clone)]
pub struct Keccak256 {
    state: [u64; 25],
    buf: [u8; RATE],
    buf_len: usize,
}

impl Default for Keccak256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Keccak256 {
    pub const fn new() -> Self {
        Self {
            state: [0u64; 25],
            buf: [0u8; RATE],
            buf_len: 0,
        }
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        let mut input = data.as_ref();

        if self.buf_len > 0 {
            let take = (RATE - self.buf_len).min(input.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&input[..take]);
            self.buf_len += take;
            input = &input[take..];
            if self.buf_len < RATE {
                return;
            }
            let block = self.buf;
            self.absorb_block(&block);
            self.buf_len = 0;
        }

        let mut blocks = input.chunks_exact(RATE);
        for block in &mut blocks {
            self.absorb_block(block);
        }
        let rest = blocks.remainder();
        self.buf[..rest.len()].copy_from_slice(rest);
        self.buf_len = rest.len();
    }

    pub fn finalize(mut self) -> [u8; 32] {
        let mut last = [0u8; RATE];
        last[..self.buf_len].copy_from_slice(&self.buf[..self.buf_len]);
        last[self.buf_len] = 0x01;
        last[RATE - 1] |= 0x80;
        self.absorb_block(&last);

        let mut out = [0u8; 32];
        for (chunk, lane) in out.chunks_exact_mut(8).zip(self.state.iter()) {
            chunk.copy_from_slice(&lane.to_le_bytes());
        }
        out
    }

    fn absorb_block(&mut self, block: &[u8]) {
        for (lane, word) in self.state.iter_mut().zip(block.chunks_exact(8)) {
            let mut le = [0u8; 8];
            le.copy_from_slice(word);
            *lane ^= u64::from_le_bytes(le);
        }
        keccak_f1600(&mut self.state);
    }
}

/// One-shot Keccak-256.
pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize()
}

/// Keccak-256 over several slices, as if they were concatenated.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
