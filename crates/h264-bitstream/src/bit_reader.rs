//! Minimal RBSP reader for checking what the writer produced.

pub struct BitReader {
    data: Vec<u8>,
    pos: usize,
}

impl BitReader {
    pub fn new(data: &[u8]) -> Self {
        BitReader {
            data: data.to_vec(),
            pos: 0,
        }
    }

    /// Reader over a NAL unit payload with emulation prevention bytes removed.
    pub fn from_nal_payload(payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(payload.len());
        let mut zeros = 0;
        for &b in payload {
            if zeros >= 2 && b == 0x03 {
                zeros = 0;
                continue;
            }
            zeros = if b == 0 { zeros + 1 } else { 0 };
            data.push(b);
        }
        BitReader { data, pos: 0 }
    }

    pub fn read_bit(&mut self) -> bool {
        let byte = self.data[self.pos / 8];
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        bit != 0
    }

    pub fn read_bits(&mut self, n: u32) -> u64 {
        (0..n).fold(0, |acc, _| (acc << 1) | u64::from(self.read_bit()))
    }

    pub fn read_ue(&mut self) -> u32 {
        let mut leading_zeros = 0;
        while !self.read_bit() {
            leading_zeros += 1;
        }
        let suffix = self.read_bits(leading_zeros);
        ((1u64 << leading_zeros) - 1 + suffix) as u32
    }

    pub fn read_se(&mut self) -> i32 {
        let k = i64::from(self.read_ue());
        if k % 2 == 1 {
            ((k + 1) / 2) as i32
        } else {
            (-(k / 2)) as i32
        }
    }

    /// Bits left before the end of the data.
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Consume the RBSP trailing bits and check nothing else follows.
    pub fn expect_trailing_bits(&mut self) {
        assert!(self.read_bit(), "missing rbsp_stop_one_bit");
        while self.pos % 8 != 0 {
            assert!(!self.read_bit(), "non-zero alignment bit");
        }
        assert_eq!(self.remaining(), 0, "data after rbsp trailing bits");
    }
}

/// Split an Annex B stream on four-byte start codes.
pub fn split_nal_units(stream: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 4 <= stream.len() {
        if stream[i..i + 4] == crate::START_CODE {
            starts.push(i + 4);
            i += 4;
        } else {
            i += 1;
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).map_or(stream.len(), |&next| next - 4);
            &stream[start..end]
        })
        .collect()
}
