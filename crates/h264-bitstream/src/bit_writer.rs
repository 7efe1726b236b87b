use bytes::{BufMut, Bytes, BytesMut};

use crate::nalu::{NaluType, START_CODE};

type Reg = u64;

const REG_BITS: u32 = Reg::BITS;
const EMULATION_PREVENTION_BYTE: u8 = 0x03;
const INITIAL_CAPACITY: usize = 4096;

/// MSB-first bit accumulator producing H.264 Annex B byte streams.
///
/// Bits are staged in a 64-bit register and moved to the byte buffer a whole
/// register at a time, or on an explicit [`flush`](Self::flush). While a NAL
/// unit is open, bytes leaving the register go through emulation prevention
/// (H.264 7.4.1): a `0x03` is stuffed whenever two zero bytes would be followed
/// by a byte in `0x00..=0x03`.
///
/// Only bytes that have left the register are readable; [`data`](Self::data)
/// and [`bytes_in_buffer`](Self::bytes_in_buffer) panic while bits are pending.
pub struct BitWriter {
    insert_emulation_prevention: bool,
    in_nal_unit: bool,
    reg: Reg,
    bits_left_in_reg: u32,
    data: BytesMut,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::with_emulation_prevention(true)
    }

    pub fn with_emulation_prevention(enabled: bool) -> Self {
        BitWriter {
            insert_emulation_prevention: enabled,
            in_nal_unit: false,
            reg: 0,
            bits_left_in_reg: REG_BITS,
            data: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append the low `num_bits` bits of `val`, most significant first.
    pub fn append_bits(&mut self, num_bits: u32, val: u64) {
        assert!(num_bits <= REG_BITS, "cannot append {num_bits} bits at once");

        let mut num_bits = num_bits;
        while num_bits > 0 {
            if self.bits_left_in_reg == 0 {
                self.flush_reg();
            }

            let bits_to_write = num_bits.min(self.bits_left_in_reg);
            let val_to_write = val >> (num_bits - bits_to_write);
            if bits_to_write < REG_BITS {
                self.reg <<= bits_to_write;
                self.reg |= val_to_write & ((1 << bits_to_write) - 1);
            } else {
                self.reg = val_to_write;
            }
            num_bits -= bits_to_write;
            self.bits_left_in_reg -= bits_to_write;
        }
    }

    pub fn append_bool(&mut self, val: bool) {
        if self.bits_left_in_reg == 0 {
            self.flush_reg();
        }
        self.reg = (self.reg << 1) | u64::from(val);
        self.bits_left_in_reg -= 1;
    }

    /// Unsigned Exp-Golomb, `ue(v)`.
    pub fn append_ue(&mut self, val: u32) {
        let code = u64::from(val) + 1;
        let leading_zeros = u64::BITS - 1 - code.leading_zeros();
        self.append_bits(leading_zeros, 0);
        self.append_bits(leading_zeros + 1, code);
    }

    /// Signed Exp-Golomb, `se(v)`.
    pub fn append_se(&mut self, val: i32) {
        assert_ne!(val, i32::MIN, "se(v) value out of range");
        let mapped = if val > 0 {
            (i64::from(val) * 2 - 1) as u32
        } else {
            (-i64::from(val) * 2) as u32
        };
        self.append_ue(mapped);
    }

    /// Append whole bytes. Outside a NAL unit and on a byte boundary the bytes
    /// are copied verbatim without going through the register.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        let byte_aligned = (REG_BITS - self.bits_left_in_reg) % 8 == 0;
        if !self.in_nal_unit && byte_aligned {
            self.flush();
            self.data.put_slice(bytes);
            return;
        }
        for &b in bytes {
            self.append_bits(8, u64::from(b));
        }
    }

    /// Write a start code and the one-byte NAL header (H.264 7.3.1).
    pub fn begin_nal_unit(&mut self, nalu_type: NaluType, nal_ref_idc: u8) {
        assert!(!self.in_nal_unit, "NAL unit already open");
        assert_ne!(nalu_type, NaluType::Unspecified, "unspecified NAL unit type");
        assert!(
            nalu_type as u8 <= NaluType::EndOfStream as u8,
            "NAL unit type {nalu_type:?} cannot be written"
        );
        assert!(nal_ref_idc <= 3, "nal_ref_idc {nal_ref_idc} out of range");

        self.flush();
        self.append_bits(32, u64::from(u32::from_be_bytes(START_CODE)));
        self.flush();
        self.in_nal_unit = true;

        self.append_bits(1, 0); // forbidden_zero_bit
        self.append_bits(2, u64::from(nal_ref_idc));
        self.append_bits(5, nalu_type as u64);
    }

    /// Close the RBSP with the stop bit and byte-alignment zero bits.
    pub fn finish_nal_unit(&mut self) {
        assert!(self.in_nal_unit, "no NAL unit open");

        self.append_bits(1, 1);
        self.append_bits(self.bits_left_in_reg % 8, 0);
        self.flush();
        self.in_nal_unit = false;
    }

    pub fn in_nal_unit(&self) -> bool {
        self.in_nal_unit
    }

    /// Move any pending bits to the byte buffer, zero-padding the last byte.
    pub fn flush(&mut self) {
        if self.bits_left_in_reg != REG_BITS {
            self.flush_reg();
        }
    }

    pub fn bytes_in_buffer(&self) -> usize {
        self.assert_flushed();
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        self.assert_flushed();
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.assert_flushed();
        self.data.freeze()
    }

    fn assert_flushed(&self) {
        assert_eq!(
            self.bits_left_in_reg, REG_BITS,
            "bit writer has unflushed bits"
        );
    }

    fn flush_reg(&mut self) {
        let bits_in_reg = REG_BITS - self.bits_left_in_reg;
        if bits_in_reg == 0 {
            return;
        }

        let bytes_in_reg = bits_in_reg.div_ceil(8) as usize;
        self.reg <<= REG_BITS - bits_in_reg;
        let reg_be = self.reg.to_be_bytes();

        if self.insert_emulation_prevention && self.in_nal_unit {
            assert_eq!(bits_in_reg % 8, 0, "partial byte flushed inside a NAL unit");
            for &byte in &reg_be[..bytes_in_reg] {
                let len = self.data.len();
                if len >= 2
                    && self.data[len - 2] == 0
                    && self.data[len - 1] == 0
                    && byte <= EMULATION_PREVENTION_BYTE
                {
                    self.data.put_u8(EMULATION_PREVENTION_BYTE);
                }
                self.data.put_u8(byte);
            }
        } else {
            self.data.put_slice(&reg_be[..bytes_in_reg]);
        }

        self.reg = 0;
        self.bits_left_in_reg = REG_BITS;
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_reader::BitReader;

    #[test]
    fn test_append_bits_msb_first() {
        let mut w = BitWriter::new();
        w.append_bits(4, 0xA);
        w.append_bits(4, 0x5);
        w.append_bits(12, 0xFFF3C);
        w.flush();
        assert_eq!(w.data(), &[0xA5, 0xF3, 0xC0]);
    }

    #[test]
    fn test_full_width_append() {
        let mut w = BitWriter::new();
        w.append_bits(64, 0x0123_4567_89AB_CDEF);
        w.append_bool(true);
        w.flush();
        assert_eq!(
            w.data(),
            &[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x80]
        );
    }

    #[test]
    fn test_register_spill_across_word() {
        let mut w = BitWriter::new();
        w.append_bits(60, 0);
        w.append_bits(8, 0xFF);
        w.flush();
        assert_eq!(w.bytes_in_buffer(), 9);
        assert_eq!(&w.data()[7..], &[0x0F, 0xF0]);
    }

    #[test]
    fn test_ue_known_codes() {
        let mut w = BitWriter::new();
        w.append_ue(0); // 1
        w.append_ue(1); // 010
        w.append_ue(2); // 011
        w.append_ue(3); // 00100
        w.flush();
        // 1010 0110 0100 0000
        assert_eq!(w.data(), &[0xA6, 0x40]);
    }

    #[test]
    fn test_ue_round_trip_up_to_2_pow_20() {
        let mut w = BitWriter::new();
        for v in 0..(1u32 << 20) {
            w.append_ue(v);
        }
        w.flush();

        let mut r = BitReader::new(w.data());
        for v in 0..(1u32 << 20) {
            assert_eq!(r.read_ue(), v);
        }
    }

    #[test]
    fn test_ue_max_value() {
        let mut w = BitWriter::new();
        w.append_ue(u32::MAX);
        w.flush();
        let mut r = BitReader::new(w.data());
        assert_eq!(r.read_ue(), u32::MAX);
    }

    #[test]
    fn test_se_zig_zag() {
        let mut w = BitWriter::new();
        for v in [0, 1, -1, 2, -2, 26, -26, i32::MAX, i32::MIN + 1] {
            w.append_se(v);
        }
        w.flush();

        let mut r = BitReader::new(w.data());
        assert_eq!(r.read_ue(), 0);
        assert_eq!(r.read_ue(), 1);
        assert_eq!(r.read_ue(), 2);
        assert_eq!(r.read_ue(), 3);
        assert_eq!(r.read_ue(), 4);
        assert_eq!(r.read_ue(), 51);
        assert_eq!(r.read_ue(), 52);
        assert_eq!(r.read_ue(), u32::MAX - 2);
        assert_eq!(r.read_ue(), u32::MAX - 1);
    }

    #[test]
    fn test_emulation_prevention_inside_nal() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Sei, 0);
        w.append_bits(8, 0x00);
        w.append_bits(8, 0x00);
        w.append_bits(8, 0x00);
        w.finish_nal_unit();
        // start code, header 0x06, 00 00 03 00, stop bit byte 0x80
        assert_eq!(
            w.data(),
            &[0x00, 0x00, 0x00, 0x01, 0x06, 0x00, 0x00, 0x03, 0x00, 0x80]
        );
    }

    #[test]
    fn test_emulation_prevention_all_escaped_values() {
        for last in 0u8..=3 {
            let mut w = BitWriter::new();
            w.begin_nal_unit(NaluType::Sei, 0);
            w.append_bits(24, u64::from(last));
            w.finish_nal_unit();
            assert_eq!(&w.data()[5..9], &[0x00, 0x00, 0x03, last]);
        }

        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Sei, 0);
        w.append_bits(24, 0x04);
        w.finish_nal_unit();
        assert_eq!(&w.data()[5..8], &[0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_no_emulation_prevention_outside_nal() {
        let mut w = BitWriter::new();
        w.append_bits(32, 0x0000_0001);
        w.append_bytes(&[0x00, 0x00, 0x00, 0x02]);
        w.flush();
        assert_eq!(w.data(), &[0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_emulation_prevention_can_be_disabled() {
        let mut w = BitWriter::with_emulation_prevention(false);
        w.begin_nal_unit(NaluType::Sei, 0);
        w.append_bits(24, 0);
        w.finish_nal_unit();
        assert_eq!(&w.data()[5..], &[0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_nal_unit_framing() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Pps, 3);
        w.append_ue(0);
        w.append_bool(true);
        w.finish_nal_unit();

        let data = w.data();
        assert_eq!(&data[..4], &START_CODE);
        assert_eq!(data[4], 0x68); // 0 | 11 | 01000
        // 1 (ue 0), 1 (flag), 1 (stop), 00000
        assert_eq!(data[5], 0xE0);
        assert_eq!(data.len(), 6);
        assert!(!w.in_nal_unit());
    }

    #[test]
    fn test_stop_bit_on_byte_boundary() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Sei, 0);
        w.append_bits(8, 0xAB);
        w.finish_nal_unit();
        assert_eq!(&w.data()[4..], &[0x06, 0xAB, 0x80]);
    }

    #[test]
    fn test_begin_nal_flushes_pending_bits() {
        let mut w = BitWriter::new();
        w.append_bits(3, 0b101);
        w.begin_nal_unit(NaluType::Sei, 0);
        w.finish_nal_unit();
        assert_eq!(&w.data()[..5], &[0xA0, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    #[should_panic(expected = "NAL unit already open")]
    fn test_nested_nal_unit_panics() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Sps, 3);
        w.begin_nal_unit(NaluType::Pps, 3);
    }

    #[test]
    #[should_panic(expected = "nal_ref_idc")]
    fn test_bad_ref_idc_panics() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Sps, 4);
    }

    #[test]
    #[should_panic(expected = "NAL unit type Filler cannot be written")]
    fn test_filler_nal_unit_panics() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::Filler, 0);
    }

    #[test]
    fn test_end_of_stream_is_last_writable_type() {
        let mut w = BitWriter::new();
        w.begin_nal_unit(NaluType::EndOfStream, 0);
        w.finish_nal_unit();
        assert_eq!(&w.data()[4..], &[0x0B, 0x80]);
    }

    #[test]
    #[should_panic(expected = "unflushed bits")]
    fn test_data_with_pending_bits_panics() {
        let mut w = BitWriter::new();
        w.append_bool(true);
        let _ = w.data();
    }

    #[test]
    fn test_large_stream_grows_buffer() {
        let mut w = BitWriter::new();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8 | 0x10).collect();
        w.append_bits(32, 1);
        w.append_bytes(&payload);
        w.flush();
        assert_eq!(w.bytes_in_buffer(), 10_004);
        assert_eq!(&w.data()[4..], &payload[..]);
    }
}
