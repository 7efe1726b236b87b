//! Decoding of the libva H.264 parameter buffers.
//!
//! Buffers arrive as raw bytes in the C layout of `VAPictureParameterBufferH264`
//! and `VASliceParameterBufferH264` (little-endian, GCC bitfield packing, LSB
//! first). Only the fields the header reconstructor and the decode session
//! consume are decoded; the remaining bytes are skipped.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ParamsError;
use crate::nalu::SliceType;

/// Size of one `VAPictureH264` entry.
const VA_PICTURE_SIZE: usize = 36;
const NUM_REFERENCE_FRAMES: usize = 16;
/// Bytes of `va_reserved` trailing the picture parameter fields.
const PICTURE_RESERVED_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VaPicture {
    pub picture_id: u32,
    pub frame_idx: u32,
    pub flags: u32,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
}

impl VaPicture {
    /// `VA_PICTURE_H264_INVALID`
    pub const INVALID_FLAG: u32 = 0x0000_0001;

    pub fn invalid() -> Self {
        VaPicture {
            picture_id: u32::MAX,
            flags: Self::INVALID_FLAG,
            ..Default::default()
        }
    }

    fn read(buf: &mut impl Buf) -> Self {
        let pic = VaPicture {
            picture_id: buf.get_u32_le(),
            frame_idx: buf.get_u32_le(),
            flags: buf.get_u32_le(),
            top_field_order_cnt: buf.get_i32_le(),
            bottom_field_order_cnt: buf.get_i32_le(),
        };
        buf.advance(VA_PICTURE_SIZE - 20);
        pic
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.picture_id);
        out.put_u32_le(self.frame_idx);
        out.put_u32_le(self.flags);
        out.put_i32_le(self.top_field_order_cnt);
        out.put_i32_le(self.bottom_field_order_cnt);
        out.put_bytes(0, VA_PICTURE_SIZE - 20);
    }
}

/// `seq_fields` bitfield of the picture parameter buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqFields {
    pub chroma_format_idc: u8,
    pub residual_colour_transform_flag: bool,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub min_luma_bi_pred_size8x8: bool,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: bool,
}

impl SeqFields {
    pub fn from_bits(v: u32) -> Self {
        SeqFields {
            chroma_format_idc: field(v, 0, 2),
            residual_colour_transform_flag: flag(v, 2),
            gaps_in_frame_num_value_allowed_flag: flag(v, 3),
            frame_mbs_only_flag: flag(v, 4),
            mb_adaptive_frame_field_flag: flag(v, 5),
            direct_8x8_inference_flag: flag(v, 6),
            min_luma_bi_pred_size8x8: flag(v, 7),
            log2_max_frame_num_minus4: field(v, 8, 4),
            pic_order_cnt_type: field(v, 12, 2),
            log2_max_pic_order_cnt_lsb_minus4: field(v, 14, 4),
            delta_pic_order_always_zero_flag: flag(v, 18),
        }
    }

    pub fn to_bits(&self) -> u32 {
        pack(u32::from(self.chroma_format_idc), 0, 2)
            | pack(self.residual_colour_transform_flag.into(), 2, 1)
            | pack(self.gaps_in_frame_num_value_allowed_flag.into(), 3, 1)
            | pack(self.frame_mbs_only_flag.into(), 4, 1)
            | pack(self.mb_adaptive_frame_field_flag.into(), 5, 1)
            | pack(self.direct_8x8_inference_flag.into(), 6, 1)
            | pack(self.min_luma_bi_pred_size8x8.into(), 7, 1)
            | pack(u32::from(self.log2_max_frame_num_minus4), 8, 4)
            | pack(u32::from(self.pic_order_cnt_type), 12, 2)
            | pack(u32::from(self.log2_max_pic_order_cnt_lsb_minus4), 14, 4)
            | pack(self.delta_pic_order_always_zero_flag.into(), 18, 1)
    }
}

/// `pic_fields` bitfield of the picture parameter buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PicFields {
    pub entropy_coding_mode_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub transform_8x8_mode_flag: bool,
    pub field_pic_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub pic_order_present_flag: bool,
    pub deblocking_filter_control_present_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
    pub reference_pic_flag: bool,
}

impl PicFields {
    pub fn from_bits(v: u32) -> Self {
        PicFields {
            entropy_coding_mode_flag: flag(v, 0),
            weighted_pred_flag: flag(v, 1),
            weighted_bipred_idc: field(v, 2, 2),
            transform_8x8_mode_flag: flag(v, 4),
            field_pic_flag: flag(v, 5),
            constrained_intra_pred_flag: flag(v, 6),
            pic_order_present_flag: flag(v, 7),
            deblocking_filter_control_present_flag: flag(v, 8),
            redundant_pic_cnt_present_flag: flag(v, 9),
            reference_pic_flag: flag(v, 10),
        }
    }

    pub fn to_bits(&self) -> u32 {
        pack(self.entropy_coding_mode_flag.into(), 0, 1)
            | pack(self.weighted_pred_flag.into(), 1, 1)
            | pack(u32::from(self.weighted_bipred_idc), 2, 2)
            | pack(self.transform_8x8_mode_flag.into(), 4, 1)
            | pack(self.field_pic_flag.into(), 5, 1)
            | pack(self.constrained_intra_pred_flag.into(), 6, 1)
            | pack(self.pic_order_present_flag.into(), 7, 1)
            | pack(self.deblocking_filter_control_present_flag.into(), 8, 1)
            | pack(self.redundant_pic_cnt_present_flag.into(), 9, 1)
            | pack(self.reference_pic_flag.into(), 10, 1)
    }
}

/// `VAPictureParameterBufferH264`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureParameters {
    pub curr_pic: VaPicture,
    pub reference_frames: [VaPicture; NUM_REFERENCE_FRAMES],
    pub picture_width_in_mbs_minus1: u16,
    pub picture_height_in_mbs_minus1: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub num_ref_frames: u8,
    pub seq_fields: SeqFields,
    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    pub slice_group_change_rate_minus1: u16,
    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub second_chroma_qp_index_offset: i8,
    pub pic_fields: PicFields,
    pub frame_num: u16,
}

impl PictureParameters {
    /// Size of the C struct including its reserved tail.
    pub const SIZE: usize = VA_PICTURE_SIZE * (1 + NUM_REFERENCE_FRAMES) + 28 + PICTURE_RESERVED_SIZE;

    pub fn parse(data: &[u8]) -> Result<Self, ParamsError> {
        if data.len() < Self::SIZE {
            return Err(ParamsError::Truncated {
                what: "picture parameter",
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let curr_pic = VaPicture::read(&mut buf);
        let mut reference_frames = [VaPicture::default(); NUM_REFERENCE_FRAMES];
        for slot in reference_frames.iter_mut() {
            *slot = VaPicture::read(&mut buf);
        }

        let picture_width_in_mbs_minus1 = buf.get_u16_le();
        let picture_height_in_mbs_minus1 = buf.get_u16_le();
        let bit_depth_luma_minus8 = buf.get_u8();
        let bit_depth_chroma_minus8 = buf.get_u8();
        let num_ref_frames = buf.get_u8();
        buf.advance(1); // align seq_fields
        let seq_fields = SeqFields::from_bits(buf.get_u32_le());
        let num_slice_groups_minus1 = buf.get_u8();
        let slice_group_map_type = buf.get_u8();
        let slice_group_change_rate_minus1 = buf.get_u16_le();
        let pic_init_qp_minus26 = buf.get_i8();
        let pic_init_qs_minus26 = buf.get_i8();
        let chroma_qp_index_offset = buf.get_i8();
        let second_chroma_qp_index_offset = buf.get_i8();
        let pic_fields = PicFields::from_bits(buf.get_u32_le());
        let frame_num = buf.get_u16_le();

        Ok(PictureParameters {
            curr_pic,
            reference_frames,
            picture_width_in_mbs_minus1,
            picture_height_in_mbs_minus1,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            num_ref_frames,
            seq_fields,
            num_slice_groups_minus1,
            slice_group_map_type,
            slice_group_change_rate_minus1,
            pic_init_qp_minus26,
            pic_init_qs_minus26,
            chroma_qp_index_offset,
            second_chroma_qp_index_offset,
            pic_fields,
            frame_num,
        })
    }

    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(Self::SIZE);
        self.curr_pic.write(&mut out);
        for pic in &self.reference_frames {
            pic.write(&mut out);
        }
        out.put_u16_le(self.picture_width_in_mbs_minus1);
        out.put_u16_le(self.picture_height_in_mbs_minus1);
        out.put_u8(self.bit_depth_luma_minus8);
        out.put_u8(self.bit_depth_chroma_minus8);
        out.put_u8(self.num_ref_frames);
        out.put_u8(0);
        out.put_u32_le(self.seq_fields.to_bits());
        out.put_u8(self.num_slice_groups_minus1);
        out.put_u8(self.slice_group_map_type);
        out.put_u16_le(self.slice_group_change_rate_minus1);
        out.put_i8(self.pic_init_qp_minus26);
        out.put_i8(self.pic_init_qs_minus26);
        out.put_i8(self.chroma_qp_index_offset);
        out.put_i8(self.second_chroma_qp_index_offset);
        out.put_u32_le(self.pic_fields.to_bits());
        out.put_u16_le(self.frame_num);
        out.put_bytes(0, Self::SIZE - out.len());
        out
    }

    pub fn width_in_mbs(&self) -> u32 {
        u32::from(self.picture_width_in_mbs_minus1) + 1
    }

    /// Height in map units; doubled for field-coded sequences when converted
    /// to macroblocks.
    pub fn height_in_map_units(&self) -> u32 {
        u32::from(self.picture_height_in_mbs_minus1) + 1
    }

    pub fn height_in_mbs(&self) -> u32 {
        let factor = if self.seq_fields.frame_mbs_only_flag { 1 } else { 2 };
        self.height_in_map_units() * factor
    }
}

impl Default for PictureParameters {
    fn default() -> Self {
        PictureParameters {
            curr_pic: VaPicture::default(),
            reference_frames: [VaPicture::invalid(); NUM_REFERENCE_FRAMES],
            picture_width_in_mbs_minus1: 0,
            picture_height_in_mbs_minus1: 0,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            num_ref_frames: 0,
            seq_fields: SeqFields::default(),
            num_slice_groups_minus1: 0,
            slice_group_map_type: 0,
            slice_group_change_rate_minus1: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            second_chroma_qp_index_offset: 0,
            pic_fields: PicFields::default(),
            frame_num: 0,
        }
    }
}

/// Leading fields of `VASliceParameterBufferH264`, up to the deblocking
/// offsets. Reference lists and prediction weight tables are not decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceParameters {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub slice_data_bit_offset: u16,
    pub first_mb_in_slice: u16,
    pub slice_type: SliceType,
    pub direct_spatial_mv_pred_flag: bool,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub cabac_init_idc: u8,
    pub slice_qp_delta: i8,
    pub disable_deblocking_filter_idc: u8,
    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,
}

impl SliceParameters {
    /// Bytes decoded from the front of the buffer.
    pub const DECODED_SIZE: usize = 25;

    pub fn parse(data: &[u8]) -> Result<Self, ParamsError> {
        if data.len() < Self::DECODED_SIZE {
            return Err(ParamsError::Truncated {
                what: "slice parameter",
                expected: Self::DECODED_SIZE,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let slice_data_size = buf.get_u32_le();
        let slice_data_offset = buf.get_u32_le();
        let slice_data_flag = buf.get_u32_le();
        let slice_data_bit_offset = buf.get_u16_le();
        let first_mb_in_slice = buf.get_u16_le();
        let raw_slice_type = buf.get_u8();
        let slice_type =
            SliceType::from_raw(raw_slice_type).ok_or(ParamsError::InvalidSliceType(raw_slice_type))?;

        Ok(SliceParameters {
            slice_data_size,
            slice_data_offset,
            slice_data_flag,
            slice_data_bit_offset,
            first_mb_in_slice,
            slice_type,
            direct_spatial_mv_pred_flag: buf.get_u8() != 0,
            num_ref_idx_l0_active_minus1: buf.get_u8(),
            num_ref_idx_l1_active_minus1: buf.get_u8(),
            cabac_init_idc: buf.get_u8(),
            slice_qp_delta: buf.get_i8(),
            disable_deblocking_filter_idc: buf.get_u8(),
            slice_alpha_c0_offset_div2: buf.get_i8(),
            slice_beta_offset_div2: buf.get_i8(),
        })
    }

    /// Encode the decoded fields. The reference lists that follow them in the
    /// C struct are not produced.
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(Self::DECODED_SIZE);
        out.put_u32_le(self.slice_data_size);
        out.put_u32_le(self.slice_data_offset);
        out.put_u32_le(self.slice_data_flag);
        out.put_u16_le(self.slice_data_bit_offset);
        out.put_u16_le(self.first_mb_in_slice);
        out.put_u8(slice_type_raw(self.slice_type));
        out.put_u8(self.direct_spatial_mv_pred_flag.into());
        out.put_u8(self.num_ref_idx_l0_active_minus1);
        out.put_u8(self.num_ref_idx_l1_active_minus1);
        out.put_u8(self.cabac_init_idc);
        out.put_i8(self.slice_qp_delta);
        out.put_u8(self.disable_deblocking_filter_idc);
        out.put_i8(self.slice_alpha_c0_offset_div2);
        out.put_i8(self.slice_beta_offset_div2);
        out
    }

    /// A single slice covering the whole picture.
    pub fn whole_picture(slice_type: SliceType, slice_data_size: u32) -> Self {
        SliceParameters {
            slice_data_size,
            slice_data_offset: 0,
            slice_data_flag: 0,
            slice_data_bit_offset: 0,
            first_mb_in_slice: 0,
            slice_type,
            direct_spatial_mv_pred_flag: false,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            cabac_init_idc: 0,
            slice_qp_delta: 0,
            disable_deblocking_filter_idc: 0,
            slice_alpha_c0_offset_div2: 0,
            slice_beta_offset_div2: 0,
        }
    }
}

fn slice_type_raw(slice_type: SliceType) -> u8 {
    match slice_type {
        SliceType::P => 0,
        SliceType::B => 1,
        SliceType::I => 2,
        SliceType::Sp => 3,
        SliceType::Si => 4,
    }
}

fn field(v: u32, shift: u32, width: u32) -> u8 {
    ((v >> shift) & ((1 << width) - 1)) as u8
}

fn flag(v: u32, bit: u32) -> bool {
    (v >> bit) & 1 != 0
}

fn pack(v: u32, shift: u32, width: u32) -> u32 {
    (v & ((1 << width) - 1)) << shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picture_parameters_size() {
        assert_eq!(PictureParameters::SIZE, 672);
        assert_eq!(PictureParameters::default().encode().len(), 672);
    }

    #[test]
    fn test_picture_parameter_offsets() {
        let pic = PictureParameters {
            picture_width_in_mbs_minus1: 119,
            picture_height_in_mbs_minus1: 67,
            num_ref_frames: 4,
            pic_init_qp_minus26: -3,
            frame_num: 0x1234,
            ..Default::default()
        };
        let raw = pic.encode();
        assert_eq!(&raw[612..614], &119u16.to_le_bytes());
        assert_eq!(&raw[614..616], &67u16.to_le_bytes());
        assert_eq!(raw[618], 4);
        assert_eq!(raw[628] as i8, -3);
        assert_eq!(&raw[636..638], &0x1234u16.to_le_bytes());
    }

    #[test]
    fn test_seq_fields_bit_positions() {
        let fields = SeqFields::from_bits(0b1_0110_10_0101_0_1_0_1_0_0_01);
        assert_eq!(fields.chroma_format_idc, 1);
        assert!(!fields.gaps_in_frame_num_value_allowed_flag);
        assert!(fields.frame_mbs_only_flag);
        assert!(fields.direct_8x8_inference_flag);
        assert_eq!(fields.log2_max_frame_num_minus4, 5);
        assert_eq!(fields.pic_order_cnt_type, 2);
        assert_eq!(fields.log2_max_pic_order_cnt_lsb_minus4, 6);
        assert!(fields.delta_pic_order_always_zero_flag);
        assert_eq!(fields.to_bits(), 0b1_0110_10_0101_0_1_0_1_0_0_01);
    }

    #[test]
    fn test_pic_fields_bit_positions() {
        let fields = PicFields::from_bits(0x0000_0109);
        assert!(fields.entropy_coding_mode_flag);
        assert_eq!(fields.weighted_bipred_idc, 2);
        assert!(fields.deblocking_filter_control_present_flag);
        assert!(!fields.transform_8x8_mode_flag);
        assert_eq!(fields.to_bits(), 0x0000_0109);
    }

    #[test]
    fn test_picture_parameters_parse_encoded() {
        let pic = PictureParameters {
            picture_width_in_mbs_minus1: 79,
            picture_height_in_mbs_minus1: 44,
            bit_depth_luma_minus8: 2,
            bit_depth_chroma_minus8: 2,
            chroma_qp_index_offset: -2,
            seq_fields: SeqFields {
                chroma_format_idc: 1,
                frame_mbs_only_flag: true,
                pic_order_cnt_type: 2,
                ..Default::default()
            },
            pic_fields: PicFields {
                entropy_coding_mode_flag: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(PictureParameters::parse(&pic.encode()).unwrap(), pic);
    }

    #[test]
    fn test_short_picture_buffer() {
        let err = PictureParameters::parse(&[0u8; 100]).unwrap_err();
        assert_eq!(
            err,
            ParamsError::Truncated {
                what: "picture parameter",
                expected: 672,
                actual: 100
            }
        );
    }

    #[test]
    fn test_height_in_mbs_for_field_coding() {
        let mut pic = PictureParameters {
            picture_height_in_mbs_minus1: 33,
            ..Default::default()
        };
        assert_eq!(pic.height_in_mbs(), 68);
        pic.seq_fields.frame_mbs_only_flag = true;
        assert_eq!(pic.height_in_mbs(), 34);
    }

    #[test]
    fn test_slice_parameters_layout() {
        let mut raw = vec![0u8; 64];
        raw[0..4].copy_from_slice(&1000u32.to_le_bytes());
        raw[16] = 7;
        raw[18] = 3;
        raw[21] = (-4i8) as u8;
        let slice = SliceParameters::parse(&raw).unwrap();
        assert_eq!(slice.slice_data_size, 1000);
        assert_eq!(slice.slice_type, SliceType::I);
        assert_eq!(slice.num_ref_idx_l0_active_minus1, 3);
        assert_eq!(slice.slice_qp_delta, -4);
    }

    #[test]
    fn test_slice_parameters_errors() {
        assert!(matches!(
            SliceParameters::parse(&[0u8; 10]),
            Err(ParamsError::Truncated { .. })
        ));

        let mut raw = SliceParameters::whole_picture(SliceType::P, 1).encode();
        raw[16] = 12;
        assert_eq!(
            SliceParameters::parse(&raw),
            Err(ParamsError::InvalidSliceType(12))
        );
    }
}
