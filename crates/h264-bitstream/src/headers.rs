//! Regeneration of SPS/PPS NAL units from VA parameter records.
//!
//! The VA API hands the driver decoded syntax elements instead of the original
//! parameter sets, so the hardware decoder is fed a best-effort
//! reconstruction: everything the parameter buffers carry is written
//! faithfully, everything else gets a fixed default (ids 0, level 5.1, no
//! scaling lists, square-pixel VUI, no HRD).

use tracing::trace;

use crate::bit_writer::BitWriter;
use crate::nalu::{HeaderProfile, LevelIdc, NaluType};
use crate::params::PictureParameters;

/// The regenerated headers are equivalent for decoding, not byte-identical to
/// the ones the stream was encoded with.
pub const HEADERS_ARE_APPROXIMATE: bool = true;

const PARAMETER_SET_REF_IDC: u8 = 3;
/// Default active reference counts advertised in the PPS. P slices that do
/// not override them get a five-entry list 0.
const NUM_REF_IDX_L0_DEFAULT_ACTIVE_MINUS1: u32 = 4;
const NUM_REF_IDX_L1_DEFAULT_ACTIVE_MINUS1: u32 = 0;
const MB_SIZE: u32 = 16;
/// `aspect_ratio_idc` for 1:1 sample aspect ratio.
const ASPECT_RATIO_SQUARE: u64 = 1;

/// Inputs to the SPS that do not come from the picture parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOptions {
    pub level: LevelIdc,
    /// Visible picture size. Zero, or a size equal to the macroblock-aligned
    /// size, disables frame cropping.
    pub picture_width: u32,
    pub picture_height: u32,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        HeaderOptions {
            level: LevelIdc::L5_1,
            picture_width: 0,
            picture_height: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct FrameCrop {
    left: u32,
    right: u32,
    top: u32,
    bottom: u32,
}

/// Write a complete SPS NAL unit (H.264 7.3.2.1.1).
pub fn build_sps(
    writer: &mut BitWriter,
    profile: HeaderProfile,
    pic: &PictureParameters,
    options: &HeaderOptions,
) {
    let seq = &pic.seq_fields;

    writer.begin_nal_unit(NaluType::Sps, PARAMETER_SET_REF_IDC);

    writer.append_bits(8, u64::from(profile.profile_idc()));
    for _ in 0..6 {
        writer.append_bool(false); // constraint_set0..5_flag
    }
    writer.append_bits(2, 0); // reserved_zero_2bits
    writer.append_bits(8, options.level as u64);
    writer.append_ue(0); // seq_parameter_set_id

    let chroma_format_idc = if profile.has_chroma_format_info() {
        writer.append_ue(u32::from(seq.chroma_format_idc));
        if seq.chroma_format_idc == 3 {
            writer.append_bool(false); // separate_colour_plane_flag
        }
        writer.append_ue(u32::from(pic.bit_depth_luma_minus8));
        writer.append_ue(u32::from(pic.bit_depth_chroma_minus8));
        writer.append_bool(false); // qpprime_y_zero_transform_bypass_flag
        writer.append_bool(false); // seq_scaling_matrix_present_flag
        seq.chroma_format_idc
    } else {
        1
    };

    writer.append_ue(u32::from(seq.log2_max_frame_num_minus4));
    writer.append_ue(u32::from(seq.pic_order_cnt_type));
    match seq.pic_order_cnt_type {
        0 => writer.append_ue(u32::from(seq.log2_max_pic_order_cnt_lsb_minus4)),
        1 => panic!("pic_order_cnt_type 1 is not supported"),
        _ => {}
    }

    writer.append_ue(u32::from(pic.num_ref_frames));
    writer.append_bool(seq.gaps_in_frame_num_value_allowed_flag);
    writer.append_ue(u32::from(pic.picture_width_in_mbs_minus1));
    writer.append_ue(u32::from(pic.picture_height_in_mbs_minus1));
    writer.append_bool(seq.frame_mbs_only_flag);
    if !seq.frame_mbs_only_flag {
        writer.append_bool(seq.mb_adaptive_frame_field_flag);
    }
    writer.append_bool(seq.direct_8x8_inference_flag);

    match frame_crop(pic, chroma_format_idc, options) {
        Some(crop) => {
            trace!(?crop, "sps frame cropping");
            writer.append_bool(true);
            writer.append_ue(crop.left);
            writer.append_ue(crop.right);
            writer.append_ue(crop.top);
            writer.append_ue(crop.bottom);
        }
        None => writer.append_bool(false),
    }

    writer.append_bool(true); // vui_parameters_present_flag
    write_vui(writer);

    writer.finish_nal_unit();
}

/// Write a complete PPS NAL unit (H.264 7.3.2.2).
///
/// The default reference index counts are not carried by the VA buffers and
/// are written as fixed values.
pub fn build_pps(writer: &mut BitWriter, pic: &PictureParameters) {
    let fields = &pic.pic_fields;

    writer.begin_nal_unit(NaluType::Pps, PARAMETER_SET_REF_IDC);

    writer.append_ue(0); // pic_parameter_set_id
    writer.append_ue(0); // seq_parameter_set_id
    writer.append_bool(fields.entropy_coding_mode_flag);
    writer.append_bool(fields.pic_order_present_flag);
    writer.append_ue(0); // num_slice_groups_minus1

    writer.append_ue(NUM_REF_IDX_L0_DEFAULT_ACTIVE_MINUS1);
    writer.append_ue(NUM_REF_IDX_L1_DEFAULT_ACTIVE_MINUS1);

    writer.append_bool(fields.weighted_pred_flag);
    writer.append_bits(2, u64::from(fields.weighted_bipred_idc));
    writer.append_se(i32::from(pic.pic_init_qp_minus26));
    writer.append_se(i32::from(pic.pic_init_qs_minus26));
    writer.append_se(i32::from(pic.chroma_qp_index_offset));
    writer.append_bool(fields.deblocking_filter_control_present_flag);
    writer.append_bool(fields.constrained_intra_pred_flag);
    writer.append_bool(fields.redundant_pic_cnt_present_flag);

    writer.finish_nal_unit();
}

/// VUI with only a square sample aspect ratio signalled (Annex E.1.1).
fn write_vui(writer: &mut BitWriter) {
    writer.append_bool(true); // aspect_ratio_info_present_flag
    writer.append_bits(8, ASPECT_RATIO_SQUARE);
    writer.append_bool(false); // overscan_info_present_flag
    writer.append_bool(false); // video_signal_type_present_flag
    writer.append_bool(false); // chroma_loc_info_present_flag
    writer.append_bool(false); // timing_info_present_flag
    writer.append_bool(false); // nal_hrd_parameters_present_flag
    writer.append_bool(false); // vcl_hrd_parameters_present_flag
    writer.append_bool(false); // pic_struct_present_flag
    writer.append_bool(false); // bitstream_restriction_flag
}

/// Crop offsets trimming the macroblock-aligned frame down to the visible
/// picture size, in crop units (H.264 7.4.2.1.1, equations 7-19 to 7-22).
fn frame_crop(
    pic: &PictureParameters,
    chroma_format_idc: u8,
    options: &HeaderOptions,
) -> Option<FrameCrop> {
    if options.picture_width == 0 || options.picture_height == 0 {
        return None;
    }

    let coded_width = pic.width_in_mbs() * MB_SIZE;
    let coded_height = pic.height_in_mbs() * MB_SIZE;
    if options.picture_width >= coded_width && options.picture_height >= coded_height {
        return None;
    }

    let (sub_width_c, sub_height_c) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let frame_factor = if pic.seq_fields.frame_mbs_only_flag { 1 } else { 2 };
    let (crop_unit_x, crop_unit_y) = if chroma_format_idc == 0 {
        (1, frame_factor)
    } else {
        (sub_width_c, sub_height_c * frame_factor)
    };

    Some(FrameCrop {
        left: 0,
        right: coded_width.saturating_sub(options.picture_width) / crop_unit_x,
        top: 0,
        bottom: coded_height.saturating_sub(options.picture_height) / crop_unit_y,
    })
}
