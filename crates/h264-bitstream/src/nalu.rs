/// Annex B start code prefix written before every NAL unit.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// `nal_unit_type` values (H.264 Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NaluType {
    Unspecified = 0,
    NonIdrSlice = 1,
    SliceDataA = 2,
    SliceDataB = 3,
    SliceDataC = 4,
    IdrSlice = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AccessUnitDelimiter = 9,
    EndOfSequence = 10,
    EndOfStream = 11,
    Filler = 12,
    SpsExtension = 13,
    Prefix = 14,
    SubsetSps = 15,
    Dps = 16,
    CodedSliceAux = 19,
    CodedSliceExtension = 20,
}

impl NaluType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Unspecified,
            1 => Self::NonIdrSlice,
            2 => Self::SliceDataA,
            3 => Self::SliceDataB,
            4 => Self::SliceDataC,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            13 => Self::SpsExtension,
            14 => Self::Prefix,
            15 => Self::SubsetSps,
            16 => Self::Dps,
            19 => Self::CodedSliceAux,
            20 => Self::CodedSliceExtension,
            _ => return None,
        })
    }
}

/// `slice_type` as carried in the VA slice parameter buffer.
///
/// Values 5..=9 mean "all slices of the picture share this type" and map onto
/// the same five kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        if raw >= 10 {
            return None;
        }
        Some(match raw % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        })
    }

    /// Intra slices start a new coded picture boundary, so the parameter sets
    /// are regenerated in front of them.
    pub fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Si)
    }
}

/// Profiles the header reconstructor knows how to lay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    Baseline,
    ConstrainedBaseline,
    Main,
    High,
}

impl HeaderProfile {
    pub fn profile_idc(self) -> u8 {
        match self {
            Self::Baseline | Self::ConstrainedBaseline => 66,
            Self::Main => 77,
            Self::High => 100,
        }
    }

    /// Whether `profile_idc` carries the chroma format / bit depth block in the
    /// SPS (H.264 7.3.2.1.1).
    pub fn has_chroma_format_info(self) -> bool {
        matches!(
            self.profile_idc(),
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        )
    }
}

/// `level_idc` values (H.264 Table A-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LevelIdc {
    L1b = 9,
    L1 = 10,
    L1_1 = 11,
    L1_2 = 12,
    L1_3 = 13,
    L2 = 20,
    L2_1 = 21,
    L2_2 = 22,
    L3 = 30,
    L3_1 = 31,
    L3_2 = 32,
    L4 = 40,
    L4_1 = 41,
    L4_2 = 42,
    L5 = 50,
    L5_1 = 51,
    L5_2 = 52,
    L6 = 60,
    L6_1 = 61,
    L6_2 = 62,
}
