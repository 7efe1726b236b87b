pub mod bit_writer;
pub mod error;
pub mod headers;
pub mod nalu;
pub mod params;

#[cfg(test)]
mod bit_reader;

pub use bit_writer::BitWriter;
pub use error::ParamsError;
pub use headers::{build_pps, build_sps, HeaderOptions, HEADERS_ARE_APPROXIMATE};
pub use nalu::{HeaderProfile, LevelIdc, NaluType, SliceType, START_CODE};
pub use params::{PicFields, PictureParameters, SeqFields, SliceParameters};
