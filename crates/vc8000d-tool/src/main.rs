mod loopback;
#[cfg(target_os = "linux")]
mod memfd;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use h264_bitstream::{PictureParameters, SliceParameters, SliceType};
use tracing::{debug, error, info};

use vc8000d_driver::config::RT_FORMAT_YUV420;
use vc8000d_driver::{
    system_mapper, BufferType, ConfigAttrib, Driver, DriverConfig, DrmPrimeDescriptor, Entrypoint,
    ImageFormat, Profile, ReadyPicture, Resource, ResourceId,
};

use crate::loopback::LoopbackFactory;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    profile: Profile,
    width: u32,
    height: u32,
    slice: Option<PathBuf>,
    out: Option<PathBuf>,
    frames: u32,
    verbose: bool,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            profile: Profile::H264Main,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            slice: None,
            out: None,
            frames: 1,
            verbose: false,
        }
    }
}

fn parse_profile(name: &str) -> Option<Profile> {
    match name {
        "cb" | "constrained-baseline" => Some(Profile::H264ConstrainedBaseline),
        "main" => Some(Profile::H264Main),
        "high" => Some(Profile::H264High),
        _ => None,
    }
}

fn print_usage() {
    println!("vc8000d-tool - run pictures through the VC8000D decode driver");
    println!();
    println!("Usage: vc8000d-tool [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --profile <NAME>     cb, main or high (default: main)");
    println!("  --width <PIXELS>     Picture width (default: {DEFAULT_WIDTH})");
    println!("  --height <PIXELS>    Picture height (default: {DEFAULT_HEIGHT})");
    println!("  --slice <FILE>       Raw slice NAL unit to submit (default: synthetic)");
    println!("  --out <FILE>         Write the Annex B bitstream sent to the decoder");
    println!("  --frames <N>         Pictures to submit; the first is intra (default: 1)");
    println!("  -v, --verbose        Enable debug logging");
    println!("  -h, --help           Show this help");
}

fn parse_args_from(args: &[String]) -> Args {
    let mut parsed = Args::default();

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--profile" => {
                if let Some(v) = value {
                    parsed.profile = parse_profile(v).unwrap_or(parsed.profile);
                    i += 1;
                }
            }
            "--width" => {
                if let Some(v) = value {
                    parsed.width = v.parse().unwrap_or(DEFAULT_WIDTH);
                    i += 1;
                }
            }
            "--height" => {
                if let Some(v) = value {
                    parsed.height = v.parse().unwrap_or(DEFAULT_HEIGHT);
                    i += 1;
                }
            }
            "--slice" => {
                if let Some(v) = value {
                    parsed.slice = Some(PathBuf::from(v));
                    i += 1;
                }
            }
            "--out" => {
                if let Some(v) = value {
                    parsed.out = Some(PathBuf::from(v));
                    i += 1;
                }
            }
            "--frames" => {
                if let Some(v) = value {
                    parsed.frames = v.parse().unwrap_or(1);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }
    parsed
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_args_from(&args)
}

/// Macroblock count minus one covering `pixels`, as the 16-bit VA field.
fn mbs_minus1(pixels: u32, what: &str) -> Result<u16, Box<dyn Error>> {
    let mbs = pixels.div_ceil(16).max(1) - 1;
    u16::try_from(mbs).map_err(|_| format!("{what} {pixels} is too large for a picture").into())
}

/// Parameters of a progressive 4:2:0 stream of the given size.
fn picture_parameters(width: u32, height: u32) -> Result<PictureParameters, Box<dyn Error>> {
    let mut pic = PictureParameters::default();
    pic.picture_width_in_mbs_minus1 = mbs_minus1(width, "width")?;
    pic.picture_height_in_mbs_minus1 = mbs_minus1(height, "height")?;
    pic.seq_fields.chroma_format_idc = 1;
    pic.seq_fields.frame_mbs_only_flag = true;
    pic.seq_fields.direct_8x8_inference_flag = true;
    pic.seq_fields.log2_max_frame_num_minus4 = 4;
    pic.seq_fields.log2_max_pic_order_cnt_lsb_minus4 = 4;
    pic.num_ref_frames = 1;
    pic.pic_fields.deblocking_filter_control_present_flag = true;
    Ok(pic)
}

/// A slice NAL unit (without start code) of the right type for `slice_type`.
fn synthetic_slice(slice_type: SliceType) -> Vec<u8> {
    let header = if slice_type.is_intra() { 0x65 } else { 0x41 };
    vec![header, 0x88, 0x84, 0x21, 0xa0, 0x3f, 0xf8]
}

#[cfg(target_os = "linux")]
fn create_render_target(driver: &Driver, width: u32, height: u32) -> Result<ResourceId, Box<dyn Error>> {
    let mut desc = DrmPrimeDescriptor::nv12(-1, width, height);
    let memory = memfd::SurfaceMemory::create("vc8000d-render-target", desc.objects[0].size as usize)?;
    desc.objects[0].fd = memory.raw_fd();
    debug!(fd = memory.raw_fd(), size = memory.size(), "render target memory");
    // The import keeps its own reference to the memory.
    let ids = driver.create_surfaces(RT_FORMAT_YUV420, width, height, 1, &desc.into_attribs())?;
    Ok(ids[0])
}

#[cfg(not(target_os = "linux"))]
fn create_render_target(driver: &Driver, width: u32, height: u32) -> Result<ResourceId, Box<dyn Error>> {
    let desc = DrmPrimeDescriptor::nv12(-1, width, height);
    let ids = driver.create_surfaces(RT_FORMAT_YUV420, width, height, 1, &desc.into_attribs())?;
    Ok(ids[0])
}

/// Submit one single-slice picture and release its buffers.
fn decode_picture(
    driver: &Driver,
    context: ResourceId,
    surface: ResourceId,
    pic: &PictureParameters,
    slice_type: SliceType,
    slice: &[u8],
) -> Result<Vec<ReadyPicture>, Box<dyn Error>> {
    let pic_bytes = pic.encode();
    let slice_params = SliceParameters::whole_picture(slice_type, slice.len() as u32).encode();

    let buffers = [
        driver.create_buffer(context, BufferType::PictureParameter, pic_bytes.len(), 1, Some(&pic_bytes[..]))?,
        driver.create_buffer(context, BufferType::SliceParameter, slice_params.len(), 1, Some(&slice_params[..]))?,
        driver.create_buffer(context, BufferType::SliceData, slice.len(), 1, Some(slice))?,
    ];

    driver.begin_picture(context, surface)?;
    driver.render_picture(context, &buffers)?;
    let result = driver.end_picture(context);
    for id in buffers {
        driver.destroy_buffer(id)?;
    }
    Ok(result?)
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let (width, height) = (args.width, args.height);
    let pic = picture_parameters(width, height)?;
    let slice_file = match &args.slice {
        Some(path) => {
            let data = std::fs::read(path)?;
            if data.is_empty() {
                return Err(format!("{} is empty", path.display()).into());
            }
            Some(data)
        }
        None => None,
    };

    if let Some(out) = &args.out {
        // The driver appends; start from an empty file.
        std::fs::File::create(out)?;
    }
    let config = DriverConfig {
        bitstream_dump: args.out.clone(),
        ..DriverConfig::default()
    };
    let driver = Driver::new(config, Arc::new(LoopbackFactory), system_mapper());

    let caps = driver.capabilities();
    info!(
        vendor = caps.vendor,
        profiles = ?caps.profiles,
        max_width = caps.max_width,
        max_height = caps.max_height,
        headers_approximate = caps.headers_approximate,
        "driver capabilities"
    );

    let config_id = driver.create_config(
        args.profile,
        Entrypoint::Vld,
        &[ConfigAttrib::rt_format(RT_FORMAT_YUV420)],
    )?;
    let surface = create_render_target(&driver, width, height)?;
    let context = driver.create_context(config_id, width, height, 0, &[surface])?;

    for frame in 0..args.frames {
        let slice_type = if frame == 0 { SliceType::I } else { SliceType::P };
        let slice = slice_file.clone().unwrap_or_else(|| synthetic_slice(slice_type));
        debug!(frame, ?slice_type, len = slice.len(), "submitting frame");
        let ready = decode_picture(&driver, context, surface, &pic, slice_type, &slice)?;
        for picture in &ready {
            info!(
                frame,
                tag = picture.tag,
                surface = ?picture.surface,
                width = picture.width,
                height = picture.height,
                "picture ready"
            );
        }
    }

    let image = driver.create_image(&ImageFormat::NV12, width, height)?;
    driver.sync_surface(surface)?;
    driver.get_image(surface, 0, 0, width, height, image.id())?;
    let luma_size = (width * height) as usize;
    let mean_luma = driver.map_buffer(image.buffer(), |data| {
        let luma = &data[..luma_size];
        luma.iter().map(|&b| u64::from(b)).sum::<u64>() / luma.len().max(1) as u64
    })?;
    info!(mean_luma, "downloaded render target");

    driver.destroy_image(image.id())?;
    driver.destroy_context(context)?;
    driver.destroy_surfaces(&[surface])?;
    driver.destroy_config(config_id)?;

    if let Some(out) = &args.out {
        info!(path = %out.display(), "bitstream written");
    }
    Ok(())
}

fn main() {
    let args = parse_args();

    // Initialize tracing
    let filter = if args.verbose {
        "h264_bitstream=debug,vc8000d_driver=debug,vc8000d_tool=debug"
    } else {
        "h264_bitstream=info,vc8000d_driver=info,vc8000d_tool=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    info!(
        profile = ?args.profile,
        width = args.width,
        height = args.height,
        frames = args.frames,
        "vc8000d-tool starting"
    );

    if let Err(e) = run(&args) {
        error!(%e, "decode run failed");
        std::process::exit(1);
    }
}
