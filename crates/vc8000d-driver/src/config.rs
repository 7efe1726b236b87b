use h264_bitstream::HeaderProfile;
use tracing::debug;

use crate::error::DriverError;
use crate::registry::{Resource, ResourceId};

/// `VAConfigAttribRTFormat`
pub const CONFIG_ATTRIB_RT_FORMAT: u32 = 0;
/// `VA_ATTRIB_NOT_SUPPORTED`
pub const ATTRIB_NOT_SUPPORTED: u32 = 0x8000_0000;

pub const RT_FORMAT_YUV420: u32 = 0x0000_0001;
pub const RT_FORMAT_YUV420_10: u32 = 0x0000_0100;

/// `VAProfile`, keeping unknown values so they can be reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Profile {
    H264Baseline,
    H264Main,
    H264High,
    H264ConstrainedBaseline,
    Other(i32),
}

impl Profile {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            5 => Profile::H264Baseline,
            6 => Profile::H264Main,
            7 => Profile::H264High,
            13 => Profile::H264ConstrainedBaseline,
            other => Profile::Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Profile::H264Baseline => 5,
            Profile::H264Main => 6,
            Profile::H264High => 7,
            Profile::H264ConstrainedBaseline => 13,
            Profile::Other(raw) => raw,
        }
    }

    /// SPS layout used when regenerating headers for this profile.
    pub fn header_profile(self) -> Option<HeaderProfile> {
        match self {
            Profile::H264Baseline => Some(HeaderProfile::Baseline),
            Profile::H264ConstrainedBaseline => Some(HeaderProfile::ConstrainedBaseline),
            Profile::H264Main => Some(HeaderProfile::Main),
            Profile::H264High => Some(HeaderProfile::High),
            Profile::Other(_) => None,
        }
    }
}

/// `VAEntrypoint`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    Vld,
    Other(i32),
}

impl Entrypoint {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Entrypoint::Vld,
            other => Entrypoint::Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Entrypoint::Vld => 1,
            Entrypoint::Other(raw) => raw,
        }
    }
}

/// `VAConfigAttrib`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAttrib {
    pub attrib_type: u32,
    pub value: u32,
}

impl ConfigAttrib {
    pub const fn new(attrib_type: u32, value: u32) -> Self {
        ConfigAttrib { attrib_type, value }
    }

    pub const fn rt_format(value: u32) -> Self {
        Self::new(CONFIG_ATTRIB_RT_FORMAT, value)
    }

    /// A query slot with its value not yet filled in.
    pub const fn query(attrib_type: u32) -> Self {
        Self::new(attrib_type, ATTRIB_NOT_SUPPORTED)
    }
}

/// One decodable profile/entrypoint pair and the attribute values it accepts.
#[derive(Debug)]
pub struct Capability {
    pub profile: Profile,
    pub entrypoint: Entrypoint,
    pub attribs: &'static [ConfigAttrib],
}

const YUV420_ONLY: &[ConfigAttrib] = &[ConfigAttrib::rt_format(RT_FORMAT_YUV420)];

pub const CAPABILITIES: &[Capability] = &[
    Capability {
        profile: Profile::H264ConstrainedBaseline,
        entrypoint: Entrypoint::Vld,
        attribs: YUV420_ONLY,
    },
    Capability {
        profile: Profile::H264Main,
        entrypoint: Entrypoint::Vld,
        attribs: YUV420_ONLY,
    },
    Capability {
        profile: Profile::H264High,
        entrypoint: Entrypoint::Vld,
        attribs: YUV420_ONLY,
    },
];

/// Distinct profiles in the capability table, sorted by raw value.
pub fn supported_profiles() -> Vec<Profile> {
    let mut profiles: Vec<Profile> = CAPABILITIES.iter().map(|c| c.profile).collect();
    profiles.sort_by_key(|p| p.raw());
    profiles.dedup();
    profiles
}

pub fn supported_entrypoints(profile: Profile) -> Vec<Entrypoint> {
    CAPABILITIES
        .iter()
        .filter(|c| c.profile == profile)
        .map(|c| c.entrypoint)
        .collect()
}

/// Look up the capability entry for a profile/entrypoint pair.
pub fn find_capability(
    profile: Profile,
    entrypoint: Entrypoint,
) -> Result<&'static Capability, DriverError> {
    let mut profile_found = false;
    for capability in CAPABILITIES {
        profile_found |= capability.profile == profile;
        if capability.profile == profile && capability.entrypoint == entrypoint {
            return Ok(capability);
        }
    }
    if profile_found {
        Err(DriverError::UnsupportedEntrypoint {
            profile,
            entrypoint,
        })
    } else {
        Err(DriverError::UnsupportedProfile(profile))
    }
}

/// Fill in the supported value of each queried attribute type, or
/// [`ATTRIB_NOT_SUPPORTED`] for types the pair does not have.
pub fn fill_config_attributes(
    profile: Profile,
    entrypoint: Entrypoint,
    attribs: &mut [ConfigAttrib],
) -> Result<(), DriverError> {
    let capability = find_capability(profile, entrypoint)?;
    for attrib in attribs.iter_mut() {
        attrib.value = capability
            .attribs
            .iter()
            .find(|c| c.attrib_type == attrib.attrib_type)
            .map_or(ATTRIB_NOT_SUPPORTED, |c| c.value);
    }
    Ok(())
}

/// An immutable decode configuration (`VAConfigID`).
#[derive(Debug)]
pub struct Config {
    id: ResourceId,
    profile: Profile,
    entrypoint: Entrypoint,
    attribs: Vec<ConfigAttrib>,
}

impl Config {
    /// Validate the requested attributes against the capability table.
    ///
    /// A requested value is accepted when it shares a bit with the supported
    /// value or equals it (for attributes where 0 is meaningful). Supported
    /// attributes the caller left out are appended with their capability
    /// value.
    pub fn new(
        id: ResourceId,
        profile: Profile,
        entrypoint: Entrypoint,
        requested: &[ConfigAttrib],
    ) -> Result<Self, DriverError> {
        let capability = find_capability(profile, entrypoint)?;

        let mut attribs = Vec::with_capacity(capability.attribs.len().max(requested.len()));
        for attrib in requested {
            let supported = capability.attribs.iter().any(|cap| {
                cap.attrib_type == attrib.attrib_type
                    && (cap.value & attrib.value != 0 || cap.value == attrib.value)
            });
            if !supported {
                debug!(?profile, attrib_type = attrib.attrib_type, value = attrib.value, "config attribute rejected");
                return Err(DriverError::AttrNotSupported {
                    attrib_type: attrib.attrib_type,
                    value: attrib.value,
                });
            }
            attribs.push(*attrib);
        }

        for cap in capability.attribs {
            if !attribs.iter().any(|a| a.attrib_type == cap.attrib_type) {
                attribs.push(*cap);
            }
        }

        Ok(Config {
            id,
            profile,
            entrypoint,
            attribs,
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn entrypoint(&self) -> Entrypoint {
        self.entrypoint
    }

    pub fn attribs(&self) -> &[ConfigAttrib] {
        &self.attribs
    }
}

impl Resource for Config {
    fn id(&self) -> ResourceId {
        self.id
    }
}
