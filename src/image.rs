//! Image header support
//!
//! Every slot starts with a fixed size header describing the image stored in it.
//! The bootloader only needs to know whether an image is present, how large it is,
//! and which version it carries. All fields are stored little endian.
//!
//! ```text
//! +--------+------+----------------------+
//! | offset | size | field                |
//! +--------+------+----------------------+
//! | 0      | 4    | magic                |
//! | 4      | 2    | TLV size             |
//! | 6      | 1    | key id               |
//! | 8      | 2    | header size          |
//! | 12     | 4    | image body size      |
//! | 16     | 4    | flags                |
//! | 20     | 1    | version major        |
//! | 21     | 1    | version minor        |
//! | 22     | 2    | version revision     |
//! | 24     | 4    | version build number |
//! +--------+------+----------------------+
//! ```

use core::fmt;

use byteorder::{ByteOrder, LittleEndian};
use embedded_storage_async::nor_flash::ReadNorFlash;
use serde::{Deserialize, Serialize};

use crate::Error;

/// The image header contains the following magic value, indicating that an image is present.
pub const IMAGE_MAGIC: u32 = 0x96f3_b83c;

/// Value of the magic when the header has been erased.
pub const IMAGE_MAGIC_NONE: u32 = 0xffff_ffff;

pub const HEADER_SIZE: usize = 32;

/// Version of an image, only ever compared for equality.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

impl ImageVersion {
    pub const fn new(major: u8, minor: u8, revision: u16, build_num: u32) -> Self {
        Self {
            major,
            minor,
            revision,
            build_num,
        }
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}+{}",
            self.major, self.minor, self.revision, self.build_num
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    pub magic: u32,
    pub tlv_size: u16,
    pub key_id: u8,
    pub hdr_size: u16,
    pub img_size: u32,
    pub flags: u32,
    pub version: ImageVersion,
}

impl ImageHeader {
    /// Header of a valid image with the given version and body size.
    pub const fn new(version: ImageVersion, img_size: u32) -> Self {
        Self {
            magic: IMAGE_MAGIC,
            tlv_size: 0,
            key_id: 0,
            hdr_size: HEADER_SIZE as u16,
            img_size,
            flags: 0,
            version,
        }
    }

    pub fn parse(raw: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: LittleEndian::read_u32(&raw[0..4]),
            tlv_size: LittleEndian::read_u16(&raw[4..6]),
            key_id: raw[6],
            hdr_size: LittleEndian::read_u16(&raw[8..10]),
            img_size: LittleEndian::read_u32(&raw[12..16]),
            flags: LittleEndian::read_u32(&raw[16..20]),
            version: ImageVersion {
                major: raw[20],
                minor: raw[21],
                revision: LittleEndian::read_u16(&raw[22..24]),
                build_num: LittleEndian::read_u32(&raw[24..28]),
            },
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut raw[0..4], self.magic);
        LittleEndian::write_u16(&mut raw[4..6], self.tlv_size);
        raw[6] = self.key_id;
        LittleEndian::write_u16(&mut raw[8..10], self.hdr_size);
        LittleEndian::write_u32(&mut raw[12..16], self.img_size);
        LittleEndian::write_u32(&mut raw[16..20], self.flags);
        raw[20] = self.version.major;
        raw[21] = self.version.minor;
        LittleEndian::write_u16(&mut raw[22..24], self.version.revision);
        LittleEndian::write_u32(&mut raw[24..28], self.version.build_num);
        raw
    }

    /// Does this header indicate that an image is present.
    ///
    /// This does not indicate that the image itself is valid.
    pub fn is_valid(&self) -> bool {
        self.magic == IMAGE_MAGIC
    }

    /// Number of bytes occupied by the image in its slot: header, body and trailing TLV.
    pub fn total_size(&self) -> u32 {
        (self.hdr_size as u32)
            .saturating_add(self.img_size)
            .saturating_add(self.tlv_size as u32)
    }
}

/// Read the header found at the start of an image slot.
pub async fn read_header<F: ReadNorFlash>(flash: &mut F, addr: u32) -> Result<ImageHeader, Error> {
    let mut raw = [0u8; HEADER_SIZE];
    flash.read(addr, &mut raw).await.map_err(Error::flash)?;
    Ok(ImageHeader::parse(&raw))
}
