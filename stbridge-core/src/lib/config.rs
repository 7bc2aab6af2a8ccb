use std::io::{Read, Write};

use stbridge_utils::wire::{ReadBE, WriteBE};

use crate::error::{FrontError, FrontResult};

const CONFIG_MAGIC: u32 = 0x5354_4246; // "STBF"
const CONFIG_VERSION: u16 = 1;

/// The persisted front-end state: control word, direct-SD flag, video
/// adjust values, and the image path of each slot (empty = unused).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontConfig {
    pub control: u32,
    pub direct_sd: bool,
    pub video_adjust: [i8; 2],
    pub paths: [String; 4],
}

impl FrontConfig {
    /// Read a configuration blob, validating magic and version.
    pub fn load(reader: &mut impl Read) -> FrontResult<Self> {
        let magic = reader.read_be_u32()?;
        assert_or_error!(magic == CONFIG_MAGIC,
                         "Not a configuration blob: bad magic {:#010x}.", magic);
        let version = reader.read_be_u16()?;
        assert_or_error!(version == CONFIG_VERSION,
                         "Unsupported configuration version {}.", version);

        let control = reader.read_be_u32()?;
        let flags = reader.read_u8()?;
        let video_adjust = [reader.read_u8()? as i8, reader.read_u8()? as i8];
        let mut paths: [String; 4] = Default::default();
        for path in paths.iter_mut() {
            let len = reader.read_be_u16()? as usize;
            *path = String::from_utf8(reader.read_bytes(len)?)
                .map_err(|_| FrontError::new("Configuration path is not valid UTF-8."))?;
        }
        Ok(FrontConfig {
            control,
            direct_sd: flags & 0x01 != 0,
            video_adjust,
            paths,
        })
    }

    /// Write the blob in the layout `load` reads.
    pub fn save(&self, writer: &mut impl Write) -> FrontResult<()> {
        writer.write_be_u32(CONFIG_MAGIC)?;
        writer.write_be_u16(CONFIG_VERSION)?;
        writer.write_be_u32(self.control)?;
        writer.write_u8(self.direct_sd as u8)?;
        writer.write_u8(self.video_adjust[0] as u8)?;
        writer.write_u8(self.video_adjust[1] as u8)?;
        for path in &self.paths {
            assert_or_error!(path.len() <= u16::MAX as usize,
                             "Image path too long to save: {}", path);
            writer.write_be_u16(path.len() as u16)?;
            writer.write_all(path.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> FrontConfig {
        FrontConfig {
            control: 0x0000_0340,
            direct_sd: true,
            video_adjust: [-2, 5],
            paths: [
                "/images/disk_a.st".to_owned(),
                String::new(),
                "/images/main.hd".to_owned(),
                String::new(),
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let mut blob = Vec::new();
        sample().save(&mut blob).unwrap();
        let restored = FrontConfig::load(&mut Cursor::new(blob)).unwrap();
        assert_eq!(restored, sample());
    }

    /// The header is fixed: magic, version, then the state fields.
    #[test]
    fn test_layout() {
        let mut blob = Vec::new();
        FrontConfig::default().save(&mut blob).unwrap();
        assert_eq!(&blob[..4], [0x53, 0x54, 0x42, 0x46]);
        assert_eq!(&blob[4..6], [0, 1]);
        // Zeroed state fields, then four empty paths.
        assert_eq!(blob.len(), 21);
        assert!(blob[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut blob = Vec::new();
        sample().save(&mut blob).unwrap();
        blob[0] = 0x00;
        assert!(FrontConfig::load(&mut Cursor::new(blob)).is_err());
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut blob = Vec::new();
        sample().save(&mut blob).unwrap();
        blob[5] = 99;
        assert!(FrontConfig::load(&mut Cursor::new(blob)).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let mut blob = Vec::new();
        sample().save(&mut blob).unwrap();
        blob.truncate(blob.len() - 3);
        assert!(FrontConfig::load(&mut Cursor::new(blob)).is_err());
    }

    #[test]
    fn test_invalid_path_bytes_rejected() {
        let mut config = sample();
        config.paths[0] = "ab".to_owned();
        let mut blob = Vec::new();
        config.save(&mut blob).unwrap();
        // Corrupt the first path's content.
        blob[15] = 0xff;
        blob[16] = 0xfe;
        assert!(FrontConfig::load(&mut Cursor::new(blob)).is_err());
    }
}
