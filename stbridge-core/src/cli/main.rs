use clap::{Arg, ArgAction, ArgMatches, Command, value_parser, ValueEnum};
use log::{info, error, LevelFilter};
use std::fs;
use std::io::{self, Write};

use stbridge_core::{
    encode_selection, probe_geometry, CoreKind, DiskFront, FileCard,
    FrontError, FrontResult, ModelBus, ACK_OK, BLOCK_SIZE,
};
use stbridge_utils::hexprint::pretty_print_hex_block;

const CORE: &str = "core";
const COUNT: &str = "count";
const DATA_FILE: &str = "data";
const DIRECT: &str = "direct";
const FLOPPY_IMAGE: &str = "floppy";
const HDD_IMAGE: &str = "hdd";
const IMAGE: &str = "IMAGE";
const LBA: &str = "lba";
const QUIET: &str = "quiet";
const SD_CARD: &str = "sd-card";
const SECTOR: &str = "sector";
const SIDE: &str = "side";
const TRACK: &str = "track";
const VERBOSITY: &str = "verbosity";

/// All supported core kinds.
#[derive(Debug, PartialEq, Eq, Copy, Clone, ValueEnum)]
enum Core {
    Mist,
    Mistery,
}

impl From<Core> for CoreKind {
    fn from(core: Core) -> Self {
        match core {
            Core::Mist => CoreKind::Mist,
            Core::Mistery => CoreKind::Mistery,
        }
    }
}

fn cli() -> Command {
    // Hack to make the build dirty when the toml changes.
    include_str!("../../Cargo.toml");

    clap::command!()
        .subcommand_required(true)
        .after_help(
            "Exercises the disk front-end against the in-process model of \
             the core. Example:\n    \
                 stbridge read --hdd disk.img --lba 0 --count 4",
        )
        .arg(Arg::new(VERBOSITY)
            .help("Specify up to three times to increase the verbosity of output.")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .value_parser(value_parser!(u8).range(..=3))
            .global(true))
        .arg(Arg::new(QUIET)
            .help("Only log errors.")
            .short('q')
            .long("quiet")
            .action(ArgAction::SetTrue)
            .conflicts_with(VERBOSITY)
            .global(true))
        .subcommand(Command::new("probe")
            .about("Run floppy geometry detection on an image.")
            .arg(Arg::new(IMAGE)
                .help("The image file to probe.")
                .action(ArgAction::Set)
                .required(true)))
        .subcommand(Command::new("read")
            .about("Mount a hard-disk image and read blocks through the \
                    emulated ACSI bus.")
            .arg(Arg::new(HDD_IMAGE)
                .help("The hard-disk image to mount on ACSI unit 0.")
                .long("hdd")
                .action(ArgAction::Set)
                .required(true))
            .arg(Arg::new(LBA)
                .help("First block to read.")
                .long("lba")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u32)))
            .arg(Arg::new(COUNT)
                .help("Number of blocks to read.")
                .long("count")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u16).range(1..=4096)))
            .arg(Arg::new(SD_CARD)
                .help("Back direct-SD mode with this card image.")
                .long("sd-card")
                .action(ArgAction::Set))
            .arg(Arg::new(DIRECT)
                .help("Enable direct-SD mode before reading.")
                .long("direct")
                .action(ArgAction::SetTrue)
                .requires(SD_CARD))
            .arg(Arg::new(CORE)
                .help("The kind of core to model.")
                .long("core")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Core))
                .ignore_case(true)
                .default_value("mist")))
        .subcommand(Command::new("write")
            .about("Mount a hard-disk image and write blocks through the \
                    emulated ACSI bus, then verify them.")
            .arg(Arg::new(HDD_IMAGE)
                .help("The hard-disk image to mount on ACSI unit 0.")
                .long("hdd")
                .action(ArgAction::Set)
                .required(true))
            .arg(Arg::new(LBA)
                .help("First block to write.")
                .long("lba")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u32)))
            .arg(Arg::new(COUNT)
                .help("Number of blocks to write.")
                .long("count")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u16).range(1..=4096)))
            .arg(Arg::new(DATA_FILE)
                .help("File holding the block data (count * 512 bytes).")
                .long("data")
                .action(ArgAction::Set)
                .required(true)))
        .subcommand(Command::new("fdc-read")
            .about("Mount a floppy image and read sectors through the \
                    emulated floppy controller.")
            .arg(Arg::new(FLOPPY_IMAGE)
                .help("The floppy image to mount on drive A.")
                .long("floppy")
                .action(ArgAction::Set)
                .required(true))
            .arg(Arg::new(TRACK)
                .help("Track number.")
                .long("track")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u8)))
            .arg(Arg::new(SECTOR)
                .help("First sector number (1-based).")
                .long("sector")
                .action(ArgAction::Set)
                .required(true)
                .value_parser(value_parser!(u8)))
            .arg(Arg::new(SIDE)
                .help("Disk side.")
                .long("side")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u8).range(..=1))
                .default_value("0"))
            .arg(Arg::new(COUNT)
                .help("Number of sectors to read.")
                .long("count")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u8).range(1..))
                .default_value("1")))
}

fn logging_format(formatter: &mut env_logger::fmt::Formatter,
                  record: &log::Record) -> io::Result<()> {
    let style = formatter.default_level_style(record.level());
    writeln!(formatter, "{:>7}  {}", style.value(record.level()), record.args())
}

/// Logging setup for normal build (not testing).
#[cfg(not(test))]
fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format(logging_format)
        .init();
}

/// Logging setup for testing build (properly captures stdout and ignores
/// multiple invocations).
#[cfg(test)]
fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format(logging_format)
        .is_test(true)
        .try_init();
}

/// A 10-byte Read(10) command block.
fn read10(lba: u32, count: u16) -> [u8; 10] {
    let mut block = [0u8; 10];
    block[0] = 0x28;
    block[2..6].copy_from_slice(&lba.to_be_bytes());
    block[7] = (count >> 8) as u8;
    block[8] = count as u8;
    block
}

/// A 10-byte Write(10) command block.
fn write10(lba: u32, count: u16) -> [u8; 10] {
    let mut block = read10(lba, count);
    block[0] = 0x2a;
    block
}

/// Queue a DMA status block announcing the given ACSI command on target 0,
/// poll once, and return the completion status.
fn acsi_exchange(front: &mut DiskFront<ModelBus>, command: &[u8; 10]) -> FrontResult<u8> {
    match front.link().core() {
        CoreKind::Mist => {
            let mut status = [0u8; 32];
            status[9..19].copy_from_slice(command);
            status[19] = 0x01;
            front.link_mut().bus_mut().queue_status(&status);
        }
        CoreKind::Mistery => {
            let mut status = [0u8; 16];
            status[..10].copy_from_slice(command);
            status[10] = 0x01;
            front.link_mut().bus_mut().queue_status(&status);
        }
    }
    front.poll_once();

    front.link().bus().last_ack().ok_or_else(|| {
        FrontError::new("No device answered the request.")
    })
}

/// Queue a DMA status block announcing a floppy read on drive A, poll
/// once, and return the completion status.
fn fdc_exchange(front: &mut DiskFront<ModelBus>, track: u8, sector: u8,
                side: u8, count: u8) -> FrontResult<u8> {
    let mut status = [0u8; 32];
    status[3] = count;
    status[4] = if count > 1 { 0x90 } else { 0x80 };
    status[5] = track;
    status[6] = sector;
    status[8] = encode_selection(1, side) | 0x01;
    front.link_mut().bus_mut().queue_status(&status);
    front.poll_once();

    front.link().bus().last_ack().ok_or_else(|| {
        FrontError::new("The floppy request was not answered; is a disk mounted?")
    })
}

fn check_status(status: u8, sense: u8) -> FrontResult<()> {
    if status == ACK_OK {
        Ok(())
    } else {
        Err(FrontError::new(format!(
            "Command failed: status {:#04x}, sense {:#04x}.", status, sense)))
    }
}

fn probe(args: &ArgMatches) -> FrontResult<()> {
    let path = args.get_one::<String>(IMAGE).unwrap();
    let geometry = probe_geometry(path)?;
    if geometry.spt == 0 {
        println!("{}: unrecognised layout ({} side(s))", path, geometry.sides);
    } else {
        println!("{}: {} side(s), {} sectors per track",
                 path, geometry.sides, geometry.spt);
    }
    Ok(())
}

fn read_blocks(args: &ArgMatches) -> FrontResult<()> {
    let image = args.get_one::<String>(HDD_IMAGE).unwrap();
    let lba = *args.get_one::<u32>(LBA).unwrap();
    let count = *args.get_one::<u16>(COUNT).unwrap();
    let core = *args.get_one::<Core>(CORE).unwrap();

    let mut front = DiskFront::new(ModelBus::new(), core.into());
    front.attach_hdd(0, image)?;
    if args.get_flag(DIRECT) {
        let card = args.get_one::<String>(SD_CARD).unwrap();
        front.attach_card(Box::new(FileCard::open(card)?));
        front.set_direct_sd(true)?;
    }

    let status = acsi_exchange(&mut front, &read10(lba, count))?;
    check_status(status, front.sense(0))?;

    let bytes = count as usize * BLOCK_SIZE;
    println!("{}", pretty_print_hex_block(&front.link().bus().ram()[..bytes],
                                          lba as usize * BLOCK_SIZE));
    println!("Completion status {:#04x}; read {} block(s) from block {}.",
             status, count, lba);
    Ok(())
}

fn write_blocks(args: &ArgMatches) -> FrontResult<()> {
    let image = args.get_one::<String>(HDD_IMAGE).unwrap();
    let lba = *args.get_one::<u32>(LBA).unwrap();
    let count = *args.get_one::<u16>(COUNT).unwrap();
    let data_path = args.get_one::<String>(DATA_FILE).unwrap();

    let data = fs::read(data_path)
        .map_err(|e| FrontError::new(format!(
            "Couldn't read data file '{}': {}", data_path, e)))?;
    let bytes = count as usize * BLOCK_SIZE;
    if data.len() != bytes {
        return Err(FrontError::new(format!(
            "'{}' holds {} bytes, but {} block(s) need {}.",
            data_path, data.len(), count, bytes)));
    }

    let mut front = DiskFront::new(ModelBus::new(), CoreKind::Mist);
    front.attach_hdd(0, image)?;
    front.link_mut().bus_mut().ram_mut()[..bytes].copy_from_slice(&data);

    let status = acsi_exchange(&mut front, &write10(lba, count))?;
    check_status(status, front.sense(0))?;

    // Read the image back to prove the blocks landed.
    let written = fs::read(image)
        .map_err(|e| FrontError::new(format!(
            "Couldn't read back '{}': {}", image, e)))?;
    let start = lba as usize * BLOCK_SIZE;
    if written.get(start..start + bytes) != Some(data.as_slice()) {
        return Err(FrontError::new("Written blocks did not verify."));
    }
    println!("Completion status {:#04x}; wrote and verified {} block(s) at block {}.",
             status, count, lba);
    Ok(())
}

fn read_sectors(args: &ArgMatches) -> FrontResult<()> {
    let image = args.get_one::<String>(FLOPPY_IMAGE).unwrap();
    let track = *args.get_one::<u8>(TRACK).unwrap();
    let sector = *args.get_one::<u8>(SECTOR).unwrap();
    let side = *args.get_one::<u8>(SIDE).unwrap();
    let count = *args.get_one::<u8>(COUNT).unwrap();

    let mut front = DiskFront::new(ModelBus::new(), CoreKind::Mist);
    front.insert_floppy(0, image)?;
    let geometry = front.devices().geometry(0);
    info!("{}: {} side(s), {} sectors per track",
          image, geometry.sides, geometry.spt);

    let status = fdc_exchange(&mut front, track, sector, side, count)?;
    check_status(status, 0)?;

    let bytes = count as usize * BLOCK_SIZE;
    println!("{}", pretty_print_hex_block(&front.link().bus().ram()[..bytes], 0));
    println!("Completion status {:#04x}; read {} sector(s) from track {}, side {}.",
             status, count, track, side);
    Ok(())
}

/// Main run function; returns an exit code.
fn run(args: ArgMatches) -> u8 {
    return match _run(args) {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    };

    fn _run(args: ArgMatches) -> FrontResult<()> {
        // Set up logging.
        let log_level = if args.get_flag(QUIET) {
            LevelFilter::Error
        } else {
            match args.get_count(VERBOSITY) {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                3 => LevelFilter::Trace,
                _ => unreachable!(),
            }
        };
        init_logging(log_level);

        match args.subcommand() {
            Some(("probe", sub)) => probe(sub),
            Some(("read", sub)) => read_blocks(sub),
            Some(("write", sub)) => write_blocks(sub),
            Some(("fdc-read", sub)) => read_sectors(sub),
            _ => unreachable!(),
        }
    }
}

fn main() {
    let args = cli().get_matches();
    std::process::exit(run(args).into());
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    macro_rules! invoke {
        ($($args:expr),+) => {{
            let args = cli().try_get_matches_from(
                    vec!["stbridge".to_string(), $($args.to_string()),*])
                .unwrap();
            run(args)
        }}
    }

    /// A temporary image with every block filled with its own number.
    fn patterned_image(blocks: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for n in 0..blocks {
            file.write_all(&[n as u8; BLOCK_SIZE]).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_probe_success() {
        let image = patterned_image(1440);
        let ret = invoke!("probe", image.path().to_str().unwrap());
        assert_eq!(ret, 0);
    }

    #[test]
    fn test_probe_missing_file() {
        let ret = invoke!("probe", "/nonexistent/image.st");
        assert_eq!(ret, 1);
    }

    #[test]
    fn test_read_success() {
        let image = patterned_image(64);
        let ret = invoke!("read", "--hdd", image.path().to_str().unwrap(),
                          "--lba", "3", "--count", "2");
        assert_eq!(ret, 0);
    }

    /// Reading past the end of the image reports the protocol failure.
    #[test]
    fn test_read_beyond_end() {
        let image = patterned_image(64);
        let ret = invoke!("read", "--hdd", image.path().to_str().unwrap(),
                          "--lba", "64", "--count", "1");
        assert_eq!(ret, 1);
    }

    #[test]
    fn test_read_mistery_core() {
        let image = patterned_image(64);
        let ret = invoke!("read", "--hdd", image.path().to_str().unwrap(),
                          "--lba", "0", "--count", "4", "--core", "mistery");
        assert_eq!(ret, 0);
    }

    #[test]
    fn test_read_direct_sd() {
        let image = patterned_image(16);
        let card = patterned_image(64);
        let ret = invoke!("read", "--hdd", image.path().to_str().unwrap(),
                          "--sd-card", card.path().to_str().unwrap(),
                          "--direct", "--lba", "20", "--count", "1");
        assert_eq!(ret, 0);
    }

    #[test]
    fn test_write_round_trip() {
        let image = patterned_image(64);
        let mut data = NamedTempFile::new().unwrap();
        data.write_all(&[0x5a; 2 * BLOCK_SIZE]).unwrap();
        data.flush().unwrap();

        let ret = invoke!("write", "--hdd", image.path().to_str().unwrap(),
                          "--lba", "10", "--count", "2",
                          "--data", data.path().to_str().unwrap());
        assert_eq!(ret, 0);

        let content = fs::read(image.path()).unwrap();
        assert!(content[10 * BLOCK_SIZE..12 * BLOCK_SIZE]
            .iter()
            .all(|&b| b == 0x5a));
    }

    /// A data file of the wrong length is rejected before anything moves.
    #[test]
    fn test_write_bad_data_length() {
        let image = patterned_image(64);
        let mut data = NamedTempFile::new().unwrap();
        data.write_all(&[0u8; 100]).unwrap();
        data.flush().unwrap();

        let ret = invoke!("write", "--hdd", image.path().to_str().unwrap(),
                          "--lba", "0", "--count", "1",
                          "--data", data.path().to_str().unwrap());
        assert_eq!(ret, 1);

        let content = fs::read(image.path()).unwrap();
        assert!(content[..BLOCK_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fdc_read_success() {
        let image = patterned_image(1440);
        let ret = invoke!("fdc-read", "--floppy", image.path().to_str().unwrap(),
                          "--track", "1", "--sector", "1");
        assert_eq!(ret, 0);
    }

    #[test]
    fn test_fdc_read_missing_image() {
        let ret = invoke!("fdc-read", "--floppy", "/nonexistent/disk.st",
                          "--track", "0", "--sector", "1");
        assert_eq!(ret, 1);
    }
}
