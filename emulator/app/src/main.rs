/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains main entrypoint for the OTP image tool.

--*/

mod config;
mod driver;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use config::{OtpOverrides, ToolConfig};
use driver::{OtpDriver, OtpInfo};
use emulator_otp_ctrl::{
    LcState, OtpArgs, OtpImage, PartitionId, DEFAULT_DIGEST_CONST, DEFAULT_DIGEST_IV,
};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::io::{self, Write};
use std::path::PathBuf;
use strum::IntoEnumIterator;

#[derive(Parser)]
#[command(version, about = "Create, inspect and program OTP images", long_about = None)]
struct Cli {
    /// TOML file with OTP settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// OTP image path
    #[arg(short, long, global = true)]
    image: Option<PathBuf>,

    /// Do not write programmed words back to the image
    #[arg(long, global = true, default_value_t = false)]
    read_only: bool,

    /// Clock ticks per simulated microsecond
    #[arg(long, global = true)]
    ticks_per_us: Option<u64>,

    /// Seed for the entropy source
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[arg(long, global = true, default_value_t = LevelFilter::Warn)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blank image
    Create {
        /// Image format version
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=2))]
        format: u32,

        /// Digest IV stored in a version 2 header
        #[arg(long, value_parser = maybe_hex::<u64>)]
        digest_iv: Option<u64>,

        /// Digest finalization constant stored in a version 2 header
        #[arg(long, value_parser = maybe_hex::<u128>)]
        digest_const: Option<u128>,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Power up the controller and report its state
    Info {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Read a word through the direct access interface
    Read {
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
    },
    /// Program a word through the direct access interface
    Write {
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,

        #[arg(value_parser = maybe_hex::<u64>)]
        value: u64,
    },
    /// Compute and program the hardware digest of a partition
    Digest {
        #[arg(value_parser = parse_partition)]
        partition: PartitionId,
    },
    /// Program the life cycle partition
    LcProgram {
        #[arg(value_parser = parse_lc_state)]
        state: LcState,

        #[arg(long)]
        count: u32,
    },
    /// Derive an SRAM scrambling key
    SramKey,
}

fn parse_partition(s: &str) -> Result<PartitionId, String> {
    let name = s.replace('-', "_");
    PartitionId::iter()
        .find(|id| id.to_string().eq_ignore_ascii_case(&name))
        .ok_or_else(|| format!("unknown partition {s}"))
}

fn parse_lc_state(s: &str) -> Result<LcState, String> {
    s.replace('-', "_")
        .parse()
        .map_err(|_| format!("unknown life cycle state {s}"))
}

impl Cli {
    fn otp_args(&self) -> Result<OtpArgs> {
        let config = match &self.config {
            Some(path) => ToolConfig::load(path)?,
            None => ToolConfig::default(),
        };
        let overrides = OtpOverrides {
            image: self.image.clone(),
            read_only: self.read_only,
            ticks_per_us: self.ticks_per_us,
            seed: self.seed,
        };
        Ok(overrides.apply(config.otp))
    }
}

fn create(
    args: &OtpArgs,
    format: u32,
    digest_iv: Option<u64>,
    digest_const: Option<u128>,
    force: bool,
) -> Result<PathBuf> {
    let Some(path) = args.file_name.clone() else {
        bail!("no OTP image given, pass --image or set otp.file_name in the config");
    };
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    let image = if format == 1 {
        if digest_iv.is_some() || digest_const.is_some() {
            bail!("version 1 images carry no digest parameters");
        }
        OtpImage::blank_v1()
    } else {
        OtpImage::blank_v2(
            digest_iv.unwrap_or(DEFAULT_DIGEST_IV),
            digest_const.unwrap_or(DEFAULT_DIGEST_CONST),
        )
    };
    image
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn print_info(info: &OtpInfo, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "image version {}, ECC {}",
        info.version,
        if info.ecc { "enabled" } else { "disabled" }
    )?;
    writeln!(
        out,
        "life cycle {} count {} (lc valid {}, secrets valid {})",
        info.life_cycle, info.transition_count, info.lc_valid, info.secret_valid
    )?;
    writeln!(out, "device id   {}", info.device_id)?;
    writeln!(out, "manuf state {}", info.manuf_state)?;
    writeln!(
        out,
        "soc dbg state {:#010x}, sram ifetch {:#04x}",
        info.soc_dbg_state, info.en_sram_ifetch
    )?;
    for token in &info.tokens {
        writeln!(
            out,
            "token {:<12} {} {}",
            token.name,
            token.value,
            if token.valid { "valid" } else { "invalid" }
        )?;
    }
    writeln!(
        out,
        "{:<24} {:>6} {:>5}  L F RL WL {:<16} ERROR",
        "PARTITION", "OFFSET", "SIZE", "DIGEST"
    )?;
    let flag = |set: bool| if set { 'x' } else { '.' };
    for part in &info.partitions {
        writeln!(
            out,
            "{:<24} {:#06x} {:>5}  {} {}  {}  {} {} {}",
            part.name,
            part.offset,
            part.size,
            flag(part.locked),
            flag(part.failed),
            flag(part.read_lock),
            flag(part.write_lock),
            part.digest,
            part.error
        )?;
    }
    Ok(())
}

fn run(command: Commands, args: OtpArgs, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Create {
            format,
            digest_iv,
            digest_const,
            force,
        } => {
            let path = create(&args, format, digest_iv, digest_const, force)?;
            log::info!("created {}", path.display());
        }
        Commands::Info { json } => {
            let info = OtpDriver::open(args)?.info();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                print_info(&info, out)?;
            }
        }
        Commands::Read { address } => {
            let value = OtpDriver::open(args)?.read(address)?;
            let wide = PartitionId::from_address(address as usize)
                .is_some_and(|id| id.desc().is_wide_address(address as usize));
            if wide {
                writeln!(out, "{value:#018x}")?;
            } else {
                writeln!(out, "{:#010x}", value as u32)?;
            }
        }
        Commands::Write { address, value } => {
            OtpDriver::open(args)?.write(address, value)?;
        }
        Commands::Digest { partition } => {
            let mut driver = OtpDriver::open(args)?;
            driver.digest(partition)?;
            if let Some(digest) = driver.stored_digest(partition) {
                writeln!(out, "{partition} digest {digest:016x}")?;
            }
        }
        Commands::LcProgram { state, count } => {
            OtpDriver::open(args)?.lc_program(state, count)?;
            writeln!(out, "life cycle {state} count {count}")?;
        }
        Commands::SramKey => {
            let key = OtpDriver::open(args)?.sram_key()?;
            writeln!(out, "key   {}", hex::encode(key.seed))?;
            writeln!(out, "nonce {}", hex::encode(key.nonce))?;
            writeln!(out, "seed valid {}", key.seed_valid)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    SimpleLogger::new().with_level(cli.log_level).init()?;
    let args = cli.otp_args()?;
    run(cli.command, args, &mut io::stdout().lock())
}
