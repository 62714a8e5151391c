// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

use extalloc_storage as storage;

use storage::{
    alloc_bitmap::{AllocBitmap, BitmapWord},
    layout,
};

use clap::{self, Parser as _};
use std::{fs, io, path::PathBuf};

fn cli_parse_size(arg: &str) -> Result<u64, clap::error::Error> {
    let arg = arg.trim_start();
    let unit_pos = arg.char_indices().find(|(_pos, c)| !c.is_ascii_digit());
    let (value, unit) = match unit_pos {
        Some((unit_pos, _)) => {
            let unit = &arg[unit_pos..].trim();
            if unit.is_empty() {
                (&arg[..unit_pos], 1u64)
            } else if *unit == "K" {
                (&arg[..unit_pos], 1024u64)
            } else if *unit == "M" {
                (&arg[..unit_pos], 1024u64 * 1024)
            } else if *unit == "G" {
                (&arg[..unit_pos], 1024u64 * 1024 * 1024)
            } else {
                return Err(clap::Error::raw(
                    clap::error::ErrorKind::ValueValidation,
                    "unrecognized unit, possible values: none, K, M, G",
                ));
            }
        }
        None => (arg.trim_end(), 1),
    };

    let value = match value.parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            return Err(clap::Error::raw(
                clap::error::ErrorKind::ValueValidation,
                "invalid or too large value",
            ));
        }
    };

    value
        .checked_mul(unit)
        .ok_or_else(|| clap::Error::raw(clap::error::ErrorKind::ValueValidation, "value too large"))
}

fn cli_parse_nonzero_size(arg: &str) -> Result<u64, clap::error::Error> {
    match cli_parse_size(arg)? {
        0 => Err(clap::Error::raw(
            clap::error::ErrorKind::ValueValidation,
            "value must be non-zero",
        )),
        size => Ok(size),
    }
}

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    bitmap: CliBitmapSource,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Find a run of free Allocation Blocks.
    ///
    /// Searches from the Allocation Bitmap word containing the hint position
    /// onwards first, preferring an exact fit or otherwise the best fit nearby,
    /// and wraps around to the bitmap's beginning if needed.
    Find(CliFindArgs),

    /// List all runs of free Allocation Blocks.
    ListFree(CliListFreeArgs),
}

#[derive(clap::Args)]
struct CliBitmapSource {
    /// Allocation Bitmap file.
    #[arg(name = "bitmap", short, long, value_name = "FILE")]
    bitmap_file_path: PathBuf,

    /// Allocation Bitmap file format.
    #[arg(name = "format", long, value_name = "FORMAT", default_value = "raw")]
    bitmap_format: CliBitmapFormat,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliBitmapFormat {
    /// Little-endian 64 bit words.
    Raw,
    /// Whitespace separated hexadecimal 64 bit words.
    Hex,
}

#[derive(clap::Args)]
struct CliFindArgs {
    /// Number of contiguous free Allocation Blocks to find.
    #[arg(name = "size", short, long, value_name = "SIZE", value_parser = cli_parse_size)]
    block_count: u64,

    /// Position to search in the vicinity of [default: 0].
    #[arg(name = "near", short, long, value_name = "POS", value_parser = cli_parse_size)]
    hint: Option<u64>,
}

#[derive(clap::Args)]
struct CliListFreeArgs {
    /// Minimum length of the free runs to list [default: 1].
    #[arg(name = "min-size", short, long, value_name = "SIZE", value_parser = cli_parse_nonzero_size)]
    min_block_count: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum BitmapFormatError {
    /// The raw bitmap's length is not a multiple of the word size.
    TruncatedWord { len: usize },
    /// The hex bitmap is not valid UTF-8.
    InvalidEncoding,
    /// Some word in the hex bitmap could not be parsed.
    InvalidWord { index: usize },
}

fn parse_raw_bitmap(data: &[u8]) -> Result<Vec<BitmapWord>, BitmapFormatError> {
    const WORD_LEN: usize = (BitmapWord::BITS / 8) as usize;
    if data.len() % WORD_LEN != 0 {
        return Err(BitmapFormatError::TruncatedWord { len: data.len() });
    }

    Ok(data
        .chunks_exact(WORD_LEN)
        .map(|word| {
            let mut word_bytes = [0u8; WORD_LEN];
            word_bytes.copy_from_slice(word);
            BitmapWord::from_le_bytes(word_bytes)
        })
        .collect())
}

fn parse_hex_bitmap(data: &[u8]) -> Result<Vec<BitmapWord>, BitmapFormatError> {
    let data = std::str::from_utf8(data).map_err(|_| BitmapFormatError::InvalidEncoding)?;
    data.split_whitespace()
        .enumerate()
        .map(|(index, word)| {
            let word = word
                .strip_prefix("0x")
                .or_else(|| word.strip_prefix("0X"))
                .unwrap_or(word);
            BitmapWord::from_str_radix(word, 16).map_err(|_| BitmapFormatError::InvalidWord { index })
        })
        .collect()
}

/// Failure of a command, mapped to a distinct process exit status.
#[derive(Debug)]
enum CliError {
    BitmapIo(io::Error),
    BitmapFormat(BitmapFormatError),
    NotFound { block_count: u64, hint: u64 },
}

impl CliError {
    fn exit_status(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 1,
            Self::BitmapIo(_) => 2,
            Self::BitmapFormat(_) => 3,
        }
    }

    fn report(&self) {
        match self {
            Self::BitmapIo(e) => eprintln!("error: failed to read bitmap file: error={}", e),
            Self::BitmapFormat(e) => eprintln!("error: invalid bitmap file: error={:?}", e),
            Self::NotFound { block_count, hint } => {
                eprintln!("error: no free range of size {} found near {}", block_count, hint)
            }
        }
    }
}

fn load_bitmap(bitmap_source: &CliBitmapSource) -> Result<AllocBitmap, CliError> {
    let data = fs::read(&bitmap_source.bitmap_file_path).map_err(CliError::BitmapIo)?;
    let bitmap_words = match bitmap_source.bitmap_format {
        CliBitmapFormat::Raw => parse_raw_bitmap(&data),
        CliBitmapFormat::Hex => parse_hex_bitmap(&data),
    }
    .map_err(CliError::BitmapFormat)?;

    log::debug!(
        "loaded {} bitmap words from {}",
        bitmap_words.len(),
        bitmap_source.bitmap_file_path.display()
    );
    Ok(AllocBitmap::from_words(bitmap_words))
}

/// Run the `find` command, returning the text to print.
fn cli_find(bitmap: &AllocBitmap, cli_find_args: &CliFindArgs) -> Result<String, CliError> {
    let block_count = cli_find_args.block_count;
    let hint = cli_find_args.hint.unwrap_or(0);
    let free_range = bitmap
        .find_free_range(
            layout::AllocBlockCount::from(block_count),
            layout::AllocBlockIndex::from(hint),
        )
        .ok_or(CliError::NotFound { block_count, hint })?;
    Ok(format!(
        "position={} size={}\n",
        u64::from(free_range.begin()),
        u64::from(free_range.block_count())
    ))
}

/// Run the `list-free` command, returning the text to print.
fn cli_list_free(bitmap: &AllocBitmap, cli_list_free_args: &CliListFreeArgs) -> String {
    let min_block_count = cli_list_free_args.min_block_count.unwrap_or(1);
    let mut output = String::new();
    let mut free_ranges_count = 0u64;
    let mut total_free = 0u64;
    let mut largest_free = 0u64;
    for free_range in bitmap.iter_free_ranges(layout::AllocBlockCount::from(min_block_count)) {
        let block_count = u64::from(free_range.block_count());
        output.push_str(&format!(
            "position={} size={}\n",
            u64::from(free_range.begin()),
            block_count
        ));
        free_ranges_count += 1;
        total_free += block_count;
        largest_free = largest_free.max(block_count);
    }
    output.push_str(&format!(
        "free ranges={} total={} largest={}\n",
        free_ranges_count, total_free, largest_free
    ));
    output
}

fn run(cli: &Cli) -> Result<String, CliError> {
    let bitmap = load_bitmap(&cli.bitmap)?;
    match &cli.command {
        CliCommand::Find(cli_find_args) => cli_find(&bitmap, cli_find_args),
        CliCommand::ListFree(cli_list_free_args) => Ok(cli_list_free(&bitmap, cli_list_free_args)),
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => print!("{}", output),
        Err(e) => {
            e.report();
            std::process::exit(e.exit_status());
        }
    }
}

#[test]
fn test_cli_parse_size() {
    assert_eq!(cli_parse_size("0").unwrap(), 0);
    assert_eq!(cli_parse_size("17").unwrap(), 17);
    assert_eq!(cli_parse_size(" 2K").unwrap(), 2048);
    assert_eq!(cli_parse_size("3M").unwrap(), 3 << 20);
    assert_eq!(cli_parse_size("1G").unwrap(), 1 << 30);
    assert!(cli_parse_size("1T").is_err());
    assert!(cli_parse_size("K").is_err());
    assert!(cli_parse_size("18446744073709551615K").is_err());
    assert!(cli_parse_nonzero_size("0").is_err());
    assert_eq!(cli_parse_nonzero_size("1").unwrap(), 1);
}

#[test]
fn test_parse_raw_bitmap() {
    let mut data = Vec::new();
    data.extend_from_slice(&0x0123_4567_89ab_cdefu64.to_le_bytes());
    data.extend_from_slice(&(!0u64).to_le_bytes());
    assert_eq!(parse_raw_bitmap(&data), Ok(vec![0x0123_4567_89ab_cdef, !0]));
    assert_eq!(parse_raw_bitmap(&[]), Ok(Vec::new()));
    assert_eq!(
        parse_raw_bitmap(&data[..9]),
        Err(BitmapFormatError::TruncatedWord { len: 9 })
    );
}

#[test]
fn test_parse_hex_bitmap() {
    assert_eq!(
        parse_hex_bitmap(b"0 0xff\n  FFFFFFFFFFFFFFFF\t41\n"),
        Ok(vec![0, 0xff, !0, 0x41])
    );
    assert_eq!(
        parse_hex_bitmap(b"0 1z"),
        Err(BitmapFormatError::InvalidWord { index: 1 })
    );
    assert_eq!(
        parse_hex_bitmap(b"10000000000000000"),
        Err(BitmapFormatError::InvalidWord { index: 0 })
    );
    assert_eq!(parse_hex_bitmap(&[0xff]), Err(BitmapFormatError::InvalidEncoding));
}

#[test]
fn test_cli_definition() {
    use clap::CommandFactory as _;
    Cli::command().debug_assert();
}

#[cfg(test)]
fn test_bitmap() -> AllocBitmap {
    // Allocated blocks at 0, 6 and 20, followed by a fully allocated word.
    AllocBitmap::from_words(vec![0x41 | (1 << 20), !0])
}

#[test]
fn test_cli_find() {
    let bitmap = test_bitmap();
    let output = cli_find(
        &bitmap,
        &CliFindArgs {
            block_count: 5,
            hint: None,
        },
    )
    .unwrap();
    assert_eq!(output, "position=1 size=5\n");

    let output = cli_find(
        &bitmap,
        &CliFindArgs {
            block_count: 14,
            hint: Some(3),
        },
    )
    .unwrap();
    assert_eq!(output, "position=21 size=43\n");

    let e = cli_find(
        &bitmap,
        &CliFindArgs {
            block_count: 44,
            hint: None,
        },
    )
    .unwrap_err();
    assert!(matches!(e, CliError::NotFound { block_count: 44, hint: 0 }));
    assert_eq!(e.exit_status(), 1);

    // Hint beyond the bitmap's end.
    let e = cli_find(
        &bitmap,
        &CliFindArgs {
            block_count: 1,
            hint: Some(128),
        },
    )
    .unwrap_err();
    assert_eq!(e.exit_status(), 1);
}

#[test]
fn test_cli_list_free() {
    let bitmap = test_bitmap();
    assert_eq!(
        cli_list_free(&bitmap, &CliListFreeArgs { min_block_count: None }),
        "position=1 size=5\nposition=7 size=13\nposition=21 size=43\nfree ranges=3 total=61 largest=43\n"
    );
    assert_eq!(
        cli_list_free(
            &bitmap,
            &CliListFreeArgs {
                min_block_count: Some(6)
            }
        ),
        "position=7 size=13\nposition=21 size=43\nfree ranges=2 total=56 largest=43\n"
    );
    assert_eq!(
        cli_list_free(&AllocBitmap::from_words(vec![!0]), &CliListFreeArgs { min_block_count: None }),
        "free ranges=0 total=0 largest=0\n"
    );
}

#[test]
fn test_cli_error_exit_status() {
    let cli = Cli::parse_from([
        "extalloc-cli",
        "--bitmap",
        "/nonexistent/extalloc-bitmap",
        "find",
        "--size",
        "1",
    ]);
    let e = run(&cli).unwrap_err();
    assert!(matches!(e, CliError::BitmapIo(_)));
    assert_eq!(e.exit_status(), 2);

    let e = CliError::BitmapFormat(BitmapFormatError::TruncatedWord { len: 3 });
    assert_eq!(e.exit_status(), 3);
}
