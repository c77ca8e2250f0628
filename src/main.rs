// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint: the boot-image manager front-end over the imxforge
// library. Exit codes: 0 success, 1 usage error, 2 input/parse error
// (3 is reserved for device front-ends).

use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Deserializer};

use imxforge::dcd::{text::parse_u32, SegDcd};
use imxforge::image::{
    BootImage, BootImg2, BootImg3a, BootImg3b, ImageKind, ParseHint, SegCsf, Variant,
};
use imxforge::srk::SrkTable;

const EXIT_USAGE: i32 = 1;
const EXIT_INPUT: i32 = 2;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "imxforge",
    version = VERSION,
    about = "i.MX boot image manager: inspect, create, extract and convert boot images"
)]
struct Cli {
    #[arg(
        short = 'd',
        long = "debug",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=2),
        long_help = "Debug verbosity: 0 quiet, 1 operation tracing, 2 full transfer dumps."
    )]
    debug: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TypeArg {
    Auto,
    V2,
    V2b,
    V3a,
    V3b,
}

impl TypeArg {
    fn hint(self) -> ParseHint {
        match self {
            TypeArg::Auto => ParseHint::Auto,
            TypeArg::V2 => ParseHint::Only(Variant::V2),
            TypeArg::V2b => ParseHint::Only(Variant::V2b),
            TypeArg::V3a => ParseHint::Only(Variant::V3a),
            TypeArg::V3b => ParseHint::Only(Variant::V3b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DcdFormat {
    Txt,
    Bin,
}

fn uint_arg(text: &str) -> Result<u32, String> {
    parse_u32(text).ok_or_else(|| format!("not a valid unsigned value: {text}"))
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List boot image content
    Info {
        file: PathBuf,
        #[arg(short = 't', long = "type", value_enum, default_value_t = TypeArg::Auto)]
        image_type: TypeArg,
        #[arg(short = 'o', long = "offset", value_parser = uint_arg, default_value = "0")]
        offset: u32,
        #[arg(short = 's', long = "step", value_parser = uint_arg, default_value = "0x100")]
        step: u32,
        #[arg(long = "json", action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Create a boot image from a description file (*.yml)
    Create {
        infile: PathBuf,
        outfile: PathBuf,
    },
    /// Create a v2/v2b boot image directly from flags
    Create2 {
        #[arg(value_parser = uint_arg)]
        address: u32,
        appfile: PathBuf,
        outfile: PathBuf,
        #[arg(short = 'D', long = "dcd", help = "DCD file (*.txt or *.bin)")]
        dcd: Option<PathBuf>,
        #[arg(short = 'c', long = "csf", help = "CSF file (*.bin)")]
        csf: Option<PathBuf>,
        #[arg(short = 'o', long = "offset", value_parser = uint_arg, default_value = "0x400")]
        offset: u32,
        #[arg(short = 'v', long = "version", value_parser = uint_arg, default_value = "0x41")]
        version: u32,
        #[arg(short = 'p', long = "plugin", action = ArgAction::SetTrue)]
        plugin: bool,
        #[arg(long = "v2b", action = ArgAction::SetTrue, help = "Use the v8M container defaults")]
        v2b: bool,
    },
    /// Extract boot image content next to the input file
    Extract {
        file: PathBuf,
        #[arg(short = 't', long = "type", value_enum, default_value_t = TypeArg::Auto)]
        image_type: TypeArg,
        #[arg(short = 'o', long = "offset", value_parser = uint_arg, default_value = "0")]
        offset: u32,
        #[arg(short = 's', long = "step", value_parser = uint_arg, default_value = "0x100")]
        step: u32,
        #[arg(short = 'e', long = "embedded", action = ArgAction::SetTrue,
              help = "Embed the DCD program into the description file")]
        embedded: bool,
    },
    /// Convert a DCD between text and binary form
    Dcd {
        infile: PathBuf,
        outfile: PathBuf,
        #[arg(short = 'i', long = "infmt", value_enum, default_value_t = DcdFormat::Txt)]
        infmt: DcdFormat,
        #[arg(short = 'o', long = "outfmt", value_enum, default_value_t = DcdFormat::Bin)]
        outfmt: DcdFormat,
    },
    /// Generate the SRK table and fuse block from PEM certificates
    Srk {
        #[arg(required = true)]
        certs: Vec<PathBuf>,
        #[arg(short = 't', long = "table", help = "Output file for the SRK table")]
        table: Option<PathBuf>,
        #[arg(short = 'f', long = "fuses", help = "Output file for the fuse block")]
        fuses: Option<PathBuf>,
        #[arg(long = "digest-len", value_parser = uint_arg, default_value = "32",
              help = "Bytes kept of each key digest")]
        digest_len: u32,
    },
}

////////////////////////////////////////////////////////////////////////////
// Image description file (*.yml)
////////////////////////////////////////////////////////////////////////////

fn de_opt_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    use serde::de::Error;
    let value = Option::<serde_yaml::Value>::deserialize(de)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::Number(number)) => number
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom("number out of range")),
        Some(serde_yaml::Value::String(text)) => parse_u32(&text)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("not a valid unsigned value: {text}"))),
        Some(_) => Err(D::Error::custom("expected a number")),
    }
}

fn de_flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    use serde::de::Error;
    let value = serde_yaml::Value::deserialize(de)?;
    match value {
        serde_yaml::Value::Bool(flag) => Ok(flag),
        serde_yaml::Value::String(text) => match text.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" => Ok(false),
            other => Err(D::Error::custom(format!("not a flag value: {other}"))),
        },
        _ => Err(D::Error::custom("expected a flag")),
    }
}

#[derive(Debug, Deserialize)]
struct ImageDescription {
    #[serde(rename = "TARGET")]
    target: String,
    #[serde(rename = "PLUGIN", default, deserialize_with = "de_flag")]
    plugin: bool,
    #[serde(rename = "OFFSET", default, deserialize_with = "de_opt_u32")]
    offset: Option<u32>,
    #[serde(rename = "ADDRESS", default, deserialize_with = "de_opt_u32")]
    address: Option<u32>,
    #[serde(rename = "VERSION", default, deserialize_with = "de_opt_u32")]
    version: Option<u32>,
    #[serde(rename = "DCD", default)]
    dcd: Option<DcdEntry>,
    #[serde(rename = "IMG", default)]
    img: Vec<ImgEntry>,
}

#[derive(Debug, Deserialize)]
struct DcdEntry {
    #[serde(rename = "TYPE", default)]
    kind: Option<String>,
    #[serde(rename = "PATH", default)]
    path: Option<String>,
    #[serde(rename = "DATA", default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImgEntry {
    #[serde(rename = "TYPE")]
    kind: String,
    #[serde(rename = "ADDR", default, deserialize_with = "de_opt_u32")]
    addr: Option<u32>,
    #[serde(rename = "PATH")]
    path: String,
}

////////////////////////////////////////////////////////////////////////////
// Command implementations
////////////////////////////////////////////////////////////////////////////

type CmdResult = Result<(), (i32, String)>;

fn input_err(err: impl std::fmt::Display) -> (i32, String) {
    (EXIT_INPUT, err.to_string())
}

fn read_binary(path: &Path) -> Result<Vec<u8>, (i32, String)> {
    fs::read(path).map_err(|err| input_err(format!("{}: {err}", path.display())))
}

fn read_text(path: &Path) -> Result<String, (i32, String)> {
    fs::read_to_string(path).map_err(|err| input_err(format!("{}: {err}", path.display())))
}

fn write_binary(path: &Path, data: &[u8]) -> CmdResult {
    fs::write(path, data).map_err(|err| input_err(format!("{}: {err}", path.display())))
}

/// Resolve a description-relative path: as given, then next to the yml.
fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.exists() || path.is_absolute() {
        path
    } else {
        base_dir.join(raw)
    }
}

fn load_dcd_file(path: &Path) -> Result<SegDcd, (i32, String)> {
    let text_form = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if text_form {
        SegDcd::parse_text(&read_text(path)?).map_err(input_err)
    } else {
        SegDcd::parse(&read_binary(path)?).map_err(input_err)
    }
}

fn cmd_info(file: &Path, image_type: TypeArg, offset: u32, step: u32, json: bool) -> CmdResult {
    let data = read_binary(file)?;
    let data = data.get(offset as usize..).unwrap_or(&[]);
    let mut image =
        BootImage::parse(data, image_type.hint(), step as usize).map_err(input_err)?;
    if json {
        let report = serde_json::json!({
            "variant": format!("{:?}", image.variant()),
            "address": format!("0x{:08X}", image.address()),
            "offset": format!("0x{:X}", image.offset()),
            "ivt": format!("0x{:08X}", image.self_address()),
            "dcd_commands": image.dcd().map(|dcd| dcd.commands().len()).unwrap_or(0),
        });
        println!("{report:#}");
    } else {
        println!("{}", image.info());
    }
    Ok(())
}

fn cmd_create(infile: &Path, outfile: &Path) -> CmdResult {
    let text = read_text(infile)?;
    let desc: ImageDescription = serde_yaml::from_str(&text).map_err(input_err)?;
    let base_dir = infile.parent().unwrap_or(Path::new(".")).to_path_buf();

    let dcd = match &desc.dcd {
        Some(entry) => Some(load_dcd_entry(&base_dir, entry)?),
        None => None,
    };

    let raw = match desc.target.to_ascii_lowercase().as_str() {
        "imx67" | "imx8m" => {
            let version = desc.version.unwrap_or(0x41) as u8;
            let mut image = BootImg2::new(
                desc.address.unwrap_or(0),
                desc.offset.unwrap_or(0x400),
                version,
                desc.plugin,
            );
            image.dcd = dcd;
            for entry in &desc.img {
                let kind = parse_image_kind(&entry.kind)?;
                if kind != ImageKind::App {
                    return Err(input_err(format!(
                        "TARGET {} only takes APP images, got {}",
                        desc.target, entry.kind
                    )));
                }
                image.set_app(read_binary(&resolve_path(&base_dir, &entry.path))?);
            }
            image.export().map_err(input_err)?
        }
        "imx8qxp" => {
            let mut image = BootImg3a::new(desc.offset.unwrap_or(0x400), 0x43);
            image.dcd = dcd;
            add_images_3a(&mut image, &desc, &base_dir)?;
            image.export().map_err(input_err)?
        }
        "imx8qm" => {
            let mut image = BootImg3b::new(desc.offset.unwrap_or(0x400), 0x43);
            image.dcd = dcd;
            add_images_3b(&mut image, &desc, &base_dir)?;
            image.export().map_err(input_err)?
        }
        other => return Err(input_err(format!("unsupported TARGET: {other}"))),
    };

    write_binary(outfile, &raw)?;
    println!("Image successfully created: {}", outfile.display());
    Ok(())
}

fn load_dcd_entry(base_dir: &Path, entry: &DcdEntry) -> Result<SegDcd, (i32, String)> {
    if let Some(path) = &entry.path {
        let path = resolve_path(base_dir, path);
        let text_form = entry
            .kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("txt"))
            .unwrap_or_else(|| {
                path.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false)
            });
        if text_form {
            SegDcd::parse_text(&read_text(&path)?).map_err(input_err)
        } else {
            SegDcd::parse(&read_binary(&path)?).map_err(input_err)
        }
    } else if let Some(data) = &entry.data {
        SegDcd::parse_text(data).map_err(input_err)
    } else {
        Err(input_err("DCD->PATH or DCD->DATA must be defined"))
    }
}

fn parse_image_kind(name: &str) -> Result<ImageKind, (i32, String)> {
    ImageKind::from_name(name).ok_or_else(|| input_err(format!("unsupported IMG->TYPE: {name}")))
}

fn add_images_3a(
    image: &mut BootImg3a,
    desc: &ImageDescription,
    base_dir: &Path,
) -> CmdResult {
    for entry in &desc.img {
        let kind = parse_image_kind(&entry.kind)?;
        let data = read_binary(&resolve_path(base_dir, &entry.path))?;
        image
            .add_image(data, kind, u64::from(entry.addr.unwrap_or(0)))
            .map_err(input_err)?;
    }
    Ok(())
}

fn add_images_3b(
    image: &mut BootImg3b,
    desc: &ImageDescription,
    base_dir: &Path,
) -> CmdResult {
    for entry in &desc.img {
        let kind = parse_image_kind(&entry.kind)?;
        let data = read_binary(&resolve_path(base_dir, &entry.path))?;
        image
            .add_image(data, kind, u64::from(entry.addr.unwrap_or(0)))
            .map_err(input_err)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_create2(
    address: u32,
    appfile: &Path,
    outfile: &Path,
    dcd: Option<&Path>,
    csf: Option<&Path>,
    offset: u32,
    version: u32,
    plugin: bool,
    v2b: bool,
) -> CmdResult {
    let mut image = if v2b {
        BootImg2::new_v2b(address, offset, plugin)
    } else {
        BootImg2::new(address, offset, version as u8, plugin)
    };
    image.set_app(read_binary(appfile)?);
    if let Some(path) = dcd {
        image.dcd = Some(load_dcd_file(path)?);
    }
    if let Some(path) = csf {
        image.csf = Some(SegCsf::from_raw(read_binary(path)?).map_err(input_err)?);
    }
    write_binary(outfile, &image.export().map_err(input_err)?)?;
    println!("Image successfully created: {}", outfile.display());
    Ok(())
}

fn cmd_extract(file: &Path, image_type: TypeArg, offset: u32, step: u32, embedded: bool) -> CmdResult {
    let data = read_binary(file)?;
    let data = data.get(offset as usize..).unwrap_or(&[]);
    let image = BootImage::parse(data, image_type.hint(), step as usize).map_err(input_err)?;

    let out_dir = file.with_extension("ex");
    fs::create_dir_all(&out_dir).map_err(|err| input_err(format!("{}: {err}", out_dir.display())))?;

    let mut description = String::new();
    description.push_str("# Boot image description\n");

    match &image {
        BootImage::V2(v2) => {
            description.push_str(&format!(
                "TARGET: {}\n",
                if v2.version >= 0x43 { "imx8m" } else { "imx67" }
            ));
            description.push_str(&format!("OFFSET: 0x{:X}\n", v2.offset));
            description.push_str(&format!("ADDRESS: 0x{:08X}\n", v2.address));
            description.push_str(&format!("VERSION: 0x{:x}\n", v2.version));
            description.push_str(&format!("PLUGIN: {}\n", if v2.plugin { "yes" } else { "no" }));
            write_binary(&out_dir.join("app.bin"), v2.app())?;
            push_dcd_section(&mut description, v2.dcd.as_ref(), &out_dir, embedded)?;
            description.push_str("\nIMG:\n  - TYPE: APP\n    PATH: app.bin\n");
        }
        BootImage::V3a(v3a) => {
            description.push_str("TARGET: imx8qxp\n");
            description.push_str(&format!("OFFSET: 0x{:X}\n", v3a.offset));
            push_dcd_section(&mut description, v3a.dcd.as_ref(), &out_dir, embedded)?;
            description.push_str("\nIMG:\n");
            for container in 0..2 {
                for ix in 0..v3a.descriptors(container).images_count as usize {
                    let kind = v3a.image_kind(container, ix);
                    let name = format!("{}-{container}.bin", kind.name().to_ascii_lowercase());
                    write_binary(&out_dir.join(&name), v3a.payload(container, ix))?;
                    let ids = v3a.descriptors(container).images[ix];
                    description.push_str(&format!(
                        "  - TYPE: {}\n    ADDR: 0x{:X}\n    PATH: {name}\n",
                        kind.name(),
                        ids.image_entry
                    ));
                }
            }
        }
        BootImage::V3b(v3b) => {
            description.push_str("TARGET: imx8qm\n");
            description.push_str(&format!("OFFSET: 0x{:X}\n", v3b.offset));
            push_dcd_section(&mut description, v3b.dcd.as_ref(), &out_dir, embedded)?;
            description.push_str("\nIMG:\n");
            for container in 0..2 {
                for ix in 0..v3b.descriptors(container).images_count as usize {
                    let kind = v3b.image_kind(container, ix);
                    let name = format!("{}-{container}.bin", kind.name().to_ascii_lowercase());
                    write_binary(&out_dir.join(&name), v3b.payload(container, ix))?;
                    let ids = v3b.descriptors(container).images[ix];
                    description.push_str(&format!(
                        "  - TYPE: {}\n    ADDR: 0x{:X}\n    PATH: {name}\n",
                        kind.name(),
                        ids.image_entry
                    ));
                }
            }
            if !v3b.scd_payload().is_empty() {
                write_binary(&out_dir.join("scd-0.bin"), v3b.scd_payload())?;
                description.push_str("  - TYPE: SCD\n    PATH: scd-0.bin\n");
            }
        }
    }

    write_binary(&out_dir.join("image.yml"), description.as_bytes())?;
    println!("Image successfully extracted: {}", out_dir.display());
    Ok(())
}

fn push_dcd_section(
    description: &mut String,
    dcd: Option<&SegDcd>,
    out_dir: &Path,
    embedded: bool,
) -> CmdResult {
    let Some(dcd) = dcd else {
        return Ok(());
    };
    description.push_str("\nDCD:\n  TYPE: TXT\n");
    if embedded {
        description.push_str("  DATA: |\n");
        for line in dcd.export_text().lines() {
            description.push_str(&format!("    {line}\n"));
        }
    } else {
        description.push_str("  PATH: dcd.txt\n");
        write_binary(&out_dir.join("dcd.txt"), dcd.export_text().as_bytes())?;
    }
    Ok(())
}

fn cmd_dcd(infile: &Path, outfile: &Path, infmt: DcdFormat, outfmt: DcdFormat) -> CmdResult {
    let dcd = match infmt {
        DcdFormat::Txt => SegDcd::parse_text(&read_text(infile)?).map_err(input_err)?,
        DcdFormat::Bin => SegDcd::parse(&read_binary(infile)?).map_err(input_err)?,
    };
    match outfmt {
        DcdFormat::Txt => write_binary(outfile, dcd.export_text().as_bytes())?,
        DcdFormat::Bin => write_binary(outfile, &dcd.export())?,
    }
    println!("Conversion successful: {}", outfile.display());
    Ok(())
}

fn cmd_srk(
    certs: &[PathBuf],
    table_out: Option<&Path>,
    fuses_out: Option<&Path>,
    digest_len: u32,
) -> CmdResult {
    let mut texts = Vec::with_capacity(certs.len());
    for path in certs {
        texts.push(read_text(path)?);
    }
    let table = SrkTable::from_certificates(&texts).map_err(input_err)?;
    match table_out {
        Some(path) => write_binary(path, &table.export())?,
        None => println!("SRK table: {} bytes", table.export().len()),
    }
    let digest_len = (digest_len as usize).min(32);
    match fuses_out {
        Some(path) => write_binary(path, &table.fuses(digest_len))?,
        None => {
            for (ix, item) in table.items().iter().enumerate() {
                let digest = item.digest();
                println!(
                    "SRK{ix}: {}",
                    imxforge::core::bytes::hexstr(&digest[..digest_len])
                );
            }
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> CmdResult {
    match &cli.command {
        Command::Info {
            file,
            image_type,
            offset,
            step,
            json,
        } => cmd_info(file, *image_type, *offset, *step, *json),
        Command::Create { infile, outfile } => cmd_create(infile, outfile),
        Command::Create2 {
            address,
            appfile,
            outfile,
            dcd,
            csf,
            offset,
            version,
            plugin,
            v2b,
        } => cmd_create2(
            *address,
            appfile,
            outfile,
            dcd.as_deref(),
            csf.as_deref(),
            *offset,
            *version,
            *plugin,
            *v2b,
        ),
        Command::Extract {
            file,
            image_type,
            offset,
            step,
            embedded,
        } => cmd_extract(file, *image_type, *offset, *step, *embedded),
        Command::Dcd {
            infile,
            outfile,
            infmt,
            outfmt,
        } => cmd_dcd(infile, outfile, *infmt, *outfmt),
        Command::Srk {
            certs,
            table,
            fuses,
            digest_len,
        } => cmd_srk(certs, table.as_deref(), fuses.as_deref(), *digest_len),
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap renders --help/--version through the error path as well
            if err.use_stderr() {
                let _ = err.print();
                std::process::exit(EXIT_USAGE);
            }
            let _ = err.print();
            return;
        }
    };

    if cli.debug > 0 {
        let level = if cli.debug == 1 {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Debug
        };
        env_logger::Builder::new().filter_level(level).init();
    }

    if let Err((code, message)) = run(&cli) {
        eprintln!("ERROR: {message}");
        std::process::exit(code);
    }
}
