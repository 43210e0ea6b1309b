use clap::{Args as ClapArgs, Parser, Subcommand};
use gae_core::archive::Payload;
use gae_core::{Archive, Source};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "gae-cli",
    about = "Inspect, unpack and repack CL3 game asset archives",
    version
)]
struct Cli {
    /// Log parse progress to stderr (overrides RUST_LOG)
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List entries and their links
    List(ListArgs),
    /// Extract every entry into a directory
    Extract(ExtractArgs),
    /// Extract a single entry to a file
    ExtractFile(ExtractFileArgs),
    /// Sync an existing archive with a directory (add, replace, delete)
    Pack(PackArgs),
    /// Build a new archive from a directory
    Create(CreateArgs),
    /// Replace (or add) one entry's content from a file
    Replace(ReplaceArgs),
    /// Remove an entry, renumbering links of the others
    Remove(EntryArgs),
    /// Set or append one link of an entry
    SetLink(SetLinkArgs),
    /// Remove one link of an entry
    RemoveLink(RemoveLinkArgs),
    /// Print the archive structure
    Inspect(InspectArgs),
    /// Open main.DAT as a layout document and expand header arrays in it
    Nested(NestedArgs),
}

#[derive(ClapArgs, Debug)]
struct OutArgs {
    /// Output archive path; defaults to overwriting the input
    #[arg(long)]
    out: Option<PathBuf>,
    /// Zip the file being overwritten first
    #[arg(long, default_value_t = false)]
    backup: bool,
}

#[derive(ClapArgs, Debug)]
struct ListArgs {
    archive: PathBuf,
    /// Print JSON instead of a table
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Max entries to include in JSON output
    #[arg(long, default_value_t = 1024)]
    max_entries: usize,
    /// Leave link lists out of JSON output
    #[arg(long, default_value_t = false)]
    no_links: bool,
    /// Single-line JSON
    #[arg(long, default_value_t = false)]
    compact: bool,
}

#[derive(ClapArgs, Debug)]
struct ExtractArgs {
    archive: PathBuf,
    dir: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct ExtractFileArgs {
    archive: PathBuf,
    name: String,
    output: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct PackArgs {
    archive: PathBuf,
    dir: PathBuf,
    #[command(flatten)]
    out: OutArgs,
}

#[derive(ClapArgs, Debug)]
struct CreateArgs {
    dir: PathBuf,
    archive: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct ReplaceArgs {
    archive: PathBuf,
    name: String,
    file: PathBuf,
    #[command(flatten)]
    out: OutArgs,
}

#[derive(ClapArgs, Debug)]
struct EntryArgs {
    archive: PathBuf,
    name: String,
    #[command(flatten)]
    out: OutArgs,
}

#[derive(ClapArgs, Debug)]
struct SetLinkArgs {
    archive: PathBuf,
    name: String,
    /// Link slot; one past the last slot appends
    link_id: usize,
    /// Name of the linked entry
    target: String,
    #[command(flatten)]
    out: OutArgs,
}

#[derive(ClapArgs, Debug)]
struct RemoveLinkArgs {
    archive: PathBuf,
    name: String,
    link_id: usize,
    #[command(flatten)]
    out: OutArgs,
}

#[derive(ClapArgs, Debug)]
struct InspectArgs {
    archive: PathBuf,
    /// Also open main.DAT as a layout document
    #[arg(long, default_value_t = false)]
    nested: bool,
}

#[derive(ClapArgs, Debug)]
struct NestedArgs {
    archive: PathBuf,
    /// Header array to expand, as POS:COUNT (hex positions take 0x)
    #[arg(long, value_parser = parse_expand)]
    expand: Vec<(u64, u32)>,
    /// Print the document tree as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Write the archive back after expanding
    #[arg(long, default_value_t = false)]
    write: bool,
    #[command(flatten)]
    out: OutArgs,
}

fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn parse_expand(s: &str) -> Result<(u64, u32), String> {
    let (pos, count) = s
        .split_once(':')
        .ok_or_else(|| format!("expected POS:COUNT, got {s}"))?;
    let count = u32::try_from(parse_number(count)?).map_err(|e| e.to_string())?;
    Ok((parse_number(pos)?, count))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Cmd::List(a) => cmd_list(a),
        Cmd::Extract(a) => cmd_extract(a),
        Cmd::ExtractFile(a) => cmd_extract_file(a),
        Cmd::Pack(a) => cmd_pack(a),
        Cmd::Create(a) => cmd_create(a),
        Cmd::Replace(a) => cmd_replace(a),
        Cmd::Remove(a) => cmd_remove(a),
        Cmd::SetLink(a) => cmd_set_link(a),
        Cmd::RemoveLink(a) => cmd_remove_link(a),
        Cmd::Inspect(a) => cmd_inspect(a),
        Cmd::Nested(a) => cmd_nested(a),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(code: i32, msg: impl Display) -> ! {
    eprintln!("error: {}", msg);
    std::process::exit(code);
}

fn load(path: &Path) -> Archive {
    let archive = Archive::open(path)
        .unwrap_or_else(|e| fail(2, format_args!("{}: {}", path.display(), e)));
    debug!(path = %path.display(), entries = archive.len(), "loaded archive");
    archive
}

fn print_json(v: &serde_json::Value, pretty: bool) {
    let s = if pretty {
        serde_json::to_string_pretty(v)
    } else {
        serde_json::to_string(v)
    };
    println!("{}", s.unwrap_or_else(|e| fail(5, e)));
}

fn entry_index(archive: &Archive, name: &str) -> usize {
    match archive.find_entry(name) {
        Some((i, _)) => i,
        None => fail(3, format_args!("no entry named {}", name)),
    }
}

fn link_target(archive: &Archive, name: &str) -> u32 {
    u32::try_from(entry_index(archive, name)).unwrap_or_else(|e| fail(4, e))
}

fn save(archive: &mut Archive, input: &Path, out: &OutArgs) {
    let dest = out.out.as_deref().unwrap_or(input);
    if out.backup && dest.exists() {
        let zip = gae_core::backup::zip_backup(dest).unwrap_or_else(|e| fail(5, e));
        eprintln!("backup: {}", zip.display());
    }
    archive.fixup();
    archive
        .save(dest)
        .unwrap_or_else(|e| fail(5, format_args!("{}: {}", dest.display(), e)));
}

fn cmd_list(args: ListArgs) {
    let archive = load(&args.archive);
    if args.json {
        let opts = gae_core::json::JsonOpts {
            max_entries: args.max_entries,
            include_links: !args.no_links,
            pretty: !args.compact,
        };
        let v = gae_core::json::archive_to_json(&archive, opts);
        print_json(&v, opts.pretty);
        return;
    }
    for (i, e) in archive.entries().iter().enumerate() {
        println!(
            "{}\t{}\t{:#x}\tflags={:#x}\tlinks={:?}",
            i,
            e.name(),
            e.payload.size(),
            e.flags,
            e.links
        );
    }
}

fn cmd_extract(args: ExtractArgs) {
    let archive = load(&args.archive);
    archive
        .extract_to(&args.dir)
        .unwrap_or_else(|e| fail(5, e));
}

fn cmd_extract_file(args: ExtractFileArgs) {
    let archive = load(&args.archive);
    let entry = archive.get_entry(&args.name).unwrap_or_else(|e| fail(3, e));
    let mut sink = gae_core::WriteSink::create(&args.output).unwrap_or_else(|e| fail(5, e));
    entry.payload.dump(&mut sink).unwrap_or_else(|e| fail(5, e));
    sink.finish().unwrap_or_else(|e| fail(5, e));
}

fn cmd_pack(args: PackArgs) {
    let mut archive = load(&args.archive);
    archive
        .update_from_directory(&args.dir)
        .unwrap_or_else(|e| fail(4, e));
    save(&mut archive, &args.archive, &args.out);
}

fn cmd_create(args: CreateArgs) {
    let mut archive = Archive::new();
    archive
        .update_from_directory(&args.dir)
        .unwrap_or_else(|e| fail(4, e));
    let out = OutArgs {
        out: None,
        backup: false,
    };
    save(&mut archive, &args.archive, &out);
}

fn cmd_replace(args: ReplaceArgs) {
    let mut archive = load(&args.archive);
    let src = Source::from_file(&args.file)
        .unwrap_or_else(|e| fail(2, format_args!("{}: {}", args.file.display(), e)));
    archive
        .get_or_create_entry(&args.name)
        .unwrap_or_else(|e| fail(4, e))
        .payload = Payload::Raw(src);
    save(&mut archive, &args.archive, &args.out);
}

fn cmd_remove(args: EntryArgs) {
    let mut archive = load(&args.archive);
    let i = entry_index(&archive, &args.name);
    archive.delete_entry(i).unwrap_or_else(|e| fail(4, e));
    save(&mut archive, &args.archive, &args.out);
}

fn cmd_set_link(args: SetLinkArgs) {
    let mut archive = load(&args.archive);
    let i = entry_index(&archive, &args.name);
    let target = link_target(&archive, &args.target);
    archive
        .set_link(i, args.link_id, target)
        .unwrap_or_else(|e| fail(4, e));
    save(&mut archive, &args.archive, &args.out);
}

fn cmd_remove_link(args: RemoveLinkArgs) {
    let mut archive = load(&args.archive);
    let i = entry_index(&archive, &args.name);
    archive
        .remove_link(i, args.link_id)
        .unwrap_or_else(|e| fail(4, e));
    save(&mut archive, &args.archive, &args.out);
}

fn cmd_inspect(args: InspectArgs) {
    let mut archive = load(&args.archive);
    if args.nested {
        archive.get_nested_format().unwrap_or_else(|e| fail(3, e));
    }
    print!("{}", archive.inspect());
}

fn cmd_nested(args: NestedArgs) {
    let mut archive = load(&args.archive);
    let doc = archive.get_nested_format().unwrap_or_else(|e| fail(3, e));
    for &(pos, count) in &args.expand {
        doc.expand_header_array(pos, count)
            .unwrap_or_else(|e| fail(4, format_args!("expand {:#x}:{}: {}", pos, count, e)));
    }
    doc.fixup();
    if args.json {
        let v = gae_core::json::document_to_json(doc);
        print_json(&v, true);
    } else {
        print!("{}", doc.inspect());
    }
    if args.write {
        save(&mut archive, &args.archive, &args.out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_link_takes_target_by_name() {
        let cli = Cli::try_parse_from(["gae-cli", "set-link", "a.cl3", "A", "0", "C"]).unwrap();
        let Cmd::SetLink(args) = cli.cmd else {
            panic!("expected set-link");
        };
        assert_eq!((args.name.as_str(), args.link_id), ("A", 0));

        let mut archive = Archive::new();
        for name in ["A", "B", "C"] {
            archive.get_or_create_entry(name).unwrap();
        }
        let i = entry_index(&archive, &args.name);
        let target = link_target(&archive, &args.target);
        archive.set_link(i, args.link_id, target).unwrap();
        assert_eq!(archive.entry(0).unwrap().links, [2]);
    }

    #[test]
    fn expand_accepts_hex_and_decimal() {
        assert_eq!(parse_expand("0x1c0:3"), Ok((0x1c0, 3)));
        assert_eq!(parse_expand("64:0x2"), Ok((64, 2)));
        assert!(parse_expand("64").is_err());
        assert!(parse_expand("0x10:0x100000000").is_err());
    }
}
