use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use xtaf_fs::SECTOR_SIZE;
use xtaf_fs::dfxml;
use xtaf_fs::dir::{Attributes, DirEntry, NamePolicy};
use xtaf_fs::session::{AttachOptionsBuilder, DEFAULT_SESSION_FILE, Session};

#[derive(Parser)]
#[command(name = "uxtaf", version, about = "Read-only inspector for XTAF (Xbox 360) disk images")]
struct Cli {
    /// Sidecar file holding the attached session.
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    session: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach to a disk image and start a session.
    Attach {
        image: PathBuf,
        /// Byte offset of the partition within the image (decimal or 0x-hex).
        #[arg(value_parser = parse_offset, default_value = "0")]
        offset: u64,
        /// Accept any byte in recovered filenames instead of printable ASCII.
        #[arg(long)]
        permissive_names: bool,
    },
    /// Print the session geometry.
    Info,
    /// List the working directory.
    Ls,
    /// Change the working directory; an unknown path lands on the root.
    Cd { path: String },
    /// Write a file's contents to standard output.
    Cat { path: String },
    /// Export the directory tree as DFXML.
    Dfxml,
    /// Dump the parent-pointer table.
    Dot,
}

fn parse_offset(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("uxtaf: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Attach { image, offset, permissive_names } => {
            let policy = if permissive_names { NamePolicy::AnyByte } else { NamePolicy::default() };
            let options = AttachOptionsBuilder::default()
                .image(image)
                .offset(offset)
                .name_policy(policy)
                .build()?;
            let session = Session::attach(&options)?;
            session.save(&cli.session)?;
        }
        Command::Info => {
            let session = Session::load(&cli.session)?;
            print_info(&session);
        }
        Command::Ls => {
            let mut session = Session::load(&cli.session)?;
            let entries = session.list()?;
            print_listing(&entries);
            session.save(&cli.session)?;
        }
        Command::Cd { path } => {
            let mut session = Session::load(&cli.session)?;
            session.change_dir(&path)?;
            session.save(&cli.session)?;
        }
        Command::Cat { path } => {
            let mut session = Session::load(&cli.session)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            session.copy_file(&path, &mut out)?;
            out.flush()?;
            session.save(&cli.session)?;
        }
        Command::Dfxml => {
            let mut session = Session::load(&cli.session)?;
            let command_line = std::env::args().collect::<Vec<_>>().join(" ");
            let stdout = io::stdout();
            let mut out = stdout.lock();
            dfxml::write_dfxml(&mut session, &mut out, &command_line)?;
            out.flush()?;
            session.save(&cli.session)?;
        }
        Command::Dot => {
            let session = Session::load(&cli.session)?;
            println!("this\tparent");
            for (this, parent) in session.dot.iter() {
                println!("{this}\t{parent}");
            }
        }
    }
    Ok(())
}

fn print_info(session: &Session) {
    let g = &session.geometry;
    println!("magic        = XTAF");
    println!("volid        = 0x{:08x}", session.boot.volume_id);
    println!("spc          = {}", session.boot.sectors_per_cluster);
    println!("nfat         = {}", session.boot.fat_count);
    println!("zero         = {}", session.boot.zero);
    println!(
        "pwd          = {} sectors  @ 0x{:x} bytes",
        session.pwd_sector,
        session.pwd_sector as u64 * SECTOR_SIZE
    );
    println!("fatmask      = 0x{:08x}", g.fat_mask);
    println!("{} bits", g.fat_width as u32 * 8);
    println!(
        "fatstart     = {} sectors  @ 0x{:x} bytes",
        g.fat_start,
        g.fat_start as u64 * SECTOR_SIZE
    );
    println!("fatsize      = {} bytes", g.fat_size);
    println!(
        "rootstart    = {} sectors  @ 0x{:x} bytes",
        g.root_start,
        g.root_start as u64 * SECTOR_SIZE
    );
    println!(
        "firstcluster = {} sectors  @ 0x{:x} bytes",
        g.first_data_sector,
        g.first_data_sector as u64 * SECTOR_SIZE
    );
    println!(
        "maxcluster   = {} clusters @ 0x{:x} bytes",
        g.max_cluster,
        g.max_cluster as u64 * g.cluster_bytes()
    );
    println!("numclusters  = {}", g.cluster_count);
    println!("mediasize    = {} bytes", g.media_size);
    println!("partitionsize= {} bytes", g.partition_size);
    println!("fatsecs      = {} sectors", g.fat_sectors);
    println!("image offset = {}", g.image_offset);
    println!("image name   = {}", session.image.display());
}

fn print_listing(entries: &[DirEntry]) {
    println!(
        "entry fnl rhsvda startclust   filesize    create_date_time    \
         access_date_time    update_date_time filename"
    );
    let mut seen = [false; 256];
    for entry in entries {
        println!(
            "{:5} {:3} {} {:10} {:10} {} {} {} {}",
            entry.slot,
            entry.name_len,
            attr_flags(entry.attributes),
            entry.start_cluster,
            entry.size,
            entry.created,
            entry.accessed,
            entry.updated,
            entry.name
        );
        for &b in entry.name.as_bytes() {
            seen[b as usize] = true;
        }
    }
    print!("file name characters:");
    for (value, seen) in seen.iter().enumerate() {
        if *seen {
            print!(" {value:3}");
        }
    }
    println!();
}

fn attr_flags(attributes: Attributes) -> String {
    [
        (Attributes::READ_ONLY, 'r'),
        (Attributes::HIDDEN, 'h'),
        (Attributes::SYSTEM, 's'),
        (Attributes::VOLUME, 'v'),
        (Attributes::DIRECTORY, 'd'),
        (Attributes::ARCHIVE, 'a'),
    ]
    .iter()
    .map(|&(flag, mark)| if attributes.contains(flag) { mark } else { '-' })
    .collect()
}
