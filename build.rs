//! Build script for generating the `exitnode` man page.
//!
//! The page is rendered with clap-mangen into `OUT_DIR`, and its location is
//! exported to the crate as `EXITNODE_MAN_PAGE` for packaging.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let page = out_dir.join("exitnode.1");
    let mut file = File::create(&page)?;
    Man::new(Cli::command()).render(&mut file)?;
    file.flush()?;
    writeln!(stdout, "cargo:rustc-env=EXITNODE_MAN_PAGE={}", page.display())?;

    Ok(())
}
