// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: package directory
fn path_arg() -> Arg {
    Arg::new("path")
        .long("path")
        .value_name("DIR")
        .default_value(".")
        .help("Package directory")
}

fn build_cli() -> Command {
    Command::new("kpkg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Dependency manager for KCL packages")
        .arg(
            Arg::new("insecure_skip_tls_verify")
                .long("insecure-skip-tls-verify")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Skip TLS certificate verification on remote fetches"),
        )
        .subcommand(
            Command::new("add")
                .about("Add dependencies to the package")
                .arg(
                    Arg::new("sources")
                        .required(true)
                        .num_args(1..)
                        .help("Dependency sources (oci:// urls, git+ urls, paths, archives, name:version)"),
                )
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("update")
                .about("Resolve the dependency graph and rewrite kcl.mod / kcl.mod.lock")
                .arg(path_arg())
                .arg(
                    Arg::new("no_sum_check")
                        .long("no-sum-check")
                        .action(clap::ArgAction::SetTrue)
                        .help("Skip content sums and leave the lockfile untouched"),
                ),
        )
        .subcommand(
            Command::new("vendor")
                .about("Materialize all resolved dependencies under ./vendor")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("cache-clean")
                .about("Remove fetched packages from the cache")
                .arg(Arg::new("source").help("Source url to evict (whole cache when omitted)")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("kpkg.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
