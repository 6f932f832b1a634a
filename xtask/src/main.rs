use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;

const EBPF_DIR: &str = "crates/ebpf-engine/ebpf";
const EBPF_TARGET: &str = "bpfel-unknown-none";
const EBPF_BIN: &str = "xdpfwd-ebpf";

/// xdpfwd 빌드 태스크
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// XDP 분류기 커널 프로그램 빌드
    BuildEbpf {
        /// 릴리스 모드로 빌드
        #[arg(long)]
        release: bool,

        /// 빌드된 오브젝트를 이 경로로 복사 (xdp.object_path)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::BuildEbpf { release, out } => {
            build_ebpf(release);
            if let Some(out) = out {
                install_object(release, &out);
            }
        }
    }
}

fn build_ebpf(release: bool) {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(EBPF_DIR);

    cmd.args([
        "+nightly",
        "build",
        &format!("--target={EBPF_TARGET}"),
        "-Z",
        "build-std=core",
    ]);

    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().expect("failed to run cargo for the XDP program");
    if !status.success() {
        eprintln!("XDP program build failed");
        std::process::exit(1);
    }

    println!("XDP program build succeeded: {}", object_path(release).display());
}

/// 빌드 산출물 경로
fn object_path(release: bool) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    Path::new(EBPF_DIR)
        .join("target")
        .join(EBPF_TARGET)
        .join(profile)
        .join(EBPF_BIN)
}

fn install_object(release: bool, out: &Path) {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).expect("failed to create output directory");
    }
    std::fs::copy(object_path(release), out).expect("failed to copy XDP object");
    println!("installed {}", out.display());
}
