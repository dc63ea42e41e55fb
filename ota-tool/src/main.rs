mod device;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use park_core::upload::{check_image_header, ImageDigest, UploadStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use device::Device;

const DEFAULT_FIRMWARE: &str = "target/xtensa-esp32s3-espidf/release/esp32-park-assist.bin";
const DEFAULT_HOST: &str = "parkassist.local";

#[derive(Parser)]
#[command(name = "ota-tool")]
#[command(about = "ParkAssist firmware update tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload through the update page endpoint (multipart form)
    Update {
        /// Device IP or hostname
        #[arg(default_value = DEFAULT_HOST)]
        host: String,

        /// Firmware image (.bin produced by `espflash save-image`)
        #[arg(short, long, default_value = DEFAULT_FIRMWARE)]
        firmware: PathBuf,
    },
    /// Open OTA mode and push the raw image with its SHA-256
    Push {
        #[arg(default_value = DEFAULT_HOST)]
        host: String,

        #[arg(short, long, default_value = DEFAULT_FIRMWARE)]
        firmware: PathBuf,
    },
    /// Show firmware version, running slot and upload state
    Status {
        #[arg(default_value = DEFAULT_HOST)]
        host: String,
    },
    /// Probe a /24 subnet for devices
    Scan {
        /// Network prefix, e.g. 192.168.1
        #[arg(short, long, default_value = "192.168.1")]
        subnet: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Update { host, firmware } => update(host, firmware, false),
        Commands::Push { host, firmware } => update(host, firmware, true),
        Commands::Status { host } => status(host),
        Commands::Scan { subnet } => scan(subnet),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "❌".red(), e);
        std::process::exit(1);
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        bail!(
            "Firmware not found: {}\n   Build with `cargo build --release` and convert with `espflash save-image`",
            path.display()
        );
    }
    let image = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    check_image_header(&image).context("Not an ESP application image (did you pass the ELF?)")?;
    Ok(image)
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn update(host: &str, firmware: &Path, push: bool) -> Result<()> {
    let image = read_image(firmware)?;
    let mut digest = ImageDigest::new();
    digest.update(&image);
    let sha256 = digest.finalize_hex();

    println!("{} ParkAssist OTA update", "🚀".blue());
    println!("   Device:   {}", host);
    println!(
        "   Firmware: {} bytes ({:.2} MB)",
        image.len(),
        image.len() as f64 / 1024.0 / 1024.0
    );
    println!("   SHA-256:  {}", sha256.dimmed());

    let probe = Device::new(host, Duration::from_secs(5))?;
    let info = probe.system_info().context("Device not reachable")?;
    println!("   Running:  {} {} on {}", info.app_name, info.version, info.hostname);

    let device = Device::new(host, Duration::from_secs(180))?;
    let pb = progress_bar(image.len() as u64)?;
    let file_name = firmware
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "firmware.bin".to_string());

    let result = if push {
        device.push(image, &sha256, &pb)
    } else {
        device.upload_form(image, &file_name, &pb)
    };
    pb.finish_and_clear();

    let reply = result?;
    println!("{} {}", "✅".green(), reply.trim());
    println!("\n{} Device will restart into the new firmware", "✨".green());
    Ok(())
}

fn status(host: &str) -> Result<()> {
    let device = Device::new(host, Duration::from_secs(5))?;
    let info = device.system_info()?;

    println!("{}", format!("{} ({})", info.app_name, info.hostname).bold().blue());
    println!("   Version:   {}", info.version);
    if let Some(slot) = &info.running_slot {
        println!(
            "   Slot:      {} ({})",
            slot.label,
            slot.version.as_deref().unwrap_or("unknown")
        );
    }
    println!("   Uptime:    {}", info.uptime);
    println!("   Free heap: {} bytes", info.free_heap);

    let upload = match device.ota_status() {
        Ok(UploadStatus::Idle) => "idle".normal(),
        Ok(UploadStatus::Receiving { progress, .. }) => format!("receiving {}%", progress).yellow(),
        Ok(UploadStatus::Verifying) => "verifying".yellow(),
        Ok(UploadStatus::Complete { sha256 }) => format!("complete ({})", sha256).green(),
        Ok(UploadStatus::Failed { reason }) => format!("failed: {}", reason).red(),
        Err(e) => format!("unavailable ({:#})", e).dimmed(),
    };
    println!("   OTA:       {}", upload);
    Ok(())
}

fn scan(subnet: &str) -> Result<()> {
    println!("🔍 {} {}.0/24...", "Scanning network".cyan(), subnet);

    let handles: Vec<_> = (1..255)
        .map(|i| {
            let host = format!("{}.{}", subnet, i);
            std::thread::spawn(move || {
                let device = Device::new(&host, Duration::from_millis(500)).ok()?;
                device.system_info().ok().map(|info| (host, info))
            })
        })
        .collect();

    let mut found = 0;
    for handle in handles {
        if let Ok(Some((host, info))) = handle.join() {
            println!("  ✓ Found: {}", format!("{} ({}) v{}", info.hostname, host, info.version).green());
            found += 1;
        }
    }

    if found == 0 {
        println!("{}", "❌ No devices found".red());
    } else {
        println!("\n📱 Found {} device(s)", found);
    }
    Ok(())
}
