use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use railyard_core::{OtaStatus, UpdateTarget};
use reqwest::blocking::{multipart, Client};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ota-tool")]
#[command(about = "Railyard Controller OTA Update Tool", long_about = None)]
struct Cli {
    /// Controller address
    #[arg(value_name = "IP")]
    ip: String,

    /// HTTP port
    #[arg(short, long, default_value_t = 80)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the update window is open
    Status {
        /// Print the raw JSON body
        #[arg(long)]
        json: bool,
    },
    /// Open the update window
    Enable,
    /// Close the update window
    Cancel,
    /// Upload a firmware image
    Firmware {
        file: PathBuf,
        /// Open the window before uploading
        #[arg(long)]
        enable: bool,
    },
    /// Upload a filesystem image
    Filesystem {
        file: PathBuf,
        /// Open the window before uploading
        #[arg(long)]
        enable: bool,
    },
}

/// Multipart field the controller reads the image from
const UPLOAD_FIELD: &str = "update";

struct Device {
    base: String,
    client: Client,
}

impl Device {
    fn new(ip: &str, port: u16) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            base: base_url(ip, port),
            client,
        })
    }

    fn status(&self) -> Result<OtaStatus, String> {
        self.client
            .get(format!("{}/ota_status", self.base))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<OtaStatus>())
            .map_err(|e| e.to_string())
    }

    fn post_window(&self, path: &str) -> Result<OtaStatus, String> {
        self.client
            .post(format!("{}{}", self.base, path))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<OtaStatus>())
            .map_err(|e| e.to_string())
    }

    fn upload(&self, target: UpdateTarget, path: &Path) -> Result<String, String> {
        let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let size = file.metadata().map_err(|e| e.to_string())?.len();
        println!(
            "\n📤 {} {} image: {} bytes ({:.2} MB)",
            "Uploading".cyan(),
            target.label().to_lowercase(),
            size,
            size as f64 / 1024.0 / 1024.0
        );

        let pb = ProgressBar::new(size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .map_err(|e| e.to_string())?
                .progress_chars("#>-"),
        );

        let part = multipart::Part::reader_with_length(pb.wrap_read(file), size)
            .file_name(file_name(path));
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(format!("{}{}", self.base, upload_path(target)))
            .multipart(form)
            .send();
        pb.finish_and_clear();

        let response = response.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if status.is_success() {
            Ok(body)
        } else {
            Err(format!("HTTP {}: {}", status.as_u16(), body))
        }
    }
}

fn base_url(ip: &str, port: u16) -> String {
    if port == 80 {
        format!("http://{}", ip)
    } else {
        format!("http://{}:{}", ip, port)
    }
}

fn upload_path(target: UpdateTarget) -> &'static str {
    match target {
        UpdateTarget::Firmware => "/update_fw",
        UpdateTarget::DataVolume => "/update_fs",
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.bin".to_string())
}

fn describe(status: &OtaStatus) -> String {
    match (status.enabled, status.in_progress) {
        (_, true) => format!("update in progress ({}s left)", status.seconds_left),
        (true, false) => format!("window open, {}s left", status.seconds_left),
        (false, false) => "window closed".to_string(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let device = match Device::new(&cli.ip, cli.port) {
        Ok(device) => device,
        Err(e) => {
            println!("{} {}", "❌ Client setup failed:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Status { json } => device.status().map(|s| {
            if json {
                println!("{}", serde_json::to_string_pretty(&s).unwrap_or_default());
            } else {
                println!("📡 {}: {}", device.base, describe(&s));
            }
        }),
        Commands::Enable => device
            .post_window("/ota_enable")
            .map(|s| println!("🔓 {}", describe(&s).green())),
        Commands::Cancel => device
            .post_window("/ota_cancel")
            .map(|s| println!("🔒 {}", describe(&s))),
        Commands::Firmware { file, enable } => run_upload(&device, UpdateTarget::Firmware, &file, enable),
        Commands::Filesystem { file, enable } => {
            run_upload(&device, UpdateTarget::DataVolume, &file, enable)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("\n{} {}", "❌".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run_upload(device: &Device, target: UpdateTarget, file: &Path, enable: bool) -> Result<(), String> {
    if !file.exists() {
        return Err(format!("Image not found: {}", file.display()));
    }
    // Catch obviously wrong files before opening a window
    let mut magic = [0u8; 1];
    if target == UpdateTarget::Firmware {
        File::open(file)
            .and_then(|mut f| f.read_exact(&mut magic))
            .map_err(|e| e.to_string())?;
        if magic[0] != 0xE9 {
            println!("{}", "⚠️  File does not start with an app image header".yellow());
        }
    }

    let status = if enable {
        device.post_window("/ota_enable")?
    } else {
        device.status()?
    };
    if !status.enabled {
        return Err("Update window is closed; run `ota-tool <IP> enable` first".to_string());
    }
    if status.in_progress {
        return Err("Another update is already writing".to_string());
    }

    let reply = device.upload(target, file)?;
    println!("   {} {}", "✅".green(), reply);
    println!("\n✨ {}", "Device will restart.".green());
    Ok(())
}
