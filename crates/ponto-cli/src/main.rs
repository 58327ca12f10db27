use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ponto_core::{CascadeDetector, DetectParams, FaceHasher, FaceLocator, PerceptualHasher};
use ponto_hw::{frame, Camera, Frame};

#[zbus::proxy(
    interface = "org.ponto.Checkpoint1",
    default_service = "org.ponto.Checkpoint1",
    default_path = "/org/ponto/Checkpoint1"
)]
trait Checkpoint {
    fn identify(&self) -> zbus::Result<String>;
    fn capture_enrollment(&self) -> zbus::Result<String>;
    fn submit_enrollment(
        &self,
        name: &str,
        registration_number: &str,
        organization_id: &str,
        national_id: &str,
    ) -> zbus::Result<i64>;
    fn discard_enrollment(&self) -> zbus::Result<bool>;
    fn cancel(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
    fn pending_events(&self) -> zbus::Result<String>;
    fn mark_synced(&self, ids: &[i64]) -> zbus::Result<u64>;
}

#[derive(Parser)]
#[command(name = "ponto", about = "Ponto attendance checkpoint CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the person in front of the camera and record attendance
    Identify,
    /// Capture a face for a new employee
    Enroll,
    /// Store the captured face under the given identity
    Submit {
        /// Full name
        #[arg(long)]
        name: String,
        /// Registration number
        #[arg(long)]
        registration: String,
        /// Organization id
        #[arg(long)]
        organization: String,
        /// National id, masked as 000.000.000-00
        #[arg(long)]
        national_id: String,
    },
    /// Drop the captured face
    Discard,
    /// Stop the running capture session
    Cancel,
    /// Show daemon status
    Status,
    /// List attendance events not yet synchronized
    Pending,
    /// Mark attendance events as synchronized
    MarkSynced {
        /// Event ids
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera device
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Number of frames to sample
        #[arg(short, long, default_value_t = 10)]
        frames: u32,
        /// Haar cascade used to count faces (defaults to PONTO_CASCADE_PATH)
        #[arg(long)]
        cascade: Option<String>,
    },
    /// Print the perceptual hash of an image file
    Hash {
        /// Image to hash
        image: String,
        /// Hash only the first face found with this Haar cascade
        #[arg(long)]
        cascade: Option<String>,
    },
    /// Apply the national id mask to a string of digits
    FormatId {
        digits: String,
    },
}

async fn proxy() -> Result<CheckpointProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    CheckpointProxy::new(&conn)
        .await
        .context("pontod is not reachable")
}

/// Pretty-print an outcome, leaving out bulky image payloads.
fn print_outcome(json: &str) -> Result<()> {
    let mut value: serde_json::Value = serde_json::from_str(json)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("portrait_base64");
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cascade_from(arg: Option<String>) -> Option<String> {
    arg.or_else(|| std::env::var("PONTO_CASCADE_PATH").ok())
}

fn run_diagnostics(device: &str, frames: u32, cascade: Option<String>) -> Result<()> {
    let locator = match cascade_from(cascade) {
        Some(path) => Some(CascadeDetector::load(&path).with_context(|| format!("failed to load {path}"))?),
        None => None,
    };

    let mut camera = Camera::open(device)?;
    println!(
        "{} ({}) {}x{} {:?}",
        camera.device_path,
        camera.card_name().unwrap_or_default(),
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    for i in 0..frames {
        let frame = camera.capture_frame()?;
        let gray = frame.to_gray()?;
        let faces = match &locator {
            Some(l) => l
                .locate(&gray, frame.width, frame.height, &DetectParams::identification())?
                .len()
                .to_string(),
            None => "-".to_string(),
        };
        tracing::debug!(sequence = frame.sequence, "sampled frame");
        println!(
            "frame {i:>3}: brightness {:>6.1}  dark {:>5.1}%{}  faces {faces}",
            frame.avg_brightness(),
            frame::dark_ratio(&gray) * 100.0,
            if frame::is_dark_frame(&gray, 0.95) { " (dark)" } else { "" },
        );
    }
    Ok(())
}

fn hash_image(path: &str, cascade: Option<String>) -> Result<()> {
    let img = image::open(path)
        .with_context(|| format!("failed to read {path}"))?
        .to_rgb8();
    let mut frame = Frame::from_rgb(img.as_raw(), img.width(), img.height())?;

    if let Some(cascade) = cascade {
        let locator = CascadeDetector::load(&cascade).with_context(|| format!("failed to load {cascade}"))?;
        let gray = frame.to_gray()?;
        let faces = locator.locate(&gray, frame.width, frame.height, &DetectParams::enrollment())?;
        let Some(face) = faces.first() else {
            bail!("no face found in {path}");
        };
        frame = frame.crop(face)?;
    }

    let fingerprint = PerceptualHasher::new().fingerprint(&frame.data, frame.width, frame.height)?;
    println!("{fingerprint}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identify => {
            println!("Look at the camera...");
            print_outcome(&proxy().await?.identify().await?)?;
        }
        Commands::Enroll => {
            println!("Capturing face, hold still...");
            print_outcome(&proxy().await?.capture_enrollment().await?)?;
        }
        Commands::Submit {
            name,
            registration,
            organization,
            national_id,
        } => {
            let id = proxy()
                .await?
                .submit_enrollment(&name, &registration, &organization, &national_id)
                .await?;
            println!("Enrolled {name} as employee {id}");
        }
        Commands::Discard => {
            if proxy().await?.discard_enrollment().await? {
                println!("Captured face discarded");
            } else {
                println!("Nothing to discard");
            }
        }
        Commands::Cancel => {
            if proxy().await?.cancel().await? {
                println!("Cancel requested");
            } else {
                println!("No session running");
            }
        }
        Commands::Status => {
            print_outcome(&proxy().await?.status().await?)?;
        }
        Commands::Pending => {
            print_outcome(&proxy().await?.pending_events().await?)?;
        }
        Commands::MarkSynced { ids } => {
            let changed = proxy().await?.mark_synced(&ids).await?;
            println!("{changed} event(s) marked synced");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {}  [{}] {}", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test {
            device,
            frames,
            cascade,
        } => {
            println!("Running camera diagnostics...");
            run_diagnostics(&device, frames, cascade)?;
        }
        Commands::Hash { image, cascade } => {
            hash_image(&image, cascade)?;
        }
        Commands::FormatId { digits } => {
            println!("{}", ponto_core::enrollment::format_national_id(&digits));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "ponto",
            "submit",
            "--name",
            "Ana",
            "--registration",
            "42",
            "--organization",
            "7",
            "--national-id",
            "123.456.789-09",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Submit { ref name, .. } if name == "Ana"));
    }

    #[test]
    fn test_mark_synced_needs_ids() {
        assert!(Cli::try_parse_from(["ponto", "mark-synced"]).is_err());
        let cli = Cli::try_parse_from(["ponto", "mark-synced", "3", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::MarkSynced { ref ids } if ids == &[3, 5]));
    }
}
