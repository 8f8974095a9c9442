use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceprint_core::{BoundingBox, CropRegionCalculator, FrameSize};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceprint", about = "Faceprint face identity CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the face in an image under a name
    Register {
        /// Display name for the identity
        name: String,
        #[arg(short, long)]
        image: PathBuf,
        /// Detector bounding box as x,y,w,h
        #[arg(short, long, value_parser = parse_bbox)]
        bbox: BoundingBox,
        /// Reference to an enrolment photo, stored as-is
        #[arg(long)]
        photo: Option<String>,
    },
    /// Verify the face in an image against one identity
    Verify {
        /// Identity ID
        id: String,
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long, value_parser = parse_bbox)]
        bbox: BoundingBox,
    },
    /// Find the registered identity closest to the face in an image
    Identify {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long, value_parser = parse_bbox)]
        bbox: BoundingBox,
    },
    /// List registered identities
    List,
    /// Remove a registered identity
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Show daemon status
    Status,
    /// Print the crop region for a bounding box (local, no daemon)
    Crop {
        /// Frame size as WIDTHxHEIGHT
        #[arg(short, long, value_parser = parse_frame)]
        frame: FrameSize,
        #[arg(short, long, value_parser = parse_bbox)]
        bbox: BoundingBox,
    },
}

#[zbus::proxy(
    interface = "org.faceprint.Faceprint1",
    default_service = "org.faceprint.Faceprint1",
    default_path = "/org/faceprint/Faceprint1"
)]
trait Faceprint {
    #[allow(clippy::too_many_arguments)]
    async fn register(
        &self,
        name: &str,
        image_path: &str,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        photo_ref: &str,
    ) -> zbus::Result<String>;
    async fn verify(
        &self,
        id: &str,
        image_path: &str,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> zbus::Result<String>;
    async fn identify(&self, image_path: &str, x: f64, y: f64, w: f64, h: f64)
        -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn remove_identity(&self, id: &str) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register {
            name,
            image,
            bbox,
            photo,
        } => {
            let image = image_arg(&image)?;
            let (x, y, w, h) = bbox_args(&bbox);
            let id = connect(cli.system)
                .await?
                .register(&name, &image, x, y, w, h, photo.as_deref().unwrap_or(""))
                .await?;
            println!("Registered {name}: {id}");
        }
        Commands::Verify { id, image, bbox } => {
            let image = image_arg(&image)?;
            let (x, y, w, h) = bbox_args(&bbox);
            let json = connect(cli.system).await?.verify(&id, &image, x, y, w, h).await?;
            print_json(&json)?;
        }
        Commands::Identify { image, bbox } => {
            let image = image_arg(&image)?;
            let (x, y, w, h) = bbox_args(&bbox);
            let json = connect(cli.system).await?.identify(&image, x, y, w, h).await?;
            print_json(&json)?;
        }
        Commands::List => {
            let json = connect(cli.system).await?.list_identities().await?;
            print_json(&json)?;
        }
        Commands::Remove { id } => {
            if connect(cli.system).await?.remove_identity(&id).await? {
                println!("Removed {id}");
            } else {
                bail!("no identity with id {id}");
            }
        }
        Commands::Status => {
            let json = connect(cli.system).await?.status().await?;
            print_json(&json)?;
        }
        Commands::Crop { frame, bbox } => {
            let region = CropRegionCalculator::default().compute(&bbox, frame);
            println!("{}", serde_json::to_string_pretty(&region)?);
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<FaceprintProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    FaceprintProxy::new(&conn)
        .await
        .context("faceprintd is not reachable")
}

/// The daemon resolves paths itself, so send an absolute one.
fn image_arg(path: &Path) -> Result<String> {
    let path = path
        .canonicalize()
        .with_context(|| format!("cannot access {}", path.display()))?;
    path.to_str()
        .map(str::to_string)
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

fn bbox_args(bbox: &BoundingBox) -> (f64, f64, f64, f64) {
    (
        bbox.x as f64,
        bbox.y as f64,
        bbox.width as f64,
        bbox.height as f64,
    )
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon sent invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let &[x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,w,h, got {s:?}"));
    };
    let num = |v: &str| {
        v.parse::<f32>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("invalid number {v:?}"))
    };
    Ok(BoundingBox::new(num(x)?, num(y)?, num(w)?, num(h)?))
}

fn parse_frame(s: &str) -> Result<FrameSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let dim = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid dimension {v:?}"))
    };
    Ok(FrameSize::new(dim(w)?, dim(h)?))
}
