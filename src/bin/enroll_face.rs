//! enroll_face - register a face image with the vision service
//!
//! Refuses images without exactly one detected face unless `--skip-detect`
//! is given, so a group photo cannot be enrolled under a single user id.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use facegate::artifact::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use facegate::vision::{HttpVisionClient, VisionClientConfig, VisionService};

#[derive(Parser, Debug)]
#[command(
    name = "enroll_face",
    about = "Enroll a face image under a user id with the vision service"
)]
struct Args {
    /// Image containing exactly one face (any format the decoder supports)
    image: PathBuf,

    /// User id the face is registered under
    #[arg(long)]
    userid: String,

    /// Vision service base URL
    #[arg(long, env = "FACEGATE_VISION_URL", default_value = "http://127.0.0.1:80/v1/")]
    vision_url: String,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Register without checking the face count first
    #[arg(long)]
    skip_detect: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let userid = args.userid.trim();
    if userid.is_empty() {
        return Err(anyhow!("userid must not be empty"));
    }

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("read image {}", args.image.display()))?;
    let jpeg = normalize_to_jpeg(&bytes)
        .with_context(|| format!("decode image {}", args.image.display()))?;

    let client = HttpVisionClient::new(VisionClientConfig {
        base_url: args.vision_url.clone(),
        timeout: Duration::from_millis(args.timeout_ms),
    })?;

    if !args.skip_detect {
        let faces = client.detect_faces(&jpeg).context("face detection")?;
        check_single_face(faces.len())?;
    }

    client
        .register_face(&jpeg, userid)
        .with_context(|| format!("register {}", userid))?;
    println!("enroll_face: registered {} from {}", userid, args.image.display());
    Ok(())
}

// The service only accepts JPEG; other formats are re-encoded.
fn normalize_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let format = image::guess_format(bytes).context("unknown image format")?;
    if format == image::ImageFormat::Jpeg {
        image::load_from_memory(bytes)?;
        return Ok(bytes.to_vec());
    }
    let rgb = image::load_from_memory(bytes)?.into_rgb8();
    encode_jpeg(&rgb, DEFAULT_JPEG_QUALITY)
}

fn check_single_face(count: usize) -> Result<()> {
    match count {
        1 => Ok(()),
        0 => Err(anyhow!("no face detected; use a clearer image")),
        n => Err(anyhow!(
            "{} faces detected; enrollment needs exactly one",
            n
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn face_count_must_be_exactly_one() {
        assert!(check_single_face(1).is_ok());
        assert!(check_single_face(0).is_err());
        assert!(check_single_face(3).is_err());
    }

    #[test]
    fn jpeg_input_is_passed_through() {
        let jpeg = encode_jpeg(&RgbImage::new(16, 16), 80).unwrap();
        assert_eq!(normalize_to_jpeg(&jpeg).unwrap(), jpeg);
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(normalize_to_jpeg(b"not an image").is_err());
    }
}
