use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Pipes raw RGBA frames into an ffmpeg child process.
pub struct FfmpegEncoder {
    child: Child,
    frame_bytes: usize,
    frames: u64,
}

impl FfmpegEncoder {
    pub fn new(output_path: &Path, width: u32, height: u32, fps: u32, codec: &str) -> Result<Self> {
        let args = encoder_args(output_path, width, height, fps, codec);

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!("FFmpeg encoder started: {}x{} @ {}fps, codec={}", width, height, fps, codec);

        Ok(Self {
            child,
            frame_bytes: (width * height * 4) as usize,
            frames: 0,
        })
    }

    pub fn write_frame(&mut self, rgba_pixels: &[u8]) -> Result<()> {
        if rgba_pixels.len() != self.frame_bytes {
            anyhow::bail!(
                "frame is {} bytes, encoder expects {}",
                rgba_pixels.len(),
                self.frame_bytes
            );
        }
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        stdin.write_all(rgba_pixels).context("Failed to write frame to ffmpeg")?;
        self.frames += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("FFmpeg encoding complete ({} frames)", self.frames);
        Ok(())
    }
}

fn encoder_args(output_path: &Path, width: u32, height: u32, fps: u32, codec: &str) -> Vec<String> {
    // stderr is only read once ffmpeg exits; progress output would fill the pipe.
    vec![
        "-nostats".to_string(),
        "-loglevel".into(), "error".into(),
        "-y".into(),
        "-f".into(), "rawvideo".into(),
        "-pixel_format".into(), "rgba".into(),
        "-video_size".into(), format!("{}x{}", width, height),
        "-framerate".into(), fps.to_string(),
        "-i".into(), "pipe:0".into(),
        "-c:v".into(), codec.to_string(),
        "-pix_fmt".into(), "yuv420p".into(),
        output_path.display().to_string(),
    ]
}
