use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufWriter, Stdout, Write};
use std::path::Path;

use crate::config::RenderConfig;
use crate::encode::ffmpeg::FfmpegEncoder;
use crate::pipeline::{Pipeline, TickReport};
use crate::render::frame::FrameRenderer;

/// Renders pipeline state at a fixed video rate, whatever the tick rate is.
struct VideoSink {
    renderer: FrameRenderer,
    encoder: FfmpegEncoder,
    interval: f32,
    pending: f32,
}

impl VideoSink {
    fn push(&mut self, pipeline: &Pipeline, dt: f32) -> Result<()> {
        self.pending += dt;
        // Small slack so a tick of exactly 1/fps is not lost to rounding.
        if self.pending + 1e-6 < self.interval {
            return Ok(());
        }
        let pixels = self.renderer.render(pipeline.bands(), pipeline.history());
        while self.pending + 1e-6 >= self.interval {
            self.encoder.write_frame(&pixels)?;
            self.pending -= self.interval;
        }
        Ok(())
    }
}

pub fn progress_bar(total: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let template = format!("[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {unit} ({{eta}} remaining)");
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

/// Everything the render loop fans out to: JSON lines, video, progress.
pub struct Outputs {
    json: Option<BufWriter<Stdout>>,
    video: Option<VideoSink>,
    progress: Option<ProgressBar>,
}

impl Outputs {
    pub fn new(
        json: bool,
        video: Option<&Path>,
        render: &RenderConfig,
        total_samples: Option<u64>,
    ) -> Result<Self> {
        let video = match video {
            Some(path) => {
                let renderer = FrameRenderer::new(render.width, render.height, render.palette);
                let encoder = FfmpegEncoder::new(
                    path,
                    renderer.width(),
                    renderer.height(),
                    render.fps,
                    &render.codec,
                )?;
                Some(VideoSink {
                    renderer,
                    encoder,
                    interval: 1.0 / render.fps as f32,
                    pending: 0.0,
                })
            }
            None => None,
        };

        let progress = total_samples.map(|total| progress_bar(total, "samples"));

        Ok(Self {
            json: json.then(|| BufWriter::new(std::io::stdout())),
            video,
            progress,
        })
    }

    pub fn emit(&mut self, report: &TickReport, pipeline: &Pipeline, dt: f32) -> Result<()> {
        if let Some(out) = self.json.as_mut() {
            serde_json::to_writer(&mut *out, report).context("Failed to serialize tick report")?;
            writeln!(out).context("Failed to write tick report")?;
        }
        if let Some(video) = self.video.as_mut() {
            video.push(pipeline, dt)?;
        }
        Ok(())
    }

    /// Counts samples as they leave the session, whether or not a tick
    /// ends up analyzing them.
    pub fn received(&self, samples: usize) {
        if let Some(pb) = &self.progress {
            pb.inc(samples as u64);
        }
    }

    #[cfg(test)]
    pub fn progress_position(&self) -> Option<u64> {
        self.progress.as_ref().map(ProgressBar::position)
    }

    /// A tick with no new frame: the video keeps its frame rate by
    /// repeating the current picture.
    pub fn hold(&mut self, pipeline: &Pipeline, dt: f32) -> Result<()> {
        if pipeline.ticks() == 0 {
            return Ok(());
        }
        if let Some(video) = self.video.as_mut() {
            video.push(pipeline, dt)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        if let Some(pb) = self.progress {
            pb.finish_with_message("Analysis complete");
        }
        if let Some(mut out) = self.json {
            out.flush().context("Failed to flush tick reports")?;
        }
        if let Some(video) = self.video {
            video.encoder.finish()?;
        }
        Ok(())
    }
}
