use anyhow::{anyhow, Result};
use image::{ImageFormat, Rgb, RgbImage};
use rand::Rng;
use std::io::Cursor;
use std::path::Path;

use url::Url;

use super::{Camera, CameraError, CameraFailure};

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const SQUARE: u32 = 48;

/// Synthetic camera for `stub://` URLs.
///
/// Renders a gradient with a square that moves a little each snapshot.
/// Query options: `size=WxH`, `fail-every=N` (every Nth snapshot fails with
/// a protocol error).
pub struct StubCamera {
    key: String,
    url: String,
    width: u32,
    height: u32,
    fail_every: u64,
    frame_count: u64,
}

impl StubCamera {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            url: format!("stub://{}", key),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fail_every: 0,
            frame_count: 0,
        }
    }

    pub fn from_url(key: &str, url: &Url) -> Result<Self> {
        let mut camera = Self::new(key);
        camera.url = url.to_string();
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| anyhow!("stub size must look like 320x240"))?;
                    camera.width = w.parse().map_err(|_| anyhow!("invalid stub width"))?;
                    camera.height = h.parse().map_err(|_| anyhow!("invalid stub height"))?;
                    if camera.width < SQUARE || camera.height < SQUARE {
                        return Err(anyhow!("stub size must be at least {}x{}", SQUARE, SQUARE));
                    }
                }
                "fail-every" => {
                    camera.fail_every = value
                        .parse()
                        .map_err(|_| anyhow!("invalid stub fail-every"))?;
                }
                other => return Err(anyhow!("unknown stub option '{}'", other)),
            }
        }
        Ok(camera)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> RgbImage {
        let travel = (self.width - SQUARE) as u64;
        let offset = (self.frame_count * 16) % travel.max(1);
        let top = (self.height - SQUARE) / 2;
        let shade: u8 = rand::thread_rng().gen_range(180..=255);
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let in_square = (x as u64) >= offset
                && (x as u64) < offset + SQUARE as u64
                && y >= top
                && y < top + SQUARE;
            if in_square {
                Rgb([shade, 32, 32])
            } else {
                let r = (x * 255 / self.width) as u8;
                let g = (y * 255 / self.height) as u8;
                Rgb([r / 2, g / 2, 96])
            }
        })
    }
}

impl Camera for StubCamera {
    fn key(&self) -> &str {
        &self.key
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    fn snapshot(&mut self, dest: &Path) -> Result<(), CameraError> {
        self.frame_count += 1;
        if self.fail_every > 0 && self.frame_count % self.fail_every == 0 {
            return Err(CameraError::new(
                &self.key,
                self.describe(),
                CameraFailure::Protocol {
                    program: "stub".to_string(),
                    status: None,
                    message: "simulated camera failure".to_string(),
                },
            ));
        }
        let mut jpeg = Vec::new();
        self.render()
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .map_err(|e| {
                CameraError::new(
                    &self.key,
                    self.describe(),
                    CameraFailure::Io(std::io::Error::new(std::io::ErrorKind::Other, e)),
                )
            })?;
        std::fs::write(dest, jpeg)
            .map_err(|e| CameraError::new(&self.key, self.describe(), e.into()))
    }
}
