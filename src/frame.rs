use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
    Unspecified,
}

impl FrameFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => FrameFormat::Jpeg,
            "png" => FrameFormat::Png,
            _ => FrameFormat::Unspecified,
        }
    }
}

/// One still frame handed over by the frame source.
///
/// The buffer holds an encoded image; the metadata is whatever the source
/// reported and is not trusted by the preprocessor. The release hook fires
/// exactly once when the frame is dropped, on every exit path, so the
/// source can recycle its buffer whether the frame was classified, failed
/// preprocessing or was dropped under backpressure.
pub struct RawFrame {
    data: Vec<u8>,
    format: FrameFormat,
    reported_size: Option<(u32, u32)>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, format: FrameFormat) -> Self {
        Self {
            data,
            format,
            reported_size: None,
            on_release: None,
        }
    }

    pub fn with_reported_size(mut self, width: u32, height: u32) -> Self {
        self.reported_size = Some((width, height));
        self
    }

    pub fn with_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn reported_size(&self) -> Option<(u32, u32)> {
        self.reported_size
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("bytes", &self.data.len())
            .field("format", &self.format)
            .field("reported_size", &self.reported_size)
            .finish()
    }
}
