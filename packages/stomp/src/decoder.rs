use crate::{
    StompError,
    frame::{Command, Frame, headers, unescape_header},
};

/// One item read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// A bare EOL sent between frames to keep the connection alive.
    Heartbeat,
}

/// Largest frame [`FrameDecoder::default`] accepts, head and body included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Incremental STOMP decoder.
///
/// Chunks may split frames at any byte; call [`FrameDecoder::next_item`]
/// until it returns `Ok(None)` after every [`FrameDecoder::push`].
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    #[must_use]
    pub const fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete item, or `None` if more input is needed.
    ///
    /// On error the buffered input is discarded so the decoder can resume
    /// with the next chunk.
    ///
    /// # Errors
    ///
    /// * If the buffered input is not a well-formed STOMP frame
    pub fn next_item(&mut self) -> Result<Option<Decoded>, StompError> {
        match self.decode() {
            Ok(item) => Ok(item),
            Err(e) => {
                log::debug!("Discarding {} buffered bytes: {e}", self.buffer.len());
                self.buffer.clear();
                Err(e)
            }
        }
    }

    fn decode(&mut self) -> Result<Option<Decoded>, StompError> {
        match self.buffer.as_slice() {
            [] | [b'\r'] => return Ok(None),
            [b'\n', ..] => {
                self.buffer.drain(..1);
                return Ok(Some(Decoded::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                self.buffer.drain(..2);
                return Ok(Some(Decoded::Heartbeat));
            }
            _ => {}
        }

        let Some((head_end, body_start)) = find_head_end(&self.buffer) else {
            if self.buffer.contains(&0) {
                return Err(StompError::MalformedHeader(
                    String::from_utf8_lossy(&self.buffer).into_owned(),
                ));
            }
            self.check_size(self.buffer.len())?;
            return Ok(None);
        };

        let head =
            std::str::from_utf8(&self.buffer[..head_end]).map_err(|_| StompError::InvalidUtf8)?;
        let mut lines = head.split('\n').map(|line| line.trim_end_matches('\r'));

        let command = Command::parse(lines.next().unwrap_or_default())?;
        let mut frame = Frame::new(command);

        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(StompError::MalformedHeader(line.to_string()));
            };

            frame = if command.escapes_headers() {
                frame.with_header(unescape_header(name)?, unescape_header(value)?)
            } else {
                frame.with_header(name, value)
            };
        }

        let body_end = if let Some(length) = frame.header(headers::CONTENT_LENGTH) {
            let length = length
                .trim()
                .parse::<usize>()
                .map_err(|_| StompError::InvalidContentLength(length.to_string()))?;
            let body_end = body_start
                .checked_add(length)
                .ok_or_else(|| StompError::InvalidContentLength(length.to_string()))?;
            self.check_size(body_end.saturating_add(1))?;

            match self.buffer.get(body_end) {
                None => return Ok(None),
                Some(0) => body_end,
                Some(_) => return Err(StompError::MissingNul),
            }
        } else {
            match self.buffer[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => {
                    let body_end = body_start + offset;
                    self.check_size(body_end + 1)?;
                    body_end
                }
                None => {
                    self.check_size(self.buffer.len())?;
                    return Ok(None);
                }
            }
        };

        frame.body = std::str::from_utf8(&self.buffer[body_start..body_end])
            .map_err(|_| StompError::InvalidUtf8)?
            .to_string();

        self.buffer.drain(..=body_end);

        Ok(Some(Decoded::Frame(frame)))
    }

    const fn check_size(&self, size: usize) -> Result<(), StompError> {
        if size > self.max_frame_size {
            return Err(StompError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

/// Finds the blank line ending the frame head.
///
/// Returns the end of the head (exclusive, without the EOL of the last
/// header) and the start of the body.
fn find_head_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;

    while let Some(offset) = buffer[line_start..].iter().position(|b| *b == b'\n') {
        let eol = line_start + offset;
        let line = &buffer[line_start..eol];

        if line.contains(&0) {
            return None;
        }

        if line.is_empty() || line == b"\r" {
            let head_end = line_start.saturating_sub(1);
            let head_end = if head_end > 0 && buffer[head_end - 1] == b'\r' {
                head_end - 1
            } else {
                head_end
            };
            return Some((head_end, eol + 1));
        }

        line_start = eol + 1;
    }

    None
}
