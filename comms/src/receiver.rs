use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    header: [u8; LEN_TYPE_SIZE],
    buf: Vec<u8>,
    /// The body length of the frame being read, once its header is complete.
    len: Option<usize>,
    /// Bytes of the current header or body already read.
    filled: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            header: [0; LEN_TYPE_SIZE],
            buf: Vec::new(),
            len: None,
            filled: 0,
        }
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// This method is cancel safe: the bytes of a frame read before the future is
    /// dropped are kept, and the next call resumes that same frame.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    pub async fn recv<T: Deserialize>(&mut self) -> io::Result<T> {
        let len = loop {
            if let Some(len) = self.len {
                break len;
            }

            if self.filled < LEN_TYPE_SIZE {
                self.filled += read_some(&mut self.rx, &mut self.header[self.filled..]).await?;
                continue;
            }

            self.filled = 0;
            let len = LenType::from_be_bytes(self.header) as usize;
            if len > MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
                ));
            }

            self.buf.resize(len, 0);
            self.len = Some(len);
        };

        while self.filled < len {
            self.filled += read_some(&mut self.rx, &mut self.buf[self.filled..]).await?;
        }

        self.len = None;
        self.filled = 0;
        T::deserialize(&self.buf)
    }
}

/// Reads at least one byte into `buf`, a closed stream is an error.
async fn read_some<R: AsyncRead + Unpin>(rx: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    match rx.read(buf).await? {
        0 => Err(io::ErrorKind::UnexpectedEof.into()),
        n => Ok(n),
    }
}
