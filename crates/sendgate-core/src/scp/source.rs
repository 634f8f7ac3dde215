//! `scp -f`: send one file to the client.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{ACK, Info};
use crate::error::{Error, Result};
use crate::handler::{RandomAccessReader, TransferHandler};
use crate::io::RangeEof;
use crate::path;
use crate::session::SessionContext;

/// Payload chunk size.
const CHUNK_SIZE: usize = 32 * 1024;

/// Wait for the client's response byte.
///
/// `1` (warning) and `2` (fatal) are followed by a message line.
async fn expect_ack<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<()> {
    let code = match reader.read_u8().await {
        Ok(code) => code,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    };

    match code {
        ACK => Ok(()),
        1 | 2 => {
            let mut message = String::new();
            reader.read_line(&mut message).await?;
            Err(Error::Protocol {
                message: message.trim_end().to_string(),
            })
        }
        other => Err(Error::Protocol {
            message: format!("unexpected response byte {:#04x}", other),
        }),
    }
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub(super) async fn copy_to_client<R, W>(
    handler: &dyn TransferHandler,
    ctx: &SessionContext,
    info: &Info,
    reader: &mut R,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    expect_ack(reader).await?;

    let (file, source) = handler.read(ctx, &info.path).await?;
    if file.is_dir {
        return Err(Error::InvalidPath {
            path: info.path.clone(),
        });
    }
    let source = RangeEof::new(source);

    if file.modified > 0 {
        send_line(writer, &format!("T{} 0 {} 0", file.modified, file.modified)).await?;
        expect_ack(reader).await?;
    }

    let name = if file.name.is_empty() {
        path::base(&info.path)
    } else {
        path::base(&file.name)
    };
    send_line(writer, &format!("C{:04o} {} {}", file.mode & 0o7777, file.size, name)).await?;
    expect_ack(reader).await?;

    debug!(name = %name, size = file.size, "Sending file");
    let mut offset = 0u64;
    while offset < file.size {
        let want = usize::try_from(file.size - offset)
            .unwrap_or(usize::MAX)
            .min(CHUNK_SIZE);
        let chunk = source.read_at(offset, want).await?;
        if chunk.is_empty() {
            return Err(Error::storage(format!(
                "{}: content ended at {} of {} bytes",
                name, offset, file.size
            )));
        }
        writer.write_all(&chunk).await?;
        offset += chunk.len() as u64;
    }
    writer.write_all(&[ACK]).await?;
    writer.flush().await?;

    expect_ack(reader).await
}
