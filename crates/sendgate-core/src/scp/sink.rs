//! `scp -t`: receive files from the client.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{ACK, Info};
use crate::error::{Error, Result};
use crate::handler::{FileEntry, TransferHandler};
use crate::io::BoundedReader;
use crate::path;
use crate::session::{SessionContext, Stderr};

/// Longest control line accepted.
const MAX_LINE: u64 = 64 * 1024;

/// One control line of the copy protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// `T<mtime> 0 <atime> 0`
    Times { mtime: i64, atime: i64 },
    /// `C<mode> <size> <name>`
    File { mode: u32, size: u64, name: String },
    /// `D<mode> 0 <name>`
    Dir { mode: u32, name: String },
    /// `E`
    End,
}

/// Parse one control line (without its trailing newline).
///
/// A line starting with a known control letter but with malformed fields
/// is a [`Error::Parse`]; anything else is [`Error::UnhandledInput`].
pub fn parse_control(line: &str) -> Result<Control> {
    let parse_err = || Error::Parse {
        line: line.to_string(),
    };

    let Some(kind) = line.chars().next() else {
        return Err(Error::UnhandledInput {
            line: line.to_string(),
        });
    };
    let rest = &line[kind.len_utf8()..];

    match kind {
        'T' => {
            let fields: Vec<&str> = rest.split(' ').collect();
            let [mtime, "0", atime, "0"] = fields.as_slice() else {
                return Err(parse_err());
            };
            Ok(Control::Times {
                mtime: parse_decimal(mtime).ok_or_else(parse_err)?,
                atime: parse_decimal(atime).ok_or_else(parse_err)?,
            })
        }
        'C' => {
            let mut fields = rest.splitn(3, ' ');
            let (Some(mode), Some(size), Some(name)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(parse_err());
            };
            Ok(Control::File {
                mode: parse_mode(mode).ok_or_else(parse_err)?,
                size: parse_decimal(size).ok_or_else(parse_err)?,
                name: name.to_string(),
            })
        }
        'D' => {
            let mut fields = rest.splitn(3, ' ');
            let (Some(mode), Some("0"), Some(name)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(parse_err());
            };
            Ok(Control::Dir {
                mode: parse_mode(mode).ok_or_else(parse_err)?,
                name: name.to_string(),
            })
        }
        'E' if rest.is_empty() => Ok(Control::End),
        _ => Err(Error::UnhandledInput {
            line: line.to_string(),
        }),
    }
}

fn parse_decimal<T: std::str::FromStr>(field: &str) -> Option<T> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Four octal digits.
fn parse_mode(field: &str) -> Option<u32> {
    if field.len() != 4 || !field.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(field, 8).ok()
}

async fn ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[ACK]).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line, stripping the terminator. `None` at end of stream.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<String>> {
    buf.clear();
    let n = (&mut *reader).take(MAX_LINE).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n as u64 == MAX_LINE {
        return Err(Error::Protocol {
            message: format!("control line longer than {} bytes", MAX_LINE),
        });
    }
    match std::str::from_utf8(buf) {
        Ok(text) => Ok(Some(text.to_string())),
        Err(_) => Err(Error::Parse {
            line: String::from_utf8_lossy(buf).into_owned(),
        }),
    }
}

/// Run the receive loop until the client closes its side.
///
/// Returns whether any file failed to store. Per-file failures are reported
/// on `stderr` after the batch; protocol violations end the loop with an
/// error.
pub(super) async fn copy_from_client<R, W>(
    handler: &dyn TransferHandler,
    ctx: &SessionContext,
    info: &Info,
    reader: &mut R,
    writer: &mut W,
    stderr: &Stderr,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    ack(writer).await?;

    let mut root = info.path.clone();
    let mut dirs: Vec<String> = Vec::new();
    let (mut mtime, mut atime) = (0i64, 0i64);
    let mut messages: Vec<String> = Vec::new();
    let mut errors: Vec<Error> = Vec::new();
    let mut line = Vec::new();

    while let Some(text) = read_line(reader, &mut line).await? {
        match parse_control(&text)? {
            Control::Times { mtime: m, atime: a } => {
                mtime = m;
                atime = a;
                ack(writer).await?;
            }
            Control::File { mode, size, name } => {
                ack(writer).await?;

                let filepath = path::join([root.as_str(), name.as_str()]);
                debug!(name = %name, filepath = %filepath, size, mode = format_args!("{:o}", mode), "Receiving file");

                let mut body = BoundedReader::new(&mut *reader, size);
                let entry = FileEntry::new(name.clone(), filepath, mode, size)
                    .with_times(mtime, atime)
                    .with_reader(&mut body);
                let result = handler.write(ctx, entry).await;

                // Skip whatever the handler left unread so the next control
                // line starts where the client put it.
                tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
                let missing = body.remaining();
                let truncated = if missing > 0 {
                    Some(format!("{}: stream ended after {} of {} bytes", name, size - missing, size))
                } else {
                    // Transfer terminator, value ignored.
                    match reader.read_u8().await {
                        Ok(_) => None,
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            Some(format!("{}: stream ended before the transfer terminator", name))
                        }
                        Err(e) => return Err(e.into()),
                    }
                };
                if let Some(message) = truncated {
                    warn!(name = %name, size, missing, "Upload truncated");
                    errors.push(Error::Protocol { message });
                    break;
                }

                match result {
                    Ok(message) => messages.push(message),
                    Err(err) => {
                        warn!(name = %name, error = %err, "Failed to write file");
                        errors.push(err);
                    }
                }
                mtime = 0;
                atime = 0;
                ack(writer).await?;
            }
            Control::Dir { name, .. } => {
                let entered = path::join([root.as_str(), name.as_str()]);
                dirs.push(std::mem::replace(&mut root, entered));
                ack(writer).await?;
            }
            Control::End => {
                if let Some(parent) = dirs.pop() {
                    root = parent;
                }
                ack(writer).await?;
            }
        }
    }

    for message in messages.iter().filter(|m| !m.is_empty()) {
        stderr.write_line(message).await?;
    }
    for err in &errors {
        stderr.write_line(&err.to_string()).await?;
    }
    ack(writer).await?;

    Ok(!errors.is_empty())
}
