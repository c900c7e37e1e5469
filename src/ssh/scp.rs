//! SCP sink/source protocol for a single regular file
//!
//! The remote side runs `scp -t <path>` (sink, we upload) or `scp -f <path>`
//! (source, we download). Each control message is a line; each step is
//! acknowledged with a single byte: `0` ok, `1` warning, `2` fatal, the
//! latter two followed by a message line.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::SshError;

const OK: u8 = 0;
const MAX_LINE: usize = 4096;

/// A file received from the remote source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub mode: u32,
    pub content: Vec<u8>,
}

/// Send `content` to a remote `scp -t`
pub async fn send_file<R, W>(
    reader: &mut R,
    writer: &mut W,
    name: &str,
    mode: u32,
    content: &[u8],
) -> Result<(), SshError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if name.contains('\n') || name.contains('/') {
        return Err(SshError::Transfer(format!("invalid file name '{name}'")));
    }

    read_ack(reader).await?;

    let header = format!("C{:04o} {} {}\n", mode & 0o7777, content.len(), name);
    writer.write_all(header.as_bytes()).await?;
    writer.flush().await?;
    read_ack(reader).await?;

    writer.write_all(content).await?;
    writer.write_all(&[OK]).await?;
    writer.flush().await?;
    read_ack(reader).await?;

    writer.shutdown().await?;
    Ok(())
}

/// Receive one file from a remote `scp -f`, refusing anything over `max_size`
pub async fn receive_file<R, W>(
    reader: &mut R,
    writer: &mut W,
    max_size: u64,
) -> Result<RemoteFile, SshError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send_ok(writer).await?;

    loop {
        let kind = read_byte(reader).await?;
        let line = read_line(reader).await?;
        match kind {
            b'C' => {
                let (mode, size, name) = parse_file_header(&line)?;
                if size > max_size {
                    return Err(SshError::Transfer(format!(
                        "remote file '{name}' is {size} bytes, limit is {max_size}"
                    )));
                }
                send_ok(writer).await?;

                let len = usize::try_from(size)
                    .map_err(|_| SshError::Transfer(format!("file size {size} too large")))?;
                let mut content = vec![0; len];
                reader.read_exact(&mut content).await?;
                read_ack(reader).await?;
                send_ok(writer).await?;

                return Ok(RemoteFile {
                    name,
                    mode,
                    content,
                });
            }
            // Timestamps (scp -p); acknowledged and ignored
            b'T' => send_ok(writer).await?,
            1 | 2 => return Err(SshError::Transfer(line)),
            b'D' | b'E' => {
                return Err(SshError::Transfer(
                    "directory transfers are not supported".to_string(),
                ))
            }
            other => {
                return Err(SshError::Transfer(format!(
                    "unexpected protocol message 0x{other:02x}"
                )))
            }
        }
    }
}

/// Read one acknowledgement, turning warnings and errors into `Transfer`
pub async fn read_ack<R>(reader: &mut R) -> Result<(), SshError>
where
    R: AsyncRead + Unpin,
{
    match read_byte(reader).await? {
        OK => Ok(()),
        1 | 2 => {
            let message = read_line(reader).await?;
            Err(SshError::Transfer(message))
        }
        other => Err(SshError::Transfer(format!(
            "unexpected acknowledgement 0x{other:02x}"
        ))),
    }
}

async fn send_ok<W>(writer: &mut W) -> Result<(), SshError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[OK]).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_byte<R>(reader: &mut R) -> Result<u8, SshError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    let read = reader.read(&mut byte).await?;
    if read == 0 {
        return Err(SshError::Transfer(
            "remote scp closed the stream unexpectedly".to_string(),
        ));
    }
    Ok(byte[0])
}

async fn read_line<R>(reader: &mut R) -> Result<String, SshError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = read_byte(reader).await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_LINE {
            return Err(SshError::Transfer("protocol line too long".to_string()));
        }
        line.push(byte);
    }
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

/// Parse the body of a `C<mode> <size> <name>` line (leading `C` already consumed)
fn parse_file_header(line: &str) -> Result<(u32, u64, String), SshError> {
    let malformed = || SshError::Transfer(format!("malformed file header 'C{line}'"));

    let mut parts = line.splitn(3, ' ');
    let mode = parts
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .ok_or_else(malformed)?;
    let size = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(malformed)?;
    let name = parts
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(malformed)?;
    Ok((mode, size, name.to_string()))
}
