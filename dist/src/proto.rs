//! The wire protocol between group members.
//!
//! Every message is a length-delimited frame: a big-endian `u32` length, a
//! kind byte, then the payload. Control payloads are JSON; tensor payloads
//! are raw native f32 words.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type LenType = u32;
const LEN_SIZE: usize = size_of::<LenType>();

/// Upper bound on a single frame, to reject corrupt headers early.
const MAX_FRAME: usize = 1 << 30;

const KIND_HELLO: u8 = 0;
const KIND_DATA: u8 = 1;
const KIND_BARRIER: u8 = 2;

/// The identification a member presents when joining the group.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Hello {
    pub rank: usize,
    pub group: String,
}

fn invalid<T>(msg: String) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, msg))
}

async fn send_frame<W>(tx: &mut W, kind: u8, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = (payload.len() + 1) as LenType;
    tx.write_all(&len.to_be_bytes()).await?;
    tx.write_all(&[kind]).await?;
    tx.write_all(payload).await?;
    tx.flush().await
}

/// Reads a frame header and returns `(kind, payload_len)`.
async fn recv_header<R>(rx: &mut R) -> io::Result<(u8, usize)>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0; LEN_SIZE];
    rx.read_exact(&mut len_buf).await?;
    let len = LenType::from_be_bytes(len_buf) as usize;

    if len == 0 || len > MAX_FRAME {
        return invalid(format!("unreasonable frame length {len}"));
    }

    let mut kind = [0u8];
    rx.read_exact(&mut kind).await?;
    Ok((kind[0], len - 1))
}

pub(crate) async fn send_hello<W>(tx: &mut W, hello: &Hello) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // SAFETY of the unwrap: the derived Serialize impl for `Hello` has no
    // non-string map keys, so JSON encoding cannot fail.
    let payload = serde_json::to_vec(hello).unwrap();
    send_frame(tx, KIND_HELLO, &payload).await
}

pub(crate) async fn recv_hello<R>(rx: &mut R) -> io::Result<Hello>
where
    R: AsyncRead + Unpin,
{
    let (kind, len) = recv_header(rx).await?;
    if kind != KIND_HELLO {
        return invalid(format!("expected a hello frame, got kind {kind}"));
    }

    let mut payload = vec![0; len];
    rx.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload).map_err(io::Error::from)
}

pub(crate) async fn send_data<W>(tx: &mut W, data: &[f32]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_frame(tx, KIND_DATA, bytemuck::cast_slice(data)).await
}

/// Receives a data frame of exactly `out.len()` values into `out`.
pub(crate) async fn recv_data_into<R>(rx: &mut R, out: &mut [f32]) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let (kind, len) = recv_header(rx).await?;
    if kind != KIND_DATA {
        return invalid(format!("expected a data frame, got kind {kind}"));
    }

    if len != size_of_val(out) {
        return invalid(format!(
            "data frame holds {len} bytes, expected {}",
            size_of_val(out)
        ));
    }

    rx.read_exact(bytemuck::cast_slice_mut(out)).await?;
    Ok(())
}

pub(crate) async fn send_barrier<W>(tx: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_frame(tx, KIND_BARRIER, &[]).await
}

pub(crate) async fn recv_barrier<R>(rx: &mut R) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let (kind, len) = recv_header(rx).await?;
    if kind != KIND_BARRIER || len != 0 {
        return invalid(format!("expected a barrier frame, got kind {kind}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn hello_roundtrip() {
        let (mut a, mut b) = duplex(1024);

        let hello = Hello {
            rank: 3,
            group: "g".into(),
        };
        send_hello(&mut a, &hello).await.unwrap();

        let got = recv_hello(&mut b).await.unwrap();
        assert_eq!(got.rank, 3);
        assert_eq!(got.group, "g");
    }

    #[tokio::test]
    async fn data_roundtrip_preserves_values() {
        let (mut a, mut b) = duplex(1024);

        send_data(&mut a, &[1.5, -2.0, 0.25]).await.unwrap();

        let mut out = [0.0f32; 3];
        recv_data_into(&mut b, &mut out).await.unwrap();
        assert_eq!(out, [1.5, -2.0, 0.25]);
    }

    #[tokio::test]
    async fn mismatched_data_length_is_rejected() {
        let (mut a, mut b) = duplex(1024);

        send_data(&mut a, &[1.0, 2.0]).await.unwrap();

        let mut out = [0.0f32; 3];
        assert!(recv_data_into(&mut b, &mut out).await.is_err());
    }
}
