//! In-memory capture backed by tokio channels

use super::{Capture, RxInfo};
use crate::{Error, Result};
use tokio::sync::mpsc;

/// Stack side of an in-memory link.
#[derive(Debug)]
pub struct ChannelCapture {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Wire side of an in-memory link: injects frames toward the stack and
/// observes what it transmits.
#[derive(Debug)]
pub struct ChannelPeer {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelCapture {
    pub fn pair() -> (ChannelCapture, ChannelPeer) {
        let (to_stack, from_peer) = mpsc::unbounded_channel();
        let (to_peer, from_stack) = mpsc::unbounded_channel();
        (
            ChannelCapture {
                rx: from_peer,
                tx: to_peer,
            },
            ChannelPeer {
                tx: to_stack,
                rx: from_stack,
            },
        )
    }
}

impl ChannelPeer {
    /// Queue a frame for the stack. Fails once the stack side is gone.
    pub fn inject(&self, frame: Vec<u8>) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::InterfaceClosed)
    }

    /// Wait for the next transmitted frame; `None` once the stack side is gone.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Transmitted frame if one is already queued.
    pub fn try_next_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

impl Capture for ChannelCapture {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<RxInfo> {
        let frame = self.rx.recv().await.ok_or(Error::InterfaceClosed)?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(RxInfo { len })
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| Error::InterfaceClosed)?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inject_and_recv() {
        let (mut capture, peer) = ChannelCapture::pair();
        peer.inject(vec![1, 2, 3]).unwrap();

        let mut buf = [0u8; 16];
        let info = capture.recv(&mut buf).await.unwrap();
        assert_eq!(info.len, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (mut capture, mut peer) = ChannelCapture::pair();
        assert_eq!(capture.send(&[9, 9]).await.unwrap(), 2);
        assert_eq!(peer.next_frame().await, Some(vec![9, 9]));
        assert!(peer.try_next_frame().is_none());
    }

    #[tokio::test]
    async fn test_peer_dropped_closes() {
        let (mut capture, peer) = ChannelCapture::pair();
        drop(peer);

        let mut buf = [0u8; 16];
        assert!(matches!(
            capture.recv(&mut buf).await,
            Err(Error::InterfaceClosed)
        ));
        assert!(matches!(
            capture.send(&[0]).await,
            Err(Error::InterfaceClosed)
        ));
    }
}
