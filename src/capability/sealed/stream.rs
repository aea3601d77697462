//! Packet-at-a-time decryption of a ciphertext byte stream.
//!
//! At most one stored packet is held in memory. Each decrypted packet is
//! trimmed to the requested plaintext window and emitted as one chunk.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use zeroize::Zeroizing;

use super::container;
use crate::capability::CapabilityError;
use crate::crypto::aes::AES_KEY_SIZE;
use crate::range::STORED_PACKET_SIZE;

/// Raw object bytes as they arrive from the origin.
pub type CiphertextStream = BoxStream<'static, Result<Bytes, CapabilityError>>;

/// The plaintext bytes to emit from a run of packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaintextWindow {
    /// Sequence number of the first packet in the stream.
    pub first_seq: u64,
    /// Bytes to drop from the front of the decrypted stream.
    pub skip: u64,
    /// Bytes to emit after the skip. `None` runs to the end of the object.
    pub length: Option<u64>,
}

struct PacketReader {
    upstream: CiphertextStream,
    buffer: BytesMut,
    file_key: Zeroizing<[u8; AES_KEY_SIZE]>,
    seq: u64,
    skip: u64,
    remaining: Option<u64>,
    done: bool,
}

impl PacketReader {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, CapabilityError>> {
        if self.done {
            return None;
        }
        let result = self.read_plaintext().await;
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result.transpose()
    }

    async fn read_plaintext(&mut self) -> Result<Option<Bytes>, CapabilityError> {
        while self.remaining != Some(0) {
            let Some(stored) = self.next_packet().await? else {
                return match self.remaining {
                    Some(_) => Err(CapabilityError::Corrupted(
                        "object ended before the requested range".to_string(),
                    )),
                    None => Ok(None),
                };
            };

            let mut plain = Bytes::from(container::open_packet(&stored, &self.file_key, self.seq)?);
            self.seq += 1;

            let skip = self.skip.min(plain.len() as u64);
            self.skip -= skip;
            plain = plain.slice(skip as usize..);
            if let Some(remaining) = self.remaining.as_mut() {
                let take = (*remaining).min(plain.len() as u64);
                plain.truncate(take as usize);
                *remaining -= take;
            }
            if !plain.is_empty() {
                return Ok(Some(plain));
            }
        }
        Ok(None)
    }

    /// Next stored packet. Only the last one of an object may be short.
    async fn next_packet(&mut self) -> Result<Option<Bytes>, CapabilityError> {
        let stored = STORED_PACKET_SIZE as usize;
        while self.buffer.len() < stored {
            match self.upstream.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.buffer.len().min(stored);
        Ok(Some(self.buffer.split_to(take).freeze()))
    }
}

/// Decrypt `upstream`, which starts at packet `window.first_seq`, and yield
/// the plaintext selected by `window`.
pub fn decrypt_stream(
    upstream: CiphertextStream,
    file_key: Zeroizing<[u8; AES_KEY_SIZE]>,
    window: PlaintextWindow,
) -> impl Stream<Item = Result<Bytes, CapabilityError>> + Send + 'static {
    let reader = PacketReader {
        upstream,
        buffer: BytesMut::with_capacity(STORED_PACKET_SIZE as usize),
        file_key,
        seq: window.first_seq,
        skip: window.skip,
        remaining: window.length,
        done: false,
    };
    stream::unfold(reader, |mut reader| async move {
        let chunk = reader.next_chunk().await?;
        Some((chunk, reader))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KeyMaterial;
    use crate::range::{RequestRange, PACKET_SIZE};
    use crate::capability::sealed::container::{parse_header, seal, unwrap_file_key, Metadata};
    use futures::TryStreamExt;

    const MASTER: [u8; 32] = [0x31; 32];

    struct Sealed {
        object: Vec<u8>,
        content: Vec<u8>,
        header_len: usize,
        metadata_offset: u64,
        file_key: Zeroizing<[u8; AES_KEY_SIZE]>,
    }

    fn sealed(len: usize) -> Sealed {
        let content: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
        let metadata = Metadata {
            name: "clip.webm".to_string(),
            content_type: "video/webm".to_string(),
            size: len as u64,
        };
        let object = seal(&content, &metadata, &MASTER);
        let header = parse_header(&object).unwrap();
        let file_key = unwrap_file_key(&KeyMaterial::new(MASTER.to_vec()), &header).unwrap();
        let metadata_offset = 2 + serde_json::to_vec(&metadata).unwrap().len() as u64;
        Sealed {
            header_len: header.length as usize,
            object,
            content,
            metadata_offset,
            file_key,
        }
    }

    /// Ciphertext delivered in uneven chunks, as a network would.
    fn chunked(data: &[u8], chunk: usize) -> CiphertextStream {
        let chunks: Vec<Result<Bytes, CapabilityError>> = data
            .chunks(chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks).boxed()
    }

    async fn collect(
        upstream: CiphertextStream,
        file_key: Zeroizing<[u8; AES_KEY_SIZE]>,
        window: PlaintextWindow,
    ) -> Result<Vec<Bytes>, CapabilityError> {
        decrypt_stream(upstream, file_key, window).try_collect().await
    }

    #[tokio::test]
    async fn test_whole_object_in_packet_sized_chunks() {
        let s = sealed(3 * PACKET_SIZE as usize + 10);
        let upstream = chunked(&s.object[s.header_len..], 7_777);
        let window = PlaintextWindow {
            first_seq: 0,
            skip: s.metadata_offset,
            length: None,
        };

        let chunks = collect(upstream, s.file_key.clone(), window).await.unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() as u64 <= PACKET_SIZE));
        assert_eq!(chunks.concat(), s.content);
    }

    #[tokio::test]
    async fn test_ranged_window_matches_plaintext() {
        let s = sealed(200_000);

        for (start, length) in [(0u64, 10u64), (65_500, 100), (131_000, 60_000), (199_990, 10)] {
            let mut range = RequestRange::new(start, length);
            range.header_offset = s.header_len as u64;
            range.metadata_offset = s.metadata_offset;
            range.set_file_size(s.content.len() as u64);

            let from = range.start_bytes() as usize;
            let to = (range.end_bytes() as usize).min(s.object.len());
            let window = PlaintextWindow {
                first_seq: range.start_package(),
                skip: range.skip_beginning(),
                length: Some(range.length),
            };
            let chunks = collect(chunked(&s.object[from..to], 1_000), s.file_key.clone(), window)
                .await
                .unwrap();
            assert_eq!(
                chunks.concat(),
                &s.content[start as usize..(start + length) as usize],
                "range {}+{}",
                start,
                length
            );
        }
    }

    #[tokio::test]
    async fn test_short_object_is_an_error() {
        let s = sealed(1_000);
        let window = PlaintextWindow {
            first_seq: 0,
            skip: s.metadata_offset,
            length: Some(5_000),
        };
        let err = collect(chunked(&s.object[s.header_len..], 512), s.file_key.clone(), window)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid data: object ended before the requested range"
        );
    }

    #[tokio::test]
    async fn test_wrong_sequence_stops_the_stream() {
        let s = sealed(2 * PACKET_SIZE as usize);
        let window = PlaintextWindow {
            first_seq: 1,
            skip: 0,
            length: None,
        };
        let mut stream = Box::pin(decrypt_stream(
            chunked(&s.object[s.header_len..], 4_096),
            s.file_key.clone(),
            window,
        ));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Invalid data: packet sequence mismatch");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_upstream_error_is_passed_on() {
        let s = sealed(100);
        let upstream: CiphertextStream = stream::iter(vec![Err(CapabilityError::Timeout)]).boxed();
        let window = PlaintextWindow {
            first_seq: 0,
            skip: s.metadata_offset,
            length: None,
        };
        assert!(matches!(
            collect(upstream, s.file_key.clone(), window).await,
            Err(CapabilityError::Timeout)
        ));
    }
}
