//! Incremental decoding of the streamed chat response body.
//!
//! The assistant service delivers a chat response as a chunked byte stream
//! of newline-delimited frames. A token frame is `data: <text>`; the frame
//! `data: [DONE]` marks successful completion. Blank lines and lines
//! without the field prefix are keep-alive padding and are skipped.

use anyhow::Result;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, warn};

/// Field prefix carried by every meaningful frame.
pub const DATA_PREFIX: &str = "data: ";

/// Payload of the frame that ends a response successfully.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Response tokens in arrival order. Ends at the completion sentinel or
/// when the source is exhausted; a mid-stream read failure is the final
/// item.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One decoded frame of the response protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A frame carrying response text.
    Token(String),
    /// The completion sentinel; nothing after it is decoded.
    Done,
}

/// Incremental frame decoder.
///
/// Bytes are buffered until a full `\n`-terminated line is available, so a
/// logical line — or a multi-byte UTF-8 sequence inside one — split across
/// chunk boundaries is held over rather than decoded partially. The same
/// logical byte stream produces the same frames under any chunking.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the completion sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of bytes and return the frames it completes.
    ///
    /// Once the sentinel has been seen all further input is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.buf.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(pos) = self.buf[consumed..].iter().position(|&b| b == b'\n') {
            let line_end = consumed + pos;
            let frame = Self::decode_line(&self.buf[consumed..line_end]);
            consumed = line_end + 1;

            match frame {
                Some(Frame::Done) => {
                    self.done = true;
                    self.buf.clear();
                    frames.push(Frame::Done);
                    return frames;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }
        self.buf.drain(..consumed);
        frames
    }

    /// Flush at end of source. A final unterminated line still counts as a
    /// frame, so a token is never lost to a missing trailing newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.done || self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        let frame = Self::decode_line(&line);
        if matches!(frame, Some(Frame::Done)) {
            self.done = true;
        }
        frame
    }

    fn decode_line(line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                warn!("skipping undecodable frame: {}", e);
                return None;
            }
        };
        let payload = line.strip_prefix(DATA_PREFIX)?;
        if payload == DONE_SENTINEL {
            return Some(Frame::Done);
        }
        if payload.is_empty() {
            return None;
        }
        Some(Frame::Token(payload.to_string()))
    }
}

struct DecodeState<S> {
    // None once the sentinel, EOF or a read failure has been reached, so
    // the remainder of the response body is released rather than read out.
    source: Option<Pin<Box<S>>>,
    decoder: FrameDecoder,
}

/// Adapt a raw byte source into a [`TokenStream`].
///
/// Tokens come out in the exact order their frames arrive. The stream ends
/// at the first `data: [DONE]` frame even when the source has more bytes;
/// a source that ends without the sentinel is treated as natural
/// completion, not truncation.
pub fn decode_stream<S, E>(source: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = DecodeState {
        source: Some(Box::pin(source)),
        decoder: FrameDecoder::new(),
    };

    let frames = stream::unfold(state, |mut state| async move {
        let mut pending: Vec<Result<String>> = Vec::new();
        loop {
            if !pending.is_empty() {
                return Some((pending, state));
            }
            let source = state.source.as_mut()?;
            match source.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(&chunk) {
                        match frame {
                            Frame::Token(text) => pending.push(Ok(text)),
                            Frame::Done => {
                                debug!("completion sentinel received");
                                state.source = None;
                            }
                        }
                    }
                    if state.source.is_none() && pending.is_empty() {
                        return None;
                    }
                }
                Some(Err(e)) => {
                    state.source = None;
                    pending.push(Err(anyhow::Error::new(e).context("reading response stream")));
                }
                None => {
                    state.source = None;
                    if let Some(Frame::Token(text)) = state.decoder.finish() {
                        pending.push(Ok(text));
                    }
                    if pending.is_empty() {
                        return None;
                    }
                }
            }
        }
    })
    .flat_map(stream::iter);

    Box::pin(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunked(chunks: &[&[u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + use<> {
        let chunks: Vec<Result<Bytes, std::io::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    async fn collect_tokens(stream: TokenStream) -> Vec<String> {
        stream
            .map(|item| item.expect("unexpected stream error"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn tokens_arrive_in_frame_order() {
        let stream = decode_stream(chunked(&[
            b"data: Hi\n\ndata: there\n\n",
            b"data: !\n\ndata: [DONE]\n\n",
        ]));
        assert_eq!(collect_tokens(stream).await, vec!["Hi", "there", "!"]);
    }

    #[tokio::test]
    async fn any_chunking_yields_the_same_tokens() {
        // Includes a multi-byte character so splits can land mid-sequence.
        let body = "data: caf\u{e9} au lait\n\ndata: \u{3053}\u{3093}\n\ndata: [DONE]\n\n".as_bytes();
        let expected = vec!["caf\u{e9} au lait".to_string(), "\u{3053}\u{3093}".to_string()];

        for split in 1..body.len() {
            let stream = decode_stream(chunked(&[&body[..split], &body[split..]]));
            assert_eq!(collect_tokens(stream).await, expected, "split at {}", split);
        }
    }

    #[tokio::test]
    async fn sentinel_ends_the_stream_before_end_of_source() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
            Ok(Bytes::from_static(b"data: never\n")),
        ];
        let source = stream::iter(chunks).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let tokens = collect_tokens(decode_stream(source)).await;
        assert_eq!(tokens, vec!["a"]);
        // The chunk after the sentinel is never read.
        assert_eq!(polled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn source_exhaustion_is_natural_completion() {
        let stream = decode_stream(chunked(&[b"data: hello\n\ndata: world\n\n"]));
        assert_eq!(collect_tokens(stream).await, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn trailing_unterminated_frame_is_flushed() {
        let stream = decode_stream(chunked(&[b"data: first\ndata: last"]));
        assert_eq!(collect_tokens(stream).await, vec!["first", "last"]);
    }

    #[tokio::test]
    async fn padding_lines_are_ignored() {
        let stream = decode_stream(chunked(&[
            b": keep-alive\n\nevent: ping\ndata: real\n\ndata: \ndata: [DONE]\n",
        ]));
        assert_eq!(collect_tokens(stream).await, vec!["real"]);
    }

    #[tokio::test]
    async fn crlf_line_endings_are_accepted() {
        let stream = decode_stream(chunked(&[b"data: one\r\ndata: two\r\ndata: [DONE]\r\n"]));
        assert_eq!(collect_tokens(stream).await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn read_failure_is_the_final_item() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: ok\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"data: after\n")),
        ];
        let mut stream = decode_stream(stream::iter(chunks));

        assert_eq!(stream.next().await.unwrap().unwrap(), "ok");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn decoder_holds_over_partial_multibyte_sequences() {
        let mut decoder = FrameDecoder::new();
        let body = "data: \u{e9}t\u{e9}\n".as_bytes();
        // Split inside the first two-byte character.
        assert!(decoder.push(&body[..7]).is_empty());
        assert_eq!(
            decoder.push(&body[7..]),
            vec![Frame::Token("\u{e9}t\u{e9}".to_string())]
        );
    }

    #[test]
    fn decoder_discards_everything_after_done() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: [DONE]\ndata: late\n");
        assert_eq!(frames, vec![Frame::Done]);
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: more\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn tokens_preserve_interior_whitespace_and_prefixes() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: data:  spaced out \n");
        assert_eq!(frames, vec![Frame::Token("data:  spaced out ".to_string())]);
    }
}
