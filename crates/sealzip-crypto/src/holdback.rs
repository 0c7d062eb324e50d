//! Holdback stage: withholds the newest `n` bytes of a stream
//!
//! Used to peel the trailing GCM tag off a ciphertext whose length is only
//! known once the input ends.

use bytes::{Bytes, BytesMut};

#[derive(Debug)]
pub struct Holdback {
    hold: usize,
    tail: BytesMut,
}

impl Holdback {
    pub fn new(hold: usize) -> Self {
        Self {
            hold,
            tail: BytesMut::with_capacity(hold * 2),
        }
    }

    /// Feed a chunk; returns whatever is now known not to belong to the
    /// trailing `hold` bytes.
    pub fn process(&mut self, chunk: &[u8]) -> Option<Bytes> {
        if chunk.is_empty() {
            return None;
        }
        self.tail.extend_from_slice(chunk);
        if self.tail.len() <= self.hold {
            return None;
        }
        let emit = self.tail.len() - self.hold;
        Some(self.tail.split_to(emit).freeze())
    }

    /// End of stream: the reserved tail (shorter than `hold` only when the
    /// whole stream was).
    pub fn finish(self) -> Bytes {
        self.tail.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(input: &[u8], chunk: usize, hold: usize) -> (Vec<u8>, Vec<u8>) {
        let mut stage = Holdback::new(hold);
        let mut forwarded = Vec::new();
        for piece in input.chunks(chunk.max(1)) {
            if let Some(out) = stage.process(piece) {
                forwarded.extend_from_slice(&out);
            }
        }
        (forwarded, stage.finish().to_vec())
    }

    #[test]
    fn test_withholds_tail() {
        let (body, tail) = run(b"0123456789abcdefTAGTAGTAGTAGTAGT", 5, 16);
        assert_eq!(body, b"0123456789abcdef");
        assert_eq!(tail, b"TAGTAGTAGTAGTAGT");
    }

    #[test]
    fn test_short_stream_is_all_tail() {
        let (body, tail) = run(b"short", 2, 16);
        assert!(body.is_empty());
        assert_eq!(tail, b"short");
    }

    #[test]
    fn test_exactly_hold_bytes() {
        let (body, tail) = run(&[1u8; 16], 16, 16);
        assert!(body.is_empty());
        assert_eq!(tail, vec![1u8; 16]);
    }

    #[test]
    fn test_single_large_chunk() {
        let input: Vec<u8> = (0..=255u8).collect();
        let (body, tail) = run(&input, input.len(), 16);
        assert_eq!(body, &input[..240]);
        assert_eq!(tail, &input[240..]);
    }

    #[test]
    fn test_empty_chunk_forwards_nothing() {
        let mut stage = Holdback::new(16);
        assert!(stage.process(b"").is_none());
    }

    proptest! {
        #[test]
        fn prop_split_is_independent_of_chunking(
            input in proptest::collection::vec(any::<u8>(), 0..300),
            chunk in 1usize..40,
        ) {
            let (body, tail) = run(&input, chunk, 16);
            let split = input.len().saturating_sub(16);
            prop_assert_eq!(&body[..], &input[..split]);
            prop_assert_eq!(&tail[..], &input[split..]);
        }
    }
}
