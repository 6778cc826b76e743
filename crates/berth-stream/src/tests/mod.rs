//! Crate-level behaviour tests and stream properties.

use std::io::{self, Read};

use proptest::prelude::*;
use serde_json::{Value, json};

use crate::decoder::{DecodeError, decode};


/// Reader returning the body in the given piece sizes, cycling through them.
struct Pieces {
    data: Vec<u8>,
    sizes: Vec<usize>,
    turn: usize,
}

impl Read for Pieces {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }
        let size = self.sizes.get(self.turn % self.sizes.len()).copied().unwrap_or(1);
        self.turn += 1;
        let count = size.max(1).min(buf.len()).min(self.data.len());
        buf[..count].copy_from_slice(&self.data[..count]);
        self.data.drain(..count);
        Ok(count)
    }
}

fn events(count: usize) -> Vec<Value> {
    (0..count)
        .map(|index| {
            json!({
                "status": "Downloading",
                "id": format!("layer{index}"),
                "progressDetail": {"current": index * 7, "total": 1000},
                "note": "multi\nline ✓",
                "ratio": -12.5,
            })
        })
        .collect()
}

proptest! {
    #[test]
    fn any_chunking_yields_the_same_values(
        count in 1_usize..12,
        sizes in prop::collection::vec(1_usize..40, 1..8),
        separator in prop::sample::select(vec!["", "\n", "\r\n", "  "]),
    ) {
        let expected = events(count);
        let body = expected
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(separator);
        let reader = Pieces { data: body.into_bytes(), sizes, turn: 0 };
        let decoded: Vec<Value> = decode(reader)
            .with_chunk_size(16)
            .collect::<Result<_, _>>()
            .expect("decode chunked body");
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn trailing_partial_value_follows_complete_ones(
        count in 1_usize..6,
        cut in 1_usize..20,
    ) {
        let expected = events(count);
        let mut body: Vec<u8> = expected.iter().flat_map(|value| value.to_string().into_bytes()).collect();
        let partial = events(1).remove(0).to_string().into_bytes();
        body.extend_from_slice(&partial[..cut.min(partial.len() - 1)]);
        let reader = Pieces { data: body, sizes: vec![3], turn: 0 };
        let items: Vec<Result<Value, DecodeError>> = decode(reader).collect();
        prop_assert_eq!(items.len(), count + 1);
        for (item, value) in items.iter().zip(&expected) {
            prop_assert_eq!(item.as_ref().ok(), Some(value));
        }
        let is_truncated = matches!(items.last(), Some(Err(DecodeError::Truncated { .. })));
        prop_assert!(is_truncated);
    }
}
