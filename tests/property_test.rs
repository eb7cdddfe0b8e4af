use indexmap::{IndexMap, IndexSet};
use proptest::prelude::*;
use senax_collections::flags::classify;
use senax_collections::map::{write_map, MAX_CHUNK_SIZE};
use senax_collections::{Codec, Config, Value, WriteContext};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Float),
        "[a-z]{0,6}".prop_map(Value::Str),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::vec(inner.clone(), 0..6)
                .prop_map(|items| Value::Set(items.into_iter().collect::<IndexSet<_>>())),
            prop::collection::vec((inner.clone(), inner), 0..6)
                .prop_map(|entries| Value::Map(entries.into_iter().collect::<IndexMap<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn prop_roundtrip_untracked(v in value()) {
        let codec = Codec::default();
        let mut bytes = codec.encode(&v).unwrap();
        let decoded = codec.decode(&mut bytes).unwrap();
        prop_assert!(bytes.is_empty());
        prop_assert_eq!(decoded, v);
    }

    #[test]
    fn prop_roundtrip_tracked(v in value()) {
        let codec = Codec::with_config(Config::default().with_ref_tracking(true));
        let mut bytes = codec.encode(&v).unwrap();
        let decoded = codec.decode(&mut bytes).unwrap();
        prop_assert!(bytes.is_empty());
        prop_assert_eq!(decoded, v);
    }

    #[test]
    fn prop_classification_is_stable(items in prop::collection::vec(scalar(), 0..32)) {
        let first = classify(&items);
        prop_assert_eq!(first, classify(&items));
        prop_assert_eq!(first.has_null, items.iter().any(Value::is_null));
    }

    #[test]
    fn prop_chunks_cover_every_entry(
        entries in prop::collection::vec((scalar(), scalar()), 0..400)
    ) {
        let map: IndexMap<Value, Value> = entries.into_iter().collect();
        let codec = Codec::default();
        let mut ctx = WriteContext::new(&codec.registry, &codec.config);
        let layout = write_map(&mut ctx, &map).unwrap();
        for chunk in &layout.chunks {
            prop_assert!(chunk.size >= 1 && chunk.size <= MAX_CHUNK_SIZE);
        }
        if layout.sentinel.is_none() {
            prop_assert_eq!(layout.chunked_entries(), map.len());
        } else {
            prop_assert!(layout.chunked_entries() < map.len());
        }
    }
}
