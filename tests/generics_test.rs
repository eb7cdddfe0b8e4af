use indexmap::IndexMap;
use senax_collections::context::HasGenerics;
use senax_collections::{
    read_any, write_any, Codec, Config, EncoderError, GenericType, Limits, ReadContext, TypeId,
    Value, WriteContext,
};
use std::sync::Arc;

fn string_to_int_lists() -> GenericType {
    GenericType::map(
        GenericType::of(TypeId::STRING),
        GenericType::list(GenericType::of(TypeId::INT)),
    )
}

fn sample() -> Value {
    let mut entries = IndexMap::new();
    entries.insert(
        Value::from("a"),
        Value::List(vec![Value::Int(1), Value::Int(2)]),
    );
    Value::Map(entries)
}

#[test]
fn test_nested_declared_types_omit_tags() {
    let codec = Codec::default();
    let encoded = codec.encode_declared(&sample(), string_to_int_lists()).unwrap();
    assert_eq!(
        &encoded[..],
        &[0xFF, 0x08, 0x01, 0x01, 0x24, 0x01, b'a', 0x02, 0x00, 0x02, 0x04]
    );

    let mut reader = encoded;
    let decoded = codec
        .decode_declared(&mut reader, string_to_int_lists())
        .unwrap();
    assert_eq!(decoded, sample());
}

#[test]
fn test_undeclared_nested_types_carry_tags() {
    let codec = Codec::default();
    let encoded = codec.encode(&sample()).unwrap();
    assert_eq!(
        &encoded[..],
        &[0xFF, 0x08, 0x01, 0x01, 0x00, 0x04, 0x01, b'a', 0x06, 0x02, 0x04, 0x02, 0x02, 0x04]
    );
}

#[test]
fn test_reader_needs_the_same_declared_type() {
    let codec = Codec::default();
    let value = Value::List(vec![Value::Int(1)]);
    let declared = GenericType::list(GenericType::of(TypeId::INT));
    let mut reader = codec.encode_declared(&value, declared).unwrap();
    assert!(codec.decode(&mut reader).is_err());
}

#[test]
fn test_frames_balanced_after_write_and_read() {
    let codec = Codec::default();
    let mut ctx = WriteContext::new(&codec.registry, &codec.config);
    {
        let mut scope = ctx.scoped_generic(Arc::new(string_to_int_lists()));
        write_any(&mut scope, &sample()).unwrap();
        assert_eq!(scope.generics.depth(), 1);
    }
    assert_eq!(ctx.generics.depth(), 0);
    let bytes = ctx.writer.freeze();

    let mut ctx = ReadContext::new(bytes, &codec.registry, &codec.config);
    let decoded = {
        let mut scope = ctx.scoped_generic(Arc::new(string_to_int_lists()));
        read_any(&mut scope).unwrap()
    };
    assert_eq!(ctx.generics.depth(), 0);
    assert_eq!(decoded, sample());
}

#[test]
fn test_frames_balanced_after_error() {
    let limits = Limits {
        max_depth: 1,
        ..Limits::default()
    };
    let config = Config::default().with_limits(limits);
    let codec = Codec::with_config(config);
    let mut ctx = WriteContext::new(&codec.registry, &codec.config);
    let result = write_any(&mut ctx, &sample());
    assert!(matches!(result, Err(EncoderError::LimitExceeded(_))));
    assert_eq!(ctx.generics.depth(), 0);
}
