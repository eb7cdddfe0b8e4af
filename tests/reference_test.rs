use bytes::Bytes;
use senax_collections::{
    Codec, Config, EncoderError, RefDecodeError, SharedRef, Value,
};

fn tracking() -> Codec {
    Codec::with_config(Config::default().with_ref_tracking(true))
}

fn list_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Shared(shared) => list_items(&shared.borrow()),
        Value::List(items) => items.clone(),
        other => panic!("expected list, got {:?}", other),
    }
}

#[test]
fn test_shared_instance_written_once() {
    let codec = tracking();
    let inner = Value::shared(Value::List(vec![Value::Int(1), Value::Int(2)]));
    let value = Value::List(vec![inner.clone(), inner]);

    let mut encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[
            // root list: new tracked value, tag, count
            0x00, 0x06, 0x02,
            // TRACKING_REF | NOT_DECL_ELEMENT_TYPE, element tag list
            0x05, 0x06,
            // first element: new value, then [1, 2]
            0x00, 0x02, 0x04, 0x02, 0x02, 0x04,
            // second element: back-reference to id 1
            0xFE, 0x01,
        ]
    );

    let decoded = codec.decode(&mut encoded).unwrap();
    assert_eq!(decoded, value);
    let items = list_items(&decoded);
    let first = items[0].as_shared().unwrap();
    let second = items[1].as_shared().unwrap();
    assert!(first.ptr_eq(second));
}

#[test]
fn test_without_tracking_shared_is_copied() {
    let codec = Codec::default();
    let inner = Value::shared(Value::List(vec![Value::Int(1), Value::Int(2)]));
    let value = Value::List(vec![inner.clone(), inner]);

    let mut encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[
            0xFF, 0x06, 0x02, 0x04, 0x06, 0x02, 0x04, 0x02, 0x02, 0x04, 0x02, 0x04, 0x02, 0x02,
            0x04
        ]
    );
    let decoded = codec.decode(&mut encoded).unwrap();
    assert_eq!(decoded, value);
    assert!(list_items(&decoded).iter().all(|v| v.as_shared().is_none()));
}

#[test]
fn test_cycle_roundtrip() {
    let codec = tracking();
    let node = SharedRef::new(Value::Null);
    node.replace(Value::List(vec![Value::Shared(node.clone()), Value::Int(1)]));
    let value = Value::Shared(node.clone());

    let mut encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[0x00, 0x06, 0x02, 0x0D, 0xFE, 0x00, 0xFF, 0x02, 0x02]
    );

    let decoded = codec.decode(&mut encoded).unwrap();
    let root = decoded.as_shared().unwrap();
    let items = list_items(&decoded);
    assert_eq!(items.len(), 2);
    assert!(items[0].as_shared().unwrap().ptr_eq(root));
    assert_eq!(items[1], Value::Int(1));

    // Break the cycles so the test does not leak.
    root.replace(Value::Null);
    node.replace(Value::Null);
}

#[test]
fn test_cycle_without_tracking_hits_depth_limit() {
    let codec = Codec::default();
    let node = SharedRef::new(Value::Null);
    node.replace(Value::List(vec![Value::Shared(node.clone())]));
    let result = codec.encode(&Value::Shared(node.clone()));
    assert!(matches!(result, Err(EncoderError::LimitExceeded(_))));
    node.replace(Value::Null);
}

#[test]
fn test_basic_types_tracked_when_not_ignored() {
    let codec = Codec::with_config(
        Config::default()
            .with_ref_tracking(true)
            .with_basic_types_ref_ignored(false),
    );
    let seven = Value::shared(Value::Int(7));
    let value = Value::List(vec![seven.clone(), seven]);
    let mut encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[0x00, 0x06, 0x02, 0x05, 0x02, 0x00, 0x0E, 0xFE, 0x01]
    );
    let decoded = codec.decode(&mut encoded).unwrap();
    let items = list_items(&decoded);
    assert!(items[0].as_shared().unwrap().ptr_eq(items[1].as_shared().unwrap()));
}

#[test]
fn test_basic_types_ignored_by_default() {
    let codec = tracking();
    let seven = Value::shared(Value::Int(7));
    let value = Value::List(vec![seven.clone(), seven]);
    let mut encoded = codec.encode(&value).unwrap();
    assert_eq!(&encoded[..], &[0x00, 0x06, 0x02, 0x04, 0x02, 0x0E, 0x0E]);
    assert_eq!(codec.decode(&mut encoded).unwrap(), value);
}

#[test]
fn test_unknown_reference() {
    let codec = tracking();
    let mut reader = Bytes::from_static(&[0xFE, 0x05]);
    assert!(matches!(
        codec.decode(&mut reader),
        Err(EncoderError::Reference(RefDecodeError::UnknownReference { id: 5 }))
    ));
}

#[test]
fn test_unexpected_flag() {
    let codec = Codec::default();
    let mut reader = Bytes::from_static(&[0x05, 0x02, 0x02]);
    assert!(matches!(
        codec.decode(&mut reader),
        Err(EncoderError::Reference(RefDecodeError::UnexpectedFlag { flag: 5 }))
    ));
}

#[test]
fn test_null_root() {
    let codec = tracking();
    let mut encoded = codec.encode(&Value::Null).unwrap();
    assert_eq!(&encoded[..], &[0xFD]);
    assert_eq!(codec.decode(&mut encoded).unwrap(), Value::Null);
}
