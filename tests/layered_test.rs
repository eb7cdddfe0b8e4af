use indexmap::IndexMap;
use senax_collections::layered::name_id;
use senax_collections::{
    ClassDef, Codec, CompatibleMode, Config, Container, ContainerKind, EncoderError, GenericType,
    Object, TypeId, TypeRegistry, Value,
};

fn roundtrip(codec: &Codec, value: &Value) -> Value {
    let mut reader = codec.encode(value).unwrap();
    let decoded = codec.decode(&mut reader).unwrap();
    assert!(reader.is_empty());
    decoded
}

fn compatible() -> Config {
    Config::default().with_compatible_mode(CompatibleMode::Compatible)
}

fn id_bytes(id: u64) -> Vec<u8> {
    if id <= 250 {
        vec![id as u8]
    } else {
        let mut out = vec![0xFF];
        out.extend_from_slice(&id.to_le_bytes());
        out
    }
}

fn int_list(values: &[i64]) -> Container {
    Container::List(values.iter().map(|&n| Value::Int(n)).collect())
}

/// Base (list, field a) <- Mid (field b) <- Leaf (field c).
fn three_levels(registry: &mut TypeRegistry) -> (TypeId, TypeId, TypeId) {
    let base = registry
        .register_class(
            ClassDef::new("Base")
                .extends_container(ContainerKind::List)
                .with_field("a"),
        )
        .unwrap();
    let mid = registry
        .register_class(ClassDef::new("Mid").extends(base).with_field("b"))
        .unwrap();
    let leaf = registry
        .register_class(ClassDef::new("Leaf").extends(mid).with_field("c"))
        .unwrap();
    (base, mid, leaf)
}

fn leaf_value(leaf: TypeId) -> Value {
    Value::Object(
        Object::new(leaf)
            .with_field("a", 1)
            .with_field("b", "x")
            .with_field("c", true)
            .with_container(int_list(&[4, 5, 6])),
    )
}

#[test]
fn test_container_first_then_fields() {
    let mut registry = TypeRegistry::new();
    let base = registry
        .register_class(
            ClassDef::new("Base")
                .extends_container(ContainerKind::List)
                .with_field("a"),
        )
        .unwrap();
    assert_eq!(base, TypeId::FIRST_USER);
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(
        Object::new(base)
            .with_field("a", 5)
            .with_container(int_list(&[1, 2])),
    );

    let encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[0xFF, 0x40, 0x02, 0x04, 0x02, 0x02, 0x04, 0x01, 0xFF, 0x02, 0x0A]
    );
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_compatible_level_block_layout() {
    let mut registry = TypeRegistry::new();
    let base = registry
        .register_class(
            ClassDef::new("Base")
                .extends_container(ContainerKind::List)
                .with_field("a"),
        )
        .unwrap();
    let codec = Codec::new(registry, compatible());
    let value = Value::Object(
        Object::new(base)
            .with_field("a", 5)
            .with_container(int_list(&[1, 2])),
    );

    let mut expected = vec![0xFF, 0x40, 0x02, 0x04, 0x02, 0x02, 0x04, 0x01];
    expected.extend(id_bytes(name_id("Base")));
    expected.extend(id_bytes(name_id("a")));
    expected.extend([0xFF, 0x02, 0x0A, 0x00]);
    assert_eq!(&codec.encode(&value).unwrap()[..], &expected[..]);
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_container_type_is_declared_for_elements() {
    let mut registry = TypeRegistry::new();
    let base = registry
        .register_class(
            ClassDef::new("IntList")
                .extends_container(ContainerKind::List)
                .with_container_type(GenericType::list(GenericType::of(TypeId::INT)))
                .with_field("a"),
        )
        .unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(
        Object::new(base)
            .with_field("a", 5)
            .with_container(int_list(&[1, 2])),
    );
    let encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[0xFF, 0x40, 0x02, 0x00, 0x02, 0x04, 0x01, 0xFF, 0x02, 0x0A]
    );
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_three_levels_roundtrip() {
    for config in [Config::default(), compatible()] {
        let mut registry = TypeRegistry::new();
        let (_, _, leaf) = three_levels(&mut registry);
        let codec = Codec::new(registry, config);
        let value = leaf_value(leaf);
        assert_eq!(roundtrip(&codec, &value), value);
    }
}

#[test]
fn test_compatible_reader_skips_unknown_level() {
    let mut writer_registry = TypeRegistry::new();
    let (base, _, leaf) = three_levels(&mut writer_registry);
    let writer = Codec::new(writer_registry, compatible());

    // The reader knows Leaf as a direct subclass of Base and has a field the
    // writer never sends.
    let mut reader_registry = TypeRegistry::new();
    reader_registry
        .register_class_as(
            base,
            ClassDef::new("Base")
                .extends_container(ContainerKind::List)
                .with_field("a"),
        )
        .unwrap();
    reader_registry
        .register_class_as(
            leaf,
            ClassDef::new("Leaf")
                .extends(base)
                .with_field("c")
                .with_field("d"),
        )
        .unwrap();
    let reader = Codec::new(reader_registry, compatible());

    let mut bytes = writer.encode(&leaf_value(leaf)).unwrap();
    let decoded = reader.decode(&mut bytes).unwrap();
    assert!(bytes.is_empty());

    let expected = Object::new(leaf)
        .with_field("a", 1)
        .with_field("c", true)
        .with_container(int_list(&[4, 5, 6]));
    assert_eq!(decoded, Value::Object(expected));
}

#[test]
fn test_schema_consistent_unset_field_stays_unset() {
    let mut registry = TypeRegistry::new();
    let base = registry
        .register_class(
            ClassDef::new("Pair")
                .extends_container(ContainerKind::Set)
                .with_field("first")
                .with_field("second"),
        )
        .unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(
        Object::new(base)
            .with_field("first", "only")
            .with_container(Container::Set(
                [Value::Int(1), Value::Int(2)].into_iter().collect(),
            )),
    );
    let decoded = roundtrip(&codec, &value);
    let obj = decoded.as_object().unwrap();
    assert_eq!(obj.field("first"), Some(&Value::from("only")));
    assert_eq!(obj.field("second"), None);
    assert_eq!(decoded, value);
}

#[test]
fn test_schema_consistent_explicit_null_is_kept() {
    let mut registry = TypeRegistry::new();
    let point = registry
        .register_class(ClassDef::new("Point").with_field("x").with_field("y"))
        .unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(Object::new(point).with_field("y", Value::Null));
    let encoded = codec.encode(&value).unwrap();
    // Only the second presence bit is set.
    assert_eq!(&encoded[..], &[0xFF, 0x40, 0x02, 0xFD, 0x00]);

    let decoded = roundtrip(&codec, &value);
    let obj = decoded.as_object().unwrap();
    assert_eq!(obj.field("x"), None);
    assert_eq!(obj.field("y"), Some(&Value::Null));
}

#[test]
fn test_schema_consistent_presence_spans_bytes() {
    let mut registry = TypeRegistry::new();
    let mut def = ClassDef::new("Wide").extends_container(ContainerKind::List);
    for n in 0..10 {
        def = def.with_field(format!("f{}", n));
    }
    let wide = registry.register_class(def).unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(
        Object::new(wide)
            .with_field("f0", 0)
            .with_field("f9", 9)
            .with_container(int_list(&[])),
    );
    let encoded = codec.encode(&value).unwrap();
    // Empty container, then presence bits for f0 and f9.
    assert_eq!(&encoded[2..5], &[0x00, 0x01, 0x02]);
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_layered_object_requires_container() {
    for config in [Config::default(), compatible()] {
        let mut registry = TypeRegistry::new();
        let bag = registry
            .register_class(
                ClassDef::new("Bag")
                    .extends_container(ContainerKind::List)
                    .with_field("a"),
            )
            .unwrap();
        let codec = Codec::new(registry, config);
        let value = Value::Object(Object::new(bag).with_field("a", 1));
        assert!(matches!(
            codec.encode(&value),
            Err(EncoderError::Encode(_))
        ));
    }
}

#[test]
fn test_map_subclass_roundtrip() {
    let entries: IndexMap<Value, Value> = [("a", 1), ("b", 2)]
        .into_iter()
        .map(|(k, v)| (Value::from(k), Value::Int(v)))
        .collect();
    for config in [Config::default(), compatible()] {
        let mut registry = TypeRegistry::new();
        let counter = registry
            .register_class(
                ClassDef::new("Counter")
                    .extends_container(ContainerKind::Map)
                    .with_container_type(GenericType::map(
                        GenericType::of(TypeId::STRING),
                        GenericType::of(TypeId::INT),
                    ))
                    .with_field("total"),
            )
            .unwrap();
        let codec = Codec::new(registry, config);
        let value = Value::Object(
            Object::new(counter)
                .with_field("total", 3)
                .with_container(Container::Map(entries.clone())),
        );
        assert_eq!(roundtrip(&codec, &value), value);
    }
}

#[test]
fn test_custom_serialization_uses_object_codec() {
    let mut registry = TypeRegistry::new();
    let custom = registry
        .register_class(
            ClassDef::new("Custom")
                .extends_container(ContainerKind::List)
                .with_custom_serialization(true)
                .with_field("a"),
        )
        .unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(
        Object::new(custom)
            .with_field("a", 5)
            .with_container(int_list(&[1, 2])),
    );
    let encoded = codec.encode(&value).unwrap();
    // Presence bits and fields first, then the container kind byte and the
    // container.
    assert_eq!(
        &encoded[..],
        &[0xFF, 0x40, 0x01, 0xFF, 0x02, 0x0A, 0x01, 0x02, 0x04, 0x02, 0x02, 0x04]
    );
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_not_default_constructible_roundtrip() {
    for config in [Config::default(), compatible()] {
        let mut registry = TypeRegistry::new();
        let sorted = registry
            .register_class(
                ClassDef::new("Sorted")
                    .extends_container(ContainerKind::List)
                    .with_default_constructible(false)
                    .with_field("order"),
            )
            .unwrap();
        let codec = Codec::new(registry, config);
        let value = Value::Object(
            Object::new(sorted)
                .with_field("order", "asc")
                .with_container(int_list(&[3, 1])),
        );
        assert_eq!(roundtrip(&codec, &value), value);
    }
}

#[test]
fn test_plain_object() {
    let mut registry = TypeRegistry::new();
    let point = registry
        .register_class(ClassDef::new("Point").with_field("x").with_field("y"))
        .unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(Object::new(point).with_field("x", 1).with_field("y", 2));
    let encoded = codec.encode(&value).unwrap();
    assert_eq!(
        &encoded[..],
        &[0xFF, 0x40, 0x03, 0xFF, 0x02, 0x02, 0xFF, 0x02, 0x04, 0x00]
    );
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_objects_as_list_elements() {
    let mut registry = TypeRegistry::new();
    let (_, _, leaf) = three_levels(&mut registry);
    let codec = Codec::new(registry, compatible());
    let value = Value::List(vec![leaf_value(leaf), Value::Null, leaf_value(leaf)]);
    assert_eq!(roundtrip(&codec, &value), value);
}

#[test]
fn test_container_kind_mismatch() {
    let mut registry = TypeRegistry::new();
    let base = registry
        .register_class(ClassDef::new("Base").extends_container(ContainerKind::List))
        .unwrap();
    let codec = Codec::new(registry, Config::default());
    let value = Value::Object(Object::new(base).with_container(Container::Map(IndexMap::new())));
    assert!(matches!(
        codec.encode(&value),
        Err(EncoderError::Encode(_))
    ));
}

#[test]
fn test_registration_errors() {
    let mut registry = TypeRegistry::new();
    let sealed = registry
        .register_class(
            ClassDef::new("Sealed")
                .extends_container(ContainerKind::List)
                .with_final(true),
        )
        .unwrap();
    assert!(matches!(
        registry.register_class(ClassDef::new("Child").extends(sealed)),
        Err(EncoderError::Registration(_))
    ));
    assert!(matches!(
        registry.register_class(ClassDef::new("Orphan").extends(TypeId(999))),
        Err(EncoderError::Registration(_))
    ));
    assert!(matches!(
        registry.register_class_as(sealed, ClassDef::new("Again")),
        Err(EncoderError::Registration(_))
    ));
}
