use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ogp_binary::{
    derive_reference_traversers, ChunksBuffer, Direct, PrimitiveType, Reversed, TypeDescription, TypeMember,
};
use ogp_types::{ObjectId, TypeId};

fn record_description() -> TypeDescription {
    TypeDescription::new(
        TypeId::new(100),
        "Record",
        vec![
            TypeMember::primitive("id", PrimitiveType::I64),
            TypeMember::reference("left", "Record"),
            TypeMember::reference("right", "Record"),
            TypeMember::primitive("weight", PrimitiveType::F64),
            TypeMember::complex("children", vec![TypeMember::reference("child", "Record")]),
        ],
    )
}

fn bench_traversal(c: &mut Criterion) {
    let description = record_description();
    let program = derive_reference_traversers(&description);
    let children: Vec<ObjectId> = (0..64).map(ObjectId::new).collect();

    let mut chunk = ChunksBuffer::<Reversed>::new(1 << 16);
    {
        let mut w = chunk
            .store_entity_header(8 + 16 + 8 + 16 + 64 * 8, description.type_id, ObjectId::new(1))
            .unwrap();
        let next = w.put(0, 1i64).unwrap();
        let next = w.put_reference(next, ObjectId::new(2)).unwrap();
        let next = w.put_reference(next, ObjectId::new(3)).unwrap();
        let next = w.put(next, 0.5f64).unwrap();
        w.put_references(next, &children).unwrap();
    }
    let buffer = chunk.complete().remove(0);
    let data = ogp_binary::iterate_entities::<Reversed>(&buffer, false)
        .next()
        .unwrap()
        .unwrap();

    c.bench_function("iterate_references/reversed", |b| {
        b.iter(|| {
            let mut count = 0usize;
            data.iterate_references(black_box(&program), &mut |_: ObjectId| count += 1)
                .unwrap();
            count
        })
    });

    c.bench_function("store_entity_header/direct", |b| {
        b.iter(|| {
            let mut chunk = ChunksBuffer::<Direct>::new(1 << 16);
            for oid in 0..256u64 {
                chunk
                    .store_entity_header(24, description.type_id, ObjectId::new(oid))
                    .unwrap();
            }
            chunk.complete()
        })
    });
}

criterion_group!(benches, bench_traversal);
criterion_main!(benches);
